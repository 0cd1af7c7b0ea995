/// Failure handling: read receipts, room opening and reaping against a
/// store that rejects selected operations

extern crate chatsync_core;

use chatsync_core::messenger_types::RoomEvent;
use chatsync_core::store::{ChildEvent, EqualityFilter, Subscription, TreePath};
use chatsync_core::{
    ChatError, Config, ConversationResolver, ConversationRoom, MemoryTreeStore, Message,
    MessageLog, PresenceState, PresenceTracker, RemoteTreeStore, Result, Session,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// In-process store with switches that make single operations fail
#[derive(Default)]
struct FlakyStore {
    inner: MemoryTreeStore,
    fail_write_field: AtomicBool,
    fail_delete: AtomicBool,
    fail_snapshot: AtomicBool,
    fail_child_diff: AtomicBool,
}

fn check(flag: &AtomicBool, op: &str) -> Result<()> {
    if flag.load(Ordering::SeqCst) {
        return Err(ChatError::Storage(format!("{} rejected", op)));
    }
    Ok(())
}

impl RemoteTreeStore for FlakyStore {
    async fn read(&self, path: &TreePath) -> Result<Option<Value>> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &TreePath, value: Value) -> Result<()> {
        self.inner.write(path, value).await
    }

    async fn write_field(&self, path: &TreePath, field: &str, value: Value) -> Result<()> {
        check(&self.fail_write_field, "write_field")?;
        self.inner.write_field(path, field, value).await
    }

    async fn delete(&self, path: &TreePath) -> Result<()> {
        check(&self.fail_delete, "delete")?;
        self.inner.delete(path).await
    }

    async fn query_equal(
        &self,
        path: &TreePath,
        filter: EqualityFilter,
    ) -> Result<Vec<(String, Value)>> {
        self.inner.query_equal(path, filter).await
    }

    async fn subscribe_snapshot(&self, path: &TreePath) -> Result<Subscription<Option<Value>>> {
        check(&self.fail_snapshot, "subscribe_snapshot")?;
        self.inner.subscribe_snapshot(path).await
    }

    async fn subscribe_child_diff(
        &self,
        path: &TreePath,
        filter: Option<EqualityFilter>,
    ) -> Result<Subscription<ChildEvent>> {
        check(&self.fail_child_diff, "subscribe_child_diff")?;
        self.inner.subscribe_child_diff(path, filter).await
    }

    async fn push(&self, path: &TreePath) -> Result<String> {
        self.inner.push(path).await
    }
}

struct Fixture {
    store: Arc<FlakyStore>,
    config: Arc<Config>,
    alice: Session,
    bob: Session,
    conversation_id: String,
}

async fn fixture() -> Fixture {
    let store = Arc::new(FlakyStore::default());
    let config = Arc::new(Config::default());
    let alice = Session::new("alice", config.clone());
    let bob = Session::new("bob", config.clone());
    let conversation_id = ConversationResolver::new(store.clone(), alice.clone())
        .find_or_create("bob")
        .await
        .unwrap()
        .conversation_id;
    Fixture {
        store,
        config,
        alice,
        bob,
        conversation_id,
    }
}

impl Fixture {
    async fn send_from_alice(&self, content: &str) -> String {
        MessageLog::new(self.store.clone(), self.alice.clone())
            .send(&self.conversation_id, content, false)
            .await
            .unwrap()
    }

    async fn confirmed(&self, message_id: &str) -> bool {
        let value = self
            .store
            .read(&self.config.message_path(&self.conversation_id, message_id))
            .await
            .unwrap()
            .unwrap();
        serde_json::from_value::<Message>(value).unwrap().confirmed
    }

    async fn presence(&self, participant_id: &str) -> PresenceState {
        PresenceTracker::new(self.store.clone(), self.alice.clone())
            .presence_of(&self.conversation_id, participant_id)
            .await
            .unwrap()
    }
}

async fn next<S: RemoteTreeStore>(room: &mut ConversationRoom<S>) -> RoomEvent {
    tokio::time::timeout(Duration::from_secs(1), room.next_event())
        .await
        .expect("room event")
        .expect("room open")
}

#[tokio::test]
async fn test_failed_receipt_is_reported_and_retried() {
    let f = fixture().await;
    let m1 = f.send_from_alice("hi").await;

    f.store.fail_write_field.store(true, Ordering::SeqCst);
    let mut room = ConversationRoom::open(f.store.clone(), f.bob.clone(), &f.conversation_id, "alice")
        .await
        .unwrap();
    assert!(matches!(
        next(&mut room).await,
        RoomEvent::MessageAdded { message_id, .. } if message_id == m1
    ));
    assert!(matches!(
        next(&mut room).await,
        RoomEvent::ReadReceiptFailed { message_id, error } if message_id == m1 && error.contains("write_field")
    ));
    assert_eq!(room.unconfirmed().collect::<Vec<_>>(), vec![m1.as_str()]);
    assert!(!f.confirmed(&m1).await);

    // Store is back: the next arrival also settles the earlier receipt
    f.store.fail_write_field.store(false, Ordering::SeqCst);
    let m2 = f.send_from_alice("still there?").await;
    assert!(matches!(
        next(&mut room).await,
        RoomEvent::MessageAdded { message_id, .. } if message_id == m2
    ));
    assert_eq!(
        next(&mut room).await,
        RoomEvent::ReadReceiptSent { message_id: m1.clone() }
    );
    assert_eq!(
        next(&mut room).await,
        RoomEvent::ReadReceiptSent { message_id: m2.clone() }
    );
    assert!(f.confirmed(&m1).await);
    assert!(f.confirmed(&m2).await);
    assert_eq!(room.unconfirmed().count(), 0);
}

#[tokio::test]
async fn test_resume_retries_failed_receipt() {
    let f = fixture().await;
    let m1 = f.send_from_alice("hi").await;

    f.store.fail_write_field.store(true, Ordering::SeqCst);
    let mut room = ConversationRoom::open(f.store.clone(), f.bob.clone(), &f.conversation_id, "alice")
        .await
        .unwrap();
    next(&mut room).await;
    assert!(matches!(
        next(&mut room).await,
        RoomEvent::ReadReceiptFailed { .. }
    ));
    room.pause().await.unwrap();

    f.store.fail_write_field.store(false, Ordering::SeqCst);
    assert_eq!(room.resume().await.unwrap(), 1);
    assert!(f.confirmed(&m1).await);
    assert_eq!(
        next(&mut room).await,
        RoomEvent::ReadReceiptSent { message_id: m1 }
    );
    assert_eq!(room.unconfirmed().count(), 0);
}

#[tokio::test]
async fn test_failed_open_leaves_presence_untouched() {
    let f = fixture().await;

    f.store.fail_snapshot.store(true, Ordering::SeqCst);
    let result =
        ConversationRoom::open(f.store.clone(), f.bob.clone(), &f.conversation_id, "alice").await;
    assert!(matches!(result, Err(ChatError::QueryFailed(_))));
    assert_eq!(f.presence("bob").await, PresenceState::JOINED_INACTIVE);
    f.store.fail_snapshot.store(false, Ordering::SeqCst);

    f.store.fail_child_diff.store(true, Ordering::SeqCst);
    let result =
        ConversationRoom::open(f.store.clone(), f.bob.clone(), &f.conversation_id, "alice").await;
    assert!(matches!(result, Err(ChatError::QueryFailed(_))));
    assert_eq!(f.presence("bob").await, PresenceState::JOINED_INACTIVE);
    assert_eq!(f.store.inner.listener_count(), 0);
    f.store.fail_child_diff.store(false, Ordering::SeqCst);

    // Nobody is viewing on Bob's side, so Alice's message stays unread
    let mut alice_room =
        ConversationRoom::open(f.store.clone(), f.alice.clone(), &f.conversation_id, "bob")
            .await
            .unwrap();
    let sent = alice_room.send("hello?").await.unwrap();
    assert!(!f.confirmed(&sent).await);
}

#[tokio::test]
async fn test_receipt_and_reap_failures_are_categorized() {
    let f = fixture().await;
    let m1 = f.send_from_alice("hi").await;

    f.store.fail_write_field.store(true, Ordering::SeqCst);
    let bob_log = MessageLog::new(f.store.clone(), f.bob.clone());
    assert!(matches!(
        bob_log.mark_read(&f.conversation_id, &m1).await,
        Err(ChatError::SendFailed(_))
    ));

    f.store.fail_delete.store(true, Ordering::SeqCst);
    assert!(matches!(
        bob_log.delete(&f.conversation_id, &m1).await,
        Err(ChatError::SendFailed(_))
    ));

    PresenceTracker::new(f.store.clone(), f.alice.clone())
        .leave(&f.conversation_id)
        .await
        .unwrap();
    let reaped = PresenceTracker::new(f.store.clone(), f.bob.clone())
        .leave(&f.conversation_id)
        .await;
    assert!(matches!(reaped, Err(ChatError::PresenceWriteFailed(_))));
    // The leave itself went through; only the cleanup is pending
    assert_eq!(f.presence("bob").await, PresenceState::LEFT);
}
