/// Presence and reaping tests

extern crate chatsync_core;

use chatsync_core::{
    ChatError, Config, ConversationResolver, MemoryTreeStore, PresenceState, PresenceTracker,
    ReapOutcome, RemoteTreeStore, Session,
};
use std::sync::Arc;

struct Fixture {
    store: Arc<MemoryTreeStore>,
    config: Arc<Config>,
    conversation_id: String,
    alice: PresenceTracker<MemoryTreeStore>,
    bob: PresenceTracker<MemoryTreeStore>,
}

async fn fixture() -> Fixture {
    let store = Arc::new(MemoryTreeStore::new());
    let config = Arc::new(Config::default());
    let alice_session = Session::new("alice", config.clone());
    let bob_session = Session::new("bob", config.clone());

    let conversation_id = ConversationResolver::new(store.clone(), alice_session.clone())
        .find_or_create("bob")
        .await
        .unwrap()
        .conversation_id;

    Fixture {
        alice: PresenceTracker::new(store.clone(), alice_session),
        bob: PresenceTracker::new(store.clone(), bob_session),
        store,
        config,
        conversation_id,
    }
}

#[tokio::test]
async fn test_enter_pause_transitions() {
    let f = fixture().await;
    let cid = &f.conversation_id;

    assert_eq!(
        f.bob.presence_of(cid, "bob").await.unwrap(),
        PresenceState::JOINED_INACTIVE
    );
    f.bob.enter(cid).await.unwrap();
    assert_eq!(
        f.alice.presence_of(cid, "bob").await.unwrap(),
        PresenceState::JOINED_ACTIVE
    );
    f.bob.pause(cid).await.unwrap();
    assert_eq!(
        f.alice.presence_of(cid, "bob").await.unwrap(),
        PresenceState::JOINED_INACTIVE
    );
}

#[tokio::test]
async fn test_active_requires_member() {
    let f = fixture().await;
    let writes = f.store.write_count();

    let result = f.bob.set_presence(&f.conversation_id, false, true).await;
    assert!(matches!(result, Err(ChatError::InvalidPresence(_))));
    assert_eq!(f.store.write_count(), writes);
}

#[tokio::test]
async fn test_left_is_terminal() {
    let f = fixture().await;
    let cid = &f.conversation_id;

    assert_eq!(
        f.alice.leave(cid).await.unwrap(),
        ReapOutcome::Retained { members: 1 }
    );
    assert_eq!(
        f.bob.presence_of(cid, "alice").await.unwrap(),
        PresenceState::LEFT
    );
    assert!(matches!(
        f.alice.enter(cid).await,
        Err(ChatError::InvalidPresence(_))
    ));
}

#[tokio::test]
async fn test_unknown_conversation_is_not_found() {
    let f = fixture().await;
    assert!(matches!(
        f.alice.enter("missing").await,
        Err(ChatError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_reaped_after_both_leave() {
    let f = fixture().await;
    let cid = &f.conversation_id;
    let path = f.config.conversation_path(cid);

    assert_eq!(
        f.bob.leave(cid).await.unwrap(),
        ReapOutcome::Retained { members: 1 }
    );
    assert!(f.store.read(&path).await.unwrap().is_some());

    assert_eq!(f.alice.leave(cid).await.unwrap(), ReapOutcome::Deleted);
    assert_eq!(f.store.read(&path).await.unwrap(), None);
}

#[tokio::test]
async fn test_watch_follows_counterpart_and_releases() {
    let f = fixture().await;
    let cid = &f.conversation_id;
    assert_eq!(f.store.listener_count(), 0);

    let mut watch = f.alice.watch_counterpart_active(cid, "bob").await.unwrap();
    assert_eq!(f.store.listener_count(), 1);
    assert_eq!(watch.counterpart_id(), "bob");
    assert!(!watch.is_active());

    f.bob.enter(cid).await.unwrap();
    assert_eq!(watch.changed().await, Some(true));
    assert!(watch.is_active());

    f.bob.pause(cid).await.unwrap();
    assert!(!watch.is_active());

    watch.unwatch();
    watch.unwatch();
    assert!(!watch.is_watching());
    assert_eq!(f.store.listener_count(), 0);
    assert_eq!(watch.changed().await, None);
}

#[tokio::test]
async fn test_dropped_watch_releases_listener() {
    let f = fixture().await;
    {
        let _watch = f
            .alice
            .watch_counterpart_active(&f.conversation_id, "bob")
            .await
            .unwrap();
        assert_eq!(f.store.listener_count(), 1);
    }
    assert_eq!(f.store.listener_count(), 0);
}
