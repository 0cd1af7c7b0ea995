/// Conversation list tests: membership filter, ordering, unread counts

extern crate chatsync_core;

use chatsync_core::conversation_list::ConversationListFeed;
use chatsync_core::messenger_types::ConversationSummary;
use chatsync_core::timestamp::ElapsedLabel;
use chatsync_core::{
    Config, ConversationListSync, ConversationResolver, ManualClock, MemoryTreeStore, MessageLog,
    PresenceTracker, RemoteTreeStore, Session, UserDirectory, UserProfile,
};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    store: Arc<MemoryTreeStore>,
    config: Arc<Config>,
    clock: Arc<ManualClock>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryTreeStore::new()),
            config: Arc::new(Config::default()),
            clock: Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            )),
        }
    }

    fn session(&self, user_id: &str) -> Session {
        Session::with_clock(user_id, self.config.clone(), self.clock.clone())
    }

    async fn conversation(&self, a: &str, b: &str) -> String {
        ConversationResolver::new(self.store.clone(), self.session(a))
            .find_or_create(b)
            .await
            .unwrap()
            .conversation_id
    }

    async fn send(&self, from: &str, conversation_id: &str, content: &str) -> String {
        MessageLog::new(self.store.clone(), self.session(from))
            .send(conversation_id, content, false)
            .await
            .unwrap()
    }
}

/// Consume every pending update and return the latest list
async fn settle<S: RemoteTreeStore>(feed: &mut ConversationListFeed<S>) -> Vec<ConversationSummary> {
    while let Ok(Some(_)) = tokio::time::timeout(Duration::from_millis(50), feed.next()).await {}
    feed.snapshot()
}

fn ids(list: &[ConversationSummary]) -> Vec<&str> {
    list.iter().map(|row| row.conversation_id.as_str()).collect()
}

#[tokio::test]
async fn test_only_member_conversations_listed() {
    let f = Fixture::new();
    let with_alice = f.conversation("alice", "bob").await;
    let _not_bobs = f.conversation("alice", "carol").await;

    let mut feed = ConversationListSync::new(f.store.clone(), f.session("bob"))
        .subscribe()
        .await
        .unwrap();
    let list = settle(&mut feed).await;
    assert_eq!(ids(&list), vec![with_alice.as_str()]);
    assert_eq!(list[0].counterpart_id.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_sorted_by_latest_message() {
    let f = Fixture::new();
    let empty = f.conversation("dave", "bob").await;
    let with_alice = f.conversation("alice", "bob").await;
    let with_carol = f.conversation("carol", "bob").await;

    f.send("alice", &with_alice, "first").await;
    f.clock.advance(ChronoDuration::minutes(1));
    f.send("carol", &with_carol, "second").await;

    let mut feed = ConversationListSync::new(f.store.clone(), f.session("bob"))
        .subscribe()
        .await
        .unwrap();
    let list = settle(&mut feed).await;
    assert_eq!(
        ids(&list),
        vec![with_carol.as_str(), with_alice.as_str(), empty.as_str()]
    );
    assert_eq!(list[2].last_message, None);
    assert_eq!(list[2].preview, None);

    // A new message moves its conversation to the top
    f.clock.advance(ChronoDuration::minutes(1));
    f.send("bob", &with_alice, "third").await;
    let list = settle(&mut feed).await;
    assert_eq!(
        ids(&list),
        vec![with_alice.as_str(), with_carol.as_str(), empty.as_str()]
    );
    assert_eq!(list[0].preview.as_deref(), Some("third"));
}

#[tokio::test]
async fn test_unread_count_and_profile() {
    let f = Fixture::new();
    UserDirectory::new(f.store.clone(), f.config.clone())
        .register(&UserProfile {
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            uid: "alice".to_string(),
        })
        .await
        .unwrap();

    let cid = f.conversation("alice", "bob").await;
    let m1 = f.send("alice", &cid, "one").await;
    let m2 = f.send("alice", &cid, "two").await;
    f.send("bob", &cid, "mine").await;

    let mut feed = ConversationListSync::new(f.store.clone(), f.session("bob"))
        .subscribe()
        .await
        .unwrap();
    let list = settle(&mut feed).await;
    assert_eq!(list[0].unread_count, 2);
    assert_eq!(
        list[0].counterpart.as_ref().map(|p| p.name.as_str()),
        Some("Alice")
    );
    assert_eq!(list[0].elapsed, Some(ElapsedLabel::JustNow));

    let bob_log = MessageLog::new(f.store.clone(), f.session("bob"));
    bob_log.mark_read(&cid, &m1).await.unwrap();
    assert_eq!(settle(&mut feed).await[0].unread_count, 1);
    bob_log.mark_read(&cid, &m2).await.unwrap();
    assert_eq!(settle(&mut feed).await[0].unread_count, 0);

    // Elapsed labels follow the clock
    f.clock.advance(ChronoDuration::hours(3));
    assert_eq!(feed.snapshot()[0].elapsed, Some(ElapsedLabel::Hours(3)));
}

#[tokio::test]
async fn test_leaving_removes_from_list() {
    let f = Fixture::new();
    let with_alice = f.conversation("alice", "bob").await;
    let with_carol = f.conversation("carol", "bob").await;

    let mut feed = ConversationListSync::new(f.store.clone(), f.session("bob"))
        .subscribe()
        .await
        .unwrap();
    assert_eq!(settle(&mut feed).await.len(), 2);

    PresenceTracker::new(f.store.clone(), f.session("bob"))
        .leave(&with_alice)
        .await
        .unwrap();
    let list = settle(&mut feed).await;
    assert_eq!(ids(&list), vec![with_carol.as_str()]);

    feed.unsubscribe();
    feed.unsubscribe();
    assert_eq!(f.store.listener_count(), 0);
}

#[tokio::test]
async fn test_opening_conversation_clears_unread() {
    let f = Fixture::new();
    let cid = f.conversation("alice", "bob").await;
    f.send("alice", &cid, "hi").await;

    let mut feed = ConversationListSync::new(f.store.clone(), f.session("bob"))
        .subscribe()
        .await
        .unwrap();
    assert_eq!(settle(&mut feed).await[0].unread_count, 1);

    let mut room = chatsync_core::ConversationRoom::open(f.store.clone(), f.session("bob"), &cid, "alice")
        .await
        .unwrap();
    for _ in 0..2 {
        tokio::time::timeout(Duration::from_secs(1), room.next_event())
            .await
            .unwrap()
            .unwrap();
    }
    assert_eq!(settle(&mut feed).await[0].unread_count, 0);
    room.close().await.unwrap();
}
