/// ChatSync demo - two participants talking over one in-process tree store
use chatsync_core::store::{GuardedStore, MemoryTreeStore};
use chatsync_core::{
    Config, ConversationListSync, ConversationResolver, ConversationRoom, RemoteTreeStore,
    Session, UserDirectory, UserProfile,
};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let store = match &config.data_dir {
        Some(dir) => MemoryTreeStore::with_storage(dir)?,
        None => MemoryTreeStore::new(),
    };
    let store = Arc::new(store);
    let config = Arc::new(config);

    info!("🚀 Starting ChatSync demo");
    info!("   Conversations root: {}", config.conversations_root);
    info!("   Users root: {}", config.users_root);

    // Every participant talks to the store through its own guarded view
    let alice_store = Arc::new(GuardedStore::new(store.clone(), "alice", &config));
    let bob_store = Arc::new(GuardedStore::new(store.clone(), "bob", &config));
    let alice = Session::new("alice", config.clone());
    let bob = Session::new("bob", config.clone());

    register(&alice_store, &config, "alice", "Alice").await?;
    register(&bob_store, &config, "bob", "Bob").await?;

    let bob_list = ConversationListSync::new(bob_store.clone(), bob.clone())
        .subscribe()
        .await?;
    let list_task = tokio::spawn(bob_list.run(|list| {
        for row in list {
            info!(
                "📋 bob's list: {} with {} | {} | unread {}",
                row.conversation_id,
                row.counterpart.map(|p| p.name).unwrap_or_else(|| "?".to_string()),
                row.preview.unwrap_or_default(),
                row.unread_count
            );
        }
    }));

    let resolution = ConversationResolver::new(alice_store.clone(), alice.clone())
        .find_or_create("bob")
        .await?;
    let conversation_id = resolution.conversation_id;
    info!("💬 Conversation {} (existing: {})", conversation_id, resolution.was_existing);

    let mut alice_room =
        ConversationRoom::open(alice_store.clone(), alice.clone(), &conversation_id, "bob").await?;
    alice_room.send("Hi Bob, are you there?").await?;
    drain(&mut alice_room, "alice").await;

    let mut bob_room =
        ConversationRoom::open(bob_store.clone(), bob.clone(), &conversation_id, "alice").await?;
    drain(&mut bob_room, "bob").await;
    drain(&mut alice_room, "alice").await;

    bob_room.send("Here now!").await?;
    drain(&mut alice_room, "alice").await;
    drain(&mut bob_room, "bob").await;

    info!("👋 alice leaves: {:?}", alice_room.leave().await?);
    drain(&mut bob_room, "bob").await;
    info!("👋 bob leaves: {:?}", bob_room.leave().await?);

    let remaining = store.read(&config.conversation_path(&conversation_id)).await?;
    info!("🧹 Conversation still stored: {}", remaining.is_some());

    tokio::time::sleep(Duration::from_millis(50)).await;
    list_task.abort();
    Ok(())
}

async fn register<S: RemoteTreeStore>(
    store: &Arc<S>,
    config: &Arc<Config>,
    uid: &str,
    name: &str,
) -> anyhow::Result<()> {
    UserDirectory::new(store.clone(), config.clone())
        .register(&UserProfile {
            name: name.to_string(),
            email: format!("{}@example.com", uid),
            uid: uid.to_string(),
        })
        .await?;
    Ok(())
}

/// Print whatever the room has to report right now
async fn drain<S: RemoteTreeStore>(room: &mut ConversationRoom<S>, who: &str) {
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(20), room.next_event()).await
    {
        info!("📨 {} sees {:?}", who, event);
    }
}
