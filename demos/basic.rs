//! Basic Yap Example
//!
//! Two devices share one in-memory board: they post, view, favorite and
//! comment, and one of them writes a comment while offline.
//!
//! Run with: cargo run --example basic

use std::sync::Arc;

use yap_board::{Board, BoardConfig, Submission};
use yap_storage::{DocumentStore, MemoryKv, MemoryStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("Yap Basic Example\n");

    let memory = Arc::new(MemoryStore::new());
    let store: Arc<dyn DocumentStore> = memory.clone();

    let alice = Board::open(store.clone(), Arc::new(MemoryKv::new()), BoardConfig::default(), Some("alice"))?;
    let bob = Board::open(store, Arc::new(MemoryKv::new()), BoardConfig::default(), Some("bob"))?;

    // Create a topic
    let topic = alice
        .create_topic("Cats", "Tell me about cats", "cute, , pets")
        .await?;
    println!("Created {} with keywords {:?}", topic.id, topic.keywords);

    // Views count once per device
    alice.open_topic(&topic.id).await?;
    alice.open_topic(&topic.id).await?;
    let view = bob.open_topic(&topic.id).await?;
    println!("Views after three opens by two devices: {}", view.topic.view_count);

    // Favorites toggle
    alice.toggle_favorite(&topic.id).await?;
    bob.toggle_favorite(&topic.id).await?;
    alice.toggle_favorite(&topic.id).await?;
    let topic_now = bob.topics().get_topic(&topic.id).await?;
    println!("Favorites after A, B, A toggles: {}", topic_now.favorites_count);

    // Comment and reply
    if let Submission::Sent(comment) = bob.submit_comment(&topic.id, "Mine sleeps all day", Some("about cats")).await? {
        alice.submit_reply(&topic.id, &comment.id, "So does mine").await?;
    }

    // Offline comment, delivered by the next flush
    memory.set_online(false);
    let submission = alice.submit_comment(&topic.id, "Written on the train", None).await?;
    println!("\nWhile offline: {:?}", matches!(submission, Submission::Queued(_)));
    memory.set_online(true);
    let report = alice.flush_queue().await?;
    println!("Flushed: {} delivered, {} remaining", report.delivered.len(), report.remaining);

    // Thread
    println!("\nThread:");
    for entry in alice.topics().load_thread(&topic.id).await? {
        println!("  {}: {}", entry.comment.user_name, entry.comment.text);
        for reply in entry.replies {
            println!("      {}: {}", reply.user_name, reply.text);
        }
    }

    Ok(())
}
