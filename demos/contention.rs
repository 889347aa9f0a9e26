//! Favorite Contention
//!
//! Many devices toggle the same topic at once. Every toggle commits through
//! an optimistic transaction, so the final counter equals the number of
//! devices left holding a favorite marker.
//!
//! Run with: cargo run --example contention --release

use std::sync::Arc;
use std::time::{Duration, Instant};

use yap_board::{Board, BoardConfig};
use yap_core::ActionKind;
use yap_storage::{DocumentStore, MemoryKv, MemoryStore, RetryPolicy};

/// Number of simulated devices
const DEVICES: usize = 64;
/// Toggles per device
const TOGGLES: usize = 3;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let config = BoardConfig {
        transactions: RetryPolicy {
            max_attempts: 1000,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(20),
        },
        ..BoardConfig::default()
    };

    let mut boards = Vec::with_capacity(DEVICES);
    for _ in 0..DEVICES {
        boards.push(Arc::new(Board::open(
            store.clone(),
            Arc::new(MemoryKv::new()),
            config.clone(),
            None,
        )?));
    }
    let topic = boards[0].create_topic("Hot topic", "Everyone has an opinion", "").await?;

    println!("{} devices x {} toggles on {}", DEVICES, TOGGLES, topic.id);
    let start = Instant::now();

    let mut handles = Vec::with_capacity(DEVICES);
    for board in &boards {
        let board = board.clone();
        let id = topic.id.clone();
        handles.push(tokio::spawn(async move {
            let mut failed = 0u64;
            for _ in 0..TOGGLES {
                if board.toggle_favorite(&id).await.is_err() {
                    failed += 1;
                }
            }
            failed
        }));
    }

    let mut failed = 0;
    for handle in handles {
        failed += handle.await?;
    }
    let elapsed = start.elapsed();

    let mut holding = 0;
    for board in &boards {
        if boards[0]
            .ledger()
            .is_counted(&topic.id, board.identity().device_id(), ActionKind::Favorite)
            .await?
        {
            holding += 1;
        }
    }
    let counter = boards[0].topics().get_topic(&topic.id).await?.favorites_count;

    println!("Elapsed:          {:.2?}", elapsed);
    println!("Failed toggles:   {}", failed);
    println!("Favorite markers: {}", holding);
    println!("Counter:          {}", counter);
    println!("Consistent:       {}", counter == holding);

    Ok(())
}
