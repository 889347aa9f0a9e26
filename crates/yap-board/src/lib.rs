//! Yap Board
//!
//! Client core of the Yap discussion board: counts views and favorites
//! once per device, reads and writes topics and comments, and keeps
//! comments written offline until they can be delivered.

pub mod adapter;
pub mod board;
pub mod config;
pub mod connectivity;
pub mod identity;
pub mod ledger;
pub mod marks;
pub mod paths;
pub mod queue;
pub mod search;
pub mod subscription;

pub use adapter::{CommentThread, TopicStore};
pub use board::{Board, Submission, TopicView};
pub use config::{BoardConfig, ReplyMode};
pub use connectivity::Connectivity;
pub use identity::DeviceIdentity;
pub use ledger::{ActionLedger, CountOutcome};
pub use marks::LocalMarks;
pub use queue::{FlushReport, OfflineQueue, QueuedComment};
pub use search::filter_topics;
pub use subscription::Subscription;
