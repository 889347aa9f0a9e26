//! Board configuration

use serde::{Deserialize, Serialize};
use yap_storage::RetryPolicy;

/// Where replies to a comment are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplyMode {
    /// Appended to the comment's `replies` array with an array union.
    /// Identical replies (same author, text and instant) collapse into one.
    Embedded,
    /// One child document per reply under the comment
    #[default]
    Subcollection,
}

/// Tunables for the board core, usually read from the `[board]` table of
/// the CLI config file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub reply_mode: ReplyMode,
    /// Retry policy for ledger transactions
    pub transactions: RetryPolicy,
    /// Snapshots buffered per subscription before the watcher waits
    pub subscription_buffer: usize,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            reply_mode: ReplyMode::default(),
            transactions: RetryPolicy::default(),
            subscription_buffer: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = BoardConfig::default();
        assert_eq!(config.reply_mode, ReplyMode::Subcollection);
        assert_eq!(config.transactions.max_attempts, 5);
        assert_eq!(config.subscription_buffer, 16);
    }

    #[test]
    fn test_parse_toml() {
        let config: BoardConfig = toml::from_str(
            r#"
            reply_mode = "embedded"

            [transactions]
            max_attempts = 8
            base_backoff = 25
            "#,
        )
        .unwrap();

        assert_eq!(config.reply_mode, ReplyMode::Embedded);
        assert_eq!(config.transactions.max_attempts, 8);
        assert_eq!(config.transactions.base_backoff, Duration::from_millis(25));
        assert_eq!(config.subscription_buffer, 16);
    }
}
