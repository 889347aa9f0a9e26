//! Configuration file
//!
//! ```toml
//! log_level = "info"
//!
//! [store]
//! db = "/var/lib/yap/board.db"
//! local = "/var/lib/yap/local.json"
//!
//! [board]
//! reply_mode = "embedded"
//!
//! [board.transactions]
//! max_attempts = 8
//! base_backoff = 10
//! max_backoff = 1000
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use yap_board::BoardConfig;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub store: StoreConfig,
    pub board: BoardConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database holding the board
    pub db: Option<PathBuf>,
    /// JSON file holding device-local state
    pub local: Option<PathBuf>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }
}

/// Per-user data directory, falling back to the working directory
pub fn data_dir() -> PathBuf {
    dirs_next::data_dir()
        .map(|dir| dir.join("yap"))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use yap_board::ReplyMode;

    #[test]
    fn test_load_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("yap.toml");
        std::fs::write(
            &path,
            r#"
            log_level = "debug"

            [store]
            db = "board.db"

            [board]
            reply_mode = "embedded"

            [board.transactions]
            max_attempts = 9
            "#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.store.db, Some(PathBuf::from("board.db")));
        assert_eq!(config.store.local, None);
        assert_eq!(config.board.reply_mode, ReplyMode::Embedded);
        assert_eq!(config.board.transactions.max_attempts, 9);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("yap.toml");
        std::fs::write(&path, "").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.board, BoardConfig::default());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Config::load(Path::new("/nonexistent/yap.toml")).is_err());
    }
}
