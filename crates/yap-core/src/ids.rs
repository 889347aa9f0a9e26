//! Identifier and timestamp types

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum identifier length in bytes
pub const MAX_ID_LEN: usize = 128;

/// Check that `segment` can be used as a store path segment.
///
/// Segments are 1-128 bytes of `[a-zA-Z0-9_-]`.
pub fn validate_segment(segment: &str) -> std::result::Result<(), String> {
    if segment.is_empty() {
        return Err("identifier cannot be empty".into());
    }

    if segment.len() > MAX_ID_LEN {
        return Err(format!("identifier exceeds {} bytes", MAX_ID_LEN));
    }

    if !segment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err("identifier must match pattern [a-zA-Z0-9_-]+".into());
    }

    Ok(())
}

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier, validating the format
            pub fn new(id: impl Into<String>) -> Result<Self> {
                let id = id.into();
                validate_segment(&id).map_err(|reason| {
                    Error::Validation(format!("{} {:?}: {}", stringify!($name), id, reason))
                })?;
                Ok(Self(id))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(id: String) -> Result<Self> {
                Self::new(id)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::new(s)
            }
        }
    };
}

id_type!(
    /// Store-assigned topic identifier
    TopicId
);
id_type!(
    /// Store-assigned comment identifier
    CommentId
);
id_type!(
    /// Store-assigned reply identifier (sub-collection replies only)
    ReplyId
);
id_type!(
    /// Locally generated, unauthenticated per-device identifier
    DeviceId
);

impl DeviceId {
    /// Generate a fresh random device identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Milliseconds since the Unix epoch.
///
/// `Timestamp::now` is strictly increasing within a process, so records
/// created back to back sort in creation order even inside one millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        static LAST: AtomicU64 = AtomicU64::new(0);

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let previous = LAST
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| {
                Some(millis.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        Self(millis.max(previous + 1))
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
