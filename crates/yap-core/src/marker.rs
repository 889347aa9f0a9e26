//! Per-device action markers

use crate::fields;
use crate::ids::{DeviceId, Timestamp};
use serde::{Deserialize, Serialize};

/// A countable per-device action on a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    /// Counted once per device, never uncounted
    View,
    /// Toggled on and off per device
    Favorite,
}

impl ActionKind {
    /// Sub-collection of the topic holding this kind's markers
    pub fn collection(&self) -> &'static str {
        match self {
            ActionKind::View => "views",
            ActionKind::Favorite => "favorites",
        }
    }

    /// Topic field aggregating this kind across devices
    pub fn counter_field(&self) -> &'static str {
        match self {
            ActionKind::View => fields::VIEW_COUNT,
            ActionKind::Favorite => fields::FAVORITES_COUNT,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::View => write!(f, "view"),
            ActionKind::Favorite => write!(f, "favorite"),
        }
    }
}

/// Marker document whose existence records that a device performed an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionMarker {
    pub device_id: DeviceId,
    pub created_at: Timestamp,
}

impl ActionMarker {
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            created_at: Timestamp::now(),
        }
    }
}
