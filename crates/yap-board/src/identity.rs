//! Device identity
//!
//! A device gets a random id the first time it runs and keeps it in
//! device-local storage. The display name is kept next to it.

use tracing::{info, warn};
use yap_core::{require_text, DeviceId, Result};
use yap_storage::KeyValueStore;

pub const DEVICE_ID_KEY: &str = "deviceId";
pub const USERNAME_KEY: &str = "username";
pub const DEFAULT_NAME: &str = "Anonymous";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    device_id: DeviceId,
    display_name: String,
}

impl DeviceIdentity {
    /// Load the stored identity, creating and persisting whatever is missing.
    ///
    /// A stored name wins over `name`; `name` only seeds a fresh device.
    pub fn load_or_init(kv: &dyn KeyValueStore, name: Option<&str>) -> Result<Self> {
        let stored = kv.get(DEVICE_ID_KEY)?.and_then(|raw| match DeviceId::new(raw) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "Discarding invalid stored device id");
                None
            }
        });

        let device_id = match stored {
            Some(id) => id,
            None => {
                let id = DeviceId::generate();
                kv.set(DEVICE_ID_KEY, id.as_str())?;
                info!(device = %id, "New device id generated");
                id
            }
        };

        let display_name = match kv.get(USERNAME_KEY)?.filter(|n| !n.trim().is_empty()) {
            Some(stored) => stored,
            None => {
                let chosen = name
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .unwrap_or(DEFAULT_NAME)
                    .to_string();
                kv.set(USERNAME_KEY, &chosen)?;
                chosen
            }
        };

        Ok(Self {
            device_id,
            display_name,
        })
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn rename(&mut self, kv: &dyn KeyValueStore, name: &str) -> Result<()> {
        let name = require_text("name", name)?;
        kv.set(USERNAME_KEY, &name)?;
        info!(device = %self.device_id, name = %name, "Display name changed");
        self.display_name = name;
        Ok(())
    }
}
