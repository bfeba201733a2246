///
/// # Primitive Configuration
///
/// Tunables for the lock and queue constructors. Nothing here is global:
/// a config is parsed or built, then handed to `Lock::with_config` or
/// `Queue::with_config` explicitly.
///
/// ## Example fastsync.toml
///
/// ```toml
/// # fast-path claim retries before a contended lock enqueues and parks
/// spin_limit = 64
/// # omit for an unbounded queue
/// queue_capacity = 128
/// ```
///

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

pub const DEFAULT_SPIN_LIMIT: u32 = 40;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub spin_limit: u32,
    pub queue_capacity: Option<usize>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            spin_limit: DEFAULT_SPIN_LIMIT,
            queue_capacity: None,
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(content: &str) -> SyncResult<Self> {
        let config: SyncConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.queue_capacity == Some(0) {
            return Err(SyncError::InvalidConfig(
                "queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_spin_limit(mut self, spin_limit: u32) -> Self {
        self.spin_limit = spin_limit;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }
}
