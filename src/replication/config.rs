//! Replication configuration
//!
//! - Disabled by default: the single-node file writer is used
//! - When enabled, the node needs a stable identity
//! - Immutable after startup

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{ConfigError, ConfigResult};

/// Replication settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Whether the replicated redo writer is used.
    pub enabled: bool,

    /// Identity of this node within the replication group.
    ///
    /// Required when enabled. `replicated` generates one when absent.
    pub node_id: Option<Uuid>,
}

impl ReplicationConfig {
    /// Replication off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            node_id: None,
        }
    }

    /// Replication on, generating a node id if none is given.
    pub fn replicated(node_id: Option<Uuid>) -> Self {
        Self {
            enabled: true,
            node_id: Some(node_id.unwrap_or_else(Uuid::new_v4)),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !self.enabled {
            return Ok(());
        }
        match self.node_id {
            None => Err(ConfigError::Invalid(
                "replication requires node_id to be configured".into(),
            )),
            Some(id) if id.is_nil() => Err(ConfigError::Invalid(
                "replication node_id must not be nil".into(),
            )),
            Some(_) => Ok(()),
        }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self::disabled()
    }
}
