//! Persisted mode / lock state
//!
//! A small JSON document that survives restarts: the mode to come up in, the user's
//! lock and override toggles, and the marker telling the next process that it was
//! launched by a mode transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::PersistenceError;
use crate::mode::ConnectionMode;

/// State persisted between runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PersistedState {
    /// Mode the next process starts in
    pub mode: ConnectionMode,
    /// Sink used when `mode` is CUSTOM
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_device: Option<String>,
    /// Suppresses automatic failover and failback prompts
    pub autoswitch_locked: bool,
    /// Forces channel-1 traffic through the CH2 controller in HYBRID mode
    pub ch1_override: bool,
    /// Set when a mode transition asked for a relaunch
    pub pending_restart: bool,
    /// Verbose traffic logging
    pub debug_enabled: bool,
    /// Refreshed on every save
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
}

/// Key-value store for [`PersistedState`]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the stored state; a store that was never written yields the defaults.
    async fn load(&self) -> Result<PersistedState, PersistenceError>;

    /// Replace the stored state.
    async fn save(&self, state: &PersistedState) -> Result<(), PersistenceError>;
}

/// JSON file store
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load(&self) -> Result<PersistedState, PersistenceError> {
        let json = match fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}, using defaults", self.path.display());
                return Ok(PersistedState::default());
            },
            Err(e) => return Err(e.into()),
        };

        let state: PersistedState = serde_json::from_str(&json)?;
        debug!(
            mode = %state.mode,
            locked = state.autoswitch_locked,
            pending_restart = state.pending_restart,
            "State file loaded"
        );
        Ok(state)
    }

    async fn save(&self, state: &PersistedState) -> Result<(), PersistenceError> {
        let mut stamped = state.clone();
        stamped.last_run = Some(Utc::now());

        let json = serde_json::to_string_pretty(&stamped)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(&self.path, json).await?;

        debug!(mode = %stamped.mode, "State file saved");
        Ok(())
    }
}
