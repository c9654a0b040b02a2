//! Core process configuration.

use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// State directory (autonomy config, patterns, parties, witnesses).
    pub data_dir: PathBuf,
    /// Gateway IPC socket.
    pub socket_path: PathBuf,
    /// File holding the hex-encoded install-time shared secret.
    pub secret_path: PathBuf,
    /// Premium accounts get witness attestations.
    pub premium: bool,
    pub request_timeout_secs: u64,
    pub time_lock_hours: i64,
    pub require_all_parties_for_deletion: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        let base = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".semblance");
        Self {
            data_dir: base.join("core"),
            socket_path: base.join("semblance.sock"),
            secret_path: base.join("ipc_secret"),
            premium: false,
            request_timeout_secs: 30,
            time_lock_hours: 72,
            require_all_parties_for_deletion: true,
        }
    }
}

impl CoreConfig {
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| CoreError::Config(format!("parse {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> CoreResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Read the shared secret provisioned by the gateway at install time.
    pub fn load_secret(&self) -> CoreResult<Vec<u8>> {
        let content = std::fs::read_to_string(&self.secret_path)
            .map_err(|e| CoreError::Config(format!("read secret: {e}")))?;
        hex::decode(content.trim())
            .map_err(|e| CoreError::Config(format!("secret is not hex: {e}")))
    }
}
