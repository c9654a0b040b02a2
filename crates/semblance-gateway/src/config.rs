//! Gateway configuration.
//!
//! No environment variables are required for correctness; everything
//! lives in a JSON file under the per-user data directory, with an
//! optional path override on the command line.

use crate::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// State directory (audit DB, allowlist snapshot, shared secret).
    pub data_dir: PathBuf,
    /// Per-user IPC socket path.
    pub socket_path: PathBuf,
    /// File holding the hex-encoded install-time shared secret.
    pub secret_path: PathBuf,

    // Rate limiter.
    pub rate_window_ms: u64,
    pub rate_default_limit: u32,
    pub rate_global_limit: u32,

    // Anomaly detector.
    pub burst_threshold: u32,
    pub burst_window_ms: u64,
    pub max_payload_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let base = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".semblance");
        Self {
            data_dir: base.join("gateway"),
            socket_path: base.join("semblance.sock"),
            secret_path: base.join("ipc_secret"),
            rate_window_ms: 60_000,
            rate_default_limit: 30,
            rate_global_limit: 120,
            burst_threshold: 5,
            burst_window_ms: 10_000,
            max_payload_bytes: 256 * 1024,
        }
    }
}

impl GatewayConfig {
    pub fn load(path: &Path) -> GatewayResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("parse {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> GatewayResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Read the shared secret, creating a fresh one on first run.
    pub fn load_or_create_secret(&self) -> GatewayResult<Vec<u8>> {
        if self.secret_path.exists() {
            let content = std::fs::read_to_string(&self.secret_path)
                .map_err(|e| GatewayError::Config(format!("read secret: {e}")))?;
            return hex::decode(content.trim())
                .map_err(|e| GatewayError::Config(format!("secret is not hex: {e}")));
        }

        let secret = semblance_crypto::random_secret32();
        if let Some(parent) = self.secret_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.secret_path, hex::encode(secret))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&self.secret_path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(&self.secret_path, perms)?;
        }
        Ok(secret.to_vec())
    }
}
