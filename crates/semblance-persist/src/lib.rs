//! JSON file-backed persistence for Semblance core-side state.
//!
//! Two store shapes: [`StateStore`] for keyed collections (approval
//! patterns, trusted parties, activations) and [`DocumentStore`] for
//! single configuration documents (autonomy config). Both keep data in
//! memory at the call site and snapshot to disk on every write. Writes go
//! through a temp file + rename so a crash mid-write never leaves a
//! half-written snapshot behind.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}

/// Keyed JSON store for a single domain of data.
///
/// Snapshots to `{root}/state/{domain}.json`.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(root: &Path, domain: &str) -> Self {
        let path = root.join("state").join(format!("{domain}.json"));
        Self { path }
    }

    /// Load the full map. Missing file → empty; corrupt file → empty with
    /// a warning (the snapshot is a cache of core-owned state, not the
    /// audit trail).
    pub fn load<T: for<'de> Deserialize<'de>>(&self) -> HashMap<String, T> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "corrupt state file, starting fresh");
                HashMap::new()
            }),
            Err(_) => {
                debug!(path = %self.path.display(), "no state file, starting fresh");
                HashMap::new()
            }
        }
    }

    /// Snapshot the full map to disk.
    pub fn save<T: Serialize>(&self, data: &HashMap<String, T>) -> std::io::Result<()> {
        let content = serde_json::to_string_pretty(data).map_err(std::io::Error::other)?;
        write_atomic(&self.path, &content)
    }
}

/// Single-document JSON store.
///
/// Snapshots to `{root}/state/{name}.json`.
pub struct DocumentStore {
    path: PathBuf,
}

impl DocumentStore {
    pub fn new(root: &Path, name: &str) -> Self {
        let path = root.join("state").join(format!("{name}.json"));
        Self { path }
    }

    pub fn load<T: for<'de> Deserialize<'de> + Default>(&self) -> T {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "corrupt document, using defaults");
                T::default()
            }),
            Err(_) => T::default(),
        }
    }

    pub fn save<T: Serialize>(&self, doc: &T) -> std::io::Result<()> {
        let content = serde_json::to_string_pretty(doc).map_err(std::io::Error::other)?;
        write_atomic(&self.path, &content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    struct Doc {
        tier: String,
        threshold: u32,
    }

    #[test]
    fn test_state_store_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path(), "patterns");

        let mut data = HashMap::new();
        data.insert("email.send:new".to_string(), 3u32);
        data.insert("email.archive:default".to_string(), 7u32);
        store.save(&data).expect("save");

        let loaded: HashMap<String, u32> = store.load();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["email.send:new"], 3);
    }

    #[test]
    fn test_state_store_empty_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path(), "missing");
        let loaded: HashMap<String, u32> = store.load();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_state_store_corrupt_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state_dir = dir.path().join("state");
        std::fs::create_dir_all(&state_dir).expect("mkdir");
        std::fs::write(state_dir.join("broken.json"), "{not json").expect("write");

        let store = StateStore::new(dir.path(), "broken");
        let loaded: HashMap<String, u32> = store.load();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_state_store_no_tmp_left_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path(), "atomic");

        let mut data = HashMap::new();
        data.insert("k".to_string(), 1u32);
        store.save(&data).expect("save");

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("state"))
            .expect("read_dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["atomic.json".to_string()]);
    }

    #[test]
    fn test_document_store_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DocumentStore::new(dir.path(), "autonomy");

        let doc = Doc {
            tier: "partner".to_string(),
            threshold: 3,
        };
        store.save(&doc).expect("save");

        let loaded: Doc = store.load();
        assert_eq!(loaded, doc);
    }

    #[test]
    fn test_document_store_defaults_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DocumentStore::new(dir.path(), "nothing");
        let loaded: Doc = store.load();
        assert_eq!(loaded, Doc::default());
    }

    #[test]
    fn test_document_store_overwrite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DocumentStore::new(dir.path(), "cfg");

        store
            .save(&Doc {
                tier: "guardian".to_string(),
                threshold: 3,
            })
            .expect("save1");
        store
            .save(&Doc {
                tier: "alter_ego".to_string(),
                threshold: 5,
            })
            .expect("save2");

        let loaded: Doc = store.load();
        assert_eq!(loaded.tier, "alter_ego");
        assert_eq!(loaded.threshold, 5);
    }
}
