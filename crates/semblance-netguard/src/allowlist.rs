//! User-approved outbound domain allowlist.
//!
//! Entries are policy, mutated only through explicit user action.
//! Deactivation is soft so history survives. The gateway checks
//! `(domain, protocol)` against active entries before any adapter runs.

use chrono::{DateTime, Utc};
use semblance_persist::StateStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::NetguardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddedBy {
    Onboarding,
    User,
    Import,
}

impl std::fmt::Display for AddedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Onboarding => "onboarding",
            Self::User => "user",
            Self::Import => "import",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub service_name: String,
    pub domain: String,
    pub protocol: String,
    pub added_by: AddedBy,
    pub added_at: DateTime<Utc>,
    pub is_active: bool,
}

fn key_of(domain: &str, protocol: &str) -> String {
    format!("{}|{}", domain.to_ascii_lowercase(), protocol.to_ascii_lowercase())
}

/// Gateway-owned allowlist backed by a JSON snapshot.
pub struct Allowlist {
    entries: HashMap<String, AllowlistEntry>,
    store: StateStore,
}

impl Allowlist {
    pub fn new(root: &Path) -> Self {
        let store = StateStore::new(root, "allowlist");
        let entries = store.load();
        debug!(count = entries.len(), "loaded allowlist");
        Self { entries, store }
    }

    /// Onboarding entries are only added with explicit user consent.
    pub fn add_onboarding(
        &mut self,
        service_name: &str,
        domain: &str,
        protocol: &str,
        user_consented: bool,
    ) -> Result<(), NetguardError> {
        if !user_consented {
            return Err(NetguardError::ConsentRequired);
        }
        self.insert(service_name, domain, protocol, AddedBy::Onboarding);
        Ok(())
    }

    /// A direct user addition carries its own consent.
    pub fn add_user(&mut self, service_name: &str, domain: &str, protocol: &str) {
        self.insert(service_name, domain, protocol, AddedBy::User);
    }

    /// Imports cannot add entries without per-entry confirmation.
    pub fn add_import(
        &mut self,
        service_name: &str,
        domain: &str,
        protocol: &str,
        confirmed: bool,
    ) -> Result<(), NetguardError> {
        if !confirmed {
            return Err(NetguardError::ConfirmationRequired);
        }
        self.insert(service_name, domain, protocol, AddedBy::Import);
        Ok(())
    }

    fn insert(&mut self, service_name: &str, domain: &str, protocol: &str, added_by: AddedBy) {
        let entry = AllowlistEntry {
            service_name: service_name.to_string(),
            domain: domain.to_ascii_lowercase(),
            protocol: protocol.to_ascii_lowercase(),
            added_by,
            added_at: Utc::now(),
            is_active: true,
        };
        info!(domain = %entry.domain, protocol = %entry.protocol, added_by = %added_by, "allowlist entry added");
        self.entries.insert(key_of(domain, protocol), entry);
        self.snapshot();
    }

    /// Soft-deactivate: the entry stays for history, stops matching.
    pub fn deactivate(&mut self, domain: &str, protocol: &str) -> Result<(), NetguardError> {
        let entry = self.entries.get_mut(&key_of(domain, protocol)).ok_or_else(|| {
            NetguardError::EntryNotFound {
                domain: domain.to_string(),
                protocol: protocol.to_string(),
            }
        })?;
        entry.is_active = false;
        info!(domain, protocol, "allowlist entry deactivated");
        self.snapshot();
        Ok(())
    }

    pub fn reactivate(&mut self, domain: &str, protocol: &str) -> Result<(), NetguardError> {
        let entry = self.entries.get_mut(&key_of(domain, protocol)).ok_or_else(|| {
            NetguardError::EntryNotFound {
                domain: domain.to_string(),
                protocol: protocol.to_string(),
            }
        })?;
        entry.is_active = true;
        self.snapshot();
        Ok(())
    }

    /// Whether outbound contact to `(domain, protocol)` is permitted.
    pub fn contains(&self, domain: &str, protocol: &str) -> bool {
        self.entries
            .get(&key_of(domain, protocol))
            .is_some_and(|e| e.is_active)
    }

    pub fn entries(&self) -> Vec<&AllowlistEntry> {
        let mut all: Vec<&AllowlistEntry> = self.entries.values().collect();
        all.sort_by(|a, b| a.domain.cmp(&b.domain));
        all
    }

    fn snapshot(&self) {
        if let Err(e) = self.store.save(&self.entries) {
            warn!(error = %e, "failed to snapshot allowlist");
        }
    }
}
