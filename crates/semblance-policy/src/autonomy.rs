//! Autonomy configuration: per-domain tiers, change listeners, and the
//! process-wide inheritance-mode guard.

use semblance_persist::DocumentStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

// ─── Domains & tiers ─────────────────────────────────────────────────────────

/// The fixed set of life domains a tier can be configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Email,
    Calendar,
    Finances,
    Health,
    Files,
    Services,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Calendar => "calendar",
            Self::Finances => "finances",
            Self::Health => "health",
            Self::Files => "files",
            Self::Services => "services",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How much latitude the assistant has in a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyTier {
    /// Everything requires approval.
    #[default]
    Guardian,
    /// Reads and drafts run free; anything leaving the machine asks first.
    Partner,
    /// Only `email.send` still asks.
    AlterEgo,
}

impl AutonomyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guardian => "guardian",
            Self::Partner => "partner",
            Self::AlterEgo => "alter_ego",
        }
    }
}

impl std::fmt::Display for AutonomyTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted tier configuration. Core-owned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutonomyConfig {
    pub default_tier: AutonomyTier,
    #[serde(default)]
    pub domain_overrides: HashMap<Domain, AutonomyTier>,
}

// ─── Inheritance guard ───────────────────────────────────────────────────────

/// Process-wide flag raised while any non-terminal activation exists.
///
/// While raised, every action not originating from the inheritance
/// executor is denied before the capability matrix is even consulted.
/// Cloning shares the flag.
#[derive(Clone, Default)]
pub struct InheritanceGuard {
    enabled: Arc<AtomicBool>,
}

impl InheritanceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self) {
        if !self.enabled.swap(true, Ordering::SeqCst) {
            warn!("inheritance mode guard enabled — non-inheritance actions are blocked");
        }
    }

    pub fn disable(&self) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            info!("inheritance mode guard disabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

// ─── Autonomy manager ────────────────────────────────────────────────────────

/// Synchronous callback invoked whenever a domain tier is mutated.
pub type TierListener = Box<dyn Fn(Domain, AutonomyTier) + Send + Sync>;

/// Owns the tier configuration and notifies listeners on change.
pub struct AutonomyManager {
    config: AutonomyConfig,
    store: DocumentStore,
    listeners: Vec<TierListener>,
}

impl AutonomyManager {
    pub fn new(root: &Path) -> Self {
        let store = DocumentStore::new(root, "autonomy");
        let config: AutonomyConfig = store.load();
        Self {
            config,
            store,
            listeners: Vec::new(),
        }
    }

    pub fn with_config(root: &Path, config: AutonomyConfig) -> Self {
        let store = DocumentStore::new(root, "autonomy");
        Self {
            config,
            store,
            listeners: Vec::new(),
        }
    }

    pub fn config(&self) -> &AutonomyConfig {
        &self.config
    }

    /// Effective tier for a domain: override, else default.
    pub fn tier_for(&self, domain: Domain) -> AutonomyTier {
        self.config
            .domain_overrides
            .get(&domain)
            .copied()
            .unwrap_or(self.config.default_tier)
    }

    /// Set a per-domain tier. Listeners fire synchronously, after the
    /// snapshot lands.
    pub fn set_tier(&mut self, domain: Domain, tier: AutonomyTier) {
        self.config.domain_overrides.insert(domain, tier);
        self.snapshot();
        info!(domain = %domain, tier = %tier, "domain tier changed");
        for listener in &self.listeners {
            listener(domain, tier);
        }
    }

    pub fn set_default_tier(&mut self, tier: AutonomyTier) {
        self.config.default_tier = tier;
        self.snapshot();
        info!(tier = %tier, "default tier changed");
    }

    pub fn register_listener(&mut self, listener: TierListener) {
        self.listeners.push(listener);
    }

    fn snapshot(&self) {
        if let Err(e) = self.store.save(&self.config) {
            warn!(error = %e, "failed to snapshot autonomy config");
        }
    }
}
