//! Integration harness for the Semblance action plane.
//!
//! Wires a real [`Gateway`] and a real [`Orchestrator`] over an
//! in-memory duplex stream, so end-to-end scenarios run the same code
//! paths as the two production processes.

#![forbid(unsafe_code)]

use semblance_audit::AuditTrail;
use semblance_core::{ApprovalProvider, Orchestrator, OrchestratorOptions, RequestSigner};
use semblance_crypto::MacSigner;
use semblance_gateway::{ActionValidator, AdapterRegistry, Gateway, LocalEchoAdapter};
use semblance_ipc::{run_connection, ClientConfig, CoreClient};
use semblance_netguard::{Allowlist, AnomalyConfig, RateLimitConfig};
use semblance_policy::AutonomyTier;
use semblance_proto::ActionType;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Install-time shared secret for the test stack.
pub const SECRET: &[u8] = b"integration-shared-secret";

pub struct StackOptions {
    pub default_tier: AutonomyTier,
    pub premium: bool,
    pub burst_threshold: u32,
    pub rate_limit_per_action: u32,
    pub adapters: Option<AdapterRegistry>,
}

impl Default for StackOptions {
    fn default() -> Self {
        Self {
            default_tier: AutonomyTier::Guardian,
            premium: false,
            burst_threshold: 5,
            rate_limit_per_action: 100,
            adapters: None,
        }
    }
}

/// One assembled core + gateway pair.
pub struct Stack {
    pub orchestrator: Orchestrator,
    pub gateway: Arc<Gateway>,
    _core_dir: TempDir,
    _gateway_dir: TempDir,
}

impl Stack {
    pub async fn start(approval: Arc<dyn ApprovalProvider>, options: StackOptions) -> Self {
        let core_dir = tempfile::tempdir().expect("core tempdir");
        let gateway_dir = tempfile::tempdir().expect("gateway tempdir");

        let adapters = options
            .adapters
            .unwrap_or_else(|| AdapterRegistry::new(Arc::new(LocalEchoAdapter)));
        let gateway = Arc::new(Gateway::new(
            ActionValidator::new(MacSigner::new(SECRET)),
            AuditTrail::open_in_memory().expect("audit"),
            Allowlist::new(gateway_dir.path()),
            RateLimitConfig {
                default_per_action: options.rate_limit_per_action,
                ..Default::default()
            },
            AnomalyConfig {
                burst_threshold: options.burst_threshold,
                ..Default::default()
            },
            adapters,
        ));

        let (client_stream, server_stream) = tokio::io::duplex(256 * 1024);
        tokio::spawn(run_connection(server_stream, gateway.clone()));

        let client = CoreClient::spawn(client_stream, ClientConfig::default());
        let mut orchestrator = Orchestrator::new(
            core_dir.path(),
            client,
            RequestSigner::new(SECRET),
            approval,
            OrchestratorOptions {
                premium: options.premium,
                ..Default::default()
            },
        );
        orchestrator
            .policy_mut()
            .autonomy_mut()
            .set_default_tier(options.default_tier);

        Self {
            orchestrator,
            gateway,
            _core_dir: core_dir,
            _gateway_dir: gateway_dir,
        }
    }
}

/// Approval provider answering from a scripted queue (empty → deny),
/// counting how often it was consulted.
pub struct QueueApprove {
    answers: Mutex<VecDeque<bool>>,
    calls: AtomicUsize,
}

impl QueueApprove {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into_iter().collect()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ApprovalProvider for QueueApprove {
    fn request_approval(&self, _: ActionType, _: &str, _: &Value) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answers
            .lock()
            .expect("answers lock")
            .pop_front()
            .unwrap_or(false)
    }
}
