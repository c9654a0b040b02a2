//! semblance-core — the Semblance core process CLI.
//!
//! Dispatches signed actions through the gateway, manages autonomy
//! tiers, and operates the inheritance state machine.

use clap::{Parser, Subcommand};
use semblance_core::{
    ApprovalProvider, AutoApprove, CoreConfig, IntentOutcome, Orchestrator, OrchestratorOptions,
    RequestSigner,
};
use semblance_inherit::{
    ActionCategory, InheritanceAction, InheritanceConfig, InheritanceEngine, TrustedParty,
    PACKAGE_VERSION_V2,
};
use semblance_ipc::{ClientConfig, CoreClient};
use semblance_policy::{AutonomyTier, Domain, InheritanceGuard};
use semblance_proto::ActionType;
use serde_json::Value;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "semblance-core")]
#[command(about = "Semblance core orchestrator")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch one action through the gateway
    Send {
        /// Wire action name (e.g. email.send)
        action: String,

        /// JSON payload (default: {})
        #[arg(long, default_value = "{}")]
        payload: String,

        /// Approve any approval gate without prompting
        #[arg(long)]
        yes: bool,
    },

    /// Write a default config file
    InitConfig {
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Show or change autonomy tiers
    Tier {
        #[command(subcommand)]
        command: TierCommands,
    },

    /// Inheritance / living-will operations
    Inherit {
        #[command(subcommand)]
        command: InheritCommands,
    },
}

#[derive(Subcommand)]
enum TierCommands {
    /// Print the effective tier per domain
    Show,

    /// Set a domain's tier (guardian|partner|alter_ego)
    Set {
        domain: String,
        tier: String,
    },
}

#[derive(Subcommand)]
enum InheritCommands {
    /// Register a trusted party
    AddParty {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        relationship: String,
        #[arg(long)]
        passphrase: String,
    },

    /// Add a pre-authorized action for a party
    AddAction {
        #[arg(long)]
        party_id: String,
        #[arg(long)]
        category: String,
        #[arg(long)]
        order: u32,
        #[arg(long)]
        action: String,
        #[arg(long, default_value = "{}")]
        payload: String,
        #[arg(long)]
        label: String,
        #[arg(long)]
        deletion_consensus: bool,
    },

    /// Seal a party's action list into an activation package file
    BuildPackage {
        #[arg(long)]
        party_id: String,
        #[arg(long)]
        passphrase: String,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        step_confirmation: bool,
    },

    /// Activate a package (starts the time lock)
    Activate {
        #[arg(long)]
        package: PathBuf,
        #[arg(long)]
        passphrase: String,
    },

    /// Cancel a time-locked activation
    Cancel {
        activation_id: String,
    },

    /// Advance an activation past its expired time lock
    Advance {
        activation_id: String,
    },

    /// Execute an activation's remaining actions
    Run {
        activation_id: String,
    },

    /// Dry-run a party's sequence without executing
    TestRun {
        party_id: String,
    },
}

/// Prompts on stdin for each approval gate.
struct StdinApprove;

impl ApprovalProvider for StdinApprove {
    fn request_approval(&self, action: ActionType, sub_type: &str, _payload: &Value) -> bool {
        print!("approve {action} ({sub_type})? [y/N] ");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim(), "y" | "Y" | "yes")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("semblance_core=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => CoreConfig::load(path)?,
        None => CoreConfig::default(),
    };

    match cli.command {
        Commands::Send {
            action,
            payload,
            yes,
        } => send(config, &action, &payload, yes).await?,
        Commands::InitConfig { output } => {
            config.save(&output)?;
            println!("Config written to {}", output.display());
        }
        Commands::Tier { command } => tier_command(config, command).await?,
        Commands::Inherit { command } => inherit_command(config, command).await?,
    }

    Ok(())
}

async fn connect(config: &CoreConfig, approval: Arc<dyn ApprovalProvider>) -> anyhow::Result<Orchestrator> {
    let secret = config.load_secret()?;
    let client = CoreClient::connect_unix(
        &config.socket_path,
        ClientConfig {
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            ..Default::default()
        },
    )
    .await?;

    Ok(Orchestrator::new(
        &config.data_dir,
        client,
        RequestSigner::new(&secret),
        approval,
        OrchestratorOptions {
            premium: config.premium,
            time_lock_hours: config.time_lock_hours,
            require_all_parties_for_deletion: config.require_all_parties_for_deletion,
        },
    ))
}

// ─── Send ────────────────────────────────────────────────────────────────────

async fn send(config: CoreConfig, action: &str, payload_str: &str, yes: bool) -> anyhow::Result<()> {
    let action = ActionType::from_wire(action)
        .ok_or_else(|| anyhow::anyhow!("unknown action '{action}'"))?;
    let payload: Value = serde_json::from_str(payload_str)
        .map_err(|e| anyhow::anyhow!("invalid JSON payload: {e}"))?;

    let approval: Arc<dyn ApprovalProvider> = if yes {
        Arc::new(AutoApprove)
    } else {
        Arc::new(StdinApprove)
    };
    let mut orchestrator = connect(&config, approval).await?;

    match orchestrator.handle_intent(action, payload).await? {
        IntentOutcome::Executed(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        IntentOutcome::Denied { code } => {
            println!("denied: {code}");
            std::process::exit(1);
        }
        IntentOutcome::RejectedByUser => {
            println!("not approved");
            std::process::exit(1);
        }
    }
    Ok(())
}

// ─── Tier ────────────────────────────────────────────────────────────────────

fn parse_domain(s: &str) -> anyhow::Result<Domain> {
    Ok(match s {
        "email" => Domain::Email,
        "calendar" => Domain::Calendar,
        "finances" => Domain::Finances,
        "health" => Domain::Health,
        "files" => Domain::Files,
        "services" => Domain::Services,
        other => anyhow::bail!("unknown domain '{other}'"),
    })
}

fn parse_tier(s: &str) -> anyhow::Result<AutonomyTier> {
    Ok(match s {
        "guardian" => AutonomyTier::Guardian,
        "partner" => AutonomyTier::Partner,
        "alter_ego" => AutonomyTier::AlterEgo,
        other => anyhow::bail!("unknown tier '{other}'"),
    })
}

async fn tier_command(config: CoreConfig, command: TierCommands) -> anyhow::Result<()> {
    // Tier maintenance is local: no gateway connection required.
    use semblance_policy::AutonomyManager;
    let mut manager = AutonomyManager::new(&config.data_dir);

    match command {
        TierCommands::Show => {
            for domain in [
                Domain::Email,
                Domain::Calendar,
                Domain::Finances,
                Domain::Health,
                Domain::Files,
                Domain::Services,
            ] {
                println!("{:10} {}", domain.to_string(), manager.tier_for(domain));
            }
        }
        TierCommands::Set { domain, tier } => {
            let domain = parse_domain(&domain)?;
            let tier = parse_tier(&tier)?;
            manager.set_tier(domain, tier);
            println!("{domain} → {tier}");
        }
    }
    Ok(())
}

// ─── Inherit ─────────────────────────────────────────────────────────────────

fn parse_category(s: &str) -> anyhow::Result<ActionCategory> {
    Ok(match s {
        "notification" => ActionCategory::Notification,
        "account-action" => ActionCategory::AccountAction,
        "data-sharing" => ActionCategory::DataSharing,
        "preservation" => ActionCategory::Preservation,
        other => anyhow::bail!("unknown category '{other}'"),
    })
}

/// Maintenance commands operate on local core state; only `run` and
/// `test-run` talk to the gateway.
fn local_engine(config: &CoreConfig) -> InheritanceEngine {
    InheritanceEngine::new(
        &config.data_dir,
        InheritanceConfig {
            time_lock_hours: config.time_lock_hours,
            require_all_parties_for_deletion: config.require_all_parties_for_deletion,
        },
        InheritanceGuard::new(),
    )
}

async fn inherit_command(config: CoreConfig, command: InheritCommands) -> anyhow::Result<()> {
    match command {
        InheritCommands::AddParty {
            name,
            email,
            relationship,
            passphrase,
        } => {
            let id = local_engine(&config)
                .add_party(TrustedParty::new(&name, &email, &relationship, &passphrase));
            println!("party {id}");
        }

        InheritCommands::AddAction {
            party_id,
            category,
            order,
            action,
            payload,
            label,
            deletion_consensus,
        } => {
            let action = ActionType::from_wire(&action)
                .ok_or_else(|| anyhow::anyhow!("unknown action '{action}'"))?;
            let payload: Value = serde_json::from_str(&payload)?;
            let id = local_engine(&config).add_action(InheritanceAction::new(
                &party_id,
                parse_category(&category)?,
                order,
                action,
                payload,
                &label,
                deletion_consensus,
            ));
            println!("action {id}");
        }

        InheritCommands::BuildPackage {
            party_id,
            passphrase,
            output,
            step_confirmation,
        } => {
            let package = local_engine(&config).build_package(
                &party_id,
                &passphrase,
                step_confirmation,
                PACKAGE_VERSION_V2,
            )?;
            std::fs::write(&output, serde_json::to_string_pretty(&package)?)?;
            println!("package written to {}", output.display());
        }

        InheritCommands::Activate {
            package,
            passphrase,
        } => {
            let content = std::fs::read_to_string(&package)?;
            let package = serde_json::from_str(&content)?;
            let activation = local_engine(&config).activate(&package, &passphrase)?;
            info!(activation_id = %activation.id, "activation started");
            println!(
                "activation {} time-locked until {}",
                activation.id,
                activation.time_lock_expires_at.to_rfc3339()
            );
        }

        InheritCommands::Cancel { activation_id } => {
            let activation = local_engine(&config).cancel(&activation_id)?;
            println!("activation {} cancelled", activation.id);
        }

        InheritCommands::Advance { activation_id } => {
            let activation = local_engine(&config).advance(&activation_id)?;
            println!("activation {} → {}", activation.id, activation.state);
        }

        InheritCommands::Run { activation_id } => {
            let mut orchestrator = connect(&config, Arc::new(AutoApprove)).await?;
            let report = orchestrator.run_activation(&activation_id).await?;
            for label in &report.executed {
                println!("executed: {label}");
            }
            for (label, reason) in &report.skipped {
                println!("skipped:  {label} ({reason})");
            }
        }

        InheritCommands::TestRun { party_id } => {
            let mut orchestrator = connect(&config, Arc::new(AutoApprove)).await?;
            let steps = orchestrator.test_run(&party_id).await?;
            for step in steps {
                if step.would_execute {
                    println!("{:3}. {} — would execute", step.sequence_order, step.label);
                } else {
                    println!(
                        "{:3}. {} — skipped ({})",
                        step.sequence_order,
                        step.label,
                        step.reason.unwrap_or_default()
                    );
                }
            }
        }
    }
    Ok(())
}
