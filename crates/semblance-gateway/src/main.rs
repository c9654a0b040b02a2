//! semblance-gateway — the Semblance network gateway daemon.
//!
//! Listens on the per-user IPC socket, runs every core request through
//! validation, rate limiting, allowlist, and anomaly checks, executes
//! via service adapters, and appends everything to the hash-chained
//! audit trail.

use clap::{Parser, Subcommand};
use semblance_audit::{AuditQuery, AuditTrail};
use semblance_crypto::MacSigner;
use semblance_gateway::{
    ActionValidator, AdapterRegistry, Gateway, GatewayConfig, HttpApiAdapter, LocalEchoAdapter,
};
use semblance_netguard::{Allowlist, AnomalyConfig, RateLimitConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "semblance-gateway")]
#[command(about = "Semblance network gateway")]
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
    /// Run the gateway (listen on the IPC socket and serve the core)
    Serve,

    /// Write a default config file
    InitConfig {
        /// Path to write config
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Audit trail queries
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },

    /// Allowlist maintenance
    Allowlist {
        #[command(subcommand)]
        command: AllowlistCommands,
    },
}

#[derive(Subcommand)]
enum AuditCommands {
    /// Recompute the hash chain and report the earliest break
    Verify,

    /// Query entries
    Query {
        /// Filter by action (wire name, e.g. email.send)
        #[arg(long)]
        action: Option<String>,

        /// Filter by status (success|error|rejected|pending)
        #[arg(long)]
        status: Option<String>,

        /// Max rows
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Aggregate counts and time saved
    Summary,
}

#[derive(Subcommand)]
enum AllowlistCommands {
    /// List entries, active and inactive
    List,

    /// Add an entry (explicit user action)
    Add {
        #[arg(long)]
        service: String,
        #[arg(long)]
        domain: String,
        #[arg(long, default_value = "https")]
        protocol: String,
    },

    /// Soft-deactivate an entry
    Deactivate {
        #[arg(long)]
        domain: String,
        #[arg(long, default_value = "https")]
        protocol: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("semblance_gateway=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::default(),
    };

    match cli.command {
        Commands::Serve => serve(config).await?,
        Commands::InitConfig { output } => {
            config.save(&output)?;
            println!("Config written to {}", output.display());
        }
        Commands::Audit { command } => audit_command(&config, command)?,
        Commands::Allowlist { command } => allowlist_command(&config, command)?,
    }

    Ok(())
}

// ─── Serve ───────────────────────────────────────────────────────────────────

async fn serve(config: GatewayConfig) -> anyhow::Result<()> {
    info!(data_dir = %config.data_dir.display(), "starting semblance gateway");

    let secret = config.load_or_create_secret()?;
    let audit = AuditTrail::open(&config.data_dir.join("audit.db"))?;
    let allowlist = Allowlist::new(&config.data_dir);

    let mut adapters = AdapterRegistry::new(Arc::new(LocalEchoAdapter));
    adapters.register("service", Arc::new(HttpApiAdapter::new()));
    adapters.register("web", Arc::new(HttpApiAdapter::new()));

    let gateway = Gateway::new(
        ActionValidator::new(MacSigner::new(&secret)),
        audit,
        allowlist,
        RateLimitConfig {
            window_ms: config.rate_window_ms,
            per_action: Default::default(),
            default_per_action: config.rate_default_limit,
            global_limit: config.rate_global_limit,
        },
        AnomalyConfig {
            burst_threshold: config.burst_threshold,
            burst_window_ms: config.burst_window_ms,
            max_payload_bytes: config.max_payload_bytes,
        },
        adapters,
    );

    semblance_ipc::serve_unix(&config.socket_path, Arc::new(gateway)).await?;
    Ok(())
}

// ─── Audit ───────────────────────────────────────────────────────────────────

fn audit_command(config: &GatewayConfig, command: AuditCommands) -> anyhow::Result<()> {
    let audit = AuditTrail::open(&config.data_dir.join("audit.db"))?;

    match command {
        AuditCommands::Verify => {
            let report = audit.verify_chain()?;
            match report.first_broken_index {
                None => println!(
                    "chain intact ({} entries verified)",
                    report.entries_checked
                ),
                Some(index) => {
                    println!(
                        "CHAIN BROKEN at entry {index} ({} entries checked)",
                        report.entries_checked
                    );
                    std::process::exit(1);
                }
            }
        }
        AuditCommands::Query {
            action,
            status,
            limit,
        } => {
            let status = match status.as_deref() {
                Some("success") => Some(semblance_proto::ResponseStatus::Success),
                Some("error") => Some(semblance_proto::ResponseStatus::Error),
                Some("rejected") => Some(semblance_proto::ResponseStatus::Rejected),
                Some("pending") => Some(semblance_proto::ResponseStatus::Pending),
                Some(other) => anyhow::bail!("unknown status '{other}'"),
                None => None,
            };
            let entries = audit.query(&AuditQuery {
                action,
                status,
                limit: Some(limit),
                ..Default::default()
            })?;
            for entry in entries {
                println!(
                    "{} {} {} {} {} {}",
                    entry.timestamp.to_rfc3339(),
                    entry.direction,
                    entry.status,
                    entry.action,
                    entry.request_id,
                    entry.metadata
                );
            }
        }
        AuditCommands::Summary => {
            let by_status = audit.counts_by_status()?;
            let by_service = audit.counts_by_service()?;
            let saved = audit.total_time_saved_seconds()?;

            println!("Entries by status:");
            for (status, count) in &by_status {
                println!("  {status:10} {count}");
            }
            println!();
            println!("Entries by service:");
            for (service, count) in &by_service {
                println!("  {service:10} {count}");
            }
            println!();
            println!("Estimated time saved: {saved} s");
        }
    }
    Ok(())
}

// ─── Allowlist ───────────────────────────────────────────────────────────────

fn allowlist_command(config: &GatewayConfig, command: AllowlistCommands) -> anyhow::Result<()> {
    let mut allowlist = Allowlist::new(&config.data_dir);

    match command {
        AllowlistCommands::List => {
            for entry in allowlist.entries() {
                println!(
                    "{} {} ({}) added_by={} active={}",
                    entry.domain, entry.protocol, entry.service_name, entry.added_by, entry.is_active
                );
            }
        }
        AllowlistCommands::Add {
            service,
            domain,
            protocol,
        } => {
            allowlist.add_user(&service, &domain, &protocol);
            println!("added {domain} ({protocol})");
        }
        AllowlistCommands::Deactivate { domain, protocol } => {
            allowlist
                .deactivate(&domain, &protocol)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("deactivated {domain} ({protocol})");
        }
    }
    Ok(())
}
