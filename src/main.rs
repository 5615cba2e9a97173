//! Bootstrapper - creates the bundled resource sets in a control plane and exits

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use bootstrapper::orchestrator::{
    default_stages, FailurePolicy, Orchestrator, Stage, DEFAULT_WORKLOAD_SCOPE,
};
use bootstrapper::resources::BundledSets;
use bootstrapper::scope::{ConnectionDescriptor, KubeScopeRouter, LogicalScope, Timeouts};
use bootstrapper_common::retry::RetryConfig;
use bootstrapper_common::telemetry::{init_tracing, LogFormat};

/// Exit code reported when the run was cancelled by a signal or deadline
const EXIT_CANCELLED: u8 = 130;

/// Bootstrapper - create the bundled resources, retrying until the API server is ready
#[derive(Parser, Debug)]
#[command(name = "bootstrapper", version, about, long_about = None)]
struct Cli {
    /// Path to the kubeconfig file (defaults to KUBECONFIG or ~/.kube/config)
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to connect with
    #[arg(long, env = "BOOTSTRAP_CONTEXT", default_value = "base")]
    context: String,

    /// Logical scope that hosts the workload resources
    #[arg(long, env = "BOOTSTRAP_WORKLOAD_SCOPE", default_value = DEFAULT_WORKLOAD_SCOPE)]
    workload_scope: LogicalScope,

    /// What to do when a stage fails
    #[arg(
        long,
        value_enum,
        env = "BOOTSTRAP_FAILURE_POLICY",
        default_value_t = FailurePolicy::Abort
    )]
    failure_policy: FailurePolicy,

    /// Initial delay between attempts, in milliseconds
    #[arg(long, default_value = "500")]
    retry_initial_ms: u64,

    /// Maximum delay between attempts, in milliseconds
    #[arg(long, default_value = "10000")]
    retry_max_ms: u64,

    /// Connect timeout for each API call, in seconds
    #[arg(long, default_value = "5")]
    connect_timeout_secs: u64,

    /// Read timeout for each API call, in seconds
    #[arg(long, default_value = "30")]
    read_timeout_secs: u64,

    /// Give up after this many seconds (default: retry until interrupted)
    #[arg(long, env = "BOOTSTRAP_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Log output format (text or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Print the stage plan and exit without contacting the API server
    #[arg(long)]
    plan: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Install crypto provider before any client is built
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    // Malformed bundles are a build defect; fail before touching the network
    let sets = BundledSets::load()?;
    let stages = default_stages(&sets, &cli.workload_scope);

    if cli.plan {
        print_plan(&stages);
        return Ok(ExitCode::SUCCESS);
    }

    let timeouts = Timeouts {
        connect: Duration::from_secs(cli.connect_timeout_secs),
        read: Duration::from_secs(cli.read_timeout_secs),
    };
    let descriptor =
        ConnectionDescriptor::from_profile(cli.kubeconfig.as_deref(), &cli.context, timeouts)
            .await?;
    info!(
        profile = %descriptor.profile(),
        server = %descriptor.config().cluster_url,
        "Loaded connection profile"
    );

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());
    if let Some(secs) = cli.timeout_secs {
        spawn_deadline(cancel.clone(), Duration::from_secs(secs));
    }

    let retry = RetryConfig::with_delays(
        Duration::from_millis(cli.retry_initial_ms),
        Duration::from_millis(cli.retry_max_ms),
    );
    let orchestrator = Orchestrator::new(KubeScopeRouter::new(descriptor), stages)
        .with_retry(retry)
        .with_policy(cli.failure_policy);

    match orchestrator.run(&cancel).await {
        Ok(report) => {
            info!(
                stages = report.completed.len(),
                created = report.created(),
                "Bootstrap complete"
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_cancelled() => {
            warn!(stage = e.stage().unwrap_or("none"), error = %e, "Bootstrap cancelled");
            Ok(ExitCode::from(EXIT_CANCELLED))
        }
        Err(e) => {
            error!(stage = e.stage().unwrap_or("none"), error = %e, "Bootstrap failed");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_plan(stages: &[Stage]) {
    println!("=== Bootstrap plan ===");
    for (index, stage) in stages.iter().enumerate() {
        println!(
            "{}. {} -> {} (as {})",
            index + 1,
            stage.name,
            stage.scope,
            stage.caller_tag
        );
        for document in stage.resources.documents() {
            println!("     {} {}", document.api_version(), document.id());
        }
    }
}

/// Cancel the run on SIGINT or SIGTERM
fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown requested, cancelling bootstrap");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler, listening for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Cancel the run once `timeout` elapses
fn spawn_deadline(cancel: CancellationToken, timeout: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                warn!(timeout_secs = timeout.as_secs(), "Bootstrap deadline reached, cancelling");
                cancel.cancel();
            }
        }
    });
}
