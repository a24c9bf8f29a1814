//! cassandra-autorepair - run `nodetool repair -pr` in every annotated
//! Cassandra pod of a namespace.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cassandra_autorepair::config::{DEFAULT_ANNOTATION, DEFAULT_OUTPUT_BUFFER};
use cassandra_autorepair::{cluster, resolve_namespace, KubeCluster, Orchestrator, RepairConfig};

/// Run nodetool repair inside annotated Cassandra pods.
#[derive(Parser)]
#[command(name = "cassandra-autorepair")]
#[command(about = "Run nodetool repair inside annotated Cassandra pods")]
#[command(version)]
struct Cli {
    /// Namespace to repair (defaults to the pod's own namespace).
    #[arg(long, env = "POD_NAMESPACE")]
    namespace: Option<String>,

    /// Annotation that marks pods for repair; its value names the container.
    #[arg(long, env = "AUTOREPAIR_ANNOTATION", default_value = DEFAULT_ANNOTATION)]
    annotation: String,

    /// Path to a kubeconfig file. Without it the in-cluster configuration or
    /// ~/.kube/config is used.
    #[arg(long, env = "AUTOREPAIR_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Output lines buffered between the exec stream and the logger.
    #[arg(long, default_value_t = DEFAULT_OUTPUT_BUFFER)]
    output_buffer: usize,

    /// Log format.
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Enable debug logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

fn init_tracing(cli: &Cli) {
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    match cli.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            warn!("Received Ctrl+C, cancelling repair run");
        },
        () = terminate => {
            warn!("Received SIGTERM, cancelling repair run");
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    info!("Starting cassandra-autorepair v{}", env!("CARGO_PKG_VERSION"));

    let namespace = resolve_namespace(cli.namespace.as_deref())?;

    let client = cluster::connect(cli.kubeconfig.as_deref())
        .await
        .context("Unable to create Kubernetes API client")?;
    let cluster = KubeCluster::new(client);

    let config = RepairConfig::default()
        .with_annotation_key(cli.annotation.clone())
        .with_output_buffer(cli.output_buffer);
    let orchestrator = Orchestrator::new(cluster.clone(), cluster, config);

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            token.cancel();
        });
    }

    let report = orchestrator
        .run(&namespace, &token)
        .await
        .with_context(|| format!("Repair run in namespace {namespace} failed"))?;

    for attempt in report.attempts.iter().filter(|a| !a.is_completed()) {
        if let Some(e) = attempt.error() {
            warn!(
                namespace = %attempt.namespace,
                pod = %attempt.pod,
                error = %e,
                "Pod was not repaired"
            );
        }
    }

    info!(
        namespace = %namespace,
        eligible = report.eligible,
        completed = report.completed(),
        failed = report.failed(),
        "Done"
    );

    Ok(())
}
