use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use collector_discovery::config::Config;
use collector_discovery::discovery::DiscoveryClient;
use collector_discovery::metrics;
use collector_discovery::server::{AppState, DiscoveryServer, MembershipView, ServerSettings};

#[derive(Parser)]
#[command(
    name = "collector-discovery",
    version,
    about = "Watch telemetry collector replicas and report membership changes",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file (environment variables are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the namespace to watch
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Override the collector label selector (`k=v,k2=v2`)
    #[arg(short, long, global = true)]
    selector: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch collectors and log every membership change
    Watch,

    /// Watch collectors and serve health, membership and metrics over HTTP
    Serve {
        /// Override the bind address
        #[arg(short, long)]
        bind: Option<std::net::SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let log_format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(log_format, &config.logging.level, cli.verbose)?;

    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    tracing::info!(
        namespace = %config.cluster.namespace,
        selector = %config.discovery.label_selector,
        "collector-discovery starting"
    );

    let ctx = CancellationToken::new();
    spawn_signal_handler(ctx.clone());

    match cli.command {
        Commands::Watch => watch(config, ctx).await?,
        Commands::Serve { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            serve(config, ctx).await?;
        }
    }

    tracing::info!("collector-discovery stopped");
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    if let Some(namespace) = &cli.namespace {
        config.cluster.namespace = namespace.clone();
    }
    if let Some(selector) = &cli.selector {
        config.discovery.label_selector = selector.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("collector_discovery=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("collector_discovery={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

/// Cancel `ctx` on Ctrl-C
fn spawn_signal_handler(ctx: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received shutdown signal"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
        ctx.cancel();
    });
}

async fn watch(config: Config, ctx: CancellationToken) -> Result<()> {
    let selector = config.label_selector()?;
    let client = DiscoveryClient::from_config(&config)?;

    client
        .watch(ctx, &selector, |collectors| {
            tracing::info!(
                count = collectors.len(),
                collectors = ?collectors.names(),
                "Collector membership changed"
            );
            Ok(())
        })
        .await?;

    client.close();
    Ok(())
}

async fn serve(config: Config, ctx: CancellationToken) -> Result<()> {
    let selector = config.label_selector()?;
    let client = DiscoveryClient::from_config(&config)?;

    let membership = MembershipView::new();
    let state = AppState::new(
        membership.clone(),
        client.health(),
        ServerSettings::from(&config),
    );
    let server = DiscoveryServer::new(state);

    let server_ctx = ctx.clone();
    let server_task = tokio::spawn(async move {
        server
            .start_with_shutdown(async move { server_ctx.cancelled().await })
            .await
    });

    let result = client
        .watch(ctx.clone(), &selector, move |collectors| {
            tracing::info!(count = collectors.len(), "Collector membership changed");
            membership.update(collectors);
            Ok(())
        })
        .await;

    // The HTTP server stops with discovery, whichever way discovery ended.
    ctx.cancel();
    client.close();

    server_task
        .await
        .context("Discovery server task failed")?
        .context("Discovery server error")?;

    result?;
    Ok(())
}
