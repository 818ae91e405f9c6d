mod config;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use discovery::{AppRegistrationInfo, DiscoveryConfig, ProviderKind, Registrator, ServiceLocator};
use discovery_sdk::{EndpointType, Locator, LocatorFilter};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;

/// Registers an instance in the discovery store and queries it.
#[derive(Parser)]
#[command(name = "discovery-agent", version)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register the configured instance until a shutdown signal arrives
    #[command(alias = "register")]
    Run {
        /// Publish only admin and metrics data
        #[arg(long)]
        no_discovery: bool,
    },
    /// Print the current locations of a service as JSON
    Get(Query),
    /// Stream location changes of a service as JSON lines
    Watch(Query),
    /// Validate the configuration and print it
    Check,
}

#[derive(clap::Args)]
struct Query {
    /// Service to look up
    service: String,

    /// Endpoint to resolve (app-main, app-additional, system-main, ...)
    #[arg(long, default_value = "app-main")]
    endpoint_type: EndpointType,

    #[arg(long)]
    rollout_type: Option<String>,

    #[arg(long)]
    owner: Option<String>,

    #[arg(long)]
    cluster_type: Option<String>,
}

impl Query {
    fn filter(&self) -> LocatorFilter {
        LocatorFilter {
            rollout_type: self.rollout_type.clone(),
            owner: self.owner.clone(),
            cluster_type: self.cluster_type.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = AgentConfig::load(cli.config.as_deref())?;
    tracing::debug!(config = ?cli.config, "configuration loaded");

    match cli.command {
        Commands::Run { no_discovery } => run(config, !no_discovery).await,
        Commands::Get(query) => get(&config, &query).await,
        Commands::Watch(query) => watch(&config, &query).await,
        Commands::Check => check(&config),
    }
}

async fn run(config: AgentConfig, publish: bool) -> Result<()> {
    let info = AppRegistrationInfo::new(config.registration)
        .context("invalid registration parameters")?;
    let service = info.service().clone();
    let provider = discovery::provider::connect(&config.discovery)
        .await
        .context("failed to connect to the discovery store")?;

    let registrator = Registrator::new(provider, Arc::new(info));
    registrator.register()?;
    if publish {
        registrator.enable_discovery()?;
    }
    tracing::info!(
        service = %service.name,
        instance = %service.instance_name,
        publish,
        "instance registered"
    );

    let stopped = shutdown_signal().await;
    registrator.unregister().await;
    tracing::info!(service = %service.name, "instance unregistered");
    stopped
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::select! {
            res = signal::ctrl_c() => res.context("failed to listen for Ctrl+C")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    tracing::info!("shutdown signal received");
    Ok(())
}

/// Lookups only make sense against a store shared with other processes.
fn ensure_shared_store(config: &DiscoveryConfig) -> Result<()> {
    match config.provider {
        ProviderKind::Etcd => Ok(()),
        ProviderKind::None | ProviderKind::Memory => anyhow::bail!(
            "provider '{}' is local to this process and never holds other instances; \
             set discovery.provider to etcd",
            config.provider
        ),
    }
}

async fn locator(config: &AgentConfig) -> Result<ServiceLocator> {
    ensure_shared_store(&config.discovery)?;
    let provider = discovery::provider::connect(&config.discovery)
        .await
        .context("failed to connect to the discovery store")?;
    Ok(ServiceLocator::new(provider).with_watch_buffer(config.discovery.watch_buffer))
}

async fn get(config: &AgentConfig, query: &Query) -> Result<()> {
    let locations = locator(config)
        .await?
        .get(&query.service, query.endpoint_type, &query.filter())
        .await
        .with_context(|| format!("failed to locate {}", query.service))?;
    println!("{}", serde_json::to_string_pretty(&locations)?);
    Ok(())
}

async fn watch(config: &AgentConfig, query: &Query) -> Result<()> {
    let locator = locator(config).await?;
    let cancel = CancellationToken::new();
    let mut events = locator.watch(
        cancel.clone(),
        &query.service,
        query.endpoint_type,
        &query.filter(),
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            result = &mut shutdown => {
                cancel.cancel();
                return result;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::warn!(service = %query.service, "watch closed");
                    return Ok(());
                };
                let line = serde_json::json!({
                    "type": event.event_type.to_string(),
                    "locations": event.locations,
                });
                println!("{line}");
            }
        }
    }
}

fn check(config: &AgentConfig) -> Result<()> {
    AppRegistrationInfo::new(config.registration.clone())
        .context("invalid registration parameters")?;
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_queries() {
        let cli = Cli::try_parse_from([
            "discovery-agent",
            "-vv",
            "get",
            "bob_api",
            "--endpoint-type",
            "system-main",
            "--rollout-type",
            "stable",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Get(query) = cli.command else {
            panic!("expected get command");
        };
        assert_eq!(query.endpoint_type, EndpointType::SystemMain);
        assert_eq!(query.filter().rollout_type.as_deref(), Some("stable"));
        assert_eq!(query.filter().owner, None);
    }

    #[test]
    fn register_is_an_alias_of_run() {
        let cli = Cli::try_parse_from(["discovery-agent", "register", "--no-discovery"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { no_discovery: true }));
    }

    #[test]
    fn lookups_require_a_shared_store() {
        let mut config = DiscoveryConfig::default();
        let err = ensure_shared_store(&config).unwrap_err();
        assert!(err.to_string().contains("provider 'memory'"));

        config.provider = ProviderKind::None;
        assert!(ensure_shared_store(&config).is_err());

        config.provider = ProviderKind::Etcd;
        ensure_shared_store(&config).unwrap();
    }

    #[tokio::test]
    async fn get_refuses_local_store() {
        let query = Query {
            service: "bob_api".to_owned(),
            endpoint_type: EndpointType::AppMain,
            rollout_type: None,
            owner: None,
            cluster_type: None,
        };
        let err = get(&AgentConfig::default(), &query).await.unwrap_err();
        assert!(err.to_string().contains("set discovery.provider to etcd"));
    }

    #[test]
    fn unknown_endpoint_type_is_rejected() {
        assert!(
            Cli::try_parse_from(["discovery-agent", "get", "x", "--endpoint-type", "bogus"])
                .is_err()
        );
    }
}
