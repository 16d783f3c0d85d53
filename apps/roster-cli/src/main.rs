mod config;
mod echo;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use humantime_serde::re::humantime::format_duration;
use roster::{Client, DiscoveryApi, RosterConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::CliOverrides;

/// Roster - TTL-based service registration and discovery
#[derive(Parser)]
#[command(name = "roster")]
#[command(about = "Register and discover services through a shared registry")]
#[command(version)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Registry table name (overrides config)
    #[arg(long, global = true)]
    registry: Option<String>,

    /// Store location, `memory` or `sqlite:<path>` (overrides config)
    #[arg(long, global = true)]
    store: Option<String>,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print the effective configuration, defaults filled in, and exit
    #[arg(long)]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an endpoint and keep it alive until Ctrl-C
    Register {
        name: String,
        endpoint: String,
        /// Record TTL, e.g. `30s` (defaults to the configured TTL)
        #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
        ttl: Option<Duration>,
    },
    /// Resolve a service name to a live endpoint
    Discover {
        name: String,
        /// List every live endpoint instead of picking one
        #[arg(long)]
        all: bool,
    },
    /// Manage the registry table
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },
    /// Print the first non-loopback IPv4 address of this host
    LocalIp,
    /// Run a TCP line-echo server advertised in the registry
    EchoServer {
        #[arg(long, default_value = echo::DEFAULT_NAME)]
        name: String,
        #[arg(long, default_value_t = echo::DEFAULT_PORT)]
        port: u16,
    },
    /// Discover the echo server, send one line and print the reply
    EchoClient {
        #[arg(long, default_value = echo::DEFAULT_NAME)]
        name: String,
        #[arg(long, default_value = "hello")]
        message: String,
    },
}

#[derive(Subcommand, Clone, Copy)]
enum RegistryAction {
    /// Show whether the registry exists and is active
    Status,
    /// Create the registry and wait until it is active
    Create,
    /// Delete the registry and every record in it
    Delete,
}

fn init_logging(verbose: u8, json: bool) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt.json()).init();
    } else {
        registry.with(fmt).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let overrides = CliOverrides {
        registry_name: cli.registry.clone(),
        store_location: cli.store.clone(),
    };
    let config = config::load(cli.config.as_deref(), &overrides)?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config.resolve()?)?);
        return Ok(());
    }

    let Some(command) = cli.command else {
        anyhow::bail!("no command given, see `roster --help`");
    };

    match command {
        Commands::LocalIp => {
            println!("{}", roster::local_ip()?);
            Ok(())
        }
        Commands::Register {
            name,
            endpoint,
            ttl,
        } => register(&connect(&config).await?, &name, &endpoint, ttl).await,
        Commands::Discover { name, all } => discover(&connect(&config).await?, &name, all).await,
        Commands::Registry { action } => registry(&connect(&config).await?, action).await,
        Commands::EchoServer { name, port } => {
            let client = connect(&config).await?;
            echo::run_server(&client, &name, port, shutdown_on_ctrl_c()).await
        }
        Commands::EchoClient { name, message } => {
            let client = connect(&config).await?;
            println!("{}", echo::run_client(&client, &name, &message).await?);
            Ok(())
        }
    }
}

async fn connect(config: &RosterConfig) -> Result<Client> {
    let client = Client::connect(config).await?;
    tracing::debug!(config = ?client.config(), "configuration resolved");
    Ok(client)
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
        }
        trigger.cancel();
    });
    cancel
}

async fn register(
    client: &Client,
    name: &str,
    endpoint: &str,
    ttl: Option<Duration>,
) -> Result<()> {
    let handle = client.register(name, endpoint, ttl).await?;
    println!(
        "registered {name} at {endpoint} (ttl {}), press Ctrl-C to unregister",
        format_duration(handle.ttl())
    );

    shutdown_on_ctrl_c().cancelled().await;

    let stats = handle.stats();
    tracing::info!(
        successes = stats.total_successes,
        failures = stats.total_failures,
        "heartbeat summary"
    );
    handle.unregister().await;
    println!("unregistered {name}");
    Ok(())
}

async fn discover(client: &Client, name: &str, all: bool) -> Result<()> {
    if all {
        let records = client.discover_all(name).await?;
        if records.is_empty() {
            println!("no live instance of {name}");
        }
        for record in records {
            println!("{}\t{}", record.endpoint, record.expiry);
        }
    } else {
        println!("{}", client.discover(name).await?.endpoint);
    }
    Ok(())
}

async fn registry(client: &Client, action: RegistryAction) -> Result<()> {
    let registry = client.registry();
    match action {
        RegistryAction::Status => match registry.status().await? {
            Some(status) => println!("{}: {status}", registry.name()),
            None => println!("{}: absent", registry.name()),
        },
        RegistryAction::Create => {
            registry.create().await?;
            println!("{}: ACTIVE", registry.name());
        }
        RegistryAction::Delete => {
            registry.delete().await?;
            println!("{}: deleted", registry.name());
        }
    }
    Ok(())
}
