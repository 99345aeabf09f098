//! apic - query an APIC controller from the command line.
//!
//! Settings come from `~/.config/apic/config.toml` (or `--config`), then from
//! the environment and flags. Query replies are printed to stdout as JSON;
//! logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser as ClapParser, Subcommand};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use apic_client::config::{default_config_path, ConfigError};
use apic_client::{
    ApicClient, ClientConfig, ClientError, EventStream, LookupRequest, QueryOptions,
    WebSocketStream,
};

/// apic - query an APIC controller
#[derive(ClapParser, Debug)]
#[command(name = "apic", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the TOML config file
    #[arg(long, env = "APIC_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Controller address (overrides config)
    #[arg(long, env = "APIC_HOST", global = true)]
    host: Option<String>,

    /// Login user (overrides config)
    #[arg(long, env = "APIC_USER", global = true)]
    user: Option<String>,

    /// Login password (overrides config)
    #[arg(long, env = "APIC_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long, global = true)]
    insecure: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Look up one managed object by distinguished name
    Mo {
        /// Distinguished name, e.g. uni/tn-common
        dn: String,

        /// Query filters as key=value; `_` in keys is sent as `-`
        #[arg(long = "filter", short = 'f')]
        filters: Vec<String>,

        /// Ask for a subscription and print its id
        #[arg(long)]
        subscribe: bool,
    },

    /// Look up every object of a class
    Class {
        /// Class name, e.g. fvTenant
        class: String,

        /// Query filters as key=value; `_` in keys is sent as `-`
        #[arg(long = "filter", short = 'f')]
        filters: Vec<String>,

        /// Ask for a subscription and print its id
        #[arg(long)]
        subscribe: bool,
    },

    /// POST a JSON body to /api/<name>.json
    Post {
        /// Endpoint name, e.g. mo/uni
        name: String,

        /// JSON request body
        #[arg(long)]
        body: String,
    },

    /// Subscribe to a class and print pushed events until Ctrl+C
    Watch {
        /// Class name, e.g. fvTenant
        class: String,

        /// Query filters as key=value; `_` in keys is sent as `-`
        #[arg(long = "filter", short = 'f')]
        filters: Vec<String>,
    },
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(e) = run(cli).await {
        eprintln!("apic: {e}");
        std::process::exit(1);
    }
}

/// Logs go to stderr so stdout stays clean JSON.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "apic_client=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(&cli)?;
    let client = ApicClient::new(&config)?;

    let result = execute(&client, cli.command).await;
    if let Err(e) = client.logout().await {
        tracing::debug!(error = %e, "logout failed");
    }
    result
}

async fn execute(client: &ApicClient, command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Mo { dn, filters, subscribe } => {
            let options = parse_filters(&filters)?.subscribe(subscribe);
            let request = LookupRequest::dn(dn).with_options(options);
            print_json(&client.lookup(&request).await?)
        }
        Commands::Class { class, filters, subscribe } => {
            let options = parse_filters(&filters)?.subscribe(subscribe);
            print_json(&client.lookup_by_class(&class, options).await?)
        }
        Commands::Post { name, body } => {
            let body: serde_json::Value = serde_json::from_str(&body)
                .map_err(|e| CliError::InvalidArgument(format!("--body is not JSON: {e}")))?;
            print_json(&client.command(&name, body).await?)
        }
        Commands::Watch { class, filters } => {
            run_watch(client, &class, parse_filters(&filters)?).await
        }
    }
}

/// File settings first, then environment and flags on top.
fn load_config(cli: &Cli) -> Result<ClientConfig, CliError> {
    let path = cli.config.clone().or_else(default_config_path);
    let mut config = match &path {
        Some(path) => ClientConfig::load(path)?.unwrap_or_default(),
        None => ClientConfig::default(),
    };
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(user) = &cli.user {
        config.username = user.clone();
    }
    if let Some(password) = &cli.password {
        config.password = password.clone();
    }
    if cli.insecure {
        config.verify_tls = false;
    }
    config.validate()?;
    tracing::debug!(?config, "configuration loaded");
    Ok(config)
}

fn parse_filters(raw: &[String]) -> Result<QueryOptions, CliError> {
    raw.iter().try_fold(QueryOptions::new(), |options, pair| {
        match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok(options.filter(key, value)),
            _ => Err(CliError::InvalidArgument(format!(
                "filter must be key=value, got {pair:?}"
            ))),
        }
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_watch(client: &ApicClient, class: &str, options: QueryOptions) -> Result<(), CliError> {
    let mut events = None;
    client
        .setup_stream(|ctx| {
            let (stream, rx) = WebSocketStream::new(ctx, 256);
            events = Some(rx);
            stream as Arc<dyn EventStream>
        })
        .await?;
    let Some(mut events) = events else {
        return Ok(());
    };

    let initial = client
        .lookup_by_class(class, options.subscribe(true))
        .await?;
    print_json(&initial)?;
    tracing::info!(class, subscription = ?initial.subscription_id, "watching for events");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received Ctrl+C");
                break;
            }
            event = events.recv() => match event {
                Some(event) => print_json(&event)?,
                None => {
                    tracing::warn!("event stream ended");
                    break;
                }
            }
        }
    }
    client.stop_stream();
    Ok(())
}
