//! Keyrelay CLI - session-scoped credential resolver
//!
//! Run `keyrelay --help` for usage information.

use clap::{Parser, Subcommand};
use keyrelay::config::{Config, LogFormat, LoggingConfig, DEFAULT_CONFIG_TOML};
use keyrelay::server::KeyrelayServer;
use keyrelay::{HttpAuthority, KeyrelayError, Secret};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "keyrelay",
    about = "Session-scoped credential resolver and cache for multi-tenant service proxies",
    version
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Keyrelay server
    Serve {
        /// Address to bind to (overrides the configuration)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Exchange an authority key once and show what it resolves to
    Lookup {
        /// Tenant authority key (e.g. genius_...)
        authority_key: String,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Write a default configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    if let Commands::Init { force } = cli.command {
        return Ok(init_config(&config_path, force).await?);
    }

    // Load configuration
    let config = if cli.config.is_some() || config_path.exists() {
        Config::load(&config_path).await?
    } else {
        Config::default()
    };
    let config = config.with_env_overrides();

    init_logging(&config.logging, cli.verbose);

    match cli.command {
        Commands::Serve { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            KeyrelayServer::new(config)?.run().await?;
        }
        Commands::Lookup {
            authority_key,
            format,
        } => {
            lookup(&config, &authority_key, &format).await?;
        }
        Commands::Init { .. } => {}
    }

    Ok(())
}

fn init_logging(logging: &LoggingConfig, verbose: u8) {
    let log_level = match verbose {
        0 => logging.level,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(log_level.into());
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

async fn init_config(path: &Path, force: bool) -> Result<(), KeyrelayError> {
    if path.exists() && !force {
        eprintln!(
            "Configuration already exists at {} (use --force to overwrite)",
            path.display()
        );
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, DEFAULT_CONFIG_TOML).await?;

    println!("Wrote configuration to {}", path.display());
    Ok(())
}

async fn lookup(
    config: &Config,
    authority_key: &str,
    format: &str,
) -> Result<(), KeyrelayError> {
    let authority = HttpAuthority::new(&config.authority)?;
    info!(url = %authority.lookup_url(), "Looking up credential");

    let credential = match authority.try_fetch(&Secret::new(authority_key)).await {
        Ok(credential) => credential,
        Err(e) => {
            warn!(error = %e, "Lookup failed");
            return Err(e.into());
        }
    };

    let scheme = credential.scheme();
    let expires_at = credential.expires_at();

    match format {
        "json" => {
            let output = serde_json::json!({
                "scheme": scheme,
                "expires_at": expires_at,
                "expired": credential.is_expired(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => {
            println!("Scheme:     {}", scheme);
            match expires_at {
                Some(at) => {
                    let state = if credential.is_expired() { " (expired)" } else { "" };
                    println!("Expires at: {}{}", at.to_rfc3339(), state);
                }
                None => println!("Expires at: never"),
            }
        }
    }

    Ok(())
}
