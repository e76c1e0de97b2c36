//! # Tradewire Server
//!
//! Entry point of the trading platform's WebSocket gateway.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! tradewire-server
//!
//! # Run with custom configuration file
//! tradewire-server --config /path/to/config.yaml
//!
//! # Run with environment variable overrides
//! TRADEWIRE_PORT=9090 JWT_SECRET=change-me tradewire-server
//!
//! # Print a signed development token for subject 42
//! tradewire-server --issue-token 42
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use tradewire_gateway::{JwtManager, SubjectId};
use tradewire_server::{GatewayServer, ServerConfig, ServerError, init_logging};

/// Tradewire WebSocket gateway
#[derive(Parser, Debug)]
#[command(name = "tradewire-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override server host
    #[arg(long)]
    host: Option<String>,

    /// Override server port
    #[arg(long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Print a signed token for SUBJECT and exit
    #[arg(long, value_name = "SUBJECT")]
    issue_token: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if args.validate {
        println!("Configuration is valid");
        return;
    }

    if let Some(subject) = &args.issue_token {
        let jwt = JwtManager::new(&config.gateway.jwt);
        match jwt.generate_token(&SubjectId::new(subject.as_str()), None) {
            Ok(token) => println!("{token}"),
            Err(e) => {
                eprintln!("Failed to issue token: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    match run_server(config).await {
        Ok(()) => {
            info!("Tradewire server stopped");
        }
        Err(e) => {
            error!(error = %e, "Server error");
            eprintln!("Server error: {e}");
            std::process::exit(1);
        }
    }
}

/// Loads configuration from file and applies overrides.
fn load_config(args: &Args) -> Result<ServerConfig, ServerError> {
    let mut config = if args.config.exists() {
        GatewayServer::load_config(&args.config)?
    } else {
        eprintln!(
            "Configuration file not found: {}, using defaults",
            args.config.display()
        );
        let mut config = ServerConfig::default();
        config.apply_env_overrides();
        config
    };

    if let Some(host) = &args.host {
        config.server.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.debug {
        config.logging.level = "debug".to_string();
    }

    config
        .validate()
        .map_err(|e| ServerError::ConfigError(e.to_string()))?;

    Ok(config)
}

/// Creates and runs the server.
async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let _log_guards = init_logging(&config.logging)
        .map_err(|e| ServerError::InitializationError(format!("Failed to initialize logging: {e}")))?;
    info!(level = %config.logging.level, "Logging initialized");

    let server = GatewayServer::new(config)?;
    server.run().await
}
