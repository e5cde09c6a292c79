//! wg-provision main entry point
//!
//! Handles CLI parsing, logging setup, and wiring of the provisioner to
//! the live device and the control server.

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wg_provision::config::Config;
use wg_provision::control::{ControlServer, RequestHandler};
use wg_provision::provision::{ClientIdentityRequest, Provisioner};
use wg_provision::wireguard::{DeviceBackend, WgToolDevice};
use wg_provision::{ProvisionError, APP_NAME, VERSION};

/// WireGuard client provisioning service
#[derive(Parser, Debug)]
#[command(name = APP_NAME, version = VERSION, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/wg-provision/config.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the control server
    Serve,

    /// Provision one client and print its config
    Provision {
        /// Generate a fresh key pair for the client
        #[arg(long, conflicts_with = "public_key")]
        generate_keys: bool,

        /// Use this base64-encoded client public key
        #[arg(long)]
        public_key: Option<String>,
    },

    /// Revoke a provisioned client
    Revoke {
        /// Base64-encoded client public key
        #[arg(long)]
        public_key: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize structured logging with tracing
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Run the CLI command
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve => {
            info!("Starting {} v{} with config: {}", APP_NAME, VERSION, cli.config);

            let config = Config::from_file(&cli.config)?;
            let provisioner = build_provisioner(&config)?;

            // A missing interface at startup is a deployment-not-ready
            // condition; requests keep failing gracefully until it appears
            match provisioner.sync_from_device().await {
                Ok(()) => {}
                Err(ProvisionError::DeviceNotReady(msg)) => {
                    warn!("Device not ready at startup: {}", msg);
                }
                Err(e) => return Err(e.into()),
            }

            let handler = Arc::new(RequestHandler::new(provisioner));
            let server = ControlServer::new(config.socket_path.clone().into(), handler);

            tokio::select! {
                result = server.start() => {
                    result.map_err(|e| anyhow::anyhow!("Control server failed: {}", e))?;
                }
                _ = shutdown_signal() => {
                    info!("Shutting down");
                }
            }

            server.shutdown().map_err(|e| anyhow::anyhow!("{}", e))?;
            Ok(())
        }
        Commands::Provision {
            generate_keys,
            public_key,
        } => {
            let config = Config::from_file(&cli.config)?;
            let provisioner = build_provisioner(&config)?;
            provisioner.sync_from_device().await?;

            let identity = match (generate_keys, public_key) {
                (true, None) => ClientIdentityRequest::GenerateKeys,
                (false, Some(key)) => ClientIdentityRequest::CallerPublicKey(key),
                _ => anyhow::bail!("Pass exactly one of --generate-keys or --public-key"),
            };

            let client = provisioner.provision(identity).await?;
            println!("{}", client.artifact.text);
            info!(
                "Provisioned {} at {} ({})",
                client.public_key,
                client.address,
                client.artifact_path.display()
            );
            Ok(())
        }
        Commands::Revoke { public_key } => {
            let config = Config::from_file(&cli.config)?;
            let provisioner = build_provisioner(&config)?;
            provisioner.sync_from_device().await?;

            provisioner.revoke(&public_key).await?;
            println!("Revoked {}", public_key);
            Ok(())
        }
        Commands::Version => {
            println!("{} v{}", APP_NAME, VERSION);
            Ok(())
        }
    }
}

/// Wire the provisioner to the live device
fn build_provisioner(config: &Config) -> anyhow::Result<Arc<Provisioner>> {
    let mut device = WgToolDevice::new(config.interface.clone());
    if let Some(command) = &config.persist_command {
        device = device.with_persist_command(command.clone());
    }
    let device = Arc::new(device) as Arc<dyn DeviceBackend>;
    Ok(Arc::new(Provisioner::new(config, device)?))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
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
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
