// ============================================
// File: crates/mcrelay-server/src/main.rs
// ============================================
//! # mcrelay Entry Point
//!
//! ## Creation Reason
//! Binary entry point for the proxy. Handles CLI parsing, logging setup
//! and server startup.
//!
//! ## Main Functionality
//! - CLI argument parsing with clap
//! - Logging initialization with tracing
//! - Configuration loading and command-line overrides
//! - Server execution
//!
//! ## Usage
//! ```bash
//! # Proxy to the configured backend
//! mcrelay start
//!
//! # Local test server, custom port
//! mcrelay start --dev --port 41224
//!
//! # Report a different host to the backend
//! mcrelay start --backend play.example.net --spoof example.net:25565
//!
//! # Check a config file
//! mcrelay validate --config mcrelay.toml
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The runtime is single-threaded; library types stay Send + Sync
//! - `RUST_LOG` overrides `[logging] level`
//!
//! ## Last Modified
//! v0.1.0 - Initial CLI implementation

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcrelay_common::BackendAddr;
use mcrelay_server::{ProxyConfig, Server};

// ============================================
// CLI Definition
// ============================================

/// Intercepting Minecraft protocol proxy
#[derive(Parser, Debug)]
#[command(name = "mcrelay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the proxy
    Start(StartArgs),

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "mcrelay.toml")]
        config: PathBuf,
    },
}

#[derive(Args, Debug)]
struct StartArgs {
    /// Path to configuration file (defaults are used if it is missing)
    #[arg(short, long, default_value = "mcrelay.toml")]
    config: PathBuf,

    /// Backend server as host[:port]
    #[arg(short, long)]
    backend: Option<BackendAddr>,

    /// Local listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Host[:port] reported to the backend in handshakes
    #[arg(long)]
    spoof: Option<BackendAddr>,

    /// Connect to a local test server (localhost:25565)
    #[arg(long)]
    dev: bool,
}

// ============================================
// Main
// ============================================

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start(args) => cmd_start(args).await,
        Commands::Validate { config } => cmd_validate(&config).await,
    };

    if let Err(e) = result {
        init_logging("info");
        error!("{:#}", e);
        std::process::exit(1);
    }
}

// ============================================
// Commands
// ============================================

/// Starts the proxy.
async fn cmd_start(args: StartArgs) -> anyhow::Result<()> {
    let mut config = load_or_default_config(&args.config).await?;

    if let Some(backend) = args.backend {
        config.network.backend = backend;
    }
    if let Some(port) = args.port {
        config.network.listen_addr.set_port(port);
    }
    if args.spoof.is_some() {
        config.network.spoof = args.spoof;
    }
    config.network.dev |= args.dev;
    config.validate()?;

    init_logging(&config.logging.level);

    info!("════════════════════════════════════════");
    info!("Listen:     {}", config.listen_addr());
    info!("Backend:    {}", config.backend());
    if let Some(spoof) = &config.network.spoof {
        info!("Reported:   {}", spoof);
    }
    info!("════════════════════════════════════════");

    let server = Server::new(config);
    server.run().await?;

    Ok(())
}

/// Validates configuration file.
async fn cmd_validate(config_path: &Path) -> anyhow::Result<()> {
    if !config_path.exists() {
        println!("⚠️  Config file not found: {}", config_path.display());
        println!("   Proxy will use default values.");
        return Ok(());
    }

    let config = ProxyConfig::load(config_path).await?;

    println!("✅ Configuration is valid");
    println!();
    println!("Network:");
    println!("   Listen:     {}", config.listen_addr());
    println!("   Backend:    {}", config.backend());
    if let Some(spoof) = &config.network.spoof {
        println!("   Reported:   {}", spoof);
    }
    println!();
    println!("Protocol:");
    println!("   Max Frame:          {} bytes", config.protocol.max_frame_len);
    println!("   Handshake Timeout:  {}s", config.protocol.handshake_timeout_secs);
    println!();
    println!("Limits:");
    println!("   Max Sessions:    {}", config.limits.max_sessions);
    println!("   Shutdown Grace:  {}s", config.limits.shutdown_grace_secs);
    println!();

    Ok(())
}

// ============================================
// Helper Functions
// ============================================

/// Initializes the tracing subscriber.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .ok();
}

/// Loads config or returns default if the file does not exist.
async fn load_or_default_config(path: &Path) -> anyhow::Result<ProxyConfig> {
    if path.exists() {
        Ok(ProxyConfig::load(path).await?)
    } else {
        Ok(ProxyConfig::default())
    }
}
