// wsrpc-server - standalone RPC server
//
// Serves the `user.SayHello` demo service on the configured transports until
// interrupted.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;
use wsrpc_server::{CallContext, ListenConfig, Return, Server, ServerConfig, Service};

/// Log level options for the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "wsrpc-server")]
#[command(about = "Multi-threaded RPC server over WebSocket and TCP")]
#[command(version)]
struct Cli {
    /// Config file path (defaults to ~/.config/wsrpc/server.toml if present)
    #[arg(short = 'C', long)]
    config: Option<PathBuf>,

    /// Number of worker threads
    #[arg(short, long)]
    threads: Option<usize>,

    /// Listen address, `ws://host:port`, `tcp://host:port` or `host:port`.
    /// Repeatable; replaces the configured addresses.
    #[arg(short, long)]
    listen: Vec<String>,

    /// Set log level (off, error, warn, info, debug, trace)
    #[arg(short = 'L', long, value_enum)]
    log_level: Option<LogLevel>,
}

fn init_tracing(level: Option<LogLevel>) {
    let filter = match level {
        Some(level) => EnvFilter::default().add_directive(LevelFilter::from(level).into()),
        None => EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn say_hello(ctx: CallContext, name: String) -> Return {
    ctx.ok(format!("hello {}", name))
}

fn load_config(cli: &Cli) -> Result<ServerConfig> {
    let mut config = ServerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(threads) = cli.threads {
        config.threads = threads;
    }
    if !cli.listen.is_empty() {
        config.listen = cli
            .listen
            .iter()
            .map(|spec| ListenConfig::parse(spec))
            .collect::<Result<_, _>>()?;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level);

    info!("Starting wsrpc-server v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&cli)?;
    let server = Server::from_config(&config)?;
    server.add_service("user", Service::new().reply("SayHello", say_hello)?)?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C");
                shutdown.shutdown();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.serve().await?;
    Ok(())
}
