//! reposcribe server - long-running host process for the documentation
//! pipeline orchestrator.
//!
//! Usage:
//!   reposcribe-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>      Path to configuration file (default: config.toml)
//!   --host <HOST>        API server host (default: 127.0.0.1)
//!   --port <PORT>        API server port (default: 8080)

use reposcribe::config::Config;
use reposcribe::{start_server, AppState};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug)]
struct ServerArgs {
    config_path: PathBuf,
    host: String,
    port: u16,
}

impl Default for ServerArgs {
    fn default() -> Self {
        Self { config_path: PathBuf::from("config.toml"), host: "127.0.0.1".to_string(), port: 8080 }
    }
}

fn parse_args() -> ServerArgs {
    let mut args = ServerArgs::default();
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                if let Some(path) = iter.next() {
                    args.config_path = PathBuf::from(path);
                }
            }
            "--host" => {
                if let Some(host) = iter.next() {
                    args.host = host;
                }
            }
            "--port" => {
                if let Some(port) = iter.next() {
                    if let Ok(p) = port.parse() {
                        args.port = p;
                    }
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
    }

    args
}

fn print_help() {
    println!("reposcribe-server - documentation pipeline orchestrator host process");
    println!();
    println!("USAGE:");
    println!("    reposcribe-server [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --config <PATH>      Path to configuration file (default: config.toml)");
    println!("    --host <HOST>        API server host (default: 127.0.0.1)");
    println!("    --port <PORT>        API server port (default: 8080)");
    println!("    --help, -h           Print this help message");
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,reposcribe=debug"));
    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
}

async fn run_server(args: ServerArgs) -> anyhow::Result<()> {
    info!("loading configuration from: {:?}", args.config_path);

    let config = if args.config_path.exists() {
        Config::from_file(&args.config_path)?
    } else {
        info!("config file not found, using default configuration");
        Config::default()
    };
    config.validate()?;

    info!("initializing orchestrator...");
    let app_state = AppState::new(config).await?;

    info!("reposcribe server starting...");
    info!("API server will listen on {}:{}", args.host, args.port);

    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received");
        tx.send(()).ok();
    });

    tokio::select! {
        result = start_server(app_state, &args.host, args.port) => {
            if let Err(e) = result {
                error!("server error: {}", e);
                return Err(e.into());
            }
        }
        _ = &mut rx => {
            info!("graceful shutdown initiated");
        }
    }

    info!("reposcribe server stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args();
    setup_logging();

    info!("reposcribe server v{}", reposcribe::VERSION);

    run_server(args).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_args_match_documented_defaults() {
        let args = ServerArgs::default();
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.port, 8080);
    }
}
