//! WekaFS CSI node daemon.
//!
//! Hosts the shared mount manager for a node: `serve` runs it until SIGINT
//! or SIGTERM, `mounts` lists what is currently mounted under the base path.
//!
//! ## Debugging with tokio-console
//!
//! Build with the `tokio-console` feature for async task introspection:
//! ```bash
//! cargo build -p wekafs-plugin --features tokio-console
//! ```
//!
//! Then run `tokio-console` in another terminal to connect (default: 127.0.0.1:6669).

#![deny(unsafe_code)]

mod commands;
mod exit_code;
mod settings;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
#[cfg(feature = "tokio-console")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wekafs_mount::{ConfigError, ExecutorError, MountError};

use crate::commands::{mounts, serve};
use crate::settings::MounterArgs;

/// WekaFS CSI node mount manager
#[derive(Parser)]
#[command(name = "wekafsplugin")]
#[command(author, version)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, env = "WEKAFS_LOG_JSON", global = true)]
    log_json: bool,

    /// JSON configuration file; flags override its values
    #[arg(long, env = "WEKAFS_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    mounter: MounterArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node mount manager until SIGINT or SIGTERM
    Serve,

    /// List mounts under the base path
    Mounts(mounts::Args),
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(categorize_error(&e))
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose, cli.log_json);

    let config = settings::load(cli.config.as_deref(), &cli.mounter)?;
    match cli.command {
        Commands::Serve => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .thread_name("wekafs-worker")
                .build()?;
            runtime.block_on(serve::execute(config))
        }
        Commands::Mounts(args) => mounts::execute(&args, &config),
    }
}

/// Set up tracing/logging based on verbosity level
fn setup_tracing(verbose: u8, json: bool) {
    let filter = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    #[cfg(feature = "tokio-console")]
    {
        use std::net::SocketAddr;
        use tracing_subscriber::Layer;

        let console_port: u16 = std::env::var("TOKIO_CONSOLE_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(6669);
        let console_addr: SocketAddr = ([127, 0, 0, 1], console_port).into();
        let port_available = std::net::TcpListener::bind(console_addr).is_ok();

        let fmt_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());
        let fmt_layer = if json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(io::stderr)
                .with_filter(fmt_filter)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_filter(fmt_filter)
                .boxed()
        };

        let console_layer = port_available.then(|| {
            console_subscriber::ConsoleLayer::builder()
                .server_addr(console_addr)
                .spawn()
        });
        tracing_subscriber::registry()
            .with(console_layer)
            .with(fmt_layer)
            .init();
        if port_available {
            tracing::info!("tokio-console enabled, connect with: tokio-console http://127.0.0.1:{}", console_port);
        } else {
            tracing::warn!(
                "tokio-console port {} already in use, running without console instrumentation.",
                console_port
            );
        }
    }

    #[cfg(not(feature = "tokio-console"))]
    {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
            .with_writer(io::stderr);
        if json {
            builder.json().init();
        } else {
            builder.init();
        }
    }
}

/// Map the error chain to an exit code.
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if cause.downcast_ref::<ConfigError>().is_some() {
            return exit_code::CONFIG;
        }
        if cause.downcast_ref::<ExecutorError>().is_some() {
            return exit_code::MOUNT_FAILED;
        }
        if let Some(MountError::Executor(_) | MountError::MountPoint { .. }) =
            cause.downcast_ref::<MountError>()
        {
            return exit_code::MOUNT_FAILED;
        }
    }
    exit_code::FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_config_errors_map_to_config_exit_code() {
        let err = anyhow::Error::from(ConfigError::Read {
            path: PathBuf::from("/missing.json"),
            source: io::Error::from(io::ErrorKind::NotFound),
        })
        .context("Failed to load config file");
        assert_eq!(categorize_error(&err), exit_code::CONFIG);
        assert_eq!(categorize_error(&anyhow::anyhow!("boom")), exit_code::FAILURE);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "wekafsplugin",
            "mounts",
            "--log-json",
            "--config",
            "/etc/wekafs.json",
        ])
        .unwrap();
        assert!(cli.log_json);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/wekafs.json")));
    }
}
