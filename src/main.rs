//! drive-proxy: per-session Drive service reachable over a named pipe.
//!
//! Usage:
//!   drive-proxy [--config PATH] [--log LEVEL] [--log-format text|json] [--file=PATH]
//!               [serve | ping | stop | call <method> [args...]]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use drive_proxy::{
    config::{self, ProxyConfig},
    logging::{self, LogSettings},
    pipe::{PipeClient, PipeServer},
    service::{open_remote_file, Service, ServiceContext},
};
use std::{path::PathBuf, sync::Arc};

#[derive(Parser, Debug)]
#[command(name = "drive-proxy", version, about = "Drive proxy service")]
struct Cli {
    /// Path to drive-proxy.toml
    #[arg(long, short = 'c', env = "DRIVE_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Log level or filter directive (overrides the config file)
    #[arg(long, env = "DRIVE_PROXY_LOG")]
    log: Option<String>,

    /// Log format (overrides the config file)
    #[arg(long)]
    log_format: Option<LogFormatArg>,

    /// Open the remote document behind a local mirror path and exit
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipe server for this login session (default)
    Serve,
    /// Check whether a server is answering
    Ping,
    /// Ask the running server to stop
    Stop,
    /// Call a method on the running server, e.g. `call GetFiles root`
    Call {
        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        args: Vec<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for config::LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Text => config::LogFormat::Text,
            LogFormatArg::Json => config::LogFormat::Json,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let mut config = ProxyConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(level) = &cli.log {
        config.log.level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.log.format = format.into();
    }
    let log = Arc::new(logging::init_logging(&config.log));

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "drive-proxy starting"
    );

    if let Some(path) = &cli.file {
        let ctx = ServiceContext::from_config(config, log)?;
        let file = open_remote_file(&ctx, path)
            .with_context(|| format!("opening {}", path.display()))?;
        println!("{}", file.title);
        return Ok(());
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, log, cli.log.is_none()),
        Command::Ping => {
            PipeClient::new(&config.service)
                .with_connect_retries(1)
                .ping()
                .context("no server is answering")?;
            println!("hello");
            Ok(())
        }
        Command::Stop => {
            PipeClient::new(&config.service)
                .shutdown()
                .context("failed to stop the server")?;
            println!("disconnecting");
            Ok(())
        }
        Command::Call { args } => {
            let response = PipeClient::new(&config.service).execute(&args)?;
            println!("{response}");
            Ok(())
        }
    }
}

fn serve(config: ProxyConfig, log: Arc<LogSettings>, use_persisted_level: bool) -> Result<()> {
    let existing = PipeClient::new(&config.service).with_connect_retries(1);
    if existing.ping().is_ok() {
        bail!(
            "a drive-proxy server is already running on {}",
            existing.pipe_name()
        );
    }

    let ctx = Arc::new(ServiceContext::from_config(config, log)?);
    if use_persisted_level {
        if let Some(level) = ctx.persisted_log_level() {
            if let Err(err) = ctx.log().set_level(&level) {
                tracing::warn!(level = %level, error = %err, "ignoring persisted log level");
            }
        }
    }

    if let Err(err) = ctx.transfers().spawn_event_logger() {
        tracing::warn!(error = %err, "transfer events will not be logged");
    }

    let server = PipeServer::new(&ctx.config().service, Arc::new(Service::new(ctx.clone())));
    server.run()?;
    tracing::info!("drive-proxy stopped");
    Ok(())
}
