//! HTTP application runner (v1)
//!
//! # Modes
//!
//! ```text
//!   cgi (default)                         serve
//!   ─────────────                         ─────
//!   env + stdin                           TCP listener (axum)
//!       │                                     │
//!       ▼                                     ▼
//!   EnvironmentRequestFactory             HostRequestSource (per request)
//!       │                                     │
//!       └──────────────┬──────────────────────┘
//!                      ▼
//!                  HttpRunner ──▶ Application (EchoHandler)
//!                      │
//!                      ▼
//!      PostProcessing ──▶ SapiEmitter ──▶ OutputContext
//!                                             │
//!                      ┌──────────────────────┴───────┐
//!                      ▼                              ▼
//!                  CgiSink (stdout)            CaptureSink → axum reply
//! ```
//!
//! Logs go to stderr so they never mix with CGI output.

use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use http_runner::config::{load_config, RunnerConfig};
use http_runner::emitter::OutputContext;
use http_runner::http::DevServer;
use http_runner::lifecycle::{trigger_on_ctrl_c, Shutdown};
use http_runner::observability::{init_tracing, metrics};
use http_runner::runner::{ContainerFactory, EchoHandler, HttpRunner, RunnerError, StaticContainerFactory};

#[derive(Debug, Parser)]
#[command(name = "http-runner", version, about = "Run an HTTP application over CGI or a dev server")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose error pages and debug error handling.
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Handle one CGI request from the environment and stdin.
    Cgi,
    /// Serve HTTP until Ctrl+C.
    Serve {
        /// Overrides `server.bind_address`.
        #[arg(long)]
        bind: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("http-runner: {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => RunnerConfig::default(),
    };
    if cli.debug {
        config.debug = true;
    }

    init_tracing(&config.observability);
    tracing::debug!(
        debug = config.debug,
        buffer_size = config.emitter.buffer_size,
        "Configuration loaded"
    );

    let containers: Arc<dyn ContainerFactory> = Arc::new(StaticContainerFactory::new(Arc::new(EchoHandler)));

    let result = match cli.command.unwrap_or(Command::Cgi) {
        Command::Cgi => run_cgi(config, containers),
        Command::Serve { bind } => serve(config, containers, bind),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}

fn run_cgi(config: RunnerConfig, containers: Arc<dyn ContainerFactory>) -> Result<(), Box<dyn Error>> {
    let output = OutputContext::cgi();
    let runner = HttpRunner::new(config, containers, output.clone())?;

    if let Err(e) = runner.run() {
        if let RunnerError::Emit(emit) = &e {
            if let Some(solution) = emit.solution() {
                tracing::error!(problem = %emit.name(), "{solution}");
            }
        }
        return Err(e.into());
    }

    output.finish()?;
    Ok(())
}

fn serve(
    mut config: RunnerConfig,
    containers: Arc<dyn ContainerFactory>,
    bind: Option<String>,
) -> Result<(), Box<dyn Error>> {
    if let Some(bind) = bind {
        config.server.bind_address = bind;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async move {
        if config.observability.metrics_enabled {
            let addr: SocketAddr = config.observability.metrics_address.parse()?;
            metrics::init_metrics(addr);
        }

        let listener = TcpListener::bind(&config.server.bind_address).await?;
        tracing::info!(
            bind_address = %listener.local_addr()?,
            request_timeout_secs = config.server.request_timeout_secs,
            max_body_size = config.server.max_body_size,
            "Dev server configured"
        );

        let shutdown = Shutdown::new();
        tokio::spawn(trigger_on_ctrl_c(shutdown.clone()));

        DevServer::new(config, containers).run(listener, shutdown).await?;
        tracing::info!("Shutdown complete");
        Ok::<(), Box<dyn Error>>(())
    })
}
