mod config;
mod logging;
mod reload;
mod server;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use covenant_eval::port::inmem::BillingPorts;
use covenant_eval::{ContractStore, Engine, EngineOptions};
use covenant_storage::{AuditSink, InMemoryAuditLog, JsonLinesAuditLog};
use tracing::{error, info};

use crate::config::{AuditSinkKind, ConfigFileError, ExecutorConfig};
use crate::reload::ContractSource;
use crate::server::AppState;

/// Covenant contract executor.
#[derive(Parser)]
#[command(
    name = "covenant-executor",
    version,
    about = "Serve a Covenant contract over HTTP"
)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:26860
    #[arg(long)]
    addr: Option<String>,

    /// JSON contract file to serve
    #[arg(long)]
    contract: Option<PathBuf>,

    /// Fixed contract version instead of the file's content hash
    #[arg(long)]
    etag: Option<String>,

    /// Seconds between contract file polls (0 disables polling)
    #[arg(long)]
    poll_secs: Option<u64>,

    /// Write audit records as JSON lines to this file
    #[arg(long)]
    audit_log: Option<PathBuf>,
}

impl Cli {
    fn apply(self, config: &mut ExecutorConfig) {
        if let Some(addr) = self.addr {
            config.server.listen = addr;
        }
        if let Some(contract) = self.contract {
            config.contract.path = contract;
        }
        if let Some(etag) = self.etag {
            config.contract.etag = Some(etag);
        }
        if let Some(secs) = self.poll_secs {
            config.contract.poll_interval_secs = secs;
        }
        if let Some(path) = self.audit_log {
            config.audit.sink = AuditSinkKind::JsonLines;
            config.audit.path = Some(path);
        }
    }
}

#[tokio::main]
async fn main() {
    logging::init();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = %e, "executor failed");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ExecutorConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    let store = Arc::new(ContractStore::new());
    let source = ContractSource::new(
        config.contract.path.clone(),
        config.contract.etag.clone(),
    );
    source.refresh(&store, false).await?;

    let audit: Arc<dyn AuditSink> = match config.audit.sink {
        AuditSinkKind::Memory => Arc::new(InMemoryAuditLog::new()),
        AuditSinkKind::JsonLines => {
            let path = config.audit.path.as_ref().ok_or_else(|| {
                ConfigFileError::Invalid("audit.path is required for the json_lines sink".into())
            })?;
            Arc::new(JsonLinesAuditLog::open(path).await?)
        }
    };

    let engine = Engine::new(store.clone(), BillingPorts::seeded().registry(), audit).with_options(
        EngineOptions {
            port_timeout: config.port_timeout(),
        },
    );

    if let Some(every) = config.poll_interval() {
        info!(path = %source.path().display(), every_secs = every.as_secs(), "polling contract file");
        tokio::spawn(reload::poll(Arc::new(source.clone()), store, every));
    }

    let state = Arc::new(AppState {
        engine,
        source,
        invocation_timeout: config.invocation_timeout(),
    });
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    info!(
        addr = %config.server.listen,
        contract = %config.contract.path.display(),
        "executor listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("executor shut down");
    Ok(())
}

/// Wait for Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal");
}
