//! Audited API call runner.
//!
//! Loads configuration, connects the audit store, and runs one subcommand.
//! Interrupting a `call` abandons it; rows already queued may be lost.

use std::{io, sync::Arc};

use anyhow::{Context, Result};
use callaudit::{
    cli::{Cli, Command},
    commands, Config,
};
use callaudit_client::ReqwestTransport;
use callaudit_core::{AuditStore, MemoryAuditStore, PgAuditStore};
use clap::Parser;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_from(&cli.config)?;

    init_tracing(&config.rust_log);
    info!(
        config_file = %cli.config.display(),
        database_url = %config.database_url_masked(),
        audit_enabled = config.audit_enabled,
        "configuration loaded"
    );

    match cli.command {
        Command::Migrate => {
            let pool = commands::create_database_pool(&config).await?;
            commands::migrate(&PgAuditStore::new(Arc::new(pool.clone()))).await?;
            pool.close().await;
        },
        Command::Call(args) => {
            let (store, pool) = if args.ephemeral {
                info!("keeping audit rows in memory");
                (Arc::new(MemoryAuditStore::new()) as Arc<dyn AuditStore>, None)
            } else {
                let pool = commands::create_database_pool(&config).await?;
                let store = PgAuditStore::new(Arc::new(pool.clone()));
                commands::migrate(&store).await?;
                (Arc::new(store) as Arc<dyn AuditStore>, Some(pool))
            };
            let transport = Arc::new(
                ReqwestTransport::new(config.to_client_config())
                    .context("failed to build HTTP client")?,
            );

            let report = tokio::select! {
                report = commands::call(&config, store, transport, &args) => report?,
                () = shutdown_signal() => {
                    warn!("interrupted before the call completed");
                    return Ok(());
                },
            };

            commands::write_report(&report, &mut io::stdout().lock())?;
            if let Some(pool) = pool {
                pool.close().await;
            }
            if let Err(e) = report.outcome {
                return Err(e).context("audited call failed");
            }
        },
        Command::Query(args) => {
            let selector = args.selector()?;
            let pool = commands::create_database_pool(&config).await?;
            let store = PgAuditStore::new(Arc::new(pool.clone()));
            let rows = commands::query(&store, &selector).await?;
            info!(rows = rows.len(), "query complete");
            commands::write_rows(&rows, &mut io::stdout().lock())?;
            pool.close().await;
        },
    }

    Ok(())
}

/// Initializes tracing. `RUST_LOG` wins over the configured filter.
fn init_tracing(configured: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Waits for CTRL+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received CTRL+C"),
        () = terminate => info!("received SIGTERM"),
    }
}
