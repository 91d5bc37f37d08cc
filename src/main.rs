use anyhow::Context;
use booking_payments::api::{self, AppState};
use booking_payments::config::AppConfig;
use booking_payments::database::{InMemoryPaymentStore, PaymentStore};
use booking_payments::logging::init_tracing;
use booking_payments::payments::provider::PaymentGateway;
use booking_payments::payments::providers::ChapaGateway;
use booking_payments::services::{
    HttpNotifier, LifecycleConfig, LogNotifier, NotificationConfig, NotificationDispatcher,
    Notifier, PaymentLifecycleEngine, ReconciliationCoordinator,
};
use booking_payments::workers::{NotificationWorker, PaymentSweeper, SweepConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn PaymentStore>> {
    let Some(database) = &config.database else {
        warn!("⚠️  DATABASE_URL not set, payments are kept in memory only");
        return Ok(Arc::new(InMemoryPaymentStore::new()));
    };

    #[cfg(feature = "database")]
    {
        use booking_payments::database::{init_pool_from_config, PgPaymentRepository};

        info!("📊 Connecting to payment database...");
        let pool = init_pool_from_config(database)
            .await
            .context("failed to initialize database pool")?;
        let repository = PgPaymentRepository::new(pool);
        if database.run_migrations {
            info!("📦 Running payment migrations...");
            repository
                .migrate()
                .await
                .context("failed to run database migrations")?;
        }
        info!("✅ Payment database ready");
        Ok(Arc::new(repository))
    }

    #[cfg(not(feature = "database"))]
    {
        let _ = database;
        warn!("⚠️  Built without the `database` feature, ignoring DATABASE_URL");
        Ok(Arc::new(InMemoryPaymentStore::new()))
    }
}

fn build_notifier(config: &NotificationConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    match &config.webhook_url {
        Some(url) => {
            info!(url = %url, "🔔 Delivering payment notifications over HTTP");
            Ok(Arc::new(
                HttpNotifier::new(url.clone(), config.timeout)
                    .context("failed to build notification client")?,
            ))
        }
        None => {
            info!("🔔 Logging payment notifications");
            Ok(Arc::new(LogNotifier::new()))
        }
    }
}

async fn join_worker(name: &str, handle: JoinHandle<()>) {
    match tokio::time::timeout(Duration::from_secs(5), handle).await {
        Ok(Ok(())) => info!(worker = name, "worker stopped"),
        Ok(Err(e)) => error!(worker = name, error = %e, "worker task panicked"),
        Err(_) => error!(worker = name, "Timed out waiting for worker shutdown"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    init_tracing(&config.logging);
    config.validate().context("invalid configuration")?;

    info!("🚀 Starting booking payments service");

    let lifecycle_config = LifecycleConfig::from_env();
    lifecycle_config
        .validate()
        .context("invalid payment lifecycle configuration")?;
    let notification_config = NotificationConfig::from_env();
    let sweep_config = SweepConfig::from_env();

    let gateway: Arc<dyn PaymentGateway> =
        Arc::new(ChapaGateway::from_env().context("failed to configure Chapa gateway")?);
    info!(gateway = gateway.name(), "✅ Payment gateway configured");

    let store = build_store(&config).await?;

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);

    let (dispatcher, notification_rx) =
        NotificationDispatcher::channel(notification_config.queue_capacity);
    let notification_worker =
        NotificationWorker::new(build_notifier(&notification_config)?, &notification_config);
    let notification_handle = tokio::spawn(
        notification_worker.run(notification_rx, worker_shutdown_rx.clone()),
    );

    let engine = Arc::new(
        PaymentLifecycleEngine::new(store, gateway.clone(), lifecycle_config)
            .with_notifications(dispatcher),
    );
    let coordinator = Arc::new(ReconciliationCoordinator::new(engine, gateway));

    let sweeper_handle = if sweep_config.enabled {
        info!("🧹 Starting payment expiry sweeper");
        let sweeper = PaymentSweeper::new(coordinator.clone(), sweep_config);
        Some(tokio::spawn(sweeper.run(worker_shutdown_rx.clone())))
    } else {
        info!("⏭️  Payment expiry sweeper disabled (PAYMENT_SWEEP_ENABLED=false)");
        None
    };

    let app = api::router(AppState::new(coordinator));

    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!("🚀 Server listening on http://{}", addr);
    info!("✅ Server is ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await
        .context("server error")?;

    let _ = worker_shutdown_tx.send(true);
    join_worker("notification_worker", notification_handle).await;
    if let Some(handle) = sweeper_handle {
        join_worker("payment_sweeper", handle).await;
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
