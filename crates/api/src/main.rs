//! API server entry point.

use api::config::{Config, LogFormat};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env().expect("invalid configuration");
    init_tracing(&config);
    config.validate().expect("invalid configuration");

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the order store
    match config.database_url.clone() {
        Some(url) => {
            let store = PostgresOrderStore::connect(&url)
                .await
                .expect("failed to connect to PostgreSQL");
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL order store");
            serve(store, config, metrics_handle).await;
        }
        None => {
            tracing::info!("using in-memory order store");
            serve(InMemoryOrderStore::new(), config, metrics_handle).await;
        }
    }
}

/// Seeds stock, resumes unfinished orders and serves until shutdown.
///
/// The ledger and authorizer live in this process, so only orders survive a
/// restart. A resumed order is reconciled against a freshly seeded ledger and
/// an empty authorizer that no longer know its reservations or payment
/// intent. Crash-resume keeps downstream state only when both services run
/// out of process behind `InventoryService` and `PaymentService`.
async fn serve<S: OrderStore + 'static>(store: S, config: Config, metrics_handle: PrometheusHandle) {
    // 4. Build state, seed stock and start the expiry sweeper
    let state = api::create_default_state(store, &config);
    for (product_id, total) in &config.seed_stock {
        state
            .ledger
            .set_stock(product_id, *total)
            .await
            .expect("failed to seed stock");
        tracing::info!(%product_id, total, "seeded stock");
    }
    let sweeper = state.ledger.spawn_sweeper(config.sweep_interval);

    // 5. Resume sagas interrupted by the last shutdown
    let resumed = state
        .coordinator
        .resume()
        .await
        .expect("failed to resume sagas");
    tracing::info!(resumed, "resumed unfinished orders");

    // 6. Start server
    let app = api::create_app(state.clone(), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // In-flight sagas stop at their last saved status and resume on restart.
    state.coordinator.shutdown().await;
    sweeper.abort();
    tracing::info!("server shut down gracefully");
}
