use smart_kissan::config::Config;
use smart_kissan::receiver::{self, ReceiverState};
use smart_kissan::telemetry;
use std::sync::Arc;
use tokio::{
    net::TcpListener,
    signal::{self, ctrl_c},
};
use tracing::info;

#[tokio::main]
async fn main() {
    telemetry::init();

    let config = Config::load();
    let state = ReceiverState::new(Arc::new(receiver::LoggingHandlers), config.dispatch_mode);
    info!(mode = ?config.dispatch_mode, "Starting webhook receiver");

    let listener = TcpListener::bind(config.receiver_addr)
        .await
        .expect("Failed to bind receiver address");
    info!("Webhook receiver listening on {}", config.receiver_addr);

    axum::serve(listener, receiver::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Webhook receiver failed");

    info!("Webhook receiver shut down");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
