//! Metering service entry point.

use metering_service::config::MeteringConfig;
use metering_service::startup::Application;

use service_core::observability::init_tracing;
use tokio::signal;

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = MeteringConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        service_name = %config.service_name,
        port = %config.common.port,
        monitor_enabled = config.monitor.enabled,
        monitor_cadence_minutes = config.monitor.cadence_minutes,
        rate_plan_service_url = %config.rate_plan_service.base_url,
        subscription_service_url = %config.subscription_service.base_url,
        notifier_url = %config.notifier.base_url,
        "Starting metering-service"
    );

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to build application");
        std::io::Error::other(format!("Application build error: {}", e))
    })?;

    let shutdown = app.shutdown_token();
    let server = tokio::spawn(app.run_until_stopped());

    shutdown_signal().await;
    // Stop enumerating new work; the in-flight invoice write finishes before
    // the monitor loop exits.
    shutdown.cancel();

    match server.await {
        Ok(result) => result?,
        Err(e) => {
            tracing::error!(error = %e, "Server task panicked");
            return Err(std::io::Error::other(format!("Server task error: {}", e)));
        }
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}
