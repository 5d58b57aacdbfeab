use common::TelemetryGuard;
use gateway::{
    config::GatewayConfig, handler::RequestHandler, lifecycle::ServiceLifecycle,
    logging::setup_logging, routes::router, state::AppState,
};
use inference::{ModelHandle, backend::ort::OrtBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env()?;

    let _telemetry = match config.otel_endpoint.as_deref() {
        Some(endpoint) => Some(TelemetryGuard::init(
            "gateway",
            endpoint,
            config.environment,
        )?),
        None => {
            setup_logging(&config);
            None
        }
    };

    tracing::info!(config = ?config, "Loaded configuration");

    let inference_config = config.inference.clone();
    let lifecycle = ServiceLifecycle::start(&config.model_path, |path| {
        ModelHandle::load::<OrtBackend>(path, &inference_config)
    })?;

    let handler = RequestHandler::new(lifecycle.model(), config.model_path.clone())
        .with_timeout(config.inference_timeout);
    let app = router(AppState::new(handler), config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(
        addr = %config.bind_addr,
        model_loaded = lifecycle.is_model_loaded(),
        "Gateway listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    lifecycle.stop();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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

    tracing::info!("Shutdown signal received");
}
