use std::sync::Arc;

use carrier_match::api;
use carrier_match::api::grpc::GrpcCarrierMatchService;
use carrier_match::api::grpc::pb::carrier_match_server::CarrierMatchServer;
use carrier_match::config::Config;
use carrier_match::error::AppError;
use carrier_match::geo::directions::GoogleDirections;
use carrier_match::state::AppState;
use tonic::transport::Server as TonicServer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.compact().init();
    }

    let mut app_state = AppState::new(config.event_buffer_size);
    match &config.directions_api_key {
        Some(key) => {
            app_state = app_state.with_directions(Arc::new(GoogleDirections::new(
                config.directions_base_url.clone(),
                key.clone(),
            )));
        }
        None => tracing::warn!("DIRECTIONS_API_KEY not set; quotes use straight-line estimates"),
    }
    let shared_state = Arc::new(app_state);

    let app = api::rest::router(shared_state.clone());

    let grpc_addr = format!("0.0.0.0:{}", config.grpc_port)
        .parse()
        .map_err(|err| AppError::Internal(format!("invalid grpc address: {err}")))?;
    let grpc_service = GrpcCarrierMatchService::new(shared_state.clone());

    tokio::spawn(async move {
        tracing::info!(grpc_port = %grpc_addr, "grpc server started");
        if let Err(err) = TonicServer::builder()
            .add_service(CarrierMatchServer::new(grpc_service))
            .serve(grpc_addr)
            .await
        {
            tracing::error!(error = %err, "grpc server failed");
        }
    });

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
