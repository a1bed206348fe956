use std::sync::Arc;
use std::time::Duration;

use axum::{Extension, Router};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use storefront_api::auth::{AuthConfig, AuthService};
use storefront_api::config::{init_tracing, load_config};
use storefront_api::db::{establish_connection_from_app_config, run_migrations};
use storefront_api::events::{event_channel, process_events};
use storefront_api::handlers::AppServices;
use storefront_api::{api_v1_routes, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(&config.log_level, config.log_json);
    info!(environment = %config.environment, "starting storefront api");

    let db = Arc::new(establish_connection_from_app_config(&config).await?);
    if config.auto_migrate {
        run_migrations(db.as_ref()).await?;
        info!("database migrations applied");
    }

    let (event_sender, event_receiver) = event_channel(1024);
    tokio::spawn(process_events(event_receiver));

    let auth_service = Arc::new(AuthService::new(AuthConfig {
        jwt_secret: config.jwt_secret.clone(),
        token_expiration_secs: config.jwt_expiration as i64,
        issuer: config.auth_issuer.clone(),
        audience: config.auth_audience.clone(),
    }));

    let services = AppServices::new(db.clone(), event_sender.clone(), &config)?;
    let state = AppState {
        db,
        config: config.clone(),
        event_sender,
        services,
    };

    let app = Router::new()
        .nest("/api/v1", api_v1_routes())
        .layer(Extension(auth_service))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install ctrl-c handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("failed to install terminate handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
