//! # Server Configuration
//!
//! Router, shared state and startup for the wallet sync trigger server.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::trigger_auth_middleware;
use crate::config::AppConfig;
use crate::drivers::WalletDrivers;
use crate::handlers;
use crate::repositories::WalletJobQueue;
use crate::sync_worker::WalletSyncWorker;
use crate::telemetry::trace_context_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub worker: Arc<WalletSyncWorker>,
}

impl AppState {
    /// Wire the queue, drivers and worker for `config` on top of `db`.
    pub fn build(config: AppConfig, db: DatabaseConnection) -> Result<Self> {
        let drivers = WalletDrivers::from_config(&config).context("building wallet drivers")?;
        let queue = WalletJobQueue::new(db.clone(), config.worker.max_attempts);
        let worker = WalletSyncWorker::new(queue, drivers, config.worker.clone());

        Ok(Self {
            config: Arc::new(config),
            db,
            worker: Arc::new(worker),
        })
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let internal = Router::new()
        .route(
            "/internal/wallet-sync/tick",
            post(handlers::sync::trigger_tick),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            trigger_auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .merge(internal)
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Serve until `shutdown` fires, running the in-process worker loop when enabled.
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> Result<()> {
    let addr = state
        .config
        .bind_addr()
        .context("invalid server bind address")?;

    let worker_task = if state.config.worker.run_in_process {
        let worker = Arc::clone(&state.worker);
        let token = shutdown.clone();
        Some(tokio::spawn(async move { worker.run(token).await }))
    } else {
        None
    };

    let app = create_app(state.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!(
        %addr,
        profile = %state.config.profile,
        in_process_worker = worker_task.is_some(),
        "Wallet sync server listening"
    );

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await
        .context("server error")?;

    // The worker only observes the token; make sure it stops with the server.
    shutdown.cancel();
    if let Some(task) = worker_task
        && let Err(err) = task.await
    {
        tracing::error!(error = ?err, "Wallet sync worker task panicked");
    }

    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::sync::trigger_tick,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::HealthStatus,
            crate::sync_worker::TickSummary,
            crate::error::ApiError,
        )
    ),
    modifiers(&TriggerTokenSecurity),
    info(
        title = "Wallet Sync API",
        description = "Internal trigger and health endpoints of the wallet synchronization worker",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;

struct TriggerTokenSecurity;

impl utoipa::Modify for TriggerTokenSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}
