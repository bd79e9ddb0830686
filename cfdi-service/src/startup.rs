//! Application startup and lifecycle management.

use async_trait::async_trait;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::CfdiConfig;
use crate::engine::{Collaborators, InvoiceEngine};
use crate::gateway::HttpFiscalProvider;
use crate::handlers;
use crate::services::{init_metrics, HttpNotifier, PgStore};

/// Backing-store probe used by `/health` and `/ready`.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;
}

#[async_trait]
impl HealthProbe for PgStore {
    async fn health_check(&self) -> Result<(), AppError> {
        PgStore::health_check(self).await
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<InvoiceEngine>,
    pub health: Arc<dyn HealthProbe>,
}

/// The HTTP surface over an already wired engine.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/invoices", post(handlers::invoices::issue_invoice))
        .route(
            "/invoices/consolidated",
            post(handlers::invoices::issue_consolidated_invoice),
        )
        .route(
            "/invoices/reissue",
            post(handlers::invoices::reissue_invoice),
        )
        .route(
            "/complements",
            post(handlers::invoices::issue_payment_complement),
        )
        .route(
            "/orders/:order_id/invoice",
            get(handlers::invoices::get_invoice).delete(handlers::invoices::cancel_invoice),
        )
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Wire every collaborator to one PostgreSQL store.
pub fn collaborators(
    store: Arc<PgStore>,
    provider: Arc<HttpFiscalProvider>,
    notifier: Arc<HttpNotifier>,
) -> Collaborators {
    Collaborators {
        orders: store.clone(),
        carts: store.clone(),
        suppliers: store.clone(),
        branches: store.clone(),
        certificates: store.clone(),
        invoices: store.clone(),
        folios: store.clone(),
        actors: store,
        notifier,
        provider,
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: CfdiConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    pub async fn build_without_migrations(config: CfdiConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: CfdiConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let store = PgStore::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            store.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }
        let store = Arc::new(store);

        let provider = HttpFiscalProvider::new(config.provider.clone()).map_err(|e| {
            tracing::error!(error = %e, "Failed to build fiscal provider client");
            AppError::InternalError(e)
        })?;

        if config.notifications.base_url.is_none() {
            tracing::warn!("Notification service not configured - invoice emails will be skipped");
        }
        let notifier = HttpNotifier::new(config.notifications.clone()).map_err(|e| {
            tracing::error!(error = %e, "Failed to build notification client");
            AppError::InternalError(e)
        })?;

        let engine = InvoiceEngine::new(
            collaborators(store.clone(), Arc::new(provider), Arc::new(notifier)),
            config.fiscal.clone(),
        );

        let state = AppState {
            engine: Arc::new(engine),
            health: store,
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(http_port = port, "cfdi-service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        tracing::info!(
            service = "cfdi-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, router(self.state)).await
    }
}
