//! API server wiring: routes, middleware stack, and the metrics
//! exporter.

use std::net::SocketAddr;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use sacco_core::config::AppConfig;

use crate::middleware::bind_context;
use crate::rest::ApiState;
use crate::{admin_rest, members_rest, rest};

/// Build the full router over `state`. Separated from serving so tests
/// can drive it without a listener.
pub fn router(state: ApiState) -> Router {
    Router::new()
        // Authentication and context
        .route("/v1/auth/login", post(rest::handle_login))
        .route("/v1/auth/logout", post(rest::handle_logout))
        .route("/v1/context", get(rest::handle_context))
        // Tenant-scoped member registry
        .route(
            "/v1/members",
            get(members_rest::list_members).post(members_rest::register_member),
        )
        .route("/v1/members/:id", get(members_rest::get_member))
        // Platform administration
        .route(
            "/v1/admin/tenants",
            get(admin_rest::list_tenants).post(admin_rest::create_tenant),
        )
        .route(
            "/v1/admin/tenants/:id/status",
            post(admin_rest::set_tenant_status),
        )
        .route(
            "/v1/admin/tenants/:id/usage",
            get(admin_rest::tenant_usage),
        )
        .route("/v1/admin/context/switch", post(admin_rest::switch_context))
        .route("/v1/admin/overview", get(admin_rest::platform_overview))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(from_fn_with_state(state.clone(), bind_context))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Main API server: HTTP surface plus the Prometheus exporter.
pub struct ApiServer {
    config: AppConfig,
    state: ApiState,
}

impl ApiServer {
    pub fn new(config: AppConfig, state: ApiState) -> Self {
        Self { config, state }
    }

    /// Start the HTTP server. Runs until the process exits.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = router(self.state.clone());
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Start the metrics exporter on its own port.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;
        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
