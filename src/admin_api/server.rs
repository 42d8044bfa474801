use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::admin_api::routes::AppState;
use crate::admin_api::{auth, routes};

/// Admin HTTP API, bound to a separate (typically loopback) address from the
/// front server.
pub struct AdminApiServer {
    state: AppState,
    bind_addr: String,
}

impl AdminApiServer {
    pub fn new(state: AppState, bind_addr: String) -> Self {
        Self { state, bind_addr }
    }

    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let state = self.state.clone();
        let api_key = state.api_key.clone();

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let app = Router::new()
            .route("/api/status", get(routes::get_status))
            .route("/api/block", post(routes::block_ip))
            .route("/api/unblock", post(routes::unblock_ip))
            .route("/api/blocked", get(routes::get_blocked))
            .route("/api/suspicious", get(routes::get_suspicious))
            .route("/api/report", get(routes::get_report))
            .route("/api/detect", post(routes::run_detection))
            .layer(middleware::from_fn_with_state(
                api_key,
                auth::auth_middleware,
            ))
            .layer(cors)
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(&self.bind_addr).await?;
        info!("Admin API listening on {}", self.bind_addr);
        axum::serve(listener, app).await?;

        Ok(())
    }
}
