// 12.0: http surface. ingestion of externally computed ticks, chart data and the ledger endpoints.

pub mod charts;
pub mod error;
pub mod health;
pub mod ingest;
pub mod positions;

use crate::config::ServerConfig;
use crate::index::IndexStore;
use crate::ledger::SharedLedger;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<IndexStore>,
    pub ledger: SharedLedger,
}

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(ingest::router())
        .merge(charts::router())
        .merge(positions::router())
}

/// Full application with middleware and state attached.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router()
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
