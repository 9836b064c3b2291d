use super::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    markets: usize,
    ledger_head: u64,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        markets: state.store.markets().len(),
        ledger_head: state.ledger.head().await,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/health", get(health))
}
