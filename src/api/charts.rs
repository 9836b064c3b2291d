use super::error::Result;
use super::AppState;
use crate::candles::{aggregate_timeframe, Candle, Timeframe};
use crate::index::IndexEvent;
use crate::types::{MarketId, Timestamp};
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

const DEFAULT_EVENT_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct CandlesQuery {
    pub chain: String,
    pub market: String,
    pub tf: String,
}

#[derive(Debug, Serialize)]
pub struct CandlesResponse {
    pub market: MarketId,
    pub tf: &'static str,
    pub candles: Vec<Candle>,
}

/// GET /api/candles?chain=..&market=..&tf=1h
async fn get_candles(State(state): State<AppState>, Query(q): Query<CandlesQuery>) -> Result<Json<CandlesResponse>> {
    let tf: Timeframe = q.tf.parse()?;
    let market = MarketId::qualified(&q.chain, &q.market);
    let candles = aggregate_timeframe(&state.store.points(&market), tf);
    Ok(Json(CandlesResponse {
        market,
        tf: tf.as_str(),
        candles,
    }))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub chain: String,
    pub market: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub market: MarketId,
    pub events: Vec<IndexEvent>,
}

/// GET /api/events?chain=..&market=..&limit=20
///
/// Events past the retention window expire here; once all have, the last one keeps being served.
async fn get_events(State(state): State<AppState>, Query(q): Query<EventsQuery>) -> Result<Json<EventsResponse>> {
    let market = MarketId::qualified(&q.chain, &q.market);
    let limit = q
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .clamp(1, state.config.max_events.max(1));
    let retention = state.config.event_retention.as_secs() as i64;
    state.store.prune_events(&market, Timestamp::now().plus_secs(-retention));
    let events = state.store.recent_events(&market, limit);
    Ok(Json(EventsResponse { market, events }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/candles", get(get_candles))
        .route("/api/events", get(get_events))
}
