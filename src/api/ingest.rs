use super::error::{ApiError, Result};
use super::AppState;
use crate::index::{IndexEvent, PublisherId, Tick, TickKind, ValueDomain};
use crate::types::{MarketId, Price, Timestamp};
use axum::{extract::State, routing::post, Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub secret: String,
    pub chain: String,
    pub market: String,
    // seconds or milliseconds
    pub time: i64,
    pub value: Decimal,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub ok: bool,
    pub market: MarketId,
    pub time: Timestamp,
    pub value: Price,
    pub ticks: usize,
}

// compares every byte so response time says nothing about the secret
fn secret_matches(expected: &str, given: &str) -> bool {
    let (a, b) = (expected.as_bytes(), given.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// every write endpoint shares the one operator secret; none configured means no writes
pub(super) fn authorize(state: &AppState, given: &str) -> Result<()> {
    let authorized = state
        .config
        .ingest_secret
        .as_deref()
        .is_some_and(|expected| secret_matches(expected, given));
    if authorized {
        Ok(())
    } else {
        Err(ApiError::Unauthorized("invalid secret".to_string()))
    }
}

/// POST /api/ingest
async fn ingest(State(state): State<AppState>, Json(req): Json<IngestRequest>) -> Result<Json<IngestResponse>> {
    if let Err(e) = authorize(&state, &req.secret) {
        tracing::warn!(chain = %req.chain, market = %req.market, "ingest rejected: bad secret");
        return Err(e);
    }

    if req.chain.trim().is_empty() || req.market.trim().is_empty() {
        return Err(ApiError::BadRequest("chain and market are required".to_string()));
    }
    if req.time <= 0 {
        return Err(ApiError::BadRequest(format!("invalid time {}", req.time)));
    }
    let value = Price::from_decimal(req.value)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid value {}", req.value)))?;

    let market = MarketId::qualified(&req.chain, &req.market);
    let time = Timestamp::from_secs_or_millis(req.time);
    let domain = if state.config.percentage_markets.contains(&market) {
        ValueDomain::Percentage
    } else {
        ValueDomain::Positive
    };

    state.store.claim_for_ingest(&market, domain)?;
    state
        .store
        .publish(&PublisherId::ingest(), Tick::new(market.clone(), time, value, TickKind::Ingested))?;

    if let Some(meta) = req.meta {
        state.store.record_event(IndexEvent {
            timestamp: time,
            market: market.clone(),
            value: Some(value),
            meta,
        })?;
    }

    tracing::debug!(%market, %time, %value, "tick ingested");

    Ok(Json(IngestResponse {
        ok: true,
        ticks: state.store.tick_count(&market),
        market,
        time,
        value,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/ingest", post(ingest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_comparison() {
        assert!(secret_matches("hunter2", "hunter2"));
        assert!(!secret_matches("hunter2", "hunter3"));
        assert!(!secret_matches("hunter2", "hunter"));
        assert!(!secret_matches("hunter2", ""));
    }
}
