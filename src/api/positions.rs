//! Ledger endpoints.
//!
//! Writes carry the operator secret and an explicit account id; the service trusts
//! whoever holds the secret to speak for that account. Every write goes through the
//! shared ledger, so http calls and the keeper are sequenced against each other.

use super::error::Result;
use super::ingest::authorize;
use super::AppState;
use crate::conditional::StopLevels;
use crate::ledger::{CloseResult, LiquidationResult, OpenResult};
use crate::position::{Position, Settlement};
use crate::types::{AccountId, Amount, Price, Side};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct OpenRequest {
    pub secret: String,
    pub account: AccountId,
    pub side: Side,
    pub leverage: u32,
    pub deposit: Amount,
}

#[derive(Debug, Deserialize)]
pub struct AccountRequest {
    pub secret: String,
    pub account: AccountId,
}

/// Absent keeps a threshold, zero clears it, anything else sets it.
#[derive(Debug, Deserialize)]
pub struct StopsRequest {
    pub secret: String,
    pub account: AccountId,
    #[serde(default)]
    pub stop_loss: Option<Price>,
    #[serde(default)]
    pub take_profit: Option<Price>,
}

#[derive(Debug, Deserialize)]
pub struct CallerRequest {
    pub secret: String,
    pub caller: AccountId,
    pub account: AccountId,
}

#[derive(Debug, Deserialize)]
pub struct FundRequest {
    pub secret: String,
    pub amount: Amount,
}

#[derive(Debug, Serialize)]
pub struct PositionView {
    pub account: AccountId,
    pub position: Option<Position>,
    // what closing now would pay, when an index value is available
    pub estimate: Option<Settlement>,
    pub credit: Amount,
}

#[derive(Debug, Serialize)]
pub struct PoolView {
    pub pool: Amount,
    pub treasury: Amount,
    pub open_interest: usize,
    pub head: u64,
}

#[derive(Debug, Serialize)]
pub struct WithdrawResponse {
    pub account: AccountId,
    pub withdrawn: Amount,
}

/// POST /api/positions/open
async fn open(State(state): State<AppState>, Json(req): Json<OpenRequest>) -> Result<Json<OpenResult>> {
    authorize(&state, &req.secret)?;
    let opened = state
        .ledger
        .open(req.account, req.side, req.leverage, req.deposit)
        .await?;
    Ok(Json(opened))
}

/// POST /api/positions/close
async fn close(State(state): State<AppState>, Json(req): Json<AccountRequest>) -> Result<Json<CloseResult>> {
    authorize(&state, &req.secret)?;
    Ok(Json(state.ledger.close(req.account).await?))
}

/// POST /api/positions/stops
async fn set_stops(State(state): State<AppState>, Json(req): Json<StopsRequest>) -> Result<Json<StopLevels>> {
    authorize(&state, &req.secret)?;
    let levels = state
        .ledger
        .set_stops_raw(
            req.account,
            req.stop_loss.map(|p| p.raw()),
            req.take_profit.map(|p| p.raw()),
        )
        .await?;
    Ok(Json(levels))
}

/// POST /api/positions/liquidate
async fn liquidate(State(state): State<AppState>, Json(req): Json<CallerRequest>) -> Result<Json<LiquidationResult>> {
    authorize(&state, &req.secret)?;
    Ok(Json(state.ledger.liquidate(req.caller, req.account).await?))
}

/// POST /api/positions/trigger
async fn trigger(State(state): State<AppState>, Json(req): Json<CallerRequest>) -> Result<Json<CloseResult>> {
    authorize(&state, &req.secret)?;
    Ok(Json(state.ledger.close_if_triggered(req.caller, req.account).await?))
}

/// GET /api/positions/:account
async fn position(State(state): State<AppState>, Path(account): Path<u64>) -> Json<PositionView> {
    let account = AccountId(account);
    let ledger = state.ledger.lock().await;
    Json(PositionView {
        account,
        position: ledger.position(account).cloned(),
        estimate: ledger.estimate_close(account).ok(),
        credit: ledger.credit_of(account),
    })
}

/// POST /api/credits/withdraw
async fn withdraw(State(state): State<AppState>, Json(req): Json<AccountRequest>) -> Result<Json<WithdrawResponse>> {
    authorize(&state, &req.secret)?;
    let withdrawn = state.ledger.withdraw_credit(req.account).await;
    Ok(Json(WithdrawResponse {
        account: req.account,
        withdrawn,
    }))
}

/// POST /api/pool/fund
async fn fund_pool(State(state): State<AppState>, Json(req): Json<FundRequest>) -> Result<Json<PoolView>> {
    authorize(&state, &req.secret)?;
    state.ledger.fund_pool(req.amount).await?;
    Ok(Json(pool_view(&state).await))
}

/// GET /api/pool
async fn pool(State(state): State<AppState>) -> Json<PoolView> {
    Json(pool_view(&state).await)
}

async fn pool_view(state: &AppState) -> PoolView {
    let ledger = state.ledger.lock().await;
    PoolView {
        pool: ledger.pool_balance(),
        treasury: ledger.treasury_balance(),
        open_interest: ledger.open_interest(),
        head: ledger.head(),
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/positions/open", post(open))
        .route("/api/positions/close", post(close))
        .route("/api/positions/stops", post(set_stops))
        .route("/api/positions/liquidate", post(liquidate))
        .route("/api/positions/trigger", post(trigger))
        .route("/api/positions/:account", get(position))
        .route("/api/credits/withdraw", post(withdraw))
        .route("/api/pool", get(pool))
        .route("/api/pool/fund", post(fund_pool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stops_request_defaults_to_keep() {
        let req: StopsRequest = serde_json::from_value(json!({
            "secret": "s",
            "account": 4,
            "take_profit": "0",
        }))
        .unwrap();
        assert_eq!(req.account, AccountId(4));
        assert!(req.stop_loss.is_none());
        assert_eq!(req.take_profit, Some(Price::ZERO));
    }

    #[test]
    fn open_request_reads_lowercase_side() {
        let req: OpenRequest = serde_json::from_value(json!({
            "secret": "s",
            "account": 1,
            "side": "short",
            "leverage": 10,
            "deposit": 100_000_000,
        }))
        .unwrap();
        assert_eq!(req.side, Side::Short);
        assert_eq!(req.deposit, Amount::new(100_000_000));
    }
}
