//! Sale API Handlers
//! /api/sale エンドポイント - セール状況・残高・購入履歴の取得

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::models::{Purchase, PurchaseRecord, SaleGlobalView, UserPurchaseWallet, UserSaleView};
use crate::sale::compute_sale_status;
use crate::AppState;

// ========================================
// Response Types
// ========================================

#[derive(Serialize)]
pub struct SaleStatusResponse {
    pub success: bool,
    pub global: SaleGlobalView,
    pub user: UserSaleView,
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub success: bool,
    pub address: String,
    pub balance: Decimal,
}

#[derive(Serialize)]
pub struct PurchaseListResponse {
    pub success: bool,
    pub purchases: Vec<UserPurchaseWallet>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

// ========================================
// Query Parameters
// ========================================

#[derive(Debug, Deserialize)]
pub struct SaleStatusQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListPurchasesQuery {
    pub user_id: Option<String>,
}

// ========================================
// Handlers
// ========================================

/// GET /api/sale/status - セール全体＋ユーザー別の集計ビュー
pub async fn sale_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SaleStatusQuery>,
) -> Result<Json<SaleStatusResponse>, (StatusCode, Json<ErrorResponse>)> {
    let rows = state.store.all_purchases().await.map_err(|e| {
        error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {}", e))
    })?;
    let records = rows_to_records(&rows)?;

    let (global, user) = compute_sale_status(
        &records,
        query.user_id.as_deref(),
        state.config.cutoff_ms(),
    );

    Ok(Json(SaleStatusResponse {
        success: true,
        global,
        user,
    }))
}

/// GET /api/sale/balance - 決済トークン残高（address 省略時は接続中ウォレット）
pub async fn wallet_balance(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<BalanceResponse>, (StatusCode, Json<ErrorResponse>)> {
    let address = match query.address.or_else(|| state.chain.signer_address()) {
        Some(address) => address,
        None => {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                "address is required (no wallet connected)".to_string(),
            ));
        }
    };

    let balance = state.chain.wallet_balance(&address).await.map_err(|e| {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Chain error: {}", e),
        )
    })?;

    Ok(Json(BalanceResponse {
        success: true,
        address,
        balance,
    }))
}

/// GET /api/sale/purchases - 購入履歴一覧（user_id で絞り込み可）
pub async fn list_purchases(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListPurchasesQuery>,
) -> Result<Json<PurchaseListResponse>, (StatusCode, Json<ErrorResponse>)> {
    let rows = state.store.all_purchases().await.map_err(|e| {
        error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {}", e))
    })?;
    let records = rows_to_records(&rows)?;

    let mut own: Vec<&PurchaseRecord> = records
        .iter()
        .filter(|r| query.user_id.as_deref().map_or(true, |uid| r.user_id == uid))
        .collect();
    own.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));

    let purchases: Vec<UserPurchaseWallet> = own
        .iter()
        .map(|r| UserPurchaseWallet {
            wallet_address: r.wallet_address.clone(),
            token_amount: r.token_amount,
            created_at_ms: r.created_at_ms,
            is_claimed: r.is_claimed,
        })
        .collect();

    let total = purchases.len();
    Ok(Json(PurchaseListResponse {
        success: true,
        purchases,
        total,
    }))
}

// ========================================
// Helper Functions
// ========================================

fn rows_to_records(
    rows: &[Purchase],
) -> Result<Vec<PurchaseRecord>, (StatusCode, Json<ErrorResponse>)> {
    rows.iter()
        .map(PurchaseRecord::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Corrupt purchase row: {}", e),
            )
        })
}

fn error_response(status: StatusCode, message: String) -> (StatusCode, Json<ErrorResponse>) {
    warn!("API Error: {}", message);
    (status, Json(ErrorResponse { success: false, error: message }))
}
