//! Purchase API Handlers
//! /api/sale/purchase エンドポイント - 購入試行の実行

use axum::{extract::State, http::StatusCode, response::Json};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::models::{
    IntentStatus, PurchaseIntent, PurchaseRecord, PurchaseRequest, SaleGlobalView, UserSaleView,
};
use crate::purchase::PurchaseOrchestrator;
use crate::sale::compute_sale_status;
use crate::AppState;

// ========================================
// Response Types
// ========================================

#[derive(Serialize)]
pub struct PurchaseSubmitResponse {
    pub success: bool,
    pub intent: PurchaseIntent,
    /// 成功時のみ: 再集計済みのセール全体ビュー
    pub global: Option<SaleGlobalView>,
    /// 成功時のみ: 再集計済みのユーザー別ビュー
    pub user: Option<UserSaleView>,
    /// 成功時のみ: 接続中ウォレットの決済トークン残高
    pub balance: Option<Decimal>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

// ========================================
// Handlers
// ========================================

/// POST /api/sale/purchase - 購入試行を実行
///
/// バリデーション・未接続ウォレットは 400 で即時に返す（intent は作らない）。
/// チェーン以降のエラーは 200 + intent.status で返す
pub async fn submit_purchase(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PurchaseRequest>,
) -> Result<Json<PurchaseSubmitResponse>, (StatusCode, Json<ErrorResponse>)> {
    // 同時実行は1件のみ（送信ボタンの二重押し防止に相当）
    let _guard = state.purchase_lock.lock().await;

    let orchestrator = PurchaseOrchestrator::new(
        state.chain.clone(),
        state.store.clone(),
        state.config.clone(),
    );

    let intent = orchestrator
        .execute(&req.user_id, req.token_amount)
        .await
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?;

    // 成功時はビューとウォレット残高を取り直す。
    // 取り直しの失敗で購入結果自体は失敗にしない
    let mut global = None;
    let mut user = None;
    let mut balance = None;
    if intent.status == IntentStatus::Success {
        match refreshed_views(&state, &req.user_id).await {
            Ok((g, u)) => {
                global = Some(g);
                user = Some(u);
            }
            Err(e) => warn!("View refresh failed after purchase: {}", e),
        }
        if let Some(address) = state.chain.signer_address() {
            match state.chain.wallet_balance(&address).await {
                Ok(b) => balance = Some(b),
                Err(e) => warn!("Balance refresh failed after purchase: {}", e),
            }
        }
    }

    Ok(Json(PurchaseSubmitResponse {
        success: intent.status == IntentStatus::Success,
        intent,
        global,
        user,
        balance,
    }))
}

// ========================================
// Helper Functions
// ========================================

async fn refreshed_views(
    state: &AppState,
    user_id: &str,
) -> anyhow::Result<(SaleGlobalView, UserSaleView)> {
    let rows = state.store.all_purchases().await?;
    let records = rows
        .iter()
        .map(PurchaseRecord::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(compute_sale_status(
        &records,
        Some(user_id),
        state.config.cutoff_ms(),
    ))
}

fn error_response(status: StatusCode, message: String) -> (StatusCode, Json<ErrorResponse>) {
    warn!("API Error: {}", message);
    (status, Json(ErrorResponse { success: false, error: message }))
}
