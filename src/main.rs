use axum::{
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

mod chain;
mod db;
mod handlers;
mod models;
mod purchase;
mod sale;

use crate::chain::{ChainClient, EthChainClient};
use crate::db::{init_db, PurchaseStore, SqlitePurchaseStore};
use crate::purchase::SaleConfig;

// ========================================
// 設定
// ========================================

struct AppConfig {
    db_path: String,
    listen_addr: String,
    rpc_url: String,
    chain_id: u64,
    settlement_token: String,
    deposit_address: String,
    signer_key: Option<String>,
    token_price: Decimal,
    min_purchase: Decimal,
    max_purchase: Decimal,
    vesting_cutoff: DateTime<Utc>,
}

impl AppConfig {
    /// 環境変数から読み込み（未設定はデフォルト値）
    fn from_env() -> anyhow::Result<Self> {
        let vesting_cutoff = env_or("SALE_VESTING_CUTOFF", "2026-01-01T00:00:00Z");
        Ok(Self {
            db_path: env_or("SALE_DB_PATH", "./sale.db"),
            listen_addr: env_or("SALE_LISTEN_ADDR", "0.0.0.0:3000"),
            rpc_url: env_or("SALE_RPC_URL", "http://127.0.0.1:8545"),
            chain_id: env_or("SALE_CHAIN_ID", "1").parse()?,
            settlement_token: env_or(
                "SALE_SETTLEMENT_TOKEN",
                "0x0000000000000000000000000000000000000000",
            ),
            deposit_address: env_or(
                "SALE_DEPOSIT_ADDRESS",
                "0x0000000000000000000000000000000000000000",
            ),
            signer_key: std::env::var("SALE_SIGNER_KEY").ok(),
            token_price: env_or("SALE_TOKEN_PRICE", "0.50").parse()?,
            min_purchase: env_or("SALE_MIN_PURCHASE", "100").parse()?,
            max_purchase: env_or("SALE_MAX_PURCHASE", "100000").parse()?,
            vesting_cutoff: DateTime::parse_from_rfc3339(&vesting_cutoff)?.with_timezone(&Utc),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

// ========================================
// アプリ状態
// ========================================

pub struct AppState {
    pub store: Arc<dyn PurchaseStore>,
    pub chain: Arc<dyn ChainClient>,
    pub config: SaleConfig,
    /// 購入試行はプロセス内で常に1件ずつ
    pub purchase_lock: tokio::sync::Mutex<()>,
}

// ========================================
// レスポンス型
// ========================================

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
}

// ========================================
// ハンドラ
// ========================================

/// ヘルスチェック
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "token-sale-api".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ========================================
// メイン
// ========================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ログ初期化
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = AppConfig::from_env()?;

    let db = init_db(&config.db_path).await?;

    let chain = EthChainClient::new(
        &config.rpc_url,
        config.chain_id,
        &config.settlement_token,
        config.signer_key.as_deref(),
    )?;
    if config.signer_key.is_none() {
        info!("No signer key configured - purchases will require a connected wallet");
    }

    let sale_config = SaleConfig {
        deposit_address: config.deposit_address.clone(),
        token_price: config.token_price,
        min_purchase: config.min_purchase,
        max_purchase: config.max_purchase,
        vesting_cutoff: config.vesting_cutoff,
    };

    let state = Arc::new(AppState {
        store: Arc::new(SqlitePurchaseStore::new(db)),
        chain: Arc::new(chain),
        config: sale_config,
        purchase_lock: tokio::sync::Mutex::new(()),
    });

    // ルーター構築
    let app = Router::new()
        .route("/api/health", get(health_check))
        .route("/api/sale/status", get(handlers::sale::sale_status))
        .route("/api/sale/balance", get(handlers::sale::wallet_balance))
        .route("/api/sale/purchases", get(handlers::sale::list_purchases))
        .route("/api/sale/purchase", post(handlers::purchases::submit_purchase))
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!("🚀 Token Sale API Server listening on {}", config.listen_addr);
    info!(
        "💰 Sale config: price={} min={} max={} cutoff={}",
        config.token_price, config.min_purchase, config.max_purchase, config.vesting_cutoff
    );

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
