//! Database Module
//! SQLite を使用した purchases（購入台帳）の管理

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use tracing::info;
use uuid::Uuid;

use crate::models::{NewPurchase, Purchase};

/// データベース接続プール
pub type DbPool = Pool<Sqlite>;

/// データベースを初期化
pub async fn init_db(db_path: &str) -> Result<DbPool> {
    // SQLite接続文字列
    let db_url = format!("sqlite:{}?mode=rwc", db_path);

    info!("Initializing database: {}", db_path);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    // スキーマ作成
    create_schema(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

/// スキーマ作成
async fn create_schema(pool: &DbPool) -> Result<()> {
    // purchases テーブル（オンチェーン決済確認後にのみ行が作られる）
    sqlx::query(r#"
        CREATE TABLE IF NOT EXISTS purchases (
            purchase_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            wallet_address TEXT NOT NULL,
            token_amount TEXT NOT NULL,
            quote_amount TEXT NOT NULL,
            transaction_hash TEXT NOT NULL,
            is_claimed INTEGER NOT NULL DEFAULT 0,
            created_at_ms INTEGER NOT NULL
        )
    "#)
    .execute(pool)
    .await?;

    // transaction_hash は転送1件につき一意
    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_purchases_tx_hash ON purchases(transaction_hash)")
        .execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_purchases_user ON purchases(user_id)")
        .execute(pool).await?;

    Ok(())
}

// ========================================
// Purchase Store
// ========================================

/// 購入台帳への永続化口（テストではモックに差し替える）
#[async_trait]
pub trait PurchaseStore: Send + Sync {
    async fn insert_purchase(&self, new: &NewPurchase) -> Result<Purchase>;
    async fn all_purchases(&self) -> Result<Vec<Purchase>>;
}

/// SQLite 実装
pub struct SqlitePurchaseStore {
    pool: DbPool,
}

impl SqlitePurchaseStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PurchaseStore for SqlitePurchaseStore {
    async fn insert_purchase(&self, new: &NewPurchase) -> Result<Purchase> {
        let purchase_id = Uuid::new_v4().to_string();
        let now_ms = chrono::Utc::now().timestamp_millis();

        sqlx::query(r#"
            INSERT INTO purchases (
                purchase_id, user_id, wallet_address,
                token_amount, quote_amount, transaction_hash,
                is_claimed, created_at_ms
            ) VALUES (?, ?, ?, ?, ?, ?, 0, ?)
        "#)
        .bind(&purchase_id)
        .bind(&new.user_id)
        .bind(&new.wallet_address)
        .bind(new.token_amount.to_string())
        .bind(new.quote_amount.to_string())
        .bind(&new.transaction_hash)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        info!(
            "Purchase recorded: purchase_id={} user={} tx={}",
            purchase_id, new.user_id, new.transaction_hash
        );

        Ok(Purchase {
            purchase_id,
            user_id: new.user_id.clone(),
            wallet_address: new.wallet_address.clone(),
            token_amount: new.token_amount.to_string(),
            quote_amount: new.quote_amount.to_string(),
            transaction_hash: new.transaction_hash.clone(),
            is_claimed: 0,
            created_at_ms: now_ms,
        })
    }

    async fn all_purchases(&self) -> Result<Vec<Purchase>> {
        let rows = sqlx::query_as(
            "SELECT * FROM purchases ORDER BY created_at_ms DESC"
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
