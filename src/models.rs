//! Data Models
//! Purchase, SaleGlobalView, UserSaleView などのデータ構造定義

use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ========================================
// Purchase
// ========================================

/// Purchase (DB row)
/// 金額カラムは TEXT で保持し、読み出し時に Decimal へ変換する
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Purchase {
    pub purchase_id: String,
    pub user_id: String,
    pub wallet_address: String,
    pub token_amount: String,
    pub quote_amount: String,
    pub transaction_hash: String,
    pub is_claimed: i32,
    pub created_at_ms: i64,
}

/// Purchase（集計用・金額を Decimal に変換済み）
#[derive(Debug, Clone)]
pub struct PurchaseRecord {
    pub purchase_id: String,
    pub user_id: String,
    pub wallet_address: String,
    pub token_amount: Decimal,
    pub quote_amount: Decimal,
    pub transaction_hash: String,
    pub is_claimed: bool,
    pub created_at_ms: i64,
}

impl TryFrom<&Purchase> for PurchaseRecord {
    type Error = anyhow::Error;

    fn try_from(row: &Purchase) -> Result<Self, Self::Error> {
        Ok(Self {
            purchase_id: row.purchase_id.clone(),
            user_id: row.user_id.clone(),
            wallet_address: row.wallet_address.clone(),
            token_amount: row
                .token_amount
                .parse()
                .with_context(|| format!("invalid token_amount in purchase {}", row.purchase_id))?,
            quote_amount: row
                .quote_amount
                .parse()
                .with_context(|| format!("invalid quote_amount in purchase {}", row.purchase_id))?,
            transaction_hash: row.transaction_hash.clone(),
            is_claimed: row.is_claimed != 0,
            created_at_ms: row.created_at_ms,
        })
    }
}

/// Purchase 挿入ペイロード（purchase_id と created_at_ms は保存時に採番）
#[derive(Debug, Clone)]
pub struct NewPurchase {
    pub user_id: String,
    pub wallet_address: String,
    pub token_amount: Decimal,
    pub quote_amount: Decimal,
    pub transaction_hash: String,
}

// ========================================
// Sale Views（集計結果）
// ========================================

/// セール全体の集計ビュー（毎回全レコードから再計算・キャッシュしない）
#[derive(Debug, Clone, Serialize)]
pub struct SaleGlobalView {
    pub total_purchased_tokens: Decimal,
    pub total_purchased_quote: Decimal,
    pub total_buyers: usize,
}

/// ユーザー購入履歴の1件分の表示用射影
#[derive(Debug, Clone, Serialize)]
pub struct UserPurchaseWallet {
    pub wallet_address: String,
    pub token_amount: Decimal,
    pub created_at_ms: i64,
    pub is_claimed: bool,
}

/// ユーザー別の集計ビュー
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserSaleView {
    pub purchase_wallets: Vec<UserPurchaseWallet>,
    pub total_purchased: Decimal,
    pub claimable_amount: Decimal,
}

// ========================================
// Purchase Intent（1回の購入試行の結果）
// ========================================

/// 購入試行のステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
    Processing,
    Success,
    Error,
    Rejected,
}

/// 購入試行の結果（永続化しない・1試行につき terminal 遷移は1回だけ）
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseIntent {
    pub token_amount: Decimal,
    pub quote_amount: Decimal,
    pub status: IntentStatus,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
}

impl PurchaseIntent {
    pub fn processing(token_amount: Decimal, quote_amount: Decimal) -> Self {
        Self {
            token_amount,
            quote_amount,
            status: IntentStatus::Processing,
            tx_hash: None,
            error: None,
        }
    }

    pub fn succeed(&mut self, tx_hash: String) {
        self.status = IntentStatus::Success;
        self.tx_hash = Some(tx_hash);
    }

    /// ウォレット側でユーザーが署名を拒否した場合
    pub fn reject(&mut self, message: String) {
        self.status = IntentStatus::Rejected;
        self.error = Some(message);
    }

    pub fn fail(&mut self, message: String) {
        self.status = IntentStatus::Error;
        self.error = Some(message);
    }
}

// ========================================
// Requests
// ========================================

/// 購入リクエスト
#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub user_id: String,
    pub token_amount: Decimal,
}

// ========================================
// Tests
// ========================================
