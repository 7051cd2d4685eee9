//! Purchase Orchestrator
//! 1回の購入試行を最初から最後まで駆動する:
//! バリデーション → 見積り → ERC-20 transfer → receipt 確認 → 台帳記録

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::chain::ChainClient;
use crate::db::PurchaseStore;
use crate::models::{NewPurchase, PurchaseIntent};

/// セール固定パラメータ（起動時に環境から読み込み、実行中は変更しない）
#[derive(Debug, Clone)]
pub struct SaleConfig {
    pub deposit_address: String,
    pub token_price: Decimal,
    pub min_purchase: Decimal,
    pub max_purchase: Decimal,
    pub vesting_cutoff: DateTime<Utc>,
}

impl SaleConfig {
    pub fn cutoff_ms(&self) -> i64 {
        self.vesting_cutoff.timestamp_millis()
    }
}

/// チェーンに触れる前に弾く事前条件エラー。
/// intent（モーダル相当）には乗せず、そのまま呼び出し元へ返す
#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error("purchase amount must be a positive number")]
    InvalidAmount,
    #[error("purchase amount must be between {min} and {max} tokens")]
    OutOfBounds { min: Decimal, max: Decimal },
    #[error("no wallet connected")]
    NoSigner,
}

pub struct PurchaseOrchestrator {
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn PurchaseStore>,
    config: SaleConfig,
}

impl PurchaseOrchestrator {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn PurchaseStore>,
        config: SaleConfig,
    ) -> Self {
        Self {
            chain,
            store,
            config,
        }
    }

    /// 1回の購入試行。terminal な intent（success / error / rejected）を返す。
    /// 自動リトライはなし。失敗はその試行限りで、再送はユーザー操作による
    pub async fn execute(
        &self,
        user_id: &str,
        amount: Decimal,
    ) -> Result<PurchaseIntent, PurchaseError> {
        // バリデーション（チェーン呼び出しより前）
        if amount <= Decimal::ZERO {
            return Err(PurchaseError::InvalidAmount);
        }
        if amount < self.config.min_purchase || amount > self.config.max_purchase {
            return Err(PurchaseError::OutOfBounds {
                min: self.config.min_purchase,
                max: self.config.max_purchase,
            });
        }
        let wallet_address = self.chain.signer_address().ok_or(PurchaseError::NoSigner)?;

        let quote_amount = amount * self.config.token_price;
        let mut intent = PurchaseIntent::processing(amount, quote_amount);

        info!(
            "Purchase started: user={} amount={} quote={}",
            user_id, amount, quote_amount
        );

        let receipt = match self
            .chain
            .transfer_settlement(&self.config.deposit_address, quote_amount)
            .await
        {
            Ok(Some(receipt)) => receipt,
            Ok(None) => {
                // receipt なしで確認待ちが終わった場合は processing のまま放置せず
                // 明示的にエラー終了させる
                warn!("Transfer returned no receipt: user={}", user_id);
                intent.fail("transaction dropped: no receipt returned".to_string());
                return Ok(intent);
            }
            Err(e) => {
                let message = e.to_string();
                if message.to_lowercase().contains("user rejected") {
                    info!("Signature rejected by user: user={}", user_id);
                    intent.reject(message);
                } else {
                    warn!("Transfer failed: user={} err={}", user_id, message);
                    intent.fail(message);
                }
                return Ok(intent);
            }
        };

        // 着金確認済み。ここで初めて台帳に行を作る
        let new = NewPurchase {
            user_id: user_id.to_string(),
            wallet_address,
            token_amount: amount,
            quote_amount,
            transaction_hash: receipt.tx_hash.clone(),
        };

        match self.store.insert_purchase(&new).await {
            Ok(row) => {
                info!(
                    "Purchase completed: purchase_id={} tx={}",
                    row.purchase_id, receipt.tx_hash
                );
                intent.succeed(receipt.tx_hash);
            }
            Err(e) => {
                // 転送は既に確定しているのに記録が残っていない状態。
                // 手動照合のため tx hash を必ずログに残す
                error!(
                    "Purchase record insert failed after on-chain success: tx={} err={}",
                    receipt.tx_hash, e
                );
                intent.fail(format!("failed to record purchase: {}", e));
            }
        }

        Ok(intent)
    }
}

// ========================================
// Tests
// ========================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::chain::{ChainError, TransferReceipt};
    use crate::models::{IntentStatus, Purchase};

    enum TransferBehavior {
        Receipt(String),
        NoReceipt,
        Fail(String),
    }

    struct MockChain {
        behavior: TransferBehavior,
        signer: Option<String>,
        transfer_calls: AtomicUsize,
        transfer_done: Arc<AtomicBool>,
    }

    impl MockChain {
        fn new(behavior: TransferBehavior, transfer_done: Arc<AtomicBool>) -> Self {
            Self {
                behavior,
                signer: Some("0x00000000000000000000000000000000000000aa".to_string()),
                transfer_calls: AtomicUsize::new(0),
                transfer_done,
            }
        }
    }

    #[async_trait]
    impl ChainClient for MockChain {
        fn signer_address(&self) -> Option<String> {
            self.signer.clone()
        }

        async fn wallet_balance(&self, _address: &str) -> Result<Decimal, ChainError> {
            Ok(Decimal::ZERO)
        }

        async fn transfer_settlement(
            &self,
            _to: &str,
            _amount: Decimal,
        ) -> Result<Option<TransferReceipt>, ChainError> {
            self.transfer_calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                TransferBehavior::Receipt(hash) => {
                    self.transfer_done.store(true, Ordering::SeqCst);
                    Ok(Some(TransferReceipt {
                        tx_hash: hash.clone(),
                        block_number: Some(1),
                    }))
                }
                TransferBehavior::NoReceipt => Ok(None),
                TransferBehavior::Fail(message) => Err(ChainError::Call(message.clone())),
            }
        }
    }

    struct MockStore {
        transfer_done: Arc<AtomicBool>,
        insert_calls: AtomicUsize,
        inserted: Mutex<Vec<NewPurchase>>,
        fail_insert: bool,
    }

    impl MockStore {
        fn new(transfer_done: Arc<AtomicBool>) -> Self {
            Self {
                transfer_done,
                insert_calls: AtomicUsize::new(0),
                inserted: Mutex::new(Vec::new()),
                fail_insert: false,
            }
        }
    }

    #[async_trait]
    impl PurchaseStore for MockStore {
        async fn insert_purchase(&self, new: &NewPurchase) -> anyhow::Result<Purchase> {
            // 転送確定前に insert が呼ばれたら順序違反
            assert!(
                self.transfer_done.load(Ordering::SeqCst),
                "insert_purchase called before transfer resolved"
            );
            self.insert_calls.fetch_add(1, Ordering::SeqCst);
            self.inserted.lock().unwrap().push(new.clone());
            if self.fail_insert {
                anyhow::bail!("insert failed");
            }
            Ok(Purchase {
                purchase_id: "p-1".to_string(),
                user_id: new.user_id.clone(),
                wallet_address: new.wallet_address.clone(),
                token_amount: new.token_amount.to_string(),
                quote_amount: new.quote_amount.to_string(),
                transaction_hash: new.transaction_hash.clone(),
                is_claimed: 0,
                created_at_ms: 0,
            })
        }

        async fn all_purchases(&self) -> anyhow::Result<Vec<Purchase>> {
            Ok(Vec::new())
        }
    }

    fn test_config() -> SaleConfig {
        SaleConfig {
            deposit_address: "0x00000000000000000000000000000000000000bb".to_string(),
            token_price: Decimal::new(5, 1), // 0.5
            min_purchase: Decimal::from(100),
            max_purchase: Decimal::from(100_000),
            vesting_cutoff: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn setup(behavior: TransferBehavior) -> (Arc<MockChain>, Arc<MockStore>, PurchaseOrchestrator) {
        let done = Arc::new(AtomicBool::new(false));
        let chain = Arc::new(MockChain::new(behavior, done.clone()));
        let store = Arc::new(MockStore::new(done));
        let orchestrator =
            PurchaseOrchestrator::new(chain.clone(), store.clone(), test_config());
        (chain, store, orchestrator)
    }

    #[tokio::test]
    async fn out_of_bounds_amount_never_reaches_chain() {
        let (chain, store, orchestrator) = setup(TransferBehavior::Receipt("0xabc".into()));

        let below = orchestrator.execute("alice", Decimal::from(50)).await;
        assert!(matches!(below, Err(PurchaseError::OutOfBounds { .. })));

        let above = orchestrator.execute("alice", Decimal::from(200_000)).await;
        assert!(matches!(above, Err(PurchaseError::OutOfBounds { .. })));

        assert_eq!(chain.transfer_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.insert_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_positive_amount_is_invalid() {
        let (chain, _, orchestrator) = setup(TransferBehavior::Receipt("0xabc".into()));

        let result = orchestrator.execute("alice", Decimal::ZERO).await;
        assert!(matches!(result, Err(PurchaseError::InvalidAmount)));
        assert_eq!(chain.transfer_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_signer_halts_before_chain() {
        let done = Arc::new(AtomicBool::new(false));
        let mut chain = MockChain::new(TransferBehavior::Receipt("0xabc".into()), done.clone());
        chain.signer = None;
        let chain = Arc::new(chain);
        let store = Arc::new(MockStore::new(done));
        let orchestrator =
            PurchaseOrchestrator::new(chain.clone(), store.clone(), test_config());

        let result = orchestrator.execute("alice", Decimal::from(500)).await;
        assert!(matches!(result, Err(PurchaseError::NoSigner)));
        assert_eq!(chain.transfer_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn user_rejection_is_distinct_from_chain_error() {
        let (_, store, orchestrator) =
            setup(TransferBehavior::Fail("user rejected transaction".into()));

        let intent = orchestrator
            .execute("alice", Decimal::from(500))
            .await
            .unwrap();
        assert_eq!(intent.status, IntentStatus::Rejected);
        assert_eq!(intent.error.as_deref(), Some("user rejected transaction"));
        assert_eq!(store.insert_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn chain_error_message_is_preserved_verbatim() {
        let (_, store, orchestrator) =
            setup(TransferBehavior::Fail("insufficient funds for gas".into()));

        let intent = orchestrator
            .execute("alice", Decimal::from(500))
            .await
            .unwrap();
        assert_eq!(intent.status, IntentStatus::Error);
        assert_eq!(intent.error.as_deref(), Some("insufficient funds for gas"));
        assert_eq!(store.insert_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_receipt_fails_without_persisting() {
        let (_, store, orchestrator) = setup(TransferBehavior::NoReceipt);

        let intent = orchestrator
            .execute("alice", Decimal::from(500))
            .await
            .unwrap();
        assert_eq!(intent.status, IntentStatus::Error);
        assert_eq!(store.insert_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_purchase_records_after_confirmation() {
        // 価格 0.5 で 2000 トークン → 見積り 1000
        let (chain, store, orchestrator) = setup(TransferBehavior::Receipt("0xabc".into()));

        let intent = orchestrator
            .execute("alice", Decimal::from(2000))
            .await
            .unwrap();

        assert_eq!(intent.status, IntentStatus::Success);
        assert_eq!(intent.tx_hash.as_deref(), Some("0xabc"));
        assert_eq!(intent.quote_amount, Decimal::from(1000));

        assert_eq!(chain.transfer_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.insert_calls.load(Ordering::SeqCst), 1);

        let inserted = store.inserted.lock().unwrap();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].token_amount, Decimal::from(2000));
        assert_eq!(inserted[0].quote_amount, Decimal::from(1000));
        assert_eq!(inserted[0].transaction_hash, "0xabc");
    }

    #[tokio::test]
    async fn insert_failure_after_settlement_surfaces_error() {
        let done = Arc::new(AtomicBool::new(false));
        let chain = Arc::new(MockChain::new(
            TransferBehavior::Receipt("0xabc".into()),
            done.clone(),
        ));
        let mut store = MockStore::new(done);
        store.fail_insert = true;
        let store = Arc::new(store);
        let orchestrator =
            PurchaseOrchestrator::new(chain.clone(), store.clone(), test_config());

        let intent = orchestrator
            .execute("alice", Decimal::from(500))
            .await
            .unwrap();

        assert_eq!(intent.status, IntentStatus::Error);
        assert!(intent
            .error
            .as_deref()
            .unwrap()
            .contains("failed to record purchase"));
        // 転送自体は確定済み
        assert_eq!(chain.transfer_calls.load(Ordering::SeqCst), 1);
    }
}
