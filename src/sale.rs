//! Sale Status Aggregator
//! 全購入レコードからセール全体ビューとユーザー別ビューを算出する

use std::collections::HashSet;

use rust_decimal::Decimal;

use crate::models::{PurchaseRecord, SaleGlobalView, UserPurchaseWallet, UserSaleView};

/// 全レコードの純粋な畳み込み。I/O なし・キャッシュなし。
/// user_id が None の場合、ユーザー別ビューは空/ゼロを返す
pub fn compute_sale_status(
    records: &[PurchaseRecord],
    user_id: Option<&str>,
    cutoff_ms: i64,
) -> (SaleGlobalView, UserSaleView) {
    let total_purchased_tokens: Decimal = records.iter().map(|r| r.token_amount).sum();
    let total_purchased_quote: Decimal = records.iter().map(|r| r.quote_amount).sum();
    let buyers: HashSet<&str> = records.iter().map(|r| r.user_id.as_str()).collect();

    let global = SaleGlobalView {
        total_purchased_tokens,
        total_purchased_quote,
        total_buyers: buyers.len(),
    };

    let user = match user_id {
        None => UserSaleView::default(),
        Some(uid) => {
            let mut own: Vec<&PurchaseRecord> =
                records.iter().filter(|r| r.user_id == uid).collect();
            // 表示順を安定させるため作成時刻の降順に並べる
            own.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));

            let total_purchased: Decimal = own.iter().map(|r| r.token_amount).sum();
            // 未クレームかつベスティング締切より前に作成された分だけがクレーム可能
            let claimable_amount: Decimal = own
                .iter()
                .filter(|r| !r.is_claimed && r.created_at_ms < cutoff_ms)
                .map(|r| r.token_amount)
                .sum();

            let purchase_wallets = own
                .iter()
                .map(|r| UserPurchaseWallet {
                    wallet_address: r.wallet_address.clone(),
                    token_amount: r.token_amount,
                    created_at_ms: r.created_at_ms,
                    is_claimed: r.is_claimed,
                })
                .collect();

            UserSaleView {
                purchase_wallets,
                total_purchased,
                claimable_amount,
            }
        }
    };

    (global, user)
}

// ========================================
// Tests
// ========================================

#[cfg(test)]
mod tests {
    use super::*;

    const CUTOFF_MS: i64 = 1_000_000;

    fn record(
        user_id: &str,
        token_amount: i64,
        created_at_ms: i64,
        is_claimed: bool,
    ) -> PurchaseRecord {
        PurchaseRecord {
            purchase_id: format!("p-{}-{}", user_id, created_at_ms),
            user_id: user_id.to_string(),
            wallet_address: format!("0xwallet-{}", user_id),
            token_amount: Decimal::from(token_amount),
            quote_amount: Decimal::from(token_amount) / Decimal::from(2),
            transaction_hash: format!("0xtx-{}-{}", user_id, created_at_ms),
            is_claimed,
            created_at_ms,
        }
    }

    #[test]
    fn totals_and_distinct_buyers() {
        let records = vec![
            record("alice", 100, 10, false),
            record("bob", 200, 20, false),
            record("alice", 300, 30, false),
        ];

        let (global, _) = compute_sale_status(&records, None, CUTOFF_MS);

        assert_eq!(global.total_purchased_tokens, Decimal::from(600));
        assert_eq!(global.total_purchased_quote, Decimal::from(300));
        assert_eq!(global.total_buyers, 2);
    }

    #[test]
    fn user_view_only_contains_own_records() {
        let records = vec![
            record("alice", 100, 10, false),
            record("bob", 200, 20, false),
            record("alice", 300, 30, false),
        ];

        let (_, user) = compute_sale_status(&records, Some("alice"), CUTOFF_MS);

        assert_eq!(user.purchase_wallets.len(), 2);
        assert!(user
            .purchase_wallets
            .iter()
            .all(|w| w.wallet_address == "0xwallet-alice"));
        assert_eq!(user.total_purchased, Decimal::from(400));
    }

    #[test]
    fn user_history_sorted_by_created_at_descending() {
        let records = vec![
            record("alice", 100, 10, false),
            record("alice", 300, 30, false),
            record("alice", 200, 20, false),
        ];

        let (_, user) = compute_sale_status(&records, Some("alice"), CUTOFF_MS);

        let order: Vec<i64> = user.purchase_wallets.iter().map(|w| w.created_at_ms).collect();
        assert_eq!(order, vec![30, 20, 10]);
    }

    #[test]
    fn claimable_excludes_claimed_and_post_cutoff() {
        let records = vec![
            record("alice", 100, CUTOFF_MS - 100, false),
            record("alice", 50, CUTOFF_MS - 50, true),
            record("alice", 30, CUTOFF_MS + 100, false),
        ];

        let (_, user) = compute_sale_status(&records, Some("alice"), CUTOFF_MS);

        assert_eq!(user.claimable_amount, Decimal::from(100));
        assert_eq!(user.total_purchased, Decimal::from(180));
    }

    #[test]
    fn empty_records_and_no_user_yield_zero_views() {
        let (global, user) = compute_sale_status(&[], None, CUTOFF_MS);

        assert_eq!(global.total_purchased_tokens, Decimal::ZERO);
        assert_eq!(global.total_purchased_quote, Decimal::ZERO);
        assert_eq!(global.total_buyers, 0);
        assert!(user.purchase_wallets.is_empty());
        assert_eq!(user.total_purchased, Decimal::ZERO);
        assert_eq!(user.claimable_amount, Decimal::ZERO);
    }

    #[test]
    fn unknown_user_yields_empty_user_view() {
        let records = vec![record("alice", 100, 10, false)];

        let (global, user) = compute_sale_status(&records, Some("carol"), CUTOFF_MS);

        assert_eq!(global.total_buyers, 1);
        assert!(user.purchase_wallets.is_empty());
        assert_eq!(user.total_purchased, Decimal::ZERO);
        assert_eq!(user.claimable_amount, Decimal::ZERO);
    }
}
