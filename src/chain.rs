//! Chain Client
//! ethers による決済トークン（ERC-20）の残高取得と transfer 実行

use std::sync::Arc;

use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::core::types::Address;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::utils::{format_units, parse_units};
use rust_decimal::Decimal;
use thiserror::Error;

abigen!(
    Erc20,
    r#"[
        function balanceOf(address account) external view returns (uint256)
        function decimals() external view returns (uint8)
        function transfer(address to, uint256 amount) external returns (bool)
    ]"#
);

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain config error: {0}")]
    Config(String),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("{0}")]
    Call(String),
}

/// オンチェーン転送の確認結果
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub tx_hash: String,
    pub block_number: Option<u64>,
}

/// チェーン読み書き口（テストではモックに差し替える）
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// 接続中ウォレットのアドレス。署名鍵が未設定なら None
    fn signer_address(&self) -> Option<String>;

    /// 決済トークンの残高（on-chain decimals でスケール済みの値）
    async fn wallet_balance(&self, address: &str) -> Result<Decimal, ChainError>;

    /// 決済トークンの transfer を送信し、確認（receipt）まで待つ。
    /// receipt が得られないままドロップした場合は Ok(None)
    async fn transfer_settlement(
        &self,
        to: &str,
        amount: Decimal,
    ) -> Result<Option<TransferReceipt>, ChainError>;
}

// ========================================
// ethers 実装
// ========================================

pub struct EthChainClient {
    provider: Arc<Provider<Http>>,
    signer: Option<Arc<SignerMiddleware<Provider<Http>, LocalWallet>>>,
    signer_address: Option<String>,
    token_address: Address,
}

impl EthChainClient {
    pub fn new(
        rpc_url: &str,
        chain_id: u64,
        token_address: &str,
        signer_key: Option<&str>,
    ) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ChainError::Config(format!("invalid rpc url: {}", e)))?;

        let token_address: Address = token_address
            .parse()
            .map_err(|e| ChainError::Config(format!("invalid token address: {}", e)))?;

        let (signer, signer_address) = match signer_key {
            Some(key) => {
                let wallet: LocalWallet = key
                    .parse()
                    .map_err(|e| ChainError::Config(format!("invalid signer key: {}", e)))?;
                let wallet = wallet.with_chain_id(chain_id);
                let address = format!("{:#x}", wallet.address());
                let client = SignerMiddleware::new(provider.clone(), wallet);
                (Some(Arc::new(client)), Some(address))
            }
            None => (None, None),
        };

        Ok(Self {
            provider: Arc::new(provider),
            signer,
            signer_address,
            token_address,
        })
    }
}

#[async_trait]
impl ChainClient for EthChainClient {
    fn signer_address(&self) -> Option<String> {
        self.signer_address.clone()
    }

    async fn wallet_balance(&self, address: &str) -> Result<Decimal, ChainError> {
        let address: Address = address
            .parse()
            .map_err(|e| ChainError::Config(format!("invalid wallet address: {}", e)))?;

        let contract = Erc20::new(self.token_address, self.provider.clone());

        let decimals = contract
            .decimals()
            .call()
            .await
            .map_err(|e| ChainError::Call(e.to_string()))?;
        let raw = contract
            .balance_of(address)
            .call()
            .await
            .map_err(|e| ChainError::Call(e.to_string()))?;

        let formatted = format_units(raw, u32::from(decimals))
            .map_err(|e| ChainError::Call(e.to_string()))?;
        formatted
            .trim()
            .parse()
            .map_err(|e| ChainError::Call(format!("balance parse error: {}", e)))
    }

    async fn transfer_settlement(
        &self,
        to: &str,
        amount: Decimal,
    ) -> Result<Option<TransferReceipt>, ChainError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| ChainError::Config("no signer configured".to_string()))?;

        let to: Address = to
            .parse()
            .map_err(|e| ChainError::Config(format!("invalid deposit address: {}", e)))?;

        let contract = Erc20::new(self.token_address, signer.clone());

        // 人間可読の金額をトークンの on-chain decimals でスケール
        let decimals = contract
            .decimals()
            .call()
            .await
            .map_err(|e| ChainError::Call(e.to_string()))?;
        let raw = parse_units(amount.to_string(), u32::from(decimals))
            .map_err(|e| ChainError::Call(format!("amount scale error: {}", e)))?;

        let call = contract.transfer(to, raw.into());
        let pending = call
            .send()
            .await
            .map_err(|e| ChainError::Call(e.to_string()))?;
        let receipt = pending
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        Ok(receipt.map(|r| TransferReceipt {
            tx_hash: format!("{:#x}", r.transaction_hash),
            block_number: r.block_number.map(|b| b.as_u64()),
        }))
    }
}
