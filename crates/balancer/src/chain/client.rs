//! Chain client — ERC-20 balance reads, transfer broadcast, receipt waits.
//!
//! The execution engine talks to [`ChainClient`]; the EVM implementation
//! signs legacy transactions locally and serializes nonce assignment behind
//! an async mutex so one signing identity never races itself. Broadcast
//! failures are classified transient/terminal here, closest to the raw
//! provider error.

use alloy::consensus::{SignableTransaction, Transaction as _, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::eips::BlockNumberOrTag;
use alloy::network::TransactionResponse;
use alloy::primitives::{Address, TxKind, B256, U256};
use alloy::providers::{Provider, RootProvider};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::chain::contracts::IERC20;
use crate::constants::{ERC20_TRANSFER_GAS, NONCE_RECOVERY_LOOKBACK_BLOCKS};
use crate::errors::ChainError;

/// Concrete provider type: Alloy HTTP provider over Ethereum network.
pub type HttpProvider = RootProvider;

/// Gas price safety buffer (10% above current base price).
const GAS_PRICE_BUFFER_NUM: u128 = 110;
const GAS_PRICE_BUFFER_DEN: u128 = 100;

/// Outcome of a receipt query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success { block_number: u64 },
    Failed { block_number: u64 },
    /// Not mined within the wait budget; the intent stays Submitted and is
    /// reconciled later.
    NotYet,
}

/// One ERC-20 treasury transfer, fully determined before signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTx {
    pub token: Address,
    pub to: Address,
    pub amount: U256,
    pub nonce: u64,
}

/// Minimal chain contract the execution engine depends on.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// ERC-20 balance of `owner` in raw token units.
    async fn get_balance(&self, owner: Address, token: Address) -> Result<U256, ChainError>;

    /// The address the held signing key controls.
    fn signer_address(&self) -> Address;

    /// Reserve the next nonce for this signing identity. Serialized so
    /// concurrent rules cannot race the counter.
    async fn reserve_nonce(&self) -> Result<u64, ChainError>;

    /// Sign and broadcast; returns the transaction hash.
    async fn broadcast_transfer(&self, tx: &TransferTx) -> Result<B256, ChainError>;

    /// Poll for the receipt until mined or `timeout` elapses.
    async fn await_receipt(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> Result<ReceiptStatus, ChainError>;

    /// Crash-recovery lookup: a mined transaction from `sender` at `nonce`,
    /// if one exists in recent history.
    async fn find_sender_tx(
        &self,
        sender: Address,
        nonce: u64,
    ) -> Result<Option<B256>, ChainError>;

    /// Re-sync the local nonce counter from chain state.
    async fn recover_nonce(&self) -> Result<(), ChainError>;
}

// ---------------------------------------------------------------------------
// EVM implementation
// ---------------------------------------------------------------------------

pub struct EvmChainClient {
    provider: HttpProvider,
    signer: PrivateKeySigner,
    /// Async-safe nonce counter. `None` until first chain query.
    nonce: Mutex<Option<u64>>,
    chain_id: u64,
}

impl EvmChainClient {
    pub fn new(provider: HttpProvider, signer: PrivateKeySigner, chain_id: u64) -> Self {
        info!(
            address = %signer.address(),
            chain_id,
            "chain client initialized"
        );
        Self {
            provider,
            signer,
            nonce: Mutex::new(None),
            chain_id,
        }
    }

    /// Current gas price with a 10% buffer, in wei.
    async fn buffered_gas_price(&self) -> Result<u128, ChainError> {
        let base = self
            .provider
            .get_gas_price()
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))?;
        Ok(base * GAS_PRICE_BUFFER_NUM / GAS_PRICE_BUFFER_DEN)
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    async fn get_balance(&self, owner: Address, token: Address) -> Result<U256, ChainError> {
        let erc20 = IERC20::new(token, self.provider.clone());
        erc20
            .balanceOf(owner)
            .call()
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))
    }

    fn signer_address(&self) -> Address {
        self.signer.address()
    }

    async fn reserve_nonce(&self) -> Result<u64, ChainError> {
        let mut guard = self.nonce.lock().await;
        let nonce = match *guard {
            Some(n) => n,
            None => {
                let n = self
                    .provider
                    .get_transaction_count(self.signer.address())
                    .await
                    .map_err(|e| classify_provider_error(&e.to_string()))?;
                info!(nonce = n, "nonce initialized from chain");
                n
            }
        };
        *guard = Some(nonce + 1);
        Ok(nonce)
    }

    async fn broadcast_transfer(&self, transfer: &TransferTx) -> Result<B256, ChainError> {
        let gas_price = self.buffered_gas_price().await?;
        let input = IERC20::transferCall {
            to: transfer.to,
            amount: transfer.amount,
        }
        .abi_encode();

        let tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce: transfer.nonce,
            gas_price,
            gas_limit: ERC20_TRANSFER_GAS,
            to: TxKind::Call(transfer.token),
            value: U256::ZERO,
            input: input.into(),
        };

        let sig_hash = tx.signature_hash();
        let sig = self
            .signer
            .sign_hash_sync(&sig_hash)
            .map_err(|e| ChainError::Terminal(format!("transaction signing failed: {e}")))?;

        let signed = tx.into_signed(sig);
        let envelope = TxEnvelope::Legacy(signed);
        let raw = envelope.encoded_2718();

        let pending = self
            .provider
            .send_raw_transaction(&raw)
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))?;

        let tx_hash = *pending.tx_hash();
        info!(
            tx_hash = %tx_hash,
            nonce = transfer.nonce,
            token = %transfer.token,
            to = %transfer.to,
            amount = %transfer.amount,
            "transfer broadcast"
        );
        Ok(tx_hash)
    }

    async fn await_receipt(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> Result<ReceiptStatus, ChainError> {
        let start = tokio::time::Instant::now();

        loop {
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    let block_number = receipt.block_number.unwrap_or_default();
                    return if receipt.status() {
                        info!(tx_hash = %tx_hash, block_number, "transfer confirmed");
                        Ok(ReceiptStatus::Success { block_number })
                    } else {
                        warn!(tx_hash = %tx_hash, block_number, "transfer reverted on-chain");
                        Ok(ReceiptStatus::Failed { block_number })
                    };
                }
                Ok(None) => {
                    // Not yet mined; keep polling.
                }
                Err(e) => {
                    warn!(error = %e, tx_hash = %tx_hash, "receipt poll error, retrying");
                }
            }

            if start.elapsed() >= timeout {
                return Ok(ReceiptStatus::NotYet);
            }

            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn find_sender_tx(
        &self,
        sender: Address,
        nonce: u64,
    ) -> Result<Option<B256>, ChainError> {
        let chain_nonce = self
            .provider
            .get_transaction_count(sender)
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))?;

        // Nonce not consumed yet: nothing could have mined.
        if chain_nonce <= nonce {
            return Ok(None);
        }

        let latest = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))?;

        let first = latest.saturating_sub(NONCE_RECOVERY_LOOKBACK_BLOCKS);
        for number in (first..=latest).rev() {
            let block = self
                .provider
                .get_block_by_number(BlockNumberOrTag::Number(number))
                .full()
                .await
                .map_err(|e| classify_provider_error(&e.to_string()))?;

            let Some(block) = block else { continue };
            let Some(txs) = block.transactions.as_transactions() else {
                continue;
            };
            for tx in txs {
                if tx.from() == sender && tx.nonce() == nonce {
                    debug!(tx_hash = %tx.tx_hash(), nonce, "recovered broadcast by sender/nonce scan");
                    return Ok(Some(tx.tx_hash()));
                }
            }
        }

        // The nonce was consumed but the transaction is older than the scan
        // window; retry later rather than guessing.
        Err(ChainError::Transient(format!(
            "nonce {nonce} consumed but no matching tx within {NONCE_RECOVERY_LOOKBACK_BLOCKS} blocks"
        )))
    }

    async fn recover_nonce(&self) -> Result<(), ChainError> {
        let mut guard = self.nonce.lock().await;
        let chain_nonce = self
            .provider
            .get_transaction_count(self.signer.address())
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))?;
        let old = *guard;
        *guard = Some(chain_nonce);
        warn!(old_nonce = ?old, chain_nonce, "nonce recovered from chain");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Split a raw provider error into retryable vs. dead-on-arrival.
///
/// Terminal: the transaction can never succeed as constructed (no funds, a
/// revert, a nonce floor the chain will not accept). Everything else —
/// connectivity, rate limits, nonce races where a retry can win — is
/// transient.
pub fn classify_provider_error(message: &str) -> ChainError {
    let lower = message.to_lowercase();

    const TERMINAL_MARKERS: &[&str] = &[
        "insufficient funds",
        "execution reverted",
        "transfer amount exceeds balance",
        "gas required exceeds allowance",
        "invalid sender",
        "nonce too high",
    ];

    if TERMINAL_MARKERS.iter().any(|m| lower.contains(m)) {
        ChainError::Terminal(message.to_string())
    } else {
        ChainError::Transient(message.to_string())
    }
}
