//! The ledger boundary: the only network calls the orchestrator makes.
//!
//! Every method is a suspension point. [`RpcLedger`] is the production
//! implementation on top of the nonblocking Solana RPC client.

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_hash::Hash;
use solana_signature::Signature;
use solana_transaction::versioned::VersionedTransaction;
use solana_transaction_error::TransactionError;
use solana_transaction_status::TransactionConfirmationStatus;
use std::{future::Future, sync::Arc};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The lifetime token embedded in the message is unknown or expired.
    #[error("lifetime token is stale")]
    StaleLifetimeToken,

    #[error("message rejected: {0}")]
    Rejected(String),

    #[error("rpc transport error: {0}")]
    Transport(String),
}

/// A recent blockhash together with the last block height at which a
/// message carrying it can still land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifetimeToken {
    pub blockhash: Hash,
    pub expiry_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageStatus {
    Pending,
    ConfirmedOk,
    ConfirmedErr(String),
    Unknown,
}

pub trait Ledger: Send + Sync {
    fn get_lifetime_token(&self) -> impl Future<Output = Result<LifetimeToken, LedgerError>> + Send;

    fn get_min_rent(&self, byte_size: usize) -> impl Future<Output = Result<u64, LedgerError>> + Send;

    /// Submits a signed message. Resubmitting a message the ledger has
    /// already processed succeeds with the same identifier.
    fn submit(
        &self,
        transaction: &VersionedTransaction,
    ) -> impl Future<Output = Result<Signature, LedgerError>> + Send;

    fn get_status(
        &self,
        signature: &Signature,
    ) -> impl Future<Output = Result<MessageStatus, LedgerError>> + Send;

    fn get_block_height(&self) -> impl Future<Output = Result<u64, LedgerError>> + Send;
}

pub struct RpcLedger {
    rpc_client: Arc<RpcClient>,
}

impl RpcLedger {
    pub fn new(rpc_client: Arc<RpcClient>) -> Self {
        Self { rpc_client }
    }
}

impl Ledger for RpcLedger {
    async fn get_lifetime_token(&self) -> Result<LifetimeToken, LedgerError> {
        let (blockhash, expiry_height) = self
            .rpc_client
            .get_latest_blockhash_with_commitment(self.rpc_client.commitment())
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        Ok(LifetimeToken {
            blockhash,
            expiry_height,
        })
    }

    async fn get_min_rent(&self, byte_size: usize) -> Result<u64, LedgerError> {
        self.rpc_client
            .get_minimum_balance_for_rent_exemption(byte_size)
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))
    }

    async fn submit(&self, transaction: &VersionedTransaction) -> Result<Signature, LedgerError> {
        match self.rpc_client.send_transaction(transaction).await {
            Ok(signature) => Ok(signature),
            Err(err) => match err.get_transaction_error() {
                Some(TransactionError::BlockhashNotFound) => Err(LedgerError::StaleLifetimeToken),
                Some(TransactionError::AlreadyProcessed) => {
                    debug!("message already processed, treating resubmission as accepted");
                    transaction
                        .signatures
                        .first()
                        .copied()
                        .ok_or_else(|| LedgerError::Rejected("unsigned message".into()))
                }
                Some(tx_err) => Err(LedgerError::Rejected(tx_err.to_string())),
                None => Err(LedgerError::Transport(err.to_string())),
            },
        }
    }

    async fn get_status(&self, signature: &Signature) -> Result<MessageStatus, LedgerError> {
        let statuses = self
            .rpc_client
            .get_signature_statuses(&[*signature])
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        let Some(status) = statuses.value.into_iter().next().flatten() else {
            return Ok(MessageStatus::Unknown);
        };

        if let Some(err) = status.err {
            return Ok(MessageStatus::ConfirmedErr(format!("{err:?}")));
        }

        match status.confirmation_status {
            Some(TransactionConfirmationStatus::Confirmed | TransactionConfirmationStatus::Finalized) => {
                Ok(MessageStatus::ConfirmedOk)
            }
            // rooted entries on older nodes report no confirmation count
            None if status.confirmations.is_none() => Ok(MessageStatus::ConfirmedOk),
            _ => Ok(MessageStatus::Pending),
        }
    }

    async fn get_block_height(&self) -> Result<u64, LedgerError> {
        self.rpc_client
            .get_block_height()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))
    }
}
