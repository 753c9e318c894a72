//! In-memory collaborators for driving the orchestrator without a cluster.

use solana_hash::Hash;
use solana_signature::Signature;
use solana_transaction::versioned::VersionedTransaction;
use spl_token_2022::solana_zk_sdk::encryption::{
    auth_encryption::AeKey, elgamal::ElGamalKeypair, pod::elgamal::PodElGamalPubkey,
};
use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::solana::{
    ciphertext::{AmountSplit, Ciphertext, GroupedCiphertext},
    confidential_keys::ConfidentialKeys,
    ledger::{Ledger, LedgerError, LifetimeToken, MessageStatus},
    proof::{ProofBundle, ProofGenerationError, ProofRequest, ProvingOracle},
};

/// Blocks a blockhash stays valid for, as on mainnet.
pub const LIFETIME_BLOCKS: u64 = 150;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    LifetimeToken,
    MinRent(usize),
    Submit(Signature),
    Status(Signature),
    BlockHeight,
}

/// Scripted ledger. Submissions succeed and statuses report confirmed unless
/// a response was queued.
#[derive(Default)]
pub struct MockLedger {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    calls: Vec<LedgerCall>,
    submitted: Vec<VersionedTransaction>,
    submit_responses: VecDeque<Result<(), LedgerError>>,
    status_responses: VecDeque<Result<MessageStatus, LedgerError>>,
    default_status: Option<MessageStatus>,
    rent_failures: usize,
    tokens_issued: u64,
    block_height: u64,
}

impl MockLedger {
    pub fn rent_for(byte_size: usize) -> u64 {
        (byte_size as u64 + 128) * 6_960
    }

    pub fn fail_rent_queries(&self, count: usize) {
        self.state.lock().unwrap().rent_failures = count;
    }

    pub fn queue_submit(&self, response: Result<(), LedgerError>) {
        self.state.lock().unwrap().submit_responses.push_back(response);
    }

    pub fn queue_status(&self, response: Result<MessageStatus, LedgerError>) {
        self.state.lock().unwrap().status_responses.push_back(response);
    }

    /// Status reported once the queue is drained.
    pub fn set_default_status(&self, status: MessageStatus) {
        self.state.lock().unwrap().default_status = Some(status);
    }

    pub fn set_block_height(&self, height: u64) {
        self.state.lock().unwrap().block_height = height;
    }

    pub fn calls(&self) -> Vec<LedgerCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn rent_queries(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                LedgerCall::MinRent(size) => Some(size),
                _ => None,
            })
            .collect()
    }

    pub fn submitted(&self) -> Vec<VersionedTransaction> {
        self.state.lock().unwrap().submitted.clone()
    }
}

impl Ledger for MockLedger {
    async fn get_lifetime_token(&self) -> Result<LifetimeToken, LedgerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(LedgerCall::LifetimeToken);
        state.tokens_issued += 1;

        let mut blockhash = [0u8; 32];
        blockhash[..8].copy_from_slice(&state.tokens_issued.to_le_bytes());
        Ok(LifetimeToken {
            blockhash: Hash::new_from_array(blockhash),
            expiry_height: state.block_height + LIFETIME_BLOCKS,
        })
    }

    async fn get_min_rent(&self, byte_size: usize) -> Result<u64, LedgerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(LedgerCall::MinRent(byte_size));
        if state.rent_failures > 0 {
            state.rent_failures -= 1;
            return Err(LedgerError::Transport("rent unavailable".into()));
        }
        Ok(Self::rent_for(byte_size))
    }

    async fn submit(&self, transaction: &VersionedTransaction) -> Result<Signature, LedgerError> {
        let mut state = self.state.lock().unwrap();
        let signature = transaction.signatures.first().copied().unwrap_or_default();
        state.calls.push(LedgerCall::Submit(signature));
        state.submitted.push(transaction.clone());

        match state.submit_responses.pop_front() {
            Some(Err(err)) => Err(err),
            _ => Ok(signature),
        }
    }

    async fn get_status(&self, signature: &Signature) -> Result<MessageStatus, LedgerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(LedgerCall::Status(*signature));

        match state.status_responses.pop_front() {
            Some(response) => response,
            None => Ok(state
                .default_status
                .clone()
                .unwrap_or(MessageStatus::ConfirmedOk)),
        }
    }

    async fn get_block_height(&self) -> Result<u64, LedgerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(LedgerCall::BlockHeight);
        Ok(state.block_height)
    }
}

pub const EQUALITY_PROOF_LEN: usize = 320;
pub const CIPHERTEXT_VALIDITY_PROOF_LEN: usize = 544;
pub const RANGE_PROOF_LEN: usize = 1000;

/// Emits full-size placeholder proofs around real amount encryptions, so the
/// derivation and message sizes behave as they would with the SDK.
#[derive(Default)]
pub struct FixedProvingOracle {
    calls: AtomicUsize,
    mismatched_balance: bool,
}

impl FixedProvingOracle {
    /// Reports a new-balance ciphertext that disagrees with the derivation.
    pub fn with_mismatched_balance() -> Self {
        Self {
            mismatched_balance: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProvingOracle for FixedProvingOracle {
    fn generate_proofs(&self, request: &ProofRequest<'_>) -> Result<ProofBundle, ProofGenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if request.amount > request.current_balance {
            return Err(ProofGenerationError::InsufficientBalance {
                amount: request.amount,
                balance: request.current_balance,
            });
        }

        let split = AmountSplit::new(request.amount);
        let sender = request.sender_keys.elgamal_keypair.pubkey();
        let grouped = |amount: u64| {
            let ciphertext = Ciphertext::new(sender.encrypt(amount).to_bytes());
            let (commitment, handle) = (ciphertext.commitment(), ciphertext.handle());
            let mut bytes = [0u8; 128];
            bytes[..32].copy_from_slice(&commitment);
            for slot in bytes[32..].chunks_exact_mut(32) {
                slot.copy_from_slice(&handle);
            }
            GroupedCiphertext::new(bytes)
        };

        Ok(ProofBundle {
            equality_proof: vec![3; EQUALITY_PROOF_LEN],
            ciphertext_validity_proof: vec![12; CIPHERTEXT_VALIDITY_PROOF_LEN],
            range_proof: vec![7; RANGE_PROOF_LEN],
            amount_ciphertext_lo: grouped(split.lo),
            amount_ciphertext_hi: grouped(split.hi),
            new_decryptable_available_balance: [0xae; 36],
            new_balance_ciphertext: self
                .mismatched_balance
                .then_some(request.current_balance_ciphertext),
        })
    }
}

pub fn random_keys() -> ConfidentialKeys {
    ConfidentialKeys {
        elgamal_keypair: ElGamalKeypair::new_rand(),
        ae_key: AeKey::new_rand(),
    }
}

pub fn elgamal_pubkey_bytes(keypair: &ElGamalKeypair) -> [u8; 32] {
    bytemuck::cast(PodElGamalPubkey::from(*keypair.pubkey()))
}
