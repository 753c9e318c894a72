//! The proving boundary.
//!
//! Proof construction is delegated to a [`ProvingOracle`]. The orchestrator only
//! needs the opaque proof blobs plus the few ciphertexts it must carry into the
//! transfer instruction or cross-check against its own derivation.

use bytemuck::Pod;
use spl_token_2022::solana_zk_sdk::{
    encryption::{
        elgamal::{ElGamalCiphertext, ElGamalPubkey},
        pod::elgamal::PodElGamalPubkey,
    },
    zk_elgamal_proof_program::proof_data::ZkProofData,
};
use spl_token_confidential_transfer_proof_generation::transfer::{
    TransferProofData, transfer_split_proof_data,
};
use thiserror::Error;

use crate::solana::{
    ciphertext::{
        AE_CIPHERTEXT_LEN, Ciphertext, ELGAMAL_CIPHERTEXT_LEN, GROUP_ELEMENT_LEN,
        GROUPED_CIPHERTEXT_3_HANDLES_LEN, GroupedCiphertext,
    },
    confidential_keys::ConfidentialKeys,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProofGenerationError {
    #[error("invalid {role} ElGamal public key")]
    InvalidPublicKey { role: &'static str },

    #[error("invalid available balance ciphertext")]
    InvalidBalanceCiphertext,

    #[error("amount {amount} exceeds available balance {balance}")]
    InsufficientBalance { amount: u64, balance: u64 },

    #[error("proof generation failed: {0}")]
    Failed(String),
}

/// Everything the oracle needs to prove one transfer.
pub struct ProofRequest<'a> {
    pub sender_keys: &'a ConfidentialKeys,
    pub recipient_elgamal_pubkey: [u8; GROUP_ELEMENT_LEN],
    pub auditor_elgamal_pubkey: Option<[u8; GROUP_ELEMENT_LEN]>,
    pub amount: u64,
    pub current_balance: u64,
    pub current_balance_ciphertext: Ciphertext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofBundle {
    pub equality_proof: Vec<u8>,
    pub ciphertext_validity_proof: Vec<u8>,
    pub range_proof: Vec<u8>,
    /// Grouped (sender, recipient, auditor) encryptions of the two amount legs.
    pub amount_ciphertext_lo: GroupedCiphertext,
    pub amount_ciphertext_hi: GroupedCiphertext,
    /// The new balance re-encrypted under the sender's AE key.
    pub new_decryptable_available_balance: [u8; AE_CIPHERTEXT_LEN],
    /// The new balance ciphertext the equality proof was built against, when
    /// the oracle exposes it.
    pub new_balance_ciphertext: Option<Ciphertext>,
}

/// Produces the three proofs for a transfer.
///
/// A single call yields all three because the validity and range proofs share
/// the Pedersen openings of the amount legs, and the equality and range proofs
/// share the opening of the new balance commitment.
pub trait ProvingOracle: Send + Sync {
    fn generate_proofs(&self, request: &ProofRequest<'_>) -> Result<ProofBundle, ProofGenerationError>;
}

/// Proves with the SPL split-proof generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SdkProvingOracle;

impl ProvingOracle for SdkProvingOracle {
    fn generate_proofs(&self, request: &ProofRequest<'_>) -> Result<ProofBundle, ProofGenerationError> {
        let new_balance = request
            .current_balance
            .checked_sub(request.amount)
            .ok_or(ProofGenerationError::InsufficientBalance {
                amount: request.amount,
                balance: request.current_balance,
            })?;

        let recipient = elgamal_pubkey(request.recipient_elgamal_pubkey, "recipient")?;
        let auditor = request
            .auditor_elgamal_pubkey
            .map(|bytes| elgamal_pubkey(bytes, "auditor"))
            .transpose()?;

        let current_available_balance =
            ElGamalCiphertext::from_bytes(request.current_balance_ciphertext.as_bytes())
                .ok_or(ProofGenerationError::InvalidBalanceCiphertext)?;
        let current_decryptable_available_balance =
            request.sender_keys.ae_key.encrypt(request.current_balance);

        let TransferProofData {
            equality_proof_data,
            ciphertext_validity_proof_data_with_ciphertext,
            range_proof_data,
        } = transfer_split_proof_data(
            &current_available_balance,
            &current_decryptable_available_balance,
            request.amount,
            &request.sender_keys.elgamal_keypair,
            &request.sender_keys.ae_key,
            &recipient,
            auditor.as_ref(),
        )
        .map_err(|e| ProofGenerationError::Failed(e.to_string()))?;

        let validity_proof_data = ciphertext_validity_proof_data_with_ciphertext.proof_data;

        // equality context: pubkey(32) | ciphertext(64) | commitment(32)
        let equality_context = context_bytes(&equality_proof_data);
        let new_balance_ciphertext = Ciphertext::try_from(
            &equality_context[GROUP_ELEMENT_LEN..GROUP_ELEMENT_LEN + ELGAMAL_CIPHERTEXT_LEN],
        )
        .map_err(|e| ProofGenerationError::Failed(e.to_string()))?;

        // validity context: three pubkeys | grouped lo | grouped hi
        let validity_context = context_bytes(&validity_proof_data);
        let lo_start = 3 * GROUP_ELEMENT_LEN;
        let hi_start = lo_start + GROUPED_CIPHERTEXT_3_HANDLES_LEN;
        let amount_ciphertext_lo = GroupedCiphertext::try_from(&validity_context[lo_start..hi_start])
            .map_err(|e| ProofGenerationError::Failed(e.to_string()))?;
        let amount_ciphertext_hi = GroupedCiphertext::try_from(
            &validity_context[hi_start..hi_start + GROUPED_CIPHERTEXT_3_HANDLES_LEN],
        )
        .map_err(|e| ProofGenerationError::Failed(e.to_string()))?;

        let new_decryptable_available_balance: [u8; AE_CIPHERTEXT_LEN] =
            request.sender_keys.ae_key.encrypt(new_balance).to_bytes();

        Ok(ProofBundle {
            equality_proof: bytemuck::bytes_of(&equality_proof_data).to_vec(),
            ciphertext_validity_proof: bytemuck::bytes_of(&validity_proof_data).to_vec(),
            range_proof: bytemuck::bytes_of(&range_proof_data).to_vec(),
            amount_ciphertext_lo,
            amount_ciphertext_hi,
            new_decryptable_available_balance,
            new_balance_ciphertext: Some(new_balance_ciphertext),
        })
    }
}

fn elgamal_pubkey(
    bytes: [u8; GROUP_ELEMENT_LEN],
    role: &'static str,
) -> Result<ElGamalPubkey, ProofGenerationError> {
    bytemuck::cast::<_, PodElGamalPubkey>(bytes)
        .try_into()
        .map_err(|_| ProofGenerationError::InvalidPublicKey { role })
}

fn context_bytes<T: ZkProofData<U>, U: Pod>(proof_data: &T) -> Vec<u8> {
    bytemuck::bytes_of(proof_data.context_data()).to_vec()
}
