//! Placing signatures into the required-signer slots of a compiled message.
//!
//! Context accounts must co-sign the message that creates them, so a step can
//! need signatures from keys other than the fee payer. Each signature goes in
//! the slot of its pubkey among the message's required signers.

use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_signer::Signer;
use solana_transaction::versioned::VersionedTransaction;
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartialSignError {
    #[error("signer {0} not found among required signers")]
    SignerNotFound(Pubkey),

    #[error("signer for {expected} holds key {actual}")]
    SignerMismatch { expected: Pubkey, actual: Pubkey },

    #[error("too many signatures provided: expected {expected}, received {received}")]
    TooManySignatures { expected: usize, received: usize },

    #[error("required signer {0} did not sign")]
    MissingSignature(Pubkey),

    #[error("signing with {pubkey} failed: {reason}")]
    SigningFailed { pubkey: Pubkey, reason: String },
}

pub trait PartialSign {
    fn partial_sign<S: Signer + ?Sized>(&mut self, signer: &S) -> Result<Signature, PartialSignError>;
}

impl PartialSign for VersionedTransaction {
    fn partial_sign<S: Signer + ?Sized>(&mut self, signer: &S) -> Result<Signature, PartialSignError> {
        let required_signature_count = self.message.header().num_required_signatures as usize;
        let public_key = signer.pubkey();
        let idx = self
            .message
            .static_account_keys()
            .iter()
            .take(required_signature_count)
            .position(|p| p == &public_key)
            .ok_or(PartialSignError::SignerNotFound(public_key))?;

        match self.signatures.len().cmp(&required_signature_count) {
            Ordering::Less => {
                self.signatures
                    .resize(required_signature_count, Signature::default());
            }
            Ordering::Greater => {
                if self.signatures[required_signature_count..]
                    .iter()
                    .any(|sig| *sig != Signature::default())
                {
                    return Err(PartialSignError::TooManySignatures {
                        received: self.signatures.len(),
                        expected: required_signature_count,
                    });
                }
                self.signatures.truncate(required_signature_count);
            }
            Ordering::Equal => {}
        }

        let signature = signer
            .try_sign_message(&self.message.serialize())
            .map_err(|e| PartialSignError::SigningFailed {
                pubkey: public_key,
                reason: e.to_string(),
            })?;
        self.signatures[idx] = signature;

        Ok(signature)
    }
}

/// An ephemeral co-signer and the pubkey the planner expects it to hold.
pub struct CoSigner<'a> {
    pub signer: &'a (dyn Signer + Sync),
    pub expected_pubkey: Pubkey,
}

/// Signs with the primary actor and every co-signer, then checks that no
/// required slot was left empty.
pub fn sign_transaction(
    transaction: &mut VersionedTransaction,
    primary: &dyn Signer,
    cosigners: &[CoSigner<'_>],
) -> Result<Signature, PartialSignError> {
    let primary_signature = transaction.partial_sign(primary)?;

    for cosigner in cosigners {
        let actual = cosigner.signer.pubkey();
        if actual != cosigner.expected_pubkey {
            return Err(PartialSignError::SignerMismatch {
                expected: cosigner.expected_pubkey,
                actual,
            });
        }
        transaction.partial_sign(cosigner.signer)?;
    }

    let required = transaction.message.header().num_required_signatures as usize;
    let keys = transaction.message.static_account_keys();
    if let Some((pubkey, _)) = keys
        .iter()
        .zip(&transaction.signatures)
        .take(required)
        .find(|(_, signature)| **signature == Signature::default())
    {
        return Err(PartialSignError::MissingSignature(*pubkey));
    }

    Ok(primary_signature)
}
