//! Deterministic derivation of a sender's confidential keys (ElGamal + AE).
//!
//! Keys are bound to one token account: the owner signs the token account
//! address, prefixed per key, and each signature seeds its KDF. Two entry points:
//! - `for_token_account`: the owner's `Signer` is at hand (custodial sender)
//! - `from_wallet_signatures`: a wallet sent the two signatures over
//!   [`elgamal_signing_message`] and [`ae_signing_message`]
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_signer::Signer;
use spl_token_2022::solana_zk_sdk::encryption::{
    auth_encryption::AeKey, elgamal::ElGamalKeypair, pod::elgamal::PodElGamalPubkey,
};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyDerivationError {
    #[error("failed to derive ElGamal keypair: {0}")]
    ElGamal(String),

    #[error("failed to derive AE key: {0}")]
    Ae(String),
}

/// Bundled ElGamal keypair and AE key for one token account.
#[derive(Clone)]
pub struct ConfidentialKeys {
    pub elgamal_keypair: ElGamalKeypair,
    pub ae_key: AeKey,
}

impl ConfidentialKeys {
    pub fn from_signer(signer: &dyn Signer, seed: &[u8]) -> Result<Self, KeyDerivationError> {
        let elgamal_keypair = ElGamalKeypair::new_from_signer(signer, seed)
            .map_err(|e| KeyDerivationError::ElGamal(e.to_string()))?;
        let ae_key = AeKey::new_from_signer(signer, seed)
            .map_err(|e| KeyDerivationError::Ae(e.to_string()))?;
        Ok(Self {
            elgamal_keypair,
            ae_key,
        })
    }

    /// Keys for `token_account`, seeded by the owner's signature over its address.
    pub fn for_token_account(
        owner: &dyn Signer,
        token_account: &Pubkey,
    ) -> Result<Self, KeyDerivationError> {
        Self::from_signer(owner, token_account.as_ref())
    }

    /// Derive keys from the wallet's signatures over [`elgamal_signing_message`]
    /// and [`ae_signing_message`]. The wallet's private key never leaves it.
    pub fn from_wallet_signatures(
        elgamal_signature: &[u8; 64],
        ae_signature: &[u8; 64],
    ) -> Result<Self, KeyDerivationError> {
        let elgamal_signature = Signature::from(*elgamal_signature);
        let ae_signature = Signature::from(*ae_signature);
        if elgamal_signature == Signature::default() {
            return Err(KeyDerivationError::ElGamal("default signature".into()));
        }
        if ae_signature == Signature::default() {
            return Err(KeyDerivationError::Ae("default signature".into()));
        }

        let elgamal_keypair = ElGamalKeypair::new_from_signature(&elgamal_signature)
            .map_err(|e| KeyDerivationError::ElGamal(e.to_string()))?;
        let ae_key = AeKey::new_from_signature(&ae_signature)
            .map_err(|e| KeyDerivationError::Ae(e.to_string()))?;
        Ok(Self {
            elgamal_keypair,
            ae_key,
        })
    }

    pub fn elgamal_pubkey_bytes(&self) -> [u8; 32] {
        bytemuck::cast(PodElGamalPubkey::from(*self.elgamal_keypair.pubkey()))
    }
}

impl fmt::Debug for ConfidentialKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfidentialKeys")
            .field("elgamal_pubkey", &self.elgamal_keypair.pubkey().to_string())
            .finish_non_exhaustive()
    }
}

/// Message the owner signs to seed the ElGamal keypair of `token_account`.
pub fn elgamal_signing_message(token_account: &Pubkey) -> Vec<u8> {
    [b"ElGamalSecretKey".as_slice(), token_account.as_ref()].concat()
}

/// Message the owner signs to seed the AE key of `token_account`.
pub fn ae_signing_message(token_account: &Pubkey) -> Vec<u8> {
    [b"AeKey".as_slice(), token_account.as_ref()].concat()
}
