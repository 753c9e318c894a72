//! Proof kinds and the context state accounts that hold verified proofs.
//!
//! A split-proof transfer stores each verified proof in its own account owned
//! by the ZK ElGamal proof program. The account must be allocated with exactly
//! `header + proof context` bytes, otherwise the verify instruction fails.

use std::{collections::HashMap, fmt};
use thiserror::Error;
use tracing::warn;

use crate::solana::ledger::{Ledger, LedgerError};

/// Context state authority (32) followed by the proof type tag (1).
pub const CONTEXT_STATE_HEADER_LEN: usize = 33;
/// Source pubkey, available-balance ciphertext and new-balance commitment.
pub const EQUALITY_CONTEXT_LEN: usize = 128;
/// Three pubkeys and the lo/hi grouped ciphertexts.
pub const CIPHERTEXT_VALIDITY_CONTEXT_LEN: usize = 352;
/// Eight commitments and their bit lengths.
pub const RANGE_CONTEXT_LEN: usize = 264;

pub const CLOSE_CONTEXT_STATE_DISCRIMINATOR: u8 = 0;
pub const VERIFY_CIPHERTEXT_COMMITMENT_EQUALITY_DISCRIMINATOR: u8 = 3;
pub const VERIFY_BATCHED_RANGE_PROOF_U128_DISCRIMINATOR: u8 = 7;
pub const VERIFY_BATCHED_GROUPED_CIPHERTEXT_3_HANDLES_VALIDITY_DISCRIMINATOR: u8 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProofKind {
    Equality,
    CiphertextValidity,
    Range,
}

impl ProofKind {
    pub const ALL: [ProofKind; 3] = [
        ProofKind::Equality,
        ProofKind::CiphertextValidity,
        ProofKind::Range,
    ];

    pub const fn verify_discriminator(self) -> u8 {
        match self {
            ProofKind::Equality => VERIFY_CIPHERTEXT_COMMITMENT_EQUALITY_DISCRIMINATOR,
            ProofKind::CiphertextValidity => {
                VERIFY_BATCHED_GROUPED_CIPHERTEXT_3_HANDLES_VALIDITY_DISCRIMINATOR
            }
            ProofKind::Range => VERIFY_BATCHED_RANGE_PROOF_U128_DISCRIMINATOR,
        }
    }

    pub fn from_verify_discriminator(discriminator: u8) -> Option<Self> {
        ProofKind::ALL
            .into_iter()
            .find(|kind| kind.verify_discriminator() == discriminator)
    }

    pub const fn context_len(self) -> usize {
        match self {
            ProofKind::Equality => EQUALITY_CONTEXT_LEN,
            ProofKind::CiphertextValidity => CIPHERTEXT_VALIDITY_CONTEXT_LEN,
            ProofKind::Range => RANGE_CONTEXT_LEN,
        }
    }
}

impl fmt::Display for ProofKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProofKind::Equality => "equality",
            ProofKind::CiphertextValidity => "ciphertext validity",
            ProofKind::Range => "range",
        };
        f.write_str(name)
    }
}

/// Byte size of each context state account.
///
/// The defaults match the deployed proof program. Deployments with a
/// different program build override them through configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextSizes {
    pub equality: usize,
    pub ciphertext_validity: usize,
    pub range: usize,
}

impl Default for ContextSizes {
    fn default() -> Self {
        Self {
            equality: CONTEXT_STATE_HEADER_LEN + EQUALITY_CONTEXT_LEN,
            ciphertext_validity: CONTEXT_STATE_HEADER_LEN + CIPHERTEXT_VALIDITY_CONTEXT_LEN,
            range: CONTEXT_STATE_HEADER_LEN + RANGE_CONTEXT_LEN,
        }
    }
}

impl ContextSizes {
    pub fn for_kind(&self, kind: ProofKind) -> usize {
        match kind {
            ProofKind::Equality => self.equality,
            ProofKind::CiphertextValidity => self.ciphertext_validity,
            ProofKind::Range => self.range,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextAccountLayout {
    pub kind: ProofKind,
    pub byte_size: usize,
    pub rent_lamports: u64,
}

/// Layouts of the three context accounts of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLayouts {
    pub equality: ContextAccountLayout,
    pub ciphertext_validity: ContextAccountLayout,
    pub range: ContextAccountLayout,
}

impl ContextLayouts {
    pub fn get(&self, kind: ProofKind) -> &ContextAccountLayout {
        match kind {
            ProofKind::Equality => &self.equality,
            ProofKind::CiphertextValidity => &self.ciphertext_validity,
            ProofKind::Range => &self.range,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("rent query for {byte_size} bytes failed twice: {source}")]
pub struct RentQueryFailed {
    pub byte_size: usize,
    #[source]
    pub source: LedgerError,
}

/// Resolves size and rent for context state accounts.
///
/// One planner serves one transfer. Rent is cached per size for the planner's
/// lifetime only, so every new transfer re-queries the current rent.
pub struct ContextAccountPlanner<'a, L> {
    ledger: &'a L,
    sizes: ContextSizes,
    rent_by_size: HashMap<usize, u64>,
}

impl<'a, L: Ledger> ContextAccountPlanner<'a, L> {
    pub fn new(ledger: &'a L, sizes: ContextSizes) -> Self {
        Self {
            ledger,
            sizes,
            rent_by_size: HashMap::new(),
        }
    }

    pub async fn plan(&mut self, kind: ProofKind) -> Result<ContextAccountLayout, RentQueryFailed> {
        let byte_size = self.sizes.for_kind(kind);
        let rent_lamports = match self.rent_by_size.get(&byte_size) {
            Some(rent) => *rent,
            None => {
                let rent = self.query_rent(byte_size).await?;
                self.rent_by_size.insert(byte_size, rent);
                rent
            }
        };

        Ok(ContextAccountLayout {
            kind,
            byte_size,
            rent_lamports,
        })
    }

    pub async fn plan_all(&mut self) -> Result<ContextLayouts, RentQueryFailed> {
        Ok(ContextLayouts {
            equality: self.plan(ProofKind::Equality).await?,
            ciphertext_validity: self.plan(ProofKind::CiphertextValidity).await?,
            range: self.plan(ProofKind::Range).await?,
        })
    }

    async fn query_rent(&self, byte_size: usize) -> Result<u64, RentQueryFailed> {
        match self.ledger.get_min_rent(byte_size).await {
            Ok(rent) => Ok(rent),
            Err(first) => {
                warn!(byte_size, error = %first, "rent query failed, retrying once");
                self.ledger
                    .get_min_rent(byte_size)
                    .await
                    .map_err(|source| RentQueryFailed { byte_size, source })
            }
        }
    }
}
