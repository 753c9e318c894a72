//! Homomorphic arithmetic on twisted ElGamal ciphertexts.
//!
//! Balances in the confidential transfer extension are stored as twisted
//! ElGamal ciphertexts over the Ristretto group. Each ciphertext is a pair of
//! compressed points serialized back to back:
//!   1. The Pedersen `commitment` of the amount.
//!   2. The `decryption handle` binding the commitment randomness to one
//!      ElGamal public key.
//!
//! A transfer amount is encrypted once for three parties (sender, recipient,
//! auditor) as a grouped ciphertext: one commitment followed by one handle per
//! party. Because the scheme is additively homomorphic, the sender's new
//! available balance can be computed from the on-chain ciphertext and the
//! sender leg of the transfer amount without decrypting anything:
//!
//! ```text
//! new_balance = available_balance - amount_lo - amount_hi * 2^16
//! ```
//!
//! The result has to match what the equality proof was generated against byte
//! for byte, otherwise the proof program rejects the transfer.

use curve25519_dalek::{
    ristretto::{CompressedRistretto, RistrettoPoint},
    scalar::Scalar,
};
use thiserror::Error;

/// Bit length of the low transfer-amount leg.
pub const TRANSFER_AMOUNT_LO_BITS: u32 = 16;
/// Bit length of the high transfer-amount leg.
pub const TRANSFER_AMOUNT_HI_BITS: u32 = 32;
/// Largest amount the range proof over both legs can cover.
pub const MAX_TRANSFER_AMOUNT: u64 = (1 << (TRANSFER_AMOUNT_LO_BITS + TRANSFER_AMOUNT_HI_BITS)) - 1;

pub const GROUP_ELEMENT_LEN: usize = 32;
pub const ELGAMAL_CIPHERTEXT_LEN: usize = 2 * GROUP_ELEMENT_LEN;
pub const GROUPED_CIPHERTEXT_3_HANDLES_LEN: usize = 4 * GROUP_ELEMENT_LEN;
/// Authenticated-encryption ciphertext of the decryptable balance.
pub const AE_CIPHERTEXT_LEN: usize = 36;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeriveError {
    #[error("{component} does not decode to a valid ristretto point")]
    MalformedGroupElement { component: &'static str },

    #[error("expected {expected} ciphertext bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// An ElGamal ciphertext in its canonical 64-byte encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ciphertext([u8; ELGAMAL_CIPHERTEXT_LEN]);

impl Ciphertext {
    pub const fn new(bytes: [u8; ELGAMAL_CIPHERTEXT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_parts(
        commitment: &[u8; GROUP_ELEMENT_LEN],
        handle: &[u8; GROUP_ELEMENT_LEN],
    ) -> Self {
        let mut bytes = [0u8; ELGAMAL_CIPHERTEXT_LEN];
        bytes[..GROUP_ELEMENT_LEN].copy_from_slice(commitment);
        bytes[GROUP_ELEMENT_LEN..].copy_from_slice(handle);
        Self(bytes)
    }

    pub fn commitment(&self) -> [u8; GROUP_ELEMENT_LEN] {
        group_element(&self.0, 0)
    }

    pub fn handle(&self) -> [u8; GROUP_ELEMENT_LEN] {
        group_element(&self.0, 1)
    }

    pub fn to_bytes(&self) -> [u8; ELGAMAL_CIPHERTEXT_LEN] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; ELGAMAL_CIPHERTEXT_LEN] {
        &self.0
    }

    /// Checks that both components decode to group elements.
    pub fn validate(&self) -> Result<(), DeriveError> {
        decode_point(&self.commitment(), "ciphertext commitment")?;
        decode_point(&self.handle(), "ciphertext handle")?;
        Ok(())
    }
}

impl TryFrom<&[u8]> for Ciphertext {
    type Error = DeriveError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; ELGAMAL_CIPHERTEXT_LEN] =
            bytes.try_into().map_err(|_| DeriveError::InvalidLength {
                expected: ELGAMAL_CIPHERTEXT_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self(bytes))
    }
}

/// A transfer-amount ciphertext with one decryption handle per party, in the
/// order sender, recipient, auditor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupedCiphertext([u8; GROUPED_CIPHERTEXT_3_HANDLES_LEN]);

impl GroupedCiphertext {
    const SENDER_HANDLE: usize = 1;
    const RECIPIENT_HANDLE: usize = 2;
    const AUDITOR_HANDLE: usize = 3;

    pub const fn new(bytes: [u8; GROUPED_CIPHERTEXT_3_HANDLES_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; GROUPED_CIPHERTEXT_3_HANDLES_LEN] {
        &self.0
    }

    /// The ciphertext decryptable by the sender. This is the leg subtracted
    /// from the sender's available balance.
    pub fn sender_ciphertext(&self) -> Ciphertext {
        self.ciphertext_for(Self::SENDER_HANDLE)
    }

    pub fn recipient_ciphertext(&self) -> Ciphertext {
        self.ciphertext_for(Self::RECIPIENT_HANDLE)
    }

    /// The ciphertext decryptable by the mint auditor, carried verbatim in the
    /// transfer instruction.
    pub fn auditor_ciphertext(&self) -> Ciphertext {
        self.ciphertext_for(Self::AUDITOR_HANDLE)
    }

    fn ciphertext_for(&self, handle_index: usize) -> Ciphertext {
        Ciphertext::from_parts(
            &group_element(&self.0, 0),
            &group_element(&self.0, handle_index),
        )
    }
}

impl TryFrom<&[u8]> for GroupedCiphertext {
    type Error = DeriveError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; GROUPED_CIPHERTEXT_3_HANDLES_LEN] =
            bytes.try_into().map_err(|_| DeriveError::InvalidLength {
                expected: GROUPED_CIPHERTEXT_3_HANDLES_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self(bytes))
    }
}

/// An amount split into the lo/hi legs used by the transfer instruction.
///
/// `lo` holds the low 16 bits, `hi` everything above, so that
/// `lo + hi * 2^16` always reconstructs the original value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountSplit {
    pub lo: u64,
    pub hi: u64,
}

impl AmountSplit {
    pub fn new(value: u64) -> Self {
        Self {
            lo: value & ((1 << TRANSFER_AMOUNT_LO_BITS) - 1),
            hi: value >> TRANSFER_AMOUNT_LO_BITS,
        }
    }

    pub fn combine(&self) -> u64 {
        (self.hi << TRANSFER_AMOUNT_LO_BITS) | self.lo
    }
}

/// Computes the sender's new available balance ciphertext.
///
/// The commitment and handle components are processed independently:
/// `c' = c_source - c_lo - c_hi * 2^16` and `d' = d_source - d_lo - d_hi * 2^16`.
/// Pure and deterministic; requires no key material.
pub fn derive_new_balance(
    source: &Ciphertext,
    amount_lo: &Ciphertext,
    amount_hi: &Ciphertext,
) -> Result<Ciphertext, DeriveError> {
    let shift = Scalar::from(1u64 << TRANSFER_AMOUNT_LO_BITS);

    let commitment = decode_point(&source.commitment(), "source commitment")?
        - decode_point(&amount_lo.commitment(), "amount lo commitment")?
        - decode_point(&amount_hi.commitment(), "amount hi commitment")? * shift;

    let handle = decode_point(&source.handle(), "source handle")?
        - decode_point(&amount_lo.handle(), "amount lo handle")?
        - decode_point(&amount_hi.handle(), "amount hi handle")? * shift;

    Ok(Ciphertext::from_parts(
        &commitment.compress().to_bytes(),
        &handle.compress().to_bytes(),
    ))
}

fn group_element(bytes: &[u8], index: usize) -> [u8; GROUP_ELEMENT_LEN] {
    let mut element = [0u8; GROUP_ELEMENT_LEN];
    element.copy_from_slice(&bytes[index * GROUP_ELEMENT_LEN..(index + 1) * GROUP_ELEMENT_LEN]);
    element
}

fn decode_point(
    bytes: &[u8; GROUP_ELEMENT_LEN],
    component: &'static str,
) -> Result<RistrettoPoint, DeriveError> {
    CompressedRistretto(*bytes)
        .decompress()
        .ok_or(DeriveError::MalformedGroupElement { component })
}

/// Checks that 32 bytes are a canonical ristretto encoding. Used to validate
/// ElGamal public keys before any proof work starts.
pub fn is_valid_group_element(bytes: &[u8; GROUP_ELEMENT_LEN]) -> bool {
    CompressedRistretto(*bytes).decompress().is_some()
}
