//! Split-proof confidential transfers for SPL Token-2022.

pub mod config;
pub mod partial_sign;
pub mod signer;
pub mod solana;
