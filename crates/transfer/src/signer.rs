//! Sources for the primary signing actor.

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_kms::{
    Client,
    error::SdkError,
    operation::sign::SignError,
    types::{MessageType, SigningAlgorithmSpec},
};
use solana_keypair::Keypair;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_signer::{Signer, SignerError};
use std::sync::{Arc, Mutex};
use tokio::{runtime::Handle, task};

pub async fn create_kms_client() -> Client {
    let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    Client::new(&config)
}

/// Fetch the DER-encoded public key for a KMS key and convert it to a Solana `Pubkey`.
pub async fn solana_pubkey_from_kms(kms: &Client, key_id: &str) -> Result<Pubkey> {
    let resp = kms
        .get_public_key()
        .key_id(key_id)
        .send()
        .await
        .with_context(|| format!("failed to fetch public key for KMS key {key_id}"))?;
    let der_bytes = resp
        .public_key()
        .ok_or_else(|| anyhow::anyhow!("KMS response missing public key"))?
        .as_ref();

    // Ed25519 SPKI ends with the raw 32-byte key.
    let raw_pubkey: [u8; 32] = der_bytes
        .len()
        .checked_sub(32)
        .and_then(|start| der_bytes[start..].try_into().ok())
        .ok_or_else(|| anyhow::anyhow!("DER public key shorter than 32 bytes: {}", der_bytes.len()))?;
    Ok(Pubkey::from(raw_pubkey))
}

/// Signer backed by an AWS KMS Ed25519 key.
#[derive(Clone)]
pub struct KmsSigner {
    kms: Client,
    key_id: String,
    pubkey: Pubkey,
}

impl KmsSigner {
    pub fn new(kms: &Client, key_id: impl Into<String>, pubkey: Pubkey) -> Self {
        Self {
            kms: kms.clone(),
            key_id: key_id.into(),
            pubkey,
        }
    }

    pub async fn connect(kms: &Client, key_id: &str) -> Result<Self> {
        let pubkey = solana_pubkey_from_kms(kms, key_id).await?;
        Ok(Self::new(kms, key_id, pubkey))
    }

    async fn kms_sign(&self, message: &[u8]) -> Result<Signature, SignerError> {
        let response = self
            .kms
            .sign()
            .key_id(&self.key_id)
            .message(message.to_vec().into())
            .message_type(MessageType::Raw)
            .signing_algorithm(SigningAlgorithmSpec::Ed25519Sha512)
            .send()
            .await
            .map_err(|err| kms_error(&self.key_id, &err))?;

        response
            .signature()
            .and_then(|blob| Signature::try_from(blob.as_ref()).ok())
            .ok_or_else(|| SignerError::Custom(format!("KMS key {} returned no Ed25519 signature", self.key_id)))
    }
}

impl Signer for KmsSigner {
    fn pubkey(&self) -> Pubkey {
        self.pubkey
    }

    fn try_pubkey(&self) -> Result<Pubkey, SignerError> {
        Ok(self.pubkey)
    }

    /// Blocks the calling worker; requires a multi-threaded runtime when
    /// called from async code.
    fn try_sign_message(&self, message: &[u8]) -> Result<Signature, SignerError> {
        match Handle::try_current() {
            Ok(handle) => task::block_in_place(|| handle.block_on(self.kms_sign(message))),
            Err(_) => tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|err| SignerError::Custom(format!("failed to create runtime: {err}")))?
                .block_on(self.kms_sign(message)),
        }
    }

    fn is_interactive(&self) -> bool {
        false
    }
}

fn kms_error(key_id: &str, err: &SdkError<SignError>) -> SignerError {
    SignerError::Custom(format!("KMS signing with {key_id} failed: {err}"))
}

/// Serializes signing requests to a signer shared by concurrent transfers.
pub struct SerialSigner {
    inner: Arc<dyn Signer + Send + Sync>,
    pubkey: Pubkey,
    lock: Mutex<()>,
}

impl SerialSigner {
    pub fn new(inner: Arc<dyn Signer + Send + Sync>) -> Self {
        Self {
            pubkey: inner.pubkey(),
            inner,
            lock: Mutex::new(()),
        }
    }
}

impl Signer for SerialSigner {
    fn pubkey(&self) -> Pubkey {
        self.pubkey
    }

    fn try_pubkey(&self) -> Result<Pubkey, SignerError> {
        Ok(self.pubkey)
    }

    fn try_sign_message(&self, message: &[u8]) -> Result<Signature, SignerError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| SignerError::Custom("signer lock poisoned".into()))?;
        self.inner.try_sign_message(message)
    }

    fn is_interactive(&self) -> bool {
        self.inner.is_interactive()
    }
}

pub fn keypair_from_base58(encoded: &str) -> Result<Keypair> {
    let bytes = bs58::decode(encoded.trim())
        .into_vec()
        .context("keypair is not valid base58")?;
    Keypair::try_from(bytes.as_slice()).context("keypair must be 64 bytes")
}
