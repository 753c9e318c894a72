use anyhow::{Context, Result, bail};
use std::{fmt, str::FromStr, time::Duration};

use crate::solana::{submit::SubmissionSettings, transfer::OrchestratorConfig, zk::ContextSizes};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

#[derive(Clone, PartialEq, Eq)]
pub enum SenderSource {
    /// Base58-encoded 64-byte keypair.
    Keypair(String),
    KmsKeyId(String),
}

impl fmt::Debug for SenderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SenderSource::Keypair(_) => f.write_str("Keypair(..)"),
            SenderSource::KmsKeyId(key_id) => f.debug_tuple("KmsKeyId").field(key_id).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub bind_addr: String,
    pub sender: SenderSource,
    pub orchestrator: OrchestratorConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let rpc_url = lookup("RPC_URL").context("RPC_URL must be set")?;
        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let sender = match (lookup("SENDER_KEYPAIR"), lookup("SENDER_KMS_KEY_ID")) {
            (Some(_), Some(_)) => bail!("set only one of SENDER_KEYPAIR and SENDER_KMS_KEY_ID"),
            (Some(keypair), None) => SenderSource::Keypair(keypair),
            (None, Some(key_id)) => SenderSource::KmsKeyId(key_id),
            (None, None) => bail!("SENDER_KEYPAIR or SENDER_KMS_KEY_ID must be set"),
        };

        let defaults = OrchestratorConfig::default();
        let parse = |key: &str| -> Result<Option<u64>> { parse_var(&lookup, key) };

        let orchestrator = OrchestratorConfig {
            max_message_bytes: parse("MAX_MESSAGE_BYTES")?
                .map_or(defaults.max_message_bytes, |v| v as usize),
            context_sizes: ContextSizes {
                equality: parse("EQUALITY_CONTEXT_BYTES")?
                    .map_or(defaults.context_sizes.equality, |v| v as usize),
                ciphertext_validity: parse("VALIDITY_CONTEXT_BYTES")?
                    .map_or(defaults.context_sizes.ciphertext_validity, |v| v as usize),
                range: parse("RANGE_CONTEXT_BYTES")?
                    .map_or(defaults.context_sizes.range, |v| v as usize),
            },
            submission: SubmissionSettings {
                max_attempts: parse("MAX_SUBMIT_ATTEMPTS")?
                    .map_or(defaults.submission.max_attempts, |v| v as usize),
                poll_interval: parse("POLL_INTERVAL_MS")?
                    .map_or(defaults.submission.poll_interval, Duration::from_millis),
                confirm_timeout: parse("CONFIRM_TIMEOUT_SECS")?
                    .map_or(defaults.submission.confirm_timeout, Duration::from_secs),
            },
        };

        if orchestrator.submission.max_attempts == 0 {
            bail!("MAX_SUBMIT_ATTEMPTS must be at least 1");
        }

        Ok(Self {
            rpc_url,
            bind_addr,
            sender,
            orchestrator,
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .with_context(|| format!("{key} is not a valid number: {value:?}"))
        })
        .transpose()
}
