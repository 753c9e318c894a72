//! Confidential token transfers using SPL Token-2022 split proofs.
//!
//! [`TransferOrchestrator::prepare`] validates the intent, obtains the three
//! proofs, derives and cross-checks the sender's new balance ciphertext,
//! sizes the context accounts and plans the five messages. Nothing is
//! submitted until [`TransferOrchestrator::execute`], which drives the plan
//! through the [`SubmissionEngine`].

use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_signer::Signer;
use std::sync::Arc;
use thiserror::Error;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use crate::solana::{
    ciphertext::{
        AmountSplit, Ciphertext, DeriveError, ELGAMAL_CIPHERTEXT_LEN, GROUP_ELEMENT_LEN,
        MAX_TRANSFER_AMOUNT, derive_new_balance, is_valid_group_element,
    },
    confidential_keys::ConfidentialKeys,
    context::ContextAccounts,
    ledger::Ledger,
    plan::{DEFAULT_MAX_MESSAGE_BYTES, MessagePlanner, PlanError, TransferStep},
    proof::{ProofGenerationError, ProofRequest, ProvingOracle},
    submit::{CancellationFlag, StepFailure, StepReport, SubmissionEngine, SubmissionSettings},
    zk::{ContextAccountPlanner, ContextSizes, RentQueryFailed},
};

/// A request to move `amount` confidential tokens from the sender's token
/// account to the recipient's.
#[derive(Debug, Clone)]
pub struct TransferIntent {
    /// Owner of the source token account; signs the transfer and owns the
    /// context accounts.
    pub sender: Pubkey,
    pub source_token_account: Pubkey,
    pub destination_token_account: Pubkey,
    pub mint: Pubkey,
    pub sender_keys: ConfidentialKeys,
    pub recipient_elgamal_pubkey: [u8; GROUP_ELEMENT_LEN],
    pub auditor_elgamal_pubkey: Option<[u8; GROUP_ELEMENT_LEN]>,
    pub amount: u64,
    /// Plaintext available balance, already decrypted by the caller.
    pub available_balance: u64,
    /// The on-chain available balance ciphertext.
    pub available_balance_ciphertext: [u8; ELGAMAL_CIPHERTEXT_LEN],
}

impl TransferIntent {
    pub fn validate(&self, payer: &Pubkey) -> Result<(), TransferError> {
        if self.amount == 0 {
            return Err(TransferError::ZeroAmount);
        }
        if self.amount > MAX_TRANSFER_AMOUNT {
            return Err(TransferError::AmountTooLarge {
                amount: self.amount,
                max: MAX_TRANSFER_AMOUNT,
            });
        }
        if self.amount > self.available_balance {
            return Err(TransferError::InsufficientBalance {
                amount: self.amount,
                available: self.available_balance,
            });
        }
        if !is_valid_group_element(&self.recipient_elgamal_pubkey) {
            return Err(TransferError::MalformedRecipientKey);
        }
        if let Some(auditor) = &self.auditor_elgamal_pubkey {
            if !is_valid_group_element(auditor) {
                return Err(TransferError::MalformedAuditorKey);
            }
        }
        Ciphertext::new(self.available_balance_ciphertext)
            .validate()
            .map_err(|_| TransferError::MalformedBalanceCiphertext)?;
        if self.sender != *payer {
            return Err(TransferError::SenderMismatch {
                sender: self.sender,
                payer: *payer,
            });
        }
        Ok(())
    }

    pub fn amount_split(&self) -> AmountSplit {
        AmountSplit::new(self.amount)
    }

    pub fn new_balance_split(&self) -> AmountSplit {
        AmountSplit::new(self.available_balance.saturating_sub(self.amount))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub max_message_bytes: usize,
    pub context_sizes: ContextSizes,
    pub submission: SubmissionSettings,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            context_sizes: ContextSizes::default(),
            submission: SubmissionSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad request; nothing was sent to the ledger.
    Input,
    Oracle,
    /// Planning, encoding or signing invariant violated.
    Encoding,
    Ledger,
    /// Outcome unknown; inspect the ledger before restarting.
    Unconfirmed,
    Cancelled,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("transfer amount must be positive")]
    ZeroAmount,

    #[error("transfer amount {amount} exceeds the maximum of {max}")]
    AmountTooLarge { amount: u64, max: u64 },

    #[error("transfer amount {amount} exceeds available balance {available}")]
    InsufficientBalance { amount: u64, available: u64 },

    #[error("malformed recipient ElGamal public key")]
    MalformedRecipientKey,

    #[error("malformed auditor ElGamal public key")]
    MalformedAuditorKey,

    #[error("malformed available balance ciphertext")]
    MalformedBalanceCiphertext,

    #[error("transfer authority {sender} is not the signing payer {payer}")]
    SenderMismatch { sender: Pubkey, payer: Pubkey },

    #[error(transparent)]
    ProofGeneration(#[from] ProofGenerationError),

    #[error("proof bundle carries a malformed ciphertext: {0}")]
    MalformedProofCiphertext(#[from] DeriveError),

    #[error("derived new balance ciphertext does not match the proven one")]
    DerivedBalanceMismatch,

    #[error(transparent)]
    RentQuery(#[from] RentQueryFailed),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("step {index} ({label}) failed: {cause}")]
    StepFailed {
        index: usize,
        label: &'static str,
        cause: StepFailure,
    },

    #[error("step {index} ({label}) kept hitting stale lifetime tokens after {attempts} attempts")]
    LifetimeTokenExhausted {
        index: usize,
        label: &'static str,
        attempts: usize,
    },

    #[error("step {index} ({label}) unconfirmed with signature {signature}; check the ledger before restarting")]
    Unconfirmed {
        index: usize,
        label: &'static str,
        signature: Signature,
    },

    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TransferError::ZeroAmount
            | TransferError::AmountTooLarge { .. }
            | TransferError::InsufficientBalance { .. }
            | TransferError::MalformedRecipientKey
            | TransferError::MalformedAuditorKey
            | TransferError::MalformedBalanceCiphertext
            | TransferError::SenderMismatch { .. } => ErrorClass::Input,
            TransferError::ProofGeneration(_)
            | TransferError::MalformedProofCiphertext(_)
            | TransferError::DerivedBalanceMismatch => ErrorClass::Oracle,
            TransferError::Plan(_) => ErrorClass::Encoding,
            TransferError::StepFailed {
                cause: StepFailure::Signing(_) | StepFailure::Compile(_),
                ..
            } => ErrorClass::Encoding,
            TransferError::RentQuery(_)
            | TransferError::StepFailed { .. }
            | TransferError::LifetimeTokenExhausted { .. } => ErrorClass::Ledger,
            TransferError::Unconfirmed { .. } => ErrorClass::Unconfirmed,
            TransferError::Cancelled => ErrorClass::Cancelled,
        }
    }

    pub fn is_input_error(&self) -> bool {
        self.class() == ErrorClass::Input
    }

    /// Whether restarting the whole transfer, with fresh context accounts,
    /// may succeed without changing the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::RentQuery(_) | TransferError::LifetimeTokenExhausted { .. }
        )
    }
}

/// A run that stopped early, with what it left behind.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct TransferFailure {
    pub error: TransferError,
    pub completed: Vec<StepReport>,
    pub last_confirmed: Option<StepReport>,
    /// Context accounts created but never closed; their rent must be
    /// reclaimed by closing them.
    pub stranded_context_accounts: Vec<Pubkey>,
    /// Context accounts whose creation was sent but never confirmed. They
    /// may exist on-chain holding rent.
    pub unconfirmed_context_accounts: Vec<Pubkey>,
}

impl TransferFailure {
    pub fn new(error: TransferError, completed: Vec<StepReport>, contexts: &ContextAccounts) -> Self {
        Self {
            last_confirmed: completed.last().cloned(),
            stranded_context_accounts: contexts.stranded(),
            unconfirmed_context_accounts: Vec::new(),
            error,
            completed,
        }
    }

    pub fn with_unconfirmed_context_accounts(mut self, accounts: Vec<Pubkey>) -> Self {
        self.unconfirmed_context_accounts = accounts;
        self
    }

    fn before_submission(error: TransferError) -> Self {
        Self {
            error,
            completed: Vec::new(),
            last_confirmed: None,
            stranded_context_accounts: Vec::new(),
            unconfirmed_context_accounts: Vec::new(),
        }
    }
}

/// A fully planned transfer that has not touched the ledger beyond rent
/// queries.
#[derive(Debug)]
pub struct PreparedTransfer {
    pub transfer_id: Uuid,
    pub steps: Vec<TransferStep>,
    pub contexts: ContextAccounts,
    pub new_balance_ciphertext: Ciphertext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub transfer_id: Uuid,
    pub steps: Vec<StepReport>,
}

impl TransferReceipt {
    /// Signature of the transfer-and-close message.
    pub fn signature(&self) -> Option<Signature> {
        self.steps.last().map(|step| step.signature)
    }
}

pub struct TransferOrchestrator<L, P> {
    ledger: Arc<L>,
    oracle: Arc<P>,
    payer: Arc<dyn Signer + Send + Sync>,
    config: OrchestratorConfig,
}

impl<L: Ledger, P: ProvingOracle> TransferOrchestrator<L, P> {
    pub fn new(
        ledger: Arc<L>,
        oracle: Arc<P>,
        payer: Arc<dyn Signer + Send + Sync>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            ledger,
            oracle,
            payer,
            config,
        }
    }

    pub fn payer(&self) -> Pubkey {
        self.payer.pubkey()
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub async fn prepare(&self, intent: &TransferIntent) -> Result<PreparedTransfer, TransferError> {
        let payer = self.payer.pubkey();
        intent.validate(&payer)?;

        let source = Ciphertext::new(intent.available_balance_ciphertext);
        let bundle = self.oracle.generate_proofs(&ProofRequest {
            sender_keys: &intent.sender_keys,
            recipient_elgamal_pubkey: intent.recipient_elgamal_pubkey,
            auditor_elgamal_pubkey: intent.auditor_elgamal_pubkey,
            amount: intent.amount,
            current_balance: intent.available_balance,
            current_balance_ciphertext: source,
        })?;

        let new_balance_ciphertext = derive_new_balance(
            &source,
            &bundle.amount_ciphertext_lo.sender_ciphertext(),
            &bundle.amount_ciphertext_hi.sender_ciphertext(),
        )?;
        if let Some(proven) = bundle.new_balance_ciphertext {
            if proven != new_balance_ciphertext {
                return Err(TransferError::DerivedBalanceMismatch);
            }
        }

        let layouts = ContextAccountPlanner::new(&*self.ledger, self.config.context_sizes)
            .plan_all()
            .await?;

        let contexts = ContextAccounts::generate();
        let steps = MessagePlanner::new(payer, self.config.max_message_bytes).plan(
            intent,
            &bundle,
            &contexts,
            &layouts,
        )?;

        Ok(PreparedTransfer {
            transfer_id: Uuid::new_v4(),
            steps,
            contexts,
            new_balance_ciphertext,
        })
    }

    pub async fn execute(
        &self,
        prepared: PreparedTransfer,
        cancellation: &CancellationFlag,
    ) -> Result<TransferReceipt, TransferFailure> {
        let PreparedTransfer {
            transfer_id,
            steps,
            mut contexts,
            ..
        } = prepared;

        let engine = SubmissionEngine::new(&*self.ledger, &*self.payer, self.config.submission);
        let reports = engine
            .run(&steps, &mut contexts, cancellation)
            .instrument(info_span!("transfer", %transfer_id))
            .await?;

        Ok(TransferReceipt {
            transfer_id,
            steps: reports,
        })
    }

    /// Prepares and executes `intent`.
    pub async fn transfer(
        &self,
        intent: &TransferIntent,
        cancellation: &CancellationFlag,
    ) -> Result<TransferReceipt, TransferFailure> {
        let prepared = self.prepare(intent).await.map_err(|e| {
            error!(sender = %intent.sender, amount = intent.amount, error = %e, "Transfer rejected before submission");
            TransferFailure::before_submission(e)
        })?;

        info!(
            transfer_id = %prepared.transfer_id,
            sender = %intent.sender,
            mint = %intent.mint,
            steps = prepared.steps.len(),
            "Transfer planned"
        );
        self.execute(prepared, cancellation).await
    }
}
