//! Driving planned steps onto the ledger.
//!
//! Each attempt fetches a fresh lifetime token, compiles and signs the step
//! against it, submits, and polls until the message is confirmed, fails, or
//! the confirmation deadline passes. Only a stale lifetime token is retried;
//! the step is then recompiled, since the token is part of the signed bytes.

use solana_signature::Signature;
use solana_signer::Signer;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{error, info, warn};

use crate::{
    partial_sign::{CoSigner, PartialSignError, sign_transaction},
    solana::{
        context::{ContextAccounts, Transition},
        ledger::{Ledger, LedgerError, LifetimeToken, MessageStatus},
        plan::TransferStep,
        transaction::compile_transaction,
        transfer::{TransferError, TransferFailure},
    },
};

pub const DEFAULT_MAX_SUBMIT_ATTEMPTS: usize = 3;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionSettings {
    /// Attempts per step, counting the first, before a stale token is fatal.
    pub max_attempts: usize,
    pub poll_interval: Duration,
    /// Deadline for one attempt's confirmation.
    pub confirm_timeout: Duration,
}

impl Default for SubmissionSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_SUBMIT_ATTEMPTS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
        }
    }
}

/// Why a single attempt at a step did not confirm.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StepFailure {
    #[error("lifetime token expired before the message landed")]
    StaleLifetimeToken,

    #[error("message rejected: {0}")]
    Rejected(String),

    #[error("message {signature} failed on-chain: {reason}")]
    ExecutionFailed { signature: Signature, reason: String },

    #[error(transparent)]
    Ledger(LedgerError),

    #[error(transparent)]
    Signing(#[from] PartialSignError),

    #[error("failed to compile message: {0}")]
    Compile(String),
}

impl From<LedgerError> for StepFailure {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::StaleLifetimeToken => StepFailure::StaleLifetimeToken,
            LedgerError::Rejected(reason) => StepFailure::Rejected(reason),
            transport => StepFailure::Ledger(transport),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Confirmed { signature: Signature },
    Failed { cause: StepFailure },
    /// The deadline passed with the message neither confirmed nor expired.
    Unconfirmed { signature: Signature },
}

/// A step that confirmed, with its 1-based position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub index: usize,
    pub total: usize,
    pub label: &'static str,
    pub signature: Signature,
}

/// Cooperative cancellation, observed between steps only.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct SubmissionEngine<'a, L> {
    ledger: &'a L,
    payer: &'a (dyn Signer + Sync),
    settings: SubmissionSettings,
}

impl<'a, L: Ledger> SubmissionEngine<'a, L> {
    pub fn new(ledger: &'a L, payer: &'a (dyn Signer + Sync), settings: SubmissionSettings) -> Self {
        Self {
            ledger,
            payer,
            settings,
        }
    }

    /// One attempt: compile against `token`, sign, submit, await confirmation.
    pub async fn submit_step(
        &self,
        step: &TransferStep,
        token: &LifetimeToken,
        cosigners: &[CoSigner<'_>],
    ) -> SubmissionOutcome {
        let mut transaction =
            match compile_transaction(&self.payer.pubkey(), &step.instructions, token.blockhash) {
                Ok(transaction) => transaction,
                Err(e) => {
                    return SubmissionOutcome::Failed {
                        cause: StepFailure::Compile(e.to_string()),
                    };
                }
            };

        if let Err(e) = sign_transaction(&mut transaction, self.payer, cosigners) {
            return SubmissionOutcome::Failed { cause: e.into() };
        }

        let Some(signature) = transaction.signatures.first().copied() else {
            return SubmissionOutcome::Failed {
                cause: StepFailure::Compile("message carries no fee payer signature".into()),
            };
        };

        // A transport error may arrive after the message reached the cluster,
        // so the outcome is settled by polling rather than by the error.
        if let Err(e) = self.ledger.submit(&transaction).await {
            match StepFailure::from(e) {
                StepFailure::Ledger(err) => {
                    warn!(%signature, error = %err, "Submission outcome unknown, polling for status")
                }
                cause => return SubmissionOutcome::Failed { cause },
            }
        }

        self.await_confirmation(signature, token.expiry_height).await
    }

    /// Runs a step with a fresh lifetime token per attempt.
    pub async fn execute_step(
        &self,
        index: usize,
        step: &TransferStep,
        contexts: &ContextAccounts,
    ) -> SubmissionOutcome {
        let cosigners: Vec<CoSigner<'_>> = step
            .cosigners
            .iter()
            .map(|kind| {
                let account = contexts.get(*kind);
                CoSigner {
                    signer: account.keypair(),
                    expected_pubkey: account.pubkey(),
                }
            })
            .collect();

        let mut attempt = 1;
        loop {
            let token = match self.ledger.get_lifetime_token().await {
                Ok(token) => token,
                Err(e) => return SubmissionOutcome::Failed { cause: e.into() },
            };

            let outcome = self.submit_step(step, &token, &cosigners).await;
            match outcome {
                SubmissionOutcome::Failed {
                    cause: StepFailure::StaleLifetimeToken,
                } if attempt < self.settings.max_attempts => {
                    warn!(
                        step = index,
                        attempt,
                        label = step.label,
                        "Lifetime token went stale, retrying with a fresh one"
                    );
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    /// Polls until the message confirms, fails, provably expires or the
    /// deadline passes.
    pub async fn await_confirmation(&self, signature: Signature, expiry_height: u64) -> SubmissionOutcome {
        let deadline = Instant::now() + self.settings.confirm_timeout;

        loop {
            match self.ledger.get_status(&signature).await {
                Ok(MessageStatus::ConfirmedOk) => return SubmissionOutcome::Confirmed { signature },
                Ok(MessageStatus::ConfirmedErr(reason)) => {
                    return SubmissionOutcome::Failed {
                        cause: StepFailure::ExecutionFailed { signature, reason },
                    };
                }
                Ok(MessageStatus::Pending) => {}
                Ok(MessageStatus::Unknown) => match self.ledger.get_block_height().await {
                    Ok(height) if height > expiry_height => {
                        return SubmissionOutcome::Failed {
                            cause: StepFailure::StaleLifetimeToken,
                        };
                    }
                    Ok(_) => {}
                    Err(e) => warn!(%signature, error = %e, "Block height query failed"),
                },
                Err(e) => warn!(%signature, error = %e, "Status poll failed"),
            }

            if Instant::now() >= deadline {
                return SubmissionOutcome::Unconfirmed { signature };
            }
            sleep(self.settings.poll_interval).await;
        }
    }

    /// Executes `steps` in order, stopping at the first step that does not
    /// confirm. Confirmed steps are never rolled back.
    pub async fn run(
        &self,
        steps: &[TransferStep],
        contexts: &mut ContextAccounts,
        cancellation: &CancellationFlag,
    ) -> Result<Vec<StepReport>, TransferFailure> {
        let total = steps.len();
        let mut completed: Vec<StepReport> = Vec::with_capacity(total);

        for (offset, step) in steps.iter().enumerate() {
            let index = offset + 1;

            if cancellation.is_cancelled() {
                warn!(step = index, total, "Transfer cancelled before step");
                return Err(TransferFailure::new(TransferError::Cancelled, completed, contexts));
            }

            info!(step = index, total, label = step.label, "Submitting step");
            let mut unconfirmed_accounts = Vec::new();
            let error = match self.execute_step(index, step, contexts).await {
                SubmissionOutcome::Confirmed { signature } => {
                    for transition in &step.transitions {
                        contexts.apply(*transition);
                    }
                    info!(
                        step = index,
                        total,
                        "Transfer [{}] with signature={}",
                        step.label,
                        signature
                    );
                    completed.push(StepReport {
                        index,
                        total,
                        label: step.label,
                        signature,
                    });
                    continue;
                }
                SubmissionOutcome::Failed {
                    cause: StepFailure::StaleLifetimeToken,
                } => TransferError::LifetimeTokenExhausted {
                    index,
                    label: step.label,
                    attempts: self.settings.max_attempts,
                },
                SubmissionOutcome::Failed { cause } => TransferError::StepFailed {
                    index,
                    label: step.label,
                    cause,
                },
                SubmissionOutcome::Unconfirmed { signature } => {
                    unconfirmed_accounts = step
                        .transitions
                        .iter()
                        .filter_map(|transition| match transition {
                            Transition::Create(kind) => Some(contexts.get(*kind).pubkey()),
                            _ => None,
                        })
                        .collect();
                    TransferError::Unconfirmed {
                        index,
                        label: step.label,
                        signature,
                    }
                }
            };

            error!(step = index, total, label = step.label, error = %error, "Transfer aborted");
            return Err(TransferFailure::new(error, completed, contexts)
                .with_unconfirmed_context_accounts(unconfirmed_accounts));
        }

        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solana::{
        context::ContextState,
        instruction::{ConfidentialInstruction, CreateContextAccount},
        plan::TransferStep,
        testing::{LedgerCall, MockLedger},
        zk::ProofKind,
    };
    use solana_keypair::Keypair;
    use solana_pubkey::Pubkey;
    use solana_system_interface::instruction as system_instruction;

    fn fast_settings() -> SubmissionSettings {
        SubmissionSettings {
            max_attempts: 3,
            poll_interval: Duration::from_millis(1),
            confirm_timeout: Duration::from_millis(25),
        }
    }

    fn transfer_step(payer: &Keypair) -> TransferStep {
        TransferStep {
            label: "Pay",
            instructions: vec![system_instruction::transfer(
                &payer.pubkey(),
                &Pubkey::new_unique(),
                1,
            )],
            cosigners: vec![],
            transitions: vec![],
        }
    }

    fn create_step(payer: &Keypair, contexts: &ContextAccounts, kind: ProofKind) -> TransferStep {
        TransferStep {
            label: "Create",
            instructions: vec![
                ConfidentialInstruction::CreateContextAccount(CreateContextAccount {
                    payer: payer.pubkey(),
                    context_account: contexts.get(kind).pubkey(),
                    lamports: 1,
                    space: 161,
                })
                .encode(),
            ],
            cosigners: vec![kind],
            transitions: vec![Transition::Create(kind)],
        }
    }

    fn submissions(ledger: &MockLedger) -> usize {
        ledger
            .calls()
            .iter()
            .filter(|call| matches!(call, LedgerCall::Submit(_)))
            .count()
    }

    #[tokio::test]
    async fn test_confirmed_step_applies_transitions() {
        let ledger = MockLedger::default();
        let payer = Keypair::new();
        let mut contexts = ContextAccounts::generate();
        let step = create_step(&payer, &contexts, ProofKind::Equality);
        let engine = SubmissionEngine::new(&ledger, &payer, fast_settings());

        let reports = engine
            .run(&[step], &mut contexts, &CancellationFlag::default())
            .await
            .unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!((reports[0].index, reports[0].total), (1, 1));
        assert_eq!(contexts.equality.state(), ContextState::Created);

        let submitted = ledger.submitted();
        assert_eq!(submitted.len(), 1);
        assert!(submitted[0].verify_with_results().iter().all(|ok| *ok));
    }

    #[tokio::test]
    async fn test_stale_token_retried_with_fresh_token() {
        let ledger = MockLedger::default();
        ledger.queue_submit(Err(LedgerError::StaleLifetimeToken));
        let payer = Keypair::new();
        let contexts = ContextAccounts::generate();
        let step = transfer_step(&payer);
        let engine = SubmissionEngine::new(&ledger, &payer, fast_settings());

        let outcome = engine.execute_step(1, &step, &contexts).await;
        assert!(matches!(outcome, SubmissionOutcome::Confirmed { .. }));

        let submitted = ledger.submitted();
        assert_eq!(submitted.len(), 2);
        let (first, second) = (&submitted[0].message, &submitted[1].message);
        assert_ne!(first.recent_blockhash(), second.recent_blockhash());
        assert_ne!(submitted[0].signatures, submitted[1].signatures);
        assert_eq!(first.instructions(), second.instructions());
        assert_eq!(first.static_account_keys(), second.static_account_keys());
        assert_eq!(first.header(), second.header());
    }

    #[tokio::test]
    async fn test_stale_token_exhausts_attempts() {
        let ledger = MockLedger::default();
        for _ in 0..3 {
            ledger.queue_submit(Err(LedgerError::StaleLifetimeToken));
        }
        let payer = Keypair::new();
        let mut contexts = ContextAccounts::generate();
        let engine = SubmissionEngine::new(&ledger, &payer, fast_settings());

        let failure = engine
            .run(&[transfer_step(&payer)], &mut contexts, &CancellationFlag::default())
            .await
            .unwrap_err();

        assert_eq!(
            failure.error,
            TransferError::LifetimeTokenExhausted {
                index: 1,
                label: "Pay",
                attempts: 3
            }
        );
        assert_eq!(submissions(&ledger), 3);
    }

    #[tokio::test]
    async fn test_expired_unknown_message_is_stale() {
        let ledger = MockLedger::default();
        ledger.queue_status(Ok(MessageStatus::Unknown));
        let payer = Keypair::new();
        let engine = SubmissionEngine::new(&ledger, &payer, fast_settings());

        ledger.set_block_height(10);
        let token = ledger.get_lifetime_token().await.unwrap();
        ledger.set_block_height(token.expiry_height + 1);

        let outcome = engine
            .submit_step(&transfer_step(&payer), &token, &[])
            .await;
        assert_eq!(
            outcome,
            SubmissionOutcome::Failed {
                cause: StepFailure::StaleLifetimeToken
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_within_lifetime_keeps_polling() {
        let ledger = MockLedger::default();
        ledger.queue_status(Ok(MessageStatus::Unknown));
        ledger.queue_status(Err(LedgerError::Transport("timeout".into())));
        ledger.queue_status(Ok(MessageStatus::Pending));
        let payer = Keypair::new();
        let engine = SubmissionEngine::new(&ledger, &payer, fast_settings());

        let token = ledger.get_lifetime_token().await.unwrap();
        let outcome = engine.submit_step(&transfer_step(&payer), &token, &[]).await;

        assert!(matches!(outcome, SubmissionOutcome::Confirmed { .. }));
        let polls = ledger
            .calls()
            .iter()
            .filter(|call| matches!(call, LedgerCall::Status(_)))
            .count();
        assert_eq!(polls, 4);
    }

    #[tokio::test]
    async fn test_poll_timeout_is_unconfirmed() {
        let ledger = MockLedger::default();
        ledger.set_default_status(MessageStatus::Pending);
        let payer = Keypair::new();
        let mut contexts = ContextAccounts::generate();
        let engine = SubmissionEngine::new(&ledger, &payer, fast_settings());

        let failure = engine
            .run(
                &[transfer_step(&payer), transfer_step(&payer)],
                &mut contexts,
                &CancellationFlag::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            failure.error,
            TransferError::Unconfirmed { index: 1, .. }
        ));
        assert!(failure.completed.is_empty());
        assert_eq!(submissions(&ledger), 1);
    }

    #[tokio::test]
    async fn test_onchain_failure_is_not_retried() {
        let ledger = MockLedger::default();
        ledger.queue_status(Ok(MessageStatus::ConfirmedErr("InstructionError".into())));
        let payer = Keypair::new();
        let mut contexts = ContextAccounts::generate();
        let steps = [transfer_step(&payer), transfer_step(&payer)];
        let engine = SubmissionEngine::new(&ledger, &payer, fast_settings());

        let failure = engine
            .run(&steps, &mut contexts, &CancellationFlag::default())
            .await
            .unwrap_err();

        assert!(matches!(
            failure.error,
            TransferError::StepFailed {
                index: 1,
                cause: StepFailure::ExecutionFailed { .. },
                ..
            }
        ));
        assert_eq!(submissions(&ledger), 1);
    }

    #[tokio::test]
    async fn test_failure_reports_last_confirmed_and_stranded() {
        let ledger = MockLedger::default();
        let payer = Keypair::new();
        let mut contexts = ContextAccounts::generate();
        let steps = [
            create_step(&payer, &contexts, ProofKind::Range),
            transfer_step(&payer),
        ];
        ledger.queue_status(Ok(MessageStatus::ConfirmedOk));
        ledger.queue_submit(Ok(()));
        ledger.queue_submit(Err(LedgerError::Rejected("insufficient funds".into())));
        let engine = SubmissionEngine::new(&ledger, &payer, fast_settings());

        let failure = engine
            .run(&steps, &mut contexts, &CancellationFlag::default())
            .await
            .unwrap_err();

        assert_eq!(
            failure.error,
            TransferError::StepFailed {
                index: 2,
                label: "Pay",
                cause: StepFailure::Rejected("insufficient funds".into())
            }
        );
        let last = failure.last_confirmed.expect("first step confirmed");
        assert_eq!((last.index, last.label), (1, "Create"));
        assert_eq!(failure.stranded_context_accounts, vec![contexts.range.pubkey()]);
    }

    #[tokio::test]
    async fn test_unconfirmed_create_reports_account() {
        let ledger = MockLedger::default();
        ledger.set_default_status(MessageStatus::Pending);
        let payer = Keypair::new();
        let mut contexts = ContextAccounts::generate();
        let step = create_step(&payer, &contexts, ProofKind::Equality);
        let engine = SubmissionEngine::new(&ledger, &payer, fast_settings());

        let failure = engine
            .run(&[step], &mut contexts, &CancellationFlag::default())
            .await
            .unwrap_err();

        assert!(matches!(failure.error, TransferError::Unconfirmed { index: 1, .. }));
        assert!(failure.stranded_context_accounts.is_empty());
        assert_eq!(
            failure.unconfirmed_context_accounts,
            vec![contexts.equality.pubkey()]
        );
        assert_eq!(contexts.equality.state(), ContextState::Unfunded);
    }

    #[tokio::test]
    async fn test_unconfirmed_transfer_reports_no_new_accounts() {
        let ledger = MockLedger::default();
        ledger.set_default_status(MessageStatus::Pending);
        let payer = Keypair::new();
        let mut contexts = ContextAccounts::generate();
        let engine = SubmissionEngine::new(&ledger, &payer, fast_settings());

        let failure = engine
            .run(&[transfer_step(&payer)], &mut contexts, &CancellationFlag::default())
            .await
            .unwrap_err();

        assert!(failure.unconfirmed_context_accounts.is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_after_send_awaits_status() {
        let ledger = MockLedger::default();
        ledger.queue_submit(Err(LedgerError::Transport("connection reset after send".into())));
        let payer = Keypair::new();
        let contexts = ContextAccounts::generate();
        let step = transfer_step(&payer);
        let engine = SubmissionEngine::new(&ledger, &payer, fast_settings());

        let outcome = engine.execute_step(1, &step, &contexts).await;

        let submitted = ledger.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(
            outcome,
            SubmissionOutcome::Confirmed {
                signature: submitted[0].signatures[0]
            }
        );
        assert!(
            ledger
                .calls()
                .contains(&LedgerCall::Status(submitted[0].signatures[0]))
        );
    }

    #[tokio::test]
    async fn test_transport_error_with_pending_status_is_unconfirmed() {
        let ledger = MockLedger::default();
        ledger.queue_submit(Err(LedgerError::Transport("connection reset after send".into())));
        ledger.set_default_status(MessageStatus::Pending);
        let payer = Keypair::new();
        let mut contexts = ContextAccounts::generate();
        let engine = SubmissionEngine::new(&ledger, &payer, fast_settings());

        let failure = engine
            .run(&[transfer_step(&payer)], &mut contexts, &CancellationFlag::default())
            .await
            .unwrap_err();

        assert!(matches!(failure.error, TransferError::Unconfirmed { index: 1, .. }));
        assert!(!failure.error.is_retryable());
        assert_eq!(submissions(&ledger), 1);
    }

    #[tokio::test]
    async fn test_cancellation_checked_between_steps() {
        let ledger = MockLedger::default();
        let payer = Keypair::new();
        let mut contexts = ContextAccounts::generate();
        let cancellation = CancellationFlag::default();
        cancellation.cancel();
        let engine = SubmissionEngine::new(&ledger, &payer, fast_settings());

        let failure = engine
            .run(&[transfer_step(&payer)], &mut contexts, &cancellation)
            .await
            .unwrap_err();

        assert_eq!(failure.error, TransferError::Cancelled);
        assert!(ledger.calls().is_empty());
    }
}
