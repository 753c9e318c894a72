//! Partitioning a transfer into size-bounded messages.
//!
//! The three proofs do not fit in one message, so each is verified into its
//! own context account ahead of the transfer:
//!
//! 1. create + verify the equality context
//! 2. create + verify the ciphertext validity context
//! 3. create the range context
//! 4. verify the range proof (the range proof alone nearly fills a message)
//! 5. transfer, then close all three contexts in the same message
//!
//! Steps run strictly in order; step 5 reads the state steps 1-4 produced.

use solana_hash::Hash;
use solana_instruction::Instruction;
use solana_pubkey::Pubkey;
use thiserror::Error;

use crate::solana::{
    context::{ContextAccounts, Transition},
    instruction::{
        CloseContextState, ConfidentialInstruction, CreateContextAccount, Transfer, VerifyProof,
    },
    proof::ProofBundle,
    transaction::{compile_transaction, serialized_len},
    transfer::TransferIntent,
    zk::{ContextLayouts, ProofKind},
};

pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1232;

pub const TRANSFER_STEP_LABELS: [&str; 5] = [
    "Create Proof Account: Equality",
    "Create Proof Account: Ciphertext Validity",
    "Create Proof Account: Range",
    "Verify Proof Account: Range",
    "Transfer and Close Proof Accounts",
];

/// Proofs are read from context accounts, never from sibling instructions.
const CONTEXT_ACCOUNT_PROOF_OFFSET: i8 = 0;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("step {index} ({label}) serializes to {size} bytes, over the {limit} byte limit")]
    StepTooLarge {
        index: usize,
        label: &'static str,
        size: usize,
        limit: usize,
    },

    #[error("failed to compile step {index} ({label}): {reason}")]
    Compile {
        index: usize,
        label: &'static str,
        reason: String,
    },
}

/// One message of the transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStep {
    pub label: &'static str,
    pub instructions: Vec<Instruction>,
    /// Context accounts whose keypairs must co-sign, besides the payer.
    pub cosigners: Vec<ProofKind>,
    /// Lifecycle effects applied once the step is confirmed.
    pub transitions: Vec<Transition>,
}

pub struct MessagePlanner {
    payer: Pubkey,
    max_message_bytes: usize,
}

impl MessagePlanner {
    pub fn new(payer: Pubkey, max_message_bytes: usize) -> Self {
        Self {
            payer,
            max_message_bytes,
        }
    }

    pub fn plan(
        &self,
        intent: &TransferIntent,
        bundle: &ProofBundle,
        contexts: &ContextAccounts,
        layouts: &ContextLayouts,
    ) -> Result<Vec<TransferStep>, PlanError> {
        let authority = intent.sender;

        let create = |kind: ProofKind| {
            let layout = layouts.get(kind);
            ConfidentialInstruction::CreateContextAccount(CreateContextAccount {
                payer: self.payer,
                context_account: contexts.get(kind).pubkey(),
                lamports: layout.rent_lamports,
                space: layout.byte_size as u64,
            })
            .encode()
        };
        let verify = |kind: ProofKind, proof_data: &[u8]| {
            ConfidentialInstruction::VerifyProof(VerifyProof {
                kind,
                context_account: contexts.get(kind).pubkey(),
                context_authority: authority,
                proof_data: proof_data.to_vec(),
            })
            .encode()
        };
        let close = |kind: ProofKind| {
            ConfidentialInstruction::CloseContextState(CloseContextState {
                context_account: contexts.get(kind).pubkey(),
                destination: self.payer,
                context_authority: authority,
            })
            .encode()
        };

        let transfer = ConfidentialInstruction::Transfer(Transfer {
            source: intent.source_token_account,
            mint: intent.mint,
            destination: intent.destination_token_account,
            equality_proof_context: contexts.equality.pubkey(),
            ciphertext_validity_proof_context: contexts.ciphertext_validity.pubkey(),
            range_proof_context: contexts.range.pubkey(),
            authority,
            new_decryptable_available_balance: bundle.new_decryptable_available_balance,
            auditor_ciphertext_lo: bundle.amount_ciphertext_lo.auditor_ciphertext().to_bytes(),
            auditor_ciphertext_hi: bundle.amount_ciphertext_hi.auditor_ciphertext().to_bytes(),
            equality_proof_offset: CONTEXT_ACCOUNT_PROOF_OFFSET,
            ciphertext_validity_proof_offset: CONTEXT_ACCOUNT_PROOF_OFFSET,
            range_proof_offset: CONTEXT_ACCOUNT_PROOF_OFFSET,
        })
        .encode();

        let [equality_label, validity_label, range_create_label, range_verify_label, transfer_label] =
            TRANSFER_STEP_LABELS;

        let steps = vec![
            TransferStep {
                label: equality_label,
                instructions: vec![
                    create(ProofKind::Equality),
                    verify(ProofKind::Equality, &bundle.equality_proof),
                ],
                cosigners: vec![ProofKind::Equality],
                transitions: vec![
                    Transition::Create(ProofKind::Equality),
                    Transition::Verify(ProofKind::Equality),
                ],
            },
            TransferStep {
                label: validity_label,
                instructions: vec![
                    create(ProofKind::CiphertextValidity),
                    verify(ProofKind::CiphertextValidity, &bundle.ciphertext_validity_proof),
                ],
                cosigners: vec![ProofKind::CiphertextValidity],
                transitions: vec![
                    Transition::Create(ProofKind::CiphertextValidity),
                    Transition::Verify(ProofKind::CiphertextValidity),
                ],
            },
            TransferStep {
                label: range_create_label,
                instructions: vec![create(ProofKind::Range)],
                cosigners: vec![ProofKind::Range],
                transitions: vec![Transition::Create(ProofKind::Range)],
            },
            TransferStep {
                label: range_verify_label,
                instructions: vec![verify(ProofKind::Range, &bundle.range_proof)],
                cosigners: vec![],
                transitions: vec![Transition::Verify(ProofKind::Range)],
            },
            TransferStep {
                label: transfer_label,
                instructions: vec![
                    transfer,
                    close(ProofKind::Equality),
                    close(ProofKind::CiphertextValidity),
                    close(ProofKind::Range),
                ],
                cosigners: vec![],
                transitions: vec![Transition::ConsumeAndClose],
            },
        ];

        for (index, step) in steps.iter().enumerate() {
            self.check_size(index + 1, step)?;
        }

        Ok(steps)
    }

    /// The blockhash is fixed-width, so any placeholder gives the final size.
    pub fn serialized_step_len(&self, index: usize, step: &TransferStep) -> Result<usize, PlanError> {
        let transaction = compile_transaction(&self.payer, &step.instructions, Hash::default())
            .map_err(|e| PlanError::Compile {
                index,
                label: step.label,
                reason: e.to_string(),
            })?;
        Ok(serialized_len(&transaction))
    }

    fn check_size(&self, index: usize, step: &TransferStep) -> Result<(), PlanError> {
        let size = self.serialized_step_len(index, step)?;
        if size > self.max_message_bytes {
            return Err(PlanError::StepTooLarge {
                index,
                label: step.label,
                size,
                limit: self.max_message_bytes,
            });
        }
        Ok(())
    }
}
