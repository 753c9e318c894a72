//! Byte-exact encoding of every instruction a split-proof transfer emits.
//!
//! The proof program and the token program accept no extra or missing bytes,
//! so each instruction is described by a typed value and encoded by hand.
//! [`ConfidentialInstruction::decode`] is the exact inverse and rejects
//! anything that does not match the layout, including account roles.
//!
//! Layouts:
//! - create context account (system program):
//!   `[0u32][lamports:u64][space:u64][owner:32]`,
//!   accounts `[payer(w,s), context(w,s)]`
//! - verify proof (proof program): `[discriminator:u8][proof data]`,
//!   accounts `[context(w), authority]`
//! - close context state (proof program): `[0u8]`,
//!   accounts `[context(w), destination(w), authority(s)]`
//! - transfer (token program, 169 bytes):
//!   `[27][7][new decryptable balance:36][auditor lo:64][auditor hi:64]
//!   [equality offset:i8][validity offset:i8][range offset:i8]`,
//!   accounts `[source(w), mint, destination(w), equality ctx, validity ctx,
//!   range ctx, authority(s)]`

use solana_instruction::{AccountMeta, Instruction};
use solana_pubkey::Pubkey;
use spl_token_2022::solana_zk_sdk::zk_elgamal_proof_program;
use thiserror::Error;

use crate::solana::{
    ciphertext::{AE_CIPHERTEXT_LEN, ELGAMAL_CIPHERTEXT_LEN},
    zk::{CLOSE_CONTEXT_STATE_DISCRIMINATOR, ProofKind},
};

pub const CONFIDENTIAL_TRANSFER_EXTENSION_DISCRIMINATOR: u8 = 27;
pub const CONFIDENTIAL_TRANSFER_TRANSFER_DISCRIMINATOR: u8 = 7;
pub const TRANSFER_INSTRUCTION_DATA_LEN: usize =
    2 + AE_CIPHERTEXT_LEN + 2 * ELGAMAL_CIPHERTEXT_LEN + 3;

const CREATE_ACCOUNT_DISCRIMINATOR: u32 = 0;
pub const CREATE_ACCOUNT_DATA_LEN: usize = 4 + 8 + 8 + 32;

const NEW_BALANCE_START: usize = 2;
const AUDITOR_LO_START: usize = NEW_BALANCE_START + AE_CIPHERTEXT_LEN;
const AUDITOR_HI_START: usize = AUDITOR_LO_START + ELGAMAL_CIPHERTEXT_LEN;
const OFFSETS_START: usize = AUDITOR_HI_START + ELGAMAL_CIPHERTEXT_LEN;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("proof instruction offset {0} does not fit in a signed byte")]
    OffsetOutOfRange(i64),

    #[error("instruction targets unexpected program {0}")]
    UnexpectedProgram(Pubkey),

    #[error("unknown instruction discriminator {0}")]
    UnknownDiscriminator(u32),

    #[error("instruction data is {actual} bytes, expected {expected}")]
    DataLength { expected: usize, actual: usize },

    #[error("account list does not match the {0} layout")]
    AccountLayout(&'static str),

    #[error("context account owner {0} is not the proof program")]
    UnexpectedOwner(Pubkey),
}

/// Converts a relative instruction index into the signed-byte offset the
/// token program expects. Zero means the proof lives in a context account.
pub fn proof_instruction_offset(relative_index: i64) -> Result<i8, EncodeError> {
    i8::try_from(relative_index).map_err(|_| EncodeError::OffsetOutOfRange(relative_index))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateContextAccount {
    pub payer: Pubkey,
    pub context_account: Pubkey,
    pub lamports: u64,
    pub space: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyProof {
    pub kind: ProofKind,
    pub context_account: Pubkey,
    pub context_authority: Pubkey,
    pub proof_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseContextState {
    pub context_account: Pubkey,
    pub destination: Pubkey,
    pub context_authority: Pubkey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub source: Pubkey,
    pub mint: Pubkey,
    pub destination: Pubkey,
    pub equality_proof_context: Pubkey,
    pub ciphertext_validity_proof_context: Pubkey,
    pub range_proof_context: Pubkey,
    pub authority: Pubkey,
    pub new_decryptable_available_balance: [u8; AE_CIPHERTEXT_LEN],
    pub auditor_ciphertext_lo: [u8; ELGAMAL_CIPHERTEXT_LEN],
    pub auditor_ciphertext_hi: [u8; ELGAMAL_CIPHERTEXT_LEN],
    pub equality_proof_offset: i8,
    pub ciphertext_validity_proof_offset: i8,
    pub range_proof_offset: i8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfidentialInstruction {
    CreateContextAccount(CreateContextAccount),
    VerifyProof(VerifyProof),
    CloseContextState(CloseContextState),
    Transfer(Transfer),
}

impl ConfidentialInstruction {
    pub fn encode(&self) -> Instruction {
        match self {
            ConfidentialInstruction::CreateContextAccount(create) => {
                solana_system_interface::instruction::create_account(
                    &create.payer,
                    &create.context_account,
                    create.lamports,
                    create.space,
                    &zk_elgamal_proof_program::id(),
                )
            }
            ConfidentialInstruction::VerifyProof(verify) => {
                let mut data = Vec::with_capacity(1 + verify.proof_data.len());
                data.push(verify.kind.verify_discriminator());
                data.extend_from_slice(&verify.proof_data);

                Instruction {
                    program_id: zk_elgamal_proof_program::id(),
                    accounts: vec![
                        AccountMeta::new(verify.context_account, false),
                        AccountMeta::new_readonly(verify.context_authority, false),
                    ],
                    data,
                }
            }
            ConfidentialInstruction::CloseContextState(close) => Instruction {
                program_id: zk_elgamal_proof_program::id(),
                accounts: vec![
                    AccountMeta::new(close.context_account, false),
                    AccountMeta::new(close.destination, false),
                    AccountMeta::new_readonly(close.context_authority, true),
                ],
                data: vec![CLOSE_CONTEXT_STATE_DISCRIMINATOR],
            },
            ConfidentialInstruction::Transfer(transfer) => Instruction {
                program_id: spl_token_2022::id(),
                accounts: vec![
                    AccountMeta::new(transfer.source, false),
                    AccountMeta::new_readonly(transfer.mint, false),
                    AccountMeta::new(transfer.destination, false),
                    AccountMeta::new_readonly(transfer.equality_proof_context, false),
                    AccountMeta::new_readonly(transfer.ciphertext_validity_proof_context, false),
                    AccountMeta::new_readonly(transfer.range_proof_context, false),
                    AccountMeta::new_readonly(transfer.authority, true),
                ],
                data: encode_transfer_data(transfer),
            },
        }
    }

    pub fn decode(instruction: &Instruction) -> Result<Self, EncodeError> {
        let program_id = instruction.program_id;
        if program_id == solana_system_interface::program::ID {
            decode_create_account(instruction).map(ConfidentialInstruction::CreateContextAccount)
        } else if program_id == zk_elgamal_proof_program::id() {
            decode_proof_instruction(instruction)
        } else if program_id == spl_token_2022::id() {
            decode_transfer(instruction).map(ConfidentialInstruction::Transfer)
        } else {
            Err(EncodeError::UnexpectedProgram(program_id))
        }
    }
}

fn encode_transfer_data(transfer: &Transfer) -> Vec<u8> {
    let mut data = Vec::with_capacity(TRANSFER_INSTRUCTION_DATA_LEN);
    data.push(CONFIDENTIAL_TRANSFER_EXTENSION_DISCRIMINATOR);
    data.push(CONFIDENTIAL_TRANSFER_TRANSFER_DISCRIMINATOR);
    data.extend_from_slice(&transfer.new_decryptable_available_balance);
    data.extend_from_slice(&transfer.auditor_ciphertext_lo);
    data.extend_from_slice(&transfer.auditor_ciphertext_hi);
    data.extend_from_slice(&[
        transfer.equality_proof_offset as u8,
        transfer.ciphertext_validity_proof_offset as u8,
        transfer.range_proof_offset as u8,
    ]);
    data
}

#[derive(Clone, Copy)]
enum Role {
    Writable,
    WritableSigner,
    Readonly,
    ReadonlySigner,
}

impl Role {
    fn matches(self, meta: &AccountMeta) -> bool {
        let (is_writable, is_signer) = match self {
            Role::Writable => (true, false),
            Role::WritableSigner => (true, true),
            Role::Readonly => (false, false),
            Role::ReadonlySigner => (false, true),
        };
        meta.is_writable == is_writable && meta.is_signer == is_signer
    }
}

fn expect_accounts<const N: usize>(
    instruction: &Instruction,
    roles: [Role; N],
    layout: &'static str,
) -> Result<[Pubkey; N], EncodeError> {
    if instruction.accounts.len() != N {
        return Err(EncodeError::AccountLayout(layout));
    }

    let mut keys = [Pubkey::default(); N];
    for ((key, meta), role) in keys.iter_mut().zip(&instruction.accounts).zip(roles) {
        if !role.matches(meta) {
            return Err(EncodeError::AccountLayout(layout));
        }
        *key = meta.pubkey;
    }
    Ok(keys)
}

fn expect_data_len(data: &[u8], expected: usize) -> Result<(), EncodeError> {
    if data.len() != expected {
        return Err(EncodeError::DataLength {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn read_array<const N: usize>(data: &[u8], start: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[start..start + N]);
    out
}

fn decode_create_account(instruction: &Instruction) -> Result<CreateContextAccount, EncodeError> {
    let data = &instruction.data;
    expect_data_len(data, CREATE_ACCOUNT_DATA_LEN)?;

    let discriminator = u32::from_le_bytes(read_array(data, 0));
    if discriminator != CREATE_ACCOUNT_DISCRIMINATOR {
        return Err(EncodeError::UnknownDiscriminator(discriminator));
    }

    let owner = Pubkey::new_from_array(read_array(data, 20));
    if owner != zk_elgamal_proof_program::id() {
        return Err(EncodeError::UnexpectedOwner(owner));
    }

    let [payer, context_account] = expect_accounts(
        instruction,
        [Role::WritableSigner, Role::WritableSigner],
        "create context account",
    )?;

    Ok(CreateContextAccount {
        payer,
        context_account,
        lamports: u64::from_le_bytes(read_array(data, 4)),
        space: u64::from_le_bytes(read_array(data, 12)),
    })
}

fn decode_proof_instruction(instruction: &Instruction) -> Result<ConfidentialInstruction, EncodeError> {
    let Some((&discriminator, proof_data)) = instruction.data.split_first() else {
        return Err(EncodeError::DataLength {
            expected: 1,
            actual: 0,
        });
    };

    if discriminator == CLOSE_CONTEXT_STATE_DISCRIMINATOR {
        expect_data_len(&instruction.data, 1)?;
        let [context_account, destination, context_authority] = expect_accounts(
            instruction,
            [Role::Writable, Role::Writable, Role::ReadonlySigner],
            "close context state",
        )?;
        return Ok(ConfidentialInstruction::CloseContextState(CloseContextState {
            context_account,
            destination,
            context_authority,
        }));
    }

    let kind = ProofKind::from_verify_discriminator(discriminator)
        .ok_or(EncodeError::UnknownDiscriminator(discriminator as u32))?;
    let [context_account, context_authority] = expect_accounts(
        instruction,
        [Role::Writable, Role::Readonly],
        "verify proof",
    )?;

    Ok(ConfidentialInstruction::VerifyProof(VerifyProof {
        kind,
        context_account,
        context_authority,
        proof_data: proof_data.to_vec(),
    }))
}

fn decode_transfer(instruction: &Instruction) -> Result<Transfer, EncodeError> {
    let data = &instruction.data;
    expect_data_len(data, TRANSFER_INSTRUCTION_DATA_LEN)?;

    if data[0] != CONFIDENTIAL_TRANSFER_EXTENSION_DISCRIMINATOR {
        return Err(EncodeError::UnknownDiscriminator(data[0] as u32));
    }
    if data[1] != CONFIDENTIAL_TRANSFER_TRANSFER_DISCRIMINATOR {
        return Err(EncodeError::UnknownDiscriminator(data[1] as u32));
    }

    let [
        source,
        mint,
        destination,
        equality_proof_context,
        ciphertext_validity_proof_context,
        range_proof_context,
        authority,
    ] = expect_accounts(
        instruction,
        [
            Role::Writable,
            Role::Readonly,
            Role::Writable,
            Role::Readonly,
            Role::Readonly,
            Role::Readonly,
            Role::ReadonlySigner,
        ],
        "confidential transfer",
    )?;

    Ok(Transfer {
        source,
        mint,
        destination,
        equality_proof_context,
        ciphertext_validity_proof_context,
        range_proof_context,
        authority,
        new_decryptable_available_balance: read_array(data, NEW_BALANCE_START),
        auditor_ciphertext_lo: read_array(data, AUDITOR_LO_START),
        auditor_ciphertext_hi: read_array(data, AUDITOR_HI_START),
        equality_proof_offset: data[OFFSETS_START] as i8,
        ciphertext_validity_proof_offset: data[OFFSETS_START + 1] as i8,
        range_proof_offset: data[OFFSETS_START + 2] as i8,
    })
}
