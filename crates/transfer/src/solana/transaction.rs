use solana_hash::Hash;
use solana_instruction::Instruction;
use solana_message::{CompileError, VersionedMessage, v0::Message};
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_transaction::versioned::VersionedTransaction;

pub const SIGNATURE_LEN: usize = 64;

/// Compiles `instructions` into an unsigned v0 transaction with one empty
/// slot per required signer.
pub fn compile_transaction(
    fee_payer: &Pubkey,
    instructions: &[Instruction],
    recent_blockhash: Hash,
) -> Result<VersionedTransaction, CompileError> {
    let message = VersionedMessage::V0(Message::try_compile(
        fee_payer,
        instructions,
        &[],
        recent_blockhash,
    )?);
    let required_signatures = message.header().num_required_signatures as usize;

    Ok(VersionedTransaction {
        signatures: vec![Signature::default(); required_signatures],
        message,
    })
}

/// Wire size of the transaction: signature count, signatures, message.
pub fn serialized_len(transaction: &VersionedTransaction) -> usize {
    let signatures = transaction.signatures.len();
    compact_u16_len(signatures) + signatures * SIGNATURE_LEN + transaction.message.serialize().len()
}

fn compact_u16_len(value: usize) -> usize {
    match value {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        _ => 3,
    }
}
