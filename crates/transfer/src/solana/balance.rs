//! Reading confidential transfer state from token accounts and mints.
//!
//! Everything a [`TransferIntent`] needs that lives on-chain: the sender's
//! available balance ciphertext (and its AE-decrypted plaintext), the
//! recipient's ElGamal public key and the mint's optional auditor key.

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_pubkey::Pubkey;
use solana_signer::Signer;
use spl_associated_token_account::get_associated_token_address_with_program_id;
use spl_token_2022::{
    extension::{
        BaseStateWithExtensions, StateWithExtensionsOwned,
        confidential_transfer::{ConfidentialTransferAccount, ConfidentialTransferMint},
    },
    solana_zk_sdk::encryption::{auth_encryption::AeCiphertext, pod::elgamal::PodElGamalPubkey},
    state::{Account, Mint},
};
use thiserror::Error;
use tracing::debug;

use crate::solana::{
    ciphertext::{ELGAMAL_CIPHERTEXT_LEN, GROUP_ELEMENT_LEN},
    confidential_keys::{ConfidentialKeys, KeyDerivationError},
    transfer::TransferIntent,
};

#[derive(Debug, Error)]
pub enum AccountStateError {
    #[error("failed to fetch account {account}: {reason}")]
    Fetch { account: Pubkey, reason: String },

    #[error("account {account} is not a confidential transfer account: {reason}")]
    Unpack { account: Pubkey, reason: String },

    #[error("failed to decrypt available balance of {0}")]
    Decrypt(Pubkey),

    #[error(transparent)]
    Keys(#[from] KeyDerivationError),
}

impl AccountStateError {
    /// Whether the failure comes from the accounts themselves rather than the
    /// connection to the cluster.
    pub fn is_account_error(&self) -> bool {
        !matches!(self, AccountStateError::Fetch { .. })
    }
}

/// The sender's confidential balance as held in its token account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderBalance {
    pub available_balance: u64,
    pub available_balance_ciphertext: [u8; ELGAMAL_CIPHERTEXT_LEN],
}

pub fn token_account_address(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    get_associated_token_address_with_program_id(owner, mint, &spl_token_2022::id())
}

fn unpack_error<E: std::fmt::Display>(account: Pubkey) -> impl Fn(E) -> AccountStateError {
    move |e| AccountStateError::Unpack {
        account,
        reason: e.to_string(),
    }
}

pub fn read_sender_balance(
    account: Pubkey,
    data: Vec<u8>,
    keys: &ConfidentialKeys,
) -> Result<SenderBalance, AccountStateError> {
    let state = StateWithExtensionsOwned::<Account>::unpack(data).map_err(unpack_error(account))?;
    let extension = state
        .get_extension::<ConfidentialTransferAccount>()
        .map_err(unpack_error(account))?;

    let decryptable: AeCiphertext = extension
        .decryptable_available_balance
        .try_into()
        .map_err(|_| AccountStateError::Decrypt(account))?;
    let available_balance = keys
        .ae_key
        .decrypt(&decryptable)
        .ok_or(AccountStateError::Decrypt(account))?;

    Ok(SenderBalance {
        available_balance,
        available_balance_ciphertext: bytemuck::cast(extension.available_balance),
    })
}

pub fn read_recipient_elgamal_pubkey(
    account: Pubkey,
    data: Vec<u8>,
) -> Result<[u8; GROUP_ELEMENT_LEN], AccountStateError> {
    let state = StateWithExtensionsOwned::<Account>::unpack(data).map_err(unpack_error(account))?;
    let extension = state
        .get_extension::<ConfidentialTransferAccount>()
        .map_err(unpack_error(account))?;
    Ok(bytemuck::cast(extension.elgamal_pubkey))
}

pub fn read_auditor_elgamal_pubkey(
    mint: Pubkey,
    data: Vec<u8>,
) -> Result<Option<[u8; GROUP_ELEMENT_LEN]>, AccountStateError> {
    let state = StateWithExtensionsOwned::<Mint>::unpack(data).map_err(unpack_error(mint))?;
    let extension = state
        .get_extension::<ConfidentialTransferMint>()
        .map_err(unpack_error(mint))?;
    Ok(Option::<PodElGamalPubkey>::from(extension.auditor_elgamal_pubkey).map(bytemuck::cast))
}

async fn fetch(rpc_client: &RpcClient, account: Pubkey) -> Result<Vec<u8>, AccountStateError> {
    rpc_client
        .get_account(&account)
        .await
        .map(|account| account.data)
        .map_err(|e| AccountStateError::Fetch {
            account,
            reason: e.to_string(),
        })
}

/// Builds the intent for `sender` to move `amount` of `mint` to the
/// associated token account of `recipient`.
pub async fn load_transfer_intent(
    rpc_client: &RpcClient,
    sender: &(dyn Signer + Sync),
    recipient: &Pubkey,
    mint: &Pubkey,
    amount: u64,
) -> Result<TransferIntent, AccountStateError> {
    let sender_pubkey = sender.pubkey();
    let source_token_account = token_account_address(&sender_pubkey, mint);
    let destination_token_account = token_account_address(recipient, mint);
    let sender_keys = ConfidentialKeys::for_token_account(sender, &source_token_account)?;

    let balance = read_sender_balance(
        source_token_account,
        fetch(rpc_client, source_token_account).await?,
        &sender_keys,
    )?;
    let recipient_elgamal_pubkey = read_recipient_elgamal_pubkey(
        destination_token_account,
        fetch(rpc_client, destination_token_account).await?,
    )?;
    let auditor_elgamal_pubkey = read_auditor_elgamal_pubkey(*mint, fetch(rpc_client, *mint).await?)?;

    debug!(
        sender = %sender_pubkey,
        source = %source_token_account,
        destination = %destination_token_account,
        auditor = auditor_elgamal_pubkey.is_some(),
        "Loaded confidential transfer state"
    );

    Ok(TransferIntent {
        sender: sender_pubkey,
        source_token_account,
        destination_token_account,
        mint: *mint,
        sender_keys,
        recipient_elgamal_pubkey,
        auditor_elgamal_pubkey,
        amount,
        available_balance: balance.available_balance,
        available_balance_ciphertext: balance.available_balance_ciphertext,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solana::testing::{elgamal_pubkey_bytes, random_keys};
    use spl_token_2022::{
        extension::{BaseStateWithExtensionsMut, ExtensionType, StateWithExtensionsMut},
        solana_zk_sdk::encryption::pod::{auth_encryption::PodAeCiphertext, elgamal::PodElGamalCiphertext},
        state::AccountState,
    };

    fn token_account_data(keys: &ConfidentialKeys, balance: u64) -> Vec<u8> {
        let len = ExtensionType::try_calculate_account_len::<Account>(&[
            ExtensionType::ConfidentialTransferAccount,
        ])
        .unwrap();
        let mut data = vec![0u8; len];
        let mut state = StateWithExtensionsMut::<Account>::unpack_uninitialized(&mut data).unwrap();
        state.base = Account {
            mint: Pubkey::new_unique(),
            owner: Pubkey::new_unique(),
            state: AccountState::Initialized,
            ..Account::default()
        };
        state.pack_base();
        state.init_account_type().unwrap();

        let extension = state.init_extension::<ConfidentialTransferAccount>(true).unwrap();
        extension.elgamal_pubkey = PodElGamalPubkey::from(*keys.elgamal_keypair.pubkey());
        extension.available_balance =
            PodElGamalCiphertext::from(keys.elgamal_keypair.pubkey().encrypt(balance));
        extension.decryptable_available_balance = PodAeCiphertext::from(keys.ae_key.encrypt(balance));
        data
    }

    #[test]
    fn test_read_sender_balance() {
        let keys = random_keys();
        let account = Pubkey::new_unique();

        let balance = read_sender_balance(account, token_account_data(&keys, 1_000), &keys).unwrap();
        assert_eq!(balance.available_balance, 1_000);
        assert_eq!(
            read_recipient_elgamal_pubkey(account, token_account_data(&keys, 0)).unwrap(),
            elgamal_pubkey_bytes(&keys.elgamal_keypair)
        );
    }

    #[test]
    fn test_read_sender_balance_with_wrong_keys() {
        let keys = random_keys();
        let account = Pubkey::new_unique();

        let err = read_sender_balance(account, token_account_data(&keys, 5), &random_keys()).unwrap_err();
        assert!(matches!(err, AccountStateError::Decrypt(a) if a == account));
        assert!(err.is_account_error());
    }

    #[test]
    fn test_plain_account_is_rejected() {
        let account = Pubkey::new_unique();
        let err = read_recipient_elgamal_pubkey(account, vec![0u8; 10]).unwrap_err();
        assert!(matches!(err, AccountStateError::Unpack { .. }));
    }
}
