//! Ephemeral context state accounts and their lifecycle.
//!
//! Each proof is verified into its own freshly generated account. The proof
//! program keys verified state by account address, so an account is used for
//! exactly one transfer and is unusable once closed.

use solana_keypair::Keypair;
use solana_pubkey::Pubkey;
use solana_signer::Signer;
use std::fmt;

use crate::solana::zk::ProofKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContextState {
    Unfunded,
    Created,
    Verified,
    Consumed,
    Closed,
}

/// A confirmed effect a step has on one context account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Create(ProofKind),
    Verify(ProofKind),
    /// The transfer consumes all three proofs and closes them in one message.
    ConsumeAndClose,
}

pub struct ContextAccount {
    keypair: Keypair,
    kind: ProofKind,
    state: ContextState,
}

impl ContextAccount {
    pub fn generate(kind: ProofKind) -> Self {
        Self {
            keypair: Keypair::new(),
            kind,
            state: ContextState::Unfunded,
        }
    }

    pub fn kind(&self) -> ProofKind {
        self.kind
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Address of the account. Panics once the account is closed.
    pub fn pubkey(&self) -> Pubkey {
        self.assert_open();
        self.keypair.pubkey()
    }

    /// Signing key for the create step. Panics once the account is closed.
    pub fn keypair(&self) -> &Keypair {
        self.assert_open();
        &self.keypair
    }

    pub fn mark_created(&mut self) {
        self.advance(ContextState::Unfunded, ContextState::Created);
    }

    pub fn mark_verified(&mut self) {
        self.advance(ContextState::Created, ContextState::Verified);
    }

    pub fn mark_consumed(&mut self) {
        self.advance(ContextState::Verified, ContextState::Consumed);
    }

    pub fn mark_closed(&mut self) {
        self.advance(ContextState::Consumed, ContextState::Closed);
    }

    fn advance(&mut self, from: ContextState, to: ContextState) {
        assert_eq!(
            self.state, from,
            "{} context account {} cannot move to {:?}",
            self.kind,
            self.keypair.pubkey(),
            to
        );
        self.state = to;
    }

    fn assert_open(&self) {
        assert!(
            self.state != ContextState::Closed,
            "{} context account {} used after close",
            self.kind,
            self.keypair.pubkey()
        );
    }
}

impl fmt::Debug for ContextAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextAccount")
            .field("kind", &self.kind)
            .field("pubkey", &self.keypair.pubkey())
            .field("state", &self.state)
            .finish()
    }
}

/// The three context accounts of one transfer.
#[derive(Debug)]
pub struct ContextAccounts {
    pub equality: ContextAccount,
    pub ciphertext_validity: ContextAccount,
    pub range: ContextAccount,
}

impl ContextAccounts {
    pub fn generate() -> Self {
        Self {
            equality: ContextAccount::generate(ProofKind::Equality),
            ciphertext_validity: ContextAccount::generate(ProofKind::CiphertextValidity),
            range: ContextAccount::generate(ProofKind::Range),
        }
    }

    pub fn get(&self, kind: ProofKind) -> &ContextAccount {
        match kind {
            ProofKind::Equality => &self.equality,
            ProofKind::CiphertextValidity => &self.ciphertext_validity,
            ProofKind::Range => &self.range,
        }
    }

    pub fn get_mut(&mut self, kind: ProofKind) -> &mut ContextAccount {
        match kind {
            ProofKind::Equality => &mut self.equality,
            ProofKind::CiphertextValidity => &mut self.ciphertext_validity,
            ProofKind::Range => &mut self.range,
        }
    }

    /// Records the confirmed effect of a step.
    pub fn apply(&mut self, transition: Transition) {
        match transition {
            Transition::Create(kind) => self.get_mut(kind).mark_created(),
            Transition::Verify(kind) => self.get_mut(kind).mark_verified(),
            Transition::ConsumeAndClose => {
                for kind in ProofKind::ALL {
                    let account = self.get_mut(kind);
                    account.mark_consumed();
                    account.mark_closed();
                }
            }
        }
    }

    /// Accounts created on-chain and not yet closed. These hold rent that must
    /// be reclaimed by hand if the transfer stops early.
    pub fn stranded(&self) -> Vec<Pubkey> {
        ProofKind::ALL
            .into_iter()
            .map(|kind| self.get(kind))
            .filter(|account| {
                account.state() != ContextState::Unfunded && account.state() != ContextState::Closed
            })
            .map(ContextAccount::pubkey)
            .collect()
    }
}
