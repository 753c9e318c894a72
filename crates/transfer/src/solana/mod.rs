pub mod balance;
pub mod ciphertext;
pub mod confidential_keys;
pub mod context;
pub mod instruction;
pub mod ledger;
pub mod plan;
pub mod proof;
pub mod submit;
pub mod transaction;
pub mod transfer;
pub mod zk;

#[cfg(test)]
pub mod testing;
