//! Wallet management
//!
//! ECDSA P-256 identity, address derivation and the local wallet file.

#[allow(clippy::module_inception)]
pub mod wallet;
pub mod wallets;

pub use wallet::{hash_pub_key, Wallet};
pub use wallets::{WalletStore, WALLET_FILE};
