//! Utility functions and helpers
//!
//! Hashing, ECDSA helpers, clock access and the bincode storage codec.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    current_ticks, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, new_key_pair, sha256_digest, sha256_hex,
};

pub use serialization::{deserialize, serialize};
