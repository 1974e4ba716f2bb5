//! Account keystore and selection.
//!
//! The gateway signs transactions with exactly one "selected" account at a
//! time. [`AccountSelector`] tracks it; [`KeyStore`] is the seam to the key
//! storage collaborator. [`DirKeyStore`] is the bundled file-per-key store.
//!
//! # Modules
//!
//! - [`keystore`] — `KeyStore` trait and the directory-backed store.
//! - [`selector`] — single selected account, `select` / `logout`.

pub mod keystore;
pub mod selector;

pub use keystore::{DirKeyStore, KeyStore, UnlockedKey};
pub use selector::{AccountSelector, SelectedAccount};

use alloy_primitives::keccak256;
use embergate_types::Address;
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;

/// Derives the Ethereum address of a secp256k1 signing key:
/// the low 20 bytes of `keccak256(uncompressed_pubkey[1..])`.
pub fn address_of(key: &SigningKey) -> Address {
    let point = key.verifying_key().to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&digest[12..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_derivation_known_key() {
        // Private key 0x4646...46 — the address is fixed by the curve, so
        // any regression in pubkey serialization or hashing shows up here.
        let key = SigningKey::from_slice(&[0x46u8; 32]).expect("valid key");
        let address = address_of(&key);
        assert_eq!(
            address.to_string().to_lowercase(),
            "0x9d8a62f656a8d1615c1294fd71e9cfb3e4855a4f",
        );
    }
}
