//! Account key storage.
//!
//! [`KeyStore`] is the interface the gateway consumes; hardened stores
//! (HSM, platform keychain, scrypt vaults) plug in behind it. The bundled
//! [`DirKeyStore`] keeps one JSON file per key under the node's keystore
//! directory and gates access on a passphrase.
//!
//! # Invariants
//!
//! - A key file never contains the raw secret: the secret is stored XORed
//!   with a passphrase-derived pad, plus a verifier digest so a wrong
//!   passphrase is detected before any key material is reconstructed.
//! - Decrypted secrets are zeroized on drop.

use std::fs;
use std::path::{Path, PathBuf};

use alloy_primitives::keccak256;
use embergate_types::{Address, GatewayError, Result};
use k256::ecdsa::SigningKey;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::address_of;

// ---------------------------------------------------------------------------
// UnlockedKey
// ---------------------------------------------------------------------------

/// A decrypted signing key together with its derived address.
///
/// The contained [`SigningKey`] zeroizes its scalar when dropped.
#[derive(Debug)]
pub struct UnlockedKey {
    /// Address derived from the key.
    pub address: Address,
    /// The secp256k1 signing key.
    pub key: SigningKey,
}

// ---------------------------------------------------------------------------
// KeyStore trait
// ---------------------------------------------------------------------------

/// Interface to the account key storage collaborator.
pub trait KeyStore: Send + Sync {
    /// Lists the addresses of all stored keys.
    fn accounts(&self) -> Result<Vec<Address>>;

    /// Decrypts the key for `address`, verifying passphrase possession.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidPassword`] if the passphrase does not
    ///   match.
    /// - [`GatewayError::Keystore`] if no key exists for `address` or the
    ///   stored file is unreadable.
    fn unlock(&self, address: Address, password: &str) -> Result<UnlockedKey>;

    /// Generates a new key protected by `password`, returning its address.
    fn create_account(&self, password: &str) -> Result<Address>;

    /// Imports a raw 32-byte secret protected by `password`.
    fn import_key(&self, secret: &[u8; 32], password: &str) -> Result<Address>;
}

// ---------------------------------------------------------------------------
// Key file format
// ---------------------------------------------------------------------------

/// On-disk JSON form of a stored key.
#[derive(Serialize, Deserialize)]
struct KeyFile {
    address: Address,
    /// 32-byte random salt, hex.
    salt: String,
    /// `secret ⊕ pad(password, salt)`, hex.
    ciphertext: String,
    /// `keccak256(pad)`, hex — detects a wrong passphrase without
    /// reconstructing key material.
    verifier: String,
}

/// Passphrase-derived 32-byte pad: `keccak256(salt ‖ password)`.
fn derive_pad(salt: &[u8; 32], password: &str) -> Zeroizing<[u8; 32]> {
    let mut input = Vec::with_capacity(32 + password.len());
    input.extend_from_slice(salt);
    input.extend_from_slice(password.as_bytes());
    Zeroizing::new(keccak256(&input).0)
}

fn decode_hex32(field: &str, value: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(value).map_err(|e| GatewayError::Keystore {
        reason: format!("key file field '{field}' is not valid hex: {e}"),
    })?;
    bytes.try_into().map_err(|_| GatewayError::Keystore {
        reason: format!("key file field '{field}' has the wrong length"),
    })
}

// ---------------------------------------------------------------------------
// DirKeyStore
// ---------------------------------------------------------------------------

/// File-per-key store rooted at a keystore directory.
///
/// Files are named `<address>.json`; the directory is created lazily on
/// first write.
pub struct DirKeyStore {
    dir: PathBuf,
}

impl DirKeyStore {
    /// Opens (without touching the filesystem) a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the store's root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, address: Address) -> PathBuf {
        self.dir.join(format!("{address:#x}.json"))
    }

    fn write_key(&self, key: &SigningKey, password: &str) -> Result<Address> {
        let address = address_of(key);

        let mut salt = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        let pad = derive_pad(&salt, password);

        let secret_bytes: [u8; 32] = key.to_bytes().into();
        let secret = Zeroizing::new(secret_bytes);
        let mut ciphertext = [0u8; 32];
        for (i, byte) in ciphertext.iter_mut().enumerate() {
            *byte = secret[i] ^ pad[i];
        }

        let file = KeyFile {
            address,
            salt: hex::encode(salt),
            ciphertext: hex::encode(ciphertext),
            verifier: hex::encode(keccak256(&pad[..])),
        };

        fs::create_dir_all(&self.dir).map_err(|e| GatewayError::Keystore {
            reason: format!("cannot create keystore dir {}: {e}", self.dir.display()),
        })?;
        let json = serde_json::to_string_pretty(&file).map_err(|e| GatewayError::Keystore {
            reason: format!("cannot encode key file: {e}"),
        })?;
        fs::write(self.key_path(address), json).map_err(|e| GatewayError::Keystore {
            reason: format!("cannot write key file for {address:#x}: {e}"),
        })?;

        Ok(address)
    }
}

impl KeyStore for DirKeyStore {
    fn accounts(&self) -> Result<Vec<Address>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            // A store that was never written to has no accounts.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(GatewayError::Keystore {
                    reason: format!("cannot read keystore dir {}: {e}", self.dir.display()),
                });
            }
        };

        let mut addresses = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| GatewayError::Keystore {
                reason: format!("cannot read keystore entry: {e}"),
            })?;
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Ok(address) = stem.parse::<Address>() {
                addresses.push(address);
            }
        }
        Ok(addresses)
    }

    fn unlock(&self, address: Address, password: &str) -> Result<UnlockedKey> {
        let path = self.key_path(address);
        let json = fs::read_to_string(&path).map_err(|e| GatewayError::Keystore {
            reason: format!("no key file for {address:#x}: {e}"),
        })?;
        let file: KeyFile = serde_json::from_str(&json).map_err(|e| GatewayError::Keystore {
            reason: format!("malformed key file {}: {e}", path.display()),
        })?;

        let salt = decode_hex32("salt", &file.salt)?;
        let ciphertext = decode_hex32("ciphertext", &file.ciphertext)?;
        let verifier = decode_hex32("verifier", &file.verifier)?;

        let pad = derive_pad(&salt, password);
        if keccak256(&pad[..]).0 != verifier {
            return Err(GatewayError::InvalidPassword);
        }

        let mut secret = Zeroizing::new([0u8; 32]);
        for (i, byte) in secret.iter_mut().enumerate() {
            *byte = ciphertext[i] ^ pad[i];
        }

        let key = SigningKey::from_slice(&secret[..]).map_err(|e| GatewayError::Keystore {
            reason: format!("stored key for {address:#x} is invalid: {e}"),
        })?;

        let derived = address_of(&key);
        if derived != address {
            return Err(GatewayError::Keystore {
                reason: format!("key file address mismatch: expected {address:#x}, got {derived:#x}"),
            });
        }

        Ok(UnlockedKey { address, key })
    }

    fn create_account(&self, password: &str) -> Result<Address> {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        self.write_key(&key, password)
    }

    fn import_key(&self, secret: &[u8; 32], password: &str) -> Result<Address> {
        let key = SigningKey::from_slice(secret).map_err(|e| GatewayError::Keystore {
            reason: format!("imported key is invalid: {e}"),
        })?;
        self.write_key(&key, password)
    }
}
