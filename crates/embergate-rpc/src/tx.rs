//! Legacy transaction encoding and EIP-155 signing.
//!
//! Both the remote send path and user-approved completion go through
//! [`sign_transaction`]: build the EIP-155 signing hash, produce a
//! recoverable secp256k1 signature, and RLP-encode the signed form. The
//! transaction hash is computed locally over the signed encoding, so
//! callers can report it before the network confirms anything.

use alloy_primitives::keccak256;
use alloy_rlp::{Encodable, Header, EMPTY_STRING_CODE};
use embergate_types::{Address, Bytes, GatewayError, Result, TxHash, U256};
use k256::ecdsa::SigningKey;

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// An unsigned legacy transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    /// Account nonce of the sender.
    pub nonce: u64,
    /// Gas price in wei.
    pub gas_price: U256,
    /// Gas limit.
    pub gas: U256,
    /// Recipient; `None` creates a contract.
    pub to: Option<Address>,
    /// Transferred value in wei.
    pub value: U256,
    /// Call data / init code.
    pub data: Bytes,
}

/// A signed transaction ready for `eth_sendRawTransaction`.
#[derive(Clone, Debug)]
pub struct SignedTransaction {
    /// RLP encoding of the signed transaction.
    pub raw: Bytes,
    /// `keccak256(raw)` — the transaction hash.
    pub hash: TxHash,
    /// EIP-155 recovery value: `chain_id * 2 + 35 + recovery_bit`.
    pub v: u64,
    /// Signature r.
    pub r: U256,
    /// Signature s.
    pub s: U256,
}

impl SignedTransaction {
    /// Returns the raw encoding as a `0x`-prefixed hex string.
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }
}

// ---------------------------------------------------------------------------
// RLP encoding
// ---------------------------------------------------------------------------

/// Encodes the nine signing fields `(…, chain_id, 0, 0)` or the nine
/// signed fields `(…, v, r, s)` as one RLP list.
fn encode_list(tx: &Transaction, tail: (&dyn Encodable, &dyn Encodable, &dyn Encodable)) -> Vec<u8> {
    let mut payload = Vec::new();
    tx.nonce.encode(&mut payload);
    tx.gas_price.encode(&mut payload);
    tx.gas.encode(&mut payload);
    match &tx.to {
        Some(address) => address.encode(&mut payload),
        None => payload.push(EMPTY_STRING_CODE),
    }
    tx.value.encode(&mut payload);
    tx.data.encode(&mut payload);
    tail.0.encode(&mut payload);
    tail.1.encode(&mut payload);
    tail.2.encode(&mut payload);

    let mut out = Vec::with_capacity(payload.len() + 4);
    Header {
        list: true,
        payload_length: payload.len(),
    }
    .encode(&mut out);
    out.extend_from_slice(&payload);
    out
}

/// EIP-155 signing hash: `keccak256(rlp(tx ‖ chain_id, 0, 0))`.
pub fn signing_hash(tx: &Transaction, chain_id: u64) -> TxHash {
    let encoded = encode_list(tx, (&chain_id, &0u8, &0u8));
    keccak256(&encoded)
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

/// Signs `tx` for `chain_id` with the given key.
pub fn sign_transaction(
    tx: &Transaction,
    chain_id: u64,
    key: &SigningKey,
) -> Result<SignedTransaction> {
    let hash = signing_hash(tx, chain_id);

    let (signature, recovery_id) = key
        .sign_prehash_recoverable(hash.as_slice())
        .map_err(|e| GatewayError::Keystore {
            reason: format!("signing failed: {e}"),
        })?;

    let bytes = signature.to_bytes();
    let r = U256::from_be_slice(&bytes[..32]);
    let s = U256::from_be_slice(&bytes[32..]);
    let v = chain_id * 2 + 35 + u64::from(recovery_id.to_byte());

    let raw = encode_list(tx, (&v, &r, &s));
    let tx_hash = keccak256(&raw);

    Ok(SignedTransaction {
        raw: Bytes::from(raw),
        hash: tx_hash,
        v,
        r,
        s,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The worked example from the EIP-155 specification: nonce 9,
    /// 20 gwei gas price, 21000 gas, 1 ether to 0x3535…35, chain id 1,
    /// secret key 0x4646…46.
    fn example_tx() -> Transaction {
        Transaction {
            nonce: 9,
            gas_price: U256::from(20_000_000_000u64),
            gas: U256::from(21_000u64),
            to: Some("0x3535353535353535353535353535353535353535".parse().unwrap()),
            value: U256::from(1_000_000_000_000_000_000u64),
            data: Bytes::new(),
        }
    }

    #[test]
    fn eip155_signing_hash_matches_spec_example() {
        let hash = signing_hash(&example_tx(), 1);
        assert_eq!(
            hex::encode(hash),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53",
        );
    }

    #[test]
    fn eip155_signed_encoding_matches_spec_example() {
        let key = SigningKey::from_slice(&[0x46u8; 32]).expect("key");
        let signed = sign_transaction(&example_tx(), 1, &key).expect("sign");

        assert_eq!(signed.v, 37);
        assert_eq!(
            signed.raw_hex(),
            "0xf86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83",
        );
    }

    #[test]
    fn tx_hash_is_keccak_of_raw() {
        let key = SigningKey::from_slice(&[0x46u8; 32]).expect("key");
        let signed = sign_transaction(&example_tx(), 1, &key).expect("sign");
        assert_eq!(signed.hash, keccak256(&signed.raw));
    }

    #[test]
    fn contract_creation_encodes_empty_to() {
        let tx = Transaction {
            to: None,
            data: Bytes::from(vec![0x60, 0x60, 0x60, 0x40]),
            ..example_tx()
        };
        let key = SigningKey::from_slice(&[0x46u8; 32]).expect("key");
        let signed = sign_transaction(&tx, 1, &key).expect("sign");

        // Different chain ids must produce different signatures.
        let other = sign_transaction(&tx, 3, &key).expect("sign");
        assert_ne!(signed.raw, other.raw);
        assert_ne!(signed.hash, other.hash);
    }

    #[test]
    fn v_encodes_chain_id() {
        let key = SigningKey::from_slice(&[0x46u8; 32]).expect("key");
        let signed = sign_transaction(&example_tx(), 3, &key).expect("sign");
        assert!(signed.v == 41 || signed.v == 42, "v = {}", signed.v);
    }
}
