//! Core shared types for the Embergate gateway.
//!
//! This crate defines the types used across the workspace: transaction
//! identifiers and arguments, queue statuses, and the central error enum.
//! No other crate should define shared types — everything lives here.

pub mod config;

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use alloy_primitives::{Address, Bytes, B256, U256};

/// Hash of an Ethereum transaction.
pub type TxHash = B256;

// ---------------------------------------------------------------------------
// QueuedTxId
// ---------------------------------------------------------------------------

/// Opaque identifier of a transaction awaiting user approval.
///
/// Generated from 32 bytes of OS randomness and hex-encoded, so ids are
/// unguessable and unique for any realistic queue lifetime.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueuedTxId(String);

impl QueuedTxId {
    /// Generates a fresh random identifier.
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for QueuedTxId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for QueuedTxId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for QueuedTxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for QueuedTxId {
    type Err = GatewayError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(GatewayError::UnknownTransaction { id: String::new() });
        }
        Ok(Self(s.to_owned()))
    }
}

// ---------------------------------------------------------------------------
// TxArgs
// ---------------------------------------------------------------------------

/// Decoded arguments of an `eth_sendTransaction` request.
///
/// Quantities serialize as `0x`-prefixed hex, matching the JSON-RPC wire
/// form. Absent optional fields are omitted rather than serialized as
/// `null` so signal payloads stay compact.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxArgs {
    /// Sender address. Signing is gated on this matching the selected
    /// account.
    pub from: Address,
    /// Recipient address; `None` for contract creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    /// Transferred value in wei.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    /// Gas limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<U256>,
    /// Gas price in wei.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,
    /// Call data / contract init code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
}

// ---------------------------------------------------------------------------
// TxStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a queued transaction.
///
/// `Pending → InProgress → Done` on successful completion. `Failed` and
/// `Expired` are terminal alternatives; once a transaction is terminal no
/// further transition is permitted.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    /// Enqueued, awaiting user approval.
    Pending,
    /// A completion attempt holds the transaction.
    InProgress,
    /// Completed; the hash was delivered to the waiter.
    Done,
    /// Rejected, discarded, or failed during completion.
    Failed,
    /// TTL elapsed before any terminal operation.
    Expired,
}

impl TxStatus {
    /// Returns `true` for states that permit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Expired)
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

// ---------------------------------------------------------------------------
// Send-transaction error codes
// ---------------------------------------------------------------------------

/// Error codes attached to `transaction.failed` signal payloads.
///
/// Stringly typed because the host callback consumes JSON; hosts switch on
/// these to distinguish "ask for the password again" from "give up".
pub mod send_error_code {
    /// Any failure without a more specific classification.
    pub const DEFAULT: &str = "1";
    /// The supplied password did not unlock the sending account.
    pub const INVALID_PASSWORD: &str = "2";
    /// The transaction timed out waiting for approval.
    pub const TIMEOUT: &str = "3";
    /// The user discarded the transaction.
    pub const DISCARDED: &str = "4";
}

// ---------------------------------------------------------------------------
// GatewayError
// ---------------------------------------------------------------------------

/// Central error type for the Embergate gateway.
///
/// All crates in the workspace convert their internal errors into variants
/// of this enum, ensuring a unified error handling surface.
///
/// `Clone` because a completion failure is delivered twice: to the waiter
/// blocked on the queue and to the caller of the completion API.
#[derive(Clone, Debug, Error)]
pub enum GatewayError {
    /// `start` was called while a node is already running or starting.
    #[error("node is already running")]
    NodeExists,

    /// An operation that needs a running node found none.
    #[error("there is no running node")]
    NoRunningNode,

    /// The node manager was used before being wired up.
    #[error("node manager is not properly initialized")]
    InvalidNodeManager,

    /// The RPC client could not be constructed or is unavailable.
    #[error("failed to init RPC client: {reason}")]
    RpcClient {
        /// Human-readable description of the construction failure.
        reason: String,
    },

    /// An in-flight RPC call was aborted because the node or its client
    /// went away. Callers should not retry automatically.
    #[error("RPC call stopped: {reason}")]
    StopRpcCall {
        /// What was observed when the call unwound.
        reason: String,
    },

    /// A typed JSON-RPC error returned by the upstream or local endpoint.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },

    /// An external call exceeded its deadline.
    #[error("timed out: {reason}")]
    Timeout {
        /// Which call timed out.
        reason: String,
    },

    /// Enqueue attempted on a full transaction queue.
    #[error("transaction queue is full")]
    QueueFull,

    /// No queued transaction with the given id.
    #[error("unknown queued transaction: {id}")]
    UnknownTransaction {
        /// The id that failed to resolve.
        id: String,
    },

    /// A second terminal operation raced and lost.
    #[error("transaction is already in a terminal state: {id}")]
    AlreadyTerminal {
        /// Id of the transaction that was already terminated.
        id: String,
    },

    /// A queued transaction outlived its completion timeout.
    #[error("transaction expired: {id}")]
    Expired {
        /// Id of the expired transaction.
        id: String,
    },

    /// The user discarded a queued transaction.
    #[error("transaction discarded by user: {id}")]
    Discarded {
        /// Id of the discarded transaction.
        id: String,
    },

    /// Signing was requested with no account selected, or with a `from`
    /// that does not match the selected account.
    #[error("no account selected or sender does not match selected account")]
    AccountNotSelected,

    /// Password verification failed against the keystore.
    #[error("could not decrypt key with given passphrase")]
    InvalidPassword,

    /// No cell exists for the given chat id.
    #[error("cell '{chat_id}' not found")]
    CellNotFound {
        /// The chat id that has no cell.
        chat_id: String,
    },

    /// A script failed to compile or load into a cell.
    #[error("failed to parse script: {reason}")]
    ParseError {
        /// Compiler / loader message.
        reason: String,
    },

    /// The requested catalog path or RPC method does not exist.
    #[error("method is not supported: {method}")]
    MethodNotSupported {
        /// The unresolved method or path.
        method: String,
    },

    /// A configuration value is invalid or missing.
    #[error("config error: {reason}")]
    Config {
        /// Human-readable description of the configuration problem.
        reason: String,
    },

    /// A keystore operation failed (missing key file, I/O, bad format).
    #[error("keystore error: {reason}")]
    Keystore {
        /// Human-readable description of the keystore failure.
        reason: String,
    },

    /// Chain data directory handling failed.
    #[error("chain data error: {reason}")]
    ChainData {
        /// Human-readable description of the chain-data failure.
        reason: String,
    },
}

impl GatewayError {
    /// Maps an error to the `transaction.failed` signal error code.
    pub fn send_error_code(&self) -> &'static str {
        match self {
            Self::InvalidPassword => send_error_code::INVALID_PASSWORD,
            Self::Timeout { .. } | Self::Expired { .. } => send_error_code::TIMEOUT,
            Self::Discarded { .. } => send_error_code::DISCARDED,
            _ => send_error_code::DEFAULT,
        }
    }
}

// ---------------------------------------------------------------------------
// Result alias
// ---------------------------------------------------------------------------

/// Convenience result type using [`GatewayError`].
pub type Result<T> = std::result::Result<T, GatewayError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_tx_ids_are_unique_and_opaque() {
        let a = QueuedTxId::random();
        let b = QueuedTxId::random();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn queued_tx_id_roundtrip() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let id = QueuedTxId::random();
        let parsed: QueuedTxId = id.to_string().parse()?;
        assert_eq!(id, parsed);
        Ok(())
    }

    #[test]
    fn empty_queued_tx_id_rejected() {
        let result: std::result::Result<QueuedTxId, _> = "".parse();
        assert!(result.is_err());
    }

    #[test]
    fn tx_args_serialize_camel_case_hex() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let args = TxArgs {
            from: "0x3535353535353535353535353535353535353535".parse()?,
            to: None,
            value: Some(U256::from(1_000_000u64)),
            gas: Some(U256::from(21_000u64)),
            gas_price: None,
            data: None,
        };
        let json = serde_json::to_value(&args)?;
        assert_eq!(json["gas"], "0x5208");
        assert!(json.get("gasPrice").is_none());
        assert!(json.get("to").is_none());
        Ok(())
    }

    #[test]
    fn tx_args_json_roundtrip() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let args = TxArgs {
            from: "0x3535353535353535353535353535353535353535".parse()?,
            to: Some("0xb60e8dd61c5d32be8058bb8eb970870f07233155".parse()?),
            value: Some(U256::from(7u64)),
            gas: None,
            gas_price: Some(U256::from(30_000_000_000u64)),
            data: Some(Bytes::from(vec![0xde, 0xad])),
        };
        let json = serde_json::to_string(&args)?;
        let parsed: TxArgs = serde_json::from_str(&json)?;
        assert_eq!(args, parsed);
        Ok(())
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TxStatus::Pending.is_terminal());
        assert!(!TxStatus::InProgress.is_terminal());
        assert!(TxStatus::Done.is_terminal());
        assert!(TxStatus::Failed.is_terminal());
        assert!(TxStatus::Expired.is_terminal());
    }

    #[test]
    fn error_codes_by_kind() {
        assert_eq!(
            GatewayError::InvalidPassword.send_error_code(),
            send_error_code::INVALID_PASSWORD,
        );
        assert_eq!(
            GatewayError::Expired { id: "x".into() }.send_error_code(),
            send_error_code::TIMEOUT,
        );
        assert_eq!(
            GatewayError::QueueFull.send_error_code(),
            send_error_code::DEFAULT,
        );
    }

    #[test]
    fn error_display_carries_reason() {
        let err = GatewayError::Config {
            reason: "data_dir must not be empty".into(),
        };
        assert!(err.to_string().contains("data_dir must not be empty"));
    }
}
