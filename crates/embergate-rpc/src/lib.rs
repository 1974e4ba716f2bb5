//! JSON-RPC plumbing for the gateway.
//!
//! # Modules
//!
//! - [`call`] — decoded request model and `eth_sendTransaction` helpers.
//! - [`client`] — the RPC client, routing to the upstream HTTP endpoint or
//!   the local light-client handler.
//! - [`response`] — JSON-RPC 2.0 response construction.
//! - [`tx`] — legacy transaction encoding and EIP-155 signing.

pub mod call;
pub mod client;
pub mod response;
pub mod tx;

pub use call::RpcCall;
pub use client::{LocalRpcHandler, RpcClient, RPC_CALL_TIMEOUT};
pub use tx::{sign_transaction, SignedTransaction, Transaction};

/// Method name that diverts a request onto the transaction path.
pub const METHOD_SEND_TRANSACTION: &str = "eth_sendTransaction";
