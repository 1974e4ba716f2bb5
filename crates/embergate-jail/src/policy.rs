//! RPC execution policy.
//!
//! Classifies every request from a cell and routes it:
//!
//! 1. `eth_sendTransaction` with an upstream endpoint — **remote send**:
//!    fetch the nonce, sign with the selected account (EIP-155), submit
//!    the raw transaction, return the locally computed hash alongside the
//!    endpoint's result.
//! 2. `eth_sendTransaction` without an upstream — **local send**: enqueue
//!    for user approval and block on the completion channel.
//! 3. Everything else — **pass-through** to the current RPC client, with
//!    `null` results preserved and typed endpoint errors forwarded
//!    verbatim.
//!
//! Every path produces a complete JSON-RPC response object; errors never
//! escape as Rust errors into the cell.

use std::sync::Arc;

use embergate_accounts::AccountSelector;
use embergate_node::NodeManager;
use embergate_rpc::{response, sign_transaction, RpcCall, Transaction};
use embergate_txqueue::TxQueue;
use embergate_types::{GatewayError, Result, TxArgs, U256};
use serde_json::Value;

/// Gas limit applied when a transaction does not specify one.
pub const DEFAULT_GAS: u64 = 180_000;

/// Gas price applied when a transaction does not specify one: 20 gwei.
pub const DEFAULT_GAS_PRICE: u64 = 20_000_000_000;

// ---------------------------------------------------------------------------
// CallContext
// ---------------------------------------------------------------------------

/// Per-request context the bridge hands to the policy.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    /// Message id of the bracket the request runs under, if any; carried
    /// into the `transaction.queued` signal for host-side correlation.
    pub message_id: Option<String>,
}

// ---------------------------------------------------------------------------
// ExecutionPolicy
// ---------------------------------------------------------------------------

/// Routes cell requests to the upstream endpoint, the local client, or
/// the transaction queue.
pub struct ExecutionPolicy {
    node: Arc<NodeManager>,
    accounts: Arc<AccountSelector>,
    queue: Arc<TxQueue>,
}

impl ExecutionPolicy {
    /// Creates a policy over the given node, account selector, and queue.
    pub fn new(
        node: Arc<NodeManager>,
        accounts: Arc<AccountSelector>,
        queue: Arc<TxQueue>,
    ) -> Self {
        Self {
            node,
            accounts,
            queue,
        }
    }

    /// The transaction queue this policy enqueues into.
    pub fn queue(&self) -> &Arc<TxQueue> {
        &self.queue
    }

    /// The node manager this policy resolves clients through.
    pub fn node(&self) -> &Arc<NodeManager> {
        &self.node
    }

    /// Executes a raw payload from a cell, returning the response object.
    pub async fn execute(&self, ctx: &CallContext, payload: Value) -> Value {
        let call = match RpcCall::from_payload(&payload) {
            Ok(call) => call,
            Err(e) => {
                let id = payload.get("id").cloned().unwrap_or(Value::Null);
                return response::error_from(&id, &e);
            }
        };

        if call.is_send_transaction() {
            self.execute_send_transaction(ctx, &call).await
        } else {
            self.execute_pass_through(&call).await
        }
    }

    // -- Pass-through path ------------------------------------------------

    async fn execute_pass_through(&self, call: &RpcCall) -> Value {
        let client = match self.node.rpc_client().await {
            Ok(client) => client,
            // The node or its client is gone; report the abort and let
            // the host decide whether to re-issue.
            Err(e) => {
                let stop = GatewayError::StopRpcCall {
                    reason: e.to_string(),
                };
                return response::error_from(&call.id, &stop);
            }
        };

        match client.call(&call.method, call.params.clone()).await {
            Ok(result) => response::success(&call.id, result),
            Err(e) => response::error_from(&call.id, &e),
        }
    }

    // -- Transaction path -------------------------------------------------

    async fn execute_send_transaction(&self, ctx: &CallContext, call: &RpcCall) -> Value {
        let config = match self.node.node_config().await {
            Ok(config) => config,
            Err(e) => return response::error_from(&call.id, &e),
        };

        let args = match call.tx_args() {
            Ok(args) => args,
            Err(e) => return response::error_from(&call.id, &e),
        };

        if config.upstream.enabled {
            match self.remote_send(&args, config.network_id).await {
                Ok((result, hash)) => {
                    // Remote responses additionally carry the locally
                    // computed hash so the host can track the
                    // transaction before the endpoint confirms it.
                    serde_json::json!({
                        "jsonrpc": response::JSONRPC_VERSION,
                        "id": &call.id,
                        "result": result,
                        "hash": hash,
                    })
                }
                Err(e) => response::error_from(&call.id, &e),
            }
        } else {
            self.local_send(ctx, args, &call.id).await
        }
    }

    /// Signs with the selected account and submits to the upstream
    /// endpoint. Returns the endpoint result and the local hash.
    async fn remote_send(&self, args: &TxArgs, chain_id: u64) -> Result<(Value, String)> {
        let selected = self.accounts.selected()?;
        let client = self.node.rpc_client().await?;

        let nonce_value = client
            .call(
                "eth_getTransactionCount",
                vec![
                    Value::String(format!("{:#x}", args.from)),
                    Value::String("latest".into()),
                ],
            )
            .await?;
        let nonce = parse_hex_u64(&nonce_value)?;

        let tx = transaction_from_args(args, nonce);
        let signed = sign_transaction(&tx, chain_id, &selected.key)?;

        let result = client
            .call(
                "eth_sendRawTransaction",
                vec![Value::String(signed.raw_hex())],
            )
            .await?;

        Ok((result, format!("{:#x}", signed.hash)))
    }

    /// Enqueues for user approval and blocks on the completion channel.
    async fn local_send(&self, ctx: &CallContext, args: TxArgs, id: &Value) -> Value {
        let (_queued, done) = match self.queue.enqueue(args, ctx.message_id.clone()) {
            Ok(pair) => pair,
            Err(e) => return response::error_from(id, &e),
        };

        // The watchdog fires the channel on expiry, so this wait is
        // bounded by the queue TTL.
        match done.await {
            Ok(Ok(hash)) => response::success(id, Value::String(format!("{hash:#x}"))),
            Ok(Err(e)) => response::error_from(id, &e),
            Err(_) => response::error_from(
                id,
                &GatewayError::StopRpcCall {
                    reason: "transaction queue went away".into(),
                },
            ),
        }
    }
}

/// Builds the unsigned transaction for `args`, applying gas defaults.
pub fn transaction_from_args(args: &TxArgs, nonce: u64) -> Transaction {
    Transaction {
        nonce,
        gas_price: args.gas_price.unwrap_or(U256::from(DEFAULT_GAS_PRICE)),
        gas: args.gas.unwrap_or(U256::from(DEFAULT_GAS)),
        to: args.to,
        value: args.value.unwrap_or(U256::ZERO),
        data: args.data.clone().unwrap_or_default(),
    }
}

fn parse_hex_u64(value: &Value) -> Result<u64> {
    let text = value.as_str().ok_or_else(|| GatewayError::Rpc {
        code: response::INTERNAL_ERROR_CODE,
        message: format!("expected hex quantity, got {value}"),
    })?;
    u64::from_str_radix(text.strip_prefix("0x").unwrap_or(text), 16).map_err(|e| {
        GatewayError::Rpc {
            code: response::INTERNAL_ERROR_CODE,
            message: format!("invalid hex quantity '{text}': {e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_applied_to_sparse_args() {
        let args = TxArgs {
            from: embergate_types::Address::repeat_byte(0x11),
            ..TxArgs::default()
        };
        let tx = transaction_from_args(&args, 5);
        assert_eq!(tx.nonce, 5);
        assert_eq!(tx.gas, U256::from(DEFAULT_GAS));
        assert_eq!(tx.gas_price, U256::from(DEFAULT_GAS_PRICE));
        assert_eq!(tx.value, U256::ZERO);
        assert!(tx.to.is_none());
        assert!(tx.data.is_empty());
    }

    #[test]
    fn hex_quantity_parsing() {
        assert_eq!(parse_hex_u64(&serde_json::json!("0x7")).expect("ok"), 7);
        assert_eq!(parse_hex_u64(&serde_json::json!("0x0")).expect("ok"), 0);
        assert!(parse_hex_u64(&serde_json::json!(7)).is_err());
        assert!(parse_hex_u64(&serde_json::json!("xyz")).is_err());
    }
}
