//! Queued-transaction completion.
//!
//! Completion is the only path that turns a queued transaction into a
//! signed submission, and it re-establishes every trust prerequisite at
//! the moment of signing: the sender must be the selected account, and
//! the supplied password must unlock it in the keystore right now.

use std::sync::Arc;

use embergate_accounts::AccountSelector;
use embergate_jail::policy::transaction_from_args;
use embergate_node::NodeManager;
use embergate_rpc::sign_transaction;
use embergate_txqueue::{QueuedTx, TxQueue};
use embergate_types::{GatewayError, QueuedTxId, Result, TxHash};
use serde_json::Value;

/// Signs and submits user-approved transactions.
pub struct Transactor {
    node: Arc<NodeManager>,
    accounts: Arc<AccountSelector>,
    queue: Arc<TxQueue>,
}

impl Transactor {
    /// Creates a transactor over the given node, selector, and queue.
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

    /// Completes a queued transaction: verify the sender, unlock with
    /// `password`, sign EIP-155, submit, and deliver the hash.
    ///
    /// On any step failure the transaction transitions to `Failed`, the
    /// waiter is woken with the error, and `transaction.failed` is
    /// emitted; the same error is returned here.
    pub async fn complete(&self, id: &QueuedTxId, password: &str) -> Result<TxHash> {
        // Claim the entry first; a lost race surfaces as
        // `AlreadyTerminal` / `UnknownTransaction` without touching it.
        let tx = self.queue.begin_completion(id)?;

        match self.sign_and_submit(&tx, password).await {
            Ok(hash) => {
                self.queue.finish(id, hash)?;
                Ok(hash)
            }
            Err(e) => {
                tracing::warn!(%id, error = %e, "transaction completion failed");
                let _ = self.queue.fail(id, e.clone());
                Err(e)
            }
        }
    }

    async fn sign_and_submit(&self, tx: &QueuedTx, password: &str) -> Result<TxHash> {
        let from = tx.args.from;
        match self.accounts.selected_address() {
            Some(selected) if selected == from => {}
            _ => return Err(GatewayError::AccountNotSelected),
        }

        // Fresh possession check against the keystore; the long-lived
        // selection alone does not authorize a send.
        let keystore = self.node.account_key_store().await?;
        let unlocked = keystore.unlock(from, password)?;

        let client = self.node.rpc_client().await?;
        let config = self.node.node_config().await?;

        let nonce_value = client
            .call(
                "eth_getTransactionCount",
                vec![
                    Value::String(format!("{from:#x}")),
                    Value::String("latest".into()),
                ],
            )
            .await?;
        let nonce = parse_nonce(&nonce_value)?;

        let unsigned = transaction_from_args(&tx.args, nonce);
        let signed = sign_transaction(&unsigned, config.network_id, &unlocked.key)?;

        client
            .call(
                "eth_sendRawTransaction",
                vec![Value::String(signed.raw_hex())],
            )
            .await?;

        Ok(signed.hash)
    }
}

fn parse_nonce(value: &Value) -> Result<u64> {
    let text = value.as_str().ok_or_else(|| GatewayError::Rpc {
        code: -32603,
        message: format!("expected hex nonce, got {value}"),
    })?;
    u64::from_str_radix(text.strip_prefix("0x").unwrap_or(text), 16).map_err(|e| {
        GatewayError::Rpc {
            code: -32603,
            message: format!("invalid nonce '{text}': {e}"),
        }
    })
}
