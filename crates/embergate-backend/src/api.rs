//! JSON-string entry points.
//!
//! The mobile host binds these functions directly; every one of them
//! takes and returns JSON strings so no gateway type crosses the FFI
//! boundary. Failures are reported in-band through the `error` field —
//! an empty `error` means success.

use embergate_types::config::NodeConfig;
use embergate_types::{Address, QueuedTxId};
use serde::Serialize;

use crate::Backend;

#[derive(Serialize)]
struct ApiResponse {
    error: String,
}

#[derive(Serialize)]
struct CompleteTransactionResponse {
    id: String,
    hash: String,
    error: String,
}

#[derive(Serialize)]
struct DiscardTransactionsResponse {
    results: std::collections::BTreeMap<String, ApiResponse>,
}

fn ok() -> String {
    encode(&ApiResponse {
        error: String::new(),
    })
}

fn fail(error: impl ToString) -> String {
    encode(&ApiResponse {
        error: error.to_string(),
    })
}

fn encode<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| r#"{"error":"encoding failure"}"#.into())
}

/// Starts the node from a JSON configuration and waits until it is
/// fully initialized (or has crashed).
pub async fn start_node(backend: &Backend, config_json: &str) -> String {
    let config: NodeConfig = match serde_json::from_str(config_json) {
        Ok(config) => config,
        Err(e) => return fail(format!("invalid config: {e}")),
    };

    match backend.start_node(config) {
        Ok(waiter) => {
            waiter.wait().await;
            if backend.is_node_running() {
                ok()
            } else {
                fail("node failed to start")
            }
        }
        Err(e) => fail(e),
    }
}

/// Stops the node and waits for teardown to finish.
pub async fn stop_node(backend: &Backend) -> String {
    match backend.stop_node().await {
        Ok(waiter) => {
            waiter.wait().await;
            ok()
        }
        Err(e) => fail(e),
    }
}

/// Restarts the node with its current configuration.
pub async fn restart_node(backend: &Backend) -> String {
    match backend.restart_node().await {
        Ok(waiter) => {
            waiter.wait().await;
            ok()
        }
        Err(e) => fail(e),
    }
}

/// Wipes the chain data directory and restarts the node.
pub async fn reset_chain_data(backend: &Backend) -> String {
    match backend.reset_chain_data().await {
        Ok(waiter) => {
            waiter.wait().await;
            ok()
        }
        Err(e) => fail(e),
    }
}

/// Completes a queued transaction with the user's password.
pub async fn complete_transaction(backend: &Backend, id: &str, password: &str) -> String {
    let tx_id = QueuedTxId::from(id);
    match backend.complete_transaction(&tx_id, password).await {
        Ok(hash) => encode(&CompleteTransactionResponse {
            id: id.to_owned(),
            hash: format!("{hash:#x}"),
            error: String::new(),
        }),
        Err(e) => encode(&CompleteTransactionResponse {
            id: id.to_owned(),
            hash: String::new(),
            error: e.to_string(),
        }),
    }
}

/// Discards a queued transaction.
pub fn discard_transaction(backend: &Backend, id: &str) -> String {
    match backend.discard_transaction(&QueuedTxId::from(id)) {
        Ok(()) => ok(),
        Err(e) => fail(e),
    }
}

/// Discards several queued transactions; `ids_json` is a JSON array of
/// id strings. Reports a per-id result.
pub fn discard_transactions(backend: &Backend, ids_json: &str) -> String {
    let ids: Vec<String> = match serde_json::from_str(ids_json) {
        Ok(ids) => ids,
        Err(e) => return fail(format!("invalid id list: {e}")),
    };

    let queued_ids: Vec<QueuedTxId> = ids.iter().map(|id| QueuedTxId::from(id.as_str())).collect();
    let mut results = std::collections::BTreeMap::new();
    for (id, result) in backend.discard_transactions(&queued_ids) {
        let error = match result {
            Ok(()) => String::new(),
            Err(e) => e.to_string(),
        };
        results.insert(id.to_string(), ApiResponse { error });
    }
    encode(&DiscardTransactionsResponse { results })
}

/// Creates (or replaces) the cell for `chat_id` with `code`.
pub async fn jail_parse(backend: &Backend, chat_id: &str, code: &str) -> String {
    backend.jail_parse(chat_id, code).await
}

/// Invokes a catalog function in the cell for `chat_id`.
pub async fn jail_call(
    backend: &Backend,
    chat_id: &str,
    path_json: &str,
    params_json: &str,
) -> String {
    backend.jail_call(chat_id, path_json, params_json).await
}

/// Replaces the base library for future cells.
pub fn jail_base_script(backend: &Backend, code: &str) -> String {
    backend.jail_base_script(code);
    ok()
}

/// Unlocks `address` and makes it the selected account.
pub async fn select_account(backend: &Backend, address: &str, password: &str) -> String {
    let address: Address = match address.parse() {
        Ok(address) => address,
        Err(e) => return fail(format!("invalid address: {e}")),
    };
    match backend.select_account(address, password).await {
        Ok(()) => ok(),
        Err(e) => fail(e),
    }
}

/// Clears the selected account.
pub fn logout(backend: &Backend) -> String {
    backend.logout();
    ok()
}
