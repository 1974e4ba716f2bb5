//! Light-client service seam.
//!
//! The light-client protocol is an external collaborator; [`NodeService`]
//! is the interface the lifecycle manager drives. [`DevNode`] is an
//! in-process implementation with a toy chain state, used by tests and
//! local development the way the original system used a test network
//! backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use alloy_primitives::keccak256;
use async_trait::async_trait;
use embergate_rpc::LocalRpcHandler;
use embergate_types::config::NodeConfig;
use embergate_types::{Address, GatewayError, Result, TxHash, U256};
use serde_json::Value;

// ---------------------------------------------------------------------------
// NodeService
// ---------------------------------------------------------------------------

/// Interface to the backing light-client node.
#[async_trait]
pub trait NodeService: Send + Sync {
    /// Brings the node up for `config`. Must create the chain data
    /// directory layout under `config.chain_data_dir()`.
    async fn start(&self, config: &NodeConfig) -> Result<()>;

    /// Tears the node down. Idempotent.
    async fn stop(&self) -> Result<()>;

    /// Adds a static peer by enode URL.
    async fn add_peer(&self, enode: &str) -> Result<()>;

    /// The node's in-process RPC surface.
    fn local_rpc(&self) -> Arc<dyn LocalRpcHandler>;
}

// ---------------------------------------------------------------------------
// DevNode
// ---------------------------------------------------------------------------

/// Default balance reported for unknown accounts: 100 ether, so balance
/// checks against the dev chain behave like a funded test network.
const DEV_DEFAULT_BALANCE_WEI: u128 = 100_000_000_000_000_000_000;

/// Gas price reported by the dev chain: 20 gwei.
const DEV_GAS_PRICE_WEI: u64 = 20_000_000_000;

#[derive(Default)]
struct DevChainState {
    listening: bool,
    network_id: u64,
    nonces: HashMap<Address, u64>,
    balances: HashMap<Address, U256>,
    submitted: Vec<TxHash>,
    peers: Vec<String>,
}

/// In-process stand-in for a light-client node.
///
/// Accepts any raw transaction, remembers its hash, and answers the read
/// methods the gateway and its scripts exercise. Unknown receipt lookups
/// answer a literal `null`, as a real client does.
#[derive(Default)]
pub struct DevNode {
    state: Arc<Mutex<DevChainState>>,
}

impl DevNode {
    /// Creates a dev node with empty chain state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the balance reported for `address`.
    pub fn set_balance(&self, address: Address, balance: U256) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.balances.insert(address, balance);
    }

    /// Sets the nonce reported for `address`.
    pub fn set_nonce(&self, address: Address, nonce: u64) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.nonces.insert(address, nonce);
    }

    /// Hashes of all raw transactions submitted so far, in order.
    pub fn submitted(&self) -> Vec<TxHash> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.submitted.clone()
    }

    /// Static peers added so far.
    pub fn peers(&self) -> Vec<String> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.peers.clone()
    }
}

#[async_trait]
impl NodeService for DevNode {
    async fn start(&self, config: &NodeConfig) -> Result<()> {
        tokio::fs::create_dir_all(config.chain_data_dir())
            .await
            .map_err(|e| GatewayError::ChainData {
                reason: format!(
                    "cannot create chain data dir {}: {e}",
                    config.chain_data_dir().display(),
                ),
            })?;

        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.listening = true;
        state.network_id = config.network_id;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.listening = false;
        state.peers.clear();
        Ok(())
    }

    async fn add_peer(&self, enode: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.peers.push(enode.to_owned());
        Ok(())
    }

    fn local_rpc(&self) -> Arc<dyn LocalRpcHandler> {
        Arc::new(DevRpc {
            state: Arc::clone(&self.state),
        })
    }
}

// ---------------------------------------------------------------------------
// DevRpc
// ---------------------------------------------------------------------------

struct DevRpc {
    state: Arc<Mutex<DevChainState>>,
}

fn hex_quantity(value: U256) -> Value {
    Value::String(format!("{value:#x}"))
}

fn param_address(params: &[Value], index: usize) -> Result<Address> {
    params
        .get(index)
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Address>().ok())
        .ok_or_else(|| GatewayError::Rpc {
            code: -32602,
            message: format!("invalid address at param {index}"),
        })
}

#[async_trait]
impl LocalRpcHandler for DevRpc {
    async fn handle(&self, method: &str, params: &[Value]) -> Result<Value> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());

        if !state.listening && method != "net_listening" {
            return Err(GatewayError::StopRpcCall {
                reason: "dev node is not running".into(),
            });
        }

        match method {
            "net_listening" => Ok(Value::Bool(state.listening)),

            "net_version" => Ok(Value::String(state.network_id.to_string())),

            "eth_gasPrice" => Ok(hex_quantity(U256::from(DEV_GAS_PRICE_WEI))),

            "eth_getTransactionCount" => {
                let address = param_address(params, 0)?;
                let nonce = state.nonces.get(&address).copied().unwrap_or(0);
                Ok(hex_quantity(U256::from(nonce)))
            }

            "eth_getBalance" => {
                let address = param_address(params, 0)?;
                let balance = state
                    .balances
                    .get(&address)
                    .copied()
                    .unwrap_or_else(|| U256::from(DEV_DEFAULT_BALANCE_WEI));
                Ok(hex_quantity(balance))
            }

            "eth_sendRawTransaction" => {
                let raw = params
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::Rpc {
                        code: -32602,
                        message: "missing raw transaction".into(),
                    })?;
                let bytes = hex::decode(raw.strip_prefix("0x").unwrap_or(raw)).map_err(|e| {
                    GatewayError::Rpc {
                        code: -32602,
                        message: format!("invalid raw transaction: {e}"),
                    }
                })?;
                let hash = keccak256(&bytes);
                state.submitted.push(hash);
                Ok(Value::String(format!("{hash:#x}")))
            }

            // The dev chain mines nothing, so every receipt lookup
            // answers a literal null.
            "eth_getTransactionReceipt" => Ok(Value::Null),

            other => Err(GatewayError::Rpc {
                code: -32601,
                message: format!("the method {other} does not exist/is not available"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> NodeConfig {
        NodeConfig::new(3, dir)
    }

    #[tokio::test]
    async fn start_creates_chain_data_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let node = DevNode::new();
        let config = config(dir.path());

        node.start(&config).await.expect("start");
        assert!(config.chain_data_dir().is_dir());
    }

    #[tokio::test]
    async fn rpc_surface_basics() {
        let dir = tempfile::tempdir().expect("tempdir");
        let node = DevNode::new();
        node.start(&config(dir.path())).await.expect("start");
        let rpc = node.local_rpc();

        assert_eq!(
            rpc.handle("net_listening", &[]).await.expect("listening"),
            Value::Bool(true),
        );
        assert_eq!(
            rpc.handle("net_version", &[]).await.expect("version"),
            Value::String("3".into()),
        );
        assert_eq!(
            rpc.handle("eth_getTransactionReceipt", &[serde_json::json!("0xbb")])
                .await
                .expect("receipt"),
            Value::Null,
        );
    }

    #[tokio::test]
    async fn nonce_and_balance_lookups() {
        let dir = tempfile::tempdir().expect("tempdir");
        let node = DevNode::new();
        node.start(&config(dir.path())).await.expect("start");

        let address = Address::repeat_byte(0x42);
        node.set_nonce(address, 7);
        let rpc = node.local_rpc();

        let nonce = rpc
            .handle(
                "eth_getTransactionCount",
                &[serde_json::json!(format!("{address:#x}")), serde_json::json!("latest")],
            )
            .await
            .expect("nonce");
        assert_eq!(nonce, serde_json::json!("0x7"));

        let balance = rpc
            .handle("eth_getBalance", &[serde_json::json!(format!("{address:#x}"))])
            .await
            .expect("balance");
        assert_eq!(balance, serde_json::json!("0x56bc75e2d63100000"));
    }

    #[tokio::test]
    async fn raw_submission_records_keccak_hash() {
        let dir = tempfile::tempdir().expect("tempdir");
        let node = DevNode::new();
        node.start(&config(dir.path())).await.expect("start");
        let rpc = node.local_rpc();

        let result = rpc
            .handle("eth_sendRawTransaction", &[serde_json::json!("0xdeadbeef")])
            .await
            .expect("submit");
        let expected = keccak256([0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(result, serde_json::json!(format!("{expected:#x}")));
        assert_eq!(node.submitted(), vec![expected]);
    }

    #[tokio::test]
    async fn stopped_node_aborts_calls() {
        let dir = tempfile::tempdir().expect("tempdir");
        let node = DevNode::new();
        node.start(&config(dir.path())).await.expect("start");
        let rpc = node.local_rpc();
        node.stop().await.expect("stop");

        assert_eq!(
            rpc.handle("net_listening", &[]).await.expect("listening"),
            Value::Bool(false),
        );
        let err = rpc.handle("eth_gasPrice", &[]).await.expect_err("stopped");
        assert!(matches!(err, GatewayError::StopRpcCall { .. }), "got {err:?}");
    }
}
