//! The node lifecycle state machine.
//!
//! ```text
//! Idle ──start()──▶ Starting ──▶ Running ──stop()──▶ Stopping ──▶ Idle
//! ```
//!
//! A running node is represented by one immutable [`RunningNode`] snapshot
//! (config + RPC client + keystore) swapped atomically under a single
//! lock, so no observer ever sees a half-initialized node: accessors
//! either get the full snapshot or `NoRunningNode`.
//!
//! `start` returns a [`StartedWaiter`] that resolves once the node is
//! fully wired (RPC client built, static peers scheduled, `node.started`
//! emitted) — or once startup failed, in which case `node.crashed` was
//! emitted and callers must re-check [`NodeManager::is_running`].
//!
//! Lock order, top-down: lifecycle → started slot → stopped slot. None of
//! them is ever held across an await point.

use std::sync::{Arc, Mutex, RwLock, Weak};

use embergate_accounts::{DirKeyStore, KeyStore};
use embergate_rpc::RpcClient;
use embergate_signal as signal;
use embergate_types::config::NodeConfig;
use embergate_types::{GatewayError, Result};
use tokio::sync::watch;

use crate::service::NodeService;

// ---------------------------------------------------------------------------
// Waiters
// ---------------------------------------------------------------------------

/// Resolves when a start attempt has finished (successfully or not).
#[derive(Clone, Debug)]
pub struct StartedWaiter(watch::Receiver<bool>);

impl StartedWaiter {
    /// Waits until the node is fully initialized or startup failed.
    pub async fn wait(mut self) {
        // The sender only drops after publishing `true`; either way the
        // waiter unblocks.
        let _ = self.0.wait_for(|done| *done).await;
    }
}

/// Resolves when a stop attempt has finished tearing the node down.
#[derive(Clone, Debug)]
pub struct StoppedWaiter(watch::Receiver<bool>);

impl StoppedWaiter {
    /// Waits until the node is fully stopped.
    pub async fn wait(mut self) {
        let _ = self.0.wait_for(|done| *done).await;
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Immutable view of a fully wired node.
pub struct RunningNode {
    /// The configuration the node was started with.
    pub config: NodeConfig,
    /// RPC client bound to this node (upstream or local route).
    pub rpc_client: Arc<RpcClient>,
    /// Account keystore rooted under the node's keystore directory.
    pub keystore: Arc<dyn KeyStore>,
}

enum Lifecycle {
    Idle,
    Starting,
    Running(Arc<RunningNode>),
    Stopping,
}

// ---------------------------------------------------------------------------
// NodeManager
// ---------------------------------------------------------------------------

/// Owns the node service handle and serializes lifecycle transitions.
pub struct NodeManager {
    service: Arc<dyn NodeService>,
    lifecycle: RwLock<Lifecycle>,
    started: Mutex<Option<watch::Receiver<bool>>>,
    /// Self-handle for the background start/stop tasks.
    weak_self: Weak<NodeManager>,
}

impl NodeManager {
    /// Creates a manager around the given light-client service.
    pub fn new(service: Arc<dyn NodeService>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            service,
            lifecycle: RwLock::new(Lifecycle::Idle),
            started: Mutex::new(None),
            weak_self: weak_self.clone(),
        })
    }

    fn strong_self(&self) -> Result<Arc<Self>> {
        self.weak_self
            .upgrade()
            .ok_or(GatewayError::InvalidNodeManager)
    }

    /// Starts the node. Fails with [`GatewayError::NodeExists`] if a node
    /// is already running or starting.
    ///
    /// Initialization continues in the background; the returned waiter
    /// resolves when it finishes either way.
    pub fn start(&self, config: NodeConfig) -> Result<StartedWaiter> {
        config.validate()?;
        let manager = self.strong_self()?;

        {
            let mut lifecycle = self.lock_lifecycle_mut();
            if !matches!(*lifecycle, Lifecycle::Idle) {
                return Err(GatewayError::NodeExists);
            }
            *lifecycle = Lifecycle::Starting;
        }

        let (started_tx, started_rx) = watch::channel(false);
        *self.lock_started() = Some(started_rx.clone());

        tokio::spawn(async move {
            manager.run_start(config).await;
            // Release every waiter, success or failure.
            let _ = started_tx.send(true);
        });

        Ok(StartedWaiter(started_rx))
    }

    async fn run_start(self: Arc<Self>, config: NodeConfig) {
        tracing::info!(network_id = config.network_id, "starting node");

        if let Err(e) = self.service.start(&config).await {
            tracing::error!(%e, "node failed to start");
            self.crash(&format!("node startup failed: {e}"));
            return;
        }

        let rpc_client = if config.upstream.enabled {
            RpcClient::upstream(&config.upstream.url)
        } else {
            Ok(RpcClient::local(self.service.local_rpc()))
        };
        let rpc_client = match rpc_client {
            Ok(client) => Arc::new(client),
            Err(e) => {
                tracing::error!(%e, "init RPC client failed");
                let _ = self.service.stop().await;
                self.crash(&e.to_string());
                return;
            }
        };

        let keystore: Arc<dyn KeyStore> = Arc::new(DirKeyStore::new(config.keystore_dir()));

        {
            let mut lifecycle = self.lock_lifecycle_mut();
            *lifecycle = Lifecycle::Running(Arc::new(RunningNode {
                config: config.clone(),
                rpc_client,
                keystore,
            }));
        }

        // The node is up; peers are populated in the background so a slow
        // or dead boot node cannot stall startup.
        let manager = Arc::clone(&self);
        tokio::spawn(async move {
            manager.populate_static_peers(&config).await;
        });

        signal::emit(signal::Envelope::empty(signal::EVENT_NODE_STARTED));
        tracing::info!("node started");
    }

    fn crash(&self, reason: &str) {
        *self.lock_lifecycle_mut() = Lifecycle::Idle;
        signal::emit(signal::Envelope::new(
            signal::EVENT_NODE_CRASHED,
            serde_json::json!({"error": reason}),
        ));
    }

    async fn populate_static_peers(&self, config: &NodeConfig) {
        if !config.boot_cluster.enabled {
            tracing::info!("boot cluster is disabled");
            return;
        }
        for enode in &config.boot_cluster.boot_nodes {
            match self.service.add_peer(enode).await {
                Ok(()) => tracing::info!(%enode, "boot node added"),
                Err(e) => tracing::warn!(%enode, %e, "boot node addition failed"),
            }
        }
    }

    /// Stops the node. Waits for a pending start to settle first, so the
    /// teardown always operates on a fully started node.
    pub async fn stop(&self) -> Result<StoppedWaiter> {
        self.wait_started().await;
        let manager = self.strong_self()?;

        {
            let mut lifecycle = self.lock_lifecycle_mut();
            match *lifecycle {
                Lifecycle::Running(_) => *lifecycle = Lifecycle::Stopping,
                _ => return Err(GatewayError::NoRunningNode),
            }
        }
        *self.lock_started() = None;

        let (stopped_tx, stopped_rx) = watch::channel(false);
        tokio::spawn(async move {
            if let Err(e) = manager.service.stop().await {
                tracing::error!(%e, "error while stopping node service");
            }
            *manager.lock_lifecycle_mut() = Lifecycle::Idle;
            signal::emit(signal::Envelope::empty(signal::EVENT_NODE_STOPPED));
            tracing::info!("node stopped");
            let _ = stopped_tx.send(true);
        });

        Ok(StoppedWaiter(stopped_rx))
    }

    /// Restarts the node with its current configuration.
    pub async fn restart(&self) -> Result<StartedWaiter> {
        let config = self.node_config().await?;
        self.stop().await?.wait().await;
        self.start(config)
    }

    /// Stops the node, removes its chain data directory, and starts it
    /// again with the previous configuration.
    ///
    /// A missing chain data directory is reported as an error rather than
    /// silently skipped.
    pub async fn reset_chain_data(&self) -> Result<StartedWaiter> {
        let config = self.node_config().await?;
        self.stop().await?.wait().await;

        let chain_dir = config.chain_data_dir();
        if !chain_dir.exists() {
            return Err(GatewayError::ChainData {
                reason: format!("chain data dir {} does not exist", chain_dir.display()),
            });
        }
        tokio::fs::remove_dir_all(&chain_dir)
            .await
            .map_err(|e| GatewayError::ChainData {
                reason: format!("cannot remove {}: {e}", chain_dir.display()),
            })?;

        signal::emit(signal::Envelope::empty(signal::EVENT_CHAIN_DATA_REMOVED));
        tracing::info!(dir = %chain_dir.display(), "chain data removed");

        self.start(config)
    }

    /// Adds a static peer to the running node.
    pub async fn add_peer(&self, enode: &str) -> Result<()> {
        // Snapshot check only; the service call happens lock-free.
        let _ = self.running_snapshot()?;
        self.service.add_peer(enode).await
    }

    /// Whether a fully started node is present.
    pub fn is_running(&self) -> bool {
        matches!(*self.lock_lifecycle(), Lifecycle::Running(_))
    }

    /// The RPC client of the running node. Blocks while a start is in
    /// flight, then fails with [`GatewayError::NoRunningNode`] if the
    /// node is gone.
    pub async fn rpc_client(&self) -> Result<Arc<RpcClient>> {
        Ok(self.running().await?.rpc_client.clone())
    }

    /// The configuration of the running node.
    pub async fn node_config(&self) -> Result<NodeConfig> {
        Ok(self.running().await?.config.clone())
    }

    /// The account keystore of the running node.
    pub async fn account_key_store(&self) -> Result<Arc<dyn KeyStore>> {
        Ok(self.running().await?.keystore.clone())
    }

    // -- Internal ---------------------------------------------------------

    /// Blocks on an in-flight start, then returns the snapshot or
    /// `NoRunningNode`.
    async fn running(&self) -> Result<Arc<RunningNode>> {
        self.wait_started().await;
        self.running_snapshot()
    }

    fn running_snapshot(&self) -> Result<Arc<RunningNode>> {
        match &*self.lock_lifecycle() {
            Lifecycle::Running(node) => Ok(Arc::clone(node)),
            _ => Err(GatewayError::NoRunningNode),
        }
    }

    async fn wait_started(&self) {
        let waiter = self.lock_started().clone();
        if let Some(mut rx) = waiter {
            let _ = rx.wait_for(|done| *done).await;
        }
    }

    fn lock_lifecycle(&self) -> std::sync::RwLockReadGuard<'_, Lifecycle> {
        self.lifecycle.read().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_lifecycle_mut(&self) -> std::sync::RwLockWriteGuard<'_, Lifecycle> {
        self.lifecycle.write().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_started(&self) -> std::sync::MutexGuard<'_, Option<watch::Receiver<bool>>> {
        self.started.lock().unwrap_or_else(|p| p.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::service::DevNode;

    use super::*;

    fn config(dir: &std::path::Path) -> NodeConfig {
        NodeConfig::new(3, dir)
    }

    fn manager() -> (tempfile::TempDir, Arc<NodeManager>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = NodeManager::new(Arc::new(DevNode::new()));
        (dir, manager)
    }

    #[tokio::test]
    async fn start_wires_rpc_client_and_keystore() {
        let (dir, manager) = manager();
        manager.start(config(dir.path())).expect("start").wait().await;

        assert!(manager.is_running());
        let client = manager.rpc_client().await.expect("client");
        assert!(!client.is_upstream());

        let listening = client.call("net_listening", vec![]).await.expect("call");
        assert_eq!(listening, serde_json::json!(true));

        let keystore = manager.account_key_store().await.expect("keystore");
        assert!(keystore.accounts().expect("accounts").is_empty());
    }

    #[tokio::test]
    async fn double_start_fails_with_node_exists() {
        let (dir, manager) = manager();
        manager.start(config(dir.path())).expect("start").wait().await;

        let err = manager.start(config(dir.path())).expect_err("second start");
        assert!(matches!(err, GatewayError::NodeExists), "got {err:?}");
    }

    #[tokio::test]
    async fn stop_then_accessors_fail() {
        let (dir, manager) = manager();
        manager.start(config(dir.path())).expect("start").wait().await;
        manager.stop().await.expect("stop").wait().await;

        assert!(!manager.is_running());
        let err = manager.rpc_client().await.expect_err("no node");
        assert!(matches!(err, GatewayError::NoRunningNode), "got {err:?}");

        let err = manager.stop().await.expect_err("double stop");
        assert!(matches!(err, GatewayError::NoRunningNode));
    }

    #[tokio::test]
    async fn start_stop_start_cycle() {
        let (dir, manager) = manager();
        manager.start(config(dir.path())).expect("start").wait().await;
        manager.stop().await.expect("stop").wait().await;
        manager.start(config(dir.path())).expect("restart").wait().await;
        assert!(manager.is_running());
    }

    #[tokio::test]
    async fn restart_keeps_config() {
        let (dir, manager) = manager();
        let original = NodeConfig {
            network_id: 42,
            ..config(dir.path())
        };
        manager.start(original.clone()).expect("start").wait().await;

        manager.restart().await.expect("restart").wait().await;
        assert!(manager.is_running());
        assert_eq!(manager.node_config().await.expect("config"), original);
    }

    #[tokio::test]
    async fn reset_chain_data_removes_and_restarts() {
        let (dir, manager) = manager();
        let config = config(dir.path());
        manager.start(config.clone()).expect("start").wait().await;

        let marker = config.chain_data_dir().join("CURRENT");
        std::fs::write(&marker, b"x").expect("marker");

        manager.reset_chain_data().await.expect("reset").wait().await;
        assert!(manager.is_running());
        // The directory was recreated fresh by the restarted node.
        assert!(config.chain_data_dir().is_dir());
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn reset_chain_data_with_missing_dir_fails() {
        let (dir, manager) = manager();
        let config = config(dir.path());
        manager.start(config.clone()).expect("start").wait().await;

        std::fs::remove_dir_all(config.chain_data_dir()).expect("remove");
        let err = manager.reset_chain_data().await.expect_err("missing dir");
        assert!(matches!(err, GatewayError::ChainData { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn boot_cluster_peers_are_added() {
        let dir = tempfile::tempdir().expect("tempdir");
        let node = Arc::new(DevNode::new());
        let manager = NodeManager::new(Arc::clone(&node) as Arc<dyn crate::NodeService>);

        let config = NodeConfig {
            boot_cluster: embergate_types::config::BootClusterConfig {
                enabled: true,
                boot_nodes: vec!["enode://aa@1.2.3.4:30303".into()],
            },
            ..config(dir.path())
        };
        manager.start(config).expect("start").wait().await;

        // Peer population runs in a background task.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(node.peers(), vec!["enode://aa@1.2.3.4:30303".to_string()]);
    }

    #[tokio::test]
    async fn invalid_config_rejected_synchronously() {
        let (_dir, manager) = manager();
        let bad = NodeConfig {
            network_id: 0,
            ..NodeConfig::default()
        };
        assert!(manager.start(bad).is_err());
        assert!(!manager.is_running());
    }
}
