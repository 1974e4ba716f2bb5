//! The Embergate gateway backend.
//!
//! [`Backend`] wires the node lifecycle manager, account selector,
//! transaction queue, jail, and transactor into one embeddable unit. The
//! [`api`] module is the JSON-string surface the mobile host binds to.
//!
//! # Modules
//!
//! - [`transactor`] — queued-transaction completion protocol.
//! - [`api`] — JSON-string entry points.

pub mod api;
pub mod transactor;

use std::sync::Arc;

use embergate_accounts::AccountSelector;
use embergate_jail::{ExecutionPolicy, Jail};
use embergate_node::{DevNode, NodeManager, NodeService, StartedWaiter, StoppedWaiter};
use embergate_txqueue::TxQueue;
use embergate_types::config::NodeConfig;
use embergate_types::{Address, QueuedTxId, Result, TxHash};

use crate::transactor::Transactor;

/// The gateway: one node, one selected account, one transaction queue,
/// and a registry of per-chat cells.
pub struct Backend {
    manager: Arc<NodeManager>,
    accounts: Arc<AccountSelector>,
    queue: Arc<TxQueue>,
    jail: Arc<Jail>,
    transactor: Transactor,
}

impl Backend {
    /// Creates a backend over the given light-client service.
    ///
    /// Must be called from within a tokio runtime; cell lanes dispatch
    /// onto the runtime captured here.
    pub fn with_service(service: Arc<dyn NodeService>) -> Self {
        let manager = NodeManager::new(service);
        let accounts = Arc::new(AccountSelector::new());
        let queue = TxQueue::new();

        let policy = Arc::new(ExecutionPolicy::new(
            Arc::clone(&manager),
            Arc::clone(&accounts),
            Arc::clone(&queue),
        ));
        let jail = Arc::new(Jail::new(policy));

        let transactor = Transactor::new(
            Arc::clone(&manager),
            Arc::clone(&accounts),
            Arc::clone(&queue),
        );

        Self {
            manager,
            accounts,
            queue,
            jail,
            transactor,
        }
    }

    /// Creates a backend over the in-process dev node.
    pub fn new() -> Self {
        Self::with_service(Arc::new(DevNode::new()))
    }

    // -- Component access -------------------------------------------------

    /// The node lifecycle manager.
    pub fn node_manager(&self) -> &Arc<NodeManager> {
        &self.manager
    }

    /// The account selector.
    pub fn account_selector(&self) -> &Arc<AccountSelector> {
        &self.accounts
    }

    /// The transaction approval queue.
    pub fn tx_queue(&self) -> &Arc<TxQueue> {
        &self.queue
    }

    /// The cell registry.
    pub fn jail(&self) -> &Arc<Jail> {
        &self.jail
    }

    // -- Node lifecycle ---------------------------------------------------

    /// Starts the node; the waiter resolves when it is fully wired.
    pub fn start_node(&self, config: NodeConfig) -> Result<StartedWaiter> {
        self.manager.start(config)
    }

    /// Stops the node.
    pub async fn stop_node(&self) -> Result<StoppedWaiter> {
        self.manager.stop().await
    }

    /// Restarts the node with its current configuration.
    pub async fn restart_node(&self) -> Result<StartedWaiter> {
        self.manager.restart().await
    }

    /// Wipes the chain data directory and restarts the node.
    pub async fn reset_chain_data(&self) -> Result<StartedWaiter> {
        self.manager.reset_chain_data().await
    }

    /// Whether a fully started node is present.
    pub fn is_node_running(&self) -> bool {
        self.manager.is_running()
    }

    // -- Accounts ---------------------------------------------------------

    /// Generates a new account in the node's keystore.
    pub async fn create_account(&self, password: &str) -> Result<Address> {
        let keystore = self.manager.account_key_store().await?;
        keystore.create_account(password)
    }

    /// Unlocks `address` and makes it the selected account.
    pub async fn select_account(&self, address: Address, password: &str) -> Result<()> {
        let keystore = self.manager.account_key_store().await?;
        self.accounts.select(keystore.as_ref(), address, password)
    }

    /// Clears the selected account.
    pub fn logout(&self) {
        self.accounts.logout();
    }

    // -- Transactions -----------------------------------------------------

    /// Completes a queued transaction with the user's password.
    pub async fn complete_transaction(
        &self,
        id: &QueuedTxId,
        password: &str,
    ) -> Result<TxHash> {
        self.transactor.complete(id, password).await
    }

    /// Discards a queued transaction.
    pub fn discard_transaction(&self, id: &QueuedTxId) -> Result<()> {
        self.queue.discard(id)
    }

    /// Discards several queued transactions, reporting per-id results.
    pub fn discard_transactions(
        &self,
        ids: &[QueuedTxId],
    ) -> Vec<(QueuedTxId, Result<()>)> {
        ids.iter()
            .map(|id| (id.clone(), self.queue.discard(id)))
            .collect()
    }

    // -- Jail -------------------------------------------------------------

    /// Creates (or replaces) the cell for `chat_id` with `code`.
    pub async fn jail_parse(&self, chat_id: &str, code: &str) -> String {
        self.jail.parse(chat_id, code).await
    }

    /// Invokes a catalog function in the cell for `chat_id`.
    pub async fn jail_call(&self, chat_id: &str, path_json: &str, params_json: &str) -> String {
        self.jail.call(chat_id, path_json, params_json).await
    }

    /// Replaces the base library for future cells.
    pub fn jail_base_script(&self, code: &str) {
        self.jail.base_script(code);
    }
}

impl Default for Backend {
    fn default() -> Self {
        Self::new()
    }
}
