//! The cell registry.
//!
//! Maps chat ids to cells. The registry lock covers only the map; every
//! entry into a cell goes through that cell's own lane, so calls into
//! different cells execute concurrently while same-cell calls serialize.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use embergate_types::{GatewayError, Result};
use serde_json::Value;
use tokio::runtime::Handle;

use crate::cell::{Cell, DEFAULT_BASE_SCRIPT};
use crate::policy::ExecutionPolicy;

/// The jail: cell registry plus the shared base library.
pub struct Jail {
    policy: Arc<ExecutionPolicy>,
    cells: Mutex<HashMap<String, Arc<Cell>>>,
    /// Base library for cells created from now on; replacing it does not
    /// touch existing cells.
    base: RwLock<String>,
    handle: Handle,
}

impl Jail {
    /// Creates an empty registry over the given policy.
    ///
    /// Must be called from within a tokio runtime; cell bridges dispatch
    /// onto the runtime captured here.
    pub fn new(policy: Arc<ExecutionPolicy>) -> Self {
        Self {
            policy,
            cells: Mutex::new(HashMap::new()),
            base: RwLock::new(DEFAULT_BASE_SCRIPT.to_owned()),
            handle: Handle::current(),
        }
    }

    /// Replaces the base library loaded into cells created afterwards.
    pub fn base_script(&self, code: &str) {
        *self.base.write().unwrap_or_else(|p| p.into_inner()) = code.to_owned();
    }

    /// Creates (or replaces) the cell for `chat_id` and loads `code`
    /// into it.
    ///
    /// Idempotent per chat id: an existing cell is discarded and a fresh
    /// one installed in its slot. Returns `{"result": <catalog>}` or
    /// `{"error": …}` as a JSON string.
    pub async fn parse(&self, chat_id: &str, code: &str) -> String {
        let base = self
            .base
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();

        let spawned = Cell::spawn(
            chat_id,
            base,
            code.to_owned(),
            Arc::clone(&self.policy),
            self.handle.clone(),
        )
        .await;

        match spawned {
            Ok((cell, catalog)) => {
                let previous = self
                    .lock_cells()
                    .insert(chat_id.to_owned(), cell);
                if let Some(previous) = previous {
                    // The replaced worker drains its lane and exits; we
                    // do not wait for it.
                    previous.request_shutdown();
                }
                serde_json::json!({ "result": catalog }).to_string()
            }
            Err(e) => serde_json::json!({ "error": e.to_string() }).to_string(),
        }
    }

    /// Invokes a catalog function in the cell for `chat_id`.
    ///
    /// `path_json` is a JSON array of catalog keys (e.g.
    /// `["commands","ping"]`), `params_json` the single argument. Always
    /// returns a JSON string.
    pub async fn call(&self, chat_id: &str, path_json: &str, params_json: &str) -> String {
        let path: Vec<String> = match serde_json::from_str(path_json) {
            Ok(path) => path,
            Err(e) => {
                return serde_json::json!({
                    "error": format!("invalid call path: {e}"),
                })
                .to_string();
            }
        };

        let params: Value = match serde_json::from_str(params_json) {
            Ok(params) => params,
            Err(e) => {
                return serde_json::json!({
                    "error": format!("invalid call params: {e}"),
                })
                .to_string();
            }
        };

        let cell = match self.cell(chat_id) {
            Ok(cell) => cell,
            Err(e) => return serde_json::json!({ "error": e.to_string() }).to_string(),
        };

        cell.call(path, params).await
    }

    /// Returns the cell for `chat_id`.
    pub fn cell(&self, chat_id: &str) -> Result<Arc<Cell>> {
        self.lock_cells()
            .get(chat_id)
            .cloned()
            .ok_or_else(|| GatewayError::CellNotFound {
                chat_id: chat_id.to_owned(),
            })
    }

    /// Number of live cells.
    pub fn cell_count(&self) -> usize {
        self.lock_cells().len()
    }

    /// Shuts down every cell and empties the registry.
    pub fn stop(&self) {
        let cells: Vec<Arc<Cell>> = {
            let mut map = self.lock_cells();
            map.drain().map(|(_, cell)| cell).collect()
        };
        for cell in &cells {
            cell.request_shutdown();
        }
        for cell in &cells {
            cell.join_worker();
        }
    }

    fn lock_cells(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Cell>>> {
        self.cells.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for Jail {
    fn drop(&mut self) {
        // Workers blocked on their lanes exit once the senders drop; an
        // explicit stop() additionally joins them.
        for cell in self.lock_cells().values() {
            cell.request_shutdown();
        }
    }
}
