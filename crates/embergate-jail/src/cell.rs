//! A cell: one isolated Lua state per chat id.
//!
//! Each cell runs on a dedicated worker thread that owns the Lua state;
//! the job channel into that thread is the cell's serialization lane.
//! Same-cell operations execute strictly in submission order, distinct
//! cells run in parallel, and nothing can reach the Lua state without
//! going through the lane.
//!
//! The host bridge (`gate`) is installed at build time:
//!
//! - `gate.send(payload)` — synchronous dispatch through the execution
//!   policy. The worker thread (and with it the lane) blocks for the
//!   duration of the call, which is bounded by the RPC deadline or the
//!   queue TTL.
//! - `gate.send_async(payload, callback)` — returns immediately; the
//!   response is re-scheduled onto the lane as a callback job, so
//!   deliveries into the cell stay serialized no matter how the
//!   underlying calls complete.
//! - `gate.json_encode` / `gate.json_decode` — JSON helpers.
//!
//! Non-transaction requests run inside a strict bracket that assigns the
//! per-cell message id, publishes it as `_message_id`, and clears it on
//! every exit path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use embergate_types::{GatewayError, Result};
use mlua::{Lua, RegistryKey, Value as LuaValue};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::marshal;
use crate::policy::{CallContext, ExecutionPolicy};

/// Base library loaded into every cell before the user script.
pub const DEFAULT_BASE_SCRIPT: &str = include_str!("base.lua");

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

enum CellJob {
    /// Invoke `_catalog[path…](params)` and reply with the JSON result.
    Call {
        path: Vec<String>,
        params: Value,
        reply: oneshot::Sender<String>,
    },
    /// Evaluate a chunk and reply with its JSON value.
    Eval {
        code: String,
        reply: oneshot::Sender<Result<Value>>,
    },
    /// Deliver an async response to a stored script callback.
    Callback {
        callback: RegistryKey,
        response: Value,
    },
    /// Drop the Lua state and exit the worker.
    Shutdown,
}

// ---------------------------------------------------------------------------
// Shared bridge state
// ---------------------------------------------------------------------------

struct CellShared {
    chat_id: String,
    /// Monotone message sequence, also used for JSON-RPC ids the script
    /// did not supply.
    seq: AtomicU64,
    /// Message id of the currently bracketed request, if any.
    message_ctx: Mutex<Option<String>>,
    policy: Arc<ExecutionPolicy>,
    handle: Handle,
    job_tx: mpsc::UnboundedSender<CellJob>,
}

impl CellShared {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn current_message_id(&self) -> Option<String> {
        self.message_ctx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn set_message_ctx(&self, value: Option<String>) {
        *self.message_ctx.lock().unwrap_or_else(|p| p.into_inner()) = value;
    }
}

// ---------------------------------------------------------------------------
// Cell
// ---------------------------------------------------------------------------

/// Handle to a cell's serialization lane.
pub struct Cell {
    shared: Arc<CellShared>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Cell {
    /// Spawns a cell worker, loads `base` then `code`, and returns the
    /// handle together with the JSON dump of the command catalog.
    pub(crate) async fn spawn(
        chat_id: &str,
        base: String,
        code: String,
        policy: Arc<ExecutionPolicy>,
        handle: Handle,
    ) -> Result<(Arc<Cell>, Value)> {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(CellShared {
            chat_id: chat_id.to_owned(),
            seq: AtomicU64::new(0),
            message_ctx: Mutex::new(None),
            policy,
            handle,
            job_tx,
        });

        let (setup_tx, setup_rx) = oneshot::channel();
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(format!("cell-{chat_id}"))
            .spawn(move || run_worker(worker_shared, job_rx, base, code, setup_tx))
            .map_err(|e| GatewayError::ParseError {
                reason: format!("cannot spawn cell worker: {e}"),
            })?;

        let catalog = setup_rx.await.map_err(|_| GatewayError::ParseError {
            reason: "cell worker died during setup".into(),
        })??;

        let cell = Arc::new(Cell {
            shared,
            worker: Mutex::new(Some(worker)),
        });
        Ok((cell, catalog))
    }

    /// The chat id this cell is bound to.
    pub fn chat_id(&self) -> &str {
        &self.shared.chat_id
    }

    /// Invokes `_catalog[path…](params)` on the cell's lane.
    ///
    /// Always returns a JSON string: `{"result":…}` or `{"error":…}`.
    pub async fn call(&self, path: Vec<String>, params: Value) -> String {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self.shared.job_tx.send(CellJob::Call {
            path,
            params,
            reply: reply_tx,
        });
        if sent.is_err() {
            return error_json("cell worker has shut down");
        }
        reply_rx
            .await
            .unwrap_or_else(|_| error_json("cell worker has shut down"))
    }

    /// Evaluates a chunk on the cell's lane, returning its JSON value.
    ///
    /// Used by hosts and tests to inspect cell state.
    pub async fn eval(&self, code: &str) -> Result<Value> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared
            .job_tx
            .send(CellJob::Eval {
                code: code.to_owned(),
                reply: reply_tx,
            })
            .map_err(|_| GatewayError::ParseError {
                reason: "cell worker has shut down".into(),
            })?;
        reply_rx.await.map_err(|_| GatewayError::ParseError {
            reason: "cell worker has shut down".into(),
        })?
    }

    /// Asks the worker to exit after the jobs already on the lane.
    pub(crate) fn request_shutdown(&self) {
        let _ = self.shared.job_tx.send(CellJob::Shutdown);
    }

    /// Joins the worker thread, if still attached.
    pub(crate) fn join_worker(&self) {
        let handle = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

fn error_json(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

fn run_worker(
    shared: Arc<CellShared>,
    mut jobs: mpsc::UnboundedReceiver<CellJob>,
    base: String,
    code: String,
    setup_tx: oneshot::Sender<Result<Value>>,
) {
    let lua = match build_cell(&shared, &base, &code) {
        Ok(lua) => {
            let catalog = match dump_catalog(&lua) {
                Ok(catalog) => catalog,
                Err(e) => {
                    let _ = setup_tx.send(Err(e));
                    return;
                }
            };
            if setup_tx.send(Ok(catalog)).is_err() {
                return;
            }
            lua
        }
        Err(e) => {
            let _ = setup_tx.send(Err(e));
            return;
        }
    };

    while let Some(job) = jobs.blocking_recv() {
        match job {
            CellJob::Call {
                path,
                params,
                reply,
            } => {
                let out = match invoke_catalog(&lua, &path, &params) {
                    Ok(value) => serde_json::json!({ "result": value }).to_string(),
                    Err(message) => error_json(&message),
                };
                let _ = reply.send(out);
            }

            CellJob::Eval { code, reply } => {
                let out = lua
                    .load(&code)
                    .set_name("eval")
                    .eval::<LuaValue>()
                    .and_then(|value| marshal::lua_to_json(value, &lua))
                    .map_err(|e| GatewayError::ParseError {
                        reason: format_lua_error(&e),
                    });
                let _ = reply.send(out);
            }

            CellJob::Callback { callback, response } => {
                let delivered = deliver_callback(&lua, &callback, &response);
                if let Err(e) = delivered {
                    tracing::warn!(
                        chat_id = %shared.chat_id,
                        error = %format_lua_error(&e),
                        "async callback failed",
                    );
                }
                let _ = lua.remove_registry_value(callback);
            }

            CellJob::Shutdown => break,
        }
    }

    tracing::debug!(chat_id = %shared.chat_id, "cell worker exited");
}

fn deliver_callback(lua: &Lua, callback: &RegistryKey, response: &Value) -> mlua::Result<()> {
    let func: mlua::Function = lua.registry_value(callback)?;
    let value = marshal::json_to_lua(lua, response)?;
    func.call::<()>(value)
}

fn invoke_catalog(
    lua: &Lua,
    path: &[String],
    params: &Value,
) -> std::result::Result<Value, String> {
    let mut current: LuaValue = lua
        .globals()
        .get("_catalog")
        .map_err(|e| format_lua_error(&e))?;

    for segment in path {
        let LuaValue::Table(table) = current else {
            return Err(format!("method is not supported: {}", path.join(".")));
        };
        current = table
            .get(segment.as_str())
            .map_err(|e| format_lua_error(&e))?;
    }

    let LuaValue::Function(func) = current else {
        return Err(format!("method is not supported: {}", path.join(".")));
    };

    let args = marshal::json_to_lua(lua, params).map_err(|e| format_lua_error(&e))?;
    let result: LuaValue = func.call(args).map_err(|e| format_lua_error(&e))?;
    marshal::lua_to_json(result, lua).map_err(|e| format_lua_error(&e))
}

/// Flattens mlua's nested callback errors into the script's message.
fn format_lua_error(err: &mlua::Error) -> String {
    match err {
        mlua::Error::RuntimeError(message) => message.clone(),
        mlua::Error::CallbackError { cause, .. } => format_lua_error(cause),
        mlua::Error::SyntaxError { message, .. } => format!("compile error: {message}"),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Cell construction
// ---------------------------------------------------------------------------

fn build_cell(shared: &Arc<CellShared>, base: &str, code: &str) -> Result<Lua> {
    let lua = Lua::new();

    install_bridge(&lua, shared).map_err(|e| GatewayError::ParseError {
        reason: format!("cannot install host bridge: {e}"),
    })?;

    // Host-facing facilities only; cells must not reach the process.
    lua.load("io = nil os = nil require = nil load = nil loadfile = nil dofile = nil debug = nil package = nil")
        .set_name("sandbox")
        .exec()
        .map_err(|e| GatewayError::ParseError {
            reason: format!("cannot sandbox cell: {e}"),
        })?;

    lua.load(base)
        .set_name("base")
        .exec()
        .map_err(|e| GatewayError::ParseError {
            reason: format!("base library failed: {}", format_lua_error(&e)),
        })?;

    if !code.trim().is_empty() {
        lua.load(code)
            .set_name("user")
            .exec()
            .map_err(|e| GatewayError::ParseError {
                reason: format_lua_error(&e),
            })?;
    }

    Ok(lua)
}

fn install_bridge(lua: &Lua, shared: &Arc<CellShared>) -> mlua::Result<()> {
    let gate = lua.create_table()?;

    let send_shared = Arc::clone(shared);
    gate.set(
        "send",
        lua.create_function(move |lua, payload: LuaValue| bridge_send(lua, &send_shared, payload))?,
    )?;

    let async_shared = Arc::clone(shared);
    gate.set(
        "send_async",
        lua.create_function(move |lua, (payload, callback): (LuaValue, mlua::Function)| {
            bridge_send_async(lua, &async_shared, payload, callback)
        })?,
    )?;

    gate.set(
        "json_encode",
        lua.create_function(|lua, value: LuaValue| {
            let json = marshal::lua_to_json(value, lua)?;
            serde_json::to_string(&json).map_err(|e| mlua::Error::SerializeError(e.to_string()))
        })?,
    )?;

    gate.set(
        "json_decode",
        lua.create_function(|lua, text: String| {
            let json: Value = serde_json::from_str(&text)
                .map_err(|e| mlua::Error::RuntimeError(format!("invalid JSON: {e}")))?;
            marshal::json_to_lua(lua, &json)
        })?,
    )?;

    lua.globals().set("gate", gate)
}

/// Synchronous dispatch: blocks the lane until the policy answers.
fn bridge_send(
    lua: &Lua,
    shared: &Arc<CellShared>,
    payload: LuaValue,
) -> mlua::Result<LuaValue> {
    let mut payload_json = marshal::lua_to_json(payload, lua)?;

    let sequence = shared.next_seq();
    assign_request_id(&mut payload_json, sequence);

    let is_transaction = payload_json.get("method").and_then(Value::as_str)
        == Some(embergate_rpc::METHOD_SEND_TRANSACTION);

    // Message-id bracket for non-transaction requests.
    let bracketed = if is_transaction {
        false
    } else {
        let message_id = sequence.to_string();
        lua.globals().set("_message_id", message_id.as_str())?;
        shared.set_message_ctx(Some(message_id));
        true
    };

    let ctx = CallContext {
        message_id: shared.current_message_id(),
    };
    let response = shared
        .handle
        .block_on(shared.policy.execute(&ctx, payload_json));

    // Strict bracket: post-processing runs on every exit path; the
    // dispatch above cannot fail, only produce an error response.
    if bracketed {
        lua.globals().set("_message_id", LuaValue::Nil)?;
        shared.set_message_ctx(None);
    }

    marshal::json_to_lua(lua, &response)
}

/// Asynchronous dispatch: returns immediately, the callback is
/// re-scheduled onto the lane with the response.
fn bridge_send_async(
    lua: &Lua,
    shared: &Arc<CellShared>,
    payload: LuaValue,
    callback: mlua::Function,
) -> mlua::Result<()> {
    let mut payload_json = marshal::lua_to_json(payload, lua)?;
    assign_request_id(&mut payload_json, shared.next_seq());

    let callback = lua.create_registry_value(callback)?;
    let task_shared = Arc::clone(shared);
    let handle = shared.handle.clone();
    handle.spawn(async move {
        let ctx = CallContext {
            message_id: task_shared.current_message_id(),
        };
        let response = task_shared.policy.execute(&ctx, payload_json).await;
        // A send failure means the cell is gone; the response is moot.
        let _ = task_shared
            .job_tx
            .send(CellJob::Callback { callback, response });
    });

    Ok(())
}

/// Assigns the bridge-generated id when the script did not supply one.
fn assign_request_id(payload: &mut Value, sequence: u64) {
    if let Some(object) = payload.as_object_mut() {
        let missing = !object.contains_key("id") || object["id"].is_null();
        if missing {
            object.insert("id".into(), Value::from(sequence));
        }
    }
}

/// JSON dump of `_catalog` in the shape scripts see it: function-valued
/// members are omitted, like a JSON stringify would.
fn dump_catalog(lua: &Lua) -> Result<Value> {
    fn dump(lua: &Lua, value: LuaValue) -> mlua::Result<Option<Value>> {
        match value {
            LuaValue::Function(_) => Ok(None),
            LuaValue::Table(table) => {
                let mut map = serde_json::Map::new();
                for pair in table.pairs::<String, LuaValue>() {
                    let (key, item) = pair?;
                    if let Some(json) = dump(lua, item)? {
                        map.insert(key, json);
                    }
                }
                Ok(Some(Value::Object(map)))
            }
            other => Ok(Some(marshal::lua_to_json(other, lua)?)),
        }
    }

    let catalog: LuaValue = lua
        .globals()
        .get("_catalog")
        .map_err(|e| GatewayError::ParseError {
            reason: format_lua_error(&e),
        })?;
    let dumped = dump(lua, catalog).map_err(|e| GatewayError::ParseError {
        reason: format_lua_error(&e),
    })?;
    Ok(dumped.unwrap_or(Value::Null))
}
