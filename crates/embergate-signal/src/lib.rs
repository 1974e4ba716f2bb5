//! Process-wide signal bus.
//!
//! The embedding host registers a single callback with [`set_handler`];
//! every component emits typed [`Envelope`]s through [`emit`]. Emission
//! serializes the envelope to JSON and invokes the handler under one lock,
//! so the host observes a total order over all signals.
//!
//! There is no hidden initialization: before `set_handler` is called, the
//! default handler logs envelopes at debug level and drops them.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// The node finished starting and is fully wired.
pub const EVENT_NODE_STARTED: &str = "node.started";
/// The node stopped and its handles were torn down.
pub const EVENT_NODE_STOPPED: &str = "node.stopped";
/// A fatal error occurred while starting or running the node.
pub const EVENT_NODE_CRASHED: &str = "node.crashed";
/// The chain data directory was removed by `reset_chain_data`.
pub const EVENT_CHAIN_DATA_REMOVED: &str = "node.chaindata.removed";
/// A transaction entered the approval queue.
pub const EVENT_TRANSACTION_QUEUED: &str = "transaction.queued";
/// A queued transaction was rejected, discarded, or expired.
pub const EVENT_TRANSACTION_FAILED: &str = "transaction.failed";

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A typed signal delivered to the host callback as JSON.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    /// Event type, one of the `EVENT_*` constants.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload; shape depends on the event type.
    pub event: Value,
}

impl Envelope {
    /// Creates an envelope with the given type and payload.
    pub fn new(event_type: &str, event: Value) -> Self {
        Self {
            event_type: event_type.to_owned(),
            event,
        }
    }

    /// Creates an envelope with an empty `{}` payload.
    pub fn empty(event_type: &str) -> Self {
        Self::new(event_type, Value::Object(serde_json::Map::new()))
    }
}

// ---------------------------------------------------------------------------
// Handler registry
// ---------------------------------------------------------------------------

type Handler = Box<dyn Fn(&str) + Send + Sync>;

/// Single registered handler. The mutex both guards replacement and
/// serializes emissions, giving the total-order guarantee.
static HANDLER: Mutex<Option<Handler>> = Mutex::new(None);

/// Registers the host callback. Replaces any previous handler.
pub fn set_handler(handler: impl Fn(&str) + Send + Sync + 'static) {
    let mut slot = HANDLER.lock().unwrap_or_else(|p| p.into_inner());
    *slot = Some(Box::new(handler));
}

/// Removes the registered handler, reverting to the logging default.
pub fn reset_handler() {
    let mut slot = HANDLER.lock().unwrap_or_else(|p| p.into_inner());
    *slot = None;
}

/// Serializes `envelope` and delivers it to the registered handler.
///
/// Envelopes are delivered in emission order; concurrent emitters are
/// serialized by the handler lock.
pub fn emit(envelope: Envelope) {
    let json = match serde_json::to_string(&envelope) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(%e, event_type = %envelope.event_type, "failed to encode signal");
            return;
        }
    };

    let slot = HANDLER.lock().unwrap_or_else(|p| p.into_inner());
    match slot.as_ref() {
        Some(handler) => handler(&json),
        None => tracing::debug!(signal = %json, "no signal handler registered"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    // Signal tests share the process-wide handler slot, so they run under
    // one lock to keep captures from interleaving.
    static TEST_GUARD: Mutex<()> = Mutex::new(());

    #[test]
    fn emits_in_order_with_type_tag() {
        let _guard = TEST_GUARD.lock().unwrap_or_else(|p| p.into_inner());
        let (tx, rx) = mpsc::channel::<String>();
        set_handler(move |json| {
            let _ = tx.send(json.to_owned());
        });

        emit(Envelope::empty(EVENT_NODE_STARTED));
        emit(Envelope::new(
            EVENT_NODE_CRASHED,
            serde_json::json!({"error": "boom"}),
        ));
        emit(Envelope::empty(EVENT_NODE_STOPPED));
        reset_handler();

        let first = rx.recv().expect("first signal");
        assert_eq!(first, r#"{"type":"node.started","event":{}}"#);

        let second: Envelope =
            serde_json::from_str(&rx.recv().expect("second signal")).expect("decode");
        assert_eq!(second.event_type, EVENT_NODE_CRASHED);
        assert_eq!(second.event["error"], "boom");

        let third: Envelope =
            serde_json::from_str(&rx.recv().expect("third signal")).expect("decode");
        assert_eq!(third.event_type, EVENT_NODE_STOPPED);
    }

    #[test]
    fn emit_without_handler_does_not_panic() {
        let _guard = TEST_GUARD.lock().unwrap_or_else(|p| p.into_inner());
        reset_handler();
        emit(Envelope::empty(EVENT_NODE_STOPPED));
    }

    #[test]
    fn handler_replacement_takes_effect() {
        let _guard = TEST_GUARD.lock().unwrap_or_else(|p| p.into_inner());
        let (tx_old, rx_old) = mpsc::channel::<String>();
        set_handler(move |json| {
            let _ = tx_old.send(json.to_owned());
        });

        let (tx_new, rx_new) = mpsc::channel::<String>();
        set_handler(move |json| {
            let _ = tx_new.send(json.to_owned());
        });

        emit(Envelope::empty(EVENT_NODE_STARTED));
        reset_handler();

        assert!(rx_old.try_recv().is_err());
        assert!(rx_new.try_recv().is_ok());
    }
}
