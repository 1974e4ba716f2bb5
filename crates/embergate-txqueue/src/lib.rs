//! Transaction approval queue.
//!
//! `eth_sendTransaction` requests on the local path land here and wait for
//! the user to approve (`complete`) or reject (`discard`) them. Entries are
//! keyed by an unguessable [`QueuedTxId`], bounded in number, and expire
//! automatically after [`DEFAULT_TX_SEND_TIMEOUT`].
//!
//! # Invariants
//!
//! - No two entries share an id.
//! - Completion, discard, and expiry are terminal and at-most-once: they
//!   race for a single compare-and-set on the entry status, and the loser
//!   observes `AlreadyTerminal` (or `UnknownTransaction` once the winner
//!   has removed the entry).
//! - Enqueue beyond capacity fails with `QueueFull` and emits nothing.
//! - The queue lock is never held while emitting signals or calling into
//!   any other component.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use embergate_signal as signal;
use embergate_types::{
    GatewayError, QueuedTxId, Result, TxArgs, TxHash, TxStatus,
};
use tokio::sync::{mpsc, oneshot};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Maximum number of transactions awaiting approval at once.
pub const DEFAULT_TX_QUEUE_CAPACITY: usize = 10;

/// How long a queued transaction may wait for approval before expiring.
pub const DEFAULT_TX_SEND_TIMEOUT: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// QueuedTx
// ---------------------------------------------------------------------------

/// A transaction awaiting user approval.
#[derive(Debug)]
pub struct QueuedTx {
    /// Unguessable identifier handed to the host in `transaction.queued`.
    pub id: QueuedTxId,
    /// Decoded `eth_sendTransaction` arguments.
    pub args: TxArgs,
    /// Message id of the originating cell call, for host-side correlation.
    pub message_id: Option<String>,
    /// When the transaction entered the queue.
    pub created_at: DateTime<Utc>,
    status: Mutex<TxStatus>,
    done: Mutex<Option<oneshot::Sender<Result<TxHash>>>>,
}

impl QueuedTx {
    /// Returns the current status.
    pub fn status(&self) -> TxStatus {
        *self.status.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Compare-and-set `from → to`. Fails with `AlreadyTerminal` when the
    /// current status differs from `from`; this is the single point that
    /// makes terminal operations at-most-once.
    fn transition(&self, from: TxStatus, to: TxStatus) -> Result<()> {
        let mut status = self.status.lock().unwrap_or_else(|p| p.into_inner());
        if *status != from {
            return Err(GatewayError::AlreadyTerminal {
                id: self.id.to_string(),
            });
        }
        *status = to;
        Ok(())
    }

    /// Delivers the final result to the waiter, if it is still listening.
    fn wake(&self, result: Result<TxHash>) {
        let sender = {
            let mut slot = self.done.lock().unwrap_or_else(|p| p.into_inner());
            slot.take()
        };
        if let Some(sender) = sender {
            let _ = sender.send(result);
        }
    }
}

// ---------------------------------------------------------------------------
// TxQueue
// ---------------------------------------------------------------------------

struct Inner {
    entries: HashMap<QueuedTxId, Arc<QueuedTx>>,
}

/// Bounded, internally synchronized approval queue.
pub struct TxQueue {
    inner: Mutex<Inner>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<QueuedTxId>>>,
    capacity: usize,
    ttl: Duration,
    /// Self-handle for the expiry watchdog tasks.
    weak_self: Weak<TxQueue>,
}

impl TxQueue {
    /// Creates a queue with the default capacity and TTL.
    pub fn new() -> Arc<Self> {
        Self::with_settings(DEFAULT_TX_QUEUE_CAPACITY, DEFAULT_TX_SEND_TIMEOUT)
    }

    /// Creates a queue with explicit capacity and TTL (tests shorten
    /// both).
    pub fn with_settings(capacity: usize, ttl: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
            }),
            subscribers: Mutex::new(Vec::new()),
            capacity,
            ttl,
            weak_self: weak_self.clone(),
        })
    }

    /// Number of transactions currently awaiting approval.
    pub fn len(&self) -> usize {
        self.lock_inner().entries.len()
    }

    /// Returns `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a subscriber notified with the id of every enqueued
    /// transaction.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<QueuedTxId> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(tx);
        rx
    }

    /// Enqueues a transaction and arms its expiry watchdog.
    ///
    /// Emits `transaction.queued` and returns the entry together with the
    /// one-shot receiver that will carry the final result.
    ///
    /// # Errors
    ///
    /// [`GatewayError::QueueFull`] at capacity; nothing is emitted then.
    ///
    /// Must be called from within a tokio runtime (the watchdog is a
    /// spawned task).
    pub fn enqueue(
        &self,
        args: TxArgs,
        message_id: Option<String>,
    ) -> Result<(Arc<QueuedTx>, oneshot::Receiver<Result<TxHash>>)> {
        let (done_tx, done_rx) = oneshot::channel();
        let tx = Arc::new(QueuedTx {
            id: QueuedTxId::random(),
            args,
            message_id,
            created_at: Utc::now(),
            status: Mutex::new(TxStatus::Pending),
            done: Mutex::new(Some(done_tx)),
        });

        {
            let mut inner = self.lock_inner();
            if inner.entries.len() >= self.capacity {
                return Err(GatewayError::QueueFull);
            }
            inner.entries.insert(tx.id.clone(), Arc::clone(&tx));
        }

        self.notify_subscribers(&tx.id);
        signal::emit(signal::Envelope::new(
            signal::EVENT_TRANSACTION_QUEUED,
            serde_json::json!({
                "id": &tx.id,
                "args": &tx.args,
                "message_id": &tx.message_id,
            }),
        ));
        tracing::debug!(id = %tx.id, from = %tx.args.from, "transaction queued");

        let queue = self.weak_self.clone();
        let id = tx.id.clone();
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            // Losing the race against complete/discard is the normal
            // case; a dropped queue simply has nothing left to expire.
            if let Some(queue) = queue.upgrade() {
                let _ = queue.expire(&id);
            }
        });

        Ok((tx, done_rx))
    }

    /// Returns the entry for `id`.
    ///
    /// # Errors
    ///
    /// [`GatewayError::UnknownTransaction`] if no entry exists.
    pub fn view(&self, id: &QueuedTxId) -> Result<Arc<QueuedTx>> {
        self.lock_inner()
            .entries
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownTransaction { id: id.to_string() })
    }

    /// Ids of all queued transactions, oldest first.
    pub fn pending_ids(&self) -> Vec<QueuedTxId> {
        let inner = self.lock_inner();
        let mut entries: Vec<&Arc<QueuedTx>> = inner.entries.values().collect();
        entries.sort_by_key(|tx| tx.created_at);
        entries.iter().map(|tx| tx.id.clone()).collect()
    }

    /// Claims `id` for a completion attempt (`Pending → InProgress`).
    ///
    /// The caller owns the entry until it calls
    /// [`finish`](Self::finish) or [`fail`](Self::fail).
    pub fn begin_completion(&self, id: &QueuedTxId) -> Result<Arc<QueuedTx>> {
        let tx = self.view(id)?;
        tx.transition(TxStatus::Pending, TxStatus::InProgress)?;
        Ok(tx)
    }

    /// Finishes a claimed completion attempt with the submitted hash.
    pub fn finish(&self, id: &QueuedTxId, hash: TxHash) -> Result<()> {
        let tx = self.view(id)?;
        tx.transition(TxStatus::InProgress, TxStatus::Done)?;
        self.remove(id);
        tx.wake(Ok(hash));
        tracing::debug!(%id, %hash, "transaction completed");
        Ok(())
    }

    /// Fails a claimed completion attempt with `error`.
    ///
    /// Emits `transaction.failed` and wakes the waiter with the error.
    pub fn fail(&self, id: &QueuedTxId, error: GatewayError) -> Result<()> {
        let tx = self.view(id)?;
        tx.transition(TxStatus::InProgress, TxStatus::Failed)?;
        self.remove(id);
        self.emit_failed(id, &error);
        tx.wake(Err(error));
        Ok(())
    }

    /// Discards a pending transaction on the user's behalf.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::UnknownTransaction`] if no entry exists.
    /// - [`GatewayError::AlreadyTerminal`] if a completion attempt or the
    ///   watchdog won the race.
    pub fn discard(&self, id: &QueuedTxId) -> Result<()> {
        let tx = self.view(id)?;
        tx.transition(TxStatus::Pending, TxStatus::Failed)?;
        self.remove(id);
        let error = GatewayError::Discarded { id: id.to_string() };
        self.emit_failed(id, &error);
        tx.wake(Err(error));
        tracing::debug!(%id, "transaction discarded");
        Ok(())
    }

    /// Expires a transaction whose TTL elapsed while still pending.
    pub fn expire(&self, id: &QueuedTxId) -> Result<()> {
        let tx = self.view(id)?;
        tx.transition(TxStatus::Pending, TxStatus::Expired)?;
        self.remove(id);
        let error = GatewayError::Expired { id: id.to_string() };
        self.emit_failed(id, &error);
        tx.wake(Err(error));
        tracing::debug!(%id, "transaction expired");
        Ok(())
    }

    // -- Internal ---------------------------------------------------------

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn remove(&self, id: &QueuedTxId) {
        self.lock_inner().entries.remove(id);
    }

    fn notify_subscribers(&self, id: &QueuedTxId) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|p| p.into_inner());
        subscribers.retain(|sender| sender.send(id.clone()).is_ok());
    }

    fn emit_failed(&self, id: &QueuedTxId, error: &GatewayError) {
        signal::emit(signal::Envelope::new(
            signal::EVENT_TRANSACTION_FAILED,
            serde_json::json!({
                "id": id,
                "error_message": error.to_string(),
                "error_code": error.send_error_code(),
            }),
        ));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use embergate_types::{Address, U256};

    use super::*;

    fn args(n: u64) -> TxArgs {
        TxArgs {
            from: Address::repeat_byte(0x11),
            to: Some(Address::repeat_byte(0x22)),
            value: Some(U256::from(n)),
            ..TxArgs::default()
        }
    }

    #[tokio::test]
    async fn enqueue_then_complete_delivers_hash() {
        let queue = TxQueue::new();
        let (tx, done) = queue.enqueue(args(1), None).expect("enqueue");
        assert_eq!(tx.status(), TxStatus::Pending);
        assert_eq!(queue.len(), 1);

        let claimed = queue.begin_completion(&tx.id).expect("claim");
        assert_eq!(claimed.status(), TxStatus::InProgress);

        let hash = TxHash::repeat_byte(0xab);
        queue.finish(&tx.id, hash).expect("finish");

        let result = done.await.expect("waiter woken").expect("hash");
        assert_eq!(result, hash);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn capacity_bound_is_enforced_without_signal() {
        let queue = TxQueue::with_settings(2, DEFAULT_TX_SEND_TIMEOUT);
        let _a = queue.enqueue(args(1), None).expect("first");
        let _b = queue.enqueue(args(2), None).expect("second");

        let err = queue.enqueue(args(3), None).expect_err("full");
        assert!(matches!(err, GatewayError::QueueFull));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn discard_wakes_waiter_with_discarded() {
        let queue = TxQueue::new();
        let (tx, done) = queue.enqueue(args(1), None).expect("enqueue");

        queue.discard(&tx.id).expect("discard");
        let err = done.await.expect("woken").expect_err("discarded");
        assert!(matches!(err, GatewayError::Discarded { .. }), "got {err:?}");

        // The id is gone; a second discard cannot find it.
        let err = queue.discard(&tx.id).expect_err("second discard");
        assert!(matches!(err, GatewayError::UnknownTransaction { .. }));
    }

    #[tokio::test]
    async fn complete_and_discard_race_at_most_once() {
        let queue = TxQueue::new();
        let (tx, _done) = queue.enqueue(args(1), None).expect("enqueue");

        let claimed = queue.begin_completion(&tx.id).expect("claim");

        // Discard arriving after the claim loses the CAS.
        let err = queue.discard(&tx.id).expect_err("loser");
        assert!(matches!(err, GatewayError::AlreadyTerminal { .. }), "got {err:?}");

        // A second completion attempt on the same entry also loses.
        let err = queue.begin_completion(&claimed.id).expect_err("second claim");
        assert!(matches!(err, GatewayError::AlreadyTerminal { .. }));
    }

    #[tokio::test]
    async fn concurrent_discards_have_exactly_one_winner() {
        let queue = TxQueue::new();
        let (tx, _done) = queue.enqueue(args(1), None).expect("enqueue");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = Arc::clone(&queue);
            let id = tx.id.clone();
            handles.push(tokio::spawn(async move { queue.discard(&id).is_ok() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.expect("join") {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expires_pending_transactions() {
        let queue = TxQueue::with_settings(10, Duration::from_secs(5));
        let (tx, done) = queue.enqueue(args(1), None).expect("enqueue");

        tokio::time::sleep(Duration::from_secs(6)).await;

        let err = done.await.expect("woken").expect_err("expired");
        assert!(matches!(err, GatewayError::Expired { .. }), "got {err:?}");
        assert!(queue.view(&tx.id).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_loses_to_prior_completion() {
        let queue = TxQueue::with_settings(10, Duration::from_secs(5));
        let (tx, done) = queue.enqueue(args(1), None).expect("enqueue");

        queue.begin_completion(&tx.id).expect("claim");
        queue.finish(&tx.id, TxHash::repeat_byte(0x01)).expect("finish");

        tokio::time::sleep(Duration::from_secs(6)).await;

        // The waiter saw the hash, not an expiry.
        assert!(done.await.expect("woken").is_ok());
    }

    #[tokio::test]
    async fn subscriber_sees_enqueued_ids() {
        let queue = TxQueue::new();
        let mut rx = queue.subscribe();

        let (a, _da) = queue.enqueue(args(1), None).expect("enqueue");
        let (b, _db) = queue.enqueue(args(2), None).expect("enqueue");

        assert_eq!(rx.recv().await.expect("first"), a.id);
        assert_eq!(rx.recv().await.expect("second"), b.id);
    }

    #[tokio::test]
    async fn pending_ids_oldest_first() {
        let queue = TxQueue::new();
        let (a, _da) = queue.enqueue(args(1), None).expect("enqueue");
        let (b, _db) = queue.enqueue(args(2), None).expect("enqueue");
        let (c, _dc) = queue.enqueue(args(3), None).expect("enqueue");

        assert_eq!(queue.pending_ids(), vec![a.id.clone(), b.id.clone(), c.id.clone()]);

        queue.discard(&b.id).expect("discard");
        assert_eq!(queue.pending_ids(), vec![a.id.clone(), c.id.clone()]);
    }
}
