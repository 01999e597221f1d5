//! Pending-call bookkeeping: completion slots and call handles.
//!
//! A [`CompletionSlot`] is the single-assignment container a pending call
//! settles into exactly once - first writer wins, later settlement attempts
//! are no-ops. Settling also disposes every subscription attached to the
//! slot, which is what guarantees a progress callback never fires after its
//! call has settled.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::client::ClientInner;
use crate::demux::{lock, Subscription};
use crate::error::{Result, WsRpcError};

/// Single-assignment result container for one pending call.
pub(crate) struct CompletionSlot<T> {
    inner: Mutex<SlotInner<T>>,
}

struct SlotInner<T> {
    sender: Option<oneshot::Sender<Result<T>>>,
    subscriptions: Vec<Subscription>,
}

impl<T: Send + 'static> CompletionSlot<T> {
    pub(crate) fn new() -> (Arc<Self>, oneshot::Receiver<Result<T>>) {
        let (sender, receiver) = oneshot::channel();
        let slot = Arc::new(Self {
            inner: Mutex::new(SlotInner {
                sender: Some(sender),
                subscriptions: Vec::new(),
            }),
        });
        (slot, receiver)
    }

    /// Settle the call. Returns whether this invocation performed the
    /// settlement; at most one ever does.
    pub(crate) fn settle(&self, outcome: Result<T>) -> bool {
        let (sender, subscriptions) = {
            let mut inner = lock(&self.inner);
            match inner.sender.take() {
                Some(sender) => (sender, std::mem::take(&mut inner.subscriptions)),
                None => return false,
            }
        };

        // Subscriptions are disposed before the outcome is published, so no
        // filter dispatch can observe a settled call.
        for subscription in &subscriptions {
            subscription.dispose();
        }
        let _ = sender.send(outcome);
        true
    }

    /// Tie a subscription's lifetime to this slot. If the slot is already
    /// settled the subscription is disposed immediately.
    pub(crate) fn attach(&self, subscription: Subscription) {
        let mut inner = lock(&self.inner);
        if inner.sender.is_some() {
            inner.subscriptions.push(subscription);
        } else {
            drop(inner);
            subscription.dispose();
        }
    }
}

/// Handle to an in-flight request or batch.
///
/// Exactly one terminal settlement occurs per handle: resolved, peer error,
/// timeout, cancelled, or connection lost.
pub struct CallHandle<T = Value> {
    ids: Vec<u64>,
    slot: Arc<CompletionSlot<T>>,
    receiver: oneshot::Receiver<Result<T>>,
    client: Arc<ClientInner>,
}

impl<T: Send + 'static> CallHandle<T> {
    pub(crate) fn new(
        ids: Vec<u64>,
        slot: Arc<CompletionSlot<T>>,
        receiver: oneshot::Receiver<Result<T>>,
        client: Arc<ClientInner>,
    ) -> Self {
        Self {
            ids,
            slot,
            receiver,
            client,
        }
    }

    /// The correlation ids assigned to this call (one per batch entry).
    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    /// Wait for the call to settle.
    pub async fn wait(self) -> Result<T> {
        self.receiver
            .await
            .unwrap_or(Err(WsRpcError::ConnectionLost))
    }

    /// Wait for the call to settle, at most `timeout` long.
    ///
    /// On elapse the call settles as [`WsRpcError::Timeout`] and a `cancel`
    /// notification is sent per id, best-effort, so the peer may abort the
    /// work.
    pub async fn wait_timeout(mut self, timeout: Duration) -> Result<T> {
        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(WsRpcError::ConnectionLost),
            Err(_elapsed) => {
                if self.slot.settle(Err(WsRpcError::Timeout)) {
                    self.notify_cancel().await;
                    Err(WsRpcError::Timeout)
                } else {
                    // A real settlement won the race against the timer.
                    (&mut self.receiver)
                        .await
                        .unwrap_or(Err(WsRpcError::ConnectionLost))
                }
            }
        }
    }

    /// Cancel the call.
    ///
    /// Settles the local slot as [`WsRpcError::Cancelled`] immediately, then
    /// best-effort notifies the peer with one `cancel` notification per id.
    /// Returns whether this call was still pending; `false` means it had
    /// already settled and nothing was sent.
    pub async fn cancel(self) -> bool {
        if self.slot.settle(Err(WsRpcError::Cancelled)) {
            self.notify_cancel().await;
            true
        } else {
            false
        }
    }

    async fn notify_cancel(&self) {
        for id in &self.ids {
            self.client.send_cancel(*id).await;
        }
    }
}

impl CallHandle<Value> {
    /// The correlation id of this single request.
    pub fn id(&self) -> u64 {
        self.ids[0]
    }
}
