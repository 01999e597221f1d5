//! Message demultiplexer - one read loop, many filtered consumers.
//!
//! A single pump task per connection turns the transport's inbound frame
//! sequence into dispatches against a table of subscribers. Two subscription
//! shapes exist:
//!
//! - **first match** - delivers the first frame satisfying the predicate,
//!   then removes itself; used for request/batch correlation
//! - **continuous** - invokes a callback for every matching frame until
//!   explicitly disposed; used for progress routing
//!
//! Binary frames are dropped before decoding (the protocol is text-JSON
//! only) and frames that fail JSON decoding are dropped silently. When the
//! transport stream ends, first-match subscribers still waiting receive
//! [`FirstMatch::StreamEnd`] so their calls can settle as connection-lost,
//! and continuous subscribers are disposed.
//!
//! Neither shape ever dispatches after disposal: continuous sinks hold their
//! disposed flag across the callback invocation, and first-match deliveries
//! are taken out of the table exactly once.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;

/// Lock a mutex, ignoring poisoning. Subscriber tables stay consistent
/// because mutations are single assignments and removals.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Predicate = Box<dyn Fn(&Value) -> bool + Send>;
type OnceDelivery = Box<dyn FnOnce(FirstMatch) + Send>;

/// Outcome delivered to a first-match subscriber.
pub(crate) enum FirstMatch {
    /// The first inbound frame satisfying the predicate.
    Frame(Value),
    /// The stream completed before any frame matched.
    StreamEnd,
}

/// The per-connection demultiplexer.
pub(crate) struct Demux {
    table: Mutex<SubscriberTable>,
}

#[derive(Default)]
struct SubscriberTable {
    next_key: u64,
    completed: bool,
    once: Vec<OnceEntry>,
    each: Vec<EachEntry>,
}

struct OnceEntry {
    key: u64,
    predicate: Predicate,
    deliver: Option<OnceDelivery>,
}

struct EachEntry {
    key: u64,
    predicate: Predicate,
    sink: Arc<EachSink>,
}

/// Callback holder for a continuous subscription.
///
/// The disposed flag is held locked while the callback runs, so `dispose()`
/// returning guarantees the callback will not fire again.
struct EachSink {
    disposed: Mutex<bool>,
    callback: Box<dyn Fn(&Value) + Send + Sync>,
}

impl EachSink {
    fn fire(&self, value: &Value) {
        let disposed = lock(&self.disposed);
        if !*disposed {
            (self.callback)(value);
        }
    }

    fn dispose(&self) {
        *lock(&self.disposed) = true;
    }
}

/// Handle to a registered subscription. Disposing is idempotent.
pub(crate) struct Subscription {
    demux: Weak<Demux>,
    key: u64,
    kind: SubscriptionKind,
    sink: Option<Arc<EachSink>>,
}

enum SubscriptionKind {
    FirstMatch,
    Continuous,
}

impl Subscription {
    /// Remove this subscription from the table; no dispatch happens after
    /// this returns.
    pub(crate) fn dispose(&self) {
        if let Some(sink) = &self.sink {
            sink.dispose();
        }
        if let Some(demux) = self.demux.upgrade() {
            let mut table = lock(&demux.table);
            match self.kind {
                SubscriptionKind::FirstMatch => table.once.retain(|e| e.key != self.key),
                SubscriptionKind::Continuous => table.each.retain(|e| e.key != self.key),
            }
        }
    }
}

impl Demux {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            table: Mutex::new(SubscriberTable::default()),
        })
    }

    /// Register a first-match subscriber.
    ///
    /// `deliver` is invoked with the first frame satisfying `predicate`, or
    /// with [`FirstMatch::StreamEnd`] if the stream completes first. If the
    /// stream has already completed, delivery happens before this returns.
    pub(crate) fn subscribe_first_match<P, D>(self: &Arc<Self>, predicate: P, deliver: D) -> Subscription
    where
        P: Fn(&Value) -> bool + Send + 'static,
        D: FnOnce(FirstMatch) + Send + 'static,
    {
        let mut table = lock(&self.table);
        if table.completed {
            drop(table);
            deliver(FirstMatch::StreamEnd);
            return Subscription {
                demux: Weak::new(),
                key: 0,
                kind: SubscriptionKind::FirstMatch,
                sink: None,
            };
        }

        let key = table.next_key;
        table.next_key += 1;
        table.once.push(OnceEntry {
            key,
            predicate: Box::new(predicate),
            deliver: Some(Box::new(deliver)),
        });
        drop(table);

        Subscription {
            demux: Arc::downgrade(self),
            key,
            kind: SubscriptionKind::FirstMatch,
            sink: None,
        }
    }

    /// Register a continuous subscriber, invoked for every matching frame
    /// until disposed.
    pub(crate) fn subscribe_each<P, C>(self: &Arc<Self>, predicate: P, callback: C) -> Subscription
    where
        P: Fn(&Value) -> bool + Send + 'static,
        C: Fn(&Value) + Send + Sync + 'static,
    {
        let sink = Arc::new(EachSink {
            disposed: Mutex::new(false),
            callback: Box::new(callback),
        });

        let mut table = lock(&self.table);
        if table.completed {
            sink.dispose();
            return Subscription {
                demux: Weak::new(),
                key: 0,
                kind: SubscriptionKind::Continuous,
                sink: Some(sink),
            };
        }

        let key = table.next_key;
        table.next_key += 1;
        table.each.push(EachEntry {
            key,
            predicate: Box::new(predicate),
            sink: sink.clone(),
        });

        Subscription {
            demux: Arc::downgrade(self),
            key,
            kind: SubscriptionKind::Continuous,
            sink: Some(sink),
        }
    }

    /// Route one decoded inbound frame to its subscribers.
    ///
    /// Matching runs under the table lock; deliveries run outside it, since a
    /// delivery may settle a call, which in turn disposes subscriptions.
    pub(crate) fn dispatch(&self, value: Value) {
        let mut once_hits: Vec<OnceDelivery> = Vec::new();
        let mut each_hits: Vec<Arc<EachSink>> = Vec::new();
        {
            let mut table = lock(&self.table);
            table.once.retain_mut(|entry| {
                if (entry.predicate)(&value) {
                    if let Some(deliver) = entry.deliver.take() {
                        once_hits.push(deliver);
                    }
                    false
                } else {
                    true
                }
            });
            for entry in &table.each {
                if (entry.predicate)(&value) {
                    each_hits.push(entry.sink.clone());
                }
            }
        }

        for sink in &each_hits {
            sink.fire(&value);
        }

        if once_hits.len() == 1 {
            if let Some(deliver) = once_hits.pop() {
                deliver(FirstMatch::Frame(value));
            }
        } else {
            for deliver in once_hits {
                deliver(FirstMatch::Frame(value.clone()));
            }
        }
    }

    /// Complete the sequence: notify waiting first-match subscribers of
    /// stream end and dispose continuous subscribers.
    pub(crate) fn complete(&self) {
        let (once, each) = {
            let mut table = lock(&self.table);
            table.completed = true;
            (std::mem::take(&mut table.once), std::mem::take(&mut table.each))
        };

        for entry in each {
            entry.sink.dispose();
        }
        for mut entry in once {
            if let Some(deliver) = entry.deliver.take() {
                deliver(FirstMatch::StreamEnd);
            }
        }
    }

    /// Drive the demultiplexer from a transport frame stream until it ends.
    pub(crate) async fn pump<S>(self: Arc<Self>, mut source: S)
    where
        S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
    {
        while let Some(item) = source.next().await {
            match item {
                Ok(Message::Text(text)) => match serde_json::from_str::<Value>(&text) {
                    Ok(value) => self.dispatch(value),
                    Err(e) => tracing::trace!("dropping text frame that is not valid JSON: {e}"),
                },
                Ok(Message::Binary(_)) => tracing::trace!("dropping binary frame"),
                Ok(Message::Close(_)) => tracing::debug!("peer initiated close"),
                // Ping/pong are answered by the transport layer.
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("websocket read ended: {e}");
                    break;
                }
            }
        }
        self.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn counter() -> (Arc<Mutex<Vec<Value>>>, impl Fn(&Value) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |value: &Value| lock(&sink).push(value.clone()))
    }

    #[test]
    fn test_first_match_delivers_once() {
        let demux = Demux::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        demux.subscribe_first_match(
            |v| v["id"] == json!(1),
            move |m| {
                if let FirstMatch::Frame(v) = m {
                    lock(&sink).push(v);
                }
            },
        );

        demux.dispatch(json!({"id": 1, "result": "a"}));
        demux.dispatch(json!({"id": 1, "result": "b"}));
        demux.dispatch(json!({"id": 2, "result": "c"}));

        let seen = lock(&seen);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["result"], "a");
    }

    #[test]
    fn test_non_matching_frames_ignored() {
        let demux = Demux::new();
        let delivered = Arc::new(Mutex::new(false));
        let flag = delivered.clone();

        demux.subscribe_first_match(|v| v["id"] == json!(7), move |_| *lock(&flag) = true);
        demux.dispatch(json!({"id": 8}));

        assert!(!*lock(&delivered));
    }

    #[test]
    fn test_continuous_until_disposed() {
        let demux = Demux::new();
        let (seen, callback) = counter();

        let sub = demux.subscribe_each(|v| v["method"] == json!("progress"), callback);

        demux.dispatch(json!({"method": "progress", "params": {"id": 1}}));
        demux.dispatch(json!({"method": "progress", "params": {"id": 1}}));
        assert_eq!(lock(&seen).len(), 2);

        sub.dispose();
        demux.dispatch(json!({"method": "progress", "params": {"id": 1}}));
        assert_eq!(lock(&seen).len(), 2);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let demux = Demux::new();
        let (seen, callback) = counter();

        let sub = demux.subscribe_each(|_| true, callback);
        sub.dispose();
        sub.dispose();

        demux.dispatch(json!({}));
        assert!(lock(&seen).is_empty());
    }

    #[test]
    fn test_complete_notifies_waiting_first_match() {
        let demux = Demux::new();
        let ended = Arc::new(Mutex::new(false));
        let flag = ended.clone();

        demux.subscribe_first_match(
            |_| false,
            move |m| {
                if let FirstMatch::StreamEnd = m {
                    *lock(&flag) = true;
                }
            },
        );

        demux.complete();
        assert!(*lock(&ended));
    }

    #[test]
    fn test_subscribe_after_complete_ends_immediately() {
        let demux = Demux::new();
        demux.complete();

        let ended = Arc::new(Mutex::new(false));
        let flag = ended.clone();
        demux.subscribe_first_match(
            |_| true,
            move |m| *lock(&flag) = matches!(m, FirstMatch::StreamEnd),
        );
        assert!(*lock(&ended));

        let (seen, callback) = counter();
        demux.subscribe_each(|_| true, callback);
        demux.dispatch(json!({}));
        assert!(lock(&seen).is_empty());
    }

    #[test]
    fn test_settlement_can_dispose_from_within_delivery() {
        // A first-match delivery that disposes another subscription must not
        // deadlock against the dispatch path.
        let demux = Demux::new();
        let (seen, callback) = counter();
        let progress = demux.subscribe_each(|v| v["method"] == json!("progress"), callback);

        let progress = Arc::new(progress);
        let progress_ref = progress.clone();
        demux.subscribe_first_match(
            |v| v["id"] == json!(1),
            move |_| progress_ref.dispose(),
        );

        demux.dispatch(json!({"id": 1, "result": 4}));
        demux.dispatch(json!({"method": "progress", "params": {"id": 1}}));
        assert!(lock(&seen).is_empty());
    }

    #[tokio::test]
    async fn test_pump_filters_binary_and_malformed_frames() {
        let demux = Demux::new();
        let (seen, callback) = counter();
        demux.subscribe_each(|_| true, callback);

        let frames = vec![
            Ok(Message::binary(vec![0x01, 0x02])),
            Ok(Message::text("not json")),
            Ok(Message::text(r#"{"id": 1, "result": 4}"#)),
        ];
        demux.clone().pump(futures::stream::iter(frames)).await;

        let seen = lock(&seen);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["id"], 1);
    }

    #[tokio::test]
    async fn test_pump_completes_on_stream_end() {
        let demux = Demux::new();
        let ended = Arc::new(Mutex::new(false));
        let flag = ended.clone();
        demux.subscribe_first_match(
            |_| false,
            move |m| *lock(&flag) = matches!(m, FirstMatch::StreamEnd),
        );

        demux
            .clone()
            .pump(futures::stream::iter(Vec::new()))
            .await;
        assert!(*lock(&ended));
    }

    #[tokio::test]
    async fn test_pump_stops_on_transport_error() {
        let demux = Demux::new();
        let (seen, callback) = counter();
        demux.subscribe_each(|_| true, callback);

        let frames: Vec<std::result::Result<Message, WsError>> = vec![
            Ok(Message::text(r#"{"id": 1}"#)),
            Err(WsError::ConnectionClosed),
            Ok(Message::text(r#"{"id": 2}"#)),
        ];
        demux.clone().pump(futures::stream::iter(frames)).await;

        assert_eq!(lock(&seen).len(), 1);
    }
}
