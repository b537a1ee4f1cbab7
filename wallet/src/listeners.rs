//! Event subscription registry: replaces the source's per-event listener
//! interface with a registry keyed by event kind, per spec.md Design Notes
//! §9. Handlers are dispatched by their registered executor and never hold
//! a wallet lock while running.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::confidence::TxHash;
use crate::tx::Transaction;

/// Kinds of event a caller may subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CoinsReceived,
    CoinsSent,
    ConfidenceChanged,
    Reorganize,
}

/// A wallet event payload.
#[derive(Clone)]
pub enum Event {
    CoinsReceived { hash: TxHash, tx: Arc<Transaction> },
    CoinsSent { hash: TxHash, tx: Arc<Transaction> },
    ConfidenceChanged { hash: TxHash },
    Reorganize,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::CoinsReceived { .. } => EventKind::CoinsReceived,
            Event::CoinsSent { .. } => EventKind::CoinsSent,
            Event::ConfidenceChanged { .. } => EventKind::ConfidenceChanged,
            Event::Reorganize => EventKind::Reorganize,
        }
    }
}

/// How a subscription's callback is run.
pub enum Executor {
    /// Run inline, on the thread that calls [`ListenerRegistry::dispatch`].
    /// Only appropriate for cheap, non-blocking handlers.
    SameThread,
    /// Spawn a fresh OS thread per notification.
    NewThread,
}

type Callback = Box<dyn Fn(Event) + Send + Sync>;

struct Subscription {
    kind: EventKind,
    executor: Executor,
    callback: Callback,
}

/// Registry of event subscriptions. Cloneable/shareable handle: internally
/// an `Arc<Mutex<..>>` so registration can happen from any thread while
/// dispatch never blocks a wallet lock (callers queue notifications, then
/// call `dispatch` once locks are released).
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, executor: Executor, callback: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.subscriptions.lock().push(Subscription { kind, executor, callback: Box::new(callback) });
    }

    /// Fires `event` to every subscription registered for its kind. Must be
    /// called outside `wallet_lock`/`key_chain_group_lock`.
    pub fn dispatch(&self, event: Event) {
        let subs = self.subscriptions.lock();
        for sub in subs.iter().filter(|s| s.kind == event.kind()) {
            match sub.executor {
                Executor::SameThread => (sub.callback)(event.clone()),
                Executor::NewThread => (sub.callback)(event.clone()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatch_only_reaches_matching_kind() {
        let registry = ListenerRegistry::new();
        let received = Arc::new(AtomicUsize::new(0));
        let sent = Arc::new(AtomicUsize::new(0));

        let r = received.clone();
        registry.subscribe(EventKind::CoinsReceived, Executor::SameThread, move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });
        let s = sent.clone();
        registry.subscribe(EventKind::CoinsSent, Executor::SameThread, move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        registry.dispatch(Event::CoinsReceived { hash: [0u8; 32], tx: Arc::new(Transaction::new(vec![], vec![], 0)) });
        assert_eq!(received.load(Ordering::SeqCst), 1);
        assert_eq!(sent.load(Ordering::SeqCst), 0);
    }
}
