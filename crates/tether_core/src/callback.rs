//! Observer fan-out for controller events.
//!
//! A [`CallbackGroup`] is owned by one controller and multiplexes its events
//! to every registered [`DataControllerCallback`]. Each event is delivered
//! over a snapshot of the listener list taken when the fan-out starts, so
//! listeners may register or deregister (themselves or others) from inside a
//! callback. A listener added mid fan-out sees the next event, not the
//! current one.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::SourceError;

/// Observer protocol for a controller. Every method defaults to a no-op.
pub trait DataControllerCallback<T>: Send + Sync {
    fn on_start_loading(&self) {}

    /// `origin` identifies where the value came from, e.g. the request URL.
    fn on_success(&self, _value: &T, _origin: Option<&str>) {}

    fn on_empty(&self) {}

    fn on_failure(&self, _error: &SourceError) {}

    fn on_closed(&self) {}
}

/// Insertion-ordered set of listeners for one controller.
pub struct CallbackGroup<T> {
    callbacks: RwLock<Vec<Arc<dyn DataControllerCallback<T>>>>,
}

impl<T> fmt::Debug for CallbackGroup<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackGroup")
            .field("listeners", &self.callbacks.read().len())
            .finish()
    }
}

impl<T> Default for CallbackGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn same_listener<T>(
    a: &Arc<dyn DataControllerCallback<T>>,
    b: &Arc<dyn DataControllerCallback<T>>,
) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl<T> CallbackGroup<T> {
    pub fn new() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Register a listener. Returns `false` if it was already registered.
    pub fn register(&self, callback: Arc<dyn DataControllerCallback<T>>) -> bool {
        let mut callbacks = self.callbacks.write();
        if callbacks.iter().any(|c| same_listener(c, &callback)) {
            return false;
        }
        callbacks.push(callback);
        true
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn deregister(&self, callback: &Arc<dyn DataControllerCallback<T>>) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|c| !same_listener(c, callback));
        callbacks.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    pub fn clear(&self) {
        self.callbacks.write().clear();
    }

    pub fn on_start_loading(&self) {
        self.dispatch("start_loading", |c| c.on_start_loading());
    }

    pub fn on_success(&self, value: &T, origin: Option<&str>) {
        self.dispatch("success", |c| c.on_success(value, origin));
    }

    pub fn on_empty(&self) {
        self.dispatch("empty", |c| c.on_empty());
    }

    pub fn on_failure(&self, error: &SourceError) {
        self.dispatch("failure", |c| c.on_failure(error));
    }

    pub fn on_closed(&self) {
        self.dispatch("closed", |c| c.on_closed());
    }

    fn dispatch(&self, event: &'static str, deliver: impl Fn(&dyn DataControllerCallback<T>)) {
        // Snapshot so listeners can mutate the group while we iterate
        let snapshot: Vec<_> = self.callbacks.read().clone();
        for (position, callback) in snapshot.iter().enumerate() {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| deliver(callback.as_ref())));
            if delivered.is_err() {
                warn!(
                    event,
                    position, "listener panicked during fan-out, continuing with the rest"
                );
            }
        }
    }
}

/// Controller event as an owned value, for channel-based observers.
#[derive(Debug, Clone)]
pub enum ControllerEvent<T> {
    StartLoading,
    Success { value: T, origin: Option<String> },
    Empty,
    Failure(SourceError),
    Closed,
}

/// Forwards every controller event onto a tokio broadcast channel.
#[derive(Debug)]
pub struct BroadcastCallback<T> {
    tx: broadcast::Sender<ControllerEvent<T>>,
}

impl<T: Clone + Send + 'static> BroadcastCallback<T> {
    pub fn new(capacity: usize) -> (Arc<Self>, broadcast::Receiver<ControllerEvent<T>>) {
        let (tx, rx) = broadcast::channel(capacity);
        (Arc::new(Self { tx }), rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent<T>> {
        self.tx.subscribe()
    }

    fn send(&self, event: ControllerEvent<T>) {
        // No receivers is fine; the event just has nobody to go to
        let _ = self.tx.send(event);
    }
}

impl<T: Clone + Send + Sync + 'static> DataControllerCallback<T> for BroadcastCallback<T> {
    fn on_start_loading(&self) {
        self.send(ControllerEvent::StartLoading);
    }

    fn on_success(&self, value: &T, origin: Option<&str>) {
        self.send(ControllerEvent::Success {
            value: value.clone(),
            origin: origin.map(str::to_string),
        });
    }

    fn on_empty(&self) {
        self.send(ControllerEvent::Empty);
    }

    fn on_failure(&self, error: &SourceError) {
        self.send(ControllerEvent::Failure(error.clone()));
    }

    fn on_closed(&self) {
        self.send(ControllerEvent::Closed);
    }
}
