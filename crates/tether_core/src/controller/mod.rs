//! # Data controllers
//!
//! A [`DataController`] represents one resource. It ties together a lazily
//! created [`Source`], a [`DataStore`] holding the last known value, an
//! optional [`RefreshStrategy`] and a [`CallbackGroup`] of observers, and it
//! owns the canonical [`State`] of the resource.
//!
//! ```text
//! None --request (allowed, not loading)--> Loading
//! Loading --value--> Success | Empty
//! Loading --error--> Failure
//! any --cancel / close--> None
//! ```
//!
//! Requests never fail synchronously. A request that is declined (already
//! loading, strategy said no, source busy) is a silent no-op; everything else
//! is reported through the callbacks.
//!
//! ```ignore
//! let controller = DataController::builder("profile")
//!     .source_factory(|| Source::new(FileSource::new("profile.json")))
//!     .empty_when(|p: &Profile| p.handle.is_empty())
//!     .build()?;
//!
//! controller.register_for_callbacks(listener);
//! let cached = controller.request_data();
//! ```

mod state;

#[cfg(test)]
mod tests;

pub use state::State;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, error, trace};

use crate::callback::{BroadcastCallback, CallbackGroup, ControllerEvent, DataControllerCallback};
use crate::config::ControllerConfig;
use crate::error::{ConfigError, CoreError, SourceError};
use crate::source::{FetchHandle, FetchResult, Source};
use crate::store::{DataStore, MemoryDataStore};
use crate::strategy::{RefreshStrategy, Refreshable};
use crate::types::{Payload, SourceParams};

type SourceFactory<T> = dyn Fn() -> Source<T> + Send + Sync;
type EmptyPredicate<T> = dyn Fn(&T) -> bool + Send + Sync;

/// State machine for one resource. Cheap to clone; clones share everything.
pub struct DataController<T: Payload> {
    inner: Arc<ControllerInner<T>>,
}

struct ControllerInner<T: Payload> {
    name: String,
    state: Mutex<State>,
    /// Bumped on cancel/close; completions carrying an older epoch are stale.
    epoch: AtomicU64,
    store: RwLock<Arc<dyn DataStore<T>>>,
    refresh_strategy: RwLock<Option<Arc<dyn RefreshStrategy>>>,
    params: RwLock<SourceParams>,
    callbacks: CallbackGroup<T>,
    source: Mutex<Option<Arc<Source<T>>>>,
    source_factory: Box<SourceFactory<T>>,
    is_empty: Box<EmptyPredicate<T>>,
}

impl<T: Payload> Clone for DataController<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Payload> fmt::Debug for DataController<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataController")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("callbacks", &self.inner.callbacks)
            .field("has_source", &self.inner.source.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Payload> DataController<T> {
    pub fn builder(name: impl Into<String>) -> DataControllerBuilder<T> {
        DataControllerBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> State {
        *self.inner.state.lock()
    }

    /// Return the stored value right away and kick off a refresh.
    ///
    /// Stale-while-revalidate: the caller renders what is cached while the
    /// fresh value arrives through the callbacks.
    pub fn request_data(&self) -> Option<T> {
        let stored = self.stored_data();
        self.request_data_async();
        stored
    }

    /// Start a fetch unless one is already loading or the refresh strategy
    /// declines.
    ///
    /// On success the controller moves to [`State::Loading`] and notifies
    /// `on_start_loading` before the fetch begins. If the source itself then
    /// declines, the previous state is restored.
    pub fn request_data_async(&self) -> Option<FetchHandle<T>> {
        let previous = {
            let mut state = self.inner.state.lock();
            if *state == State::Loading {
                trace!(controller = %self.inner.name, "already loading, dropping request");
                return None;
            }
            let strategy = self.inner.refresh_strategy.read().clone();
            if let Some(strategy) = strategy {
                if !strategy.should_refresh(self.inner.as_ref()) {
                    trace!(controller = %self.inner.name, "refresh declined");
                    return None;
                }
            }
            let previous = *state;
            *state = State::Loading;
            previous
        };

        debug!(controller = %self.inner.name, from = %previous, "loading");
        self.inner.callbacks.on_start_loading();

        let handle = self.fetch();
        if handle.is_none() {
            self.inner.restore(previous);
        }
        handle
    }

    /// Fetch regardless of controller state or refresh strategy.
    ///
    /// The source's busy flag still applies. A controller that was not
    /// loading moves to [`State::Loading`] first so the completion has a
    /// valid transition to land on.
    pub fn request_data_force(&self) -> Option<FetchHandle<T>> {
        let previous = {
            let mut state = self.inner.state.lock();
            let previous = *state;
            *state = State::Loading;
            previous
        };

        if previous != State::Loading {
            debug!(controller = %self.inner.name, from = %previous, "forced loading");
            self.inner.callbacks.on_start_loading();
        }

        let handle = self.fetch();
        if handle.is_none() && previous != State::Loading {
            self.inner.restore(previous);
        }
        handle
    }

    /// Cancel whatever is in flight, reset to [`State::None`] and request again.
    pub fn request_data_cancel(&self) -> Option<T> {
        self.cancel();
        self.request_data()
    }

    /// Cancel the in-flight fetch, if any, and reset to [`State::None`].
    ///
    /// A fetch that completes after this point is discarded.
    pub fn cancel(&self) {
        {
            let mut state = self.inner.state.lock();
            self.inner.epoch.fetch_add(1, Ordering::AcqRel);
            if *state != State::None {
                debug!(controller = %self.inner.name, from = state.as_str(), "cancelled");
            }
            *state = State::None;
        }

        let source = self.inner.source.lock().clone();
        if let Some(source) = source {
            source.cancel();
        }
    }

    /// Cancel, reset, drop the stored value and tell observers.
    pub fn close(&self) {
        self.cancel();
        self.clear_stored_data();
        debug!(controller = %self.inner.name, "closed");
        self.inner.callbacks.on_closed();
    }

    /// [`close`](Self::close), but only once nobody is listening.
    pub fn close_if_necessary(&self) -> bool {
        if !self.inner.callbacks.is_empty() {
            trace!(
                controller = %self.inner.name,
                listeners = self.inner.callbacks.len(),
                "still observed, not closing"
            );
            return false;
        }
        self.close();
        true
    }

    /// Drop the cached source. The next fetch builds a new one through the
    /// factory. A fetch already running on the old source still lands, unless
    /// a newer fetch has started by then.
    pub fn destroy_data_fetcher(&self) {
        if self.inner.source.lock().take().is_some() {
            debug!(controller = %self.inner.name, "dropped data source");
        }
    }

    /// The current source, created through the factory if needed.
    pub fn data_source(&self) -> Arc<Source<T>> {
        self.inner.source()
    }

    pub fn stored_data(&self) -> Option<T> {
        self.inner.store.read().get()
    }

    /// Stored and not empty.
    pub fn has_stored_data(&self) -> bool {
        self.inner.has_stored_data()
    }

    pub fn clear_stored_data(&self) {
        self.inner.store.read().clear();
    }

    pub fn set_data_store(&self, store: Arc<dyn DataStore<T>>) {
        *self.inner.store.write() = store;
    }

    /// `None` removes the strategy so every request is allowed.
    pub fn set_refresh_strategy(&self, strategy: Option<Arc<dyn RefreshStrategy>>) {
        *self.inner.refresh_strategy.write() = strategy;
    }

    pub fn refresh_strategy(&self) -> Option<Arc<dyn RefreshStrategy>> {
        self.inner.refresh_strategy.read().clone()
    }

    /// Parameters passed to the source on every subsequent fetch.
    pub fn set_source_params(&self, params: SourceParams) {
        *self.inner.params.write() = params;
    }

    pub fn source_params(&self) -> SourceParams {
        self.inner.params.read().clone()
    }

    pub fn register_for_callbacks(&self, callback: Arc<dyn DataControllerCallback<T>>) -> bool {
        self.inner.callbacks.register(callback)
    }

    pub fn deregister_for_callbacks(&self, callback: &Arc<dyn DataControllerCallback<T>>) -> bool {
        self.inner.callbacks.deregister(callback)
    }

    /// Register a channel-backed listener.
    ///
    /// The returned listener stays registered until passed to
    /// [`deregister_for_callbacks`](Self::deregister_for_callbacks).
    pub fn subscribe(
        &self,
        capacity: usize,
    ) -> (
        Arc<dyn DataControllerCallback<T>>,
        broadcast::Receiver<ControllerEvent<T>>,
    ) {
        let (callback, rx) = BroadcastCallback::new(capacity);
        let callback: Arc<dyn DataControllerCallback<T>> = callback;
        self.inner.callbacks.register(callback.clone());
        (callback, rx)
    }

    /// Start a fetch on the current source.
    ///
    /// A started fetch takes a fresh epoch, so a fetch still running on a
    /// source dropped by [`destroy_data_fetcher`](Self::destroy_data_fetcher)
    /// can no longer land over it. The state lock is held while starting so
    /// no completion can observe the epoch before it is published.
    fn fetch(&self) -> Option<FetchHandle<T>> {
        let source = self.inner.source();
        let params = self.inner.params.read().clone();
        let inner: Weak<ControllerInner<T>> = Arc::downgrade(&self.inner);

        let _state = self.inner.state.lock();
        let epoch = self.inner.epoch.load(Ordering::Acquire) + 1;
        let handle = source.get_with(params, move |outcome| {
            if let Some(inner) = inner.upgrade() {
                inner.finish(epoch, outcome);
            }
        });
        if handle.is_some() {
            self.inner.epoch.store(epoch, Ordering::Release);
        }
        handle
    }
}

impl<T: Payload> Refreshable for DataController<T> {
    fn has_stored_data(&self) -> bool {
        self.inner.has_stored_data()
    }

    fn subject_name(&self) -> &str {
        &self.inner.name
    }
}

impl<T: Payload> Refreshable for ControllerInner<T> {
    fn has_stored_data(&self) -> bool {
        self.store
            .read()
            .get()
            .is_some_and(|value| !(self.is_empty)(&value))
    }

    fn subject_name(&self) -> &str {
        &self.name
    }
}

impl<T: Payload> ControllerInner<T> {
    fn source(&self) -> Arc<Source<T>> {
        let mut slot = self.source.lock();
        if let Some(source) = slot.as_ref() {
            return Arc::clone(source);
        }
        trace!(controller = %self.name, "creating data source");
        let source = Arc::new((self.source_factory)());
        *slot = Some(Arc::clone(&source));
        source
    }

    /// Undo a move to `Loading` whose fetch never started.
    fn restore(&self, previous: State) {
        let mut state = self.state.lock();
        if *state == State::Loading {
            trace!(controller = %self.name, to = %previous, "source declined, restoring state");
            *state = previous;
        }
    }

    /// Completion hook for one fetch. A panic while applying the result is
    /// reported to observers as a failure.
    fn finish(&self, epoch: u64, outcome: Option<&FetchResult<T>>) {
        let Some(result) = outcome else {
            self.abandon(epoch);
            return;
        };
        let applied = panic::catch_unwind(AssertUnwindSafe(|| self.complete(epoch, result)));
        if let Err(payload) = applied {
            error!(controller = %self.name, "applying fetch result panicked");
            self.complete(epoch, &Err(SourceError::from_panic(&*payload)));
        }
    }

    /// The current fetch ended without a result, e.g. its handle was
    /// cancelled. Leave `Loading` so the next request is not gated.
    fn abandon(&self, epoch: u64) {
        let mut state = self.state.lock();
        if self.epoch.load(Ordering::Acquire) != epoch || *state != State::Loading {
            return;
        }
        debug!(controller = %self.name, "fetch cancelled, resetting");
        *state = State::None;
    }

    fn complete(&self, epoch: u64, result: &FetchResult<T>) {
        let next = match result {
            Ok(response) if (self.is_empty)(&response.value) => State::Empty,
            Ok(_) => State::Success,
            Err(_) => State::Failure,
        };

        {
            let mut state = self.state.lock();
            if self.epoch.load(Ordering::Acquire) != epoch {
                debug!(controller = %self.name, "ignoring completion of superseded fetch");
                return;
            }
            if !state.can_transition_to(next) {
                debug!(controller = %self.name, from = state.as_str(), to = %next, "ignoring disallowed transition");
                return;
            }
            // Store first: if it panics the state is still Loading
            if let Ok(response) = result {
                self.store.read().store(response.value.clone());
            }
            *state = next;
        }

        debug!(controller = %self.name, state = %next, "fetch completed");
        match result {
            Ok(_) if next == State::Empty => self.callbacks.on_empty(),
            Ok(response) => self
                .callbacks
                .on_success(&response.value, response.origin.as_deref()),
            Err(error) => self.callbacks.on_failure(error),
        }
    }
}

/// Builder for [`DataController`]. Only the source factory is required.
pub struct DataControllerBuilder<T: Payload> {
    name: String,
    source_factory: Option<Box<SourceFactory<T>>>,
    is_empty: Option<Box<EmptyPredicate<T>>>,
    store: Option<Arc<dyn DataStore<T>>>,
    refresh_strategy: Option<Arc<dyn RefreshStrategy>>,
    params: SourceParams,
}

impl<T: Payload> DataControllerBuilder<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_factory: None,
            is_empty: None,
            store: None,
            refresh_strategy: None,
            params: SourceParams::default(),
        }
    }

    /// How to build the source. Called lazily, and again after
    /// [`DataController::destroy_data_fetcher`].
    pub fn source_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Source<T> + Send + Sync + 'static,
    {
        self.source_factory = Some(Box::new(factory));
        self
    }

    /// Classify fetched values as empty. Defaults to "never empty".
    pub fn empty_when<F>(mut self, is_empty: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.is_empty = Some(Box::new(is_empty));
        self
    }

    /// Defaults to a fresh [`MemoryDataStore`].
    pub fn store(mut self, store: Arc<dyn DataStore<T>>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn refresh_strategy(mut self, strategy: Arc<dyn RefreshStrategy>) -> Self {
        self.refresh_strategy = Some(strategy);
        self
    }

    pub fn params(mut self, params: SourceParams) -> Self {
        self.params = params;
        self
    }

    /// Take name, refresh strategy and params from a loaded config.
    pub fn with_config(mut self, config: &ControllerConfig) -> Self {
        self.name = config.name.clone();
        self.refresh_strategy = Some(config.refresh.build());
        self.params = config.params.clone();
        self
    }

    pub fn build(self) -> crate::Result<DataController<T>> {
        let source_factory = self
            .source_factory
            .ok_or_else(|| CoreError::ControllerConfig {
                name: self.name.clone(),
                cause: ConfigError::MissingField("source_factory".to_string()),
            })?;

        let is_empty: Box<EmptyPredicate<T>> =
            self.is_empty.unwrap_or_else(|| Box::new(|_: &T| false));
        let store: Arc<dyn DataStore<T>> = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryDataStore::new()));

        debug!(controller = %self.name, "built data controller");
        Ok(DataController {
            inner: Arc::new(ControllerInner {
                name: self.name,
                state: Mutex::new(State::None),
                epoch: AtomicU64::new(0),
                store: RwLock::new(store),
                refresh_strategy: RwLock::new(self.refresh_strategy),
                params: RwLock::new(self.params),
                callbacks: CallbackGroup::new(),
                source: Mutex::new(None),
                source_factory,
                is_empty,
            }),
        })
    }
}
