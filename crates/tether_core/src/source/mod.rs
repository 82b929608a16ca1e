//! # Sources
//!
//! A source encapsulates one retrieval/storage technology (memory, disk,
//! network) behind a uniform async contract.
//!
//! The contract is split in two:
//!
//! - [`DataSource`] is the extension point a medium implements: `do_get`,
//!   `do_store`, `source_type`, plus optional synchronous peeking, clearing and
//!   a cancellation hook.
//! - [`Source`] wraps one `DataSource` with a [`RefreshStrategy`] and the busy
//!   flag. It is the only thing callers talk to, and it guarantees at most one
//!   retrieval in flight per instance.
//!
//! ```ignore
//! let source = Source::new(MemorySource::<String>::new())
//!     .with_refresh_strategy(Arc::new(OneShotRefresh::new()));
//!
//! if let Some(handle) = source.get(SourceParams::default()) {
//!     match handle.await {
//!         Some(Ok(response)) => println!("{:?} from {}", response.value, response.source_type),
//!         Some(Err(error)) => eprintln!("{error}"),
//!         None => {} // cancelled
//!     }
//! }
//! ```
//!
//! `get` returning `None` is not an error: the request was dropped because
//! the source was busy or its strategy declined. Callers that need to know
//! what is going on observe controller state instead.

mod chain;
mod file;
mod func;
#[cfg(feature = "http")]
mod http;
mod memory;


use std::fmt::{self, Debug};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::error::SourceError;
use crate::strategy::{AlwaysRefresh, RefreshStrategy, Refreshable};
use crate::types::{Payload, Response, SourceParams, SourceType};

pub use chain::ChainedSource;
pub use file::FileSource;
pub use func::FnSource;
#[cfg(feature = "http")]
pub use http::HttpSource;
pub use memory::MemorySource;

/// Outcome of one retrieval.
pub type FetchResult<T> = std::result::Result<Response<T>, SourceError>;

/// Extension points for a retrieval/storage medium.
///
/// Anything I/O bound belongs in the async methods; `stored_data` is called
/// synchronously on the caller's thread and should only answer from memory.
#[async_trait]
pub trait DataSource<T>: Send + Sync + Debug
where
    T: Payload,
{
    /// Where values from this source come from.
    fn source_type(&self) -> SourceType;

    /// Perform the actual retrieval. Report "nothing stored" as
    /// [`SourceError::NotFound`].
    async fn do_get(&self, params: SourceParams) -> Result<Response<T>, SourceError>;

    /// Persist a response produced elsewhere.
    async fn do_store(&self, response: Response<T>) -> Result<(), SourceError>;

    /// Cheap synchronous peek at cached state.
    fn stored_data(&self, _params: &SourceParams) -> Option<T> {
        None
    }

    /// Erase cached state. Deletes rows, clears memory, or removes files.
    async fn clear_stored_data(&self, _params: &SourceParams) -> Result<(), SourceError> {
        Ok(())
    }

    /// Called when an in-flight retrieval is cancelled, after the busy flag
    /// has been released. Not called when nothing was in flight. Must not
    /// block.
    fn on_cancel(&self) {}

    /// Read-only mediums never receive `do_store`; [`Source::store`] reports
    /// `false` for them.
    fn is_read_only(&self) -> bool {
        false
    }
}

#[derive(Debug)]
struct Flight {
    id: u64,
    token: CancellationToken,
}

type FlightSlot = Arc<Mutex<Option<Flight>>>;

/// Single-flight wrapper around a [`DataSource`].
pub struct Source<T: Payload> {
    inner: Arc<dyn DataSource<T>>,
    refresh_strategy: Arc<dyn RefreshStrategy>,
    flight: FlightSlot,
    next_flight: AtomicU64,
}

impl<T: Payload> fmt::Debug for Source<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("inner", &self.inner)
            .field("refresh_strategy", &self.refresh_strategy)
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl<T: Payload> Source<T> {
    pub fn new(inner: impl DataSource<T> + 'static) -> Self {
        Self::from_arc(Arc::new(inner))
    }

    pub fn from_arc(inner: Arc<dyn DataSource<T>>) -> Self {
        Self {
            inner,
            refresh_strategy: Arc::new(AlwaysRefresh),
            flight: Arc::new(Mutex::new(None)),
            next_flight: AtomicU64::new(0),
        }
    }

    pub fn with_refresh_strategy(mut self, strategy: Arc<dyn RefreshStrategy>) -> Self {
        self.refresh_strategy = strategy;
        self
    }

    pub fn refresh_strategy(&self) -> &Arc<dyn RefreshStrategy> {
        &self.refresh_strategy
    }

    pub fn data_source(&self) -> &Arc<dyn DataSource<T>> {
        &self.inner
    }

    pub fn source_type(&self) -> SourceType {
        self.inner.source_type()
    }

    /// True while a retrieval is in flight.
    pub fn is_busy(&self) -> bool {
        self.flight.lock().is_some()
    }

    /// Start a retrieval unless the source is busy or its strategy declines.
    ///
    /// The retrieval runs on a spawned Tokio task. The returned handle
    /// resolves to the result exactly once, or to `None` if the retrieval was
    /// cancelled. Dropping the handle does not cancel the retrieval.
    pub fn get(&self, params: SourceParams) -> Option<FetchHandle<T>> {
        self.get_with(params, |_| {})
    }

    /// Like [`get`](Self::get), but runs `on_complete` on the completing task
    /// before the busy flag clears, so a `get` issued after completion never
    /// races the completion's side effects. The handle resolves after the
    /// flag clears.
    ///
    /// `on_complete` receives `None` when the flight ends without a result to
    /// deliver (cancelled through the source or the handle). A panic in
    /// `do_get` is delivered as a [`SourceError::Other`] failure.
    pub fn get_with<F>(&self, params: SourceParams, on_complete: F) -> Option<FetchHandle<T>>
    where
        F: FnOnce(Option<&FetchResult<T>>) + Send + 'static,
    {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(source_type = %self.source_type(), "cannot start retrieval outside a Tokio runtime: {e}");
                return None;
            }
        };

        let (id, token) = {
            let mut flight = self.flight.lock();
            if flight.is_some() {
                trace!(source_type = %self.source_type(), "source busy, dropping request");
                return None;
            }
            if !self.refresh_strategy.should_refresh(self) {
                trace!(source_type = %self.source_type(), "refresh declined");
                return None;
            }
            let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
            let token = CancellationToken::new();
            *flight = Some(Flight {
                id,
                token: token.clone(),
            });
            (id, token)
        };

        debug!(source_type = %self.source_type(), flight = id, "starting retrieval");

        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let guard = FlightGuard {
            slot: Arc::clone(&self.flight),
            id,
            tx: Some(tx),
        };
        let task_token = token.clone();

        runtime.spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = task_token.cancelled() => None,
                result = AssertUnwindSafe(inner.do_get(params)).catch_unwind() => {
                    Some(result.unwrap_or_else(|panic| {
                        error!(flight = id, "retrieval panicked");
                        Err(SourceError::from_panic(&*panic))
                    }))
                }
            };

            let Some(result) = outcome else {
                trace!(flight = id, "retrieval cancelled before completion");
                on_complete(None);
                return;
            };

            if !guard.is_current() {
                debug!(flight = id, "suppressing late completion of cancelled retrieval");
                on_complete(None);
                return;
            }

            if let Err(e) = &result {
                debug!(flight = id, error = %e, "retrieval failed");
            }
            on_complete(Some(&result));
            guard.deliver(result);
        });

        Some(FetchHandle {
            rx,
            token,
            flight: id,
        })
    }

    /// Store a response, unless it came from this same kind of source or the
    /// medium is read-only.
    ///
    /// Returns whether `do_store` was invoked.
    pub async fn store(&self, response: Response<T>) -> Result<bool, SourceError> {
        if response.source_type == self.source_type() {
            trace!(source_type = %self.source_type(), "skipping store of self-produced response");
            return Ok(false);
        }
        if self.inner.is_read_only() {
            trace!(source_type = %self.source_type(), "read-only source, not storing");
            return Ok(false);
        }
        self.inner.do_store(response).await?;
        Ok(true)
    }

    pub fn stored_data(&self, params: &SourceParams) -> Option<T> {
        self.inner.stored_data(params)
    }

    pub async fn clear_stored_data(&self, params: &SourceParams) -> Result<(), SourceError> {
        self.inner.clear_stored_data(params).await
    }

    /// Cancel the in-flight retrieval, if any.
    ///
    /// The busy flag is released immediately, even if the underlying work is
    /// still draining; whatever it eventually produces is discarded.
    pub fn cancel(&self) {
        let taken = self.flight.lock().take();
        self.abort(taken);
    }

    /// Cancel flight `id` only if it is still the one in flight.
    fn cancel_flight(&self, id: u64) {
        let taken = {
            let mut flight = self.flight.lock();
            if flight.as_ref().is_some_and(|f| f.id == id) {
                flight.take()
            } else {
                None
            }
        };
        self.abort(taken);
    }

    fn abort(&self, taken: Option<Flight>) {
        let Some(flight) = taken else {
            trace!(source_type = %self.source_type(), "nothing in flight to cancel");
            return;
        };
        debug!(source_type = %self.source_type(), flight = flight.id, "cancelling retrieval");
        flight.token.cancel();
        self.inner.on_cancel();
    }
}

impl<T: Payload> Refreshable for Source<T> {
    fn has_stored_data(&self) -> bool {
        self.stored_data(&SourceParams::default()).is_some()
    }

    fn subject_name(&self) -> &str {
        self.source_type().as_str()
    }
}

fn is_current(slot: &FlightSlot, id: u64) -> bool {
    slot.lock()
        .as_ref()
        .is_some_and(|flight| flight.id == id && !flight.token.is_cancelled())
}

fn release(slot: &FlightSlot, id: u64) {
    let mut flight = slot.lock();
    if flight.as_ref().is_some_and(|f| f.id == id) {
        *flight = None;
    }
}

/// Held by the retrieval task for one flight. Dropping it frees the slot,
/// unwinding included.
struct FlightGuard<T> {
    slot: FlightSlot,
    id: u64,
    tx: Option<oneshot::Sender<FetchResult<T>>>,
}

impl<T> FlightGuard<T> {
    fn is_current(&self) -> bool {
        is_current(&self.slot, self.id)
    }

    /// Free the slot and hand the result to the handle, unless the flight
    /// was cancelled since the last check. Both happen under the slot lock,
    /// so a concurrent cancel either suppresses delivery or finds nothing in
    /// flight.
    fn deliver(mut self, result: FetchResult<T>) {
        let tx = self.tx.take();
        let mut flight = self.slot.lock();
        let current = flight
            .as_ref()
            .is_some_and(|f| f.id == self.id && !f.token.is_cancelled());
        if !current {
            debug!(flight = self.id, "cancelled during completion, dropping result");
            return;
        }
        *flight = None;
        if let Some(tx) = tx {
            let _ = tx.send(result);
        }
    }
}

impl<T> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        release(&self.slot, self.id);
    }
}

/// Awaitable result of one retrieval.
///
/// Resolves to `Some(result)` once the retrieval completes, or `None` if it
/// was cancelled first.
#[derive(Debug)]
pub struct FetchHandle<T> {
    rx: oneshot::Receiver<FetchResult<T>>,
    token: CancellationToken,
    flight: u64,
}

impl<T> FetchHandle<T> {
    /// Cancel this retrieval. Pending delivery is suppressed.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl<T> Future for FetchHandle<T> {
    type Output = Option<FetchResult<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(Result::ok)
    }
}
