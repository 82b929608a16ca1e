#![cfg(test)]

pub mod items {
    use serde::{Deserialize, Serialize};

    /// Small resource used across controller and source tests.
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct DataItem {
        pub id: String,
        pub data: Option<String>,
    }

    impl DataItem {
        pub fn new(id: impl Into<String>, data: impl Into<String>) -> Self {
            Self {
                id: id.into(),
                data: Some(data.into()),
            }
        }

        /// An item without payload, which controllers in tests treat as empty.
        pub fn blank(id: impl Into<String>) -> Self {
            Self {
                id: id.into(),
                data: None,
            }
        }

        pub fn has_no_payload(&self) -> bool {
            self.data.is_none()
        }
    }
}

pub mod sources {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::Semaphore;

    use crate::error::SourceError;
    use crate::source::{DataSource, FetchResult};
    use crate::types::{Payload, Response, SourceParams, SourceType};

    struct GateState<T> {
        source_type: SourceType,
        gate: Semaphore,
        result: Mutex<FetchResult<T>>,
        stored: Mutex<Option<T>>,
        calls: AtomicUsize,
        stores: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    /// Test source whose retrievals park until the test releases them.
    ///
    /// Counts retrievals, concurrent retrievals and stores so tests can check
    /// single-flight and write suppression.
    pub struct GatedSource<T> {
        state: Arc<GateState<T>>,
    }

    impl<T> Clone for GatedSource<T> {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
            }
        }
    }

    impl<T> std::fmt::Debug for GatedSource<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("GatedSource")
                .field("source_type", &self.state.source_type)
                .field("calls", &self.state.calls.load(Ordering::SeqCst))
                .finish()
        }
    }

    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl<T: Payload> GatedSource<T> {
        /// Retrievals block until [`release`](Self::release) is called.
        pub fn closed(source_type: SourceType, result: FetchResult<T>) -> Self {
            Self::with_permits(source_type, result, 0)
        }

        /// Retrievals complete immediately.
        pub fn open(source_type: SourceType, result: FetchResult<T>) -> Self {
            Self::with_permits(source_type, result, Semaphore::MAX_PERMITS)
        }

        pub fn ok(source_type: SourceType, value: T) -> Self {
            Self::open(source_type, Ok(Response::new(value, source_type)))
        }

        pub fn failing(source_type: SourceType, error: SourceError) -> Self {
            Self::open(source_type, Err(error))
        }

        fn with_permits(source_type: SourceType, result: FetchResult<T>, permits: usize) -> Self {
            Self {
                state: Arc::new(GateState {
                    source_type,
                    gate: Semaphore::new(permits),
                    result: Mutex::new(result),
                    stored: Mutex::new(None),
                    calls: AtomicUsize::new(0),
                    stores: AtomicUsize::new(0),
                    in_flight: AtomicUsize::new(0),
                    max_in_flight: AtomicUsize::new(0),
                }),
            }
        }

        /// Let `n` parked or future retrievals complete.
        pub fn release(&self, n: usize) {
            self.state.gate.add_permits(n);
        }

        pub fn set_result(&self, result: FetchResult<T>) {
            *self.state.result.lock() = result;
        }

        pub fn calls(&self) -> usize {
            self.state.calls.load(Ordering::SeqCst)
        }

        pub fn stores(&self) -> usize {
            self.state.stores.load(Ordering::SeqCst)
        }

        pub fn in_flight(&self) -> usize {
            self.state.in_flight.load(Ordering::SeqCst)
        }

        pub fn max_in_flight(&self) -> usize {
            self.state.max_in_flight.load(Ordering::SeqCst)
        }

        /// Wait until a retrieval is parked at the gate.
        pub async fn wait_for_in_flight(&self) {
            tokio::time::timeout(Duration::from_secs(5), async {
                while self.in_flight() == 0 {
                    tokio::task::yield_now().await;
                }
            })
            .await
            .expect("retrieval never started");
        }
    }

    #[async_trait]
    impl<T: Payload> DataSource<T> for GatedSource<T> {
        fn source_type(&self) -> SourceType {
            self.state.source_type
        }

        async fn do_get(&self, _params: SourceParams) -> FetchResult<T> {
            self.state.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let _guard = InFlight(&self.state.in_flight);

            let permit = self
                .state
                .gate
                .acquire()
                .await
                .map_err(|e| SourceError::other(e.to_string()))?;
            permit.forget();

            self.state.result.lock().clone()
        }

        async fn do_store(&self, response: Response<T>) -> Result<(), SourceError> {
            self.state.stores.fetch_add(1, Ordering::SeqCst);
            *self.state.stored.lock() = Some(response.value);
            Ok(())
        }

        fn stored_data(&self, _params: &SourceParams) -> Option<T> {
            self.state.stored.lock().clone()
        }

        async fn clear_stored_data(&self, _params: &SourceParams) -> Result<(), SourceError> {
            self.state.stored.lock().take();
            Ok(())
        }
    }
}

pub mod callbacks {
    use parking_lot::Mutex;

    use crate::callback::{ControllerEvent, DataControllerCallback};
    use crate::error::SourceError;

    /// Records every event it receives, in order.
    #[derive(Debug)]
    pub struct RecordingCallback<T> {
        events: Mutex<Vec<ControllerEvent<T>>>,
    }

    impl<T> Default for RecordingCallback<T> {
        fn default() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }
    }

    impl<T: Clone> RecordingCallback<T> {
        fn count(&self, pred: impl Fn(&ControllerEvent<T>) -> bool) -> usize {
            self.events.lock().iter().filter(|e| pred(e)).count()
        }

        pub fn start_loading_count(&self) -> usize {
            self.count(|e| matches!(e, ControllerEvent::StartLoading))
        }

        pub fn success_count(&self) -> usize {
            self.count(|e| matches!(e, ControllerEvent::Success { .. }))
        }

        pub fn empty_count(&self) -> usize {
            self.count(|e| matches!(e, ControllerEvent::Empty))
        }

        pub fn failure_count(&self) -> usize {
            self.count(|e| matches!(e, ControllerEvent::Failure(_)))
        }

        pub fn closed_count(&self) -> usize {
            self.count(|e| matches!(e, ControllerEvent::Closed))
        }

        pub fn last_success(&self) -> Option<(T, Option<String>)> {
            self.events.lock().iter().rev().find_map(|e| match e {
                ControllerEvent::Success { value, origin } => Some((value.clone(), origin.clone())),
                _ => None,
            })
        }
    }

    impl<T: Clone + Send + Sync> DataControllerCallback<T> for RecordingCallback<T> {
        fn on_start_loading(&self) {
            self.events.lock().push(ControllerEvent::StartLoading);
        }

        fn on_success(&self, value: &T, origin: Option<&str>) {
            self.events.lock().push(ControllerEvent::Success {
                value: value.clone(),
                origin: origin.map(str::to_string),
            });
        }

        fn on_empty(&self) {
            self.events.lock().push(ControllerEvent::Empty);
        }

        fn on_failure(&self, error: &SourceError) {
            self.events.lock().push(ControllerEvent::Failure(error.clone()));
        }

        fn on_closed(&self) {
            self.events.lock().push(ControllerEvent::Closed);
        }
    }
}
