//! Priority-ordered composition of sources, e.g. memory, then disk, then network.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::{DataSource, Source};
use crate::error::SourceError;
use crate::types::{Payload, Response, SourceParams, SourceType};

/// Queries member sources in priority order and reports the first success.
///
/// - A member that is busy or declines to refresh is skipped, and so is one
///   whose retrieval gets cancelled by another owner.
/// - A miss ([`SourceError::NotFound`]) or failure moves on to the next member.
/// - The winning response is written back into every higher-priority member
///   (each member still refuses writes of its own source type).
/// - Lower-priority members are never consulted once one succeeds, so they
///   cannot overwrite the winner within the same request.
///
/// Wrap a chain in a [`Source`] to give the chain as a whole its own
/// single-flight guarantee. Each member keeps its own busy flag. Cancelling
/// the chain cancels only the member retrieval the chain itself is waiting
/// on, so members shared with other owners keep their own flights.
#[derive(Debug)]
pub struct ChainedSource<T: Payload> {
    sources: Vec<Arc<Source<T>>>,
    /// Member position and flight id currently awaited.
    awaiting: Mutex<Option<(usize, u64)>>,
}

impl<T: Payload> ChainedSource<T> {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            awaiting: Mutex::new(None),
        }
    }

    /// Append a member at the lowest priority so far.
    pub fn then(mut self, source: Source<T>) -> Self {
        self.sources.push(Arc::new(source));
        self
    }

    /// Append a member that is shared with other owners.
    pub fn then_shared(mut self, source: Arc<Source<T>>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn sources(&self) -> &[Arc<Source<T>>] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    async fn write_back(&self, winner: usize, response: &Response<T>) {
        for (position, source) in self.sources[..winner].iter().enumerate() {
            if let Err(e) = source.store(response.clone()).await {
                warn!(position, error = %e, "write-back to higher-priority source failed");
            }
        }
    }
}

impl<T: Payload> Default for ChainedSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Payload> DataSource<T> for ChainedSource<T> {
    /// The lowest-priority member is the authoritative medium.
    fn source_type(&self) -> SourceType {
        self.sources
            .last()
            .map(|s| s.source_type())
            .unwrap_or(SourceType::Memory)
    }

    async fn do_get(&self, params: SourceParams) -> Result<Response<T>, SourceError> {
        let mut attempted = 0;
        let mut last_error = None;

        for (position, source) in self.sources.iter().enumerate() {
            let Some(handle) = source.get(params.clone()) else {
                trace!(position, "chain member declined");
                continue;
            };
            *self.awaiting.lock() = Some((position, handle.flight));
            let outcome = handle.await;
            self.awaiting.lock().take();

            let Some(result) = outcome else {
                trace!(position, "chain member was cancelled, skipping");
                continue;
            };
            attempted += 1;

            match result {
                Ok(response) => {
                    debug!(position, source_type = %response.source_type, "chain member produced a value");
                    self.write_back(position, &response).await;
                    return Ok(response);
                }
                Err(e) => {
                    if e.is_not_found() {
                        trace!(position, "chain member had nothing stored");
                    } else {
                        debug!(position, error = %e, "chain member failed, falling back");
                    }
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(last) => Err(SourceError::Exhausted {
                attempted,
                last: Box::new(last),
            }),
            None => Err(SourceError::NoSourceAvailable),
        }
    }

    async fn do_store(&self, response: Response<T>) -> Result<(), SourceError> {
        let mut first_error = None;
        for source in &self.sources {
            if let Err(e) = source.store(response.clone()).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn stored_data(&self, params: &SourceParams) -> Option<T> {
        self.sources.iter().find_map(|s| s.stored_data(params))
    }

    async fn clear_stored_data(&self, params: &SourceParams) -> Result<(), SourceError> {
        let mut first_error = None;
        for source in &self.sources {
            if let Err(e) = source.clear_stored_data(params).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn on_cancel(&self) {
        let awaiting = self.awaiting.lock().take();
        if let Some((position, flight)) = awaiting {
            trace!(position, flight, "cancelling awaited chain member");
            self.sources[position].cancel_flight(flight);
        }
    }
}
