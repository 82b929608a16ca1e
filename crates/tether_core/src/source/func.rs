use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;

use super::DataSource;
use crate::error::SourceError;
use crate::types::{Payload, Response, SourceParams, SourceType};

type FetchFn<T> =
    dyn Fn(SourceParams) -> BoxFuture<'static, Result<Response<T>, SourceError>> + Send + Sync;

/// Adapts an async closure into a read-only source.
///
/// This is where hand-written or generated network adapters plug in: the
/// closure performs the request, the wrapping [`Source`](crate::Source)
/// supplies single-flight and cancellation. [`Source::store`](crate::Source::store)
/// refuses writes, so chains never write back into it.
pub struct FnSource<T> {
    source_type: SourceType,
    fetch: Box<FetchFn<T>>,
}

impl<T> fmt::Debug for FnSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSource")
            .field("source_type", &self.source_type)
            .finish_non_exhaustive()
    }
}

impl<T: Payload> FnSource<T> {
    pub fn new<F, Fut>(source_type: SourceType, fetch: F) -> Self
    where
        F: Fn(SourceParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response<T>, SourceError>> + Send + 'static,
    {
        Self {
            source_type,
            fetch: Box::new(move |params| Box::pin(fetch(params))),
        }
    }
}

#[async_trait]
impl<T: Payload> DataSource<T> for FnSource<T> {
    fn source_type(&self) -> SourceType {
        self.source_type
    }

    async fn do_get(&self, params: SourceParams) -> Result<Response<T>, SourceError> {
        (self.fetch)(params).await
    }

    async fn do_store(&self, _response: Response<T>) -> Result<(), SourceError> {
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        true
    }
}
