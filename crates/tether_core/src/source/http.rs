//! JSON over HTTP GET, behind the `http` feature.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::DataSource;
use crate::error::SourceError;
use crate::types::{Payload, Response, SourceParams, SourceType};

/// Fetches a resource from a URL and decodes the body as JSON.
///
/// A non-default `index` is sent as an `index` query parameter; an object
/// `data` payload is sent as additional query parameters. The request URL is
/// reported as the response origin.
#[derive(Debug)]
pub struct HttpSource<T> {
    client: reqwest::Client,
    url: String,
    _marker: PhantomData<fn() -> T>,
}

/// Client used when none is supplied.
fn default_client() -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .user_agent(concat!("tether/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(10))
        .connect_timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| SourceError::network("", None, e.to_string()))
}

impl<T> HttpSource<T> {
    pub fn new(url: impl Into<String>) -> Result<Self, SourceError> {
        Ok(Self::with_client(default_client()?, url))
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            _marker: PhantomData,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn query_pairs(params: &SourceParams) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    if !params.is_all() {
        pairs.push(("index".to_string(), params.index.to_string()));
    }
    if let Some(serde_json::Value::Object(map)) = &params.data {
        for (key, value) in map {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            pairs.push((key.clone(), value));
        }
    }
    pairs
}

#[async_trait]
impl<T> DataSource<T> for HttpSource<T>
where
    T: Payload + DeserializeOwned,
{
    fn source_type(&self) -> SourceType {
        SourceType::Network
    }

    async fn do_get(&self, params: SourceParams) -> Result<Response<T>, SourceError> {
        let response = self
            .client
            .get(&self.url)
            .query(&query_pairs(&params))
            .send()
            .await
            .map_err(|e| SourceError::network(&self.url, None, e.to_string()))?;

        let status = response.status();
        let url = response.url().to_string();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::network(url, Some(status.as_u16()), body));
        }

        let value = response
            .json::<T>()
            .await
            .map_err(|e| SourceError::network(&url, Some(status.as_u16()), e.to_string()))?;

        debug!(%url, status = status.as_u16(), "fetched resource");
        Ok(Response::new(value, SourceType::Network).with_origin(url))
    }

    async fn do_store(&self, _response: Response<T>) -> Result<(), SourceError> {
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        true
    }
}
