use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("couldn't send the request: {0}")]
    Request(#[from] reqwest::Error),
    #[error("api responded with status {status} for {url}")]
    Status {
        url: Url,
        status: reqwest::StatusCode,
    },
    #[error("invalid request path: {0}")]
    Url(#[from] url::ParseError),
    #[error("{0:#}")]
    Other(#[from] anyhow::Error),
}

/// Gateway to the REST API. Resolves `path` against the API base url and
/// returns the parsed JSON body.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, path: &str, query: &[(String, String)]) -> Result<Value, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpFetcher {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, path: &str, query: &[(String, String)]) -> Result<Value, FetchError> {
        let url = self.base_url.join(path)?;
        log::debug!(target: "fetcher", "GET {} {:?}", url, query);
        let resp = self.client.get(url.clone()).query(query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status { url, status });
        }
        Ok(resp.json().await?)
    }
}
