//! HTTP client implementation

use std::time::{Duration, Instant};

use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::errors::OpsError;

/// A response reduced to what health checks and verification look at
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub latency: Duration,
    pub body: String,
}

impl ProbeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body parsed as JSON, if it is JSON
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// HTTP client for the application's endpoints
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, OpsError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// GET `path` and time it. Any status is returned; only transport
    /// failures are errors.
    pub async fn get(&self, path: &str) -> Result<ProbeResponse, OpsError> {
        let url = self.url(path);
        debug!("GET {}", url);
        self.send(self.client.get(&url)).await
    }

    /// POST a JSON body to `path`
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<ProbeResponse, OpsError> {
        let url = self.url(path);
        debug!("POST {}", url);
        self.send(self.client.post(&url).json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<ProbeResponse, OpsError> {
        let url = self.url(path);
        debug!("DELETE {}", url);
        self.send(self.client.delete(&url)).await
    }

    async fn send(&self, request: RequestBuilder) -> Result<ProbeResponse, OpsError> {
        let started = Instant::now();
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        Ok(ProbeResponse {
            status,
            latency: started.elapsed(),
            body,
        })
    }
}
