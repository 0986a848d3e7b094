//! Health probe of the deployed workload

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::OpsError;
use crate::http::client::HttpClient;

/// One readiness check of the workload
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// What is probed, for status lines
    fn target(&self) -> String;

    /// `Ok` when the workload reports ready
    async fn check(&self) -> Result<(), OpsError>;
}

/// GET on the health endpoint; any 2xx is healthy
pub struct HttpHealthProbe {
    client: HttpClient,
}

impl HttpHealthProbe {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, OpsError> {
        Ok(Self {
            client: HttpClient::new(url, timeout)?,
        })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    fn target(&self) -> String {
        self.client.base_url().to_string()
    }

    async fn check(&self) -> Result<(), OpsError> {
        let response = self.client.get("").await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(OpsError::HttpStatus {
                url: self.target(),
                status: response.status,
            })
        }
    }
}
