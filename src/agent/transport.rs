//! delivery of reading envelopes to the hub.

use crate::domain::ReadingEnvelope;
use crate::error::ConnectivityError;

use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait Transport: Send + Sync {
    /// one delivery attempt; non-2xx answers are errors
    async fn send(&self, envelope: &ReadingEnvelope) -> Result<(), ConnectivityError>;
}

/// json POST to `<hub_url>/api/data`
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(hub_url: &str, timeout: Duration) -> Result<Self, ConnectivityError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint: data_endpoint(hub_url) })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, envelope: &ReadingEnvelope) -> Result<(), ConnectivityError> {
        let response = self.client.post(&self.endpoint).json(envelope).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectivityError::Rejected { status: status.as_u16(), body });
        }
        Ok(())
    }
}

fn data_endpoint(hub_url: &str) -> String {
    format!("{}/api/data", hub_url.trim_end_matches('/'))
}
