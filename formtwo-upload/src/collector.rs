//! Collector client
//!
//! Posts one day file per request to the remote collector. The request body
//! is the file's content exactly as stored on disk.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::error::UploadError;

const USER_AGENT: &str = concat!("formtwo-upload/", env!("CARGO_PKG_VERSION"));

/// Destination for uploaded documents
#[async_trait]
pub trait Collector: Send + Sync {
    /// Submit one document and return the collector's JSON reply
    async fn submit(&self, file_name: &str, body: &str) -> Result<Value, UploadError>;
}

/// HTTP collector client
pub struct HttpCollector {
    http_client: reqwest::Client,
    url: reqwest::Url,
    timeout: Duration,
}

impl HttpCollector {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, UploadError> {
        let url = reqwest::Url::parse(url).map_err(|e| UploadError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| UploadError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            url,
            timeout,
        })
    }

    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }
}

#[async_trait]
impl Collector for HttpCollector {
    async fn submit(&self, file_name: &str, body: &str) -> Result<Value, UploadError> {
        debug!(file = file_name, bytes = body.len(), url = %self.url, "Posting survey document");

        let response = self
            .http_client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_owned())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UploadError::Timeout(self.timeout)
                } else {
                    UploadError::Network(e.to_string())
                }
            })?;

        let status = response.status();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            let details = response.text().await.unwrap_or_default();
            error!(file = file_name, "Server error details for {}: {}", file_name, details);
            return Err(UploadError::ServerError {
                file_name: file_name.to_string(),
                details,
            });
        }

        if !status.is_success() {
            return Err(UploadError::Http {
                status: status.as_u16(),
            });
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| UploadError::InvalidResponse(e.to_string()))?;

        info!(file = file_name, response = %result, "Server response received");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = HttpCollector::new("http://127.0.0.1:8288/api/surveyanswer", Duration::from_secs(30));
        assert!(client.is_ok());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let client = HttpCollector::new("not a url", Duration::from_secs(30));
        assert!(matches!(client, Err(UploadError::InvalidUrl { .. })));
    }
}
