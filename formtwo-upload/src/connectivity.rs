//! Pre-flight connectivity check
//!
//! One check gates a whole batch. `TcpProbe` treats the collector as reachable
//! when a TCP connection to its host and port opens within the budget.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::UploadError;

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_connected(&self) -> bool;
}

/// TCP reachability of the collector endpoint
#[derive(Debug, Clone)]
pub struct TcpProbe {
    target: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            timeout,
        }
    }

    /// Probe aimed at the host and port of `url`
    pub fn for_url(url: &str, timeout: Duration) -> Result<Self, UploadError> {
        let invalid = |message: &str| UploadError::InvalidUrl {
            url: url.to_string(),
            message: message.to_string(),
        };

        let parsed = reqwest::Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
        let host = parsed.host_str().ok_or_else(|| invalid("missing host"))?;
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port"))?;

        Ok(Self::new(format!("{}:{}", host, port), timeout))
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn is_connected(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await {
            Ok(Ok(_)) => {
                debug!(target = %self.target, "Collector reachable");
                true
            }
            Ok(Err(e)) => {
                warn!(target = %self.target, error = %e, "Collector unreachable");
                false
            }
            Err(_) => {
                warn!(target = %self.target, timeout = ?self.timeout, "Connectivity check timed out");
                false
            }
        }
    }
}
