//! # Reachability Probe Link
//!
//! [`Link`] for hosted deployments where the operating system owns the
//! wireless interface: connectivity means the collector accepts a TCP
//! connection within the timeout.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::Link;
use crate::error::{FieldlinkError, Result};

/// TCP reachability probe against the collector's host and port
#[derive(Debug, Clone)]
pub struct ProbeLink {
    target: String,
    timeout: Duration,
    connected: bool,
}

impl ProbeLink {
    /// Probe `host:port` directly
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            timeout,
            connected: false,
        }
    }

    /// Derive the probe target from a collector URL
    ///
    /// # Errors
    ///
    /// Returns `SendFailure` if the URL has no host or no known port.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use fieldlink::link::ProbeLink;
    /// use std::time::Duration;
    ///
    /// let link = ProbeLink::from_endpoint("https://collector.example/api", Duration::from_secs(5))?;
    /// assert_eq!(link.target(), "collector.example:443");
    /// # Ok::<(), fieldlink::error::FieldlinkError>(())
    /// ```
    pub fn from_endpoint(endpoint: &str, timeout: Duration) -> Result<Self> {
        let url = reqwest::Url::parse(endpoint)
            .map_err(|e| FieldlinkError::SendFailure(format!("bad endpoint '{}': {}", endpoint, e)))?;

        let host = url
            .host_str()
            .ok_or_else(|| FieldlinkError::SendFailure(format!("endpoint '{}' has no host", endpoint)))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| FieldlinkError::SendFailure(format!("endpoint '{}' has no port", endpoint)))?;

        Ok(Self::new(format!("{}:{}", host, port), timeout))
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    async fn probe(&mut self) -> bool {
        let reachable = matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await,
            Ok(Ok(_))
        );
        debug!("Probe {} -> {}", self.target, if reachable { "reachable" } else { "unreachable" });
        self.connected = reachable;
        reachable
    }
}

#[async_trait]
impl Link for ProbeLink {
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn check(&mut self) -> bool {
        self.probe().await
    }

    async fn reconnect(&mut self) {
        self.probe().await;
    }

    fn start_portal(&mut self, name: &str) {
        info!("Provisioning portal '{}' is managed by the host OS, nothing to open", name);
    }

    fn process_portal(&mut self) {}

    fn stop_portal(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_from_endpoint_uses_explicit_port() {
        let link = ProbeLink::from_endpoint("http://10.0.0.5:8080/api", Duration::from_secs(1)).unwrap();
        assert_eq!(link.target(), "10.0.0.5:8080");
    }

    #[test]
    fn test_from_endpoint_uses_scheme_default_port() {
        let link = ProbeLink::from_endpoint("http://collector.local/api", Duration::from_secs(1)).unwrap();
        assert_eq!(link.target(), "collector.local:80");
    }

    #[test]
    fn test_from_endpoint_rejects_garbage() {
        assert!(ProbeLink::from_endpoint("not a url", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_starts_disconnected() {
        let link = ProbeLink::new("127.0.0.1:1", Duration::from_secs(1));
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn test_check_reachable_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut link = ProbeLink::new(addr.to_string(), Duration::from_secs(1));
        assert!(link.check().await);
        assert!(link.is_connected());

        drop(listener);
        assert!(!link.check().await);
        assert!(!link.is_connected());
    }
}
