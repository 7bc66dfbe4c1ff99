//! # HTTP Uplink
//!
//! Posts one record per request to the collector endpoint.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::Uplink;
use crate::error::{FieldlinkError, Result};
use crate::record::Record;

/// Response bodies are logged up to this many characters
const MAX_LOGGED_BODY: usize = 200;

/// Uplink that POSTs each record as a JSON body
///
/// The request timeout is set on the client and additionally enforced with
/// `tokio::time::timeout`, so an attempt never outlives `timeout`.
pub struct HttpUplink {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl std::fmt::Debug for HttpUplink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpUplink")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpUplink {
    /// Create an uplink for `endpoint`
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Collector URL (http or https)
    /// * `timeout` - Upper bound for one delivery attempt
    ///
    /// # Errors
    ///
    /// Returns `SendFailure` if the HTTP client cannot be built.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use fieldlink::uplink::HttpUplink;
    /// use std::time::Duration;
    ///
    /// let uplink = HttpUplink::new("http://127.0.0.1:8080/api/telemetry", Duration::from_secs(5))?;
    /// assert_eq!(uplink.endpoint(), "http://127.0.0.1:8080/api/telemetry");
    /// # Ok::<(), fieldlink::error::FieldlinkError>(())
    /// ```
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| FieldlinkError::SendFailure(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Perform one POST and classify the outcome
    async fn post(&self, record: &Record) -> Result<u16> {
        debug!("POST {} ({} bytes)", self.endpoint, record.len());

        let request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(record.as_str().to_string())
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| {
                FieldlinkError::SendFailure(format!(
                    "no response within {} ms",
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|e| FieldlinkError::SendFailure(describe_transport_error(&e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(MAX_LOGGED_BODY).collect();

        if status.is_success() {
            if !body.is_empty() {
                debug!("Collector response: {}", body);
            }
            Ok(status.as_u16())
        } else {
            Err(FieldlinkError::SendFailure(format!(
                "rejected with HTTP {}: {}",
                status.as_u16(),
                body
            )))
        }
    }
}

/// Human-readable class for a transport failure
fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("server did not respond in time: {}", e)
    } else if e.is_connect() {
        format!("connection refused or unreachable, check endpoint: {}", e)
    } else if e.is_request() || e.is_body() {
        format!("send failed, link may have dropped: {}", e)
    } else {
        format!("transport error: {}", e)
    }
}

#[async_trait]
impl Uplink for HttpUplink {
    async fn attempt_send(&mut self, record: &Record) -> bool {
        match self.post(record).await {
            Ok(status) => {
                info!("POST success (HTTP {})", status);
                true
            }
            Err(e) => {
                warn!("POST failed: {}", e);
                false
            }
        }
    }
}
