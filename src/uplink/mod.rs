//! # Uplink Module
//!
//! Delivery of single records to the remote collector.
//!
//! This module handles:
//! - The [`Uplink`] capability used by the queue drain and the sync engine
//! - HTTP POST delivery with a hard per-attempt timeout

pub mod http;

pub use http::HttpUplink;

use async_trait::async_trait;

use crate::record::Record;

/// Capability to deliver one record to the collector
///
/// One call is one request carrying exactly one record. `true` means the
/// collector acknowledged with a 2xx-equivalent; everything else, including
/// transport errors and timeouts, is `false`. Implementations must return
/// within their configured timeout.
#[async_trait]
pub trait Uplink: Send {
    async fn attempt_send(&mut self, record: &Record) -> bool;
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Uplink that answers from a script, then falls back to a default
    ///
    /// Every attempted record is captured in order.
    #[derive(Clone)]
    pub struct ScriptedUplink {
        pub script: Arc<Mutex<VecDeque<bool>>>,
        pub fallback: Arc<Mutex<bool>>,
        pub attempts: Arc<Mutex<Vec<Record>>>,
    }

    impl ScriptedUplink {
        /// Always succeeds
        pub fn accepting() -> Self {
            Self::with_script(&[], true)
        }

        /// Always fails
        pub fn rejecting() -> Self {
            Self::with_script(&[], false)
        }

        pub fn with_script(script: &[bool], fallback: bool) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.iter().copied().collect())),
                fallback: Arc::new(Mutex::new(fallback)),
                attempts: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn set_fallback(&self, accept: bool) {
            *self.fallback.lock().unwrap() = accept;
        }

        pub fn attempted(&self) -> Vec<String> {
            self.attempts
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.as_str().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl Uplink for ScriptedUplink {
        async fn attempt_send(&mut self, record: &Record) -> bool {
            self.attempts.lock().unwrap().push(record.clone());
            let scripted = self.script.lock().unwrap().pop_front();
            scripted.unwrap_or(*self.fallback.lock().unwrap())
        }
    }
}
