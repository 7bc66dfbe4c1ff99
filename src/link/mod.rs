//! # Link Module
//!
//! Connectivity tracking and reconnection for the wireless link.
//!
//! This module handles:
//! - Periodic connectivity checks at a fixed interval
//! - Logging link lost / regained transitions
//! - Reconnect attempts rate-limited by a cooldown
//! - The cooperative provisioning portal, polled once per cycle
//!
//! Nothing here blocks: every call returns within the bound of the
//! underlying [`Link`] operation, and the provisioning portal is a state
//! advanced by [`LinkMonitor::poll`] rather than a call that waits for the
//! operator.

pub mod probe;

pub use probe::ProbeLink;

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Wireless link collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Link: Send {
    /// Last known connectivity, no I/O
    fn is_connected(&self) -> bool;

    /// Refresh connectivity, bounded in time
    async fn check(&mut self) -> bool;

    /// Kick one reconnection attempt without waiting for it to finish
    async fn reconnect(&mut self);

    /// Open the provisioning portal under `name`
    fn start_portal(&mut self, name: &str);

    /// Service pending portal requests
    fn process_portal(&mut self);

    fn stop_portal(&mut self);
}

/// Provisioning portal state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioning {
    Idle,
    /// Portal open since the given instant
    ProvisioningActive { since: Instant },
}

/// Timing for [`LinkMonitor`]
#[derive(Debug, Clone)]
pub struct LinkTimings {
    pub check_interval: Duration,
    pub reconnect_cooldown: Duration,
    pub portal_timeout: Duration,
    pub portal_name: String,
}

/// Drives a [`Link`] from the control loop
pub struct LinkMonitor<L: Link> {
    link: L,
    timings: LinkTimings,
    last_check: Option<Instant>,
    last_reconnect: Option<Instant>,
    was_connected: bool,
    provisioning: Provisioning,
}

impl<L: Link> LinkMonitor<L> {
    pub fn new(link: L, timings: LinkTimings) -> Self {
        let was_connected = link.is_connected();
        Self {
            link,
            timings,
            last_check: None,
            last_reconnect: None,
            was_connected,
            provisioning: Provisioning::Idle,
        }
    }

    /// Advance the monitor by one control cycle
    ///
    /// Services the portal when provisioning, checks the link when the check
    /// interval has elapsed, and triggers a reconnect when offline and the
    /// cooldown allows it.
    ///
    /// # Returns
    ///
    /// * `bool` - Current connectivity
    pub async fn poll(&mut self, now: Instant) -> bool {
        self.poll_portal(now);

        let check_due = self
            .last_check
            .map_or(true, |t| now.saturating_duration_since(t) >= self.timings.check_interval);

        if check_due {
            self.last_check = Some(now);
            let connected = self.link.check().await;

            if self.was_connected && !connected {
                warn!("Link LOST, switching to offline buffering");
            } else if !self.was_connected && connected {
                info!("Link RECONNECTED");
            }
            self.was_connected = connected;

            if !connected && !self.is_provisioning() {
                self.maybe_reconnect(now).await;
            }
        }

        self.link.is_connected()
    }

    async fn maybe_reconnect(&mut self, now: Instant) {
        let cooled_down = self.last_reconnect.map_or(true, |t| {
            now.saturating_duration_since(t) >= self.timings.reconnect_cooldown
        });

        if cooled_down {
            self.last_reconnect = Some(now);
            info!("Attempting link reconnect...");
            self.link.reconnect().await;
        }
    }

    fn poll_portal(&mut self, now: Instant) {
        let Provisioning::ProvisioningActive { since } = self.provisioning else {
            return;
        };

        self.link.process_portal();

        if self.link.is_connected() {
            info!("Link connected via provisioning portal");
            self.was_connected = true;
            self.stop_provisioning();
        } else if now.saturating_duration_since(since) >= self.timings.portal_timeout {
            warn!(
                "Provisioning portal timed out after {}s, continuing offline",
                self.timings.portal_timeout.as_secs()
            );
            self.stop_provisioning();
        }
    }

    /// Open the provisioning portal; a portal already open is left as is
    pub fn start_provisioning(&mut self, now: Instant) {
        if self.is_provisioning() {
            info!("Provisioning portal already active");
            return;
        }

        info!("Starting provisioning portal '{}'", self.timings.portal_name);
        self.link.start_portal(&self.timings.portal_name);
        self.provisioning = Provisioning::ProvisioningActive { since: now };
    }

    pub fn stop_provisioning(&mut self) {
        if self.is_provisioning() {
            self.link.stop_portal();
            self.provisioning = Provisioning::Idle;
            info!("Provisioning portal stopped");
        }
    }

    pub fn is_provisioning(&self) -> bool {
        matches!(self.provisioning, Provisioning::ProvisioningActive { .. })
    }

    pub fn provisioning(&self) -> Provisioning {
        self.provisioning
    }

    /// Last known connectivity, no I/O
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }
}
