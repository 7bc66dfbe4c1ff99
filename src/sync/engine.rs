//! # Sync Engine
//!
//! Runs one control cycle at a time:
//!
//! 1. Poll the link monitor for connectivity
//! 2. Deliver a fresh reading directly when online, otherwise (or when the
//!    direct send fails) enqueue it
//! 3. When the drain timer fires and the link is up, drain the backlog
//! 4. Recompute the [`Mode`] and publish the status
//!
//! The direct path never waits on the backlog, and the drain path runs on
//! its own slower timer.

use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{EngineStatus, Mode};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::link::{Link, LinkMonitor};
use crate::queue::{DurableQueue, FileStore, QueueStore};
use crate::record::{encode, Reading, Record};
use crate::uplink::Uplink;

/// Outcome of a single [`SyncEngine::cycle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub mode: Mode,
    /// The fresh reading reached the collector without touching the queue
    pub delivered_direct: bool,
    /// The fresh reading was stored in the queue
    pub queued: bool,
    /// The fresh reading was lost (invalid, or the queue could not take it)
    pub dropped: bool,
    /// Backlog records delivered by this cycle's drain
    pub drained: usize,
}

impl CycleReport {
    fn new() -> Self {
        Self {
            mode: Mode::Queuing,
            delivered_direct: false,
            queued: false,
            dropped: false,
            drained: 0,
        }
    }
}

/// Store-and-forward state machine
///
/// Owns the queue, the uplink and the link monitor. Everything runs on the
/// caller's task; the engine is never re-entered.
pub struct SyncEngine<U: Uplink, L: Link, S: QueueStore = FileStore> {
    queue: DurableQueue<S>,
    uplink: U,
    link: LinkMonitor<L>,
    drain_interval: Duration,
    cycle_budget: Duration,
    /// `None` until the first drain, which is due immediately
    next_drain: Option<Instant>,
    connected: bool,
    mode: Mode,
    status_tx: watch::Sender<EngineStatus>,
}

impl<U: Uplink, L: Link, S: QueueStore> SyncEngine<U, L, S> {
    /// Build an engine around an already initialised queue
    ///
    /// A queue whose `init` failed is accepted: the engine then runs in
    /// direct-send-only mode.
    pub fn new(queue: DurableQueue<S>, uplink: U, link: LinkMonitor<L>, sync: &SyncConfig) -> Self {
        let connected = link.is_connected();
        let mode = Mode::derive(connected, queue.count());
        let status = EngineStatus {
            mode,
            backlog: queue.count(),
            connected,
            buffering_available: queue.is_available(),
            provisioning: link.is_provisioning(),
        };
        let (status_tx, _) = watch::channel(status);

        if !queue.is_available() {
            warn!("Offline buffering unavailable: readings taken while offline will be lost");
        }

        Self {
            queue,
            uplink,
            link,
            drain_interval: sync.drain_interval(),
            cycle_budget: sync.cycle_budget(),
            next_drain: None,
            connected,
            mode,
            status_tx,
        }
    }

    /// Run one control cycle
    ///
    /// # Arguments
    ///
    /// * `now` - Cycle timestamp used for every timer decision
    /// * `reading` - Fresh reading produced since the last cycle, if any
    ///
    /// # Returns
    ///
    /// * `CycleReport` - What happened to the reading and the backlog
    pub async fn cycle(&mut self, now: Instant, reading: Option<Reading>) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::new();

        self.connected = self.link.poll(now).await;

        if let Some(reading) = reading {
            match encode(&reading) {
                Ok(record) => self.deliver(record, &mut report).await,
                Err(e) => {
                    warn!("Dropping reading: {}", e);
                    report.dropped = true;
                }
            }
        }

        if self.drain_due(now) {
            self.next_drain = Some(now + self.drain_interval);
            if self.connected && self.queue.count() > 0 {
                report.drained = self.drain().await;
            }
        }

        self.set_mode(Mode::derive(self.connected, self.queue.count()));
        report.mode = self.mode;

        let elapsed = started.elapsed();
        if elapsed > self.cycle_budget {
            warn!(
                "Cycle took {} ms, over the {} ms watchdog budget",
                elapsed.as_millis(),
                self.cycle_budget.as_millis()
            );
        }

        report
    }

    /// Direct send when online, otherwise (or on failure) enqueue
    async fn deliver(&mut self, record: Record, report: &mut CycleReport) {
        if self.connected {
            if self.uplink.attempt_send(&record).await {
                report.delivered_direct = true;
                return;
            }
            debug!("Direct send failed, buffering reading");
        }

        match self.queue.enqueue(&record) {
            Ok(()) => report.queued = true,
            Err(e) => {
                warn!("Reading dropped: {}", e);
                report.dropped = true;
            }
        }
    }

    fn drain_due(&self, now: Instant) -> bool {
        self.next_drain.map_or(true, |due| now >= due)
    }

    async fn drain(&mut self) -> usize {
        self.set_mode(Mode::Draining);

        match self.queue.drain(&mut self.uplink).await {
            Ok(sent) => sent,
            Err(e) => {
                warn!("Drain failed: {}", e);
                0
            }
        }
    }

    fn set_mode(&mut self, mode: Mode) {
        if mode != self.mode {
            info!("Mode {} -> {}", self.mode, mode);
        }
        self.mode = mode;
        self.status_tx.send_replace(self.status());
    }

    /// Open the provisioning portal; it is serviced by subsequent cycles
    pub fn start_provisioning(&mut self, now: Instant) {
        self.link.start_provisioning(now);
        self.status_tx.send_replace(self.status());
    }

    /// Operator clear of the whole backlog
    pub fn clear_backlog(&mut self) -> Result<()> {
        self.queue.clear()?;
        self.set_mode(Mode::derive(self.connected, 0));
        Ok(())
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            mode: self.mode,
            backlog: self.queue.count(),
            connected: self.connected,
            buffering_available: self.queue.is_available(),
            provisioning: self.link.is_provisioning(),
        }
    }

    /// Status feed for display and LED collaborators
    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status_tx.subscribe()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn backlog(&self) -> usize {
        self.queue.count()
    }

    pub fn queue_mut(&mut self) -> &mut DurableQueue<S> {
        &mut self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkTimings;
    use crate::queue::store::mocks::MockStore;
    use crate::record::decode;
    use crate::uplink::mocks::ScriptedUplink;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Link whose state the test flips directly
    #[derive(Clone)]
    struct FakeLink {
        up: Arc<Mutex<bool>>,
    }

    impl FakeLink {
        fn new(up: bool) -> Self {
            Self {
                up: Arc::new(Mutex::new(up)),
            }
        }

        fn set(&self, up: bool) {
            *self.up.lock().unwrap() = up;
        }
    }

    #[async_trait]
    impl Link for FakeLink {
        fn is_connected(&self) -> bool {
            *self.up.lock().unwrap()
        }

        async fn check(&mut self) -> bool {
            self.is_connected()
        }

        async fn reconnect(&mut self) {}

        fn start_portal(&mut self, _name: &str) {}

        fn process_portal(&mut self) {}

        fn stop_portal(&mut self) {}
    }

    /// Uplink recording the published mode at each attempt
    struct ModeProbeUplink {
        status: watch::Receiver<EngineStatus>,
        seen: Arc<Mutex<Vec<Mode>>>,
    }

    #[async_trait]
    impl Uplink for ModeProbeUplink {
        async fn attempt_send(&mut self, _record: &Record) -> bool {
            self.seen.lock().unwrap().push(self.status.borrow().mode);
            true
        }
    }

    fn sync_config() -> SyncConfig {
        SyncConfig {
            drain_interval_ms: 15000,
            ..SyncConfig::default()
        }
    }

    fn monitor(link: FakeLink) -> LinkMonitor<FakeLink> {
        LinkMonitor::new(
            link,
            LinkTimings {
                check_interval: Duration::ZERO,
                reconnect_cooldown: Duration::from_secs(30),
                portal_timeout: Duration::from_secs(180),
                portal_name: "FIELDLINK_SETUP".to_string(),
            },
        )
    }

    fn queue(capacity: usize) -> (DurableQueue<MockStore>, MockStore) {
        let store = MockStore::new();
        let mut queue = DurableQueue::new(store.clone(), capacity);
        queue.init().unwrap();
        (queue, store)
    }

    fn engine(
        up: bool,
        uplink: ScriptedUplink,
    ) -> (SyncEngine<ScriptedUplink, FakeLink, MockStore>, FakeLink) {
        let link = FakeLink::new(up);
        let (queue, _) = queue(10);
        let engine = SyncEngine::new(queue, uplink, monitor(link.clone()), &sync_config());
        (engine, link)
    }

    fn reading(seq: u32) -> Reading {
        Reading {
            device_id: 1,
            latitude: 27.7 + seq as f64 * 0.001,
            longitude: 85.3,
            speed_kmh: 30.0,
            heading_deg: 90.0,
            altitude_m: 1300.0,
            satellites: seq,
            hdop: Some(1.0),
            timestamp: None,
        }
    }

    fn satellites_of(lines: &[String]) -> Vec<u32> {
        lines
            .iter()
            .map(|l| decode(&Record::from_line(l.as_str()).unwrap()).unwrap().satellites)
            .collect()
    }

    #[tokio::test]
    async fn test_online_direct_send_skips_queue() {
        let uplink = ScriptedUplink::accepting();
        let (mut engine, _) = engine(true, uplink.clone());

        let report = engine.cycle(Instant::now(), Some(reading(1))).await;

        assert!(report.delivered_direct);
        assert!(!report.queued);
        assert_eq!(report.mode, Mode::Live);
        assert_eq!(engine.backlog(), 0);
        assert_eq!(uplink.attempted().len(), 1);
    }

    #[tokio::test]
    async fn test_offline_reading_is_queued_without_send() {
        let uplink = ScriptedUplink::accepting();
        let (mut engine, _) = engine(false, uplink.clone());

        let report = engine.cycle(Instant::now(), Some(reading(1))).await;

        assert!(report.queued);
        assert_eq!(report.mode, Mode::Queuing);
        assert_eq!(engine.backlog(), 1);
        assert!(uplink.attempted().is_empty());
    }

    #[tokio::test]
    async fn test_offline_with_empty_backlog_is_queuing() {
        let (mut engine, _) = engine(false, ScriptedUplink::accepting());

        let report = engine.cycle(Instant::now(), None).await;
        assert_eq!(report.mode, Mode::Queuing);
        assert_eq!(engine.backlog(), 0);
    }

    #[tokio::test]
    async fn test_failed_direct_send_is_queued() {
        let uplink = ScriptedUplink::rejecting();
        let (mut engine, _) = engine(true, uplink.clone());

        let report = engine.cycle(Instant::now(), Some(reading(1))).await;

        assert!(!report.delivered_direct);
        assert!(report.queued);
        assert_eq!(report.drained, 0);
        assert_eq!(report.mode, Mode::Queuing);
        assert_eq!(engine.backlog(), 1);
    }

    #[tokio::test]
    async fn test_fail_once_then_succeed_drains_backlog() {
        // Direct send fails, the drain that follows succeeds
        let uplink = ScriptedUplink::with_script(&[false], true);
        let (mut engine, _) = engine(true, uplink.clone());

        let report = engine.cycle(Instant::now(), Some(reading(1))).await;

        assert!(report.queued);
        assert_eq!(report.drained, 1);
        assert_eq!(report.mode, Mode::Live);
        assert_eq!(engine.backlog(), 0);
        assert_eq!(uplink.attempted().len(), 2);
    }

    #[tokio::test]
    async fn test_drain_runs_on_its_own_timer() {
        let uplink = ScriptedUplink::accepting();
        let (mut engine, link) = engine(false, uplink.clone());
        let start = Instant::now();

        // First cycle consumes the immediate drain slot while offline
        engine.cycle(start, Some(reading(1))).await;
        engine.cycle(start + Duration::from_secs(2), Some(reading(2))).await;
        assert_eq!(engine.backlog(), 2);

        link.set(true);
        let report = engine.cycle(start + Duration::from_secs(4), None).await;
        assert_eq!(report.drained, 0);
        assert_eq!(report.mode, Mode::Queuing);
        assert_eq!(engine.backlog(), 2);

        let report = engine.cycle(start + Duration::from_secs(15), None).await;
        assert_eq!(report.drained, 2);
        assert_eq!(report.mode, Mode::Live);
        assert_eq!(engine.backlog(), 0);
    }

    #[tokio::test]
    async fn test_backlog_drained_in_enqueue_order() {
        let uplink = ScriptedUplink::accepting();
        let (mut engine, link) = engine(false, uplink.clone());
        let start = Instant::now();

        for seq in 1..=3 {
            engine.cycle(start + Duration::from_secs(seq as u64), Some(reading(seq))).await;
        }

        link.set(true);
        engine.cycle(start + Duration::from_secs(20), None).await;

        assert_eq!(satellites_of(&uplink.attempted()), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_partial_drain_stays_queuing() {
        let uplink = ScriptedUplink::rejecting();
        let (mut engine, link) = engine(false, uplink.clone());
        let start = Instant::now();

        for seq in 1..=3 {
            engine.cycle(start, Some(reading(seq))).await;
        }

        link.set(true);
        *uplink.script.lock().unwrap() = vec![true].into();
        let report = engine.cycle(start + Duration::from_secs(15), None).await;

        assert_eq!(report.drained, 1);
        assert_eq!(report.mode, Mode::Queuing);
        assert_eq!(engine.backlog(), 2);
    }

    #[tokio::test]
    async fn test_mode_is_draining_during_drain() {
        let link = FakeLink::new(false);
        let (queue, _) = queue(10);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let (tx, rx) = watch::channel(EngineStatus {
            mode: Mode::Queuing,
            backlog: 0,
            connected: false,
            buffering_available: true,
            provisioning: false,
        });
        drop(tx);
        let placeholder = ModeProbeUplink {
            status: rx,
            seen: seen.clone(),
        };

        let mut engine = SyncEngine::new(queue, placeholder, monitor(link.clone()), &sync_config());
        engine.uplink.status = engine.subscribe();

        let start = Instant::now();
        engine.cycle(start, Some(reading(1))).await;
        engine.cycle(start, Some(reading(2))).await;

        link.set(true);
        engine.cycle(start + Duration::from_secs(15), None).await;

        assert_eq!(*seen.lock().unwrap(), vec![Mode::Draining, Mode::Draining]);
        assert_eq!(engine.mode(), Mode::Live);
    }

    #[tokio::test]
    async fn test_status_feed_tracks_backlog() {
        let (mut engine, _) = engine(false, ScriptedUplink::accepting());
        let rx = engine.subscribe();

        engine.cycle(Instant::now(), Some(reading(1))).await;

        let status = *rx.borrow();
        assert_eq!(status.mode, Mode::Queuing);
        assert_eq!(status.backlog, 1);
        assert!(!status.connected);
        assert!(status.buffering_available);
    }

    #[tokio::test]
    async fn test_capacity_bounded_while_offline() {
        let link = FakeLink::new(false);
        let (queue, store) = queue(3);
        let mut engine = SyncEngine::new(
            queue,
            ScriptedUplink::accepting(),
            monitor(link),
            &sync_config(),
        );
        let start = Instant::now();

        for seq in 1..=5 {
            engine.cycle(start, Some(reading(seq))).await;
            assert!(engine.backlog() <= 3);
        }

        let lines: Vec<String> = store.contents().lines().map(str::to_string).collect();
        assert_eq!(satellites_of(&lines), vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_storage_unavailable_degrades_to_direct_only() {
        let store = MockStore::new();
        store.set_mount_failures(2);
        let mut queue = DurableQueue::new(store, 10);
        assert!(queue.init().is_err());

        let link = FakeLink::new(false);
        let uplink = ScriptedUplink::accepting();
        let mut engine = SyncEngine::new(queue, uplink.clone(), monitor(link.clone()), &sync_config());
        assert!(!engine.status().buffering_available);

        let report = engine.cycle(Instant::now(), Some(reading(1))).await;
        assert!(report.dropped);
        assert_eq!(engine.backlog(), 0);

        link.set(true);
        let report = engine.cycle(Instant::now(), Some(reading(2))).await;
        assert!(report.delivered_direct);
        assert_eq!(report.mode, Mode::Live);
    }

    #[tokio::test]
    async fn test_invalid_reading_is_dropped() {
        let uplink = ScriptedUplink::accepting();
        let (mut engine, _) = engine(true, uplink.clone());

        let mut bad = reading(1);
        bad.latitude = f64::NAN;
        let report = engine.cycle(Instant::now(), Some(bad)).await;

        assert!(report.dropped);
        assert!(uplink.attempted().is_empty());
        assert_eq!(engine.backlog(), 0);
    }

    #[tokio::test]
    async fn test_clear_backlog() {
        let (mut engine, _) = engine(false, ScriptedUplink::accepting());
        engine.cycle(Instant::now(), Some(reading(1))).await;
        assert_eq!(engine.backlog(), 1);

        engine.clear_backlog().unwrap();
        engine.clear_backlog().unwrap();
        assert_eq!(engine.backlog(), 0);
        assert_eq!(engine.queue_mut().count(), 0);
    }

    #[tokio::test]
    async fn test_provisioning_reflected_in_status() {
        let (mut engine, _) = engine(false, ScriptedUplink::accepting());
        let rx = engine.subscribe();

        engine.start_provisioning(Instant::now());
        assert!(rx.borrow().provisioning);
        assert!(engine.status().provisioning);
    }
}
