//! # Durable Queue Module
//!
//! Bounded, ordered, crash-tolerant backlog of undelivered records.
//!
//! This module handles:
//! - Mounting the backing store, with one reformat attempt on failure
//! - Recovering the backlog after an abrupt restart, dropping a torn last line
//! - FIFO eviction of the oldest record when the queue is full
//! - Draining oldest-first through an [`Uplink`], stopping at the first failure
//!
//! ## Persisted Format
//!
//! One record per line, newline-terminated. Growth is append-only; eviction
//! and drain rewrite the log with exactly the retained records, in order.
//! Every mutation is a full read/rewrite, O(n) in the current backlog.

pub mod store;

pub use store::{FileStore, QueueStore};

use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{FieldlinkError, Result};
use crate::record::Record;
use crate::uplink::Uplink;

/// Default queue capacity in records (~100 KB at ~200 bytes per record)
pub const DEFAULT_CAPACITY: usize = 500;

/// Result of scanning the raw log
#[derive(Debug, Default)]
struct Scan {
    records: Vec<Record>,
    /// Torn or undecodable lines that were dropped
    discarded: usize,
    /// Whether the raw bytes differ from the clean form of `records`
    dirty: bool,
}

/// Split raw log bytes into records
///
/// Only newline-terminated, UTF-8, non-blank lines survive. A trailing
/// fragment without a newline is a torn write and is always dropped.
fn scan(bytes: &[u8]) -> Scan {
    let mut scan = Scan::default();
    let mut rest = bytes;

    while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
        let raw = &rest[..pos];
        rest = &rest[pos + 1..];

        match std::str::from_utf8(raw) {
            Ok(line) if line.trim().is_empty() => scan.dirty = true,
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.len() != line.len() {
                    scan.dirty = true;
                }
                match Record::from_line(trimmed) {
                    Ok(record) => scan.records.push(record),
                    Err(_) => {
                        scan.discarded += 1;
                        scan.dirty = true;
                    }
                }
            }
            Err(_) => {
                scan.discarded += 1;
                scan.dirty = true;
            }
        }
    }

    if !rest.is_empty() {
        scan.discarded += 1;
        scan.dirty = true;
    }

    scan
}

/// Durable FIFO of pending records with fixed capacity
///
/// Holds an in-memory count that is synchronized at [`init`](Self::init) and
/// updated on every successful mutation, so [`count`](Self::count) is O(1).
/// Failed mutations leave both the count and the persisted log unchanged.
pub struct DurableQueue<S: QueueStore = FileStore> {
    store: S,
    capacity: usize,
    count: usize,
    available: bool,
    discarded_on_recovery: usize,
}

impl<S: QueueStore> std::fmt::Debug for DurableQueue<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableQueue")
            .field("location", &self.store.location())
            .field("capacity", &self.capacity)
            .field("count", &self.count)
            .field("available", &self.available)
            .finish_non_exhaustive()
    }
}

impl DurableQueue<FileStore> {
    /// Queue backed by a single log file at `path`
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use fieldlink::queue::DurableQueue;
    ///
    /// let mut queue = DurableQueue::open("./data/queue.jsonl", 500);
    /// let recovered = queue.init()?;
    /// println!("{} records waiting", recovered);
    /// # Ok::<(), fieldlink::error::FieldlinkError>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize) -> Self {
        Self::new(FileStore::new(path), capacity)
    }
}

impl<S: QueueStore> DurableQueue<S> {
    /// Wrap a store; nothing is touched until [`init`](Self::init)
    ///
    /// A capacity of 0 is raised to 1.
    pub fn new(store: S, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            count: 0,
            available: false,
            discarded_on_recovery: 0,
        }
    }

    /// Mount the store and recover the persisted backlog
    ///
    /// A failed mount or unreadable log triggers exactly one reformat. Torn
    /// or malformed lines are dropped and the log is rewritten to hold only
    /// the recovered records.
    ///
    /// # Returns
    ///
    /// * `Result<usize>` - Number of records recovered
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the store is still unusable after the
    /// reformat. The queue then stays disabled for the process lifetime.
    pub fn init(&mut self) -> Result<usize> {
        self.available = false;
        self.count = 0;

        let bytes = match self.mount_and_read() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    "Queue store {} unusable ({}), reformatting",
                    self.store.location(),
                    e
                );
                self.store
                    .reformat()
                    .and_then(|_| self.mount_and_read())
                    .map_err(|e| {
                        FieldlinkError::StorageUnavailable(format!(
                            "{}: {}",
                            self.store.location(),
                            e
                        ))
                    })?
            }
        };

        let scan = scan(&bytes);
        if scan.discarded > 0 {
            warn!(
                "Discarded {} torn or malformed line(s) from {}",
                scan.discarded,
                self.store.location()
            );
        }

        // Repair and capacity trim share one rewrite
        let skip = scan.records.len().saturating_sub(self.capacity);
        let retained = &scan.records[skip..];
        if scan.dirty || skip > 0 {
            self.store.rewrite(retained).map_err(|e| {
                FieldlinkError::StorageUnavailable(format!(
                    "cannot repair {}: {}",
                    self.store.location(),
                    e
                ))
            })?;
        }
        if skip > 0 {
            info!("Trimming queue: discarded {} oldest record(s)", skip);
        }

        self.discarded_on_recovery = scan.discarded;
        self.count = retained.len();
        self.available = true;

        info!(
            "Queue store {} mounted, {} record(s) pending",
            self.store.location(),
            self.count
        );

        Ok(self.count)
    }

    fn mount_and_read(&mut self) -> std::io::Result<Vec<u8>> {
        self.store.mount()?;
        self.store.read_all()
    }

    /// Append a record, evicting the oldest one first if the queue is full
    ///
    /// Eviction frees exactly one slot, never more. On a full queue the
    /// eviction and the new record are committed by one atomic rewrite.
    ///
    /// # Errors
    ///
    /// * `StorageUnavailable` - The store never mounted
    /// * `WriteFailure` - Eviction or append failed; the record is dropped and
    ///   the prior contents stay intact
    pub fn enqueue(&mut self, record: &Record) -> Result<()> {
        self.ensure_available()?;

        if self.count >= self.capacity {
            self.evict_and_push(record)?;
        } else {
            self.store
                .append(record.as_str())
                .map_err(|e| FieldlinkError::WriteFailure(format!("append failed: {}", e)))?;
            self.count += 1;
        }

        debug!("Enqueued record. Queue size: {}", self.count);
        Ok(())
    }

    /// Drop the oldest records down to `capacity - 1` and add `record`, as a
    /// single rewrite
    fn evict_and_push(&mut self, record: &Record) -> Result<()> {
        let bytes = self
            .store
            .read_all()
            .map_err(|e| FieldlinkError::WriteFailure(format!("read for eviction failed: {}", e)))?;
        let mut records = scan(&bytes).records;

        let skip = (records.len() + 1).saturating_sub(self.capacity);
        records.drain(..skip);
        records.push(record.clone());

        self.store
            .rewrite(&records)
            .map_err(|e| FieldlinkError::WriteFailure(format!("eviction rewrite failed: {}", e)))?;
        self.count = records.len();

        if skip > 0 {
            info!("Trimming queue: discarded {} oldest record(s)", skip);
        }
        Ok(())
    }

    /// Deliver the backlog oldest-first, stopping at the first failure
    ///
    /// Records before the first failed attempt are removed; the failed record
    /// and everything after it stay queued in their original order and are not
    /// attempted. A fully delivered backlog removes the log.
    ///
    /// # Returns
    ///
    /// * `Result<usize>` - Number of records delivered and removed
    ///
    /// # Errors
    ///
    /// Returns `Io` if the log cannot be read, or `WriteFailure` if the
    /// rewrite after delivery fails. In the latter case the queue is unchanged
    /// and the delivered records will be sent again on a later drain.
    pub async fn drain<U>(&mut self, uplink: &mut U) -> Result<usize>
    where
        U: Uplink + ?Sized,
    {
        if !self.available || self.count == 0 {
            return Ok(0);
        }

        info!("Draining queue ({} records)...", self.count);

        let bytes = self.store.read_all()?;
        let records = scan(&bytes).records;

        let mut sent = 0;
        for record in &records {
            if !uplink.attempt_send(record).await {
                break;
            }
            sent += 1;
        }

        if sent == 0 {
            debug!("Drain stopped at first record, queue unchanged");
            return Ok(0);
        }

        let remaining = &records[sent..];
        if remaining.is_empty() {
            self.store
                .remove()
                .map_err(|e| FieldlinkError::WriteFailure(format!("clearing log failed: {}", e)))?;
            self.count = 0;
            info!("Queue fully drained and cleared ({} sent)", sent);
        } else {
            self.store
                .rewrite(remaining)
                .map_err(|e| FieldlinkError::WriteFailure(format!("drain rewrite failed: {}", e)))?;
            self.count = remaining.len();
            info!("Drain partial: sent={}, remaining={}", sent, self.count);
        }

        Ok(sent)
    }

    /// Remove every record; safe to call repeatedly
    ///
    /// # Errors
    ///
    /// Returns `WriteFailure` if the log could not be deleted; the count is
    /// left unchanged in that case.
    pub fn clear(&mut self) -> Result<()> {
        if self.available {
            self.store
                .remove()
                .map_err(|e| FieldlinkError::WriteFailure(format!("clear failed: {}", e)))?;
        }
        self.count = 0;
        info!("Queue cleared");
        Ok(())
    }

    /// Snapshot of the pending records, oldest first
    pub fn records(&mut self) -> Result<Vec<Record>> {
        if !self.available {
            return Ok(Vec::new());
        }
        let bytes = self.store.read_all()?;
        Ok(scan(&bytes).records)
    }

    /// Number of pending records, O(1)
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether the store mounted and offline buffering works
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Torn or malformed lines dropped by the last [`init`](Self::init)
    pub fn discarded_on_recovery(&self) -> usize {
        self.discarded_on_recovery
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(FieldlinkError::StorageUnavailable(format!(
                "{} is not mounted",
                self.store.location()
            )))
        }
    }
}
