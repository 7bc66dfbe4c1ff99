//! # Fieldlink Library
//!
//! Store-and-forward telemetry uplink for field tracking devices.
//!
//! Readings are delivered straight to the collector while the link is healthy.
//! When the link drops or a delivery fails they are kept in a bounded,
//! crash-tolerant queue on local storage and drained in order once the link
//! comes back.

pub mod config;
pub mod error;
pub mod link;
pub mod queue;
pub mod record;
pub mod sync;
pub mod uplink;
