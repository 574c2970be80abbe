//! Provenance — run event log, timestamps, run ids, document fingerprints.

pub mod eventlog;
pub mod hasher;

pub use eventlog::{EventLog, EventSink};
