//! Scriptflow — markdown workflow scripts compiled to plans.
//!
//! A workflow document carries a `## Script` section of steps, list
//! variables, for-each loops, and function calls. The compiler turns it into
//! a flat, ordered plan; the engine replays it (dry run) or executes it
//! against a registry of handlers, writing every event to a JSONL log.

pub mod cli;
pub mod core;
pub mod handlers;
pub mod provenance;
pub mod transport;
