//! Core workflow logic — types, extraction, compilation, references, execution.

pub mod classifier;
pub mod compiler;
pub mod environment;
pub mod executor;
pub mod extractor;
pub mod parser;
pub mod resolver;
pub mod types;
