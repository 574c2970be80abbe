//! SF-013: Handler contract.
//!
//! A handler services one assignment id or function name. It receives an
//! invocation context and returns a result; failures are plain messages
//! that the engine turns into a fail-fast run error.

pub mod builtin;
pub mod registry;
pub mod script;

use crate::core::environment::References;
use crate::core::types::{CallArgs, Value, Variables};
use crate::provenance::EventSink;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub use registry::{HandlerRoot, Registry};

/// Executes one kind of action.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn invoke(&self, ctx: &mut HandlerContext<'_>) -> Result<HandlerResult, String>;
}

/// Identity of the action being serviced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationMeta {
    pub step_id: String,

    /// Assignment id or function name.
    pub action_id: String,
    pub line: usize,
    pub run_id: String,
}

/// Process-level configuration visible to handlers.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AmbientConfig {
    pub env: BTreeMap<String, String>,
    pub work_dir: PathBuf,
}

impl AmbientConfig {
    /// Snapshot the process environment.
    pub fn from_process(work_dir: PathBuf) -> Self {
        Self {
            env: std::env::vars().collect(),
            work_dir,
        }
    }
}

/// Everything a handler may read or touch during one invocation.
pub struct HandlerContext<'a> {
    pub meta: InvocationMeta,

    /// Shared run variables; handlers may mutate them directly.
    pub variables: &'a mut Variables,

    /// Outputs recorded so far.
    pub refs: References<'a>,

    /// The run's event log (handlers emit `artifact` and `note` records).
    pub events: &'a mut dyn EventSink,
    pub config: &'a AmbientConfig,

    /// Resolved parameters; assignments only, and only when a parameter
    /// configuration was supplied.
    pub params: Option<Value>,

    /// Call arguments; functions only.
    pub args: Option<CallArgs>,
}

/// What a handler hands back.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HandlerResult {
    pub output: Option<Value>,
    pub artifacts: Option<IndexMap<String, String>>,
    pub vars: Option<Variables>,
    pub notes: Vec<String>,
}

impl HandlerResult {
    pub fn with_output(output: Value) -> Self {
        Self {
            output: Some(output),
            ..Self::default()
        }
    }
}
