//! SF-001: Core types — plans, actions, diagnostics, parameter overlays,
//! fixtures, run events, and run outcomes.
//!
//! Everything that crosses a module boundary lives here. Plan types are
//! execution-mode independent; run events are what the event log persists.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dynamic value carried by variables, outputs, fixtures, and parameters.
pub type Value = serde_json::Value;

/// Plain-object tree used by parameter overlays.
pub type Object = serde_json::Map<String, Value>;

/// Flat variable namespace (insertion-ordered for stable diagnostics).
pub type Variables = IndexMap<String, Value>;

// ============================================================================
// Plan
// ============================================================================

/// Compiled plan: ordered steps plus everything the compiler noticed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
    pub steps: Vec<Step>,
    pub warnings: Vec<Diagnostic>,
    pub errors: Vec<Diagnostic>,

    /// Compile-pass variable namespace, including simulated function results.
    /// Never seeds real execution.
    #[serde(skip)]
    pub variables: Variables,
}

impl Plan {
    /// Total number of actions across all steps.
    pub fn action_count(&self) -> usize {
        self.steps.iter().map(|s| s.actions.len()).sum()
    }

    /// Iterate every action in execution order.
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.steps.iter().flat_map(|s| s.actions.iter())
    }
}

/// A named block of the script. Ids are not deduplicated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,

    /// First line of the step (the `###` header), 1-based, absolute.
    pub line_start: usize,

    /// Last line belonging to the step, 1-based, absolute.
    pub line_end: usize,

    pub actions: Vec<Action>,
}

/// One compiled unit of work.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Action {
    Assignment(AssignmentAction),
    Function(FunctionCall),
}

impl Action {
    pub fn step_id(&self) -> &str {
        match self {
            Self::Assignment(a) => &a.step_id,
            Self::Function(f) => &f.step_id,
        }
    }

    /// Handler identifier: the assignment id or the function name.
    pub fn action_id(&self) -> &str {
        match self {
            Self::Assignment(a) => &a.assignment_id,
            Self::Function(f) => &f.function_name,
        }
    }

    pub fn line(&self) -> usize {
        match self {
            Self::Assignment(a) => a.line,
            Self::Function(f) => f.line,
        }
    }

    /// Key under which a real run records this action's output.
    pub fn output_key(&self) -> String {
        output_key(self.step_id(), self.action_id())
    }

    pub fn kind(&self) -> HandlerKind {
        match self {
            Self::Assignment(_) => HandlerKind::Assignment,
            Self::Function(_) => HandlerKind::Function,
        }
    }
}

/// Composite `#step.action` key.
pub fn output_key(step_id: &str, action_id: &str) -> String {
    format!("#{}.{}", step_id, action_id)
}

/// "Assign the agent the `<id>` assignment".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentAction {
    pub step_id: String,
    pub assignment_id: String,
    pub output_key: String,
    pub line: usize,
}

/// `$var = func(args)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    pub step_id: String,
    pub function_name: String,

    /// Variable the call assigns to.
    pub target: String,

    pub args: CallArgs,
    pub line: usize,

    /// Fixture hit recorded at compile time (dry-run replay only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulated_output: Option<Value>,
}

/// Parsed call arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallArgs {
    /// First `#step[.action]` token found in the argument text.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    /// Raw argument text between the parentheses.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw: String,
}

/// Compile warning or error, anchored to a source line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub step_id: String,
    pub message: String,
    pub line: usize,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} (line {})", self.step_id, self.message, self.line)
    }
}

// ============================================================================
// Inputs
// ============================================================================

/// Four-tier parameter overlays. Precedence, lowest first:
/// defaults < assignments[id] < steps[step] < actions["#step.id"].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterConfig {
    #[serde(default)]
    pub defaults: Object,

    #[serde(default)]
    pub assignments: IndexMap<String, Object>,

    #[serde(default)]
    pub steps: IndexMap<String, Object>,

    #[serde(default)]
    pub actions: IndexMap<String, Object>,
}

/// Wildcard fixture key matching any (or no) reference.
pub const FIXTURE_WILDCARD: &str = "*";

/// function name → reference (or `*`) → simulated value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fixtures(pub IndexMap<String, IndexMap<String, Value>>);

impl Fixtures {
    /// Exact reference first, then the wildcard.
    pub fn lookup(&self, function: &str, reference: Option<&str>) -> Option<&Value> {
        let table = self.0.get(function)?;
        reference
            .and_then(|r| table.get(r))
            .or_else(|| table.get(FIXTURE_WILDCARD))
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Which handler namespace an action resolves in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Assignment,
    Function,
}

impl HandlerKind {
    /// Subdirectory name used by directory roots.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Assignment => "assignments",
            Self::Function => "functions",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assignment => write!(f, "assignment"),
            Self::Function => write!(f, "function"),
        }
    }
}

// ============================================================================
// Run events
// ============================================================================

/// Completion status of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    DryRun,
    Real,
}

/// Event record for the JSONL event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        workflow: String,
        mode: RunMode,
        fingerprint: String,
    },
    AssignmentStart {
        step: String,
        action: String,
        output_key: String,
    },
    AssignmentEnd {
        step: String,
        action: String,
        output_key: String,
        status: Status,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artifacts: Option<IndexMap<String, String>>,
    },
    FunctionStart {
        step: String,
        action: String,
        args: CallArgs,
    },
    FunctionEnd {
        step: String,
        action: String,
        status: Status,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },
    /// Dry-run replay of an assignment.
    Assignment {
        step: String,
        action: String,
        output_key: String,
    },
    /// Dry-run replay of a function call.
    Function {
        step: String,
        action: String,
        args: CallArgs,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        simulated_output: Option<Value>,
    },
    Warning {
        step: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line: Option<usize>,
    },
    Error {
        step: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line: Option<usize>,
    },
    /// Free-form handler note.
    Note {
        step: String,
        action: String,
        message: String,
    },
    /// Handler-produced file.
    Artifact {
        step: String,
        action: String,
        path: String,
    },
    RunCompleted {
        run_id: String,
        status: Status,
        actions_ok: u32,
        duration_ms: u64,
    },
}

impl RunEvent {
    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run-started",
            Self::AssignmentStart { .. } => "assignment-start",
            Self::AssignmentEnd { .. } => "assignment-end",
            Self::FunctionStart { .. } => "function-start",
            Self::FunctionEnd { .. } => "function-end",
            Self::Assignment { .. } => "assignment",
            Self::Function { .. } => "function",
            Self::Warning { .. } => "warning",
            Self::Error { .. } => "error",
            Self::Note { .. } => "note",
            Self::Artifact { .. } => "artifact",
            Self::RunCompleted { .. } => "run-completed",
        }
    }

    /// Step id, when the event is tied to one.
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::AssignmentStart { step, .. }
            | Self::AssignmentEnd { step, .. }
            | Self::FunctionStart { step, .. }
            | Self::FunctionEnd { step, .. }
            | Self::Assignment { step, .. }
            | Self::Function { step, .. }
            | Self::Warning { step, .. }
            | Self::Error { step, .. }
            | Self::Note { step, .. }
            | Self::Artifact { step, .. } => Some(step),
            Self::RunStarted { .. } | Self::RunCompleted { .. } => None,
        }
    }

    /// Action id, when the event is tied to one.
    pub fn action(&self) -> Option<&str> {
        match self {
            Self::AssignmentStart { action, .. }
            | Self::AssignmentEnd { action, .. }
            | Self::FunctionStart { action, .. }
            | Self::FunctionEnd { action, .. }
            | Self::Assignment { action, .. }
            | Self::Function { action, .. }
            | Self::Note { action, .. }
            | Self::Artifact { action, .. } => Some(action),
            _ => None,
        }
    }
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub timestamp: String,
    #[serde(flatten)]
    pub event: RunEvent,
}

// ============================================================================
// Run outcome
// ============================================================================

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub mode: RunMode,
    pub actions_ok: u32,
    pub total_duration: std::time::Duration,
}

/// Why a run did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("{} compile error(s)", .errors.len())]
    Compile { errors: Vec<Diagnostic> },

    #[error("No \"## {section}\" section found in workflow file")]
    NoScriptSection { section: String },

    #[error("missing {kind} handler: {name}")]
    HandlerMissing { kind: HandlerKind, name: String },

    #[error("{kind} handler failed for {name}: {message}")]
    HandlerFailed {
        kind: HandlerKind,
        name: String,
        message: String,
    },

    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Io(String),
}

impl RunError {
    /// Process exit code: 2 for compile errors, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Compile { .. } => 2,
            _ => 1,
        }
    }
}

// ============================================================================
// Value helpers
// ============================================================================

/// Stringify a value for text interpolation: strings verbatim, everything
/// else (null included) as compact JSON.
pub fn value_to_string(val: &Value) -> String {
    match val {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
