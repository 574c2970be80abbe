//! SF-008: Execution engine.
//!
//! Walks a compiled plan in document order. Dry runs replay the plan into
//! the event log; real runs resolve each action to a handler and invoke it:
//! start event → lookup → parameter resolution → invoke → record output and
//! merge vars → end event. The first missing or failing handler ends the run
//! with an `error` record and an end record with status `error`; no later
//! action starts.

use super::environment::{Environment, References};
use super::resolver;
use super::types::*;
use crate::handlers::{AmbientConfig, HandlerContext, HandlerResult, InvocationMeta, Registry};
use crate::provenance::eventlog::generate_run_id;
use crate::provenance::EventSink;
use std::time::Instant;

/// Inputs for one run besides the plan and the event sink.
pub struct RunConfig<'a> {
    pub workflow: &'a str,

    /// Document fingerprint recorded in `run-started`.
    pub fingerprint: &'a str,
    pub mode: RunMode,
    pub strict: bool,
    pub params: Option<&'a ParameterConfig>,
    pub registry: &'a Registry,
    pub ambient: &'a AmbientConfig,
}

/// Execute (or replay) a plan.
pub async fn run(
    plan: &Plan,
    cfg: &RunConfig<'_>,
    events: &mut dyn EventSink,
) -> Result<RunSummary, RunError> {
    if cfg.strict && !plan.errors.is_empty() {
        return Err(RunError::Compile {
            errors: plan.errors.clone(),
        });
    }

    let start = Instant::now();
    let run_id = generate_run_id();
    tracing::info!(run_id = %run_id, workflow = cfg.workflow, mode = ?cfg.mode, "run started");

    emit(
        events,
        RunEvent::RunStarted {
            run_id: run_id.clone(),
            workflow: cfg.workflow.to_string(),
            mode: cfg.mode,
            fingerprint: cfg.fingerprint.to_string(),
        },
    )?;
    for w in &plan.warnings {
        emit(
            events,
            RunEvent::Warning {
                step: w.step_id.clone(),
                message: w.message.clone(),
                line: Some(w.line),
            },
        )?;
    }
    for e in &plan.errors {
        emit(
            events,
            RunEvent::Error {
                step: e.step_id.clone(),
                message: e.message.clone(),
                line: Some(e.line),
            },
        )?;
    }

    let outcome = match cfg.mode {
        RunMode::DryRun => replay(plan, events),
        RunMode::Real => execute(plan, cfg, &run_id, events).await,
    };

    let (status, actions_ok) = match &outcome {
        Ok(n) => (Status::Ok, *n),
        Err((_, n)) => (Status::Error, *n),
    };
    emit(
        events,
        RunEvent::RunCompleted {
            run_id: run_id.clone(),
            status,
            actions_ok,
            duration_ms: millis(start),
        },
    )?;
    events.flush().map_err(RunError::Io)?;

    match outcome {
        Ok(actions_ok) => {
            tracing::info!(run_id = %run_id, actions_ok, "run completed");
            Ok(RunSummary {
                run_id,
                mode: cfg.mode,
                actions_ok,
                total_duration: start.elapsed(),
            })
        }
        Err((err, _)) => Err(err),
    }
}

/// Error plus the number of actions that completed before it.
type Aborted = (RunError, u32);

fn replay(plan: &Plan, events: &mut dyn EventSink) -> Result<u32, Aborted> {
    let mut replayed = 0;
    for action in plan.actions() {
        let event = match action {
            Action::Assignment(a) => RunEvent::Assignment {
                step: a.step_id.clone(),
                action: a.assignment_id.clone(),
                output_key: a.output_key.clone(),
            },
            Action::Function(f) => RunEvent::Function {
                step: f.step_id.clone(),
                action: f.function_name.clone(),
                args: f.args.clone(),
                simulated_output: f.simulated_output.clone(),
            },
        };
        emit(events, event).map_err(|e| (e, replayed))?;
        replayed += 1;
    }
    Ok(replayed)
}

async fn execute(
    plan: &Plan,
    cfg: &RunConfig<'_>,
    run_id: &str,
    events: &mut dyn EventSink,
) -> Result<u32, Aborted> {
    let mut env = Environment::new();
    let mut completed = 0;
    for action in plan.actions() {
        let result = match action {
            Action::Assignment(a) => run_assignment(a, cfg, run_id, &mut env, events).await,
            Action::Function(f) => run_function(f, cfg, run_id, &mut env, events).await,
        };
        result.map_err(|e| (e, completed))?;
        completed += 1;
    }
    Ok(completed)
}

async fn run_assignment(
    a: &AssignmentAction,
    cfg: &RunConfig<'_>,
    run_id: &str,
    env: &mut Environment,
    events: &mut dyn EventSink,
) -> Result<(), RunError> {
    emit(
        events,
        RunEvent::AssignmentStart {
            step: a.step_id.clone(),
            action: a.assignment_id.clone(),
            output_key: a.output_key.clone(),
        },
    )?;
    let started = Instant::now();
    let end = |status, artifacts| RunEvent::AssignmentEnd {
        step: a.step_id.clone(),
        action: a.assignment_id.clone(),
        output_key: a.output_key.clone(),
        status,
        duration_ms: millis(started),
        artifacts,
    };

    let Some(handler) = cfg.registry.lookup(HandlerKind::Assignment, &a.assignment_id) else {
        let err = RunError::HandlerMissing {
            kind: HandlerKind::Assignment,
            name: a.assignment_id.clone(),
        };
        return fail(events, &a.step_id, a.line, err, end(Status::Error, None));
    };

    let params = resolver::resolve_params(
        cfg.params,
        &a.step_id,
        &a.assignment_id,
        &env.references(),
    );
    let invoked = {
        let mut ctx = HandlerContext {
            meta: meta(&a.step_id, &a.assignment_id, a.line, run_id),
            variables: &mut env.variables,
            refs: References::new(&env.outputs),
            events: &mut *events,
            config: cfg.ambient,
            params,
            args: None,
        };
        handler.invoke(&mut ctx).await
    };

    match invoked {
        Ok(result) => {
            let HandlerResult {
                output,
                artifacts,
                vars,
                notes,
            } = result;
            emit_notes(events, &a.step_id, &a.assignment_id, notes)?;
            env.record_output(
                output_key(&a.step_id, &a.assignment_id),
                output.unwrap_or(Value::Null),
            );
            if let Some(vars) = vars {
                env.merge_variables(vars);
            }
            emit(events, end(Status::Ok, artifacts))
        }
        Err(message) => {
            let err = RunError::HandlerFailed {
                kind: HandlerKind::Assignment,
                name: a.assignment_id.clone(),
                message,
            };
            fail(events, &a.step_id, a.line, err, end(Status::Error, None))
        }
    }
}

async fn run_function(
    f: &FunctionCall,
    cfg: &RunConfig<'_>,
    run_id: &str,
    env: &mut Environment,
    events: &mut dyn EventSink,
) -> Result<(), RunError> {
    emit(
        events,
        RunEvent::FunctionStart {
            step: f.step_id.clone(),
            action: f.function_name.clone(),
            args: f.args.clone(),
        },
    )?;
    let started = Instant::now();
    let end = |status, output| RunEvent::FunctionEnd {
        step: f.step_id.clone(),
        action: f.function_name.clone(),
        status,
        duration_ms: millis(started),
        output,
    };

    let Some(handler) = cfg.registry.lookup(HandlerKind::Function, &f.function_name) else {
        let err = RunError::HandlerMissing {
            kind: HandlerKind::Function,
            name: f.function_name.clone(),
        };
        return fail(events, &f.step_id, f.line, err, end(Status::Error, None));
    };

    let invoked = {
        let mut ctx = HandlerContext {
            meta: meta(&f.step_id, &f.function_name, f.line, run_id),
            variables: &mut env.variables,
            refs: References::new(&env.outputs),
            events: &mut *events,
            config: cfg.ambient,
            params: None,
            args: Some(f.args.clone()),
        };
        handler.invoke(&mut ctx).await
    };

    match invoked {
        Ok(result) => {
            let HandlerResult {
                output,
                vars,
                notes,
                ..
            } = result;
            emit_notes(events, &f.step_id, &f.function_name, notes)?;
            if let Some(ref value) = output {
                env.variables.insert(f.target.clone(), value.clone());
            }
            env.record_output(
                output_key(&f.step_id, &f.function_name),
                output.clone().unwrap_or(Value::Null),
            );
            if let Some(vars) = vars {
                env.merge_variables(vars);
            }
            emit(events, end(Status::Ok, output))
        }
        Err(message) => {
            let err = RunError::HandlerFailed {
                kind: HandlerKind::Function,
                name: f.function_name.clone(),
                message,
            };
            fail(events, &f.step_id, f.line, err, end(Status::Error, None))
        }
    }
}

/// Record a handler failure and its end event, then hand back the error.
fn fail(
    events: &mut dyn EventSink,
    step: &str,
    line: usize,
    err: RunError,
    end: RunEvent,
) -> Result<(), RunError> {
    emit(
        events,
        RunEvent::Error {
            step: step.to_string(),
            message: err.to_string(),
            line: Some(line),
        },
    )?;
    emit(events, end)?;
    Err(err)
}

fn emit_notes(
    events: &mut dyn EventSink,
    step: &str,
    action: &str,
    notes: Vec<String>,
) -> Result<(), RunError> {
    for message in notes {
        emit(
            events,
            RunEvent::Note {
                step: step.to_string(),
                action: action.to_string(),
                message,
            },
        )?;
    }
    Ok(())
}

fn emit(events: &mut dyn EventSink, event: RunEvent) -> Result<(), RunError> {
    events.emit(event).map_err(RunError::Io)
}

fn meta(step_id: &str, action_id: &str, line: usize, run_id: &str) -> InvocationMeta {
    InvocationMeta {
        step_id: step_id.to_string(),
        action_id: action_id.to_string(),
        line,
        run_id: run_id.to_string(),
    }
}

fn millis(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::compiler::{compile, CompileOptions};
    use crate::core::extractor::{extract_section, DEFAULT_SECTION};
    use crate::handlers::registry::BuiltinRoot;
    use crate::handlers::{Handler, HandlerRoot};
    use crate::provenance::EventLog;
    use async_trait::async_trait;
    use indexmap::IndexMap;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// What a handler saw when it was invoked.
    #[derive(Debug, Clone)]
    struct Seen {
        action: String,
        params: Option<Value>,
        variables: Variables,
        outputs: IndexMap<String, Value>,
    }

    type Journal = Arc<Mutex<Vec<Seen>>>;

    struct Recording {
        journal: Journal,
        reply: Result<HandlerResult, String>,
    }

    #[async_trait]
    impl Handler for Recording {
        async fn invoke(&self, ctx: &mut HandlerContext<'_>) -> Result<HandlerResult, String> {
            self.journal.lock().unwrap().push(Seen {
                action: ctx.meta.action_id.clone(),
                params: ctx.params.clone(),
                variables: ctx.variables.clone(),
                outputs: ctx.refs.outputs().clone(),
            });
            self.reply.clone()
        }
    }

    struct Fixture {
        journal: Journal,
        root: BuiltinRoot,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                journal: Arc::default(),
                root: BuiltinRoot::new(),
            }
        }

        fn reply(mut self, kind: HandlerKind, name: &str, reply: Result<HandlerResult, String>) -> Self {
            let handler = Recording {
                journal: self.journal.clone(),
                reply,
            };
            self.root.register(kind, name, Arc::new(handler));
            self
        }

        fn ok(self, name: &str, output: Value) -> Self {
            self.reply(HandlerKind::Assignment, name, Ok(HandlerResult::with_output(output)))
        }

        fn registry(self) -> (Registry, Journal) {
            (
                Registry::new().with_root(HandlerRoot::Builtin(self.root)),
                self.journal,
            )
        }
    }

    fn plan_of(doc: &str, fixtures: Option<&Fixtures>, strict: bool) -> Plan {
        let section = extract_section(doc, DEFAULT_SECTION);
        compile(&section, &CompileOptions { fixtures, strict })
    }

    async fn run_plan(
        plan: &Plan,
        registry: &Registry,
        mode: RunMode,
        strict: bool,
        params: Option<&ParameterConfig>,
    ) -> (Result<RunSummary, RunError>, EventLog) {
        let ambient = AmbientConfig::default();
        let cfg = RunConfig {
            workflow: "wf",
            fingerprint: "blake3:test",
            mode,
            strict,
            params,
            registry,
            ambient: &ambient,
        };
        let mut log = EventLog::memory(false);
        let result = run(plan, &cfg, &mut log).await;
        (result, log)
    }

    const TWO_STEPS: &str = "## Script\n### s1\n- assign the agent the `a` assignment\n### s2\n- assign the agent the `b` assignment\n- assign the agent the `c` assignment\n";

    #[tokio::test]
    async fn test_sf008_strict_errors_abort_before_any_event() {
        let plan = plan_of("## Script\n### s\n$x = f(#a.b)\n", None, true);
        assert_eq!(plan.errors.len(), 1);
        let (registry, journal) = Fixture::new().registry();
        let (result, log) = run_plan(&plan, &registry, RunMode::Real, true, None).await;
        let err = result.unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(log.records().is_empty());
        assert!(journal.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sf008_dry_run_replays_after_warnings() {
        let fixtures: Fixtures =
            serde_json::from_value(json!({ "list": { "*": ["p", "q"] } })).unwrap();
        let doc = "## Script\n### s\n$items = list(#s.x)\nFor each $i in $missing\n- assign the agent the `never` assignment\n\nFor each $i in $items\n- assign the agent the `$i` assignment\n";
        let plan = plan_of(doc, Some(&fixtures), false);
        let (registry, journal) = Fixture::new().registry();
        let (result, log) = run_plan(&plan, &registry, RunMode::DryRun, false, None).await;

        let summary = result.unwrap();
        assert_eq!(summary.mode, RunMode::DryRun);
        assert_eq!(summary.actions_ok, 3);
        assert_eq!(
            log.kinds(),
            vec!["run-started", "warning", "function", "assignment", "assignment", "run-completed"]
        );
        match &log.records()[2].event {
            RunEvent::Function {
                simulated_output, ..
            } => assert_eq!(simulated_output, &Some(json!(["p", "q"]))),
            other => panic!("unexpected {:?}", other),
        }
        assert!(journal.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sf008_dry_run_ignores_missing_handlers() {
        let plan = plan_of(TWO_STEPS, None, false);
        let (registry, _) = Fixture::new().registry();
        let (result, _) = run_plan(&plan, &registry, RunMode::DryRun, false, None).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_sf008_real_run_event_order() {
        let plan = plan_of(TWO_STEPS, None, false);
        let (registry, journal) = Fixture::new()
            .ok("a", json!(1))
            .ok("b", json!(2))
            .ok("c", json!(3))
            .registry();
        let (result, log) = run_plan(&plan, &registry, RunMode::Real, false, None).await;

        assert_eq!(result.unwrap().actions_ok, 3);
        assert_eq!(
            log.kinds(),
            vec![
                "run-started",
                "assignment-start",
                "assignment-end",
                "assignment-start",
                "assignment-end",
                "assignment-start",
                "assignment-end",
                "run-completed"
            ]
        );
        let seen = journal.lock().unwrap();
        let order: Vec<_> = seen.iter().map(|s| s.action.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(seen[2].outputs["#s1.a"], json!(1));
        assert_eq!(seen[2].outputs["#s2.b"], json!(2));
    }

    #[tokio::test]
    async fn test_sf008_failure_aborts_run() {
        let plan = plan_of(TWO_STEPS, None, false);
        let (registry, journal) = Fixture::new()
            .ok("a", json!(1))
            .reply(HandlerKind::Assignment, "b", Err("boom".to_string()))
            .ok("c", json!(3))
            .registry();
        let (result, log) = run_plan(&plan, &registry, RunMode::Real, false, None).await;

        match result.unwrap_err() {
            RunError::HandlerFailed { name, message, .. } => {
                assert_eq!(name, "b");
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(journal.lock().unwrap().len(), 2);
        assert_eq!(
            log.kinds(),
            vec![
                "run-started",
                "assignment-start",
                "assignment-end",
                "assignment-start",
                "error",
                "assignment-end",
                "run-completed"
            ]
        );
        match &log.records()[5].event {
            RunEvent::AssignmentEnd { status, action, .. } => {
                assert_eq!(*status, Status::Error);
                assert_eq!(action, "b");
            }
            other => panic!("unexpected {:?}", other),
        }
        match &log.records()[6].event {
            RunEvent::RunCompleted {
                status, actions_ok, ..
            } => {
                assert_eq!(*status, Status::Error);
                assert_eq!(*actions_ok, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sf008_missing_handler_fails() {
        let plan = plan_of(TWO_STEPS, None, false);
        let (registry, _) = Fixture::new().ok("a", json!(1)).registry();
        let (result, log) = run_plan(&plan, &registry, RunMode::Real, false, None).await;

        let err = result.unwrap_err();
        assert!(matches!(err, RunError::HandlerMissing { ref name, .. } if name == "b"));
        assert_eq!(err.exit_code(), 1);
        match &log.records()[4].event {
            RunEvent::Error { step, message, line } => {
                assert_eq!(step, "s2");
                assert!(message.contains("missing assignment handler: b"));
                assert_eq!(*line, Some(5));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!log
            .records()
            .iter()
            .any(|r| r.event.action() == Some("c")));
    }

    #[tokio::test]
    async fn test_sf008_params_resolve_against_prior_outputs() {
        let plan = plan_of(TWO_STEPS, None, false);
        let params: ParameterConfig = serde_json::from_value(json!({
            "defaults": { "owner": "team" },
            "actions": { "#s2.b": { "source": "${#s1.a.path}", "label": "from ${#s1.a.path}" } }
        }))
        .unwrap();
        let (registry, journal) = Fixture::new()
            .ok("a", json!({ "path": "/tmp/plan.md" }))
            .ok("b", json!(null))
            .ok("c", json!(null))
            .registry();
        let (result, _) = run_plan(&plan, &registry, RunMode::Real, false, Some(&params)).await;
        assert!(result.is_ok());

        let seen = journal.lock().unwrap();
        assert_eq!(seen[0].params, Some(json!({ "owner": "team" })));
        assert_eq!(
            seen[1].params,
            Some(json!({ "owner": "team", "source": "/tmp/plan.md", "label": "from /tmp/plan.md" }))
        );
    }

    #[tokio::test]
    async fn test_sf008_no_param_config_means_no_params() {
        let plan = plan_of(TWO_STEPS, None, false);
        let (registry, journal) = Fixture::new()
            .ok("a", json!(1))
            .ok("b", json!(1))
            .ok("c", json!(1))
            .registry();
        run_plan(&plan, &registry, RunMode::Real, false, None)
            .await
            .0
            .unwrap();
        assert!(journal.lock().unwrap().iter().all(|s| s.params.is_none()));
    }

    #[tokio::test]
    async fn test_sf008_function_binds_target_and_vars() {
        let doc = "## Script\n### s\n$issues = list(#s.x)\n- assign the agent the `after` assignment\n";
        let plan = plan_of(doc, None, false);
        let mut vars = Variables::new();
        vars.insert("lastFunction".into(), json!("list"));
        let reply = HandlerResult {
            output: Some(json!(["i1"])),
            vars: Some(vars),
            notes: vec!["fetched".into()],
            ..HandlerResult::default()
        };
        let (registry, journal) = Fixture::new()
            .reply(HandlerKind::Function, "list", Ok(reply))
            .ok("after", json!(null))
            .registry();
        let (result, log) = run_plan(&plan, &registry, RunMode::Real, false, None).await;
        assert!(result.is_ok());

        let seen = journal.lock().unwrap();
        assert_eq!(seen[1].variables["issues"], json!(["i1"]));
        assert_eq!(seen[1].variables["lastFunction"], json!("list"));
        assert_eq!(seen[1].outputs["#s.list"], json!(["i1"]));
        assert!(log.kinds().contains(&"note"));
        let end = log
            .records()
            .iter()
            .find(|r| r.event.kind() == "function-end")
            .unwrap();
        match &end.event {
            RunEvent::FunctionEnd { output, status, .. } => {
                assert_eq!(*status, Status::Ok);
                assert_eq!(output, &Some(json!(["i1"])));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sf008_missing_output_recorded_as_null() {
        let plan = plan_of(TWO_STEPS, None, false);
        let (registry, journal) = Fixture::new()
            .reply(HandlerKind::Assignment, "a", Ok(HandlerResult::default()))
            .ok("b", json!(1))
            .ok("c", json!(1))
            .registry();
        run_plan(&plan, &registry, RunMode::Real, false, None)
            .await
            .0
            .unwrap();
        assert_eq!(journal.lock().unwrap()[1].outputs["#s1.a"], Value::Null);
    }

    #[tokio::test]
    async fn test_sf008_non_strict_errors_logged_and_run_continues() {
        let doc = "## Script\n### s\n$xs = [\n  a\n### t\n- assign the agent the `a` assignment\n";
        let plan = plan_of(doc, None, false);
        assert_eq!(plan.errors.len(), 1);
        let (registry, _) = Fixture::new().ok("a", json!(1)).registry();
        let (result, log) = run_plan(&plan, &registry, RunMode::Real, false, None).await;
        assert!(result.is_ok());
        assert_eq!(log.kinds()[1], "error");
        assert_eq!(log.kinds()[2], "assignment-start");
    }

    #[tokio::test]
    async fn test_sf008_duplicate_step_outputs_last_write_wins() {
        let doc = "## Script\n### s\n- assign the agent the `a` assignment\n### s\n- assign the agent the `a` assignment\n- assign the agent the `inspect` assignment\n";
        let plan = plan_of(doc, None, false);
        let (registry, journal) = Fixture::new()
            .ok("a", json!("same"))
            .ok("inspect", json!(null))
            .registry();
        run_plan(&plan, &registry, RunMode::Real, false, None)
            .await
            .0
            .unwrap();
        let seen = journal.lock().unwrap();
        assert_eq!(seen[2].outputs.len(), 1);
    }

    #[tokio::test]
    async fn test_sf008_run_started_carries_identity() {
        let plan = plan_of(TWO_STEPS, None, false);
        let (registry, _) = Fixture::new().registry();
        let (result, log) = run_plan(&plan, &registry, RunMode::DryRun, false, None).await;
        let summary = result.unwrap();
        match &log.records()[0].event {
            RunEvent::RunStarted {
                run_id,
                workflow,
                fingerprint,
                mode,
            } => {
                assert_eq!(run_id, &summary.run_id);
                assert_eq!(workflow, "wf");
                assert_eq!(fingerprint, "blake3:test");
                assert_eq!(*mode, RunMode::DryRun);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
