//! SF-015: Built-in handler library.
//!
//! Assignment handlers render a markdown report to
//! `<work_dir>/logs/real-mode/<step>.<action>.<suffix>.md`, emit an
//! `artifact` event, and return `{output: {path, ...}, artifacts: {<suffix>: path}}`.

use super::{Handler, HandlerContext, HandlerResult, InvocationMeta};
use crate::core::types::{value_to_string, HandlerKind, Object, RunEvent, Value, Variables};
use crate::provenance::eventlog::now_iso8601;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

/// Report body plus the extra output fields it contributes.
struct Report {
    body: String,
    output: Object,
}

type Render = fn(&InvocationMeta, &Params<'_>) -> Report;

/// Assignment that writes a markdown report.
pub struct ReportHandler {
    suffix: &'static str,
    render: Render,
}

#[async_trait]
impl Handler for ReportHandler {
    async fn invoke(&self, ctx: &mut HandlerContext<'_>) -> Result<HandlerResult, String> {
        let dir = ctx.config.work_dir.join("logs").join("real-mode");
        std::fs::create_dir_all(&dir)
            .map_err(|e| format!("cannot create {}: {}", dir.display(), e))?;
        let path: PathBuf = dir.join(format!(
            "{}.{}.{}.md",
            ctx.meta.step_id, ctx.meta.action_id, self.suffix
        ));

        let report = (self.render)(&ctx.meta, &Params(ctx.params.as_ref()));
        std::fs::write(&path, &report.body)
            .map_err(|e| format!("cannot write {}: {}", path.display(), e))?;

        let path_str = path.display().to_string();
        ctx.events.emit(RunEvent::Artifact {
            step: ctx.meta.step_id.clone(),
            action: ctx.meta.action_id.clone(),
            path: path_str.clone(),
        })?;

        let mut output = Object::new();
        output.insert("path".to_string(), Value::String(path_str.clone()));
        output.extend(report.output);
        let mut artifacts = IndexMap::new();
        artifacts.insert(self.suffix.to_string(), path_str);

        Ok(HandlerResult {
            output: Some(Value::Object(output)),
            artifacts: Some(artifacts),
            ..HandlerResult::default()
        })
    }
}

/// Read-only view over resolved parameters.
struct Params<'a>(Option<&'a Value>);

impl Params<'_> {
    fn get(&self, key: &str) -> Option<&Value> {
        self.0.and_then(|p| p.get(key)).filter(|v| truthy(v))
    }

    fn str_or(&self, key: &str, default: &str) -> String {
        self.get(key)
            .map(value_to_string)
            .unwrap_or_else(|| default.to_string())
    }

    fn list(&self, key: &str) -> Option<Vec<Value>> {
        match self.0.and_then(|p| p.get(key)) {
            Some(Value::Array(items)) => Some(items.clone()),
            _ => None,
        }
    }

    fn list_or(&self, key: &str, default: &[&str]) -> Vec<Value> {
        self.list(key)
            .unwrap_or_else(|| default.iter().map(|s| json!(s)).collect())
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

fn header(title: &str, meta: &InvocationMeta, dated: bool) -> Vec<String> {
    let mut lines = vec![
        format!("# {}", title),
        String::new(),
        format!("- Step: {}", meta.step_id),
        format!("- Action: {}", meta.action_id),
    ];
    if dated {
        lines.push(format!("- Date: {}", now_iso8601()));
    }
    lines.push(String::new());
    lines
}

fn bullets(lines: &mut Vec<String>, items: &[Value]) {
    lines.extend(items.iter().map(|i| format!("- {}", value_to_string(i))));
}

fn fields(pairs: Vec<(&str, Value)>) -> Object {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn render_app_plan(meta: &InvocationMeta, _: &Params<'_>) -> Report {
    let body = format!(
        "# App Plan\n\n- Goal: draft plan for step {}\n- Action: {}\n- Date: {}\n\nSections to complete:\n- Scope\n- Milestones\n- Risks\n- Open Questions\n",
        meta.step_id,
        meta.action_id,
        now_iso8601()
    );
    Report {
        body,
        output: fields(vec![("summary", json!("App plan draft created"))]),
    }
}

fn render_repository(meta: &InvocationMeta, params: &Params<'_>) -> Report {
    let repo_name = params.str_or("repoName", "example-repo");
    let owner = params.str_or("owner", "example-owner");
    let docs = params.list("docs").unwrap_or_default();

    let mut lines = header("Repository Initialization Plan", meta, true);
    lines.push(format!("- Owner: {}", owner));
    lines.push(format!("- Repository: {}", repo_name));
    lines.push(format!("- Visibility: {}", params.str_or("visibility", "public")));
    lines.push(format!("- License: {}", params.str_or("license", "AGPL-3.0")));
    lines.push(String::new());
    lines.push("## Documents to copy to docs/".to_string());
    if docs.is_empty() {
        lines.push("- (none provided)".to_string());
    } else {
        bullets(&mut lines, &docs);
    }
    lines.push(String::new());
    lines.push("## Actions (simulated)".to_string());
    for action in [
        "Create repo from template",
        "Create project board (Basic Kanban)",
        "Import labels",
        "Create milestones per app plan",
        "Rename devcontainer + workspace files",
    ] {
        lines.push(format!("- {}", action));
    }

    Report {
        body: lines.join("\n"),
        output: fields(vec![("repoName", json!(repo_name)), ("owner", json!(owner))]),
    }
}

fn render_structure(meta: &InvocationMeta, params: &Params<'_>) -> Report {
    let dirs = params.list_or("dirs", &["src", "tests", "docs"]);
    let files = match params.0.and_then(|p| p.get("files")) {
        Some(Value::Object(map)) => map.clone(),
        _ => fields(vec![("README.md", json!("# Project\n"))]),
    };

    let mut lines = header("Project Structure Plan", meta, true);
    lines.push("## Directories".to_string());
    bullets(&mut lines, &dirs);
    lines.push(String::new());
    lines.push("## Files".to_string());
    for (name, content) in &files {
        lines.push(format!(
            "- {} ({} chars)",
            name,
            value_to_string(content).chars().count()
        ));
    }
    lines.push(String::new());
    if let Some(notes) = params.get("notes") {
        lines.push("## Notes".to_string());
        lines.push(value_to_string(notes));
        lines.push(String::new());
    }

    Report {
        body: lines.join("\n"),
        output: fields(vec![("dirs", Value::Array(dirs)), ("files", Value::Object(files))]),
    }
}

fn render_test_cases(meta: &InvocationMeta, params: &Params<'_>) -> Report {
    let cases = params.list("cases").unwrap_or_else(|| {
        vec![
            json!({ "name": "Happy path", "steps": ["Do X", "Expect Y"] }),
            json!({ "name": "Edge case", "steps": ["Do A", "Expect B"] }),
        ]
    });

    let mut lines = header("Test Cases", meta, false);
    for case in &cases {
        let name = case.get("name").map(value_to_string).unwrap_or_default();
        lines.push(format!("## {}", name));
        if let Some(Value::Array(steps)) = case.get("steps") {
            bullets(&mut lines, steps);
        }
        lines.push(String::new());
    }

    Report {
        body: lines.join("\n"),
        output: fields(vec![("count", json!(cases.len()))]),
    }
}

fn render_task(meta: &InvocationMeta, params: &Params<'_>) -> Report {
    let title = params.str_or("title", "Task Execution Summary");
    let steps = params.list_or("steps", &["Implement feature", "Run local validation"]);

    let mut lines = header(&title, meta, true);
    lines.push("## Steps Performed".to_string());
    bullets(&mut lines, &steps);
    if let Some(notes) = params.get("notes") {
        lines.push(String::new());
        lines.push("## Notes".to_string());
        lines.push(value_to_string(notes));
    }

    Report {
        body: lines.join("\n"),
        output: fields(vec![("steps", Value::Array(steps))]),
    }
}

fn render_delivery(meta: &InvocationMeta, params: &Params<'_>) -> Report {
    let checklist = params.list_or(
        "checklist",
        &[
            "All acceptance criteria met",
            "Artifacts stored and linked",
            "PR(s) approved and merged",
            "Release notes drafted",
            "Stakeholder sign-off recorded",
        ],
    );

    let mut lines = header("Final Validation and Delivery", meta, false);
    lines.push("## Checklist".to_string());
    lines.extend(
        checklist
            .iter()
            .map(|item| format!("- [x] {}", value_to_string(item))),
    );

    Report {
        body: lines.join("\n"),
        output: fields(vec![("done", json!(true))]),
    }
}

fn render_merge(meta: &InvocationMeta, params: &Params<'_>) -> Report {
    let pr_number = params.get("prNumber").cloned().unwrap_or(json!(1));
    let strategy = params.str_or("strategy", "squash");
    let message = params.str_or("message", "Auto-merged via orchestrator (simulated)");

    let body = format!(
        "# Merge Summary\n\n- Step: {}\n- Action: {}\n- PR: #{}\n- Strategy: {}\n- Message: {}\n- Date: {}\n",
        meta.step_id,
        meta.action_id,
        value_to_string(&pr_number),
        strategy,
        message,
        now_iso8601()
    );
    Report {
        body,
        output: fields(vec![("prNumber", pr_number), ("strategy", json!(strategy))]),
    }
}

/// Returns the referenced prior output when it is a list, else `[]`.
pub struct SubIssuesFromPreviousStep;

#[async_trait]
impl Handler for SubIssuesFromPreviousStep {
    async fn invoke(&self, ctx: &mut HandlerContext<'_>) -> Result<HandlerResult, String> {
        let prior = ctx
            .args
            .as_ref()
            .and_then(|a| a.reference.as_deref())
            .and_then(|r| ctx.refs.get(r));
        let output = match prior {
            Some(list @ Value::Array(_)) => list.clone(),
            _ => Value::Array(Vec::new()),
        };
        let mut vars = Variables::new();
        vars.insert("lastFunction".to_string(), json!(ctx.meta.action_id));
        Ok(HandlerResult {
            output: Some(output),
            vars: Some(vars),
            ..HandlerResult::default()
        })
    }
}

/// Every built-in handler, keyed by kind and name.
pub fn all() -> Vec<(HandlerKind, &'static str, Arc<dyn Handler>)> {
    let reports: [(&'static str, &'static str, Render); 7] = [
        ("create-app-plan", "plan", render_app_plan),
        ("initiate-new-repository", "repo", render_repository),
        ("create-project-structure", "structure", render_structure),
        ("create-test-cases", "tests", render_test_cases),
        ("perform-task", "result", render_task),
        ("validate-and-deliver", "delivery", render_delivery),
        ("pr-approval-and-merge", "merge", render_merge),
    ];

    let mut handlers: Vec<(HandlerKind, &'static str, Arc<dyn Handler>)> = reports
        .into_iter()
        .map(|(name, suffix, render)| {
            let handler: Arc<dyn Handler> = Arc::new(ReportHandler { suffix, render });
            (HandlerKind::Assignment, name, handler)
        })
        .collect();
    handlers.push((
        HandlerKind::Function,
        "get-sub-issues-from-previous-step",
        Arc::new(SubIssuesFromPreviousStep),
    ));
    handlers
}
