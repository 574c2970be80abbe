//! SF-014: Executable handlers found under directory roots.
//!
//! The invocation context goes to the program as one JSON document on stdin:
//! `{meta, env, outputs, params|args, config}`. The program answers on stdout
//! with `{output?, artifacts?, vars?, notes?}`; empty stdout is an empty
//! result and a non-zero exit status is a failure.

use super::{AmbientConfig, Handler, HandlerContext, HandlerResult, InvocationMeta};
use crate::core::types::{CallArgs, Value, Variables};
use crate::transport::local;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Serialize;
use std::path::{Path, PathBuf};

const STDERR_PREVIEW_CHARS: usize = 2_000;

/// Handler backed by an executable file.
#[derive(Debug, Clone)]
pub struct ScriptHandler {
    path: PathBuf,
}

impl ScriptHandler {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Serialize)]
struct ScriptRequest<'a> {
    meta: &'a InvocationMeta,
    env: &'a Variables,
    outputs: &'a IndexMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<&'a CallArgs>,
    config: &'a AmbientConfig,
}

#[async_trait]
impl Handler for ScriptHandler {
    async fn invoke(&self, ctx: &mut HandlerContext<'_>) -> Result<HandlerResult, String> {
        let request = ScriptRequest {
            meta: &ctx.meta,
            env: ctx.variables,
            outputs: ctx.refs.outputs(),
            params: ctx.params.as_ref(),
            args: ctx.args.as_ref(),
            config: ctx.config,
        };
        let input =
            serde_json::to_string(&request).map_err(|e| format!("JSON serialize error: {}", e))?;

        let program = self.path.clone();
        let work_dir = ctx.config.work_dir.clone();
        let out = tokio::task::spawn_blocking(move || {
            local::exec_program(&program, &input, &work_dir)
        })
        .await
        .map_err(|e| format!("handler task failed: {}", e))??;

        if !out.success() {
            return Err(format!(
                "exit code {}: {}",
                out.exit_code,
                preview(out.stderr.trim(), STDERR_PREVIEW_CHARS)
            ));
        }
        parse_reply(&out.stdout)
    }
}

/// Parse a handler's stdout.
pub fn parse_reply(stdout: &str) -> Result<HandlerResult, String> {
    let body = stdout.trim();
    if body.is_empty() {
        return Ok(HandlerResult::default());
    }
    serde_json::from_str(body).map_err(|e| format!("invalid handler reply: {}", e))
}

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
