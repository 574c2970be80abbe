//! SF-007: Input loading.
//!
//! Locates and reads workflow documents, and parses fixture tables and
//! parameter overlays. Fixture and parameter files are YAML (JSON is
//! accepted as a YAML subset); both are rejected before planning if they
//! do not have the expected shape.

use super::types::*;
use std::path::{Path, PathBuf};

/// A workflow document read from disk.
#[derive(Debug, Clone)]
pub struct WorkflowSource {
    pub path: PathBuf,

    /// `--workflow` name if given, else the file stem.
    pub name: String,
    pub content: String,
}

/// Resolve the document path: `file` wins; otherwise
/// `<workflows_path>/<workflow>.md`, with a relative `workflows_path` taken
/// from `cwd`.
pub fn locate_workflow(
    file: Option<&Path>,
    workflow: Option<&str>,
    workflows_path: &Path,
    cwd: &Path,
) -> Result<PathBuf, String> {
    if let Some(file) = file {
        return Ok(file.to_path_buf());
    }
    let name = workflow.ok_or("specify --workflow <name> or --file <path>")?;
    let base = if workflows_path.is_absolute() {
        workflows_path.to_path_buf()
    } else {
        cwd.join(workflows_path)
    };
    Ok(base.join(format!("{}.md", name)))
}

/// Read a workflow document.
pub fn load_workflow(path: &Path, workflow: Option<&str>) -> Result<WorkflowSource, String> {
    if !path.exists() {
        return Err(format!("workflow file not found: {}", path.display()));
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let name = match workflow {
        Some(w) => w.to_string(),
        None => path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workflow".to_string()),
    };
    Ok(WorkflowSource {
        path: path.to_path_buf(),
        name,
        content,
    })
}

/// Parse a fixture table from a string.
pub fn parse_fixtures(text: &str) -> Result<Fixtures, String> {
    if text.trim().is_empty() {
        return Ok(Fixtures::default());
    }
    serde_yaml_ng::from_str(text).map_err(|e| format!("fixtures parse error: {}", e))
}

/// Parse a fixture file from disk.
pub fn parse_fixtures_file(path: &Path) -> Result<Fixtures, String> {
    let text = read_input(path, "fixtures")?;
    parse_fixtures(&text).map_err(|e| format!("{}: {}", path.display(), e))
}

/// Parse a parameter configuration from a string.
pub fn parse_params(text: &str) -> Result<ParameterConfig, String> {
    if text.trim().is_empty() {
        return Ok(ParameterConfig::default());
    }
    serde_yaml_ng::from_str(text).map_err(|e| format!("params parse error: {}", e))
}

/// Parse a parameter configuration file from disk.
pub fn parse_params_file(path: &Path) -> Result<ParameterConfig, String> {
    let text = read_input(path, "params")?;
    parse_params(&text).map_err(|e| format!("{}: {}", path.display(), e))
}

fn read_input(path: &Path, what: &str) -> Result<String, String> {
    std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {} file {}: {}", what, path.display(), e))
}
