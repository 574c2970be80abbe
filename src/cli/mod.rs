//! SF-017: CLI subcommands — init, validate, plan, run.

use crate::core::compiler::{self, CompileOptions};
use crate::core::extractor::{self, DEFAULT_SECTION};
use crate::core::parser::{self, WorkflowSource};
use crate::core::types::*;
use crate::core::executor;
use crate::handlers::registry::parse_exec_paths;
use crate::handlers::{AmbientConfig, Registry};
use crate::provenance::eventlog::dry_run_log_path;
use crate::provenance::{hasher, EventLog};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scaffold an example workflow and an executors/ tree
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Compile a workflow and report diagnostics (exit 2 on compile errors)
    Validate {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Show the compiled plan without executing it
    Plan {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Execute a workflow (or replay it with --dry-run)
    Run {
        #[command(flatten)]
        source: SourceArgs,

        /// Parameter overlays (YAML or JSON)
        #[arg(long)]
        params: Option<PathBuf>,

        /// Event log path (JSONL)
        #[arg(long)]
        log: Option<PathBuf>,

        /// Extra handler directories, `;` or `,` separated
        #[arg(long)]
        exec_paths: Option<String>,

        /// Replay the plan into the log without invoking handlers
        #[arg(long, alias = "dry")]
        dry_run: bool,
    },
}

/// Where the workflow comes from and how to compile it.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Path to the workflow document
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Workflow name, resolved as <workflows-path>/<name>.md
    #[arg(short, long)]
    pub workflow: Option<String>,

    /// Directory holding named workflows
    #[arg(long, default_value = "workflows")]
    pub workflows_path: PathBuf,

    /// Heading of the script section
    #[arg(long, default_value = DEFAULT_SECTION)]
    pub section: String,

    /// Fixture table for simulating function calls (YAML or JSON)
    #[arg(long)]
    pub fixtures: Option<PathBuf>,

    /// Treat undefined loop lists and missing fixtures as errors
    #[arg(long)]
    pub strict: bool,
}

/// Process-level options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Session {
    pub cwd: PathBuf,

    /// Mirror action events to the console.
    pub console: bool,
}

/// Dispatch a CLI command.
pub async fn dispatch(cmd: Commands, session: &Session) -> Result<(), RunError> {
    match cmd {
        Commands::Init { path } => cmd_init(&session.cwd.join(path)),
        Commands::Validate { source } => cmd_validate(&source, session),
        Commands::Plan { source } => cmd_plan(&source, session),
        Commands::Run {
            source,
            params,
            log,
            exec_paths,
            dry_run,
        } => {
            let opts = RunOptions {
                params,
                log,
                exec_paths,
                dry_run,
            };
            cmd_run(&source, &opts, session).await
        }
    }
}

const EXAMPLE_WORKFLOW: &str = r#"# Example Workflow

Draft a plan, work through its sub-issues, then deliver.

## Script

### plan
- assign the agent the `create-app-plan` assignment

### build
$issues = get-sub-issues-from-previous-step(#plan.create-app-plan)
For each $issue in $issues
- assign the agent the `perform-task` assignment
- record output as `#build.$issue`

### deliver
- assign the agent the `validate-and-deliver` assignment

## Notes
Run `scriptflow run -w example --dry-run --fixtures workflows/example.fixtures.yaml`
to preview the unrolled plan.
"#;

const EXAMPLE_FIXTURES: &str = r##"get-sub-issues-from-previous-step:
  "#plan.create-app-plan":
    - issue-1
    - issue-2
"##;

fn cmd_init(path: &Path) -> Result<(), RunError> {
    let workflows = path.join("workflows");
    let workflow_path = workflows.join("example.md");
    if workflow_path.exists() {
        return Err(RunError::Config(format!(
            "{} already exists",
            workflow_path.display()
        )));
    }

    let executors = path.join("executors");
    for dir in [
        workflows.clone(),
        executors.join(HandlerKind::Assignment.dir_name()),
        executors.join(HandlerKind::Function.dir_name()),
    ] {
        std::fs::create_dir_all(&dir)
            .map_err(|e| RunError::Io(format!("cannot create {}: {}", dir.display(), e)))?;
    }

    let fixtures_path = workflows.join("example.fixtures.yaml");
    for (file, content) in [
        (&workflow_path, EXAMPLE_WORKFLOW),
        (&fixtures_path, EXAMPLE_FIXTURES),
    ] {
        std::fs::write(file, content)
            .map_err(|e| RunError::Io(format!("cannot write {}: {}", file.display(), e)))?;
    }

    println!("Initialized scriptflow project at {}", path.display());
    println!("  Created: {}", workflow_path.display());
    println!("  Created: {}", fixtures_path.display());
    println!("  Created: {}/", executors.display());
    Ok(())
}

/// A loaded and compiled workflow.
struct Compiled {
    source: WorkflowSource,
    plan: Plan,
}

fn load_and_compile(args: &SourceArgs, cwd: &Path) -> Result<Compiled, RunError> {
    let fixtures = args
        .fixtures
        .as_deref()
        .map(|p| parser::parse_fixtures_file(&cwd.join(p)))
        .transpose()
        .map_err(RunError::Config)?;

    let path = parser::locate_workflow(
        args.file.as_deref(),
        args.workflow.as_deref(),
        &args.workflows_path,
        cwd,
    )
    .map_err(RunError::Config)?;
    let source =
        parser::load_workflow(&path, args.workflow.as_deref()).map_err(RunError::Config)?;

    let section = extractor::extract_section(&source.content, &args.section);
    if section.is_empty() {
        return Err(RunError::NoScriptSection {
            section: args.section.clone(),
        });
    }

    let plan = compiler::compile(
        &section,
        &CompileOptions {
            fixtures: fixtures.as_ref(),
            strict: args.strict,
        },
    );
    tracing::debug!(
        workflow = %source.name,
        steps = plan.steps.len(),
        actions = plan.action_count(),
        "compiled"
    );
    Ok(Compiled { source, plan })
}

fn report_errors(errors: &[Diagnostic]) {
    for e in errors {
        eprintln!("ERROR {}", e);
    }
}

fn compile_failure(plan: &Plan) -> RunError {
    report_errors(&plan.errors);
    RunError::Compile {
        errors: plan.errors.clone(),
    }
}

fn cmd_validate(args: &SourceArgs, session: &Session) -> Result<(), RunError> {
    let Compiled { source, plan } = load_and_compile(args, &session.cwd)?;
    for w in &plan.warnings {
        eprintln!("WARN {}", w);
    }
    if !plan.errors.is_empty() {
        return Err(compile_failure(&plan));
    }
    println!(
        "OK: {} ({} steps, {} actions, {} warnings)",
        source.name,
        plan.steps.len(),
        plan.action_count(),
        plan.warnings.len()
    );
    Ok(())
}

fn cmd_plan(args: &SourceArgs, session: &Session) -> Result<(), RunError> {
    let Compiled { source, plan } = load_and_compile(args, &session.cwd)?;
    if args.strict && !plan.errors.is_empty() {
        return Err(compile_failure(&plan));
    }
    print_plan(&source.name, &plan);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(name: &str, plan: &Plan) {
    println!(
        "Planning: {} ({} steps, {} actions)",
        name,
        plan.steps.len(),
        plan.action_count()
    );
    println!();

    for step in &plan.steps {
        println!("{} (lines {}-{}):", step.id, step.line_start, step.line_end);
        for action in &step.actions {
            match action {
                Action::Assignment(a) => {
                    println!("  + {} -> {}", a.assignment_id, a.output_key);
                }
                Action::Function(f) => {
                    let simulated = f
                        .simulated_output
                        .as_ref()
                        .map(|v| format!(" = {}", v))
                        .unwrap_or_default();
                    println!(
                        "  ƒ ${} = {}({}){}",
                        f.target, f.function_name, f.args.raw, simulated
                    );
                }
            }
        }
    }

    for w in &plan.warnings {
        println!("  WARN {}", w);
    }
    for e in &plan.errors {
        println!("  ERROR {}", e);
    }
    println!();
    println!(
        "Plan: {} actions, {} warnings, {} errors.",
        plan.action_count(),
        plan.warnings.len(),
        plan.errors.len()
    );
}

/// Flags specific to `run`.
struct RunOptions {
    params: Option<PathBuf>,
    log: Option<PathBuf>,
    exec_paths: Option<String>,
    dry_run: bool,
}

async fn cmd_run(args: &SourceArgs, opts: &RunOptions, session: &Session) -> Result<(), RunError> {
    let cwd = &session.cwd;
    let params = opts
        .params
        .as_deref()
        .map(|p| parser::parse_params_file(&cwd.join(p)))
        .transpose()
        .map_err(RunError::Config)?;
    let Compiled { source, plan } = load_and_compile(args, cwd)?;

    if args.strict && !plan.errors.is_empty() {
        return Err(compile_failure(&plan));
    }

    let log_path = match (&opts.log, opts.dry_run) {
        (Some(path), _) => Some(cwd.join(path)),
        (None, true) => Some(dry_run_log_path(cwd, &source.name)),
        (None, false) => None,
    };
    let mut log = match &log_path {
        Some(path) => EventLog::open(path, session.console).map_err(RunError::Io)?,
        None => EventLog::memory(session.console),
    };

    let exec_paths = opts
        .exec_paths
        .as_deref()
        .map(|raw| parse_exec_paths(raw, cwd))
        .unwrap_or_default();
    let registry = Registry::standard(&exec_paths, cwd);
    tracing::debug!(roots = ?registry.roots(), "handler registry");
    let ambient = AmbientConfig::from_process(cwd.clone());
    let fingerprint = hasher::fingerprint_document(&source.content);

    let cfg = executor::RunConfig {
        workflow: &source.name,
        fingerprint: &fingerprint,
        mode: if opts.dry_run {
            RunMode::DryRun
        } else {
            RunMode::Real
        },
        strict: args.strict,
        params: params.as_ref(),
        registry: &registry,
        ambient: &ambient,
    };
    let outcome = executor::run(&plan, &cfg, &mut log).await;

    if let Some(path) = log.path() {
        let what = if opts.dry_run {
            "Dry-run plan"
        } else {
            "Execution log"
        };
        println!("{} written: {}", what, path.display());
    }
    let summary = outcome?;
    println!(
        "{}: {} action(s) ok ({:.1}s)",
        summary.run_id,
        summary.actions_ok,
        summary.total_duration.as_secs_f64()
    );
    Ok(())
}
