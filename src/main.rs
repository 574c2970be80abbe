//! Scriptflow CLI — compile and run markdown workflow scripts.

use clap::Parser;
use scriptflow::cli::{Commands, Session};

#[derive(Parser, Debug)]
#[command(
    name = "scriptflow",
    version,
    about = "Compile markdown `## Script` workflows into plans and run them against handlers"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Mirror run events to the console
    #[arg(long, global = true)]
    console: bool,

    /// Debug-level console output (implies --console)
    #[arg(long, global = true)]
    verbose: bool,
}

fn init_tracing(console: bool, verbose: bool) {
    let fallback = if verbose {
        "debug"
    } else if console {
        "info"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.console, cli.verbose);

    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(e) => {
            eprintln!("error: cannot determine working directory: {}", e);
            std::process::exit(1);
        }
    };
    let session = Session {
        cwd,
        console: cli.console || cli.verbose,
    };

    if let Err(e) = scriptflow::cli::dispatch(cli.command, &session).await {
        eprintln!("error: {}", e);
        std::process::exit(e.exit_code());
    }
}
