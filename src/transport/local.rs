//! SF-012: Run a handler program locally with a JSON request on stdin.

use super::ExecOutput;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// Execute `program` in `work_dir`, writing `input` to its stdin.
pub fn exec_program(program: &Path, input: &str, work_dir: &Path) -> Result<ExecOutput, String> {
    let mut child = Command::new(program)
        .current_dir(work_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("failed to spawn {}: {}", program.display(), e))?;

    // Stdin is written while stdout/stderr drain; either side may fill first.
    let writer = child.stdin.take().map(|mut stdin| {
        let input = input.to_owned();
        std::thread::spawn(move || match stdin.write_all(input.as_bytes()) {
            // A handler that never reads stdin closes the pipe early.
            Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                Err(format!("stdin write error: {}", e))
            }
            _ => Ok(()),
        })
    });

    let output = child
        .wait_with_output()
        .map_err(|e| format!("wait error: {}", e))?;

    if let Some(writer) = writer {
        writer
            .join()
            .map_err(|_| "stdin writer panicked".to_string())??;
    }

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
