//! Subprocess execution

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use periphery_api::ExecutionResult;
use tokio::process::Command;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::exec::result::error_result;

/// Printable form of a program invocation
pub fn display_command(program: &str, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(program.to_string());
    for arg in args {
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            parts.push(format!("'{}'", arg));
        } else {
            parts.push(arg.clone());
        }
    }
    parts.join(" ")
}

fn build_command(program: &str, args: &[String], cwd: Option<&Path>) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd
}

fn into_result(command: String, output: std::process::Output) -> ExecutionResult {
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let is_error = !output.status.success();
    if is_error {
        debug!("Command '{}' exited with {}", command, output.status);
    }
    ExecutionResult::new(command, stdout, stderr, is_error)
}

/// Run a program to completion without a shell
pub async fn run_program(program: &str, args: &[String], cwd: Option<&Path>) -> ExecutionResult {
    let command = display_command(program, args);
    debug!("Running: {}", command);

    match build_command(program, args, cwd).output().await {
        Ok(output) => into_result(command, output),
        Err(e) => {
            warn!("Failed to spawn '{}': {}", command, e);
            error_result(command, e)
        }
    }
}

/// Run a program, killing it when `cancel` is notified
pub async fn run_program_cancellable(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    cancel: Arc<Notify>,
) -> ExecutionResult {
    let command = display_command(program, args);
    debug!("Running (cancellable): {}", command);

    let child = match build_command(program, args, cwd).spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!("Failed to spawn '{}': {}", command, e);
            return error_result(command, e);
        }
    };

    // Dropping the output future drops the child, which kills it
    tokio::select! {
        output = child.wait_with_output() => match output {
            Ok(output) => into_result(command, output),
            Err(e) => error_result(command, e),
        },
        _ = cancel.notified() => {
            warn!("Cancelled: {}", command);
            ExecutionResult::failure(command, "cancelled")
        }
    }
}

/// Run a user supplied hook through `sh -c`
pub async fn run_shell(script: &str, cwd: Option<&Path>) -> ExecutionResult {
    let args = vec!["-c".to_string(), script.to_string()];
    let mut result = run_program("sh", &args, cwd).await;
    result.command = script.to_string();
    result
}
