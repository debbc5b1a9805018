//! Composition of execution results

use std::fmt::Display;

use periphery_api::{ExecutionResult, Log};

/// One named step of a multi-step operation, `None` when skipped
#[derive(Debug, Clone)]
pub struct Step {
    pub label: String,
    pub result: Option<ExecutionResult>,
}

impl Step {
    pub fn ran(label: impl Into<String>, result: ExecutionResult) -> Self {
        Self {
            label: label.into(),
            result: Some(result),
        }
    }

    pub fn skipped(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            result: None,
        }
    }
}

/// Merge the results of sequential steps into one.
///
/// Skipped steps are omitted. The command lists every step as
/// `label: command`, the logs are concatenated per step under the step's
/// label and the error flag is the OR of all steps.
pub fn merge_results(steps: Vec<Step>) -> ExecutionResult {
    let ran: Vec<(String, ExecutionResult)> = steps
        .into_iter()
        .filter_map(|step| step.result.map(|result| (step.label, result)))
        .collect();

    let command = ran
        .iter()
        .map(|(label, result)| format!("{}: {}", label, result.command))
        .collect::<Vec<_>>()
        .join("\n");

    let section = |pick: fn(&Log) -> &str| {
        ran.iter()
            .filter(|(_, result)| !pick(&result.log).is_empty())
            .map(|(label, result)| format!("{}:\n{}", label, pick(&result.log).trim_end()))
            .collect::<Vec<_>>()
            .join("\n\n")
    };
    let stdout = section(|log| log.stdout.as_str());
    let stderr = section(|log| log.stderr.as_str());

    let is_error = ran.iter().any(|(_, result)| result.is_error);

    ExecutionResult::new(command, stdout, stderr, is_error)
}

/// Failed result carrying an error's description as stderr
pub fn error_result(command: impl Into<String>, err: impl Display) -> ExecutionResult {
    let mut message = err.to_string();
    if message.is_empty() {
        message = "unknown error".to_string();
    }
    ExecutionResult::failure(command, message)
}
