// Failure kinds for program execution. Each variant has one routing rule:
// surfaced to the caller, retried once, or visible inside the program.

use std::time::Duration;

use codecall_bridge::PartialResult;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    /// The supplied program does not parse. Fatal to this call; the caller
    /// may retry with a corrected program.
    #[error("program has invalid syntax: {message}{}", hint_suffix(.hint))]
    SyntaxInvalid {
        message: String,
        hint: Option<String>,
    },

    /// The worker could not be created.
    #[error("failed to provision sandbox worker: {0}")]
    ProvisioningFailed(String),

    /// Provisioning was rejected for missing or bad credentials. Configure
    /// the sandbox provider's API key and retry.
    #[error("sandbox provider authentication required: {0}")]
    AuthRequired(String),

    /// The worker endpoint reports the session is gone. Consumed internally
    /// by the one automatic retry; surfaced only if the retry fails too.
    #[error("sandbox session expired: {0}")]
    StaleSession(String),

    /// The worker runtime could not be invoked at all.
    #[error("sandbox worker failed: {0}")]
    WorkerFailed(String),

    /// The outer guard elapsed before the program finished.
    #[error("execution timed out after {0:?}")]
    ExecutionTimeout(Duration),

    /// The program run left no output document behind.
    #[error("sandbox produced no output{}", stderr_suffix(.stderr))]
    NoOutput { stderr: String },

    /// The output document is not valid JSON.
    #[error("sandbox output is malformed: {0}")]
    MalformedOutput(String),

    /// The program itself threw. Completed tool results survive in
    /// `partial_result`.
    #[error("program failed: {error}")]
    ProgramFailed {
        error: String,
        stack: Option<String>,
        partial_result: Option<PartialResult>,
    },
}

fn hint_suffix(hint: &Option<String>) -> String {
    match hint {
        Some(hint) => format!(" ({hint})"),
        None => String::new(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" (worker stderr: {})", stderr.trim())
    }
}
