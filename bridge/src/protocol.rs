// Wire protocol at the worker filesystem boundary.
// Request and response documents are single JSON files, consumed once and
// deleted by the worker; file names carry the call identifier.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// File the generated program is written to inside the worker scratch dir.
pub const EXECUTE_SCRIPT_FILE: &str = "execute.js";

/// File the worker writes its single output document to.
pub const OUTPUT_FILE: &str = "sandbox_output.json";

pub fn local_request_file(id: &str) -> String {
    format!("tool_call_{id}.json")
}

pub fn local_response_file(id: &str) -> String {
    format!("tool_result_{id}.json")
}

pub fn mcp_request_file(id: &str) -> String {
    format!("mcp_call_{id}.json")
}

pub fn mcp_response_file(id: &str) -> String {
    format!("mcp_result_{id}.json")
}

/// Recognize a request file name, yielding the call kind and identifier.
pub fn parse_request_file(file_name: &str) -> Option<(CallKind, &str)> {
    let id = |prefix: &str| {
        file_name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(".json"))
    };
    if let Some(id) = id("tool_call_") {
        return Some((CallKind::Local, id));
    }
    if let Some(id) = id("mcp_call_") {
        return Some((CallKind::Mcp, id));
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Local,
    Mcp,
}

/// Request envelope, worker to host. `args` is the raw argument list for
/// local calls (variadic stubs) and a single record for MCP calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRequest {
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: CallKind,
}

/// Response envelope, host to worker: exactly `{data}` or `{error}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolCallResponse {
    Data { data: Value },
    Error { error: String },
}

impl ToolCallResponse {
    pub fn ok(data: Value) -> Self {
        ToolCallResponse::Data { data }
    }

    pub fn err(error: impl Into<String>) -> Self {
        ToolCallResponse::Error { error: error.into() }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolCallResponse::Error { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ToolCallResponse::Error { error } => Some(error),
            ToolCallResponse::Data { .. } => None,
        }
    }
}

/// The single output document a program run emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutput {
    pub success: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_result: Option<PartialResult>,
}

/// Results completed before the program threw.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialResult {
    pub error: String,
    #[serde(default)]
    pub completed_results: Vec<Value>,
}
