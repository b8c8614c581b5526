// The programmatic tool caller. Wraps a user tool set with one meta-tool,
// code_execution, whose input is a program that calls every other tool as a
// plain function. One model generation replaces N round trips.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use codecall_bridge::{
    is_mcp_tool, BridgeConfig, McpBridge, PropType, PropertyDef, Tool, ToolCallRecord, ToolSchema,
};
use codecall_sandbox::{SandboxConfig, SandboxController, SandboxError, WorkerProvider};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::savings::{compute_savings, SavingsConfig, TokenSavingsBreakdown};

pub const CODE_EXECUTION_TOOL_NAME: &str = "code_execution";

#[derive(Debug, Clone, Default)]
pub struct CallerConfig {
    pub sandbox: SandboxConfig,
    pub bridge: BridgeConfig,
    pub savings: SavingsConfig,
}

/// Splits a tool set into local and MCP halves, owns the sandbox
/// controller, and exposes the code_execution meta-tool.
pub struct ProgrammaticToolCaller {
    local_tools: Vec<Arc<dyn Tool>>,
    mcp_tools: Vec<Arc<dyn Tool>>,
    controller: Arc<SandboxController>,
    savings: SavingsConfig,
    execute_timeout: Duration,
}

impl ProgrammaticToolCaller {
    pub fn new(
        tools: Vec<Arc<dyn Tool>>,
        provider: Arc<dyn WorkerProvider>,
        config: CallerConfig,
    ) -> Self {
        let (mcp_tools, local_tools): (Vec<_>, Vec<_>) =
            tools.into_iter().partition(|t| is_mcp_tool(t.name()));

        info!(
            "Wrapping {} local and {} MCP tool(s) for programmatic calling",
            local_tools.len(),
            mcp_tools.len()
        );

        let bridge = Arc::new(McpBridge::new(mcp_tools.clone(), config.bridge));
        let execute_timeout = config.sandbox.execute_timeout;
        let controller = Arc::new(SandboxController::new(
            provider,
            local_tools.clone(),
            bridge,
            config.sandbox,
        ));

        Self {
            local_tools,
            mcp_tools,
            controller,
            savings: config.savings,
            execute_timeout,
        }
    }

    /// Local then MCP names, each in declaration order.
    pub fn all_tool_names(&self) -> Vec<String> {
        self.local_tools
            .iter()
            .chain(self.mcp_tools.iter())
            .map(|t| t.name().to_string())
            .collect()
    }

    pub fn controller(&self) -> &Arc<SandboxController> {
        &self.controller
    }

    pub fn create_code_execution_tool(&self) -> Arc<dyn Tool> {
        let description = self.build_description();
        Arc::new(CodeExecutionTool {
            controller: self.controller.clone(),
            savings: self.savings.clone(),
            execute_timeout: self.execute_timeout,
            description,
            schema: ToolSchema::new(vec![PropertyDef::new("code", PropType::String)
                .required()
                .describe("JavaScript program to run; tools are in scope as async functions")]),
        })
    }

    /// The original tools plus code_execution.
    pub fn create_enhanced_tool_set(&self) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<Arc<dyn Tool>> = self
            .local_tools
            .iter()
            .chain(self.mcp_tools.iter())
            .cloned()
            .collect();
        tools.push(self.create_code_execution_tool());
        tools
    }

    /// Per-tool documentation for the model: description plus parameter
    /// lines derived from the declared schema.
    pub fn generate_tool_documentation(&self) -> String {
        let mut doc = String::new();
        for tool in self.local_tools.iter().chain(self.mcp_tools.iter()) {
            doc.push_str(&format!("{}: {}\n", tool.name(), tool.description()));
            for prop in &tool.schema().properties {
                push_property_doc(&mut doc, prop, 1);
            }
        }
        doc
    }

    fn build_description(&self) -> String {
        let mut text = String::from(
            "Execute a JavaScript program that calls tools directly, instead of \
             calling them one at a time. All intermediate results stay inside the \
             sandbox; only the program's return value comes back.\n\n",
        );

        if !self.local_tools.is_empty() {
            text.push_str("Available tools (call with one arguments object, await the result):\n");
            for tool in &self.local_tools {
                text.push_str(&format!("- {}: {}\n", tool.name(), tool.description()));
            }
            text.push('\n');
        }
        if !self.mcp_tools.is_empty() {
            text.push_str(
                "MCP tools (pass exactly ONE object argument matching the schema; \
                 response shapes vary, access fields defensively):\n",
            );
            for tool in &self.mcp_tools {
                text.push_str(&format!("- {}: {}\n", tool.name(), tool.description()));
            }
            text.push('\n');
        }

        text.push_str(
            "Helper functions in scope: toSequence, safeGet, safeMap, safeFilter, \
             first, len, isSuccess, extractData, extractText, getCommandOutput.\n\
             Use Promise.all for independent calls; they run in parallel. \
             `return` the final aggregate value from the top level.",
        );
        text
    }
}

fn push_property_doc(doc: &mut String, prop: &PropertyDef, depth: usize) {
    let indent = "  ".repeat(depth);
    let requirement = if prop.required { "required" } else { "optional" };
    doc.push_str(&format!(
        "{indent}- {} ({}, {requirement})",
        prop.name,
        prop.prop_type.as_str()
    ));
    if !prop.description.is_empty() {
        doc.push_str(&format!(": {}", prop.description));
    }
    doc.push('\n');

    if let Some(items) = prop.items.as_deref() {
        if items.properties.is_empty() {
            doc.push_str(&format!("{indent}  items: {}\n", items.prop_type.as_str()));
        } else {
            doc.push_str(&format!("{indent}  items: object\n"));
            for nested in &items.properties {
                push_property_doc(doc, nested, depth + 2);
            }
        }
    }
    for nested in &prop.properties {
        push_property_doc(doc, nested, depth + 1);
    }
}

struct CodeExecutionTool {
    controller: Arc<SandboxController>,
    savings: SavingsConfig,
    execute_timeout: Duration,
    description: String,
    schema: ToolSchema,
}

#[async_trait]
impl Tool for CodeExecutionTool {
    fn name(&self) -> &str {
        CODE_EXECUTION_TOOL_NAME
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let code = args
            .get("code")
            .and_then(Value::as_str)
            .context("code_execution requires a string 'code' argument")?;

        match self.controller.execute(code).await {
            Ok(report) => {
                let metadata =
                    build_metadata(&report.tool_calls, report.duration, &self.savings);
                Ok(json!({
                    "result": sanitize_result(&report.result),
                    "metadata": metadata,
                }))
            }
            Err(err) => {
                let observed = self.controller.recorded_calls();
                warn!(
                    "code_execution failed after {} observed tool call(s): {err}",
                    observed.len()
                );
                Err(annotate_failure(err, &observed, self.execute_timeout))
            }
        }
    }
}

fn annotate_failure(
    err: SandboxError,
    observed: &[ToolCallRecord],
    execute_timeout: Duration,
) -> anyhow::Error {
    match err {
        SandboxError::ProgramFailed {
            error,
            stack,
            partial_result,
        } => {
            let mut message = format!("program failed: {error}");
            if let Some(partial) = partial_result {
                let completed = serde_json::to_string(&partial.completed_results)
                    .unwrap_or_else(|_| "[]".to_string());
                message.push_str(&format!(
                    "; {} call(s) completed before the failure: {completed}",
                    partial.completed_results.len()
                ));
            }
            if let Some(stack) = stack {
                message.push_str(&format!("\n{stack}"));
            }
            anyhow!(message)
        }
        SandboxError::ExecutionTimeout(_) => anyhow!(
            "execution exceeded the {:?} limit; {} tool call(s) had completed",
            execute_timeout,
            observed.len()
        ),
        other => anyhow!(other),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    pub tool_call_count: usize,
    pub local_tool_call_count: usize,
    pub mcp_tool_call_count: usize,
    pub intermediate_tokens_saved: u64,
    pub total_tokens_saved: u64,
    pub token_savings_breakdown: TokenSavingsBreakdown,
    pub savings_explanation: String,
    pub tools_used: Vec<String>,
    pub mcp_tools_used: Vec<String>,
    pub local_tools_used: Vec<String>,
    pub execution_time_ms: u64,
    pub sandbox_tool_calls: Vec<SandboxToolCallSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxToolCallSummary {
    pub tool_name: String,
    pub is_mcp: bool,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn build_metadata(
    records: &[ToolCallRecord],
    duration: Duration,
    savings_config: &SavingsConfig,
) -> ExecutionMetadata {
    let savings = compute_savings(records, savings_config);

    let mut tools_used: Vec<String> = Vec::new();
    for record in records {
        if !tools_used.contains(&record.tool_name) {
            tools_used.push(record.tool_name.clone());
        }
    }
    let mcp_tools_used: Vec<String> = tools_used
        .iter()
        .filter(|name| is_mcp_tool(name))
        .cloned()
        .collect();
    let local_tools_used: Vec<String> = tools_used
        .iter()
        .filter(|name| !is_mcp_tool(name))
        .cloned()
        .collect();

    let mcp_count = records.iter().filter(|r| r.is_mcp).count();

    ExecutionMetadata {
        tool_call_count: records.len(),
        local_tool_call_count: records.len() - mcp_count,
        mcp_tool_call_count: mcp_count,
        intermediate_tokens_saved: savings.breakdown.intermediate_results,
        total_tokens_saved: savings.total,
        token_savings_breakdown: savings.breakdown,
        savings_explanation: savings.explanation,
        tools_used,
        mcp_tools_used,
        local_tools_used,
        execution_time_ms: duration.as_millis() as u64,
        sandbox_tool_calls: records
            .iter()
            .map(|r| SandboxToolCallSummary {
                tool_name: r.tool_name.clone(),
                is_mcp: r.is_mcp,
                success: r.succeeded(),
                duration_ms: r.duration_ms,
                error: r.error.clone(),
            })
            .collect(),
    }
}

/// Copy of the worker's output that always serializes. Values that cannot
/// be serialized degrade per key, then to a string, then to a stub naming
/// the type and keys - never an aborted call.
pub fn sanitize_result(value: &Value) -> Value {
    if serde_json::to_string(value).is_ok() {
        return value.clone();
    }
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, nested) in map {
                if serde_json::to_string(nested).is_ok() {
                    out.insert(key.clone(), nested.clone());
                } else {
                    out.insert(key.clone(), Value::String(nested.to_string()));
                }
            }
            if serde_json::to_string(&out).is_ok() {
                return Value::Object(out);
            }
            json!({
                "unserializable": true,
                "type": "object",
                "keys": map.keys().cloned().collect::<Vec<String>>(),
            })
        }
        other => json!({
            "unserializable": true,
            "type": json_type_name(other),
            "keys": Vec::<String>::new(),
        }),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codecall_bridge::FunctionTool;

    fn named_tool(name: &str, description: &str) -> Arc<dyn Tool> {
        let schema = ToolSchema::new(vec![
            PropertyDef::new("id", PropType::String)
                .required()
                .describe("target identifier"),
            PropertyDef::new("tags", PropType::Array)
                .with_items(PropertyDef::new("", PropType::String)),
        ]);
        Arc::new(FunctionTool::new(name, description, schema, |_| {
            Box::pin(async { Ok(json!({})) })
        }))
    }

    struct NoProvider;

    #[async_trait]
    impl WorkerProvider for NoProvider {
        async fn provision(&self) -> Result<Arc<dyn codecall_sandbox::SandboxWorker>> {
            Err(anyhow!("not used in this test"))
        }
    }

    fn caller_with(tools: Vec<Arc<dyn Tool>>) -> ProgrammaticToolCaller {
        ProgrammaticToolCaller::new(tools, Arc::new(NoProvider), CallerConfig::default())
    }

    #[test]
    fn splits_tools_and_keeps_declaration_order() {
        let caller = caller_with(vec![
            named_tool("getUser", "Fetch a user"),
            named_tool("mcp_scrape", "Scrape a page"),
            named_tool("average", "Average numbers"),
        ]);
        assert_eq!(caller.all_tool_names(), vec!["getUser", "average", "mcp_scrape"]);
    }

    #[test]
    fn enhanced_tool_set_appends_code_execution() {
        let caller = caller_with(vec![named_tool("getUser", "Fetch a user")]);
        let tools = caller.create_enhanced_tool_set();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools.last().unwrap().name(), CODE_EXECUTION_TOOL_NAME);

        let code_tool = caller.create_code_execution_tool();
        assert!(code_tool.description().contains("getUser"));
        assert!(code_tool.description().contains("extractText"));
        assert_eq!(code_tool.schema().properties[0].name, "code");
    }

    #[test]
    fn documentation_lists_parameters() {
        let caller = caller_with(vec![named_tool("getUser", "Fetch a user")]);
        let doc = caller.generate_tool_documentation();
        assert!(doc.contains("getUser: Fetch a user"));
        assert!(doc.contains("- id (string, required): target identifier"));
        assert!(doc.contains("- tags (array, optional)"));
        assert!(doc.contains("items: string"));
    }

    #[test]
    fn metadata_counts_are_consistent() {
        let mut records = vec![
            ToolCallRecord::begin("getUser", json!({}), false),
            ToolCallRecord::begin("getUser", json!({}), false),
            ToolCallRecord::begin("mcp_scrape", json!({}), true),
        ];
        records[0].result = Some(json!({"score": 10}));
        records[1].result = Some(json!({"score": 20}));
        records[2].error = Some("boom".to_string());

        let metadata = build_metadata(&records, Duration::from_millis(120), &SavingsConfig::default());
        assert_eq!(metadata.tool_call_count, 3);
        assert_eq!(metadata.local_tool_call_count, 2);
        assert_eq!(metadata.mcp_tool_call_count, 1);
        assert_eq!(metadata.sandbox_tool_calls.len(), metadata.tool_call_count);
        assert_eq!(metadata.tools_used, vec!["getUser", "mcp_scrape"]);
        assert_eq!(metadata.local_tools_used, vec!["getUser"]);
        assert_eq!(metadata.mcp_tools_used, vec!["mcp_scrape"]);
        assert_eq!(
            metadata.total_tokens_saved,
            metadata.token_savings_breakdown.intermediate_results
                + metadata.token_savings_breakdown.round_trip_context
                + metadata.token_savings_breakdown.tool_call_overhead
                + metadata.token_savings_breakdown.llm_decisions
        );
        assert_eq!(
            metadata.intermediate_tokens_saved,
            metadata.token_savings_breakdown.intermediate_results
        );
        assert!(!metadata.sandbox_tool_calls[2].success);
    }

    #[test]
    fn sanitize_passes_ordinary_values_through() {
        let value = json!({"a": [1, 2], "b": {"c": "d"}});
        assert_eq!(sanitize_result(&value), value);
        assert_eq!(sanitize_result(&json!(null)), json!(null));
    }
}
