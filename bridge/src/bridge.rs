// The MCP bridge: normalize arguments in, execute, normalize the response
// out, and refuse calls that keep failing with identical arguments.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::params::{normalize_parameters, NormalizedParams};
use crate::protocol::{ToolCallRequest, ToolCallResponse};
use crate::response::normalize_response;
use crate::schema::OutputSchema;
use crate::tool::{Tool, ToolCallRecord, ToolSchema};

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Per-call execution timeout.
    pub timeout: Duration,
    /// Identical (tool, arguments) failures tolerated before the circuit
    /// opens for that signature.
    pub max_retries: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(30_000),
            max_retries: 3,
        }
    }
}

#[derive(Default)]
struct BridgeState {
    records: Vec<ToolCallRecord>,
    failure_counts: HashMap<String, u32>,
    warnings: Vec<String>,
    // Survives reset() - learned shapes stay useful across executions.
    learned: HashMap<String, OutputSchema>,
}

pub struct McpBridge {
    tools: HashMap<String, Arc<dyn Tool>>,
    schemas: HashMap<String, ToolSchema>,
    config: BridgeConfig,
    state: Mutex<BridgeState>,
}

impl McpBridge {
    pub fn new(tools: Vec<Arc<dyn Tool>>, config: BridgeConfig) -> Self {
        let mut map = HashMap::new();
        let mut schemas = HashMap::new();
        for tool in tools {
            let name = tool.name().to_string();
            if !crate::tool::is_mcp_tool(&name) {
                warn!("Registering non-prefixed tool '{}' on the MCP bridge", name);
            }
            // Input schemas are cached up front; descriptors may be remote.
            schemas.insert(name.clone(), tool.schema().clone());
            map.insert(name, tool);
        }
        Self {
            tools: map,
            schemas,
            config,
            state: Mutex::new(BridgeState::default()),
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn schema_for(&self, name: &str) -> Option<&ToolSchema> {
        self.schemas.get(name)
    }

    pub async fn handle(&self, request: &ToolCallRequest) -> ToolCallResponse {
        let name = request.tool_name.clone();
        let started = Instant::now();
        let started_at_ms = chrono::Utc::now().timestamp_millis();

        let Some(tool) = self.tools.get(&name) else {
            return ToolCallResponse::err(format!("Unknown MCP tool '{name}'"));
        };

        let NormalizedParams {
            normalized,
            warnings,
            is_valid: _,
        } = normalize_parameters(&name, request.args.clone(), self.schemas.get(&name));
        for warning in &warnings {
            debug!("{name}: {warning}");
        }

        let signature = signature_for(&name, &normalized, started_at_ms);
        {
            let mut state = self.lock_state();
            state.warnings.extend(warnings);
            let failures = state.failure_counts.get(&signature).copied().unwrap_or(0);
            if failures >= self.config.max_retries {
                warn!("Circuit open for {name}: {failures} identical failures");
                return ToolCallResponse::err(format!(
                    "{name} failed {failures} times with the same parameters; \
                     refusing to call it again. Change the arguments or use a different tool."
                ));
            }
        }

        let mut record = ToolCallRecord::begin(&name, request.args.clone(), true);
        record.started_at_ms = started_at_ms;
        record.normalized_args = Some(normalized.clone());

        let outcome = tokio::time::timeout(self.config.timeout, tool.execute(normalized.clone())).await;
        record.duration_ms = started.elapsed().as_millis() as u64;

        let response = match outcome {
            Ok(Ok(raw)) => {
                let transformed = normalize_response(raw.clone());
                record.raw_result = Some(raw);
                record.result = Some(transformed.clone());

                let mut state = self.lock_state();
                state.failure_counts.remove(&signature);
                if call_succeeded(&transformed) {
                    learn_output_schema(&mut state.learned, &name, &transformed);
                }
                ToolCallResponse::ok(transformed)
            }
            Ok(Err(err)) => {
                let mut message = err.to_string();
                if is_validation_error(&message) {
                    message = format!(
                        "{message} (original arguments: {}, normalized arguments: {normalized})",
                        request.args
                    );
                }
                record.error = Some(message.clone());
                let mut state = self.lock_state();
                *state.failure_counts.entry(signature).or_insert(0) += 1;
                ToolCallResponse::err(message)
            }
            Err(_) => {
                let message = format!("{name} timed out after {:?}", self.config.timeout);
                record.error = Some(message.clone());
                let mut state = self.lock_state();
                *state.failure_counts.entry(signature).or_insert(0) += 1;
                ToolCallResponse::err(message)
            }
        };

        self.lock_state().records.push(record);
        response
    }

    /// Concurrent fan-out; results come back in input order.
    pub async fn execute_batch(&self, requests: &[ToolCallRequest]) -> Vec<ToolCallResponse> {
        futures::future::join_all(requests.iter().map(|r| self.handle(r))).await
    }

    /// Clears records, failure counts, and normalization warnings. Learned
    /// output schemas are kept.
    pub fn reset(&self) {
        let mut state = self.lock_state();
        state.records.clear();
        state.failure_counts.clear();
        state.warnings.clear();
    }

    pub fn take_records(&self) -> Vec<ToolCallRecord> {
        std::mem::take(&mut self.lock_state().records)
    }

    pub fn records(&self) -> Vec<ToolCallRecord> {
        self.lock_state().records.clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.lock_state().warnings.clone()
    }

    pub fn learned_schema(&self, name: &str) -> Option<OutputSchema> {
        self.lock_state().learned.get(name).cloned()
    }

    pub fn failure_count(&self, name: &str, normalized_args: &Value) -> u32 {
        let signature = signature_for(name, normalized_args, 0);
        self.lock_state()
            .failure_counts
            .get(&signature)
            .copied()
            .unwrap_or(0)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn signature_for(name: &str, normalized: &Value, fallback: i64) -> String {
    match serde_json::to_string(normalized) {
        Ok(json) => format!("{name}:{json}"),
        Err(_) => format!("{name}:{fallback}"),
    }
}

fn call_succeeded(transformed: &Value) -> bool {
    let explicit_false = transformed.get("success") == Some(&Value::Bool(false));
    let has_error = transformed
        .get("error")
        .map(|e| !e.is_null())
        .unwrap_or(false);
    !explicit_false && !has_error
}

fn learn_output_schema(learned: &mut HashMap<String, OutputSchema>, name: &str, value: &Value) {
    let inferred = OutputSchema::infer(value);
    match learned.get(name) {
        Some(existing) if !inferred.is_more_detailed_than(existing) => {}
        _ => {
            debug!("Learned output schema for {name}: {}", inferred.summarize());
            learned.insert(name.to_string(), inferred);
        }
    }
}

fn is_validation_error(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("validation") || lowered.contains("invalid")
}
