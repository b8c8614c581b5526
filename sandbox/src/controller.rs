// Worker lifecycle and the RPC monitor. One worker is cached per
// controller and reused across executions; a stale session invalidates it
// and triggers exactly one retry with a fresh worker.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use codecall_bridge::protocol::{
    local_response_file, mcp_response_file, parse_request_file, CallKind, ExecutionOutput,
    ToolCallRequest, ToolCallResponse, EXECUTE_SCRIPT_FILE, OUTPUT_FILE,
};
use codecall_bridge::{McpBridge, Tool, ToolCallRecord};
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SandboxError;
use crate::script::generate_execution_script;
use crate::syntax::validate_syntax;
use crate::worker::{is_auth_error, is_stale_session_error, SandboxWorker, WorkerProvider};

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Outer guard on a whole `execute` call.
    pub execute_timeout: Duration,
    /// Per tool call, enforced by the stub poller and mirrored host-side.
    pub tool_call_timeout: Duration,
    /// How often the monitor lists the scratch directory.
    pub monitor_poll_interval: Duration,
    /// How often a stub polls for its response file.
    pub stub_poll_interval: Duration,
    /// Cap on worker provisioning.
    pub provision_timeout: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            execute_timeout: Duration::from_millis(25_000),
            tool_call_timeout: Duration::from_millis(30_000),
            monitor_poll_interval: Duration::from_millis(100),
            stub_poll_interval: Duration::from_millis(50),
            provision_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub result: Value,
    pub tool_calls: Vec<ToolCallRecord>,
    pub duration: Duration,
}

/// Owns the worker and mediates every tool call the program makes back to
/// the host. Concurrent `execute` calls on one controller are not
/// supported; callers serialize.
pub struct SandboxController {
    provider: Arc<dyn WorkerProvider>,
    worker: tokio::sync::Mutex<Option<Arc<dyn SandboxWorker>>>,
    local_tools: Arc<HashMap<String, Arc<dyn Tool>>>,
    local_tool_names: Vec<String>,
    bridge: Arc<McpBridge>,
    records: Arc<Mutex<Vec<ToolCallRecord>>>,
    config: SandboxConfig,
}

impl SandboxController {
    pub fn new(
        provider: Arc<dyn WorkerProvider>,
        local_tools: Vec<Arc<dyn Tool>>,
        bridge: Arc<McpBridge>,
        config: SandboxConfig,
    ) -> Self {
        let local_tool_names: Vec<String> =
            local_tools.iter().map(|t| t.name().to_string()).collect();
        let local_tools: HashMap<String, Arc<dyn Tool>> = local_tools
            .into_iter()
            .map(|t| (t.name().to_string(), t))
            .collect();
        Self {
            provider,
            worker: tokio::sync::Mutex::new(None),
            local_tools: Arc::new(local_tools),
            local_tool_names,
            bridge,
            records: Arc::new(Mutex::new(Vec::new())),
            config,
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn local_tool_names(&self) -> &[String] {
        &self.local_tool_names
    }

    pub fn bridge(&self) -> &Arc<McpBridge> {
        &self.bridge
    }

    /// Tool calls observed so far in the current (or just finished)
    /// execution, local and MCP merged into one timeline. Valid after a
    /// failed `execute` as well - counts reflect what actually ran.
    pub fn recorded_calls(&self) -> Vec<ToolCallRecord> {
        let mut calls = lock(&self.records).clone();
        calls.extend(self.bridge.records());
        calls.sort_by_key(|r| r.started_at_ms);
        calls
    }

    pub async fn execute(&self, code: &str) -> Result<ExecutionReport, SandboxError> {
        let started = Instant::now();
        lock(&self.records).clear();
        self.bridge.reset();

        validate_syntax(code)?;

        let mut retried = false;
        let output = loop {
            let worker = self.ensure_worker().await?;
            match self.run_once(worker, code).await {
                Ok(output) => break output,
                Err(SandboxError::StaleSession(message)) if !retried => {
                    warn!("Stale sandbox session ({message}); provisioning a fresh worker");
                    *self.worker.lock().await = None;
                    retried = true;
                }
                Err(err) => return Err(err),
            }
        };

        let tool_calls = self.recorded_calls();
        if !output.success {
            return Err(SandboxError::ProgramFailed {
                error: output
                    .error
                    .unwrap_or_else(|| "program failed without an error message".to_string()),
                stack: output.stack,
                partial_result: output.partial_result,
            });
        }

        info!(
            "Program finished with {} tool call(s) in {:?}",
            tool_calls.len(),
            started.elapsed()
        );
        Ok(ExecutionReport {
            result: output.result,
            tool_calls,
            duration: started.elapsed(),
        })
    }

    async fn ensure_worker(&self) -> Result<Arc<dyn SandboxWorker>, SandboxError> {
        let mut slot = self.worker.lock().await;
        if let Some(worker) = slot.as_ref() {
            return Ok(worker.clone());
        }
        info!("Provisioning sandbox worker");
        let worker = tokio::time::timeout(self.config.provision_timeout, self.provider.provision())
            .await
            .map_err(|_| {
                SandboxError::ProvisioningFailed(format!(
                    "provisioning timed out after {:?}",
                    self.config.provision_timeout
                ))
            })?
            .map_err(|err| {
                let message = format!("{err:#}");
                if is_auth_error(&message) {
                    SandboxError::AuthRequired(message)
                } else {
                    SandboxError::ProvisioningFailed(message)
                }
            })?;
        *slot = Some(worker.clone());
        Ok(worker)
    }

    async fn run_once(
        &self,
        worker: Arc<dyn SandboxWorker>,
        code: &str,
    ) -> Result<ExecutionOutput, SandboxError> {
        let mcp_tool_names = self.bridge.tool_names();
        let script = generate_execution_script(
            code,
            &self.local_tool_names,
            &mcp_tool_names,
            &worker.scratch_dir().to_string_lossy(),
            self.config.tool_call_timeout.as_millis() as u64,
            self.config.stub_poll_interval.as_millis() as u64,
        );

        worker
            .write_file(EXECUTE_SCRIPT_FILE, &script)
            .await
            .map_err(|err| classify_worker_error(&format!("{err:#}")))?;

        // The drop guard stops the monitor even if this future is dropped
        // by a caller abort; in-flight tool calls run to completion inside
        // the monitor task.
        let token = CancellationToken::new();
        let _guard = token.clone().drop_guard();
        let monitor = tokio::spawn(run_monitor(MonitorContext {
            worker: worker.clone(),
            local_tools: self.local_tools.clone(),
            bridge: self.bridge.clone(),
            records: self.records.clone(),
            token: token.clone(),
            poll_interval: self.config.monitor_poll_interval,
            tool_call_timeout: self.config.tool_call_timeout,
        }));

        let run = tokio::time::timeout(
            self.config.execute_timeout,
            worker.run_script(EXECUTE_SCRIPT_FILE),
        )
        .await;
        token.cancel();
        let _ = monitor.await;

        let run = match run {
            Err(_) => return Err(SandboxError::ExecutionTimeout(self.config.execute_timeout)),
            Ok(Err(err)) => return Err(classify_worker_error(&format!("{err:#}"))),
            Ok(Ok(output)) => output,
        };
        if !run.stderr.is_empty() {
            debug!("Worker stderr: {}", run.stderr.trim());
        }

        let raw = match worker.read_file(OUTPUT_FILE).await {
            Ok(raw) => raw,
            Err(_) => {
                return Err(SandboxError::NoOutput {
                    stderr: truncate(&run.stderr, 400),
                })
            }
        };
        if raw.trim().is_empty() {
            return Err(SandboxError::NoOutput {
                stderr: truncate(&run.stderr, 400),
            });
        }
        let output: ExecutionOutput = serde_json::from_str(&raw)
            .map_err(|err| SandboxError::MalformedOutput(err.to_string()))?;

        // Best-effort cleanup; the provider reclaims the scratch dir anyway.
        let _ = worker.remove_file(EXECUTE_SCRIPT_FILE).await;
        let _ = worker.remove_file(OUTPUT_FILE).await;

        Ok(output)
    }
}

fn classify_worker_error(message: &str) -> SandboxError {
    if is_stale_session_error(message) {
        SandboxError::StaleSession(message.to_string())
    } else {
        SandboxError::WorkerFailed(message.to_string())
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct MonitorContext {
    worker: Arc<dyn SandboxWorker>,
    local_tools: Arc<HashMap<String, Arc<dyn Tool>>>,
    bridge: Arc<McpBridge>,
    records: Arc<Mutex<Vec<ToolCallRecord>>>,
    token: CancellationToken,
    poll_interval: Duration,
    tool_call_timeout: Duration,
}

// Lists the scratch directory on a fixed tick and dispatches every new
// request file. Requests are serviced on their own tasks, so a program
// that fans out with Promise.all gets genuine parallelism.
async fn run_monitor(ctx: MonitorContext) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut inflight: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            _ = ctx.token.cancelled() => break,
            _ = tokio::time::sleep(ctx.poll_interval) => {}
        }

        let files = match ctx.worker.list_files().await {
            Ok(files) => files,
            Err(err) => {
                debug!("Scratch listing failed: {err:#}");
                continue;
            }
        };

        for name in files {
            let Some((kind, id)) = parse_request_file(&name) else {
                continue;
            };
            if seen.contains(&name) {
                continue;
            }
            let raw = match ctx.worker.read_file(&name).await {
                Ok(raw) => raw,
                Err(_) => continue, // racing the writer; retry next tick
            };
            let request: ToolCallRequest = match serde_json::from_str(&raw) {
                Ok(request) => request,
                Err(err) => {
                    debug!("Request {name} not yet parseable: {err}");
                    continue;
                }
            };
            seen.insert(name.clone());
            debug!("Observed {:?} request {id} for {}", kind, request.tool_name);

            let id = id.to_string();
            match kind {
                CallKind::Local => {
                    let worker = ctx.worker.clone();
                    let tools = ctx.local_tools.clone();
                    let records = ctx.records.clone();
                    let timeout = ctx.tool_call_timeout;
                    inflight.spawn(async move {
                        dispatch_local(worker, tools, records, id, request, timeout).await;
                    });
                }
                CallKind::Mcp => {
                    let worker = ctx.worker.clone();
                    let bridge = ctx.bridge.clone();
                    inflight.spawn(async move {
                        let response = bridge.handle(&request).await;
                        write_response(&*worker, &mcp_response_file(&id), &response).await;
                    });
                }
            }
        }
    }

    // Let in-flight calls finish before the task ends; a hung tool is cut
    // off at the per-call timeout.
    let drain = async {
        while inflight.join_next().await.is_some() {}
    };
    if tokio::time::timeout(ctx.tool_call_timeout, drain).await.is_err() {
        warn!("Monitor shutdown left tool calls unfinished");
        inflight.abort_all();
    }
}

async fn dispatch_local(
    worker: Arc<dyn SandboxWorker>,
    tools: Arc<HashMap<String, Arc<dyn Tool>>>,
    records: Arc<Mutex<Vec<ToolCallRecord>>>,
    id: String,
    request: ToolCallRequest,
    timeout: Duration,
) {
    let started = Instant::now();
    let mut record = ToolCallRecord::begin(&request.tool_name, request.args.clone(), false);

    let response = match tools.get(&request.tool_name) {
        None => {
            let message = format!("Unknown local tool '{}'", request.tool_name);
            record.error = Some(message.clone());
            ToolCallResponse::err(message)
        }
        Some(tool) => {
            let args = unwrap_variadic(request.args.clone());
            match tokio::time::timeout(timeout, tool.execute(args)).await {
                Ok(Ok(value)) => {
                    record.result = Some(value.clone());
                    ToolCallResponse::ok(value)
                }
                Ok(Err(err)) => {
                    let message = err.to_string();
                    record.error = Some(message.clone());
                    ToolCallResponse::err(message)
                }
                Err(_) => {
                    let message =
                        format!("{} timed out after {timeout:?}", request.tool_name);
                    record.error = Some(message.clone());
                    ToolCallResponse::err(message)
                }
            }
        }
    };

    record.duration_ms = started.elapsed().as_millis() as u64;
    lock(&records).push(record);
    write_response(&*worker, &local_response_file(&id), &response).await;
}

/// Local stubs are variadic; the envelope carries the raw argument list.
/// A single argument is passed through bare, matching how tools declare
/// one record parameter.
fn unwrap_variadic(args: Value) -> Value {
    match args {
        Value::Array(mut items) => match items.len() {
            0 => json!({}),
            1 => items.remove(0),
            _ => Value::Array(items),
        },
        other => other,
    }
}

async fn write_response(worker: &dyn SandboxWorker, name: &str, response: &ToolCallResponse) {
    let body = match serde_json::to_string(response) {
        Ok(body) => body,
        Err(err) => {
            warn!("Response for {name} not serializable: {err}");
            serde_json::json!({"error": format!("response not serializable: {err}")}).to_string()
        }
    };
    if let Err(err) = worker.write_file(name, &body).await {
        warn!("Failed to write {name}: {err:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variadic_unwrapping() {
        assert_eq!(unwrap_variadic(json!([])), json!({}));
        assert_eq!(unwrap_variadic(json!([{"id": "1"}])), json!({"id": "1"}));
        assert_eq!(unwrap_variadic(json!([1, 2])), json!([1, 2]));
        assert_eq!(unwrap_variadic(json!({"id": "1"})), json!({"id": "1"}));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        let long = "héllo wörld héllo wörld";
        let cut = truncate(long, 10);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= 13);
    }
}
