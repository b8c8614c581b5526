// Program generation. The emitted script is self-contained: response
// helpers, one RPC stub per transport, one callable per tool, and the
// user's code wrapped in an async entry point that always leaves exactly
// one output document behind.

/// Response-shape helpers, inserted verbatim into every generated program.
pub const COERCION_HELPERS: &str = include_str!("helpers.js");

pub fn generate_execution_script(
    code: &str,
    local_tools: &[String],
    mcp_tools: &[String],
    scratch_dir: &str,
    tool_timeout_ms: u64,
    stub_poll_interval_ms: u64,
) -> String {
    let mut script = String::with_capacity(COERCION_HELPERS.len() + code.len() + 4096);

    script.push_str("\"use strict\";\n");
    script.push_str("const fs = require(\"fs\");\n");
    script.push_str("const path = require(\"path\");\n\n");
    script.push_str(&format!("const SCRATCH_DIR = {};\n", js_string(scratch_dir)));
    script.push_str(&format!("const TOOL_CALL_TIMEOUT_MS = {tool_timeout_ms};\n"));
    script.push_str(&format!("const POLL_INTERVAL_MS = {stub_poll_interval_ms};\n\n"));

    script.push_str(COERCION_HELPERS);
    script.push_str(RPC_RUNTIME);

    script.push_str("\n// Tool bindings\n");
    for name in local_tools {
        push_binding(&mut script, name, "__callLocalTool", true);
    }
    for name in mcp_tools {
        push_binding(&mut script, name, "__callMcpTool", false);
    }

    script.push_str("\nconst __main = async () => {\n");
    script.push_str(code);
    script.push_str("\n};\n");
    script.push_str(ENTRY_POINT);
    script
}

fn push_binding(script: &mut String, name: &str, call_fn: &str, variadic: bool) {
    let quoted = js_string(name);
    if is_js_identifier(name) {
        if variadic {
            script.push_str(&format!(
                "async function {name}(...args) {{ return {call_fn}({quoted}, args); }}\n"
            ));
        } else {
            script.push_str(&format!(
                "async function {name}(params) {{ return {call_fn}({quoted}, params); }}\n"
            ));
        }
    } else if variadic {
        script.push_str(&format!(
            "globalThis[{quoted}] = async (...args) => {call_fn}({quoted}, args);\n"
        ));
    } else {
        script.push_str(&format!(
            "globalThis[{quoted}] = async (params) => {call_fn}({quoted}, params);\n"
        ));
    }
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

fn is_js_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

const RPC_RUNTIME: &str = r#"
const __allResults = [];
let __callCounter = 0;

const __sleep = (ms) => new Promise((resolve) => setTimeout(resolve, ms));

function __newCallId() {
  __callCounter += 1;
  return Date.now().toString(36) + "_" + __callCounter + "_" + Math.random().toString(36).slice(2, 8);
}

async function __rpc(requestFile, responseFile, payload) {
  const requestPath = path.join(SCRATCH_DIR, requestFile);
  const responsePath = path.join(SCRATCH_DIR, responseFile);
  fs.writeFileSync(requestPath, JSON.stringify(payload));
  const deadline = Date.now() + TOOL_CALL_TIMEOUT_MS;
  while (Date.now() < deadline) {
    if (fs.existsSync(responsePath)) {
      let parsed;
      try {
        parsed = JSON.parse(fs.readFileSync(responsePath, "utf8"));
      } catch (_err) {
        // Partially written response; pick it up on the next tick.
        await __sleep(POLL_INTERVAL_MS);
        continue;
      }
      fs.unlinkSync(responsePath);
      try { fs.unlinkSync(requestPath); } catch (_err) {}
      if (parsed && parsed.error !== undefined) {
        throw new Error(parsed.error);
      }
      return parsed ? parsed.data : undefined;
    }
    await __sleep(POLL_INTERVAL_MS);
  }
  throw new Error("Tool call '" + payload.toolName + "' timed out after " + TOOL_CALL_TIMEOUT_MS + "ms");
}

async function __callLocalTool(toolName, args) {
  const id = __newCallId();
  const result = await __rpc(
    "tool_call_" + id + ".json",
    "tool_result_" + id + ".json",
    { toolName: toolName, args: args, type: "local" }
  );
  __allResults.push({ tool: toolName, result: result });
  return result;
}

async function __callMcpTool(toolName, params) {
  const id = __newCallId();
  const result = await __rpc(
    "mcp_call_" + id + ".json",
    "mcp_result_" + id + ".json",
    { toolName: toolName, args: params === undefined ? {} : params, callId: id, type: "mcp" }
  );
  __allResults.push({ tool: toolName, result: result });
  return result;
}
"#;

const ENTRY_POINT: &str = r#"
function __writeOutput(doc) {
  fs.writeFileSync(path.join(SCRATCH_DIR, "sandbox_output.json"), JSON.stringify(doc));
}

(async () => {
  try {
    let result = await __main();
    if (result === undefined && __allResults.length > 0) {
      if (__allResults.length === 1) {
        result = __allResults[0].result;
      } else {
        result = {
          autoGenerated: true,
          count: __allResults.length,
          results: __allResults,
          lastResult: __allResults[__allResults.length - 1].result,
        };
      }
    }
    __writeOutput({ success: true, result: result === undefined ? null : result });
  } catch (err) {
    const message = err && err.message ? err.message : String(err);
    __writeOutput({
      success: false,
      error: message,
      stack: err && err.stack ? err.stack : undefined,
      partialResult: __allResults.length > 0
        ? { error: message, completedResults: __allResults }
        : undefined,
    });
  }
})();
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use codecall_bridge::protocol::OUTPUT_FILE;

    fn sample_script() -> String {
        generate_execution_script(
            "return getUser({id: \"1\"});",
            &["getUser".to_string(), "average".to_string()],
            &["mcp_firecrawl_scrape".to_string()],
            "/tmp/scratch",
            30_000,
            50,
        )
    }

    #[test]
    fn embeds_helpers_and_user_code() {
        let script = sample_script();
        assert!(script.contains("function toSequence(v)"));
        assert!(script.contains("function extractText(r"));
        assert!(script.contains("return getUser({id: \"1\"});"));
        assert!(script.contains("const SCRATCH_DIR = \"/tmp/scratch\";"));
    }

    #[test]
    fn binds_every_tool_by_name() {
        let script = sample_script();
        assert!(script.contains("async function getUser(...args) { return __callLocalTool(\"getUser\", args); }"));
        assert!(script.contains("async function average(...args) { return __callLocalTool(\"average\", args); }"));
        assert!(script.contains(
            "async function mcp_firecrawl_scrape(params) { return __callMcpTool(\"mcp_firecrawl_scrape\", params); }"
        ));
    }

    #[test]
    fn uses_protocol_file_names() {
        let script = sample_script();
        assert!(script.contains("\"tool_call_\" + id + \".json\""));
        assert!(script.contains("\"tool_result_\" + id + \".json\""));
        assert!(script.contains("\"mcp_call_\" + id + \".json\""));
        assert!(script.contains("\"mcp_result_\" + id + \".json\""));
        assert!(script.contains(OUTPUT_FILE));
    }

    #[test]
    fn synthesizes_return_value_when_program_returns_nothing() {
        let script = sample_script();
        assert!(script.contains("autoGenerated: true"));
        assert!(script.contains("lastResult"));
        assert!(script.contains("partialResult"));
    }

    #[test]
    fn non_identifier_names_bind_through_global_this() {
        let script = generate_execution_script(
            "return 1;",
            &["weird-name".to_string()],
            &[],
            "/tmp/s",
            1_000,
            50,
        );
        assert!(script.contains("globalThis[\"weird-name\"]"));
        assert!(!script.contains("async function weird-name"));
    }

    #[test]
    fn scratch_dir_is_escaped() {
        let script = generate_execution_script(
            "return 1;",
            &[],
            &[],
            "C:\\temp\\scratch",
            1_000,
            50,
        );
        assert!(script.contains(r#"const SCRATCH_DIR = "C:\\temp\\scratch";"#));
    }
}
