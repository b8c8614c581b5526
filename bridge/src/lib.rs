// Tool abstraction and the MCP bridge. Everything the model sends is
// treated as loosely typed: arguments are coerced toward the declared
// schema on the way in, responses are flattened to a predictable shape on
// the way out, and repeated identical failures open a circuit.

pub mod bridge;
pub mod params;
pub mod protocol;
pub mod response;
pub mod schema;
pub mod tool;

pub use bridge::{BridgeConfig, McpBridge};
pub use params::{normalize_parameters, NormalizedParams};
pub use protocol::{
    local_request_file, local_response_file, mcp_request_file, mcp_response_file,
    parse_request_file, CallKind, ExecutionOutput, PartialResult, ToolCallRequest,
    ToolCallResponse, EXECUTE_SCRIPT_FILE, OUTPUT_FILE,
};
pub use response::normalize_response;
pub use schema::OutputSchema;
pub use tool::{
    is_mcp_tool, FunctionTool, PropType, PropertyDef, Tool, ToolCallRecord, ToolSchema,
    MCP_TOOL_PREFIX,
};
