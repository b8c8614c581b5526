// Host-side surface: wrap a tool set with the code_execution meta-tool,
// keep intermediate results out of the model's context, and account for
// the tokens that never had to be spent.

pub mod caller;
pub mod context;
pub mod manifest;
pub mod savings;

pub use caller::{
    build_metadata, sanitize_result, CallerConfig, ExecutionMetadata, ProgrammaticToolCaller,
    SandboxToolCallSummary, CODE_EXECUTION_TOOL_NAME,
};
pub use context::{ContextFilter, Message, Role};
pub use manifest::{ManifestLoader, ManifestTool, ToolManifest, ToolManifestEntry};
pub use savings::{
    compute_savings, estimate_tokens, SavingsConfig, TokenSavings, TokenSavingsBreakdown,
};
