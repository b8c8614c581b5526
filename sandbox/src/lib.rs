// Sandbox execution engine: generate a program that binds tools to RPC
// stubs, run it in an isolated worker, and mediate every tool call back to
// the host over the scratch-directory file protocol.

pub mod controller;
pub mod error;
pub mod script;
pub mod syntax;
pub mod worker;

pub use controller::{ExecutionReport, SandboxConfig, SandboxController};
pub use error::SandboxError;
pub use script::{generate_execution_script, COERCION_HELPERS};
pub use syntax::validate_syntax;
pub use worker::{
    is_auth_error, is_stale_session_error, CommandOutput, LocalWorkerProvider, SandboxWorker,
    WorkerProvider,
};
