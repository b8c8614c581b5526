// Demo driver: run a JavaScript program against manifest-defined tools.
// Diagnostics go to stderr; stdout carries only the result envelope.

use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result};
use codecall_host::{CallerConfig, ManifestLoader, ProgrammaticToolCaller};
use codecall_sandbox::LocalWorkerProvider;
use serde_json::json;
use tracing::warn;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("codecall=info".parse().expect("valid directive")),
        )
        .with_writer(std::io::stderr)
        .init();

    let program = match std::env::args().nth(1) {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read program file {path}"))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read program from stdin")?;
            buffer
        }
    };

    let mut loader = ManifestLoader::new();
    if let Err(err) = loader.load_from_default_locations().await {
        warn!("No tool manifest loaded: {err:#}");
    }
    let tools = loader.into_tools();

    let caller = ProgrammaticToolCaller::new(
        tools,
        Arc::new(LocalWorkerProvider::default()),
        CallerConfig::default(),
    );
    let code_tool = caller.create_code_execution_tool();

    match code_tool.execute(json!({ "code": program })).await {
        Ok(envelope) => {
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            Ok(())
        }
        Err(err) => {
            eprintln!("execution failed: {err:#}");
            std::process::exit(1);
        }
    }
}
