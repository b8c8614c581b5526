// Worker abstraction over the sandbox provider. The host only ever needs a
// scratch directory shared with the program and a way to invoke the
// runtime; everything else is provider detail.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// An isolated environment that can hold files and run the generated
/// program. File names are relative to the scratch directory.
#[async_trait]
pub trait SandboxWorker: Send + Sync {
    fn scratch_dir(&self) -> &Path;

    /// Writes must be atomic: the program polls for response files and must
    /// never observe a partial document.
    async fn write_file(&self, name: &str, contents: &str) -> Result<()>;
    async fn read_file(&self, name: &str) -> Result<String>;
    async fn list_files(&self) -> Result<Vec<String>>;
    async fn remove_file(&self, name: &str) -> Result<()>;

    /// Invoke the worker's runtime on a previously written script file.
    /// A non-zero exit is reported through `exit_code`, not as an error.
    async fn run_script(&self, script_file: &str) -> Result<CommandOutput>;
}

#[async_trait]
pub trait WorkerProvider: Send + Sync {
    async fn provision(&self) -> Result<Arc<dyn SandboxWorker>>;
}

/// Session-expiry errors from the provider ("Gone", "410", connection
/// reset). These trigger the controller's single automatic retry.
pub fn is_stale_session_error(message: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)\b(gone|410|econnreset)\b").expect("valid pattern"))
        .is_match(message)
}

pub fn is_auth_error(message: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?i)(\b401\b|unauthorized|api.?key|authentication)").expect("valid pattern")
        })
        .is_match(message)
}

/// A worker backed by a local process and a temporary scratch directory.
/// The default provider for development and tests; remote providers
/// implement the same traits against their own API.
pub struct LocalWorker {
    scratch: tempfile::TempDir,
    runtime: String,
}

impl LocalWorker {
    fn path_for(&self, name: &str) -> Result<PathBuf> {
        // File names come from our own protocol; reject anything that
        // escapes the scratch directory.
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            anyhow::bail!("invalid scratch file name: {name}");
        }
        Ok(self.scratch.path().join(name))
    }
}

#[async_trait]
impl SandboxWorker for LocalWorker {
    fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    async fn write_file(&self, name: &str, contents: &str) -> Result<()> {
        let target = self.path_for(name)?;
        let staging = self.scratch.path().join(format!(".{name}.tmp"));
        tokio::fs::write(&staging, contents)
            .await
            .with_context(|| format!("failed to stage {name}"))?;
        tokio::fs::rename(&staging, &target)
            .await
            .with_context(|| format!("failed to write {name}"))?;
        Ok(())
    }

    async fn read_file(&self, name: &str) -> Result<String> {
        let path = self.path_for(name)?;
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {name}"))
    }

    async fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(self.scratch.path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn remove_file(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("failed to remove {name}"))
    }

    async fn run_script(&self, script_file: &str) -> Result<CommandOutput> {
        let script = self.path_for(script_file)?;
        debug!("Running {} {}", self.runtime, script.display());

        let output = Command::new(&self.runtime)
            .arg(&script)
            .current_dir(self.scratch.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to invoke runtime '{}'", self.runtime))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

pub struct LocalWorkerProvider {
    runtime: String,
}

impl LocalWorkerProvider {
    pub fn new(runtime: impl Into<String>) -> Self {
        Self { runtime: runtime.into() }
    }
}

impl Default for LocalWorkerProvider {
    fn default() -> Self {
        Self::new("node")
    }
}

#[async_trait]
impl WorkerProvider for LocalWorkerProvider {
    async fn provision(&self) -> Result<Arc<dyn SandboxWorker>> {
        // Fail provisioning, not the first execution, when the runtime is
        // missing entirely.
        let probe = Command::new(&self.runtime)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("runtime '{}' is not available", self.runtime))?;
        if !probe.status.success() {
            anyhow::bail!(
                "runtime '{}' probe failed: {}",
                self.runtime,
                String::from_utf8_lossy(&probe.stderr).trim()
            );
        }

        let scratch = tempfile::TempDir::new().context("failed to create scratch directory")?;
        info!("Provisioned local worker at {}", scratch.path().display());
        Ok(Arc::new(LocalWorker {
            scratch,
            runtime: self.runtime.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_session_classification() {
        assert!(is_stale_session_error("session is Gone"));
        assert!(is_stale_session_error("HTTP 410 from provider"));
        assert!(is_stale_session_error("read failed: ECONNRESET"));
        assert!(!is_stale_session_error("some other failure"));
        assert!(!is_stale_session_error("outgoing message"));
    }

    #[test]
    fn auth_error_classification() {
        assert!(is_auth_error("401 Unauthorized"));
        assert!(is_auth_error("missing API key"));
        assert!(!is_auth_error("disk full"));
    }

    #[tokio::test]
    async fn local_worker_file_operations() {
        let worker = LocalWorker {
            scratch: tempfile::TempDir::new().unwrap(),
            runtime: "true".to_string(),
        };

        worker.write_file("a.json", "{\"x\":1}").await.unwrap();
        worker.write_file("b.json", "{}").await.unwrap();
        assert_eq!(worker.read_file("a.json").await.unwrap(), "{\"x\":1}");

        let files = worker.list_files().await.unwrap();
        assert_eq!(files, vec!["a.json", "b.json"]);

        worker.remove_file("a.json").await.unwrap();
        assert!(worker.read_file("a.json").await.is_err());
        assert!(worker.write_file("../escape.json", "{}").await.is_err());
    }
}
