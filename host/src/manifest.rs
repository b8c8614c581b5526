// Tool manifests - local tools declared in YAML instead of Rust. A
// manifest entry either runs an external command (piped stdio, no shell
// interpretation) or names one of a small set of built-in handlers.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use codecall_bridge::{PropType, PropertyDef, Tool, ToolSchema};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
pub struct ToolManifest {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub tools: Vec<ToolManifestEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolManifestEntry {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<ManifestArg>,
    #[serde(default)]
    pub static_flags: Vec<String>,
    pub internal_handler: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestArg {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "type", default = "default_arg_type")]
    pub arg_type: String,
    pub cli_flag: Option<String>,
}

fn default_arg_type() -> String {
    "string".to_string()
}

/// Loads manifests, following includes, and turns entries into tools.
#[derive(Default)]
pub struct ManifestLoader {
    entries: Vec<ToolManifestEntry>,
}

impl ManifestLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load_from_file(&mut self, path: &Path) -> Result<()> {
        info!("Loading tool manifest: {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        let manifest: ToolManifest =
            serde_yaml::from_str(&content).context("failed to parse manifest YAML")?;

        for include in &manifest.include {
            let include_path = resolve_include_path(path, include)?;
            Box::pin(self.load_from_file(&include_path)).await?;
        }

        for entry in manifest.tools {
            debug!("Loaded tool definition: {}", entry.name);
            self.entries.retain(|e| e.name != entry.name);
            self.entries.push(entry);
        }
        Ok(())
    }

    /// Explicit env override first, then conventional locations.
    pub async fn load_from_default_locations(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("CODECALL_TOOLS_FILE") {
            return self.load_from_file(Path::new(&path)).await;
        }

        let mut candidates = vec![PathBuf::from("./tools.yaml")];
        if let Some(dirs) = directories::UserDirs::new() {
            candidates.push(dirs.home_dir().join(".config/codecall/tools.yaml"));
        }
        for candidate in candidates {
            if candidate.exists() {
                return self.load_from_file(&candidate).await;
            }
        }
        anyhow::bail!("no tools.yaml manifest found")
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_tools(self) -> Vec<Arc<dyn Tool>> {
        self.entries
            .into_iter()
            .map(|entry| Arc::new(ManifestTool::new(entry)) as Arc<dyn Tool>)
            .collect()
    }
}

fn resolve_include_path(base: &Path, include: &str) -> Result<PathBuf> {
    let path = if include.starts_with('/') {
        PathBuf::from(include)
    } else if let Some(rest) = include.strip_prefix("~/") {
        let dirs = directories::UserDirs::new().context("cannot resolve home directory")?;
        dirs.home_dir().join(rest)
    } else {
        base.parent()
            .context("cannot determine manifest directory")?
            .join(include)
    };

    if !path.exists() {
        anyhow::bail!("included manifest not found: {}", path.display());
    }
    Ok(path)
}

/// A tool backed by a manifest entry.
pub struct ManifestTool {
    entry: ToolManifestEntry,
    schema: ToolSchema,
}

impl ManifestTool {
    pub fn new(entry: ToolManifestEntry) -> Self {
        let properties = entry
            .args
            .iter()
            .map(|arg| {
                let prop_type = match arg.arg_type.as_str() {
                    "number" => PropType::Number,
                    "boolean" => PropType::Boolean,
                    "array" => PropType::Array,
                    "object" => PropType::Object,
                    _ => PropType::String,
                };
                let mut prop =
                    PropertyDef::new(&arg.name, prop_type).describe(&arg.description);
                if arg.required {
                    prop = prop.required();
                }
                prop
            })
            .collect();
        Self {
            entry,
            schema: ToolSchema::new(properties),
        }
    }

    async fn run_command(&self, args: &Value) -> Result<Value> {
        let mut cmd = Command::new(&self.entry.command);
        for flag in &self.entry.static_flags {
            cmd.arg(flag);
        }

        // Arguments go straight to the process, never through a shell.
        if let Some(obj) = args.as_object() {
            for arg_def in &self.entry.args {
                if let Some(value) = obj.get(&arg_def.name) {
                    if let Some(cli_flag) = &arg_def.cli_flag {
                        cmd.arg(cli_flag);
                    }
                    cmd.arg(argument_text(value));
                }
            }
        }

        debug!("Executing manifest command: {:?}", cmd);
        let output = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("failed to execute '{}'", self.entry.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("'{}' failed: {}", self.entry.command, stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match serde_json::from_str::<Value>(&stdout) {
            Ok(parsed) => Ok(parsed),
            Err(_) => Ok(json!({"output": stdout.trim(), "status": "success"})),
        }
    }

    async fn run_internal(&self, handler: &str, args: &Value) -> Result<Value> {
        match handler {
            "add" => {
                let a = number_arg(args, "a")?;
                let b = number_arg(args, "b")?;
                Ok(json!({"result": a + b}))
            }
            "list_files" => {
                let path = args.get("path").and_then(Value::as_str).unwrap_or(".");
                let mut files = Vec::new();
                let mut entries = tokio::fs::read_dir(path).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let metadata = entry.metadata().await?;
                    files.push(json!({
                        "name": entry.file_name().to_string_lossy(),
                        "is_dir": metadata.is_dir(),
                        "size": metadata.len(),
                    }));
                }
                Ok(json!({"path": path, "files": files}))
            }
            "timestamp" => Ok(json!({"now": chrono::Utc::now().to_rfc3339()})),
            _ => anyhow::bail!("unknown internal handler '{handler}'"),
        }
    }
}

fn number_arg(args: &Value, name: &str) -> Result<f64> {
    args.get(name)
        .and_then(Value::as_f64)
        .with_context(|| format!("missing numeric parameter '{name}'"))
}

fn argument_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Tool for ManifestTool {
    fn name(&self) -> &str {
        &self.entry.name
    }

    fn description(&self) -> &str {
        &self.entry.description
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        if let Some(handler) = &self.entry.internal_handler {
            return self.run_internal(handler, &args).await;
        }
        if self.entry.command.is_empty() {
            anyhow::bail!("tool '{}' has neither a command nor a handler", self.entry.name);
        }
        self.run_command(&args).await
    }
}
