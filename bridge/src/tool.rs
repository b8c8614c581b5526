// Tool abstraction shared by the whole runtime.
// What a tool can do is declared up front - name, schema, async execute.

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Names with this prefix are routed through the MCP bridge; every other
/// name is a local tool executed in the host process.
pub const MCP_TOOL_PREFIX: &str = "mcp_";

pub fn is_mcp_tool(name: &str) -> bool {
    name.starts_with(MCP_TOOL_PREFIX)
}

/// A callable tool with a declared input schema. Implementations must be
/// safe to call concurrently - the runtime fans out calls from one program.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> &ToolSchema;
    async fn execute(&self, args: Value) -> Result<Value>;
}

/// Declared input schema: an ordered list of properties. Order matters -
/// coercion heuristics pick "the first string property" when wrapping
/// scalar items into records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
}

impl ToolSchema {
    pub fn new(properties: Vec<PropertyDef>) -> Self {
        Self { properties }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn required_properties(&self) -> impl Iterator<Item = &PropertyDef> {
        self.properties.iter().filter(|p| p.required)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    #[serde(rename = "type")]
    pub prop_type: PropType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
    /// Item shape for array properties. The item's `name` and `required`
    /// fields are ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertyDef>>,
    /// Nested shape for object properties.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropertyDef>,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, prop_type: PropType) -> Self {
        Self {
            name: name.into(),
            prop_type,
            required: false,
            description: String::new(),
            items: None,
            properties: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_items(mut self, items: PropertyDef) -> Self {
        self.items = Some(Box::new(items));
        self
    }

    pub fn with_properties(mut self, properties: Vec<PropertyDef>) -> Self {
        self.properties = properties;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl PropType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropType::String => "string",
            PropType::Number => "number",
            PropType::Boolean => "boolean",
            PropType::Array => "array",
            PropType::Object => "object",
        }
    }
}

/// One physical tool call, as observed by the runtime. Created when the
/// request is seen, finalized once, then immutable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub args: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_args: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub is_mcp: bool,
    pub duration_ms: u64,
    /// Epoch milliseconds when the request was observed. Bridge records and
    /// monitor records are merged into one timeline by this field.
    pub started_at_ms: i64,
}

impl ToolCallRecord {
    pub fn begin(tool_name: impl Into<String>, args: Value, is_mcp: bool) -> Self {
        Self {
            tool_name: tool_name.into(),
            args,
            normalized_args: None,
            raw_result: None,
            result: None,
            error: None,
            is_mcp,
            duration_ms: 0,
            started_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

type ToolHandler = dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync;

/// A tool backed by a closure. The convenient way to register host-process
/// tools without a dedicated struct per tool.
pub struct FunctionTool {
    name: String,
    description: String,
    schema: ToolSchema,
    handler: Box<ToolHandler>,
}

impl FunctionTool {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: ToolSchema,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            handler: Box::new(handler),
        }
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        (self.handler)(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mcp_prefix_detection() {
        assert!(is_mcp_tool("mcp_firecrawl_scrape"));
        assert!(!is_mcp_tool("getUser"));
        assert!(!is_mcp_tool("mcpish"));
    }

    #[tokio::test]
    async fn function_tool_executes_handler() {
        let tool = FunctionTool::new(
            "double",
            "Doubles a number",
            ToolSchema::new(vec![PropertyDef::new("n", PropType::Number).required()]),
            |args| {
                Box::pin(async move {
                    let n = args.get("n").and_then(|v| v.as_f64()).unwrap_or(0.0);
                    Ok(json!({ "result": n * 2.0 }))
                })
            },
        );

        let out = tool.execute(json!({"n": 21})).await.unwrap();
        assert_eq!(out["result"], 42.0);
    }

    #[test]
    fn schema_lookup_preserves_declaration_order() {
        let schema = ToolSchema::new(vec![
            PropertyDef::new("first", PropType::String),
            PropertyDef::new("second", PropType::Number).required(),
        ]);
        assert_eq!(schema.properties[0].name, "first");
        assert_eq!(
            schema.required_properties().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            vec!["second"]
        );
        assert!(schema.property("second").is_some());
        assert!(schema.property("missing").is_none());
    }
}
