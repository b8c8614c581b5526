// Parameter normalization - coerce whatever the model produced toward the
// declared schema. Every coercion is recorded as a warning; nothing is
// changed silently.

use serde_json::{json, Value};

use crate::tool::{PropType, PropertyDef, ToolSchema};

#[derive(Debug, Clone)]
pub struct NormalizedParams {
    pub normalized: Value,
    pub warnings: Vec<String>,
    /// False exactly when a required property is missing.
    pub is_valid: bool,
}

pub fn normalize_parameters(
    tool_name: &str,
    args: Value,
    schema: Option<&ToolSchema>,
) -> NormalizedParams {
    let mut warnings = Vec::new();

    let mut value = match args {
        Value::Null => {
            warnings.push("Received null arguments, substituting an empty object".to_string());
            json!({})
        }
        Value::Object(_) => args,
        Value::Array(items) => wrap_array(tool_name, items, &mut warnings),
        primitive => wrap_primitive(tool_name, primitive, &mut warnings),
    };

    // Round-trip through serialization so downstream holds a detached copy.
    match serde_json::to_string(&value)
        .ok()
        .and_then(|s| serde_json::from_str::<Value>(&s).ok())
    {
        Some(cloned) => value = cloned,
        None => warnings.push("Arguments did not survive serialization, keeping original".to_string()),
    }

    let mut missing_required = false;
    if let (Some(schema), Some(obj)) = (schema, value.as_object_mut()) {
        for prop in &schema.properties {
            match obj.get_mut(&prop.name) {
                None | Some(Value::Null) => {
                    if prop.required {
                        warnings.push(format!("Missing required parameter: {}", prop.name));
                        missing_required = true;
                    }
                }
                Some(existing) => coerce_property(prop, existing, &mut warnings),
            }
        }
    }

    NormalizedParams {
        normalized: value,
        warnings,
        is_valid: !missing_required,
    }
}

fn wrap_primitive(tool_name: &str, primitive: Value, warnings: &mut Vec<String>) -> Value {
    let kind = json_type_name(&primitive);
    let lowered = tool_name.to_ascii_lowercase();
    let key = if lowered.contains("scrape") || lowered.contains("crawl") {
        "url"
    } else if lowered.contains("search") {
        "query"
    } else if lowered.contains("extract") {
        warnings.push(format!("Wrapped {kind} as {{ urls: [...] }}"));
        return json!({ "urls": [primitive] });
    } else {
        "input"
    };
    warnings.push(format!("Wrapped {kind} as {{ {key}: ... }}"));
    json!({ key: primitive })
}

fn wrap_array(tool_name: &str, items: Vec<Value>, warnings: &mut Vec<String>) -> Value {
    let lowered = tool_name.to_ascii_lowercase();
    let key = if lowered.contains("extract") || lowered.contains("batch") {
        "urls"
    } else {
        "items"
    };
    warnings.push(format!("Wrapped array as {{ {key}: ... }}"));
    json!({ key: items })
}

fn coerce_property(prop: &PropertyDef, value: &mut Value, warnings: &mut Vec<String>) {
    match prop.prop_type {
        PropType::String => {
            let replacement = match value {
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            };
            if let Some(s) = replacement {
                let was = json_type_name(value);
                warnings.push(format!("Coerced {was} to string for parameter {}", prop.name));
                *value = Value::String(s);
            }
        }
        PropType::Number => {
            if let Value::String(s) = value {
                if let Ok(parsed) = s.trim().parse::<f64>() {
                    if let Some(n) = serde_json::Number::from_f64(parsed) {
                        warnings.push(format!("Coerced string to number for parameter {}", prop.name));
                        *value = Value::Number(n);
                    }
                }
            }
        }
        PropType::Boolean => {
            if let Value::String(s) = value {
                let flag = match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Some(true),
                    "false" => Some(false),
                    _ => None,
                };
                if let Some(b) = flag {
                    warnings.push(format!("Coerced string to boolean for parameter {}", prop.name));
                    *value = Value::Bool(b);
                }
            }
        }
        PropType::Array => {
            if !value.is_array() {
                warnings.push(format!(
                    "Wrapped {} as single-element array for parameter {}",
                    json_type_name(value),
                    prop.name
                ));
                *value = Value::Array(vec![value.take()]);
            }
            coerce_array_items(prop, value, warnings);
        }
        PropType::Object => {}
    }
}

// Declared array-of-object whose observed items are scalars: wrap each
// scalar as a singleton record, keyed by the item schema.
fn coerce_array_items(prop: &PropertyDef, value: &mut Value, warnings: &mut Vec<String>) {
    let Some(items_def) = prop.items.as_deref() else {
        return;
    };
    if items_def.prop_type != PropType::Object {
        return;
    }
    let Some(items) = value.as_array_mut() else {
        return;
    };

    let key = pick_wrap_key(&items_def.properties);
    for item in items {
        if item.is_object() || item.is_array() || item.is_null() {
            continue;
        }
        warnings.push(format!(
            "Wrapped scalar item as {{ {key}: ... }} for parameter {}",
            prop.name
        ));
        *item = json!({ key: item.take() });
    }
}

fn pick_wrap_key(properties: &[PropertyDef]) -> &str {
    const WELL_KNOWN: [&str; 4] = ["type", "value", "url", "name"];

    properties
        .iter()
        .find(|p| p.required && p.prop_type == PropType::String)
        .or_else(|| {
            properties
                .iter()
                .find(|p| WELL_KNOWN.contains(&p.name.as_str()))
        })
        .or_else(|| properties.iter().find(|p| p.prop_type == PropType::String))
        .or_else(|| properties.first())
        .map(|p| p.name.as_str())
        .unwrap_or("value")
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{PropType, PropertyDef, ToolSchema};
    use serde_json::json;

    fn url_schema() -> ToolSchema {
        ToolSchema::new(vec![PropertyDef::new("url", PropType::String).required()])
    }

    #[test]
    fn null_becomes_empty_object() {
        let out = normalize_parameters("anything", Value::Null, None);
        assert_eq!(out.normalized, json!({}));
        assert!(out.warnings[0].contains("null arguments"));
    }

    #[test]
    fn bare_string_wraps_by_tool_name() {
        let out = normalize_parameters("mcp_firecrawl_scrape", json!("https://e.com"), Some(&url_schema()));
        assert_eq!(out.normalized, json!({"url": "https://e.com"}));
        assert!(out.warnings.iter().any(|w| w.contains("Wrapped string as { url: ... }")));
        assert!(out.is_valid);

        let out = normalize_parameters("mcp_web_search", json!("rust"), None);
        assert_eq!(out.normalized, json!({"query": "rust"}));

        let out = normalize_parameters("mcp_extract_links", json!("https://e.com"), None);
        assert_eq!(out.normalized, json!({"urls": ["https://e.com"]}));

        let out = normalize_parameters("mcp_other", json!(5), None);
        assert_eq!(out.normalized, json!({"input": 5}));
    }

    #[test]
    fn bare_array_wraps_by_tool_name() {
        let out = normalize_parameters("mcp_batch_fetch", json!(["a", "b"]), None);
        assert_eq!(out.normalized, json!({"urls": ["a", "b"]}));

        let out = normalize_parameters("mcp_other", json!([1, 2]), None);
        assert_eq!(out.normalized, json!({"items": [1, 2]}));
    }

    #[test]
    fn missing_required_flags_invalid() {
        let out = normalize_parameters("mcp_firecrawl_scrape", json!({"limit": 3}), Some(&url_schema()));
        assert!(!out.is_valid);
        assert!(out.warnings.iter().any(|w| w == "Missing required parameter: url"));
    }

    #[test]
    fn scalar_coercions_match_declared_types() {
        let schema = ToolSchema::new(vec![
            PropertyDef::new("count", PropType::Number).required(),
            PropertyDef::new("label", PropType::String),
            PropertyDef::new("enabled", PropType::Boolean),
        ]);
        let out = normalize_parameters(
            "mcp_t",
            json!({"count": "7", "label": 12, "enabled": "true"}),
            Some(&schema),
        );
        assert_eq!(out.normalized, json!({"count": 7.0, "label": "12", "enabled": true}));
        assert_eq!(out.warnings.len(), 3);
        assert!(out.is_valid);
    }

    #[test]
    fn scalar_wrapped_into_declared_array() {
        let schema = ToolSchema::new(vec![PropertyDef::new("urls", PropType::Array).required()]);
        let out = normalize_parameters("mcp_t", json!({"urls": "https://e.com"}), Some(&schema));
        assert_eq!(out.normalized, json!({"urls": ["https://e.com"]}));
    }

    #[test]
    fn scalar_items_wrapped_into_declared_object_items() {
        let schema = ToolSchema::new(vec![PropertyDef::new("targets", PropType::Array)
            .required()
            .with_items(
                PropertyDef::new("", PropType::Object).with_properties(vec![
                    PropertyDef::new("url", PropType::String).required(),
                    PropertyDef::new("depth", PropType::Number),
                ]),
            )]);
        let out = normalize_parameters("mcp_t", json!({"targets": ["https://a", "https://b"]}), Some(&schema));
        assert_eq!(
            out.normalized,
            json!({"targets": [{"url": "https://a"}, {"url": "https://b"}]})
        );
    }

    #[test]
    fn wrap_key_preference_order() {
        let required_string = vec![
            PropertyDef::new("depth", PropType::Number),
            PropertyDef::new("query", PropType::String).required(),
        ];
        assert_eq!(pick_wrap_key(&required_string), "query");

        let well_known = vec![
            PropertyDef::new("depth", PropType::Number),
            PropertyDef::new("type", PropType::Number),
        ];
        assert_eq!(pick_wrap_key(&well_known), "type");

        let first_string = vec![
            PropertyDef::new("depth", PropType::Number),
            PropertyDef::new("label", PropType::String),
        ];
        assert_eq!(pick_wrap_key(&first_string), "label");

        let any = vec![PropertyDef::new("depth", PropType::Number)];
        assert_eq!(pick_wrap_key(&any), "depth");

        assert_eq!(pick_wrap_key(&[]), "value");
    }

    #[test]
    fn normalization_is_idempotent() {
        let schema = ToolSchema::new(vec![
            PropertyDef::new("url", PropType::String).required(),
            PropertyDef::new("limit", PropType::Number),
            PropertyDef::new("tags", PropType::Array),
        ]);
        let inputs = vec![
            json!("https://e.com"),
            json!({"url": "https://e.com", "limit": "5", "tags": "a"}),
            json!(null),
            json!([1, 2, 3]),
            json!({"url": true}),
        ];
        for input in inputs {
            let once = normalize_parameters("mcp_scrape", input, Some(&schema));
            let twice = normalize_parameters("mcp_scrape", once.normalized.clone(), Some(&schema));
            assert_eq!(once.normalized, twice.normalized);
        }
    }
}
