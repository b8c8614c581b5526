// Output schema learning - infer the shape of successful responses so the
// tool documentation can tell the model what a call actually returns.
// Refinement is monotonic: a cached schema is only replaced by a strictly
// more detailed one.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Inference recurses this many levels before flattening.
pub const MAX_INFER_DEPTH: usize = 3;

/// Fields the normalizer attaches for bookkeeping; never part of the
/// learned shape.
const INTERNAL_FIELDS: [&str; 2] = ["_raw", "_normalized"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OutputSchema {
    Null,
    Primitive {
        #[serde(rename = "type")]
        type_name: &'static str,
    },
    Array {
        #[serde(skip_serializing_if = "Option::is_none")]
        item: Option<Box<OutputSchema>>,
        sample_len: usize,
    },
    Object {
        properties: BTreeMap<String, OutputSchema>,
    },
}

impl OutputSchema {
    pub fn infer(value: &Value) -> Self {
        infer_at(value, 0)
    }

    /// True when `self` describes the value in strictly more detail than
    /// `other`: more observed properties for objects, a larger sampled
    /// length for arrays, otherwise a richer kind.
    pub fn is_more_detailed_than(&self, other: &OutputSchema) -> bool {
        match (self, other) {
            (OutputSchema::Object { properties: a }, OutputSchema::Object { properties: b }) => {
                a.len() > b.len()
            }
            (OutputSchema::Array { sample_len: a, .. }, OutputSchema::Array { sample_len: b, .. }) => {
                a > b
            }
            _ => self.kind_rank() > other.kind_rank(),
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            OutputSchema::Null => 0,
            OutputSchema::Primitive { .. } => 1,
            OutputSchema::Array { .. } => 2,
            OutputSchema::Object { .. } => 3,
        }
    }

    /// One-line rendering for tool documentation.
    pub fn summarize(&self) -> String {
        match self {
            OutputSchema::Null => "null".to_string(),
            OutputSchema::Primitive { type_name } => (*type_name).to_string(),
            OutputSchema::Array { item, sample_len } => match item {
                Some(item) => format!("array of {} (sampled {})", item.summarize(), sample_len),
                None => format!("array (sampled {sample_len})"),
            },
            OutputSchema::Object { properties } => {
                let keys: Vec<&str> = properties.keys().map(String::as_str).collect();
                format!("object {{ {} }}", keys.join(", "))
            }
        }
    }
}

fn infer_at(value: &Value, depth: usize) -> OutputSchema {
    match value {
        Value::Null => OutputSchema::Null,
        Value::Bool(_) => OutputSchema::Primitive { type_name: "boolean" },
        Value::Number(_) => OutputSchema::Primitive { type_name: "number" },
        Value::String(_) => OutputSchema::Primitive { type_name: "string" },
        Value::Array(items) => {
            let item = if depth < MAX_INFER_DEPTH {
                items.first().map(|v| Box::new(infer_at(v, depth + 1)))
            } else {
                None
            };
            OutputSchema::Array {
                item,
                sample_len: items.len(),
            }
        }
        Value::Object(map) => {
            let properties = if depth < MAX_INFER_DEPTH {
                map.iter()
                    .filter(|(k, _)| !INTERNAL_FIELDS.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), infer_at(v, depth + 1)))
                    .collect()
            } else {
                BTreeMap::new()
            };
            OutputSchema::Object { properties }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn infers_nested_shapes() {
        let schema = OutputSchema::infer(&json!({
            "items": [{"id": 1}],
            "total": 2,
            "_raw": {"ignored": true}
        }));
        let OutputSchema::Object { properties } = &schema else {
            panic!("expected object schema");
        };
        assert!(properties.contains_key("items"));
        assert!(properties.contains_key("total"));
        assert!(!properties.contains_key("_raw"));
    }

    #[test]
    fn depth_limit_flattens_deep_structures() {
        let deep = json!({"a": {"b": {"c": {"d": {"e": 1}}}}});
        let schema = OutputSchema::infer(&deep);
        // Level 3 objects keep no property detail.
        let mut node = &schema;
        for key in ["a", "b", "c"] {
            let OutputSchema::Object { properties } = node else {
                panic!("expected object at {key}");
            };
            node = properties.get(key).unwrap();
        }
        assert_eq!(node, &OutputSchema::Object { properties: BTreeMap::new() });
    }

    #[test]
    fn detail_ordering() {
        let small = OutputSchema::infer(&json!({"a": 1}));
        let large = OutputSchema::infer(&json!({"a": 1, "b": 2}));
        assert!(large.is_more_detailed_than(&small));
        assert!(!small.is_more_detailed_than(&large));
        assert!(!large.is_more_detailed_than(&large.clone()));

        let short = OutputSchema::infer(&json!([1]));
        let long = OutputSchema::infer(&json!([1, 2, 3]));
        assert!(long.is_more_detailed_than(&short));

        let primitive = OutputSchema::infer(&json!("x"));
        assert!(small.is_more_detailed_than(&primitive));
        assert!(primitive.is_more_detailed_than(&OutputSchema::Null));
    }

    #[test]
    fn summaries_are_compact() {
        let schema = OutputSchema::infer(&json!({"items": [1, 2], "ok": true}));
        assert_eq!(schema.summarize(), "object { items, ok }");
        assert_eq!(
            OutputSchema::infer(&json!([{"id": 1}])).summarize(),
            "array of object { id } (sampled 1)"
        );
    }
}
