// Response normalization - flatten the MCP content envelope into a flat
// record with predictable accessors. Applying the normalizer to its own
// output is a no-op.

use serde_json::{json, Map, Value};

const CONTAINER_FIELDS: [&str; 4] = ["items", "data", "results", "content"];
const TEXT_FIELDS: [&str; 5] = ["text", "output", "stdout", "content", "value"];

pub fn normalize_response(raw: Value) -> Value {
    if let Some(obj) = raw.as_object() {
        // `_raw` marks a value this normalizer already produced.
        if obj.contains_key("_raw") {
            return raw;
        }
        if is_mcp_envelope(obj) {
            return flatten_envelope(raw);
        }
    }
    normalize_structure(raw)
}

/// The protocol envelope: a `content` array of typed parts.
fn is_mcp_envelope(obj: &Map<String, Value>) -> bool {
    match obj.get("content") {
        Some(Value::Array(parts)) => {
            !parts.is_empty()
                && parts
                    .iter()
                    .all(|p| p.get("type").map(Value::is_string).unwrap_or(false))
        }
        _ => false,
    }
}

fn flatten_envelope(raw: Value) -> Value {
    let obj = match raw.as_object() {
        Some(obj) => obj,
        None => return normalize_structure(raw),
    };
    let is_error = obj
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let texts: Vec<String> = obj
        .get("content")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let content = obj.get("content").cloned().unwrap_or(Value::Null);

    if is_error {
        let joined = texts.join("\n");
        return json!({"success": false, "error": joined, "_raw": raw});
    }

    match texts.len() {
        0 => json!({"success": true, "content": content, "_raw": raw}),
        1 => {
            // A single text part is usually a JSON document in disguise.
            if let Ok(Value::Object(mut parsed)) = serde_json::from_str::<Value>(&texts[0]) {
                parsed.entry("success").or_insert(json!(true));
                return Value::Object(parsed);
            }
            json!({"success": true, "text": texts[0].clone(), "_raw": raw})
        }
        _ => {
            let results: Vec<Value> = texts
                .iter()
                .map(|t| serde_json::from_str::<Value>(t).unwrap_or_else(|_| json!(t)))
                .collect();
            json!({"success": true, "results": results, "_raw": raw})
        }
    }
}

// Non-envelope values: attach `success`, container aliases, and textual
// aliases. Change-tracked so an already-normal value passes through
// untouched, which is what makes the normalizer idempotent.
fn normalize_structure(raw: Value) -> Value {
    let original = raw.clone();
    let mut changed = !original.is_object();

    let mut obj = match raw {
        Value::Object(map) => map,
        Value::Array(items) => {
            let mut map = Map::new();
            map.insert("items".to_string(), Value::Array(items));
            map
        }
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };

    let has_error = obj.get("error").map(|e| !e.is_null()).unwrap_or(false);
    let error_flagged = obj
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let explicit_false = matches!(obj.get("success"), Some(Value::Bool(false)));
    let success = !explicit_false && !has_error && !error_flagged;
    if obj.get("success") != Some(&Value::Bool(success)) {
        obj.insert("success".to_string(), Value::Bool(success));
        changed = true;
    }

    if let Some(items) = find_container(&obj) {
        insert_absent(&mut obj, "items", Value::Array(items.clone()), &mut changed);
        insert_absent(&mut obj, "data", Value::Array(items.clone()), &mut changed);
        insert_absent(&mut obj, "first", items.first().cloned().unwrap_or(Value::Null), &mut changed);
        insert_absent(&mut obj, "last", items.last().cloned().unwrap_or(Value::Null), &mut changed);
        insert_absent(&mut obj, "length", json!(items.len()), &mut changed);
    }

    if let Some(text) = find_text(&obj) {
        for field in TEXT_FIELDS {
            insert_absent(&mut obj, field, Value::String(text.clone()), &mut changed);
        }
    }

    if let Some(err) = obj.get("error") {
        if !err.is_null() && !err.is_string() {
            let surfaced = serde_json::to_string(err).unwrap_or_else(|_| err.to_string());
            obj.insert("error".to_string(), Value::String(surfaced));
            changed = true;
        }
    }

    if !changed {
        return Value::Object(obj);
    }
    obj.insert("_raw".to_string(), original);
    Value::Object(obj)
}

fn find_container(obj: &Map<String, Value>) -> Option<Vec<Value>> {
    CONTAINER_FIELDS
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_array).cloned())
}

fn find_text(obj: &Map<String, Value>) -> Option<String> {
    TEXT_FIELDS
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str).map(str::to_string))
}

fn insert_absent(obj: &mut Map<String, Value>, key: &str, value: Value, changed: &mut bool) {
    if !obj.contains_key(key) {
        obj.insert(key.to_string(), value);
        *changed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_envelope_joins_text_parts() {
        let raw = json!({
            "content": [
                {"type": "text", "text": "first"},
                {"type": "text", "text": "second"}
            ],
            "isError": true
        });
        let out = normalize_response(raw.clone());
        assert_eq!(out["success"], false);
        assert_eq!(out["error"], "first\nsecond");
        assert_eq!(out["_raw"], raw);
    }

    #[test]
    fn single_json_text_part_is_parsed_flat() {
        let raw = json!({
            "content": [{"type": "text", "text": "{\"markdown\":\"hi\",\"metadata\":{\"title\":\"T\"}}"}],
            "isError": false
        });
        let out = normalize_response(raw);
        assert_eq!(out, json!({"markdown": "hi", "metadata": {"title": "T"}, "success": true}));
    }

    #[test]
    fn single_plain_text_part_is_kept_as_text() {
        let raw = json!({"content": [{"type": "text", "text": "hello"}]});
        let out = normalize_response(raw.clone());
        assert_eq!(out["success"], true);
        assert_eq!(out["text"], "hello");
        assert_eq!(out["_raw"], raw);
    }

    #[test]
    fn non_text_parts_pass_through_as_content() {
        let raw = json!({"content": [{"type": "image", "data": "base64..."}]});
        let out = normalize_response(raw.clone());
        assert_eq!(out["success"], true);
        assert_eq!(out["content"], raw["content"]);
    }

    #[test]
    fn many_text_parts_become_results() {
        let raw = json!({
            "content": [
                {"type": "text", "text": "{\"a\":1}"},
                {"type": "text", "text": "not json"}
            ]
        });
        let out = normalize_response(raw);
        assert_eq!(out["results"], json!([{"a": 1}, "not json"]));
        assert_eq!(out["success"], true);
    }

    #[test]
    fn plain_record_gains_success_and_aliases() {
        let out = normalize_response(json!({"data": [1, 2, 3]}));
        assert_eq!(out["success"], true);
        assert_eq!(out["items"], json!([1, 2, 3]));
        assert_eq!(out["first"], 1);
        assert_eq!(out["last"], 3);
        assert_eq!(out["length"], 3);
    }

    #[test]
    fn textual_record_gains_text_aliases() {
        let out = normalize_response(json!({"stdout": "done"}));
        assert_eq!(out["success"], true);
        assert_eq!(out["text"], "done");
        assert_eq!(out["output"], "done");
        assert_eq!(out["value"], "done");
    }

    #[test]
    fn error_field_forces_failure_and_is_stringified() {
        let out = normalize_response(json!({"error": {"code": 7}}));
        assert_eq!(out["success"], false);
        assert_eq!(out["error"], "{\"code\":7}");
    }

    #[test]
    fn scalars_and_arrays_are_wrapped() {
        let out = normalize_response(json!(42));
        assert_eq!(out["success"], true);
        assert_eq!(out["value"], 42);

        let out = normalize_response(json!([1, 2]));
        assert_eq!(out["items"], json!([1, 2]));
        assert_eq!(out["length"], 2);
    }

    #[test]
    fn normalization_is_idempotent() {
        let inputs = vec![
            json!({"content": [{"type": "text", "text": "{\"markdown\":\"hi\"}"}]}),
            json!({"content": [{"type": "text", "text": "plain"}]}),
            json!({"content": [{"type": "text", "text": "x"}], "isError": true}),
            json!({"data": [1, 2, 3]}),
            json!({"stdout": "done"}),
            json!({"error": "boom"}),
            json!(42),
            json!([1, 2]),
            json!(null),
            json!({"success": true}),
        ];
        for input in inputs {
            let once = normalize_response(input);
            let twice = normalize_response(once.clone());
            assert_eq!(once, twice);
        }
    }
}
