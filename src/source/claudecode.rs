//! Claude Code record format
//!
//! Data format: JSONL files in ~/.claude/projects/<project_hash>/<session_id>.jsonl.
//! Two shapes occur in the wild: flat records (`{type, role, content, ...}`)
//! and envelope records whose payload sits under `message`.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{RecordFormat, SourceRecord};

pub struct ClaudeCodeFormat;

impl ClaudeCodeFormat {
    fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
        value.get(key).and_then(|v| v.as_str())
    }

    /// Field from the record itself, falling back to its `message` envelope.
    fn lookup<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
        value
            .get(key)
            .filter(|v| !v.is_null())
            .or_else(|| value.get("message").and_then(|m| m.get(key)))
            .filter(|v| !v.is_null())
    }

    fn role_for(value: &Value, message_type: &str) -> String {
        if let Some(role) = Self::lookup(value, "role").and_then(|v| v.as_str()) {
            return role.to_string();
        }
        match message_type {
            "user" => "user",
            "assistant" => "assistant",
            "tool_use" | "tool_result" => "tool",
            "summary" => "summary",
            "system" => "system",
            _ => "unknown",
        }
        .to_string()
    }

    fn cost(value: &Value) -> Option<f64> {
        ["cost_usd", "costUSD", "cost"]
            .iter()
            .find_map(|key| Self::lookup(value, key))
            .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
    }

    fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
        Self::str_field(value, "timestamp")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Pieces pulled out of a `content` value.
#[derive(Default)]
struct Content {
    text: Option<String>,
    tool_name: Option<String>,
    tool_input: Option<String>,
    tool_output: Option<String>,
}

fn tool_result_text(item: &Value) -> Option<String> {
    match item.get("content") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(parts)) => {
            let joined: Vec<&str> = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect();
            (!joined.is_empty()).then(|| joined.join("\n"))
        }
        Some(other) if !other.is_null() => Some(other.to_string()),
        _ => None,
    }
}

fn split_content(content: Option<&Value>) -> Content {
    let mut out = Content::default();
    match content {
        None | Some(Value::Null) => {}
        Some(Value::String(s)) => out.text = Some(s.clone()),
        Some(Value::Array(items)) => {
            let mut texts = Vec::new();
            for item in items {
                match item.get("type").and_then(|t| t.as_str()) {
                    Some("text") => {
                        if let Some(t) = item.get("text").and_then(|t| t.as_str()) {
                            texts.push(t.to_string());
                        }
                    }
                    Some("tool_use") if out.tool_name.is_none() => {
                        out.tool_name = item.get("name").and_then(|n| n.as_str()).map(String::from);
                        out.tool_input = item.get("input").map(|i| i.to_string());
                    }
                    Some("tool_result") if out.tool_output.is_none() => {
                        out.tool_output = tool_result_text(item);
                    }
                    _ => {}
                }
            }
            out.text = if texts.is_empty() {
                // nothing textual: keep the structure rather than drop it
                (!items.is_empty()).then(|| Value::Array(items.clone()).to_string())
            } else {
                Some(texts.join("\n"))
            };
        }
        Some(other) => out.text = Some(other.to_string()),
    }
    out
}

impl RecordFormat for ClaudeCodeFormat {
    fn decode(&self, value: &Value) -> SourceRecord {
        if !value.is_object() {
            return SourceRecord {
                message_index: 0,
                line_number: 0,
                message_type: "unknown".to_string(),
                role: "unknown".to_string(),
                content: Some(value.to_string()),
                timestamp: None,
                model: None,
                cost_usd: None,
                tool_name: None,
                tool_input: None,
                tool_output: None,
                unknown_shape: true,
            };
        }

        let declared_type = Self::str_field(value, "type");
        let message_type = declared_type.unwrap_or("unknown").to_string();
        let role = Self::role_for(value, &message_type);
        let content = split_content(Self::lookup(value, "content"));

        // flat tool records carry name/input/output at the top level
        let tool_name = content.tool_name.or_else(|| {
            (message_type == "tool_use")
                .then(|| Self::str_field(value, "name").map(String::from))
                .flatten()
        });
        let tool_input = content
            .tool_input
            .or_else(|| value.get("input").filter(|v| !v.is_null()).map(|v| v.to_string()));
        let tool_output = content.tool_output.or_else(|| {
            (message_type == "tool_result")
                .then(|| value.get("output").filter(|v| !v.is_null()))
                .flatten()
                .map(|v| v.as_str().map(String::from).unwrap_or_else(|| v.to_string()))
        });

        SourceRecord {
            message_index: 0,
            line_number: 0,
            unknown_shape: declared_type.is_none() && role == "unknown",
            message_type,
            role,
            content: content.text,
            timestamp: Self::timestamp(value),
            model: Self::lookup(value, "model")
                .and_then(|v| v.as_str())
                .map(String::from),
            cost_usd: Self::cost(value),
            tool_name,
            tool_input,
            tool_output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> SourceRecord {
        ClaudeCodeFormat.decode(&value)
    }

    #[test]
    fn test_flat_record() {
        let r = decode(json!({
            "type": "user",
            "role": "user",
            "content": "hello world",
            "timestamp": "2024-05-01T10:00:00Z",
            "cost_usd": 0.25
        }));
        assert_eq!(r.role, "user");
        assert_eq!(r.content.as_deref(), Some("hello world"));
        assert_eq!(r.cost_usd, Some(0.25));
        assert_eq!(r.timestamp.unwrap().to_rfc3339(), "2024-05-01T10:00:00+00:00");
        assert!(!r.unknown_shape);
    }

    #[test]
    fn test_envelope_record_with_tool_use() {
        let r = decode(json!({
            "type": "assistant",
            "message": {
                "role": "assistant",
                "model": "claude-sonnet-4",
                "content": [
                    {"type": "text", "text": "Reading the file."},
                    {"type": "tool_use", "id": "t1", "name": "Read", "input": {"path": "a.rs"}}
                ]
            },
            "costUSD": 0.01
        }));
        assert_eq!(r.role, "assistant");
        assert_eq!(r.model.as_deref(), Some("claude-sonnet-4"));
        assert_eq!(r.content.as_deref(), Some("Reading the file."));
        assert_eq!(r.tool_name.as_deref(), Some("Read"));
        assert_eq!(r.tool_input.as_deref(), Some("{\"path\":\"a.rs\"}"));
        assert_eq!(r.cost_usd, Some(0.01));
    }

    #[test]
    fn test_tool_result_item() {
        let r = decode(json!({
            "type": "user",
            "message": {
                "role": "user",
                "content": [{"type": "tool_result", "tool_use_id": "t1", "content": "fn main() {}"}]
            }
        }));
        assert_eq!(r.tool_output.as_deref(), Some("fn main() {}"));
        // no text items, so the structure is kept as the content
        assert!(r.content.unwrap().contains("tool_result"));
    }

    #[test]
    fn test_flat_tool_records() {
        let r = decode(json!({"type": "tool_use", "name": "Bash", "input": {"cmd": "ls"}}));
        assert_eq!(r.role, "tool");
        assert_eq!(r.tool_name.as_deref(), Some("Bash"));
        let r = decode(json!({"type": "tool_result", "output": "ok"}));
        assert_eq!(r.tool_output.as_deref(), Some("ok"));
    }

    #[test]
    fn test_unknown_shapes_are_flagged() {
        assert!(decode(json!(42)).unknown_shape);
        assert!(decode(json!({"foo": "bar"})).unknown_shape);
        assert_eq!(decode(json!({"foo": "bar"})).message_type, "unknown");
    }
}
