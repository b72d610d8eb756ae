//! Dotted-path lookups into JSON documents

use serde_json::Value;

/// Look up a dotted path such as `data.sources.0.file`
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render a scalar JSON value as text; objects and arrays yield `None`
pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse `body` and return the text at `path`
pub fn text_at(body: &str, path: &str) -> Option<String> {
    let document: Value = serde_json::from_str(body).ok()?;
    lookup(&document, path).and_then(as_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_nested() {
        let doc = json!({"data": {"sources": [{"file": "abc"}, {"file": "def"}]}});
        assert_eq!(lookup(&doc, "data.sources.1.file"), Some(&json!("def")));
        assert_eq!(lookup(&doc, "data.sources.5.file"), None);
        assert_eq!(lookup(&doc, "data.missing"), None);
    }

    #[test]
    fn test_as_text() {
        assert_eq!(as_text(&json!("x")), Some("x".to_string()));
        assert_eq!(as_text(&json!(42)), Some("42".to_string()));
        assert_eq!(as_text(&json!("")), None);
        assert_eq!(as_text(&json!({"a": 1})), None);
    }

    #[test]
    fn test_text_at() {
        assert_eq!(
            text_at(r#"{"result":{"hash":"9f8e"}}"#, "result.hash").as_deref(),
            Some("9f8e")
        );
        assert_eq!(text_at("<html></html>", "result.hash"), None);
    }
}
