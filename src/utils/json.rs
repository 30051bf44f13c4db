use serde_json::Value;

/// Decode the stored document list of an application.
///
/// The column holds a JSON array of storage keys. Older rows hold a bare
/// string with a single key; those are read as a one-element list.
pub fn decode_document_list(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Vec::new();
    };

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(path) if !path.trim().is_empty() => Some(path),
                _ => None,
            })
            .collect(),
        Ok(Value::String(path)) if !path.trim().is_empty() => vec![path],
        Ok(Value::Null) => Vec::new(),
        _ => vec![raw.to_string()],
    }
}

/// Append `path` to the stored list, upgrading the legacy format on write.
pub fn append_document(raw: Option<&str>, path: &str) -> String {
    let mut paths = decode_document_list(raw);
    paths.push(path.to_string());
    Value::from(paths).to_string()
}
