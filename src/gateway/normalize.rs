use serde_json::Value;

/// Extract the record list from a gateway collection response.
///
/// Depending on version the gateway answers with a bare array, or an object
/// wrapping the array under a resource-specific key or under `data`. Priority
/// is fixed: bare array, then `key`, then `data`, then empty.
pub fn normalize_collection(body: Value, key: &str) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut obj) => [key, "data"]
            .iter()
            .find_map(|k| match obj.remove(*k) {
                Some(Value::Array(items)) if !items.is_empty() => Some(items),
                _ => None,
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}
