use serde_json::Value;

/// Keys that are never copied from a merge source, at any depth.
pub const FORBIDDEN_MERGE_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// Recursively merge `source` into `target`.
///
/// Objects merge key by key; any other source value replaces the target value.
/// Keys listed in [`FORBIDDEN_MERGE_KEYS`] are skipped so untrusted documents
/// cannot smuggle prototype-style keys into merged configuration or payloads.
pub fn deep_merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, source_value) in source_map {
                if FORBIDDEN_MERGE_KEYS.contains(&key.as_str()) {
                    continue;
                }
                match target_map.get_mut(key) {
                    Some(existing) if existing.is_object() && source_value.is_object() => {
                        deep_merge(existing, source_value);
                    }
                    _ => {
                        target_map.insert(key.clone(), sanitized(source_value));
                    }
                }
            }
        }
        (target, source) => *target = sanitized(source),
    }
}

/// Copy of `value` with forbidden keys removed from every nested object
fn sanitized(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !FORBIDDEN_MERGE_KEYS.contains(&key.as_str()))
                .map(|(key, nested)| (key.clone(), sanitized(nested)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitized).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_nested_objects() {
        let mut target = json!({"a": 1, "b": {"c": 3}});
        deep_merge(&mut target, &json!({"b": {"d": 4}, "e": 5}));

        assert_eq!(target, json!({"a": 1, "b": {"c": 3, "d": 4}, "e": 5}));
    }

    #[test]
    fn test_proto_key_is_not_copied() {
        let mut target = json!({});
        deep_merge(&mut target, &json!({"__proto__": {"polluted": true}}));

        assert_eq!(target, json!({}));
        assert!(target.get("polluted").is_none());
        assert!(target.get("__proto__").is_none());
    }

    #[test]
    fn test_forbidden_keys_are_stripped_at_depth() {
        let mut target = json!({"server": {"port": 1}});
        let source = json!({
            "server": {"constructor": {"prototype": {"polluted": true}}, "host": "0.0.0.0"},
            "fresh": {"prototype": 1, "kept": [{"__proto__": 2, "x": 3}]}
        });
        deep_merge(&mut target, &source);

        assert_eq!(
            target,
            json!({
                "server": {"port": 1, "host": "0.0.0.0"},
                "fresh": {"kept": [{"x": 3}]}
            })
        );
    }

    #[test]
    fn test_non_object_source_replaces_target() {
        let mut target = json!({"list": [1, 2], "flag": {"on": true}});
        deep_merge(&mut target, &json!({"list": [3], "flag": false}));

        assert_eq!(target, json!({"list": [3], "flag": false}));
    }
}
