use serde_json::{Map, Value};

/// Creates a JSON merge patch (RFC 7386) that turns `original` into `modified`.
///
/// Keys missing from `modified` are set to `null`, so stale fields are removed when the patch
/// is applied. Arrays and scalars are replaced as a whole.
pub fn create_merge_patch(original: &Value, modified: &Value) -> Value {
    match (original, modified) {
        (Value::Object(original), Value::Object(modified)) => {
            let mut patch = Map::new();

            for (key, original_value) in original {
                match modified.get(key) {
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                    Some(modified_value) if modified_value != original_value => {
                        let nested = match (original_value, modified_value) {
                            (Value::Object(_), Value::Object(_)) => {
                                create_merge_patch(original_value, modified_value)
                            }
                            _ => modified_value.clone(),
                        };
                        patch.insert(key.clone(), nested);
                    }
                    Some(_) => {}
                }
            }

            for (key, modified_value) in modified {
                if !original.contains_key(key) {
                    patch.insert(key.clone(), modified_value.clone());
                }
            }

            Value::Object(patch)
        }
        _ => modified.clone(),
    }
}

/// Applies a JSON merge patch (RFC 7386) to `target`.
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }

    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                let entry = target.entry(key.clone()).or_insert(Value::Null);
                apply_merge_patch(entry, value);
            }
        }
    }
}
