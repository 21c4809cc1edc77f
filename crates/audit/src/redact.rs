//! Scrubbing of credential-like values before they reach the audit log.

use serde_json::Value;

pub const REDACTED: &str = "[REDACTED]";

/// Case-insensitive substrings that mark a key as sensitive.
const SENSITIVE_KEY_PARTS: &[&str] = &[
    "password",
    "passwd",
    "token",
    "key",
    "secret",
    "cookie",
    "auth",
    "credential",
    "session",
];

pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEY_PARTS.iter().any(|part| key.contains(part))
}

/// Replace the value of every sensitive key, at any depth, with [`REDACTED`].
pub fn redact(mut value: Value) -> Value {
    redact_in_place(&mut value);
    value
}

fn redact_in_place(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if is_sensitive_key(key) {
                    *child = Value::String(REDACTED.to_string());
                } else {
                    redact_in_place(child);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_in_place),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn top_level_keys_are_redacted() {
        let out = redact(json!({"query": "rust", "api_key": "abc", "Password": "hunter2"}));
        assert_eq!(out, json!({"query": "rust", "api_key": REDACTED, "Password": REDACTED}));
    }

    #[test]
    fn nested_objects_and_arrays_are_walked() {
        let out = redact(json!({
            "headers": {"Cookie": "sid=1", "accept": "json"},
            "accounts": [{"user": "a", "refresh_token": "t"}, {"user": "b"}],
        }));
        assert_eq!(
            out,
            json!({
                "headers": {"Cookie": REDACTED, "accept": "json"},
                "accounts": [{"user": "a", "refresh_token": REDACTED}, {"user": "b"}],
            })
        );
    }

    #[test]
    fn sensitive_key_replaces_whole_subtree() {
        let out = redact(json!({"auth": {"user": "a", "pass": "b"}}));
        assert_eq!(out, json!({"auth": REDACTED}));
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!(redact(json!("token")), json!("token"));
        assert_eq!(redact(json!([1, 2])), json!([1, 2]));
    }
}
