//! Merge patch bodies for the status subresource

use crds::KubeBMCStatus;
use serde_json::{json, Value};

/// Builds the merge patch that makes the live status equal `status`.
///
/// Every field is written out. `error` is sent as an explicit `null` when it
/// is unset so the server removes any previously recorded error.
pub fn status_patch(status: &KubeBMCStatus) -> Value {
    json!({
        "status": {
            "serviceIP": status.service_ip,
            "ready": status.ready,
            "error": status.error,
        }
    })
}

/// Applies `patch` to `target` as a JSON merge patch (RFC 7386).
#[cfg(any(test, feature = "test-util"))]
pub(crate) fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
