// Record helpers
// A record is an untyped JSON object; only the `id` key is owned by the store

use serde_json::{Map, Value};

/// Reserved key holding the store-assigned identifier
pub const ID_FIELD: &str = "id";

/// One JSON object of a collection
pub type Record = Map<String, Value>;

/// Shallow merge of `patch` over `existing`.
///
/// Keys present in `patch` replace the existing value in place; new keys are
/// appended. The `id` key of `patch` is ignored.
pub fn merge(existing: &mut Record, patch: Record) {
    for (key, value) in patch {
        if key == ID_FIELD {
            continue;
        }
        existing.insert(key, value);
    }
}
