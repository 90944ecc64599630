//! Dot-path writes into the JSON context.

use serde_json::{Map, Value};

/// Sets `path` (e.g. `a.b.c`) in `target`, creating intermediate objects.
///
/// Numeric segments are treated as string keys, not array indices. An
/// intermediate value that is not an object is replaced by one.
pub fn set_path(target: &mut Value, path: &str, value: Value) {
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let mut cursor = target;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let map = cursor.as_object_mut().expect("cursor is always an object");
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        let entry = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        cursor = entry;
    }
}

/// Reads `path` from `target`, returning `None` if any segment is missing.
pub fn get_path<'a>(target: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cursor = target;
    for segment in path.split('.') {
        cursor = cursor.as_object()?.get(segment)?;
    }
    Some(cursor)
}
