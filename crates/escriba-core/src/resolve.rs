use serde_json::Value;

/// Walk a dotted path ("client.group_name") through the serialized context.
///
/// Only plain object members are addressable: numeric segments, list
/// elements and wildcards all fail the walk, as do missing intermediates.
/// Returns the raw leaf value; formatting is the block compiler's job.
/// `Some(Value::String(""))` is a successful resolution and is distinct
/// from `None` (an absent key).
pub fn resolve<'a>(path: &str, context: &'a Value) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let mut current = context;
    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }
        current = current.as_object()?.get(segment)?;
    }
    // Only scalar leaves are renderable.
    match current {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => Some(current),
        _ => None,
    }
}
