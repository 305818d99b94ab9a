//! Shape normalization for CWL documents.
//!
//! CWL allows ports, requirements, and steps to be written either as a list
//! of maps or as a map keyed by id/class. Packing canonicalizes everything to
//! the ordered list-of-maps form; [`normalize_to_map`] is the inverse.

use serde_yaml::{Mapping, Sequence, Value};

use crate::error::{PackError, PackResult};

/// Canonicalize a list-of-maps or map value to the list-of-maps form.
///
/// Map entries become list elements with the key injected under `key_field`;
/// a scalar entry value is wrapped as `{value_field: value}` first (an error
/// if no `value_field` is designated, since the schema would be ambiguous).
pub fn normalize_to_list(
    value: Value,
    key_field: &str,
    value_field: Option<&str>,
) -> PackResult<Value> {
    match value {
        Value::Sequence(seq) => {
            for item in &seq {
                if !item.is_mapping() {
                    return Err(expecting_map(item));
                }
            }
            Ok(Value::Sequence(seq))
        }
        Value::Mapping(map) => {
            let mut out = Sequence::with_capacity(map.len());
            for (key, entry) in map {
                let mut entry = match entry {
                    Value::Mapping(m) => m,
                    scalar => match value_field {
                        Some(field) => {
                            let mut m = Mapping::new();
                            m.insert(Value::from(field), scalar);
                            m
                        }
                        None => return Err(expecting_map(&scalar)),
                    },
                };
                entry.insert(Value::from(key_field), key);
                out.push(Value::Mapping(entry));
            }
            Ok(Value::Sequence(out))
        }
        other => Err(expecting_map(&other)),
    }
}

/// Canonicalize a list-of-maps or map value to the map form, keying each
/// list element by its `key_field` entry (which is removed from the element).
pub fn normalize_to_map(value: Value, key_field: &str) -> PackResult<Value> {
    match value {
        Value::Mapping(map) => Ok(Value::Mapping(map)),
        Value::Sequence(seq) => {
            let mut out = Mapping::new();
            for item in seq {
                let mut entry = match item {
                    Value::Mapping(entry) => entry,
                    other => return Err(expecting_map(&other)),
                };
                let key = entry.remove(key_field).ok_or_else(|| PackError::MissingKeyField {
                    key_field: key_field.to_string(),
                })?;
                out.insert(key, Value::Mapping(entry));
            }
            Ok(Value::Mapping(out))
        }
        other => Err(expecting_map(&other)),
    }
}

/// Strip the leading `#` sigil from a cross-reference string.
///
/// `#name` is CWL shorthand for an absolute reference within the document;
/// after packing into a single unscoped document the sigil is meaningless.
pub fn strip_reference_sigil(reference: &str) -> &str {
    reference.strip_prefix('#').unwrap_or(reference)
}

pub(crate) fn expecting_map(found: &Value) -> PackError {
    PackError::ExpectingMap {
        found: value_kind(found).to_string(),
    }
}

/// Short human-readable name for a value's shape, used in error messages.
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a map",
        Value::Tagged(_) => "a tagged value",
    }
}
