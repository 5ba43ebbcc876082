//! First-match key lookup over parsed FHIR JSON.

use serde_json::{Map, Value};

/// A view of one node in a parsed document.
#[derive(Debug, Clone, Copy)]
pub enum DocumentNode<'a> {
    Object(&'a Map<String, Value>),
    Array(&'a [Value]),
    Scalar(&'a Value),
}

impl<'a> From<&'a Value> for DocumentNode<'a> {
    fn from(value: &'a Value) -> Self {
        match value {
            Value::Object(fields) => DocumentNode::Object(fields),
            Value::Array(items) => DocumentNode::Array(items),
            other => DocumentNode::Scalar(other),
        }
    }
}

/// Look up `key` in `document`, descending into nested objects only.
///
/// Fields are visited in document order. A field holding an object is
/// descended into instead of being compared, and the first such descent ends
/// the search at this level: its result (found or not) is returned without
/// visiting later siblings. Arrays are never entered, so bundle entries must
/// be walked by the caller.
pub fn find_key<'a>(document: &'a Value, key: &str) -> Option<&'a Value> {
    match DocumentNode::from(document) {
        DocumentNode::Object(fields) => search_fields(fields, key),
        DocumentNode::Array(_) | DocumentNode::Scalar(_) => None,
    }
}

/// [`find_key`] restricted to string values.
pub fn find_str<'a>(document: &'a Value, key: &str) -> Option<&'a str> {
    find_key(document, key).and_then(Value::as_str)
}

fn search_fields<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    for (name, value) in fields {
        match DocumentNode::from(value) {
            DocumentNode::Object(nested) => return search_fields(nested, key),
            DocumentNode::Array(_) | DocumentNode::Scalar(_) if name == key => return Some(value),
            DocumentNode::Array(_) | DocumentNode::Scalar(_) => {}
        }
    }
    None
}
