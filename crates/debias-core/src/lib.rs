use std::collections::BTreeMap;

use serde_json::Value;

mod dataset;

pub use dataset::{Cell, ColumnKind, ColumnSpec, DataError, Dataset, Schema};

pub type NodeId = String;

pub type Attributes = BTreeMap<String, Value>;

pub const PROTECTED_ATTR: &str = "protected";

pub fn is_protected(attrs: &Attributes) -> bool {
    attrs
        .get(PROTECTED_ATTR)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

pub fn protected_attrs() -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert(PROTECTED_ATTR.to_owned(), Value::Bool(true));
    attrs
}

pub fn normalize_node_ids<I, S>(ids: I) -> Vec<NodeId>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut normalized = Vec::new();
    for id in ids {
        let id = id.as_ref().trim();
        if id.is_empty() || !seen.insert(id.to_owned()) {
            continue;
        }
        normalized.push(id.to_owned());
    }
    normalized
}
