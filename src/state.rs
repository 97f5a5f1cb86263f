//! Desired and observed state documents.
//!
//! Documents are `serde_json::Value`s in Kubernetes wire casing. The helpers here never touch
//! the cluster: they turn an observed object into something comparable, fold a desired state
//! over it and report what differs.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube_quantity::ParsedQuantity;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::schema::{ParameterSource, StateParameter};

pub const DEFAULT_NAMESPACE: &str = "default";

/// Metadata the API server owns and which therefore never counts as drift
const SERVER_METADATA: [&str; 6] = [
    "uid",
    "resourceVersion",
    "generation",
    "creationTimestamp",
    "selfLink",
    "managedFields",
];

/// Top-level fields that are bookkeeping rather than desired state
const UNCOMPARED_FIELDS: [&str; 4] = ["resource_id", "status", "apiVersion", "kind"];

/// Namespace of a desired state, written back into its metadata.
pub fn resolve_namespace(desired: &mut Value, default: &str) -> String {
    if !desired.is_object() {
        *desired = Value::Object(Map::new());
    }

    let metadata = desired
        .as_object_mut()
        .map(|d| d.entry("metadata").or_insert_with(|| Value::Object(Map::new())));

    match metadata {
        Some(Value::Object(metadata)) => {
            let namespace = metadata
                .get("namespace")
                .and_then(Value::as_str)
                .filter(|ns| !ns.is_empty())
                .unwrap_or(default)
                .to_string();
            metadata.insert("namespace".into(), Value::String(namespace.clone()));

            namespace
        }
        _ => default.to_string(),
    }
}

/// Strip every field that must not take part in a diff.
pub fn normalize(state: &Value) -> Value {
    let mut state = state.clone();

    if let Some(fields) = state.as_object_mut() {
        for field in UNCOMPARED_FIELDS {
            fields.remove(field);
        }

        if let Some(Value::Object(metadata)) = fields.get_mut("metadata") {
            for field in SERVER_METADATA {
                metadata.remove(field);
            }
        }
    }

    state
}

/// Fold `desired` over `observed`.
///
/// Mappings merge key by key with the desired side winning, so fields the server defaulted
/// (a service's `clusterIP`, a port's `protocol`) are carried forward. A `null` in `desired`
/// removes the field. Lists of mappings pair up by `name` when every desired entry has one.
/// Otherwise lists whose schema path is in `ordered` pair by position, and all other lists
/// pair each desired entry with an observed entry that agrees on every field the desired
/// entry sets. Unpaired desired entries are taken as they are.
pub fn merge(desired: &Value, observed: &Value, ordered: &[&str]) -> Value {
    merge_at(desired, observed, "", ordered)
}

fn merge_at(desired: &Value, observed: &Value, schema: &str, ordered: &[&str]) -> Value {
    match (desired, observed) {
        (Value::Object(desired), Value::Object(observed)) => {
            let mut merged = observed.clone();
            for (key, value) in desired {
                if value.is_null() {
                    merged.remove(key);
                    continue;
                }

                let value = match observed.get(key) {
                    Some(current) => merge_at(value, current, &join(schema, key), ordered),
                    None => strip_nulls(value),
                };
                merged.insert(key.clone(), value);
            }

            Value::Object(merged)
        }
        (Value::Array(desired), Value::Array(observed)) => {
            merge_sequences(desired, observed, schema, ordered)
        }
        (desired, _) => strip_nulls(desired),
    }
}

fn join(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{base}.{key}")
    }
}

fn merge_sequences(desired: &[Value], observed: &[Value], schema: &str, ordered: &[&str]) -> Value {
    let named = !desired.is_empty()
        && desired
            .iter()
            .all(|item| item.get("name").map_or(false, |name| !name.is_null()));

    let merged = if named {
        desired
            .iter()
            .map(|item| {
                let current = observed
                    .iter()
                    .find(|candidate| candidate.get("name") == item.get("name"));

                match current {
                    Some(current) => merge_at(item, current, schema, ordered),
                    None => strip_nulls(item),
                }
            })
            .collect()
    } else if ordered.contains(&schema) {
        desired
            .iter()
            .enumerate()
            .map(|(index, item)| match observed.get(index) {
                Some(current) => merge_at(item, current, schema, ordered),
                None => strip_nulls(item),
            })
            .collect()
    } else {
        let mut paired = vec![false; observed.len()];
        desired
            .iter()
            .map(|item| {
                let partner = observed
                    .iter()
                    .enumerate()
                    .position(|(i, current)| !paired[i] && covers(item, current, schema, ordered));

                match partner {
                    Some(i) => {
                        paired[i] = true;
                        merge_at(item, &observed[i], schema, ordered)
                    }
                    None => strip_nulls(item),
                }
            })
            .collect()
    };

    Value::Array(merged)
}

/// Whether `observed` agrees with every field `desired` sets
fn covers(desired: &Value, observed: &Value, schema: &str, ordered: &[&str]) -> bool {
    match (desired, observed) {
        (Value::Object(desired), Value::Object(observed)) => {
            desired.iter().filter(|(_, value)| !value.is_null()).all(|(key, value)| {
                observed
                    .get(key)
                    .map_or(false, |current| covers(value, current, &join(schema, key), ordered))
            })
        }
        (desired, observed) => same(observed, desired, schema, ordered),
    }
}

fn strip_nulls(value: &Value) -> Value {
    match value {
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_nulls).collect()),
        other => other.clone(),
    }
}

/// Merge a desired state over an observed one, honouring the kind's state parameters.
///
/// `pass_through` parameters replace the observed value instead of merging into it, and
/// `default` parameters are filled in when neither side has them. Lists pair up as in
/// [`merge`].
pub fn merge_state(
    desired: &Value,
    observed: Option<&Value>,
    parameters: &[StateParameter],
    ordered: &[&str],
) -> Value {
    let mut merged = observed
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    if let Some(desired) = desired.as_object() {
        for (key, value) in desired {
            let source = parameters
                .iter()
                .find(|p| p.name == key.as_str())
                .map(|p| p.source);

            if value.is_null() {
                merged.remove(key);
                continue;
            }

            let value = match (source, merged.get(key)) {
                (Some(ParameterSource::PassThrough), _) | (_, None) => strip_nulls(value),
                (_, Some(current)) => merge_at(value, current, key, ordered),
            };
            merged.insert(key.clone(), value);
        }
    }

    for parameter in parameters {
        if let ParameterSource::Default(literal) = parameter.source {
            if !merged.contains_key(parameter.name) {
                if let Ok(value) = serde_json::from_str::<Value>(literal) {
                    if !value.is_null() {
                        merged.insert(parameter.name.into(), value);
                    }
                }
            }
        }
    }

    Value::Object(merged)
}

/// What happened to a single field between two documents
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Add,
    Remove,
    Modify,
}

/// A field-level discrepancy between the observed and the desired state.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Change {
    pub path: String,
    pub op: ChangeOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
}

/// Compare two documents field by field.
///
/// Lists are compared as multisets unless their schema path (keys joined by `.`, indices
/// dropped) is listed in `ordered`. Quantity strings compare by value.
pub fn diff(old: &Value, new: &Value, ordered: &[&str]) -> Vec<Change> {
    let mut changes = Vec::new();
    walk(old, new, &Path::root(), ordered, &mut changes);

    changes
}

/// Whether two documents are equal under the diff rules.
pub fn equivalent(old: &Value, new: &Value, ordered: &[&str]) -> bool {
    same(old, new, "", ordered)
}

#[derive(Clone)]
struct Path {
    display: String,
    schema: String,
}

impl Path {
    fn root() -> Self {
        Self {
            display: String::new(),
            schema: String::new(),
        }
    }

    fn key(&self, key: &str) -> Self {
        let join = |base: &str| {
            if base.is_empty() {
                key.to_string()
            } else {
                format!("{base}.{key}")
            }
        };

        Self {
            display: join(&self.display),
            schema: join(&self.schema),
        }
    }

    fn index(&self, index: usize) -> Self {
        Self {
            display: format!("{}[{index}]", self.display),
            schema: self.schema.clone(),
        }
    }
}

fn walk(old: &Value, new: &Value, path: &Path, ordered: &[&str], changes: &mut Vec<Change>) {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => {
            for (key, value) in new {
                match old.get(key) {
                    Some(current) => walk(current, value, &path.key(key), ordered, changes),
                    None => changes.push(Change {
                        path: path.key(key).display,
                        op: ChangeOp::Add,
                        old: None,
                        new: Some(value.clone()),
                    }),
                }
            }

            for (key, value) in old {
                if !new.contains_key(key) {
                    changes.push(Change {
                        path: path.key(key).display,
                        op: ChangeOp::Remove,
                        old: Some(value.clone()),
                        new: None,
                    });
                }
            }
        }
        (Value::Array(old), Value::Array(new)) if ordered.contains(&path.schema.as_str()) => {
            for (index, (current, value)) in old.iter().zip(new).enumerate() {
                walk(current, value, &path.index(index), ordered, changes);
            }
            for (index, value) in new.iter().enumerate().skip(old.len()) {
                changes.push(Change {
                    path: path.index(index).display,
                    op: ChangeOp::Add,
                    old: None,
                    new: Some(value.clone()),
                });
            }
            for (index, current) in old.iter().enumerate().skip(new.len()) {
                changes.push(Change {
                    path: path.index(index).display,
                    op: ChangeOp::Remove,
                    old: Some(current.clone()),
                    new: None,
                });
            }
        }
        (Value::Array(old), Value::Array(new)) => {
            let mut matched = vec![false; old.len()];
            for (index, value) in new.iter().enumerate() {
                let partner = old
                    .iter()
                    .enumerate()
                    .position(|(i, current)| !matched[i] && same(current, value, &path.schema, ordered));

                match partner {
                    Some(i) => matched[i] = true,
                    None => changes.push(Change {
                        path: path.index(index).display,
                        op: ChangeOp::Add,
                        old: None,
                        new: Some(value.clone()),
                    }),
                }
            }

            for (index, current) in old.iter().enumerate() {
                if !matched[index] {
                    changes.push(Change {
                        path: path.index(index).display,
                        op: ChangeOp::Remove,
                        old: Some(current.clone()),
                        new: None,
                    });
                }
            }
        }
        (old, new) => {
            if !same(old, new, &path.schema, ordered) {
                changes.push(Change {
                    path: path.display.clone(),
                    op: ChangeOp::Modify,
                    old: Some(old.clone()),
                    new: Some(new.clone()),
                });
            }
        }
    }
}

fn same(old: &Value, new: &Value, schema: &str, ordered: &[&str]) -> bool {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => {
            old.len() == new.len()
                && new.iter().all(|(key, value)| {
                    old.get(key)
                        .map_or(false, |current| same(current, value, &join(schema, key), ordered))
                })
        }
        (Value::Array(old), Value::Array(new)) => {
            if old.len() != new.len() {
                return false;
            }

            if ordered.contains(&schema) {
                return old
                    .iter()
                    .zip(new)
                    .all(|(current, value)| same(current, value, schema, ordered));
            }

            let mut matched = vec![false; old.len()];
            new.iter().all(|value| {
                let partner = old
                    .iter()
                    .enumerate()
                    .position(|(i, current)| !matched[i] && same(current, value, schema, ordered));

                match partner {
                    Some(i) => {
                        matched[i] = true;
                        true
                    }
                    None => false,
                }
            })
        }
        (Value::String(old), Value::String(new)) => old == new || same_quantity(old, new),
        (old, new) => old == new,
    }
}

fn has_unit_suffix(value: &str) -> bool {
    value.chars().last().map_or(false, |c| c.is_ascii_alphabetic())
}

fn parse_quantity(value: &str) -> Option<ParsedQuantity> {
    let starts_numeric = value
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_digit() || c == '.' || c == '+' || c == '-');
    if !starts_numeric {
        return None;
    }

    ParsedQuantity::try_from(Quantity(value.to_string())).ok()
}

/// `1Gi` and `1024Mi` are the same amount of storage, `1000m` and `1` the same CPU
fn same_quantity(old: &str, new: &str) -> bool {
    if !has_unit_suffix(old) && !has_unit_suffix(new) {
        return false;
    }

    match (parse_quantity(old), parse_quantity(new)) {
        (Some(old), Some(new)) => old == new,
        _ => false,
    }
}
