//! Runtime description of a resource kind.
//!
//! Generated controllers declare one `static` [`KindSpec`] each; everything in here is
//! `'static` so that it can be built in a constant context.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{cluster::ApiRef, Error, Result};

/// Everything the engine needs to know about a kind.
#[derive(Debug, Serialize)]
pub struct KindSpec {
    /// Dotted reference of the kind, e.g. `k8s.core.v1.service`
    pub reference: &'static str,

    /// Short lowercase name of the resource
    pub resource: &'static str,

    /// Where the kind lives in the cluster API
    pub api: ApiRef,

    /// Names of the cluster client operations this kind was generated from
    pub operations: Operations,

    /// Name of the payload type the marshaller targets
    pub payload_type: &'static str,

    /// Declared arguments, checked before any cluster call
    pub arguments: &'static [Argument],

    /// How top-level desired fields fold into the observed state
    pub state_parameters: &'static [StateParameter],

    pub policy: StatePolicy,

    pub waiters: Waiters,
}

impl KindSpec {
    /// Key under which `describe` lists the fragments of one instance
    pub fn present_key(&self) -> String {
        format!("{}.present", self.reference)
    }
}

/// Cluster client operation names, kept for logs and generated docs
#[derive(Debug, Serialize)]
pub struct Operations {
    pub api_class: &'static str,
    pub get: &'static str,
    pub create: &'static str,
    pub update: &'static str,
    pub delete: &'static str,
    pub list: &'static str,
    pub waiter: &'static str,
}

/// A declared argument of the desired state.
#[derive(Debug, Serialize)]
pub struct Argument {
    pub name: &'static str,
    pub doc: &'static str,
    #[serde(rename = "type")]
    pub kind: ArgumentType,
    pub required: bool,

    /// JSON literal inserted at `target` when the argument is missing
    pub default: Option<&'static str>,

    /// Dotted path of the argument inside the desired state
    pub target: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentType {
    String,
    Integer,
    Boolean,
    Mapping,
    List,
    Any,
}

impl ArgumentType {
    fn admits(&self, value: &Value) -> bool {
        match self {
            ArgumentType::String => value.is_string(),
            ArgumentType::Integer => value.is_i64() || value.is_u64(),
            ArgumentType::Boolean => value.is_boolean(),
            ArgumentType::Mapping => value.is_object(),
            ArgumentType::List => value.is_array(),
            ArgumentType::Any => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StateParameter {
    pub name: &'static str,
    pub source: ParameterSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterSource {
    /// Fold into the observed value
    Merge,
    /// Replace the observed value
    PassThrough,
    /// Fill in this JSON literal when neither side carries the field
    Default(&'static str),
}

#[derive(Debug, Default, Serialize)]
pub struct StatePolicy {
    /// Export `status` from `describe` and in operation results
    pub keep_status: bool,

    /// Schema paths of sequences whose order matters in a diff
    pub ordered_fields: &'static [&'static str],

    /// Send fields the typed payload does not know about
    pub preserve_unknown_fields: bool,

    /// Turn an update of a vanished object into a create
    pub recreate_on_missing: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct Waiters {
    pub create: WaiterSpec,
    pub delete: WaiterSpec,
}

/// Paths projected out of each observation before the acceptor sees it.
///
/// An empty projection hands the acceptor the whole document.
#[derive(Debug, Default, Serialize)]
pub struct WaiterSpec {
    pub projection: &'static [Projection],
}

#[derive(Debug, Serialize)]
pub struct Projection {
    pub name: &'static str,
    pub path: &'static str,
}

/// Look up a dotted path.
pub fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(document, |value, segment| value.get(segment))
}

/// Write `value` at a dotted path, creating intermediate mappings.
pub fn insert_at(document: &mut Value, path: &str, value: Value) {
    let (parents, key) = path.rsplit_once('.').unwrap_or(("", path));

    let mut current = document;
    for segment in parents.split('.').filter(|s| !s.is_empty()) {
        current = mapping(current)
            .entry(segment)
            .or_insert_with(|| Value::Object(Map::new()));
    }
    mapping(current).insert(key.to_string(), value);
}

fn mapping(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }

    match value {
        Value::Object(fields) => fields,
        _ => unreachable!("replaced by a mapping above"),
    }
}

/// Check a desired state against the kind's declared arguments.
///
/// Missing arguments with a default get the default written in; missing required arguments
/// and values of the wrong type are reported together.
pub fn check_arguments(spec: &KindSpec, desired: &mut Value) -> Result<()> {
    let mut problems = Vec::new();

    for argument in spec.arguments {
        match lookup(desired, argument.target).filter(|v| !v.is_null()) {
            Some(value) if !argument.kind.admits(value) => problems.push(format!(
                "argument `{}` at `{}` must be of type {:?}",
                argument.name, argument.target, argument.kind
            )),
            Some(_) => {}
            None => match argument.default.map(serde_json::from_str::<Value>) {
                Some(Ok(default)) => insert_at(desired, argument.target, default),
                Some(Err(e)) => problems.push(format!(
                    "argument `{}` has an unreadable default: {e}",
                    argument.name
                )),
                None if argument.required => problems.push(format!(
                    "missing required argument `{}` at `{}`",
                    argument.name, argument.target
                )),
                None => {}
            },
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::ValidationFailed(problems.join("; ")))
    }
}
