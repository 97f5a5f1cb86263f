//! The YAML model of a kind template and its validation.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::CodegenError;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct KindTemplate {
    pub function: Function,
    #[serde(default)]
    pub arguments: Vec<ArgumentTemplate>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Function {
    /// Dotted reference, e.g. `k8s.apps.v1.deployment`. The last segment names the module.
    #[serde(rename = "ref")]
    pub reference: String,
    pub hardcoded: Hardcoded,
    #[serde(default)]
    pub waiters: WaitersTemplate,
    #[serde(default)]
    pub policy: PolicyTemplate,
}

/// The fixed bindings of a kind
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Hardcoded {
    pub resource: String,
    pub api_class: String,
    pub get_function: String,
    pub create_function: String,
    pub update_function: String,
    pub delete_function: String,
    pub list_function: String,
    pub waiter_function: String,
    pub payload_type: String,

    /// Rust path of the `k8s_openapi` type the marshaller validates against
    pub payload_path: String,

    #[serde(default)]
    pub state_parameters: BTreeMap<String, StateParameterTemplate>,

    /// Rust path of a custom converter, `raw_to_present` if unset
    #[serde(default)]
    pub converter: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StateParameterTemplate {
    pub source: SourceTemplate,
    #[serde(default)]
    pub default: Option<Value>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceTemplate {
    Merge,
    PassThrough,
    Default,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WaitersTemplate {
    #[serde(default)]
    pub create: WaiterTemplate,
    #[serde(default)]
    pub delete: WaiterTemplate,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WaiterTemplate {
    /// Rust path of the acceptor, accept-everything if unset
    #[serde(default)]
    pub acceptor: Option<String>,

    /// Fields projected out of each observation, by name
    #[serde(default)]
    pub result_arguments: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyTemplate {
    pub keep_status: bool,
    pub ordered_fields: Vec<String>,
    pub preserve_unknown_fields: bool,
    pub recreate_on_missing: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ArgumentTemplate {
    pub name: String,
    #[serde(default)]
    pub doc: String,
    #[serde(rename = "type")]
    pub kind: ArgumentKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    pub target: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentKind {
    String,
    Integer,
    Boolean,
    Mapping,
    List,
    Any,
}

impl ArgumentKind {
    /// Variant name of the matching `ArgumentType`
    pub fn variant(&self) -> &'static str {
        match self {
            ArgumentKind::String => "String",
            ArgumentKind::Integer => "Integer",
            ArgumentKind::Boolean => "Boolean",
            ArgumentKind::Mapping => "Mapping",
            ArgumentKind::List => "List",
            ArgumentKind::Any => "Any",
        }
    }

    fn admits(&self, value: &Value) -> bool {
        match self {
            ArgumentKind::String => value.is_string(),
            ArgumentKind::Integer => value.is_i64() || value.is_u64(),
            ArgumentKind::Boolean => value.is_boolean(),
            ArgumentKind::Mapping => value.is_object(),
            ArgumentKind::List => value.is_array(),
            ArgumentKind::Any => true,
        }
    }
}

const KEYWORDS: &[&str] = &[
    "abstract", "as", "async", "await", "become", "box", "break", "const", "continue", "crate",
    "do", "dyn", "else", "enum", "extern", "false", "final", "fn", "for", "if", "impl", "in",
    "let", "loop", "macro", "match", "mod", "move", "mut", "override", "priv", "pub", "ref",
    "return", "self", "Self", "static", "struct", "super", "trait", "true", "try", "type",
    "typeof", "unsafe", "unsized", "use", "virtual", "where", "while", "yield",
];

pub(super) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name != "_"
}

/// A name that can become a Rust module
pub(super) fn is_module_name(name: &str) -> bool {
    is_identifier(name)
        && !KEYWORDS.contains(&name)
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn is_field_path(path: &str) -> bool {
    !path.is_empty()
        && path.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        })
}

/// A plain `a::b::C` path: no generics, no leading `::`, no keyword besides `crate`
fn is_rust_path(path: &str) -> bool {
    let well_formed = path.split("::").enumerate().all(|(i, segment)| {
        is_identifier(segment)
            && (!KEYWORDS.contains(&segment) || (i == 0 && segment == "crate"))
    });
    well_formed && syn::parse_str::<syn::Path>(path).is_ok()
}

impl KindTemplate {
    /// Module name the kind renders into
    pub fn module(&self) -> &str {
        self.function
            .reference
            .rsplit('.')
            .next()
            .unwrap_or_default()
    }

    /// Reject anything that would not render into valid, unambiguous code.
    ///
    /// All problems are reported at once.
    pub fn validate(&self) -> Result<(), CodegenError> {
        let mut problems = Vec::new();
        let function = &self.function;
        let hardcoded = &function.hardcoded;

        let segments: Vec<_> = function.reference.split('.').collect();
        if segments.len() < 2 || !segments.iter().all(|s| is_module_name(s)) {
            problems.push(format!(
                "ref `{}` must be dotted lowercase identifiers",
                function.reference
            ));
        }

        let identifiers = [
            ("resource", &hardcoded.resource),
            ("api_class", &hardcoded.api_class),
            ("get_function", &hardcoded.get_function),
            ("create_function", &hardcoded.create_function),
            ("update_function", &hardcoded.update_function),
            ("delete_function", &hardcoded.delete_function),
            ("list_function", &hardcoded.list_function),
            ("waiter_function", &hardcoded.waiter_function),
            ("payload_type", &hardcoded.payload_type),
        ];
        for (field, value) in identifiers {
            if !is_identifier(value) {
                problems.push(format!("{field} `{value}` is not an identifier"));
            }
        }

        let mut paths = vec![("payload_path", Some(&hardcoded.payload_path))];
        paths.push(("converter", hardcoded.converter.as_ref()));
        paths.push(("waiters.create.acceptor", function.waiters.create.acceptor.as_ref()));
        paths.push(("waiters.delete.acceptor", function.waiters.delete.acceptor.as_ref()));
        for (field, value) in paths {
            if let Some(value) = value.filter(|v| !is_rust_path(v)) {
                problems.push(format!("{field} `{value}` is not a Rust path"));
            }
        }

        for (name, parameter) in &hardcoded.state_parameters {
            if !is_identifier(name) {
                problems.push(format!("state parameter `{name}` is not an identifier"));
            }
            match (parameter.source, &parameter.default) {
                (SourceTemplate::Default, None) => {
                    problems.push(format!("state parameter `{name}` needs a default"))
                }
                (SourceTemplate::Merge | SourceTemplate::PassThrough, Some(_)) => problems.push(
                    format!("state parameter `{name}` only takes a default with source default"),
                ),
                _ => {}
            }
        }

        for (stage, waiter) in [("create", &function.waiters.create), ("delete", &function.waiters.delete)] {
            for (name, path) in &waiter.result_arguments {
                if !is_identifier(name) || !is_field_path(path) {
                    problems.push(format!("{stage} result argument `{name}: {path}` is malformed"));
                }
            }
        }

        for field in &function.policy.ordered_fields {
            if !is_field_path(field) {
                problems.push(format!("ordered field `{field}` is not a dotted path"));
            }
        }

        let mut names = HashSet::new();
        for argument in &self.arguments {
            if !is_identifier(&argument.name) {
                problems.push(format!("argument `{}` is not an identifier", argument.name));
            }
            if !names.insert(argument.name.as_str()) {
                problems.push(format!("argument `{}` is declared twice", argument.name));
            }
            if !is_field_path(&argument.target) {
                problems.push(format!(
                    "argument `{}` targets `{}`, which is not a dotted path",
                    argument.name, argument.target
                ));
            }
            if let Some(default) = argument.default.as_ref().filter(|d| !argument.kind.admits(d)) {
                problems.push(format!(
                    "argument `{}` defaults to {default}, which is not a {:?}",
                    argument.name, argument.kind
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CodegenError::Invalid {
                reference: function.reference.clone(),
                reason: problems.join("; "),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers() {
        assert!(is_identifier("read_namespaced_service"));
        assert!(is_identifier("V1Service"));
        assert!(!is_identifier("_"));
        assert!(!is_identifier("1st"));
        assert!(!is_identifier("name; drop"));
        assert!(!is_identifier(""));

        assert!(is_module_name("persistent_volume_claim"));
        assert!(!is_module_name("type"));
        assert!(!is_module_name("Service"));
    }

    #[test]
    fn rust_paths() {
        assert!(is_rust_path("k8s_openapi::api::core::v1::Service"));
        assert!(is_rust_path("crate::kinds::until_deleted"));
        assert!(!is_rust_path("Vec<u8>"));
        assert!(!is_rust_path("::std::fs"));
        assert!(!is_rust_path("a::fn::b"));
        assert!(!is_rust_path("a(); b"));
    }

    #[test]
    fn field_paths() {
        assert!(is_field_path("status.loadBalancer.ingress"));
        assert!(is_field_path("metadata.labels"));
        assert!(!is_field_path("spec..type"));
        assert!(!is_field_path("spec type"));
        assert!(!is_field_path(""));
    }
}
