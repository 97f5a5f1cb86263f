use k8s_openapi::Resource;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{schema::KindSpec, state};

#[derive(Error, Debug)]
pub enum MarshalError {
    #[error("desired state for {0} must be a mapping")]
    NotAMapping(&'static str),

    #[error("desired state for {0} is missing metadata.name")]
    MissingName(&'static str),

    #[error("desired state is not a valid {payload}: {source}")]
    InvalidPayload {
        payload: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Turns a merged desired state into the body of a create or replace call
pub type Marshal = fn(&Value) -> Result<Value, MarshalError>;

/// Turns an observed object into a desired-state document that `present` accepts unchanged
pub type Converter = fn(&KindSpec, &Value) -> Value;

/// Fields of a present-state document that never go over the wire
const LOCAL_FIELDS: [&str; 3] = ["resource_id", "status", "timeout"];

/// Marshal a merged desired state into a payload for `P`.
///
/// The document is checked by deserializing it into the typed payload. Unless the kind
/// preserves unknown fields, the typed value is what gets sent, so fields `P` does not know
/// about are dropped here rather than rejected by the API server.
pub fn unmarshal<P>(spec: &KindSpec, desired: &Value) -> Result<Value, MarshalError>
where
    P: Resource + Serialize + DeserializeOwned,
{
    let Value::Object(fields) = desired else {
        return Err(MarshalError::NotAMapping(spec.api.kind));
    };

    let mut body: Map<String, Value> = fields
        .iter()
        .filter(|(key, _)| !LOCAL_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    body.insert("apiVersion".into(), P::API_VERSION.into());
    body.insert("kind".into(), P::KIND.into());

    let named = body
        .get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .map_or(false, |name| !name.is_empty());
    if !named {
        return Err(MarshalError::MissingName(spec.api.kind));
    }

    let body = Value::Object(body);
    let typed: P =
        serde_json::from_value(body.clone()).map_err(|source| MarshalError::InvalidPayload {
            payload: spec.payload_type,
            source,
        })?;

    if spec.policy.preserve_unknown_fields {
        return Ok(body);
    }

    serde_json::to_value(typed).map_err(|source| MarshalError::InvalidPayload {
        payload: spec.payload_type,
        source,
    })
}

/// The default converter: the observed object minus everything the server owns.
///
/// `resource_id` is taken from `metadata.name`; `status` is kept only when the kind's
/// policy asks for it.
pub fn raw_to_present(spec: &KindSpec, observed: &Value) -> Value {
    let mut present = match state::normalize(observed) {
        Value::Object(fields) => fields,
        _ => Map::new(),
    };

    if let Some(name) = observed
        .get("metadata")
        .and_then(|m| m.get("name"))
        .cloned()
    {
        present.insert("resource_id".into(), name);
    }

    if spec.policy.keep_status {
        if let Some(status) = observed.get("status") {
            present.insert("status".into(), status.clone());
        }
    }

    Value::Object(present)
}
