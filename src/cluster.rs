use std::fmt::Display;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

mod kube_api;

pub use self::kube_api::KubeCluster;

/// The API coordinates of a resource kind.
///
/// Generated controllers fill these in from the `k8s_openapi::Resource` constants of their
/// payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApiRef {
    /// API group, empty for the core group
    pub group: &'static str,

    /// API version without the group
    pub version: &'static str,

    /// `group/version`, or just the version for the core group
    pub api_version: &'static str,

    /// The `kind` of the resource, e.g. `Service`
    pub kind: &'static str,

    /// The plural URL path segment, e.g. `services`
    pub plural: &'static str,
}

/// How the cluster classified a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientErrorKind {
    NotFound,
    AlreadyExists,
    Conflict,
    Invalid,
    Transient,
    Fatal,
}

/// A failed cluster call, with the message the cluster gave for it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct ClientError {
    pub kind: ClientErrorKind,
    pub message: String,
}

impl ClientError {
    pub fn new(kind: ClientErrorKind, message: impl Display) -> Self {
        Self {
            kind,
            message: message.to_string(),
        }
    }

    pub fn not_found(message: impl Display) -> Self {
        Self::new(ClientErrorKind::NotFound, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ClientErrorKind::NotFound
    }

    /// Whether retrying the same call later could succeed
    pub fn is_transient(&self) -> bool {
        self.kind == ClientErrorKind::Transient
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Everything the framework needs from a cluster.
///
/// Documents cross this boundary in wire form (`apiVersion`, `kind`, `metadata`, `spec`,
/// `status` in camelCase). Implementations are shared between concurrent reconciliations and
/// must be safe to call reentrantly; the framework holds no locks around them.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Read a single object.
    async fn get(&self, api: &ApiRef, namespace: &str, name: &str) -> ClientResult<Value>;

    /// List objects in one namespace, or across all namespaces when `namespace` is `None`.
    async fn list(&self, api: &ApiRef, namespace: Option<&str>) -> ClientResult<Vec<Value>>;

    /// Create an object from a marshalled payload.
    async fn create(&self, api: &ApiRef, namespace: &str, payload: Value) -> ClientResult<Value>;

    /// Replace an existing object with a marshalled payload.
    async fn replace(
        &self,
        api: &ApiRef,
        namespace: &str,
        name: &str,
        payload: Value,
    ) -> ClientResult<Value>;

    /// Delete an object.
    async fn delete(&self, api: &ApiRef, namespace: &str, name: &str) -> ClientResult<()>;
}
