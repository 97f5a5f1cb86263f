use serde::Serialize;
use thiserror::Error;

/// Cluster client contract and its kube-rs implementation
pub mod cluster;

/// Controller code generation from kind templates
pub mod codegen;

/// Shared state, diagnostics and settings handed to every reconciliation
pub mod context;

/// Controllers generated at build time from `templates/`
pub mod controllers;

/// The `present` / `absent` / `describe` operation engine
pub mod engine;

/// Hand-authored per-kind extension points
pub mod kinds;

/// Desired state to cluster payload conversion
pub mod marshaller;

/// Runtime descriptions of a resource kind
pub mod schema;

/// Document normalization, merge and diff
pub mod state;

/// Log and trace integrations
pub mod telemetry;

/// Polling until a resource reaches a terminal condition
pub mod waiter;

/// Metrics
mod metrics;
pub use metrics::Metrics;

#[cfg(test)]
mod fixtures;

#[derive(Error, Debug)]
pub enum Error {
    #[error("YamlError: {0}")]
    YamlError(#[source] serde_yaml::Error),

    #[error("Cluster Error: {0}")]
    ClusterError(#[from] cluster::ClientError),

    #[error("ValidationFailed: {0}")]
    ValidationFailed(String),
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a reconciliation did not reach its desired state.
///
/// Carried in [`engine::OperationResult`] instead of crossing the framework boundary as an
/// error, so callers can pattern-match on the failure and decide whether a retry is safe.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The desired state failed the argument preconditions or the payload marshaller.
    ValidationFailed,

    /// An update referenced a resource that no longer exists.
    NotFoundWhenExpected,

    /// Optimistic concurrency collision, safe to retry.
    Conflict,

    /// The acceptor did not fire within the configured wait budget.
    WaitTimedOut,

    /// The acceptor declared the resource unable to reach its terminal state.
    WaitRejected,

    /// Transient network or API server failure.
    ClusterUnreachable,

    /// The cluster refused the deletion.
    DeleteConflict,

    /// The reconciliation was cancelled between two cluster calls.
    Cancelled,

    /// Anything the cluster reported that has no better classification.
    Fatal,
}

impl ErrorKind {
    pub fn metric_label(&self) -> String {
        format!("{self:?}").to_lowercase()
    }
}

impl From<cluster::ClientErrorKind> for ErrorKind {
    fn from(kind: cluster::ClientErrorKind) -> Self {
        use cluster::ClientErrorKind as K;

        match kind {
            K::NotFound => ErrorKind::NotFoundWhenExpected,
            K::Conflict | K::AlreadyExists => ErrorKind::Conflict,
            K::Invalid => ErrorKind::ValidationFailed,
            K::Transient => ErrorKind::ClusterUnreachable,
            K::Fatal => ErrorKind::Fatal,
        }
    }
}
