use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::{cluster::ClusterClient, waiter::WaiterConfig, Error, Metrics, Result};

/// Diagnostics recorded by every operation
#[derive(Clone, Debug, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,

    /// `<kind>/<namespace>/<name>` of the last reconciled resource
    pub last_reconciled: Option<String>,

    /// Comments of the last operation
    pub last_comment: Vec<String>,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            last_reconciled: None,
            last_comment: Vec::new(),
        }
    }
}

/// Framework settings.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Namespace of desired states that do not name one
    #[serde(default = "defaults::namespace")]
    pub default_namespace: String,

    /// Poll cadence used when a request carries no timeout of its own
    pub wait: WaiterConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_namespace: defaults::namespace(),
            wait: WaiterConfig::default(),
        }
    }
}

impl Settings {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(Error::YamlError)
    }
}

mod defaults {
    pub fn namespace() -> String {
        crate::state::DEFAULT_NAMESPACE.into()
    }
}

/// State shared between every reconciliation started from it
#[derive(Clone)]
pub struct State {
    /// Diagnostics populated by the engine
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
    metrics: Metrics,
    settings: Settings,
}

impl Default for State {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl State {
    pub fn new(settings: Settings) -> Self {
        let registry = prometheus::Registry::default();
        let metrics = Metrics::default().register(&registry).unwrap();

        Self {
            diagnostics: Default::default(),
            registry,
            metrics,
            settings,
        }
    }

    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Create a Context that can update State
    pub fn to_context(&self, cluster: Arc<dyn ClusterClient>) -> Context {
        Context {
            cluster,
            metrics: self.metrics.clone(),
            diagnostics: self.diagnostics.clone(),
            cancellation: CancellationToken::new(),
            settings: self.settings.clone(),
        }
    }
}

/// The context passed to every operation
#[derive(Clone)]
pub struct Context {
    /// Cluster the operations run against
    pub cluster: Arc<dyn ClusterClient>,

    /// Prometheus metrics
    pub metrics: Metrics,

    /// Diagnostics read back through [`State`]
    pub diagnostics: Arc<RwLock<Diagnostics>>,

    /// Cancelling this ends waits at the next poll boundary
    pub cancellation: CancellationToken,

    pub settings: Settings,
}

impl Context {
    /// A copy of this context that is cancelled together with it, or on its own
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            ..self.clone()
        }
    }

    pub(crate) async fn record(&self, identity: String, comment: &[String]) {
        let mut diagnostics = self.diagnostics.write().await;
        diagnostics.last_event = Utc::now();
        diagnostics.last_reconciled = Some(identity);
        diagnostics.last_comment = comment.to_vec();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use indoc::indoc;

    use super::*;
    use crate::fixtures::FakeCluster;

    #[test]
    fn settings_default_and_partial_yaml() {
        let settings = Settings::default();
        assert_eq!(settings.default_namespace, "default");
        assert_eq!(settings.wait.delay, Duration::from_secs(15));
        assert_eq!(settings.wait.max_attempts, 40);

        let settings = Settings::from_yaml(indoc! {"
            wait:
              delay: 2
              max_attempts: 5
        "})
        .unwrap();
        assert_eq!(settings.default_namespace, "default");
        assert_eq!(settings.wait.delay, Duration::from_secs(2));
        assert_eq!(settings.wait.max_attempts, 5);

        assert!(Settings::from_yaml("wait: fast").is_err());
    }

    #[tokio::test]
    async fn contexts_share_diagnostics_and_metrics() {
        let state = State::default();
        let ctx = state.to_context(Arc::new(FakeCluster::default()));

        ctx.record("Service/default/svc-1".into(), &["created".into()]).await;
        let diagnostics = state.diagnostics().await;
        assert_eq!(diagnostics.last_reconciled.as_deref(), Some("Service/default/svc-1"));
        assert_eq!(diagnostics.last_comment, vec!["created".to_string()]);

        drop(ctx.metrics.count_and_measure("Service", "present"));
        assert!(state
            .metrics()
            .iter()
            .any(|family| family.get_name() == "reconcile_operations_total"));
    }

    #[test]
    fn child_contexts_follow_cancellation() {
        let ctx = State::default().to_context(Arc::new(FakeCluster::default()));
        let child = ctx.child();

        ctx.cancellation.cancel();
        assert!(child.cancellation.is_cancelled());
    }
}
