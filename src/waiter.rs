//! Polling a resource until an acceptor declares it done.

use std::{future::Future, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::{
    cluster::{ClientError, ClientResult},
    schema::{self, Projection},
    ErrorKind,
};

pub const DEFAULT_DELAY: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 40;

/// Poll cadence and budget
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaiterConfig {
    /// Pause between two polls, measured on the client
    #[serde(with = "seconds")]
    pub delay: Duration,

    /// Maximum number of polls
    pub max_attempts: u32,
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// A per-request override of some of the [`WaiterConfig`] fields
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WaitOverride {
    #[serde(default, with = "optional_seconds")]
    pub delay: Option<Duration>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl WaitOverride {
    pub fn over(&self, base: WaiterConfig) -> WaiterConfig {
        WaiterConfig {
            delay: self.delay.unwrap_or(base.delay),
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
        }
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(delay.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod optional_seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        delay: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match delay {
            Some(delay) => serializer.serialize_some(&delay.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|d| d.map(Duration::from_secs))
    }
}

/// Where the harness polls
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WaitArguments {
    pub namespace: String,
    pub name: String,
}

/// What an acceptor gets to look at on each successful poll.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    /// 1-based number of the poll
    pub attempt: u32,

    /// The observed document, or the projected fields when the waiter declares a projection
    pub data: Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The resource reached its terminal state
    Accept,
    /// Not there yet
    Retry,
    /// The resource will never get there
    Reject(String),
}

impl From<bool> for Verdict {
    fn from(accepted: bool) -> Self {
        if accepted {
            Verdict::Accept
        } else {
            Verdict::Retry
        }
    }
}

pub type Acceptor = Arc<dyn Fn(&Observation) -> Verdict + Send + Sync>;

/// The acceptor pair a controller carries
#[derive(Clone)]
pub struct Acceptors {
    pub create: Acceptor,
    pub delete: Acceptor,
}

impl Acceptors {
    pub fn new(create: Acceptor, delete: Acceptor) -> Self {
        Self { create, delete }
    }
}

impl Default for Acceptors {
    fn default() -> Self {
        Self::new(
            Arc::new(|_: &Observation| Verdict::Accept),
            Arc::new(|_: &Observation| Verdict::Accept),
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WaitError {
    #[error("wait exceeded max attempts")]
    MaxAttempts,

    #[error("cancelled")]
    Cancelled,

    #[error("wait rejected: {0}")]
    Rejected(String),

    #[error("wait failed: {0}")]
    Client(#[source] ClientError),
}

impl WaitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WaitError::MaxAttempts => ErrorKind::WaitTimedOut,
            WaitError::Cancelled => ErrorKind::Cancelled,
            WaitError::Rejected(_) => ErrorKind::WaitRejected,
            WaitError::Client(e) => e.kind.into(),
        }
    }
}

/// How a wait ended
#[derive(Debug)]
pub struct Waited {
    pub outcome: Result<(), WaitError>,

    /// Number of polls made
    pub attempts: u32,

    /// The last document a poll returned, unprojected
    pub last_observed: Option<Value>,
}

/// Pull the waiter's projected fields out of a document; missing paths become `null`
pub fn project(document: &Value, projection: &[Projection]) -> Value {
    if projection.is_empty() {
        return document.clone();
    }

    let fields: Map<String, Value> = projection
        .iter()
        .map(|p| {
            let value = schema::lookup(document, p.path).cloned().unwrap_or(Value::Null);
            (p.name.to_string(), value)
        })
        .collect();

    Value::Object(fields)
}

/// Poll `get` until `acceptor` accepts.
///
/// At most `config.max_attempts` polls are made, with `config.delay` between two of them and
/// no pause after the last. With `err_graceful`, a not-found poll ends the wait successfully.
/// Transient failures use up an attempt; any other failure ends the wait.
#[instrument(skip_all, fields(namespace = %arguments.namespace, name = %arguments.name))]
pub async fn wait<F, Fut>(
    get: F,
    arguments: &WaitArguments,
    acceptor: &Acceptor,
    projection: &[Projection],
    config: &WaiterConfig,
    err_graceful: bool,
    cancellation: &CancellationToken,
) -> Waited
where
    F: Fn(WaitArguments) -> Fut,
    Fut: Future<Output = ClientResult<Value>>,
{
    let mut last_observed = None;
    let mut attempts = 0;

    let done = |outcome, attempts, last_observed| Waited {
        outcome,
        attempts,
        last_observed,
    };

    while attempts < config.max_attempts {
        if cancellation.is_cancelled() {
            return done(Err(WaitError::Cancelled), attempts, last_observed);
        }

        attempts += 1;
        match get(arguments.clone()).await {
            Ok(document) => {
                let observation = Observation {
                    attempt: attempts,
                    data: project(&document, projection),
                };
                last_observed = Some(document);

                match acceptor(&observation) {
                    Verdict::Accept => return done(Ok(()), attempts, last_observed),
                    Verdict::Reject(reason) => {
                        warn!(attempt = attempts, %reason, "acceptor rejected observation");
                        return done(Err(WaitError::Rejected(reason)), attempts, last_observed);
                    }
                    Verdict::Retry => debug!(attempt = attempts, "not accepted yet"),
                }
            }
            Err(e) if e.is_not_found() && err_graceful => {
                debug!(attempt = attempts, "resource gone");
                return done(Ok(()), attempts, None);
            }
            Err(e) if e.is_transient() && attempts < config.max_attempts => {
                debug!(attempt = attempts, error = %e, "transient failure while waiting");
            }
            Err(e) => return done(Err(WaitError::Client(e)), attempts, last_observed),
        }

        if attempts < config.max_attempts && !pause(config.delay, cancellation).await {
            return done(Err(WaitError::Cancelled), attempts, last_observed);
        }
    }

    done(Err(WaitError::MaxAttempts), attempts, last_observed)
}

/// Sleep between two polls, returning `false` if cancelled meanwhile
async fn pause(delay: Duration, cancellation: &CancellationToken) -> bool {
    if delay.is_zero() {
        tokio::task::yield_now().await;
        return !cancellation.is_cancelled();
    }

    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancellation.cancelled() => false,
    }
}
