use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, field, info, instrument, warn, Span};

use crate::{
    cluster::{ClientError, ClientErrorKind},
    context::Context,
    marshaller::{Converter, Marshal, MarshalError},
    schema::{self, KindSpec, Projection},
    state::{self, normalize, Change},
    telemetry,
    waiter::{self, Acceptor, Acceptors, WaitArguments, WaitOverride, Waited, WaiterConfig},
    ErrorKind, Result,
};

/// The exact comments operations report
pub mod comments {
    pub const CREATED: &str = "created";
    pub const UPDATED: &str = "updated";
    pub const NO_CHANGE: &str = "already in desired state";
    pub const WOULD_CREATE: &str = "would create";
    pub const WOULD_UPDATE: &str = "would update";
    pub const WOULD_DELETE: &str = "would delete";
    pub const DELETED: &str = "deleted";
    pub const ALREADY_ABSENT: &str = "already absent";
    pub const ADOPTED: &str = "already exists; reconciling against the existing object";
    pub const REFRESH_FAILED: &str = "mutation succeeded; refresh failed";
    pub const CANCELLED: &str = "cancelled";
}

/// Per-request wait overrides, lifted out of the desired state's `timeout` field
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Timeout {
    #[serde(default)]
    pub create: Option<WaitOverride>,
    /// Falls back to `create` when unset
    #[serde(default)]
    pub update: Option<WaitOverride>,
    #[serde(default)]
    pub delete: Option<WaitOverride>,
}

impl Timeout {
    /// Remove and parse the `timeout` field of a desired state
    pub fn take(desired: &mut Value) -> Result<Self, serde_json::Error> {
        match desired.as_object_mut().and_then(|d| d.remove("timeout")) {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(raw) => serde_json::from_value(raw),
        }
    }

    pub fn create(&self, base: WaiterConfig) -> WaiterConfig {
        self.create.map_or(base, |o| o.over(base))
    }

    pub fn update(&self, base: WaiterConfig) -> WaiterConfig {
        self.update.or(self.create).map_or(base, |o| o.over(base))
    }

    pub fn delete(&self, base: WaiterConfig) -> WaiterConfig {
        self.delete.map_or(base, |o| o.over(base))
    }
}

#[derive(Clone, Debug, Default)]
pub struct PresentRequest {
    /// Idempotency key, also the default `metadata.name`
    pub name: String,
    /// Provider-assigned identifier; without it the resource is presumed absent
    pub resource_id: Option<String>,
    pub desired: Value,
    pub dry_run: bool,
}

impl PresentRequest {
    pub fn new(name: impl Into<String>, desired: Value) -> Self {
        let name = name.into();
        let resource_id = desired
            .get("resource_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        Self {
            name,
            resource_id,
            desired,
            dry_run: false,
        }
    }

    /// Build a request from the fragments `describe` lists for one instance
    pub fn from_fragments(name: impl Into<String>, fragments: &[Value]) -> Self {
        let mut desired = Map::new();
        for fragment in fragments {
            if let Some(fields) = fragment.as_object() {
                desired.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }

        Self::new(name, Value::Object(desired))
    }

    pub fn resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct AbsentRequest {
    pub name: String,
    pub resource_id: Option<String>,
    pub namespace: Option<String>,
    pub timeout: Timeout,
    pub dry_run: bool,
}

impl AbsentRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// The record every `present` and `absent` call returns.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct OperationResult {
    pub name: String,
    pub result: bool,
    pub comment: Vec<String>,
    pub old_state: Option<Value>,
    pub new_state: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<Change>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl OperationResult {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            result: false,
            comment: Vec::new(),
            old_state: None,
            new_state: None,
            changes: Vec::new(),
            error: None,
        }
    }

    fn succeed(mut self, comment: &str) -> Self {
        self.result = true;
        self.comment.push(comment.to_string());
        self
    }

    /// Fail, keeping the last state read as `new_state`
    fn fail(mut self, failure: Failure) -> Self {
        self.result = false;
        self.error = Some(failure.kind);
        self.comment.push(failure.comment);
        if self.new_state.is_none() {
            self.new_state = self.old_state.clone();
        }
        self
    }
}

/// `describe` output: identifier to `{"<kind>.present": [fragments]}`
pub type Described = BTreeMap<String, BTreeMap<String, Vec<Value>>>;

struct Failure {
    kind: ErrorKind,
    comment: String,
}

impl Failure {
    fn new(kind: ErrorKind, comment: impl ToString) -> Self {
        Self {
            kind,
            comment: comment.to_string(),
        }
    }
}

impl From<ClientError> for Failure {
    fn from(error: ClientError) -> Self {
        let comment = match error.kind {
            ClientErrorKind::Conflict => format!("{error}; the update is safe to retry"),
            _ => error.to_string(),
        };

        Self::new(error.kind.into(), comment)
    }
}

impl From<MarshalError> for Failure {
    fn from(error: MarshalError) -> Self {
        Self::new(ErrorKind::ValidationFailed, error)
    }
}

struct Plan {
    merged: Value,
    payload: Value,
    changes: Vec<Change>,
}

enum Written {
    Created(Value),
    Updated(Value),
    Unchanged(Value),
}

fn name_of(document: &Value) -> Option<&str> {
    document
        .get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
}

/// Fill in `metadata.name` from the request name when the document has none
fn default_name(desired: &mut Value, name: &str) {
    if name_of(desired).map_or(true, str::is_empty) {
        schema::insert_at(desired, "metadata.name", Value::String(name.to_string()));
    }
}

/// Send the observed `resourceVersion` so concurrent writers conflict instead of clobbering
fn carry_resource_version(payload: &mut Value, live: &Value) {
    if let Some(version) = live.get("metadata").and_then(|m| m.get("resourceVersion")) {
        schema::insert_at(payload, "metadata.resourceVersion", version.clone());
    }
}

/// A generated controller: one kind's spec, marshaller, converter and acceptors.
#[derive(Clone)]
pub struct ResourceController {
    spec: &'static KindSpec,
    marshal: Marshal,
    converter: Converter,
    acceptors: Acceptors,
}

impl ResourceController {
    pub fn new(
        spec: &'static KindSpec,
        marshal: Marshal,
        converter: Converter,
        acceptors: Acceptors,
    ) -> Self {
        Self {
            spec,
            marshal,
            converter,
            acceptors,
        }
    }

    pub fn spec(&self) -> &'static KindSpec {
        self.spec
    }

    /// Swap the acceptors, e.g. to wait on a condition the kind does not know about
    pub fn with_acceptors(mut self, acceptors: Acceptors) -> Self {
        self.acceptors = acceptors;
        self
    }

    fn present_state(&self, observed: &Value) -> Value {
        (self.converter)(self.spec, observed)
    }

    /// Merge `desired` over the live object and marshal the result.
    ///
    /// Changes are taken against the payload that would be written, so fields the payload
    /// type drops never count as drift.
    fn plan(&self, desired: &Value, live: Option<&Value>) -> Result<Plan, MarshalError> {
        let ordered = self.spec.policy.ordered_fields;
        let normalized = live.map(normalize);
        let merged =
            state::merge_state(desired, normalized.as_ref(), self.spec.state_parameters, ordered);
        let payload = (self.marshal)(&merged)?;

        let observed = normalized.unwrap_or_else(|| json!({}));
        let changes = state::diff(&observed, &normalize(&payload), ordered);
        Ok(Plan {
            merged,
            payload,
            changes,
        })
    }

    /// Drive a resource towards `request.desired`.
    #[instrument(skip(self, ctx, request), fields(kind = self.spec.api.kind, name = %request.name, trace_id))]
    pub async fn present(&self, ctx: &Context, mut request: PresentRequest) -> OperationResult {
        let trace_id = telemetry::get_trace_id();
        Span::current().record("trace_id", &field::display(&trace_id));
        let _timer = ctx
            .metrics
            .count_and_measure(self.spec.api.kind, "present");

        let namespace =
            state::resolve_namespace(&mut request.desired, &ctx.settings.default_namespace);
        let name = request.name.clone();

        let result = self.reconcile_present(ctx, request, &namespace).await;
        self.finish(ctx, &namespace, &name, result).await
    }

    async fn reconcile_present(
        &self,
        ctx: &Context,
        request: PresentRequest,
        namespace: &str,
    ) -> OperationResult {
        let PresentRequest {
            name,
            resource_id,
            mut desired,
            dry_run,
        } = request;
        let mut result = OperationResult::new(&name);
        let api = &self.spec.api;

        if name.is_empty() {
            return result.fail(Failure::new(ErrorKind::ValidationFailed, "name must not be empty"));
        }
        let timeout = match Timeout::take(&mut desired) {
            Ok(timeout) => timeout,
            Err(e) => {
                return result.fail(Failure::new(
                    ErrorKind::ValidationFailed,
                    format!("invalid timeout: {e}"),
                ))
            }
        };
        default_name(&mut desired, &name);
        if let Err(e) = schema::check_arguments(self.spec, &mut desired) {
            return result.fail(Failure::new(ErrorKind::ValidationFailed, e));
        }
        if ctx.cancellation.is_cancelled() {
            return result.fail(Failure::new(ErrorKind::Cancelled, comments::CANCELLED));
        }

        let observed = match &resource_id {
            Some(id) => match ctx.cluster.get(api, namespace, id).await {
                Ok(document) => Some(document),
                Err(e) if e.is_not_found() => None,
                Err(e) => return result.fail(e.into()),
            },
            None => None,
        };

        result.old_state = observed.as_ref().map(|o| self.present_state(o));

        let Plan {
            merged,
            payload,
            changes,
        } = match self.plan(&desired, observed.as_ref()) {
            Ok(plan) => plan,
            Err(e) => return result.fail(e.into()),
        };
        result.changes = changes;

        if observed.is_some() && result.changes.is_empty() {
            result.new_state = result.old_state.clone();
            return result.succeed(comments::NO_CHANGE);
        }

        if dry_run {
            result.new_state = Some(merged);
            let comment = match observed {
                Some(_) => comments::WOULD_UPDATE,
                None => comments::WOULD_CREATE,
            };
            return result.succeed(comment);
        }

        if ctx.cancellation.is_cancelled() {
            return result.fail(Failure::new(ErrorKind::Cancelled, comments::CANCELLED));
        }

        let written = match (&observed, &resource_id) {
            (Some(live), Some(id)) => self.replace(ctx, namespace, id, payload, live).await,
            _ => self.create(ctx, namespace, payload, &desired, &mut result).await,
        };

        let (document, verb, config) = match written {
            Ok(Written::Created(document)) => {
                (document, comments::CREATED, timeout.create(ctx.settings.wait))
            }
            Ok(Written::Updated(document)) => {
                (document, comments::UPDATED, timeout.update(ctx.settings.wait))
            }
            Ok(Written::Unchanged(live)) => {
                result.new_state = Some(self.present_state(&live));
                return result.succeed(comments::NO_CHANGE);
            }
            Err(failure) => return result.fail(failure),
        };

        let resource_id = name_of(&document)
            .or_else(|| name_of(&merged))
            .unwrap_or(name.as_str())
            .to_string();
        info!(namespace, %resource_id, verb, "mutation accepted");

        let waited = self
            .wait_for(
                ctx,
                namespace,
                &resource_id,
                &self.acceptors.create,
                self.spec.waiters.create.projection,
                config,
                false,
            )
            .await;
        if let Err(e) = &waited.outcome {
            result.new_state = waited.last_observed.as_ref().map(|o| self.present_state(o));
            result.comment.push(verb.to_string());
            return result.fail(Failure::new(e.kind(), e));
        }

        match ctx.cluster.get(api, namespace, &resource_id).await {
            Ok(document) => {
                result.new_state = Some(self.present_state(&document));
                result.succeed(verb)
            }
            Err(e) => {
                warn!(namespace, %resource_id, error = %e, "refresh after {verb} failed");
                result.new_state = waited.last_observed.as_ref().map(|o| self.present_state(o));
                result.comment.push(verb.to_string());
                result.comment.push(comments::REFRESH_FAILED.to_string());
                result.fail(e.into())
            }
        }
    }

    async fn create(
        &self,
        ctx: &Context,
        namespace: &str,
        payload: Value,
        desired: &Value,
        result: &mut OperationResult,
    ) -> Result<Written, Failure> {
        let api = &self.spec.api;
        let name = name_of(&payload).unwrap_or_default().to_string();

        let error = match ctx.cluster.create(api, namespace, payload).await {
            Ok(document) => return Ok(Written::Created(document)),
            Err(e) if e.kind == ClientErrorKind::AlreadyExists => e,
            Err(e) => return Err(e.into()),
        };

        warn!(namespace, %name, error = %error, "create found an existing object");
        result.comment.push(comments::ADOPTED.to_string());

        let live = ctx.cluster.get(api, namespace, &name).await?;
        result.old_state = Some(self.present_state(&live));

        let plan = self.plan(desired, Some(&live))?;
        result.changes = plan.changes;
        if result.changes.is_empty() {
            return Ok(Written::Unchanged(live));
        }

        self.replace(ctx, namespace, &name, plan.payload, &live).await
    }

    async fn replace(
        &self,
        ctx: &Context,
        namespace: &str,
        name: &str,
        mut payload: Value,
        live: &Value,
    ) -> Result<Written, Failure> {
        let api = &self.spec.api;
        carry_resource_version(&mut payload, live);

        match ctx.cluster.replace(api, namespace, name, payload.clone()).await {
            Ok(document) => Ok(Written::Updated(document)),
            Err(e) if e.is_not_found() && self.spec.policy.recreate_on_missing => {
                info!(namespace, name, "object vanished before update, recreating");
                if let Some(metadata) = payload.get_mut("metadata").and_then(Value::as_object_mut) {
                    metadata.remove("resourceVersion");
                }

                let document = ctx.cluster.create(api, namespace, payload).await?;
                Ok(Written::Created(document))
            }
            Err(e) if e.is_not_found() => Err(Failure::new(ErrorKind::NotFoundWhenExpected, e)),
            Err(e) => Err(e.into()),
        }
    }

    /// Make sure a resource does not exist.
    #[instrument(skip(self, ctx, request), fields(kind = self.spec.api.kind, name = %request.name, trace_id))]
    pub async fn absent(&self, ctx: &Context, request: AbsentRequest) -> OperationResult {
        let trace_id = telemetry::get_trace_id();
        Span::current().record("trace_id", &field::display(&trace_id));
        let _timer = ctx.metrics.count_and_measure(self.spec.api.kind, "absent");

        let namespace = request
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| ctx.settings.default_namespace.clone());
        let name = request.name.clone();

        let result = self.reconcile_absent(ctx, request, &namespace).await;
        self.finish(ctx, &namespace, &name, result).await
    }

    async fn reconcile_absent(
        &self,
        ctx: &Context,
        request: AbsentRequest,
        namespace: &str,
    ) -> OperationResult {
        let mut result = OperationResult::new(&request.name);
        let api = &self.spec.api;

        if request.name.is_empty() {
            return result.fail(Failure::new(ErrorKind::ValidationFailed, "name must not be empty"));
        }
        let Some(resource_id) = request.resource_id else {
            return result.succeed(comments::ALREADY_ABSENT);
        };
        if ctx.cancellation.is_cancelled() {
            return result.fail(Failure::new(ErrorKind::Cancelled, comments::CANCELLED));
        }

        let observed = match ctx.cluster.get(api, namespace, &resource_id).await {
            Ok(document) => document,
            Err(e) if e.is_not_found() => return result.succeed(comments::ALREADY_ABSENT),
            Err(e) => return result.fail(e.into()),
        };
        result.old_state = Some(self.present_state(&observed));

        if request.dry_run {
            result.new_state = result.old_state.clone();
            return result.succeed(comments::WOULD_DELETE);
        }
        if ctx.cancellation.is_cancelled() {
            return result.fail(Failure::new(ErrorKind::Cancelled, comments::CANCELLED));
        }

        match ctx.cluster.delete(api, namespace, &resource_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(namespace, %resource_id, "deleted concurrently");
                return result.succeed(comments::DELETED);
            }
            Err(e) if e.kind == ClientErrorKind::Conflict => {
                return result.fail(Failure::new(ErrorKind::DeleteConflict, e))
            }
            Err(e) => return result.fail(e.into()),
        }
        info!(namespace, %resource_id, "delete accepted");

        let waited = self
            .wait_for(
                ctx,
                namespace,
                &resource_id,
                &self.acceptors.delete,
                self.spec.waiters.delete.projection,
                request.timeout.delete(ctx.settings.wait),
                true,
            )
            .await;

        match &waited.outcome {
            Ok(()) => result.succeed(comments::DELETED),
            Err(e) => {
                result.new_state = waited.last_observed.as_ref().map(|o| self.present_state(o));
                result.fail(Failure::new(e.kind(), e))
            }
        }
    }

    /// Export every instance of the kind as fragments `present` accepts unchanged.
    #[instrument(skip(self, ctx), fields(kind = self.spec.api.kind, trace_id))]
    pub async fn describe(&self, ctx: &Context) -> Result<Described> {
        let trace_id = telemetry::get_trace_id();
        Span::current().record("trace_id", &field::display(&trace_id));
        let _timer = ctx
            .metrics
            .count_and_measure(self.spec.api.kind, "describe");

        let objects = match ctx.cluster.list(&self.spec.api, None).await {
            Ok(objects) => objects,
            Err(e) => {
                ctx.metrics
                    .reconcile_failure(self.spec.api.kind, e.kind.into());
                return Err(e.into());
            }
        };

        let mut described = Described::new();
        for object in objects {
            let present = self.present_state(&object);
            let Some(name) = present.get("resource_id").and_then(Value::as_str) else {
                debug!("skipping unnamed object");
                continue;
            };

            let key = if described.contains_key(name) {
                let namespace = object["metadata"]["namespace"].as_str().unwrap_or_default();
                format!("{namespace}/{name}")
            } else {
                name.to_string()
            };

            let fragments = match present {
                Value::Object(fields) => fields
                    .into_iter()
                    .map(|(field, value)| Value::Object(Map::from_iter([(field, value)])))
                    .collect(),
                _ => Vec::new(),
            };
            described.insert(
                key,
                BTreeMap::from([(self.spec.present_key(), fragments)]),
            );
        }

        Ok(described)
    }

    #[allow(clippy::too_many_arguments)]
    async fn wait_for(
        &self,
        ctx: &Context,
        namespace: &str,
        name: &str,
        acceptor: &Acceptor,
        projection: &[Projection],
        config: WaiterConfig,
        err_graceful: bool,
    ) -> Waited {
        let spec: &'static KindSpec = self.spec;
        let cluster = ctx.cluster.clone();
        let arguments = WaitArguments {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };

        let waited = waiter::wait(
            move |arguments: WaitArguments| {
                let cluster = cluster.clone();
                async move {
                    cluster
                        .get(&spec.api, &arguments.namespace, &arguments.name)
                        .await
                }
            },
            &arguments,
            acceptor,
            projection,
            &config,
            err_graceful,
            &ctx.cancellation,
        )
        .await;
        ctx.metrics.wait_attempts(spec.api.kind, waited.attempts);

        waited
    }

    async fn finish(
        &self,
        ctx: &Context,
        namespace: &str,
        name: &str,
        result: OperationResult,
    ) -> OperationResult {
        let kind = self.spec.api.kind;

        if let Some(error) = result.error {
            warn!(namespace, name, ?error, comment = ?result.comment, "operation failed");
            ctx.metrics.reconcile_failure(kind, error);
        } else {
            debug!(namespace, name, comment = ?result.comment, "operation finished");
        }
        ctx.record(format!("{kind}/{namespace}/{name}"), &result.comment)
            .await;

        result
    }
}
