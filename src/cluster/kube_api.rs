use async_trait::async_trait;
use kube::{
    api::{DeleteParams, ListParams, PostParams},
    core::{ApiResource, DynamicObject},
    Api, Client,
};
use serde_json::Value;
use tracing::debug;

use super::{ApiRef, ClientError, ClientErrorKind, ClientResult, ClusterClient};

/// A [`ClusterClient`] backed by a live cluster through kube-rs.
///
/// Every kind goes through `Api<DynamicObject>` so that fields the typed payloads do not
/// know about survive the round trip.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced(&self, api: &ApiRef, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &api_resource(api))
    }
}

fn api_resource(api: &ApiRef) -> ApiResource {
    ApiResource {
        group: api.group.into(),
        version: api.version.into(),
        api_version: api.api_version.into(),
        kind: api.kind.into(),
        plural: api.plural.into(),
    }
}

/// Map a kube-rs failure onto the framework's error classes
fn classify(error: kube::Error) -> ClientError {
    match error {
        kube::Error::Api(response) => {
            let kind = match (response.code, response.reason.as_str()) {
                (404, _) => ClientErrorKind::NotFound,
                (409, "AlreadyExists") => ClientErrorKind::AlreadyExists,
                (409, _) => ClientErrorKind::Conflict,
                (400, _) | (422, _) => ClientErrorKind::Invalid,
                (429, _) | (500..=599, _) => ClientErrorKind::Transient,
                _ => ClientErrorKind::Fatal,
            };

            ClientError::new(kind, format!("{} ({})", response.message, response.reason))
        }
        kube::Error::HyperError(e) => ClientError::new(ClientErrorKind::Transient, e),
        kube::Error::Service(e) => ClientError::new(ClientErrorKind::Transient, e),
        other => ClientError::new(ClientErrorKind::Fatal, other),
    }
}

fn to_document(object: DynamicObject) -> ClientResult<Value> {
    serde_json::to_value(object).map_err(|e| ClientError::new(ClientErrorKind::Fatal, e))
}

fn from_payload(payload: Value) -> ClientResult<DynamicObject> {
    serde_json::from_value(payload).map_err(|e| ClientError::new(ClientErrorKind::Invalid, e))
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn get(&self, api: &ApiRef, namespace: &str, name: &str) -> ClientResult<Value> {
        debug!(kind = api.kind, namespace, name, "get");
        let object = self
            .namespaced(api, namespace)
            .get(name)
            .await
            .map_err(classify)?;

        to_document(object)
    }

    async fn list(&self, api: &ApiRef, namespace: Option<&str>) -> ClientResult<Vec<Value>> {
        debug!(kind = api.kind, namespace, "list");
        let handle = match namespace {
            Some(namespace) => self.namespaced(api, namespace),
            None => Api::all_with(self.client.clone(), &api_resource(api)),
        };

        let objects = handle
            .list(&ListParams::default())
            .await
            .map_err(classify)?;

        objects.items.into_iter().map(to_document).collect()
    }

    async fn create(&self, api: &ApiRef, namespace: &str, payload: Value) -> ClientResult<Value> {
        debug!(kind = api.kind, namespace, "create");
        let object = from_payload(payload)?;
        let created = self
            .namespaced(api, namespace)
            .create(&PostParams::default(), &object)
            .await
            .map_err(classify)?;

        to_document(created)
    }

    async fn replace(
        &self,
        api: &ApiRef,
        namespace: &str,
        name: &str,
        payload: Value,
    ) -> ClientResult<Value> {
        debug!(kind = api.kind, namespace, name, "replace");
        let object = from_payload(payload)?;
        let replaced = self
            .namespaced(api, namespace)
            .replace(name, &PostParams::default(), &object)
            .await
            .map_err(classify)?;

        to_document(replaced)
    }

    async fn delete(&self, api: &ApiRef, namespace: &str, name: &str) -> ClientResult<()> {
        debug!(kind = api.kind, namespace, name, "delete");
        self.namespaced(api, namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(classify)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, Request, Response, StatusCode};
    use hyper::Body;
    use serde_json::json;
    use tower_test::mock::{self, Handle};

    use super::*;

    const SERVICES: ApiRef = ApiRef {
        group: "",
        version: "v1",
        api_version: "v1",
        kind: "Service",
        plural: "services",
    };

    type ApiServerHandle = Handle<Request<Body>, Response<Body>>;

    fn mock_cluster() -> (KubeCluster, ApiServerHandle) {
        let (mock_service, handle) = mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default");

        (KubeCluster::new(client), handle)
    }

    /// Answer the next request after checking where it went
    async fn respond(
        mut handle: ApiServerHandle,
        method: Method,
        path: &str,
        status: StatusCode,
        body: Value,
    ) {
        let (request, send) = handle.next_request().await.expect("service not called");
        assert_eq!(request.method(), method);
        assert_eq!(request.uri().path(), path);

        send.send_response(
            Response::builder()
                .status(status)
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        );
    }

    fn failure(code: u16, reason: &str) -> Value {
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": format!("services \"svc-1\" {reason}"),
            "reason": reason,
            "code": code,
        })
    }

    #[tokio::test]
    async fn get_returns_wire_document() {
        let (cluster, handle) = mock_cluster();
        let server = tokio::spawn(respond(
            handle,
            Method::GET,
            "/api/v1/namespaces/default/services/svc-1",
            StatusCode::OK,
            json!({
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": { "name": "svc-1", "namespace": "default" },
                "spec": { "type": "NodePort" },
            }),
        ));

        let document = cluster.get(&SERVICES, "default", "svc-1").await.unwrap();
        assert_eq!(document["metadata"]["name"], "svc-1");
        assert_eq!(document["spec"]["type"], "NodePort");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn get_classifies_missing_objects() {
        let (cluster, handle) = mock_cluster();
        let server = tokio::spawn(respond(
            handle,
            Method::GET,
            "/api/v1/namespaces/default/services/svc-1",
            StatusCode::NOT_FOUND,
            failure(404, "NotFound"),
        ));

        let error = cluster.get(&SERVICES, "default", "svc-1").await.unwrap_err();
        assert_eq!(error.kind, ClientErrorKind::NotFound);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn create_classifies_existing_objects() {
        let (cluster, handle) = mock_cluster();
        let server = tokio::spawn(respond(
            handle,
            Method::POST,
            "/api/v1/namespaces/default/services",
            StatusCode::CONFLICT,
            failure(409, "AlreadyExists"),
        ));

        let payload = json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "svc-1", "namespace": "default" },
        });
        let error = cluster
            .create(&SERVICES, "default", payload)
            .await
            .unwrap_err();
        assert_eq!(error.kind, ClientErrorKind::AlreadyExists);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn replace_classifies_conflicts_and_server_errors() {
        let (cluster, handle) = mock_cluster();
        let server = tokio::spawn(respond(
            handle,
            Method::PUT,
            "/api/v1/namespaces/default/services/svc-1",
            StatusCode::CONFLICT,
            failure(409, "Conflict"),
        ));

        let payload = json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "svc-1", "namespace": "default" },
        });
        let error = cluster
            .replace(&SERVICES, "default", "svc-1", payload.clone())
            .await
            .unwrap_err();
        assert_eq!(error.kind, ClientErrorKind::Conflict);
        server.await.unwrap();

        let (cluster, handle) = mock_cluster();
        let server = tokio::spawn(respond(
            handle,
            Method::PUT,
            "/api/v1/namespaces/default/services/svc-1",
            StatusCode::SERVICE_UNAVAILABLE,
            failure(503, "ServiceUnavailable"),
        ));

        let error = cluster
            .replace(&SERVICES, "default", "svc-1", payload)
            .await
            .unwrap_err();
        assert!(error.is_transient());
        server.await.unwrap();
    }
}
