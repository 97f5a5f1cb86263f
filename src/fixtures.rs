//! Helper methods only available for tests
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::Mutex,
};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::cluster::{ApiRef, ClientError, ClientErrorKind, ClientResult, ClusterClient};

type Key = (&'static str, String, String);

/// How often each cluster operation was called
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Calls {
    pub get: u32,
    pub list: u32,
    pub create: u32,
    pub replace: u32,
    pub delete: u32,
}

impl Calls {
    pub fn mutations(&self) -> u32 {
        self.create + self.replace + self.delete
    }
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Key, Value>,
    calls: Calls,
    statuses: HashMap<Key, VecDeque<Value>>,
    failures: HashMap<&'static str, VecDeque<ClientError>>,
    linger: u32,
    lingering: HashMap<Key, u32>,
    version: u64,
}

/// An in-memory cluster that behaves like an API server where the tests need it to.
///
/// Created objects get server metadata and, for services, a `clusterIP` and port protocols.
/// Replacing with a stale `resourceVersion` is a conflict.
#[derive(Default)]
pub struct FakeCluster {
    inner: Mutex<Inner>,
}

fn key(api: &ApiRef, namespace: &str, name: &str) -> Key {
    (api.kind, namespace.to_string(), name.to_string())
}

fn name_of(document: &Value) -> Option<String> {
    document["metadata"]["name"].as_str().map(str::to_string)
}

impl FakeCluster {
    /// Seed an object as if it had been created earlier
    pub fn with_object(self, api: &ApiRef, document: Value) -> Self {
        self.insert(api, document);
        self
    }

    pub fn insert(&self, api: &ApiRef, mut document: Value) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let namespace = document["metadata"]["namespace"]
            .as_str()
            .unwrap_or("default")
            .to_string();
        let name = name_of(&document).expect("seeded objects need a name");

        inner.version += 1;
        server_defaults(api, &mut document, &namespace, inner.version);
        inner.objects.insert(key(api, &namespace, &name), document);
    }

    pub fn object(&self, api: &ApiRef, namespace: &str, name: &str) -> Option<Value> {
        let inner = self.inner.lock().unwrap();
        inner.objects.get(&key(api, namespace, name)).cloned()
    }

    pub fn calls(&self) -> Calls {
        self.inner.lock().unwrap().calls
    }

    /// Statuses handed out by successive reads of an object, the last one sticking
    pub fn script_status(&self, api: &ApiRef, namespace: &str, name: &str, statuses: Vec<Value>) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        inner
            .statuses
            .insert(key(api, namespace, name), statuses.into());
    }

    /// Fail the next call of `operation` (`get`, `list`, `create`, `replace`, `delete`)
    pub fn fail_next(&self, operation: &'static str, error: ClientError) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        inner
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Keep deleted objects readable for this many reads
    pub fn linger_deletes(&self, reads: u32) {
        self.inner.lock().unwrap().linger = reads;
    }

    /// Make an object disappear once it has been read this many times
    pub fn expire_after_reads(&self, api: &ApiRef, namespace: &str, name: &str, reads: u32) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        inner.lingering.insert(key(api, namespace, name), reads);
    }
}

impl Inner {
    fn injected(&mut self, operation: &'static str) -> ClientResult<()> {
        match self.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Drop an expiring object once its reads are used up, or use one up on a read
    fn expire(&mut self, key: &Key, read: bool) {
        if let Some(reads) = self.lingering.get_mut(key) {
            if *reads == 0 {
                self.lingering.remove(key);
                self.objects.remove(key);
            } else if read {
                *reads -= 1;
            }
        }
    }
}

fn server_defaults(api: &ApiRef, document: &mut Value, namespace: &str, version: u64) {
    document["apiVersion"] = json!(api.api_version);
    document["kind"] = json!(api.kind);

    let metadata = &mut document["metadata"];
    metadata["namespace"] = json!(namespace);
    metadata["resourceVersion"] = json!(version.to_string());
    if metadata.get("uid").is_none() {
        metadata["uid"] = json!(format!("uid-{version}"));
        metadata["creationTimestamp"] = json!("2024-01-01T00:00:00Z");
    }

    if api.kind == "Service" {
        let spec = &mut document["spec"];
        if spec.get("clusterIP").is_none() {
            spec["clusterIP"] = json!("10.96.0.10");
        }
        if let Some(ports) = spec.get_mut("ports").and_then(Value::as_array_mut) {
            for port in ports {
                if port.get("protocol").is_none() {
                    port["protocol"] = json!("TCP");
                }
            }
        }
        if document.get("status").is_none() {
            document["status"] = json!({ "loadBalancer": {} });
        }
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get(&self, api: &ApiRef, namespace: &str, name: &str) -> ClientResult<Value> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        inner.calls.get += 1;
        inner.injected("get")?;

        let key = key(api, namespace, name);
        inner.expire(&key, true);

        let Some(object) = inner.objects.get_mut(&key) else {
            return Err(ClientError::not_found(format!(
                "{} \"{name}\" not found",
                api.plural
            )));
        };

        let status = match inner.statuses.get_mut(&key) {
            Some(statuses) if statuses.len() > 1 => statuses.pop_front(),
            Some(statuses) => statuses.front().cloned(),
            None => None,
        };
        if let Some(status) = status {
            object["status"] = status;
        }

        Ok(object.clone())
    }

    async fn list(&self, api: &ApiRef, namespace: Option<&str>) -> ClientResult<Vec<Value>> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        inner.calls.list += 1;
        inner.injected("list")?;

        Ok(inner
            .objects
            .iter()
            .filter(|((kind, ns, _), _)| {
                *kind == api.kind && namespace.map_or(true, |n| n == ns.as_str())
            })
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn create(&self, api: &ApiRef, namespace: &str, mut payload: Value) -> ClientResult<Value> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        inner.calls.create += 1;
        inner.injected("create")?;

        let name = name_of(&payload).ok_or_else(|| {
            ClientError::new(ClientErrorKind::Invalid, "metadata.name: Required value")
        })?;
        let key = key(api, namespace, &name);
        if inner.objects.contains_key(&key) {
            return Err(ClientError::new(
                ClientErrorKind::AlreadyExists,
                format!("{} \"{name}\" already exists", api.plural),
            ));
        }

        inner.version += 1;
        server_defaults(api, &mut payload, namespace, inner.version);
        inner.objects.insert(key, payload.clone());

        Ok(payload)
    }

    async fn replace(
        &self,
        api: &ApiRef,
        namespace: &str,
        name: &str,
        mut payload: Value,
    ) -> ClientResult<Value> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        inner.calls.replace += 1;
        inner.injected("replace")?;

        let key = key(api, namespace, name);
        inner.expire(&key, false);
        let Some(current) = inner.objects.get(&key).cloned() else {
            return Err(ClientError::not_found(format!(
                "{} \"{name}\" not found",
                api.plural
            )));
        };

        let sent = payload["metadata"]["resourceVersion"].clone();
        if !sent.is_null() && sent != current["metadata"]["resourceVersion"] {
            return Err(ClientError::new(
                ClientErrorKind::Conflict,
                "the object has been modified; please apply your changes to the latest version",
            ));
        }

        payload["metadata"]["uid"] = current["metadata"]["uid"].clone();
        payload["metadata"]["creationTimestamp"] = current["metadata"]["creationTimestamp"].clone();
        if let Some(status) = current.get("status") {
            payload["status"] = status.clone();
        }

        inner.version += 1;
        server_defaults(api, &mut payload, namespace, inner.version);
        inner.objects.insert(key, payload.clone());

        Ok(payload)
    }

    async fn delete(&self, api: &ApiRef, namespace: &str, name: &str) -> ClientResult<()> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        inner.calls.delete += 1;
        inner.injected("delete")?;

        let key = key(api, namespace, name);
        let linger = inner.linger;
        let Some(object) = inner.objects.get_mut(&key) else {
            return Err(ClientError::not_found(format!(
                "{} \"{name}\" not found",
                api.plural
            )));
        };

        if linger == 0 {
            inner.objects.remove(&key);
        } else {
            object["metadata"]["deletionTimestamp"] = json!("2024-01-01T00:00:00Z");
            inner.lingering.insert(key, linger);
        }

        Ok(())
    }
}
