use async_trait::async_trait;
use kube::core::{ApiResource, DynamicObject};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::{from_dynamic, labels_match, to_dynamic, type_meta, ClusterClient, GatewayError, Labels, Object};

/// Cluster operation recorded by [`MemoryCluster`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Create,
    Replace,
    Delete,
    List,
    Logs,
}

/// One recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub verb: Verb,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: Option<String>,
}

type Key = (String, String, Option<String>, String);
type Reactor = Box<dyn Fn(&Call, &mut Objects<'_>) + Send + Sync>;

struct Injected {
    verb: Verb,
    kind: String,
    name: Option<String>,
    error: GatewayError,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, DynamicObject>,
    calls: Vec<Call>,
    failures: Vec<Injected>,
    logs: HashMap<(String, String), String>,
    next_version: u64,
}

/// In-memory platform used by tests
///
/// Stores objects as [`DynamicObject`]s keyed by api version, kind,
/// namespace and name. Every call is recorded. Failures can be injected per
/// verb and kind, and reactors simulate controllers: they run after each
/// call has taken effect and may edit the store through [`Objects`].
///
/// # Example
///
/// ```ignore
/// let cluster = MemoryCluster::new();
/// cluster.react(|call, objects| {
///     if call.verb == Verb::Create && call.kind == "Subscription" {
///         objects.update::<Subscription>(call.namespace.as_deref(), "kogito-operator", |sub| {
///             sub.status = Some(SubscriptionStatus { current_csv: Some("kogito.v2".into()), ..Default::default() });
///         });
///     }
/// });
/// ```
#[derive(Default)]
pub struct MemoryCluster {
    state: Mutex<State>,
    reactors: Mutex<Vec<Reactor>>,
}

/// Mutable view of the store handed to reactors
pub struct Objects<'a> {
    objects: &'a mut BTreeMap<Key, DynamicObject>,
    next_version: &'a mut u64,
}

fn key(api: &ApiResource, namespace: Option<&str>, name: &str) -> Key {
    (
        api.api_version.clone(),
        api.kind.clone(),
        namespace.map(str::to_string),
        name.to_string(),
    )
}

fn typed_key<K: Object>(namespace: Option<&str>, name: &str) -> Key {
    key(&ApiResource::erase::<K>(&()), namespace, name)
}

impl Objects<'_> {
    /// Insert or overwrite a typed object
    pub fn insert<K: Object>(&mut self, object: &K) {
        if let Ok(mut dynamic) = to_dynamic(object) {
            *self.next_version += 1;
            dynamic.metadata.resource_version = Some(self.next_version.to_string());
            let name = dynamic.metadata.name.clone().unwrap_or_default();
            let k = typed_key::<K>(dynamic.metadata.namespace.as_deref(), &name);
            self.objects.insert(k, dynamic);
        }
    }

    pub fn get<K: Object>(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        self.objects
            .get(&typed_key::<K>(namespace, name))
            .cloned()
            .and_then(|o| from_dynamic(o).ok())
    }

    pub fn remove<K: Object>(&mut self, namespace: Option<&str>, name: &str) -> bool {
        self.objects
            .remove(&typed_key::<K>(namespace, name))
            .is_some()
    }

    /// Apply `edit` to a stored object; `false` if it does not exist
    pub fn update<K: Object>(
        &mut self,
        namespace: Option<&str>,
        name: &str,
        edit: impl FnOnce(&mut K),
    ) -> bool {
        match self.get::<K>(namespace, name) {
            Some(mut object) => {
                edit(&mut object);
                self.insert(&object);
                true
            }
            None => false,
        }
    }

    pub fn list<K: Object>(&self, namespace: Option<&str>) -> Vec<K> {
        let api = ApiResource::erase::<K>(&());
        self.objects
            .iter()
            .filter(|((version, kind, ns, _), _)| {
                *version == api.api_version
                    && *kind == api.kind
                    && (namespace.is_none() || ns.as_deref() == namespace)
            })
            .filter_map(|(_, o)| from_dynamic(o.clone()).ok())
            .collect()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object, builder style
    #[must_use]
    pub fn with_object<K: Object>(self, object: &K) -> Self {
        self.insert(object);
        self
    }

    pub fn insert<K: Object>(&self, object: &K) {
        self.with_objects(|objects| objects.insert(object));
    }

    pub fn get<K: Object>(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        self.with_objects(|objects| objects.get(namespace, name))
    }

    pub fn list<K: Object>(&self, namespace: Option<&str>) -> Vec<K> {
        self.with_objects(|objects| objects.list(namespace))
    }

    pub fn modify<K: Object>(&self, namespace: Option<&str>, name: &str, edit: impl FnOnce(&mut K)) -> bool {
        self.with_objects(|objects| objects.update(namespace, name, edit))
    }

    fn with_objects<T>(&self, f: impl FnOnce(&mut Objects<'_>) -> T) -> T {
        let mut state = self.lock();
        let State {
            objects,
            next_version,
            ..
        } = &mut *state;
        f(&mut Objects {
            objects,
            next_version,
        })
    }

    /// Register a reactor that runs after every call
    pub fn react(&self, reactor: impl Fn(&Call, &mut Objects<'_>) + Send + Sync + 'static) {
        self.reactors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(reactor));
    }

    /// Fail the next `verb` call on `kind` with `error`
    pub fn fail_next(&self, verb: Verb, kind: &str, error: GatewayError) {
        self.lock().failures.push(Injected {
            verb,
            kind: kind.to_string(),
            name: None,
            error,
        });
    }

    /// Fail the next `verb` call on the object `kind`/`name` with `error`
    pub fn fail_next_for(&self, verb: Verb, kind: &str, name: &str, error: GatewayError) {
        self.lock().failures.push(Injected {
            verb,
            kind: kind.to_string(),
            name: Some(name.to_string()),
            error,
        });
    }

    pub fn set_pod_logs(&self, namespace: &str, pod: &str, logs: impl Into<String>) {
        self.lock()
            .logs
            .insert((namespace.to_string(), pod.to_string()), logs.into());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn calls_matching(&self, verb: Verb, kind: &str) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.verb == verb && c.kind == kind)
            .cloned()
            .collect()
    }

    /// Calls that change cluster state
    pub fn mutations(&self) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c.verb, Verb::Create | Verb::Replace | Verb::Delete))
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the call and pop a matching injected failure, if any
    fn begin(&self, call: &Call) -> Result<(), GatewayError> {
        let mut state = self.lock();
        state.calls.push(call.clone());
        let position = state.failures.iter().position(|f| {
            f.verb == call.verb
                && f.kind == call.kind
                && (f.name.is_none() || f.name == call.name)
        });
        match position {
            Some(i) => Err(state.failures.remove(i).error),
            None => Ok(()),
        }
    }

    fn finish(&self, call: &Call) {
        let reactors = self.reactors.lock().unwrap_or_else(|e| e.into_inner());
        if reactors.is_empty() {
            return;
        }
        let mut state = self.lock();
        let State {
            objects,
            next_version,
            ..
        } = &mut *state;
        let mut view = Objects {
            objects,
            next_version,
        };
        for reactor in reactors.iter() {
            reactor(call, &mut view);
        }
    }

    fn call(verb: Verb, api: &ApiResource, namespace: Option<&str>, name: Option<&str>) -> Call {
        Call {
            verb,
            kind: api.kind.clone(),
            namespace: namespace.map(str::to_string),
            name: name.map(str::to_string),
        }
    }
}

fn describe(api: &ApiResource, namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{} {}/{}", api.kind, ns, name),
        None => format!("{} {}", api.kind, name),
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn get(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, GatewayError> {
        let call = Self::call(Verb::Get, api, namespace, Some(name));
        self.begin(&call)?;
        let found = self.lock().objects.get(&key(api, namespace, name)).cloned();
        self.finish(&call);
        Ok(found)
    }

    async fn create(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject, GatewayError> {
        let name = object.metadata.name.clone().unwrap_or_default();
        let call = Self::call(Verb::Create, api, namespace, Some(&name));
        self.begin(&call)?;
        let created = {
            let mut state = self.lock();
            let k = key(api, namespace, &name);
            if state.objects.contains_key(&k) {
                return Err(GatewayError::AlreadyExists(describe(api, namespace, &name)));
            }
            state.next_version += 1;
            let mut stored = object.clone();
            stored.types = Some(type_meta(api));
            stored.metadata.namespace = namespace.map(str::to_string);
            stored.metadata.resource_version = Some(state.next_version.to_string());
            stored.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
            state.objects.insert(k, stored.clone());
            stored
        };
        self.finish(&call);
        Ok(created)
    }

    async fn replace(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject, GatewayError> {
        let name = object.metadata.name.clone().unwrap_or_default();
        let call = Self::call(Verb::Replace, api, namespace, Some(&name));
        self.begin(&call)?;
        let replaced = {
            let mut state = self.lock();
            let k = key(api, namespace, &name);
            let Some(existing) = state.objects.get(&k) else {
                return Err(GatewayError::NotFound(describe(api, namespace, &name)));
            };
            let uid = existing.metadata.uid.clone();
            state.next_version += 1;
            let mut stored = object.clone();
            stored.types = Some(type_meta(api));
            stored.metadata.namespace = namespace.map(str::to_string);
            stored.metadata.resource_version = Some(state.next_version.to_string());
            stored.metadata.uid = uid;
            state.objects.insert(k, stored.clone());
            stored
        };
        self.finish(&call);
        Ok(replaced)
    }

    async fn delete(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, GatewayError> {
        let call = Self::call(Verb::Delete, api, namespace, Some(name));
        self.begin(&call)?;
        let removed = {
            let mut state = self.lock();
            let removed = state.objects.remove(&key(api, namespace, name)).is_some();
            if removed && api.kind == "Namespace" {
                state.objects.retain(|(_, _, ns, _), _| ns.as_deref() != Some(name));
            }
            removed
        };
        self.finish(&call);
        Ok(removed)
    }

    async fn list(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        labels: &Labels,
    ) -> Result<Vec<DynamicObject>, GatewayError> {
        let call = Self::call(Verb::List, api, namespace, None);
        self.begin(&call)?;
        let items = self
            .lock()
            .objects
            .iter()
            .filter(|((version, kind, ns, _), object)| {
                *version == api.api_version
                    && *kind == api.kind
                    && (namespace.is_none() || ns.as_deref() == namespace)
                    && labels_match(object.metadata.labels.as_ref(), labels)
            })
            .map(|(_, object)| object.clone())
            .collect();
        self.finish(&call);
        Ok(items)
    }

    async fn pod_logs(&self, namespace: &str, pod: &str) -> Result<String, GatewayError> {
        let call = Call {
            verb: Verb::Logs,
            kind: "Pod".to_string(),
            namespace: Some(namespace.to_string()),
            name: Some(pod.to_string()),
        };
        self.begin(&call)?;
        let logs = self
            .lock()
            .logs
            .get(&(namespace.to_string(), pod.to_string()))
            .cloned()
            .unwrap_or_default();
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Gateway;
    use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
    use kube::api::ObjectMeta;
    use std::sync::Arc;

    fn cm(ns: &str, name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_records_calls_in_order() {
        let cluster = Arc::new(MemoryCluster::new());
        let gateway = Gateway::new(cluster.clone());
        gateway.create_if_absent(&cm("a", "x")).await.unwrap();
        gateway.delete(&cm("a", "x")).await.unwrap();

        let verbs: Vec<Verb> = cluster.calls().iter().map(|c| c.verb).collect();
        assert_eq!(verbs, vec![Verb::Get, Verb::Create, Verb::Delete]);
        assert_eq!(cluster.mutations().len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let cluster = Arc::new(MemoryCluster::new().with_object(&cm("a", "x")));
        let gateway = Gateway::new(cluster.clone());
        cluster.fail_next_for(
            Verb::Delete,
            "ConfigMap",
            "x",
            GatewayError::Api {
                what: "ConfigMap a/x".to_string(),
                code: 500,
                message: "etcd unavailable".to_string(),
            },
        );

        assert!(gateway.delete(&cm("a", "x")).await.is_err());
        assert!(gateway.delete(&cm("a", "x")).await.unwrap());
    }

    #[tokio::test]
    async fn test_reactor_sees_call_and_edits_store() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.react(|call, objects| {
            if call.verb == Verb::Create && call.kind == "ConfigMap" {
                objects.update::<ConfigMap>(call.namespace.as_deref(), "x", |cm| {
                    cm.data = Some([("seen".to_string(), "yes".to_string())].into());
                });
            }
        });
        let gateway = Gateway::new(cluster.clone());
        gateway.create_if_absent(&cm("a", "x")).await.unwrap();

        let stored: ConfigMap = cluster.get(Some("a"), "x").unwrap();
        assert_eq!(stored.data.unwrap()["seen"], "yes");
    }

    #[tokio::test]
    async fn test_deleting_namespace_drops_its_objects() {
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some("a".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let cluster = Arc::new(MemoryCluster::new().with_object(&ns).with_object(&cm("a", "x")));
        let gateway = Gateway::new(cluster.clone());

        assert!(gateway.delete(&ns).await.unwrap());
        assert!(cluster.get::<ConfigMap>(Some("a"), "x").is_none());
    }
}
