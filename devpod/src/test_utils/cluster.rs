use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;

use crate::k8s::{K8sClient, K8sError};
use crate::patch::apply_merge_patch;
use crate::workload::{Workload, WorkloadKind};

/// Cluster operations the fake records or fails on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    GetWorkload,
    ListWorkloads,
    PatchWorkload,
    DeleteWorkload,
    CreateDeployment,
    ListPods,
    GetPvc,
    CreatePvc,
    DeletePvc,
    GetConfigMap,
    WriteConfigMap,
}

impl Operation {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Operation::PatchWorkload
                | Operation::DeleteWorkload
                | Operation::CreateDeployment
                | Operation::CreatePvc
                | Operation::DeletePvc
                | Operation::WriteConfigMap
        )
    }
}

/// API status returned by an injected failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    NotFound,
    AlreadyExists,
    Invalid,
    Conflict,
}

impl Failure {
    fn into_error(self, what: &str) -> K8sError {
        let message = format!("injected failure for {what}");
        match self {
            Failure::NotFound => K8sError::NotFound(message),
            Failure::AlreadyExists => K8sError::AlreadyExists(message),
            Failure::Invalid => K8sError::Invalid(message),
            Failure::Conflict => K8sError::Conflict(message),
        }
    }
}

/// A write the fake accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub operation: Operation,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

type Key = (String, String);

#[derive(Default)]
struct Inner {
    workloads: BTreeMap<(WorkloadKind, String, String), Workload>,
    pods: BTreeMap<Key, Pod>,
    pvcs: BTreeMap<Key, PersistentVolumeClaim>,
    config_maps: BTreeMap<Key, ConfigMap>,
    failures: BTreeMap<Operation, VecDeque<Failure>>,
    writes: Vec<WriteRecord>,
    next_version: u64,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn stamp(&mut self, metadata: &mut ObjectMeta, name: &str) {
        let version = self.next_version();
        metadata.resource_version = Some(version);
        if metadata.uid.is_none() {
            metadata.uid = Some(format!("uid-{name}-{}", self.next_version));
        }
    }

    fn take_failure(&mut self, operation: Operation, what: &str) -> Result<(), K8sError> {
        match self
            .failures
            .get_mut(&operation)
            .and_then(|queue| queue.pop_front())
        {
            Some(failure) => Err(failure.into_error(what)),
            None => Ok(()),
        }
    }

    fn record(&mut self, operation: Operation, kind: &str, namespace: &str, name: &str) {
        self.writes.push(WriteRecord {
            operation,
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
    }

    /// Removes every object controlled by the deleted object `uid`, like the garbage collector.
    fn collect_garbage(&mut self, uid: &str) {
        let owned_by = |metadata: &ObjectMeta| {
            metadata
                .owner_references
                .iter()
                .flatten()
                .any(|owner| owner.uid == uid)
        };

        self.pods.retain(|_, pod| !owned_by(&pod.metadata));
        self.pvcs.retain(|_, pvc| !owned_by(&pvc.metadata));
    }
}

fn parse_selector(selector: &str) -> Vec<(&str, &str)> {
    selector
        .split(',')
        .filter(|requirement| !requirement.is_empty())
        .filter_map(|requirement| requirement.split_once('='))
        .collect()
}

fn selector_matches(selector: Option<&str>, labels: Option<&BTreeMap<String, String>>) -> bool {
    let Some(selector) = selector else {
        return true;
    };

    parse_selector(selector).into_iter().all(|(key, value)| {
        labels
            .and_then(|labels| labels.get(key))
            .is_some_and(|label| label == value)
    })
}

fn workload_value(workload: &Workload) -> Result<Value, K8sError> {
    let value = match workload {
        Workload::Deployment(deployment) => serde_json::to_value(deployment)?,
        Workload::ReplicaSet(replica_set) => serde_json::to_value(replica_set)?,
        Workload::StatefulSet(stateful_set) => serde_json::to_value(stateful_set)?,
    };

    Ok(value)
}

fn workload_from_value(kind: WorkloadKind, value: Value) -> Result<Workload, K8sError> {
    let workload = match kind {
        WorkloadKind::Deployment => Workload::Deployment(serde_json::from_value(value)?),
        WorkloadKind::ReplicaSet => Workload::ReplicaSet(serde_json::from_value(value)?),
        WorkloadKind::StatefulSet => Workload::StatefulSet(serde_json::from_value(value)?),
    };

    Ok(workload)
}

fn workload_metadata_mut(workload: &mut Workload) -> &mut ObjectMeta {
    match workload {
        Workload::Deployment(deployment) => &mut deployment.metadata,
        Workload::ReplicaSet(replica_set) => &mut replica_set.metadata,
        Workload::StatefulSet(stateful_set) => &mut stateful_set.metadata,
    }
}

/// In-memory cluster implementing [`K8sClient`].
///
/// Models resource versions with optimistic concurrency on patches, immutable workload
/// selectors, owner based garbage collection and the not found and already exists statuses.
/// Accepted writes are recorded, and failures can be injected per operation.
#[derive(Clone, Default)]
pub struct FakeK8sClient {
    inner: Arc<Mutex<Inner>>,
}

impl FakeK8sClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores `workload` as is, assigning a resource version and uid.
    pub fn insert_workload(&self, workload: impl Into<Workload>) -> Workload {
        let mut workload = workload.into();
        let mut inner = self.lock();

        let key = (
            workload.kind(),
            workload.namespace().unwrap_or_default().to_string(),
            workload.name().to_string(),
        );
        let name = key.2.clone();
        inner.stamp(workload_metadata_mut(&mut workload), &name);
        inner.workloads.insert(key, workload.clone());

        workload
    }

    pub fn insert_pod(&self, pod: Pod) {
        let key = (
            pod.metadata.namespace.clone().unwrap_or_default(),
            pod.metadata.name.clone().unwrap_or_default(),
        );
        self.lock().pods.insert(key, pod);
    }

    pub fn insert_pvc(&self, mut pvc: PersistentVolumeClaim) {
        let mut inner = self.lock();
        let key = (
            pvc.metadata.namespace.clone().unwrap_or_default(),
            pvc.metadata.name.clone().unwrap_or_default(),
        );
        inner.stamp(&mut pvc.metadata, &key.1);
        inner.pvcs.insert(key, pvc);
    }

    pub fn workload(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Option<Workload> {
        self.lock()
            .workloads
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        match self.workload(WorkloadKind::Deployment, namespace, name)? {
            Workload::Deployment(deployment) => Some(deployment),
            _ => None,
        }
    }

    /// Returns all workloads of `kind` in `namespace`, ordered by name.
    pub fn workloads(&self, kind: WorkloadKind, namespace: &str) -> Vec<Workload> {
        self.lock()
            .workloads
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .map(|(_, workload)| workload.clone())
            .collect()
    }

    pub fn pvc(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.lock()
            .pvcs
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.lock()
            .config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Fails the next call of `operation` with `failure`. Calls queue up in order.
    pub fn fail_next(&self, operation: Operation, failure: Failure) {
        self.lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(failure);
    }

    /// Returns the writes accepted so far, oldest first.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }
}

#[async_trait]
impl K8sClient for FakeK8sClient {
    async fn get_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Workload, K8sError> {
        let mut inner = self.lock();
        inner.take_failure(Operation::GetWorkload, name)?;

        inner
            .workloads
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| K8sError::NotFound(format!("{kind} {namespace}/{name}")))
    }

    async fn list_workloads(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<Workload>, K8sError> {
        let mut inner = self.lock();
        inner.take_failure(Operation::ListWorkloads, namespace)?;

        Ok(inner
            .workloads
            .iter()
            .filter(|((k, ns, _), workload)| {
                *k == kind
                    && ns == namespace
                    && selector_matches(label_selector, workload.metadata().labels.as_ref())
            })
            .map(|(_, workload)| workload.clone())
            .collect())
    }

    async fn patch_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Workload, K8sError> {
        let mut inner = self.lock();
        inner.take_failure(Operation::PatchWorkload, name)?;

        let key = (kind, namespace.to_string(), name.to_string());
        let current = inner
            .workloads
            .get(&key)
            .cloned()
            .ok_or_else(|| K8sError::NotFound(format!("{kind} {namespace}/{name}")))?;

        let expected_version = patch
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str);
        if let Some(expected) = expected_version {
            if current.resource_version() != Some(expected) {
                return Err(K8sError::Conflict(format!(
                    "{kind} {namespace}/{name} has resource version {:?}, not {expected}",
                    current.resource_version()
                )));
            }
        }

        let original = workload_value(&current)?;
        let mut value = original.clone();
        apply_merge_patch(&mut value, patch);

        if value.pointer("/spec/selector") != original.pointer("/spec/selector") {
            return Err(K8sError::Invalid(format!(
                "{kind} {namespace}/{name}: spec.selector is immutable"
            )));
        }

        let mut patched = workload_from_value(kind, value)?;
        inner.stamp(workload_metadata_mut(&mut patched), name);
        inner.workloads.insert(key, patched.clone());
        inner.record(Operation::PatchWorkload, kind.as_str(), namespace, name);

        Ok(patched)
    }

    async fn delete_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), K8sError> {
        let mut inner = self.lock();
        inner.take_failure(Operation::DeleteWorkload, name)?;

        let removed = inner
            .workloads
            .remove(&(kind, namespace.to_string(), name.to_string()))
            .ok_or_else(|| K8sError::NotFound(format!("{kind} {namespace}/{name}")))?;

        if let Some(uid) = removed.uid() {
            let uid = uid.to_string();
            inner.collect_garbage(&uid);
        }
        inner.record(Operation::DeleteWorkload, kind.as_str(), namespace, name);

        Ok(())
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, K8sError> {
        let name = deployment.metadata.name.clone().unwrap_or_default();
        let mut inner = self.lock();
        inner.take_failure(Operation::CreateDeployment, &name)?;

        let key = (WorkloadKind::Deployment, namespace.to_string(), name.clone());
        if inner.workloads.contains_key(&key) {
            return Err(K8sError::AlreadyExists(format!(
                "Deployment {namespace}/{name}"
            )));
        }

        let mut created = deployment.clone();
        created.metadata.namespace = Some(namespace.to_string());
        created.metadata.uid = None;
        inner.stamp(&mut created.metadata, &name);
        inner
            .workloads
            .insert(key, Workload::Deployment(created.clone()));
        inner.record(Operation::CreateDeployment, "Deployment", namespace, &name);

        Ok(created)
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, K8sError> {
        let mut inner = self.lock();
        inner.take_failure(Operation::ListPods, namespace)?;

        Ok(inner
            .pods
            .iter()
            .filter(|((ns, _), pod)| {
                ns == namespace
                    && selector_matches(Some(label_selector), pod.metadata.labels.as_ref())
            })
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn get_pvc(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PersistentVolumeClaim, K8sError> {
        let mut inner = self.lock();
        inner.take_failure(Operation::GetPvc, name)?;

        inner
            .pvcs
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| K8sError::NotFound(format!("PersistentVolumeClaim {namespace}/{name}")))
    }

    async fn create_pvc(
        &self,
        namespace: &str,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, K8sError> {
        let name = pvc.metadata.name.clone().unwrap_or_default();
        let mut inner = self.lock();
        inner.take_failure(Operation::CreatePvc, &name)?;

        let key = (namespace.to_string(), name.clone());
        if inner.pvcs.contains_key(&key) {
            return Err(K8sError::AlreadyExists(format!(
                "PersistentVolumeClaim {namespace}/{name}"
            )));
        }

        let mut created = pvc.clone();
        created.metadata.namespace = Some(namespace.to_string());
        inner.stamp(&mut created.metadata, &name);
        inner.pvcs.insert(key, created.clone());
        inner.record(Operation::CreatePvc, "PersistentVolumeClaim", namespace, &name);

        Ok(created)
    }

    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<(), K8sError> {
        let mut inner = self.lock();
        inner.take_failure(Operation::DeletePvc, name)?;

        inner
            .pvcs
            .remove(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| {
                K8sError::NotFound(format!("PersistentVolumeClaim {namespace}/{name}"))
            })?;
        inner.record(Operation::DeletePvc, "PersistentVolumeClaim", namespace, name);

        Ok(())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, K8sError> {
        let mut inner = self.lock();
        inner.take_failure(Operation::GetConfigMap, name)?;

        inner
            .config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| K8sError::NotFound(format!("ConfigMap {namespace}/{name}")))
    }

    async fn create_or_update_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<(), K8sError> {
        let name = config_map.metadata.name.clone().unwrap_or_default();
        let mut inner = self.lock();
        inner.take_failure(Operation::WriteConfigMap, &name)?;

        let mut stored = config_map.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        inner.stamp(&mut stored.metadata, &name);
        inner
            .config_maps
            .insert((namespace.to_string(), name.clone()), stored);
        inner.record(Operation::WriteConfigMap, "ConfigMap", namespace, &name);

        Ok(())
    }
}
