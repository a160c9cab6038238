use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::annotations::{REPLACED_LABEL, REPLACED_LABEL_VALUE};
use crate::bail;
use crate::error::{DevPodError, DevPodResult, ErrorKind};
use crate::patch::create_merge_patch;

/// Replica count assumed when a workload does not declare one.
const DEFAULT_REPLICAS: i32 = 1;

/// The workload kinds a dev pod can replace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WorkloadKind {
    Deployment,
    ReplicaSet,
    StatefulSet,
}

impl WorkloadKind {
    /// All kinds in the order targets are searched.
    pub const SEARCH_ORDER: [WorkloadKind; 3] = [
        WorkloadKind::Deployment,
        WorkloadKind::ReplicaSet,
        WorkloadKind::StatefulSet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::ReplicaSet => "ReplicaSet",
            WorkloadKind::StatefulSet => "StatefulSet",
        }
    }

    pub fn api_version(&self) -> &'static str {
        "apps/v1"
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = DevPodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Deployment" => Ok(WorkloadKind::Deployment),
            "ReplicaSet" => Ok(WorkloadKind::ReplicaSet),
            "StatefulSet" => Ok(WorkloadKind::StatefulSet),
            other => bail!(
                ErrorKind::UnsupportedWorkloadKind,
                "Workload kind is not supported",
                other
            ),
        }
    }
}

/// A workload that can be replaced by a shadow deployment.
#[derive(Clone, Debug, PartialEq)]
pub enum Workload {
    Deployment(Deployment),
    ReplicaSet(ReplicaSet),
    StatefulSet(StatefulSet),
}

impl Workload {
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Workload::Deployment(_) => WorkloadKind::Deployment,
            Workload::ReplicaSet(_) => WorkloadKind::ReplicaSet,
            Workload::StatefulSet(_) => WorkloadKind::StatefulSet,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Workload::Deployment(deployment) => &deployment.metadata,
            Workload::ReplicaSet(replica_set) => &replica_set.metadata,
            Workload::StatefulSet(stateful_set) => &stateful_set.metadata,
        }
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Workload::Deployment(deployment) => &mut deployment.metadata,
            Workload::ReplicaSet(replica_set) => &mut replica_set.metadata,
            Workload::StatefulSet(stateful_set) => &mut stateful_set.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    pub fn uid(&self) -> Option<&str> {
        self.metadata().uid.as_deref()
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.metadata().resource_version.as_deref()
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata()
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(key))
            .map(String::as_str)
    }

    pub fn set_annotation(&mut self, key: &str, value: String) {
        self.metadata_mut()
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value);
    }

    pub fn remove_annotation(&mut self, key: &str) -> Option<String> {
        self.metadata_mut()
            .annotations
            .as_mut()
            .and_then(|annotations| annotations.remove(key))
    }

    /// Returns `true` when another object, usually a deployment, controls this workload.
    pub fn is_owned(&self) -> bool {
        self.metadata()
            .owner_references
            .as_ref()
            .is_some_and(|owners| !owners.is_empty())
    }

    /// Returns `true` when this workload is a shadow deployment.
    pub fn is_shadow(&self) -> bool {
        self.metadata()
            .labels
            .as_ref()
            .and_then(|labels| labels.get(REPLACED_LABEL))
            .is_some_and(|value| value == REPLACED_LABEL_VALUE)
    }

    /// Returns the pod template of the workload.
    pub fn pod_template(&self) -> DevPodResult<&PodTemplateSpec> {
        let template = match self {
            Workload::Deployment(deployment) => deployment.spec.as_ref().map(|spec| &spec.template),
            Workload::ReplicaSet(replica_set) => replica_set
                .spec
                .as_ref()
                .and_then(|spec| spec.template.as_ref()),
            Workload::StatefulSet(stateful_set) => {
                stateful_set.spec.as_ref().map(|spec| &spec.template)
            }
        };

        match template {
            Some(template) => Ok(template),
            None => bail!(
                ErrorKind::InvalidState,
                "Workload has no pod template",
                format!("{} {}", self.kind(), self.name())
            ),
        }
    }

    /// Returns the volume claim templates of a stateful set.
    pub fn volume_claim_templates(&self) -> &[PersistentVolumeClaim] {
        match self {
            Workload::StatefulSet(stateful_set) => stateful_set
                .spec
                .as_ref()
                .and_then(|spec| spec.volume_claim_templates.as_deref())
                .unwrap_or_default(),
            _ => &[],
        }
    }

    /// Returns the desired replica count, which the cluster defaults to one.
    pub fn replicas(&self) -> i32 {
        let replicas = match self {
            Workload::Deployment(deployment) => {
                deployment.spec.as_ref().and_then(|spec| spec.replicas)
            }
            Workload::ReplicaSet(replica_set) => {
                replica_set.spec.as_ref().and_then(|spec| spec.replicas)
            }
            Workload::StatefulSet(stateful_set) => {
                stateful_set.spec.as_ref().and_then(|spec| spec.replicas)
            }
        };

        replicas.unwrap_or(DEFAULT_REPLICAS)
    }

    pub fn set_replicas(&mut self, replicas: i32) {
        match self {
            Workload::Deployment(deployment) => {
                deployment.spec.get_or_insert_with(Default::default).replicas = Some(replicas)
            }
            Workload::ReplicaSet(replica_set) => {
                replica_set.spec.get_or_insert_with(Default::default).replicas = Some(replicas)
            }
            Workload::StatefulSet(stateful_set) => {
                stateful_set.spec.get_or_insert_with(Default::default).replicas = Some(replicas)
            }
        }
    }

    pub fn to_value(&self) -> DevPodResult<Value> {
        let value = match self {
            Workload::Deployment(deployment) => serde_json::to_value(deployment)?,
            Workload::ReplicaSet(replica_set) => serde_json::to_value(replica_set)?,
            Workload::StatefulSet(stateful_set) => serde_json::to_value(stateful_set)?,
        };

        Ok(value)
    }

    pub fn from_value(kind: WorkloadKind, value: Value) -> DevPodResult<Workload> {
        let workload = match kind {
            WorkloadKind::Deployment => Workload::Deployment(serde_json::from_value(value)?),
            WorkloadKind::ReplicaSet => Workload::ReplicaSet(serde_json::from_value(value)?),
            WorkloadKind::StatefulSet => Workload::StatefulSet(serde_json::from_value(value)?),
        };

        Ok(workload)
    }

    /// Computes the merge patch turning `self` into `modified`.
    ///
    /// The patch carries the resource version of `self`, so the cluster rejects it with a
    /// conflict when the object changed since it was read. Returns `None` when both objects
    /// are identical.
    pub fn merge_patch_to(&self, modified: &Workload) -> DevPodResult<Option<Value>> {
        let mut patch = create_merge_patch(&self.to_value()?, &modified.to_value()?);

        let Value::Object(ref mut fields) = patch else {
            bail!(
                ErrorKind::InvalidState,
                "Merge patch of a workload is not an object"
            );
        };

        if fields.is_empty() {
            return Ok(None);
        }

        if let Some(resource_version) = self.resource_version() {
            let metadata = fields
                .entry("metadata")
                .or_insert_with(|| Value::Object(Default::default()));
            if let Value::Object(metadata) = metadata {
                metadata.insert(
                    "resourceVersion".to_string(),
                    Value::String(resource_version.to_string()),
                );
            }
        }

        Ok(Some(patch))
    }
}

impl From<Deployment> for Workload {
    fn from(value: Deployment) -> Self {
        Workload::Deployment(value)
    }
}

impl From<ReplicaSet> for Workload {
    fn from(value: ReplicaSet) -> Self {
        Workload::ReplicaSet(value)
    }
}

impl From<StatefulSet> for Workload {
    fn from(value: StatefulSet) -> Self {
        Workload::StatefulSet(value)
    }
}
