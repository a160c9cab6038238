use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod};
use serde_json::Value;
use thiserror::Error;

use crate::error::{DevPodError, ErrorKind};
use crate::workload::{Workload, WorkloadKind};

/// Errors emitted by the Kubernetes integration.
///
/// The API statuses the reconciler reacts to get their own variants, everything else is kept
/// as the underlying [`kube`] error.
#[derive(Debug, Error)]
pub enum K8sError {
    /// The requested object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),
    /// An object with the same name already exists.
    #[error("object already exists: {0}")]
    AlreadyExists(String),
    /// The API server rejected the object as invalid.
    #[error("object is invalid: {0}")]
    Invalid(String),
    /// The object was modified since it was read.
    #[error("object was modified concurrently: {0}")]
    Conflict(String),
    /// A serialization or deserialization error while building or parsing
    /// Kubernetes resources.
    #[error("An error occurred in serde when dealing with K8s: {0}")]
    Serde(#[from] serde_json::error::Error),
    /// An error returned by the [`kube`] client when talking to the API
    /// server.
    #[error("An error occurred with kube when dealing with K8s: {0}")]
    Kube(#[from] kube::Error),
}

impl K8sError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, K8sError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, K8sError::AlreadyExists(_))
    }
}

impl From<K8sError> for DevPodError {
    fn from(err: K8sError) -> DevPodError {
        let (kind, description) = match &err {
            K8sError::NotFound(_) => (ErrorKind::NotFound, "Object not found"),
            K8sError::AlreadyExists(_) => (ErrorKind::AlreadyExists, "Object already exists"),
            K8sError::Invalid(_) => (ErrorKind::Invalid, "Object rejected as invalid"),
            K8sError::Conflict(_) => (ErrorKind::Conflict, "Object modified concurrently"),
            K8sError::Serde(_) => (
                ErrorKind::SerializationError,
                "Kubernetes object (de)serialization failed",
            ),
            K8sError::Kube(_) => (ErrorKind::ApiError, "Kubernetes API request failed"),
        };

        DevPodError::from((kind, description, err.to_string()))
    }
}

/// Cluster operations used by the dev pod flows.
///
/// Consumers depend on this trait rather than on a transport so the flows can run against an
/// in-memory cluster in tests.
#[async_trait]
pub trait K8sClient: Send + Sync {
    /// Retrieves a workload of the given kind.
    async fn get_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Workload, K8sError>;

    /// Lists workloads of the given kind, optionally filtered by a label selector
    /// (`key=value,key2=value2`).
    async fn list_workloads(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<Workload>, K8sError>;

    /// Applies a JSON merge patch to a workload and returns the updated object.
    async fn patch_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Workload, K8sError>;

    /// Deletes a workload. Its pods are garbage collected by the cluster.
    async fn delete_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), K8sError>;

    /// Creates a [`Deployment`].
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, K8sError>;

    /// Lists pods matching a label selector.
    async fn list_pods(&self, namespace: &str, label_selector: &str)
    -> Result<Vec<Pod>, K8sError>;

    /// Retrieves a [`PersistentVolumeClaim`].
    async fn get_pvc(&self, namespace: &str, name: &str)
    -> Result<PersistentVolumeClaim, K8sError>;

    /// Creates a [`PersistentVolumeClaim`].
    async fn create_pvc(
        &self,
        namespace: &str,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, K8sError>;

    /// Deletes a [`PersistentVolumeClaim`].
    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<(), K8sError>;

    /// Retrieves a [`ConfigMap`].
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, K8sError>;

    /// Creates or updates a [`ConfigMap`].
    async fn create_or_update_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<(), K8sError>;
}
