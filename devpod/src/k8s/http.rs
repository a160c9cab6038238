use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::ErrorResponse;
use kube::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::k8s::{K8sClient, K8sError};
use crate::workload::{Workload, WorkloadKind};

/// Field manager recorded for server-side apply requests.
const FIELD_MANAGER: &str = "devpod";

/// [`K8sClient`] talking to the cluster through [`kube`].
///
/// Uses the ambient configuration: in-cluster service account or the local kubeconfig.
#[derive(Clone)]
pub struct HttpK8sClient {
    client: Client,
}

impl HttpK8sClient {
    pub async fn new() -> Result<HttpK8sClient, K8sError> {
        let client = Client::try_default().await?;

        Ok(HttpK8sClient { client })
    }

    pub fn from_client(client: Client) -> HttpK8sClient {
        HttpK8sClient { client }
    }
}

/// Maps the API statuses the reconciler reacts to onto dedicated [`K8sError`] variants.
fn map_kube_error(err: kube::Error) -> K8sError {
    match err {
        kube::Error::Api(ErrorResponse {
            code: 404, message, ..
        }) => K8sError::NotFound(message),
        kube::Error::Api(ErrorResponse {
            code: 409,
            ref reason,
            ref message,
            ..
        }) if reason == "AlreadyExists" => K8sError::AlreadyExists(message.clone()),
        kube::Error::Api(ErrorResponse {
            code: 409, message, ..
        }) => K8sError::Conflict(message),
        kube::Error::Api(ErrorResponse {
            code: 422, message, ..
        }) => K8sError::Invalid(message),
        err => K8sError::Kube(err),
    }
}

fn list_params(label_selector: Option<&str>) -> ListParams {
    match label_selector {
        Some(selector) => ListParams::default().labels(selector),
        None => ListParams::default(),
    }
}

async fn get<K>(api: Api<K>, name: &str) -> Result<K, K8sError>
where
    K: Clone + DeserializeOwned + Debug,
{
    api.get(name).await.map_err(map_kube_error)
}

async fn list<K>(api: Api<K>, label_selector: Option<&str>) -> Result<Vec<K>, K8sError>
where
    K: Clone + DeserializeOwned + Debug,
{
    let objects = api
        .list(&list_params(label_selector))
        .await
        .map_err(map_kube_error)?;

    Ok(objects.items)
}

async fn patch<K>(api: Api<K>, name: &str, patch: &Value) -> Result<K, K8sError>
where
    K: Clone + DeserializeOwned + Debug,
{
    api.patch(name, &PatchParams::default(), &Patch::Merge(patch))
        .await
        .map_err(map_kube_error)
}

async fn delete<K>(api: Api<K>, name: &str) -> Result<(), K8sError>
where
    K: Clone + DeserializeOwned + Debug,
{
    api.delete(name, &DeleteParams::default())
        .await
        .map_err(map_kube_error)?;

    Ok(())
}

#[async_trait]
impl K8sClient for HttpK8sClient {
    async fn get_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Workload, K8sError> {
        let client = self.client.clone();
        let workload = match kind {
            WorkloadKind::Deployment => {
                get(Api::<Deployment>::namespaced(client, namespace), name)
                    .await?
                    .into()
            }
            WorkloadKind::ReplicaSet => {
                get(Api::<ReplicaSet>::namespaced(client, namespace), name)
                    .await?
                    .into()
            }
            WorkloadKind::StatefulSet => {
                get(Api::<StatefulSet>::namespaced(client, namespace), name)
                    .await?
                    .into()
            }
        };

        Ok(workload)
    }

    async fn list_workloads(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<Workload>, K8sError> {
        debug!(%kind, namespace, ?label_selector, "listing workloads");

        let client = self.client.clone();
        let workloads = match kind {
            WorkloadKind::Deployment => {
                list(Api::<Deployment>::namespaced(client, namespace), label_selector)
                    .await?
                    .into_iter()
                    .map(Workload::from)
                    .collect()
            }
            WorkloadKind::ReplicaSet => {
                list(Api::<ReplicaSet>::namespaced(client, namespace), label_selector)
                    .await?
                    .into_iter()
                    .map(Workload::from)
                    .collect()
            }
            WorkloadKind::StatefulSet => {
                list(Api::<StatefulSet>::namespaced(client, namespace), label_selector)
                    .await?
                    .into_iter()
                    .map(Workload::from)
                    .collect()
            }
        };

        Ok(workloads)
    }

    async fn patch_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        merge_patch: &Value,
    ) -> Result<Workload, K8sError> {
        let client = self.client.clone();
        let workload = match kind {
            WorkloadKind::Deployment => {
                patch(Api::<Deployment>::namespaced(client, namespace), name, merge_patch)
                    .await?
                    .into()
            }
            WorkloadKind::ReplicaSet => {
                patch(Api::<ReplicaSet>::namespaced(client, namespace), name, merge_patch)
                    .await?
                    .into()
            }
            WorkloadKind::StatefulSet => {
                patch(Api::<StatefulSet>::namespaced(client, namespace), name, merge_patch)
                    .await?
                    .into()
            }
        };

        Ok(workload)
    }

    async fn delete_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), K8sError> {
        let client = self.client.clone();
        match kind {
            WorkloadKind::Deployment => {
                delete(Api::<Deployment>::namespaced(client, namespace), name).await
            }
            WorkloadKind::ReplicaSet => {
                delete(Api::<ReplicaSet>::namespaced(client, namespace), name).await
            }
            WorkloadKind::StatefulSet => {
                delete(Api::<StatefulSet>::namespaced(client, namespace), name).await
            }
        }
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, K8sError> {
        let api = Api::<Deployment>::namespaced(self.client.clone(), namespace);

        api.create(&PostParams::default(), deployment)
            .await
            .map_err(map_kube_error)
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, K8sError> {
        list(
            Api::<Pod>::namespaced(self.client.clone(), namespace),
            Some(label_selector),
        )
        .await
    }

    async fn get_pvc(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PersistentVolumeClaim, K8sError> {
        get(
            Api::<PersistentVolumeClaim>::namespaced(self.client.clone(), namespace),
            name,
        )
        .await
    }

    async fn create_pvc(
        &self,
        namespace: &str,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, K8sError> {
        let api = Api::<PersistentVolumeClaim>::namespaced(self.client.clone(), namespace);

        api.create(&PostParams::default(), pvc)
            .await
            .map_err(map_kube_error)
    }

    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<(), K8sError> {
        delete(
            Api::<PersistentVolumeClaim>::namespaced(self.client.clone(), namespace),
            name,
        )
        .await
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, K8sError> {
        get(
            Api::<ConfigMap>::namespaced(self.client.clone(), namespace),
            name,
        )
        .await
    }

    async fn create_or_update_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<(), K8sError> {
        let name = config_map.metadata.name.as_deref().unwrap_or_default();
        let api = Api::<ConfigMap>::namespaced(self.client.clone(), namespace);

        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(config_map),
        )
        .await
        .map_err(map_kube_error)?;

        Ok(())
    }
}
