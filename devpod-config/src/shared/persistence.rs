use serde::{Deserialize, Serialize};

/// Settings of the volume claim that backs persisted paths.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PersistenceOptions {
    /// Requested storage, e.g. `5Gi`. Defaults to the reconciler's default size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    /// Storage class of the claim. Uses the cluster default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    /// Access modes of the claim. Defaults to `ReadWriteOnce`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_modes: Vec<String>,
    /// Mounts the claim read only and disables populating it.
    #[serde(default)]
    pub read_only: bool,
    /// Name of an existing or shared claim. Defaults to the shadow deployment name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}
