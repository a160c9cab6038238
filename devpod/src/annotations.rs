//! Labels and annotations shared with other tools operating on dev pods.
//!
//! The keys below are a wire contract: other processes find shadows and scaled down targets
//! through them, so they must never change.

/// Label set on shadow deployments and their pods.
pub const REPLACED_LABEL: &str = "devspace.sh/replaced";

/// Value of [`REPLACED_LABEL`].
pub const REPLACED_LABEL_VALUE: &str = "true";

/// Name of the dev pod a shadow deployment belongs to.
pub const DEV_POD_ANNOTATION: &str = "devspace.sh/dev-pod";

/// Kind of the workload replaced by a shadow.
pub const PARENT_KIND_ANNOTATION: &str = "devspace.sh/parent-kind";

/// Name of the workload replaced by a shadow.
pub const PARENT_NAME_ANNOTATION: &str = "devspace.sh/parent-name";

/// Hash of the target pod template the shadow was built from.
pub const PARENT_HASH_ANNOTATION: &str = "devspace.sh/parent-hash";

/// Hash of the dev pod configuration the shadow was built from.
pub const CONFIG_HASH_ANNOTATION: &str = "devspace.sh/config-hash";

/// Replica count of a target before it was scaled down.
pub const REPLICAS_ANNOTATION: &str = "devspace.sh/replicas";

/// Names of the containers matched by the image selector, separated by `;`.
pub const MATCHED_CONTAINER_ANNOTATION: &str = "devspace.sh/container";

/// Truncated hash of the resolved image selector.
pub const IMAGE_SELECTOR_ANNOTATION: &str = "devspace.sh/imageSelector";

/// Restart helper script exposed to containers through the downward API.
pub const RESTART_HELPER_ANNOTATION: &str = "devspace.sh/restart-helper";

/// Suffix appended to the target name to form the shadow deployment name.
pub const SHADOW_NAME_SUFFIX: &str = "-devspace";

/// Labels added by workload controllers that must not be copied to a shadow template.
pub const CONTROLLER_LABELS: &[&str] = &[
    "pod-template-hash",
    "controller-revision-hash",
    "statefulset.kubernetes.io/pod-name",
];

/// Returns the name of the shadow deployment replacing the workload `target_name`.
pub fn shadow_name(target_name: &str) -> String {
    format!("{target_name}{SHADOW_NAME_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadow_name() {
        assert_eq!(shadow_name("app"), "app-devspace");
    }
}
