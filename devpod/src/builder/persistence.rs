use devpod_config::shared::DevPodConfig;
use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaimVolumeSource, PodTemplateSpec, Volume, VolumeMount,
};

use crate::builder::container::containers;
use crate::builder::mutators::resource_requirements;
use crate::error::{DevPodResult, ErrorContext};

/// Volume backed by the dev pod's persistent volume claim.
pub const PERSISTENCE_VOLUME: &str = "devspace-persistence";

/// Mount point of the claim inside the populating init containers.
pub const PERSISTENCE_INIT_MOUNT_PATH: &str = "/devspace-persistence";

/// Directory created on the claim once a path was populated.
pub const POPULATED_SENTINEL: &str = "/devspace-persistence/.devspace";

fn clean_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

/// Returns the name of the volume claim used by the shadow `shadow_name`.
pub fn claim_name<'a>(shadow_name: &'a str, dev_pod: &'a DevPodConfig) -> &'a str {
    dev_pod
        .persistence_options
        .as_ref()
        .and_then(|options| options.name.as_deref())
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(shadow_name)
}

/// Shell script copying the original contents of `path` onto the claim exactly once.
pub fn populate_script(path: &str) -> String {
    let path = clean_path(path);

    format!(
        "if [ ! -d \"{POPULATED_SENTINEL}/\" ] && [ -d \"{path}\" ]; then\n \
         echo 'Initializing persisted path {path}...'\n \
         cp -a \"{path}/.\" {PERSISTENCE_INIT_MOUNT_PATH}/ && mkdir {POPULATED_SENTINEL}\n\
         fi"
    )
}

/// Mounts the claim `claim_name` at every persisted path and adds the populating init
/// containers.
///
/// `indices` holds the resolved container index of each dev container of `dev_pod`. Paths are
/// numbered across all dev containers, so the generated sub paths stay stable.
pub(crate) fn persist_paths(
    template: &mut PodTemplateSpec,
    claim_name: &str,
    dev_pod: &DevPodConfig,
    indices: &[Option<usize>],
) -> DevPodResult<()> {
    if !dev_pod.has_persistent_paths() {
        return Ok(());
    }

    let claim_read_only = dev_pod
        .persistence_options
        .as_ref()
        .is_some_and(|options| options.read_only);

    let paths = dev_pod
        .containers
        .iter()
        .zip(indices)
        .flat_map(|(dev_container, index)| {
            dev_container
                .persist_paths
                .iter()
                .map(move |path| (*index, path))
        })
        .enumerate();

    let mut init_containers = Vec::new();
    for (number, (index, path)) in paths {
        let Some(index) = index else {
            continue;
        };
        if path.path.trim().is_empty() {
            continue;
        }

        let sub_path = path
            .volume_path
            .clone()
            .unwrap_or_else(|| format!("path-{number}"));

        let Some(container) = template
            .spec
            .as_mut()
            .and_then(|spec| spec.containers.get_mut(index))
        else {
            continue;
        };
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(VolumeMount {
                name: PERSISTENCE_VOLUME.to_string(),
                mount_path: path.path.clone(),
                sub_path: Some(sub_path.clone()),
                read_only: (path.read_only || claim_read_only).then_some(true),
                ..Default::default()
            });

        if path.skip_populate || path.read_only || claim_read_only {
            continue;
        }

        let resources = path
            .init_container
            .as_ref()
            .and_then(|init| init.resources.as_ref())
            .map(resource_requirements)
            .transpose()
            .context("parse init container resources")?;

        init_containers.push(Container {
            name: format!("path-{number}-init"),
            image: containers(template)
                .get(index)
                .and_then(|container| container.image.clone()),
            command: Some(vec!["sh".to_string()]),
            args: Some(vec!["-c".to_string(), populate_script(&path.path)]),
            volume_mounts: Some(vec![VolumeMount {
                name: PERSISTENCE_VOLUME.to_string(),
                mount_path: PERSISTENCE_INIT_MOUNT_PATH.to_string(),
                sub_path: Some(sub_path),
                ..Default::default()
            }]),
            resources,
            ..Default::default()
        });
    }

    let spec = template.spec.get_or_insert_with(Default::default);
    if !init_containers.is_empty() {
        spec.init_containers
            .get_or_insert_with(Vec::new)
            .extend(init_containers);
    }
    spec.volumes.get_or_insert_with(Vec::new).push(Volume {
        name: PERSISTENCE_VOLUME.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim_name.to_string(),
            read_only: claim_read_only.then_some(true),
        }),
        ..Default::default()
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use devpod_config::shared::{DevContainerConfig, PersistenceOptions, PersistentPathConfig};
    use k8s_openapi::api::core::v1::PodSpec;

    use super::*;

    fn template() -> PodTemplateSpec {
        PodTemplateSpec {
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "web".to_string(),
                    image: Some("myapp:dev".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn dev_pod(paths: Vec<PersistentPathConfig>) -> DevPodConfig {
        DevPodConfig {
            name: "app".to_string(),
            containers: vec![DevContainerConfig {
                container: Some("web".to_string()),
                persist_paths: paths,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn path(path: &str) -> PersistentPathConfig {
        PersistentPathConfig {
            path: path.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_populate_script_is_guarded_by_sentinel() {
        let script = populate_script("/data/");

        assert!(script.starts_with(
            "if [ ! -d \"/devspace-persistence/.devspace/\" ] && [ -d \"/data\" ]"
        ));
        assert!(script.contains("cp -a \"/data/.\" /devspace-persistence/"));
        assert!(script.contains("mkdir /devspace-persistence/.devspace"));
    }

    #[test]
    fn test_path_is_mounted_with_init_container() {
        let mut template = template();

        let dev_pod = dev_pod(vec![path("/data")]);

        persist_paths(&mut template, "app-devspace", &dev_pod, &[Some(0)]).unwrap();

        let spec = template.spec.unwrap();
        let mount = &spec.containers[0].volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.name, PERSISTENCE_VOLUME);
        assert_eq!(mount.mount_path, "/data");
        assert_eq!(mount.sub_path.as_deref(), Some("path-0"));

        let init = &spec.init_containers.unwrap()[0];
        assert_eq!(init.name, "path-0-init");
        assert_eq!(init.image.as_deref(), Some("myapp:dev"));

        let volume = &spec.volumes.unwrap()[0];
        assert_eq!(
            volume.persistent_volume_claim.as_ref().unwrap().claim_name,
            "app-devspace"
        );
    }

    #[test]
    fn test_read_only_and_skipped_paths_are_not_populated() {
        let mut template = template();
        let mut skipped = path("/cache");
        skipped.skip_populate = true;
        skipped.volume_path = Some("cache".to_string());
        let mut dev_pod = dev_pod(vec![path("/data"), skipped]);
        dev_pod.persistence_options = Some(PersistenceOptions {
            read_only: true,
            ..Default::default()
        });

        persist_paths(&mut template, "shared", &dev_pod, &[Some(0)]).unwrap();

        let spec = template.spec.unwrap();
        assert!(spec.init_containers.is_none());
        let mounts = spec.containers[0].volume_mounts.as_ref().unwrap();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[1].sub_path.as_deref(), Some("cache"));
        assert!(mounts.iter().all(|mount| mount.read_only == Some(true)));
    }

    #[test]
    fn test_claim_name_override() {
        let mut dev_pod = dev_pod(vec![path("/data")]);
        assert_eq!(claim_name("app-devspace", &dev_pod), "app-devspace");

        dev_pod.persistence_options = Some(PersistenceOptions {
            name: Some("shared-data".to_string()),
            ..Default::default()
        });
        assert_eq!(claim_name("app-devspace", &dev_pod), "shared-data");
    }

    #[test]
    fn test_without_paths_nothing_changes() {
        let mut template = template();

        persist_paths(&mut template, "app-devspace", &dev_pod(Vec::new()), &[Some(0)]).unwrap();

        assert_eq!(template, self::template());
    }
}
