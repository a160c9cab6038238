use std::collections::BTreeMap;

use devpod_config::shared::DevContainerConfig;
use k8s_openapi::api::core::v1::{
    DownwardAPIVolumeFile, DownwardAPIVolumeSource, ObjectFieldSelector, PodTemplateSpec, Volume,
    VolumeMount,
};

use crate::annotations::RESTART_HELPER_ANNOTATION;
use crate::builder::container::containers_mut;

/// Volume exposing the restart helper script to containers.
pub const RESTART_HELPER_VOLUME: &str = "devspace-restart-helper";

/// Path the restart helper is mounted at unless configured otherwise.
pub const DEFAULT_RESTART_HELPER_PATH: &str = "/.devspace/devspace-restart-helper";

/// Runs the real entrypoint and restarts it whenever a restart is requested through a marker
/// file written by the sync after an upload.
pub const DEFAULT_RESTART_HELPER_SCRIPT: &str = r#"#!/bin/sh
# Runs the given command and restarts it on request.
set -e

restart=true
marker="/.devspace/devspace-restart"
pid=""

trap 'quit=true; [ -n "$pid" ] && kill -TERM "$pid" 2>/dev/null' TERM INT

mkdir -p /.devspace
rm -f "$marker"

while $restart; do
  "$@" &
  pid=$!
  wait "$pid" || true
  pid=""

  if [ "$quit" = "true" ]; then
    exit 0
  fi

  if [ -f "$marker" ]; then
    rm -f "$marker"
    echo "Restarting container..."
  else
    echo "Container exited, waiting for a restart request..."
    while [ ! -f "$marker" ] && [ "$quit" != "true" ]; do
      sleep 1
    done
    rm -f "$marker"
  fi
done
"#;

/// Returns the path the restart helper of `dev_container` is invoked from.
pub fn restart_helper_path(dev_container: &DevContainerConfig) -> &str {
    dev_container
        .restart_helper
        .as_ref()
        .and_then(|helper| helper.path.as_deref())
        .unwrap_or(DEFAULT_RESTART_HELPER_PATH)
}

fn restart_helper_script(dev_container: &DevContainerConfig) -> &str {
    dev_container
        .restart_helper
        .as_ref()
        .and_then(|helper| helper.script.as_deref())
        .unwrap_or(DEFAULT_RESTART_HELPER_SCRIPT)
}

/// Stores the helper script in a template annotation and exposes it through a downward API
/// volume mounted into the container at `index`.
pub(crate) fn inject_restart_helper(
    template: &mut PodTemplateSpec,
    index: usize,
    dev_container: &DevContainerConfig,
) {
    template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(
            RESTART_HELPER_ANNOTATION.to_string(),
            restart_helper_script(dev_container).to_string(),
        );

    let spec = template.spec.get_or_insert_with(Default::default);
    let volumes = spec.volumes.get_or_insert_with(Vec::new);
    if !volumes
        .iter()
        .any(|volume| volume.name == RESTART_HELPER_VOLUME)
    {
        volumes.push(Volume {
            name: RESTART_HELPER_VOLUME.to_string(),
            downward_api: Some(DownwardAPIVolumeSource {
                default_mode: Some(0o777),
                items: Some(vec![DownwardAPIVolumeFile {
                    path: RESTART_HELPER_VOLUME.to_string(),
                    field_ref: Some(ObjectFieldSelector {
                        field_path: format!("metadata.annotations['{RESTART_HELPER_ANNOTATION}']"),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        });
    }

    if let Some(container) = containers_mut(template).get_mut(index) {
        let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
        if mounts
            .iter()
            .any(|mount| mount.name == RESTART_HELPER_VOLUME)
        {
            return;
        }

        mounts.push(VolumeMount {
            name: RESTART_HELPER_VOLUME.to_string(),
            mount_path: restart_helper_path(dev_container).to_string(),
            sub_path: Some(RESTART_HELPER_VOLUME.to_string()),
            read_only: Some(true),
            ..Default::default()
        });
    }
}

#[cfg(test)]
mod tests {
    use devpod_config::shared::RestartHelperConfig;
    use k8s_openapi::api::core::v1::{Container, PodSpec};

    use super::*;

    fn template() -> PodTemplateSpec {
        PodTemplateSpec {
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "web".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_helper_is_exposed_through_downward_api() {
        let mut template = template();

        inject_restart_helper(&mut template, 0, &DevContainerConfig::default());

        let annotations = template.metadata.unwrap().annotations.unwrap();
        assert_eq!(
            annotations.get(RESTART_HELPER_ANNOTATION).map(String::as_str),
            Some(DEFAULT_RESTART_HELPER_SCRIPT)
        );

        let spec = template.spec.unwrap();
        let volume = &spec.volumes.unwrap()[0];
        let item = &volume.downward_api.as_ref().unwrap().items.as_ref().unwrap()[0];
        assert_eq!(
            item.field_ref.as_ref().unwrap().field_path,
            "metadata.annotations['devspace.sh/restart-helper']"
        );

        let mount = &spec.containers[0].volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.mount_path, DEFAULT_RESTART_HELPER_PATH);
        assert_eq!(mount.read_only, Some(true));
    }

    #[test]
    fn test_custom_path_and_script() {
        let dev_container = DevContainerConfig {
            restart_helper: Some(RestartHelperConfig {
                path: Some("/helper.sh".to_string()),
                script: Some("#!/bin/sh\nexec \"$@\"\n".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut template = template();

        inject_restart_helper(&mut template, 0, &dev_container);
        inject_restart_helper(&mut template, 0, &dev_container);

        assert_eq!(restart_helper_path(&dev_container), "/helper.sh");
        let spec = template.spec.unwrap();
        assert_eq!(spec.volumes.unwrap().len(), 1);
        let mounts = spec.containers[0].volume_mounts.as_ref().unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].mount_path, "/helper.sh");
    }
}
