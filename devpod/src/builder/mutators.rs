//! Per container transforms applied in a fixed order: terminal, attach, env, command, working
//! directory and resources.

use std::collections::BTreeMap;

use devpod_config::shared::{DevContainerConfig, ResourceConfig};
use k8s_openapi::api::core::v1::{Container, EnvVar, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::bail;
use crate::error::{DevPodResult, ErrorKind};
use crate::quantity::parse_quantity;

/// Command keeping a terminal container alive without running its workload.
pub const IDLE_COMMAND: [&str; 2] = ["sleep", "1000000000"];

pub(crate) fn strip_health_checks(container: &mut Container) {
    container.liveness_probe = None;
    container.readiness_probe = None;
    container.startup_probe = None;
}

/// Replaces the entrypoint with an idle process so a terminal can be opened.
pub fn apply_terminal(dev_container: &DevContainerConfig, container: &mut Container) {
    if !dev_container.replaces_for_terminal() {
        return;
    }

    strip_health_checks(container);
    container.command = Some(IDLE_COMMAND.iter().map(|part| part.to_string()).collect());
    container.args = None;
}

pub fn apply_attach(dev_container: &DevContainerConfig, container: &mut Container) {
    let Some(attach) = dev_container.attach.as_ref() else {
        return;
    };
    if !dev_container.replaces_for_attach() {
        return;
    }

    strip_health_checks(container);
    container.stdin = Some(true);
    if !attach.disable_tty {
        container.tty = Some(true);
    }
}

/// Appends the configured variables. Duplicates are kept and the last one wins.
pub fn apply_env(dev_container: &DevContainerConfig, container: &mut Container) {
    if dev_container.env.is_empty() {
        return;
    }

    let env = container.env.get_or_insert_with(Vec::new);
    env.extend(dev_container.env.iter().map(|var| EnvVar {
        name: var.name.clone(),
        value: Some(var.value.clone()),
        ..Default::default()
    }));
}

/// Overwrites command and args.
///
/// When the restart helper is injected, `helper_path` is prepended to the configured command,
/// which then becomes mandatory.
pub fn apply_command(
    dev_container: &DevContainerConfig,
    container: &mut Container,
    helper_path: Option<&str>,
) -> DevPodResult<()> {
    if let Some(helper_path) = helper_path {
        if dev_container.command.is_empty() {
            bail!(
                ErrorKind::MissingCommand,
                "The restart helper requires a command to be configured",
                container.name.clone()
            );
        }

        let command = std::iter::once(helper_path.to_string())
            .chain(dev_container.command.iter().cloned())
            .collect();
        container.command = Some(command);
        container.args = non_empty(&dev_container.args);
        strip_health_checks(container);

        return Ok(());
    }

    if !dev_container.command.is_empty() {
        container.command = Some(dev_container.command.clone());
        container.args = non_empty(&dev_container.args);
        strip_health_checks(container);
    } else if !dev_container.args.is_empty() {
        container.args = Some(dev_container.args.clone());
        strip_health_checks(container);
    }

    Ok(())
}

pub fn apply_working_dir(dev_container: &DevContainerConfig, container: &mut Container) {
    if let Some(working_dir) = &dev_container.working_dir {
        container.working_dir = Some(working_dir.clone());
    }
}

pub fn apply_resources(
    dev_container: &DevContainerConfig,
    container: &mut Container,
) -> DevPodResult<()> {
    if let Some(resources) = &dev_container.resources {
        container.resources = Some(resource_requirements(resources)?);
    }

    Ok(())
}

/// Converts configured limits and requests into typed requirements, rejecting bad quantities.
pub(crate) fn resource_requirements(
    resources: &ResourceConfig,
) -> DevPodResult<ResourceRequirements> {
    Ok(ResourceRequirements {
        limits: quantities(&resources.limits)?,
        requests: quantities(&resources.requests)?,
        ..Default::default()
    })
}

fn quantities(
    values: &BTreeMap<String, String>,
) -> DevPodResult<Option<BTreeMap<String, Quantity>>> {
    if values.is_empty() {
        return Ok(None);
    }

    let parsed = values
        .iter()
        .map(|(name, value)| Ok((name.clone(), parse_quantity(value)?)))
        .collect::<DevPodResult<BTreeMap<_, _>>>()?;

    Ok(Some(parsed))
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}
