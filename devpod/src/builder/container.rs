use k8s_openapi::api::core::v1::{Container, PodTemplateSpec};

use crate::bail;
use crate::error::{DevPodResult, ErrorKind};
use crate::image::ImageMatcher;

pub(crate) fn containers(template: &PodTemplateSpec) -> &[Container] {
    template
        .spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default()
}

pub(crate) fn containers_mut(template: &mut PodTemplateSpec) -> &mut Vec<Container> {
    &mut template.spec.get_or_insert_with(Default::default).containers
}

/// Returns the names of the containers whose image is addressed by `image_selector`.
pub(crate) fn matched_containers(
    template: &PodTemplateSpec,
    image_selector: Option<&str>,
    matcher: &dyn ImageMatcher,
) -> Vec<String> {
    let Some(image_selector) = image_selector else {
        return Vec::new();
    };

    containers(template)
        .iter()
        .filter(|container| {
            container
                .image
                .as_deref()
                .is_some_and(|image| matcher.matches(image_selector, image))
        })
        .map(|container| container.name.clone())
        .collect()
}

/// Resolves the index of the container a dev container addresses.
///
/// An explicit name must exist. Without a name the sole container is used, then the first
/// container matched by the image selector. Anything else is ambiguous.
pub(crate) fn resolve_container(
    template: &PodTemplateSpec,
    name: Option<&str>,
    matched: &[String],
) -> DevPodResult<usize> {
    let containers = containers(template);

    if let Some(name) = name {
        return match containers.iter().position(|container| container.name == name) {
            Some(index) => Ok(index),
            None => bail!(
                ErrorKind::ContainerNotFound,
                "Container not found in pod template",
                name
            ),
        };
    }

    match containers {
        [] => bail!(ErrorKind::ContainerNotFound, "Pod template has no containers"),
        [_] => Ok(0),
        _ => {
            let matched = matched.first().and_then(|matched| {
                containers
                    .iter()
                    .position(|container| &container.name == matched)
            });

            match matched {
                Some(index) => Ok(index),
                None => {
                    let names = containers
                        .iter()
                        .map(|container| container.name.as_str())
                        .collect::<Vec<_>>()
                        .join(" ");
                    bail!(
                        ErrorKind::AmbiguousContainer,
                        "Multiple containers found but no container name was configured",
                        names
                    )
                }
            }
        }
    }
}
