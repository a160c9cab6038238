use devpod_config::shared::{PatchConfig, PatchOperation};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use serde_json::Value;

use crate::bail;
use crate::error::{DevPodResult, ErrorKind};

/// Applies user supplied patches to a pod template.
pub trait PatchEngine: Send + Sync {
    /// Returns a copy of `template` with all `patches` applied in order.
    fn apply(
        &self,
        template: &PodTemplateSpec,
        patches: &[PatchConfig],
    ) -> DevPodResult<PodTemplateSpec>;
}

/// [`PatchEngine`] applying add, replace and remove operations to the JSON form of the typed
/// template.
///
/// The patched document is deserialized back into a [`PodTemplateSpec`], so a patch writing a
/// value of the wrong shape fails instead of producing an unusable template.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPatchEngine;

impl PatchEngine for JsonPatchEngine {
    fn apply(
        &self,
        template: &PodTemplateSpec,
        patches: &[PatchConfig],
    ) -> DevPodResult<PodTemplateSpec> {
        if patches.is_empty() {
            return Ok(template.clone());
        }

        let mut document = serde_json::to_value(template)?;
        for patch in patches {
            apply_patch(&mut document, patch)?;
        }

        match serde_json::from_value(document) {
            Ok(template) => Ok(template),
            Err(err) => bail!(
                ErrorKind::PatchFailed,
                "Patched pod template is not valid",
                err
            ),
        }
    }
}

/// One step of a patch path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Object key, array index or `-` for appending to an array.
    Key(String),
    /// First array element whose field equals the given value.
    Match(String, String),
}

fn parse_path(path: &str) -> DevPodResult<Vec<Segment>> {
    if let Some(pointer) = path.strip_prefix('/') {
        return Ok(pointer
            .split('/')
            .map(|segment| Segment::Key(segment.replace("~1", "/").replace("~0", "~")))
            .collect());
    }

    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !current.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                }
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                }

                let mut selector = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    selector.push(c);
                }

                if !closed || selector.is_empty() {
                    bail!(ErrorKind::PatchFailed, "Malformed patch path", path);
                }

                match selector.split_once('=') {
                    Some((field, value)) => {
                        segments.push(Segment::Match(field.to_string(), value.to_string()))
                    }
                    None => segments.push(Segment::Key(selector)),
                }
            }
            c => current.push(c),
        }
    }

    if !current.is_empty() {
        segments.push(Segment::Key(current));
    }

    Ok(segments)
}

fn array_index(items: &[Value], segment: &Segment) -> Option<usize> {
    match segment {
        Segment::Key(key) => key.parse::<usize>().ok().filter(|index| *index < items.len()),
        Segment::Match(field, value) => items.iter().position(|item| {
            item.get(field)
                .and_then(Value::as_str)
                .is_some_and(|item_value| item_value == value)
        }),
    }
}

fn child_mut<'a>(value: &'a mut Value, segment: &Segment) -> Option<&'a mut Value> {
    match value {
        Value::Object(fields) => match segment {
            Segment::Key(key) => fields.get_mut(key),
            Segment::Match(_, _) => None,
        },
        Value::Array(items) => {
            let index = array_index(items, segment)?;
            items.get_mut(index)
        }
        _ => None,
    }
}

fn apply_patch(document: &mut Value, patch: &PatchConfig) -> DevPodResult<()> {
    let segments = parse_path(&patch.path)?;

    let Some((last, parents)) = segments.split_last() else {
        // An empty path addresses the whole template.
        return match (patch.op, &patch.value) {
            (PatchOperation::Remove, _) => {
                bail!(ErrorKind::PatchFailed, "Cannot remove the pod template")
            }
            (_, Some(value)) => {
                *document = value.clone();
                Ok(())
            }
            (_, None) => bail!(ErrorKind::PatchFailed, "Patch has no value", &patch.path),
        };
    };

    let mut parent = document;
    for segment in parents {
        parent = match child_mut(parent, segment) {
            Some(child) => child,
            None => bail!(ErrorKind::PatchFailed, "Patch path not found", &patch.path),
        };
    }

    match patch.op {
        PatchOperation::Add => {
            let Some(value) = patch.value.clone() else {
                bail!(ErrorKind::PatchFailed, "Patch has no value", &patch.path);
            };

            match (parent, last) {
                (Value::Object(fields), Segment::Key(key)) => {
                    fields.insert(key.clone(), value);
                }
                (Value::Array(items), Segment::Key(key)) if key == "-" => items.push(value),
                (Value::Array(items), Segment::Key(key)) => match key.parse::<usize>() {
                    Ok(index) if index <= items.len() => items.insert(index, value),
                    _ => bail!(ErrorKind::PatchFailed, "Patch index out of range", &patch.path),
                },
                _ => bail!(
                    ErrorKind::PatchFailed,
                    "Patch path cannot be added to",
                    &patch.path
                ),
            }
        }
        PatchOperation::Replace => {
            let Some(value) = patch.value.clone() else {
                bail!(ErrorKind::PatchFailed, "Patch has no value", &patch.path);
            };

            match child_mut(parent, last) {
                Some(target) => *target = value,
                None => bail!(ErrorKind::PatchFailed, "Patch path not found", &patch.path),
            }
        }
        PatchOperation::Remove => {
            let removed = match parent {
                Value::Object(fields) => match last {
                    Segment::Key(key) => fields.remove(key).is_some(),
                    Segment::Match(_, _) => false,
                },
                Value::Array(items) => match array_index(items, last) {
                    Some(index) => {
                        items.remove(index);
                        true
                    }
                    None => false,
                },
                _ => false,
            };

            if !removed {
                bail!(ErrorKind::PatchFailed, "Patch path not found", &patch.path);
            }
        }
    }

    Ok(())
}
