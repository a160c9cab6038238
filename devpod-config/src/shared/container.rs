use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Development overrides for a single container of the replaced workload.
///
/// Every field is optional. Fields left unset keep whatever the original
/// container declares.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DevContainerConfig {
    /// Name of the container to modify.
    ///
    /// Falls back to the dev pod's `container`, and then to the sole container of the pod.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// Image that replaces the container image in the shadow deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_image: Option<String>,
    /// Entrypoint override.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Arguments override. Used alone or together with `command`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Working directory override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Environment variables appended to the container environment.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVarConfig>,
    /// Resource limits and requests overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceConfig>,
    /// Interactive terminal settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<TerminalConfig>,
    /// Attach settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attach: Option<AttachConfig>,
    /// File sync rules. Only the restart-on-upload flag matters to the reconciler.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sync: Vec<SyncConfig>,
    /// Paths persisted in a volume claim across shadow restarts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub persist_paths: Vec<PersistentPathConfig>,
    /// Restart helper settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_helper: Option<RestartHelperConfig>,
}

impl DevContainerConfig {
    /// Returns `true` when the restart helper has to be injected into this container.
    ///
    /// The helper is needed as soon as one sync rule restarts the container after an upload,
    /// unless injection was explicitly turned off.
    pub fn needs_restart_helper(&self) -> bool {
        let inject = self
            .restart_helper
            .as_ref()
            .map(|helper| helper.inject)
            .unwrap_or(true);

        inject
            && self.sync.iter().any(|sync| {
                sync.on_upload
                    .as_ref()
                    .is_some_and(|on_upload| on_upload.restart_container)
            })
    }

    /// Returns `true` when the terminal settings replace the container entrypoint.
    pub fn replaces_for_terminal(&self) -> bool {
        self.terminal
            .as_ref()
            .is_some_and(|terminal| terminal.enabled && !terminal.disable_replace)
    }

    /// Returns `true` when the attach settings change the container.
    pub fn replaces_for_attach(&self) -> bool {
        self.attach
            .as_ref()
            .is_some_and(|attach| attach.enabled && !attach.disable_replace)
    }
}

/// A single environment variable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVarConfig {
    pub name: String,
    pub value: String,
}

/// Resource quantities keyed by resource name, e.g. `cpu` or `memory`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

/// Terminal settings for a dev container.
///
/// When enabled the container is kept idle so a terminal can be opened into it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TerminalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Keeps the original entrypoint and probes.
    #[serde(default)]
    pub disable_replace: bool,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            disable_replace: false,
        }
    }
}

/// Attach settings for a dev container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AttachConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Keeps the original probes and stdin settings.
    #[serde(default)]
    pub disable_replace: bool,
    /// Leaves `tty` untouched.
    #[serde(default)]
    pub disable_tty: bool,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            disable_replace: false,
            disable_tty: false,
        }
    }
}

/// A file sync rule, in `local:remote` form.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SyncConfig {
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_upload: Option<SyncOnUploadConfig>,
}

/// Actions executed after files were uploaded into the container.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SyncOnUploadConfig {
    /// Restarts the container process through the restart helper.
    #[serde(default)]
    pub restart_container: bool,
}

/// A container path that is persisted in the dev pod volume claim.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PersistentPathConfig {
    /// Absolute path inside the container.
    pub path: String,
    /// Sub path inside the volume. Defaults to `path-<index>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_path: Option<String>,
    /// Mounts the path read only. Read-only paths are never populated.
    #[serde(default)]
    pub read_only: bool,
    /// Skips copying the image content of `path` into the volume on first start.
    #[serde(default)]
    pub skip_populate: bool,
    /// Settings for the init container that populates the volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_container: Option<PersistentPathInitContainerConfig>,
}

/// Settings for the populate init container of a persisted path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentPathInitContainerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceConfig>,
}

/// Restart helper settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RestartHelperConfig {
    /// Injects the helper when a sync rule asks for restarts. Defaults to `true`.
    #[serde(default = "default_true")]
    pub inject: bool,
    /// Path of the helper inside the container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Replaces the built-in helper script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

impl Default for RestartHelperConfig {
    fn default() -> Self {
        Self {
            inject: true,
            path: None,
            script: None,
        }
    }
}
