use std::collections::BTreeMap;

use crate::bail;
use crate::error::{DevPodResult, ErrorKind};

/// Resolves runtime variables, such as freshly built image tags, in configuration values.
pub trait RuntimeResolver: Send + Sync {
    fn resolve(&self, value: &str) -> DevPodResult<String>;
}

/// [`RuntimeResolver`] replacing `${name}` placeholders with known values.
///
/// Values without placeholders are returned unchanged. A placeholder naming an unknown
/// variable is a configuration error.
#[derive(Debug, Clone, Default)]
pub struct VariableResolver {
    variables: BTreeMap<String, String>,
}

impl VariableResolver {
    pub fn new(variables: BTreeMap<String, String>) -> Self {
        Self { variables }
    }
}

impl RuntimeResolver for VariableResolver {
    fn resolve(&self, value: &str) -> DevPodResult<String> {
        let mut resolved = String::with_capacity(value.len());
        let mut rest = value;

        while let Some(start) = rest.find("${") {
            resolved.push_str(&rest[..start]);

            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                bail!(
                    ErrorKind::ConfigError,
                    "Unterminated runtime variable",
                    value
                );
            };

            let name = after[..end].trim();
            match self.variables.get(name) {
                Some(variable) => resolved.push_str(variable),
                None => bail!(ErrorKind::ConfigError, "Unknown runtime variable", name),
            }

            rest = &after[end + 1..];
        }

        resolved.push_str(rest);

        Ok(resolved)
    }
}
