use std::error;
use std::fmt;

/// Convenient result type for dev pod operations using [`DevPodError`] as the error type.
pub type DevPodResult<T> = Result<T, DevPodError>;

/// Main error type for dev pod operations.
///
/// [`DevPodError`] can represent a single error, an error with additional detail, an error
/// wrapped with the name of the operation that failed, or multiple aggregated errors.
#[derive(Debug, Clone)]
pub struct DevPodError {
    repr: ErrorRepr,
}

/// Internal representation of error data.
#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Error with kind and static description
    WithDescription(ErrorKind, &'static str),
    /// Error with kind, static description, and dynamic detail
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    /// Error annotated with the operation that produced it
    WithContext(String, Box<DevPodError>),
    /// Multiple aggregated errors
    Many(Vec<DevPodError>),
}

/// Categories of errors that can occur while replacing or reverting dev pods.
///
/// Callers decide how to react based on the kind: not found leads to fresh creation, invalid
/// leads to recreation, already exists is retried a bounded number of times and configuration
/// errors are never retried.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Cluster API Errors
    NotFound,
    AlreadyExists,
    Invalid,
    Conflict,
    ApiError,

    // Target Errors
    TargetNotFound,
    UnsupportedWorkloadKind,

    // Configuration Errors
    ConfigError,
    ContainerNotFound,
    AmbiguousContainer,
    MissingCommand,
    InvalidQuantity,
    PatchFailed,

    // Serialization Errors
    SerializationError,
    DeserializationError,

    // State & Workflow Errors
    InvalidState,
    Timeout,
    Cancelled,
    ReplaceRetriesExhausted,
    CacheError,

    // Unknown / Uncategorized
    Unknown,
}

impl ErrorKind {
    /// Returns `true` for errors caused by the dev pod configuration.
    ///
    /// These errors surface before any cluster write and retrying them cannot succeed.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::ConfigError
                | ErrorKind::ContainerNotFound
                | ErrorKind::AmbiguousContainer
                | ErrorKind::MissingCommand
                | ErrorKind::InvalidQuantity
                | ErrorKind::PatchFailed
        )
    }
}

impl DevPodError {
    /// Creates a [`DevPodError`] containing multiple aggregated errors.
    pub fn many(errors: Vec<DevPodError>) -> DevPodError {
        DevPodError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Wraps this error with the name of the operation that failed.
    pub fn with_context(self, operation: impl Into<String>) -> DevPodError {
        DevPodError {
            repr: ErrorRepr::WithContext(operation.into(), Box::new(self)),
        }
    }

    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::WithContext(_, ref inner) => inner.kind(),
            ErrorRepr::Many(ref errors) => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => vec![kind],
            ErrorRepr::WithContext(_, ref inner) => inner.kinds(),
            ErrorRepr::Many(ref errors) => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::WithContext(_, ref inner) => inner.detail(),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.detail()),
            _ => None,
        }
    }

    /// Returns the outermost operation name attached with [`DevPodError::with_context`].
    pub fn operation(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithContext(ref operation, _) => Some(operation.as_str()),
            _ => None,
        }
    }
}

impl PartialEq for DevPodError {
    fn eq(&self, other: &DevPodError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::WithContext(op_a, inner_a), ErrorRepr::WithContext(op_b, inner_b)) => {
                op_a == op_b && inner_a == inner_b
            }
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for DevPodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)?;

                Ok(())
            }
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)?;
                f.write_str(" -> ")?;
                detail.fmt(f)?;

                Ok(())
            }
            ErrorRepr::WithContext(ref operation, ref inner) => {
                write!(f, "{operation}: {inner}")
            }
            ErrorRepr::Many(ref errors) => {
                if errors.is_empty() {
                    write!(f, "Multiple errors occurred (empty)")?;
                } else if errors.len() == 1 {
                    errors[0].fmt(f)?;
                } else {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl error::Error for DevPodError {}

/// Attaches the name of the failed operation to an error result.
pub trait ErrorContext<T> {
    fn context(self, operation: &str) -> DevPodResult<T>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: Into<DevPodError>,
{
    fn context(self, operation: &str) -> DevPodResult<T> {
        self.map_err(|err| err.into().with_context(operation))
    }
}

/// Creates a [`DevPodError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for DevPodError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> DevPodError {
        DevPodError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

/// Creates a [`DevPodError`] from an error kind, static description, and dynamic detail.
impl From<(ErrorKind, &'static str, String)> for DevPodError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> DevPodError {
        DevPodError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

/// Creates a [`DevPodError`] from a vector of errors for aggregation.
impl<E> From<Vec<E>> for DevPodError
where
    E: Into<DevPodError>,
{
    fn from(errors: Vec<E>) -> DevPodError {
        DevPodError {
            repr: ErrorRepr::Many(errors.into_iter().map(Into::into).collect()),
        }
    }
}

/// Converts [`serde_json::Error`] to [`DevPodError`] with appropriate error kind.
impl From<serde_json::Error> for DevPodError {
    fn from(err: serde_json::Error) -> DevPodError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => {
                (ErrorKind::SerializationError, "JSON serialization failed")
            }
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        DevPodError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

/// Converts [`std::num::ParseIntError`] to [`DevPodError`] with [`ErrorKind::InvalidState`].
impl From<std::num::ParseIntError> for DevPodError {
    fn from(err: std::num::ParseIntError) -> DevPodError {
        DevPodError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::InvalidState,
                "Integer parsing failed",
                err.to_string(),
            ),
        }
    }
}
