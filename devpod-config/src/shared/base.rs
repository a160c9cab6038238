use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A dev pod was declared without a name.
    #[error("every dev pod must have a non-empty `name`")]
    EmptyDevPodName,
    /// Two dev pods share the same name.
    #[error("dev pod `{0}` is declared more than once")]
    DuplicateDevPodName(String),
    /// A dev pod has neither a label selector nor an image selector.
    #[error("dev pod `{0}` needs either `label_selector` or `image_selector`")]
    MissingSelector(String),
    /// A persisted path was declared with an empty path.
    #[error("dev pod `{0}` declares a persisted path with an empty `path`")]
    EmptyPersistentPath(String),
    /// Maximum replace attempts cannot be zero.
    #[error("`max_replace_attempts` cannot be zero")]
    MaxReplaceAttemptsZero,
    /// Poll interval cannot be zero.
    #[error("`poll_interval_ms` cannot be zero")]
    PollIntervalZero,
}
