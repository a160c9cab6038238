//! Macros for dev pod error handling.

/// Creates a [`crate::error::DevPodError`] from error kind and description, with an optional
/// dynamic detail.
#[macro_export]
macro_rules! devpod_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::DevPodError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::DevPodError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Creates and returns a [`crate::error::DevPodError`] from the current function.
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::devpod_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::devpod_error!($kind, $desc, $detail))
    };
}
