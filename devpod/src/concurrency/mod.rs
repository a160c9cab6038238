pub mod cancel;
pub mod signal;
