//! Configuration management for the dev pod replacer.
//!
//! Provides environment detection, configuration loading from YAML files and
//! environment variables, and the shared configuration types describing dev
//! pods and the reconciler.

mod environment;
mod load;
pub mod shared;

pub use environment::*;
pub use load::*;
