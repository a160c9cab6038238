//! Patching of pod templates and computation of merge patches sent to the cluster.

mod engine;
mod merge;

pub use engine::{JsonPatchEngine, PatchEngine};
pub use merge::{apply_merge_patch, create_merge_patch};
