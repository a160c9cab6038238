//! Replaces Kubernetes workloads with development copies and reverts them.
//!
//! A dev pod names a target workload through a label or image selector. [`replace::Replacer`]
//! scales the target down and runs a shadow deployment built from its pod template with the
//! dev pod's overrides applied. [`revert::Reverter`] deletes the shadow and restores the
//! target's replicas. [`manager::DevPodManager`] drives both and records what was replaced in
//! a [`cache::DevPodCache`].

pub mod annotations;
pub mod builder;
pub mod cache;
pub mod concurrency;
pub mod error;
pub mod hash;
pub mod image;
pub mod k8s;
pub mod locator;
mod macros;
pub mod manager;
pub mod patch;
pub mod pvc;
pub mod quantity;
pub mod replace;
pub mod resolve;
pub mod revert;
pub mod scale;
pub mod shadow;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod wait;
pub mod workload;
