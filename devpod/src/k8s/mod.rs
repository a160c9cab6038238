//! Kubernetes integration for the dev pod flows.
//!
//! The flows depend on the [`K8sClient`] trait only. The default client,
//! [`http::HttpK8sClient`], is backed by the [`kube`] crate and talks to the cluster using the
//! ambient configuration (in-cluster or local `~/.kube/config`). Tests use the in-memory
//! cluster from `test_utils` instead.

mod base;
pub mod http;

pub use base::*;
