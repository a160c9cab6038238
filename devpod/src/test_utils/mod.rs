//! Shared helpers for testing the dev pod flows against an in-memory cluster.
pub mod cluster;
pub mod fixtures;
