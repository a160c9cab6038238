//! Persisted records of which workload each dev pod replaced.
//!
//! A flow reads its entry once before it starts and writes it once after it completes. The
//! [`memory`] store keeps entries in process, the [`config_map`] store persists them in the
//! cluster so a later run can revert what an earlier one replaced.

mod base;
pub mod config_map;
pub mod memory;

pub use base::*;
