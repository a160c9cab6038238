mod base;
mod container;
mod dev_pod;
mod persistence;
mod reconciler;
mod replacer;

pub use base::*;
pub use container::*;
pub use dev_pod::*;
pub use persistence::*;
pub use reconciler::*;
pub use replacer::*;
