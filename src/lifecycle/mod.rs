//! Object lifecycle: deferred release, cross-thread handoff and ordered
//! initialization.

mod deferred;
mod pending;
mod registry;

pub use deferred::{DeferredRelease, ReleasedObject};
pub use pending::{PendingOp, PendingQueue};
pub use registry::{GpuObject, InitRegistry, ObjectId};
