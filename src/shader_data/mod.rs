//! Ticketed shader-data arrays.
//!
//! Each kind of shader-visible object (materials, entities, lights, ...) owns
//! a slot in one large GPU array. Slots are handed out as tickets, edited on
//! the CPU, and uploaded as one dirty span per array per frame.

mod data;
mod dirty;
mod globals;
mod proxy;
mod structs;
mod ticket;

pub use data::{ShaderData, ShaderDataArray};
pub use dirty::DirtyRange;
pub use globals::{binding, ShaderGlobals};
pub use proxy::{EnqueueRenderUpdates, LightProxy, LightType, MaterialProxy};
pub use structs::*;
pub use ticket::{Ticket, TicketAllocator, NULL_TICKET};
