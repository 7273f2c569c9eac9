//! Frames in flight, command buffers and GPU synchronization.

mod command_buffer;
mod handler;
mod resolution;
mod single_time;
mod slot;
mod sync;

pub use command_buffer::{CommandBuffer, CommandBufferState};
pub use handler::FrameHandler;
pub use resolution::ResolutionDependent;
pub use single_time::SingleTimeCommands;
pub use slot::{Frame, FrameState};
pub use sync::{Fence, Semaphore, SemaphoreChain};
