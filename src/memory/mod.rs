//! GPU memory: buffers, images, views and samplers with tracked resource
//! state.

mod buffer;
mod image;
mod view;

pub use buffer::{BufferType, GpuBuffer};
pub use image::{expand_to_four_channels, FormatFix, GpuImage};
pub use view::{ImageView, Sampler};
