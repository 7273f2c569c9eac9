//! Images sized by the swapchain.

mod depth_pyramid;

pub use depth_pyramid::{DepthPyramid, DEPTH_PYRAMID_BINDING, MAX_DEPTH_PYRAMID_MIPS};
