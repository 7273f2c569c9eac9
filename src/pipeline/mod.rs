//! Pipeline layouts over the known descriptor set locations, and compute
//! pipelines built on them.

mod compute;
mod layout;

pub use compute::ComputePipeline;
pub use layout::PipelineLayout;
