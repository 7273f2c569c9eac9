//! Descriptor sets and pools.
//!
//! A [`DescriptorPool`] owns every known [`DescriptorSet`]. Sets are declared
//! up front with their [`Descriptor`]s, created once, and afterwards only
//! rewritten element by element as sub-descriptors change.

mod binding;
mod index;
mod pool;
mod set;

pub use binding::{Descriptor, SubDescriptor};
pub use index::DescriptorSetIndex;
pub use pool::{DescriptorAllocator, DescriptorPool};
pub use set::DescriptorSet;
