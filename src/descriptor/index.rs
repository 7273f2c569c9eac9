//! Known descriptor sets and their binding locations.
//!
//! Every pipeline layout is built from the same ordered list of set layouts,
//! so any pipeline can bind any known set at the same location. Sets written
//! every frame exist once per frame in flight; the frame-1 copy shares the
//! binding location of its base set.

use crate::config::MAX_FRAMES_IN_FLIGHT;

/// Logical descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorSetIndex {
    Global,
    Scene,
    Object,
    SceneFrame1,
    ObjectFrame1,
    Bindless,
    BindlessFrame1,
    Voxelizer,
    Raytracing,
    MaterialTextures,
}

impl DescriptorSetIndex {
    pub const ALL: [DescriptorSetIndex; 10] = [
        DescriptorSetIndex::Global,
        DescriptorSetIndex::Scene,
        DescriptorSetIndex::Object,
        DescriptorSetIndex::SceneFrame1,
        DescriptorSetIndex::ObjectFrame1,
        DescriptorSetIndex::Bindless,
        DescriptorSetIndex::BindlessFrame1,
        DescriptorSetIndex::Voxelizer,
        DescriptorSetIndex::Raytracing,
        DescriptorSetIndex::MaterialTextures,
    ];

    /// Base sets in pipeline-layout order. Position equals binding location.
    pub const KNOWN_LAYOUT_ORDER: [DescriptorSetIndex; 7] = [
        DescriptorSetIndex::Global,
        DescriptorSetIndex::Scene,
        DescriptorSetIndex::Object,
        DescriptorSetIndex::Bindless,
        DescriptorSetIndex::Voxelizer,
        DescriptorSetIndex::Raytracing,
        DescriptorSetIndex::MaterialTextures,
    ];

    /// Whether the set exists once per frame in flight.
    pub fn is_per_frame(self) -> bool {
        matches!(
            self.base_index(),
            DescriptorSetIndex::Scene | DescriptorSetIndex::Object | DescriptorSetIndex::Bindless
        )
    }

    /// The frame-0 set this index is a copy of (itself for base sets).
    pub fn base_index(self) -> DescriptorSetIndex {
        match self {
            DescriptorSetIndex::SceneFrame1 => DescriptorSetIndex::Scene,
            DescriptorSetIndex::ObjectFrame1 => DescriptorSetIndex::Object,
            DescriptorSetIndex::BindlessFrame1 => DescriptorSetIndex::Bindless,
            other => other,
        }
    }

    /// The physical set to bind or write for `frame_index`.
    pub fn per_frame_index(self, frame_index: usize) -> DescriptorSetIndex {
        let base = self.base_index();
        if frame_index % MAX_FRAMES_IN_FLIGHT == 0 {
            return base;
        }
        match base {
            DescriptorSetIndex::Scene => DescriptorSetIndex::SceneFrame1,
            DescriptorSetIndex::Object => DescriptorSetIndex::ObjectFrame1,
            DescriptorSetIndex::Bindless => DescriptorSetIndex::BindlessFrame1,
            other => other,
        }
    }

    /// Every physical copy of this set, frame 0 first.
    pub fn frame_copies(self) -> Vec<DescriptorSetIndex> {
        if self.is_per_frame() {
            (0..MAX_FRAMES_IN_FLIGHT)
                .map(|frame| self.per_frame_index(frame))
                .collect()
        } else {
            vec![self.base_index()]
        }
    }

    /// Set number in every pipeline layout.
    pub fn binding_location(self) -> u32 {
        let base = self.base_index();
        Self::KNOWN_LAYOUT_ORDER
            .iter()
            .position(|&known| known == base)
            .map_or(0, |position| position as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_frame_round_trip() {
        for index in DescriptorSetIndex::ALL {
            let base = index.base_index();
            for frame in 0..MAX_FRAMES_IN_FLIGHT {
                assert_eq!(base.per_frame_index(frame).base_index(), base);
            }
        }
    }

    #[test]
    fn test_frame_copies_share_location() {
        assert_eq!(
            DescriptorSetIndex::Scene.frame_copies(),
            vec![DescriptorSetIndex::Scene, DescriptorSetIndex::SceneFrame1]
        );
        assert_eq!(
            DescriptorSetIndex::SceneFrame1.binding_location(),
            DescriptorSetIndex::Scene.binding_location()
        );
        assert_eq!(DescriptorSetIndex::Global.frame_copies().len(), 1);
    }

    #[test]
    fn test_locations_follow_layout_order() {
        assert_eq!(DescriptorSetIndex::Global.binding_location(), 0);
        assert_eq!(DescriptorSetIndex::Bindless.binding_location(), 3);
        assert_eq!(DescriptorSetIndex::MaterialTextures.binding_location(), 6);
    }
}
