//! Why a render layer is (or would be) composited.
//!
//! Direct reasons come from style, indirect reasons from the requirements pass
//! and squashing-disallowed reasons from the layer assigner. A layer whose only
//! reasons are in [`CompositingReasons::COMBO_SQUASHABLE`] may share a backing
//! with earlier layers; any other bit requires a backing of its own.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Bitmask of compositing reasons for a single render layer.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
    pub struct CompositingReasons: u64 {
        // Intrinsic reasons that can be known right away by the layer.
        const TRANSFORM_3D = 1 << 0;
        const VIDEO = 1 << 1;
        const CANVAS = 1 << 2;
        const BACKFACE_VISIBILITY_HIDDEN = 1 << 3;
        const ACTIVE_ANIMATION = 1 << 4;
        const POSITION_FIXED = 1 << 5;
        const WILL_CHANGE_COMPOSITING_HINT = 1 << 6;
        const COMPOSITED_SCROLLING = 1 << 7;

        // Overlap reasons that require knowing what is behind you in paint order.
        const OVERFLOW_SCROLLING_PARENT = 1 << 8;
        const OVERLAP = 1 << 9;

        // Subtree reasons that require knowing what the status of your subtree is.
        const CLIPS_COMPOSITING_DESCENDANTS = 1 << 10;
        const OPACITY_WITH_COMPOSITED_DESCENDANTS = 1 << 11;
        const TRANSFORM_WITH_COMPOSITED_DESCENDANTS = 1 << 12;
        const FILTER_WITH_COMPOSITED_DESCENDANTS = 1 << 13;
        const MASK_WITH_COMPOSITED_DESCENDANTS = 1 << 14;
        const CLIP_PATH_WITH_COMPOSITED_DESCENDANTS = 1 << 15;
        const PRESERVE_3D_WITH_COMPOSITED_DESCENDANTS = 1 << 16;

        // Reasons why a layer that wanted to be squashed got its own backing.
        const SQUASHING_WOULD_BREAK_PAINT_ORDER = 1 << 17;
        const SQUASHING_SPARSITY_EXCEEDED = 1 << 18;
        const SQUASHING_CLIPPING_CONTAINER_MISMATCH = 1 << 19;
        const SQUASHED_LAYER_CLIPS_COMPOSITING_DESCENDANTS = 1 << 20;
        const SQUASHING_OWNER_DESCENDANTS_DEPTH_CLIPPED = 1 << 21;
        const SCROLLS_WITH_RESPECT_TO_SQUASHING_LAYER = 1 << 22;
        const SQUASHING_OPACITY_ANCESTOR_MISMATCH = 1 << 23;
        const SQUASHING_TRANSFORM_ANCESTOR_MISMATCH = 1 << 24;
        const SQUASHING_FILTER_ANCESTOR_MISMATCH = 1 << 25;

        // The root layer is composited whenever anything below it is.
        const ROOT = 1 << 26;

        // A composited negative z-order child must paint below this layer's contents.
        const NEGATIVE_Z_INDEX_CHILDREN = 1 << 27;

        const COMBO_ALL_DIRECT_REASONS = Self::TRANSFORM_3D.bits()
            | Self::VIDEO.bits()
            | Self::CANVAS.bits()
            | Self::BACKFACE_VISIBILITY_HIDDEN.bits()
            | Self::ACTIVE_ANIMATION.bits()
            | Self::POSITION_FIXED.bits()
            | Self::WILL_CHANGE_COMPOSITING_HINT.bits()
            | Self::COMPOSITED_SCROLLING.bits();

        const COMBO_COMPOSITED_DESCENDANTS = Self::OPACITY_WITH_COMPOSITED_DESCENDANTS.bits()
            | Self::TRANSFORM_WITH_COMPOSITED_DESCENDANTS.bits()
            | Self::FILTER_WITH_COMPOSITED_DESCENDANTS.bits()
            | Self::MASK_WITH_COMPOSITED_DESCENDANTS.bits()
            | Self::CLIP_PATH_WITH_COMPOSITED_DESCENDANTS.bits()
            | Self::PRESERVE_3D_WITH_COMPOSITED_DESCENDANTS.bits();

        const COMBO_SQUASHABLE = Self::OVERLAP.bits() | Self::OVERFLOW_SCROLLING_PARENT.bits();

        const COMBO_SQUASHING_DISALLOWED = Self::SQUASHING_WOULD_BREAK_PAINT_ORDER.bits()
            | Self::SQUASHING_SPARSITY_EXCEEDED.bits()
            | Self::SQUASHING_CLIPPING_CONTAINER_MISMATCH.bits()
            | Self::SQUASHED_LAYER_CLIPS_COMPOSITING_DESCENDANTS.bits()
            | Self::SQUASHING_OWNER_DESCENDANTS_DEPTH_CLIPPED.bits()
            | Self::SCROLLS_WITH_RESPECT_TO_SQUASHING_LAYER.bits()
            | Self::SQUASHING_OPACITY_ANCESTOR_MISMATCH.bits()
            | Self::SQUASHING_TRANSFORM_ANCESTOR_MISMATCH.bits()
            | Self::SQUASHING_FILTER_ANCESTOR_MISMATCH.bits();

        const COMBO_REASONS_THAT_REQUIRE_OWN_BACKING = Self::COMBO_ALL_DIRECT_REASONS.bits()
            | Self::COMBO_SQUASHABLE.bits()
            | Self::NEGATIVE_Z_INDEX_CHILDREN.bits()
            | Self::COMBO_SQUASHING_DISALLOWED.bits();
    }
}

impl CompositingReasons {
    /// Whether these reasons demand a backing of the layer's own.
    #[inline]
    pub fn requires_compositing(self) -> bool {
        !(self - Self::COMBO_SQUASHABLE).is_empty()
    }

    /// Whether these reasons only ask for the layer to be squashed.
    #[inline]
    pub fn requires_squashing(self) -> bool {
        !self.requires_compositing() && self.intersects(Self::COMBO_SQUASHABLE)
    }

    /// Whether the layer wants any kind of backing.
    #[inline]
    pub fn requires_compositing_or_squashing(self) -> bool {
        !self.is_empty()
    }
}

impl fmt::Display for CompositingReasons {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(formatter, "None");
        }
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                write!(formatter, " | ")?;
            }
            write!(formatter, "{name}")?;
            first = false;
        }
        Ok(())
    }
}
