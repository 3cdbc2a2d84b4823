//! Accumulator threaded through the layer assigner's paint-order walk.

use crate::geometry::IntRect;
use crate::render_layer::LayerId;
use crate::settings::SQUASHING_SPARSITY_TOLERANCE;

/// A squashing group that stopped accepting layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishedSquashingGroup {
    /// Owner of the mapping holding the squashing layer.
    pub owner: LayerId,
    /// Number of entries that were (re)assigned during this walk.
    pub next_squashed_layer_index: usize,
}

/// State of the squashing group currently accepting layers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SquashingState {
    /// Owner of the most recent self-composited mapping in paint order.
    pub most_recent_mapping: Option<LayerId>,
    /// Set once the owner's whole subtree has been walked; squashing into
    /// the owner before that point would paint ahead of its descendants.
    pub have_assigned_backings_to_entire_squashing_layer_subtree: bool,
    pub next_squashed_layer_index: usize,
    pub bounding_rect: IntRect,
    pub total_area_of_squashed_rects: u64,
}

impl SquashingState {
    /// Start a new group owned by `new_owner`, closing the current one.
    #[must_use]
    pub fn update_for_new_mapping(
        self,
        new_owner: LayerId,
    ) -> (Self, Option<FinishedSquashingGroup>) {
        let finished = self.finish();
        let next = Self {
            most_recent_mapping: Some(new_owner),
            ..Self::default()
        };
        (next, finished)
    }

    /// The group being closed, if any.
    pub fn finish(&self) -> Option<FinishedSquashingGroup> {
        self.most_recent_mapping.map(|owner| FinishedSquashingGroup {
            owner,
            next_squashed_layer_index: self.next_squashed_layer_index,
        })
    }

    /// Record a layer squashed into the current group.
    #[must_use]
    pub fn with_squashed_layer(mut self, bounds: IntRect) -> Self {
        self.next_squashed_layer_index += 1;
        self.total_area_of_squashed_rects += bounds.area();
        self.bounding_rect = self.bounding_rect.unite(bounds);
        self
    }

    /// Whether adding `bounds` would make the group too sparse.
    pub fn would_exceed_sparsity_tolerance(&self, bounds: IntRect) -> bool {
        let new_bounding_area = self.bounding_rect.unite(bounds).area();
        let new_squashed_area = self.total_area_of_squashed_rects + bounds.area();
        new_bounding_area as f64 > SQUASHING_SPARSITY_TOLERANCE * new_squashed_area as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two far-apart boxes make a group mostly empty space.
    #[test]
    fn distant_boxes_exceed_tolerance() {
        let state = SquashingState::default().with_squashed_layer(IntRect::new(0, 0, 10, 10));
        assert!(!state.would_exceed_sparsity_tolerance(IntRect::new(20, 0, 10, 10)));
        assert!(state.would_exceed_sparsity_tolerance(IntRect::new(500, 500, 10, 10)));
    }

    /// Starting a new group resets the accumulators and reports the old one.
    #[test]
    fn new_mapping_resets_group() {
        let mut arena = indextree::Arena::new();
        let first = LayerId(arena.new_node(()));
        let second = LayerId(arena.new_node(()));
        let state = SquashingState {
            most_recent_mapping: Some(first),
            have_assigned_backings_to_entire_squashing_layer_subtree: true,
            ..SquashingState::default()
        }
        .with_squashed_layer(IntRect::new(0, 0, 4, 4));
        let (next, finished) = state.update_for_new_mapping(second);
        assert_eq!(
            finished,
            Some(FinishedSquashingGroup {
                owner: first,
                next_squashed_layer_index: 1,
            })
        );
        assert_eq!(next.most_recent_mapping, Some(second));
        assert_eq!(next.total_area_of_squashed_rects, 0);
        assert!(!next.have_assigned_backings_to_entire_squashing_layer_subtree);
    }
}
