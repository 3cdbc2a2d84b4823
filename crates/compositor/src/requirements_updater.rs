//! Compositing reasons for every render layer.
//!
//! A paint-order walk combines the direct reasons a layer's style implies
//! with the overlap reason (something composited paints below it and
//! intersects it) and the reasons that follow from composited descendants.
//! The overlap map keeps one rect list per compositing context; a layer is
//! only tested against the context it paints into.

use crate::geometry::IntRect;
use crate::reasons::CompositingReasons;
use crate::render_layer::{AcceleratedContent, LayerId, Position, RenderLayerTree};
use crate::settings::CompositorSettings;

/// Rects of composited content, grouped by compositing context.
#[derive(Debug)]
struct OverlapMap {
    stack: Vec<Vec<IntRect>>,
}

impl OverlapMap {
    fn new() -> Self {
        Self {
            stack: vec![Vec::new()],
        }
    }

    fn begin_new_overlap_testing_context(&mut self) {
        self.stack.push(Vec::new());
    }

    /// Fold the innermost context into its parent.
    fn finish_current_overlap_testing_context(&mut self) {
        if self.stack.len() < 2 {
            return;
        }
        let finished = self.stack.pop().unwrap_or_default();
        if let Some(parent) = self.stack.last_mut() {
            parent.extend(finished);
        }
    }

    fn add(&mut self, rect: IntRect) {
        if let Some(current) = self.stack.last_mut() {
            current.push(rect);
        }
    }

    fn overlaps(&self, rect: IntRect) -> bool {
        self.stack
            .last()
            .is_some_and(|current| current.iter().any(|other| other.intersects(rect)))
    }
}

#[derive(Debug, Clone, Copy)]
struct RecursionData {
    compositing_ancestor: Option<LayerId>,
    subtree_is_compositing: bool,
    testing_overlap: bool,
}

impl RecursionData {
    const fn new(compositing_ancestor: Option<LayerId>) -> Self {
        Self {
            compositing_ancestor,
            subtree_is_compositing: false,
            testing_overlap: true,
        }
    }
}

pub struct CompositingRequirementsUpdater<'tree> {
    layers: &'tree mut RenderLayerTree,
    settings: &'tree CompositorSettings,
}

impl<'tree> CompositingRequirementsUpdater<'tree> {
    pub fn new(layers: &'tree mut RenderLayerTree, settings: &'tree CompositorSettings) -> Self {
        Self { layers, settings }
    }

    /// Recompute the reasons of every layer.
    ///
    /// Returns whether the root has to be composited, i.e. whether the
    /// compositor should be in compositing mode.
    pub fn update(&mut self) -> bool {
        let _span = tracing::info_span!("compositing.requirements").entered();
        let root = self.layers.root();
        let mut overlap_map = OverlapMap::new();
        let mut recursion_data = RecursionData::new(Some(root));
        self.update_recursive(root, &mut overlap_map, &mut recursion_data);
        let root_reasons = self.layers.layer(root).compositing_reasons();
        root_reasons.contains(CompositingReasons::ROOT)
    }

    /// Returns whether the subtree contains a 3D transform.
    fn update_recursive(
        &mut self,
        id: LayerId,
        overlap_map: &mut OverlapMap,
        current: &mut RecursionData,
    ) -> bool {
        let is_root = self.layers.is_root(id);
        let can_be_composited = is_root || self.layers.layer(id).is_self_painting();
        let absolute_bounds = self
            .layers
            .layer(id)
            .ancestor_dependent_inputs()
            .clipped_absolute_bounding_box;

        let mut reasons = if can_be_composited {
            self.direct_reasons(id)
        } else {
            CompositingReasons::empty()
        };

        if can_be_composited
            && current.testing_overlap
            && !reasons.requires_compositing_or_squashing()
            && overlap_map.overlaps(absolute_bounds)
        {
            reasons |= CompositingReasons::OVERLAP;
        }

        let mut will_be_composited = can_be_composited && reasons.requires_compositing_or_squashing();
        let mut child_data = RecursionData {
            subtree_is_compositing: false,
            ..*current
        };
        if will_be_composited {
            current.subtree_is_compositing = true;
            child_data.compositing_ancestor = Some(id);
            overlap_map.begin_new_overlap_testing_context();
            child_data.testing_overlap = true;
        }

        let lists = self.layers.z_order_lists(id);
        let mut any_descendant_has_3d_transform = false;
        let mut will_have_foreground_layer = false;
        for child in &lists.negative {
            any_descendant_has_3d_transform |= self.update_recursive(*child, overlap_map, &mut child_data);
            // A composited negative child must paint below this layer's contents,
            // which therefore need a backing of their own.
            if child_data.subtree_is_compositing && can_be_composited {
                reasons |= CompositingReasons::NEGATIVE_Z_INDEX_CHILDREN;
                if !will_be_composited {
                    current.subtree_is_compositing = true;
                    child_data.compositing_ancestor = Some(id);
                    overlap_map.begin_new_overlap_testing_context();
                    let child_bounds = self
                        .layers
                        .layer(*child)
                        .ancestor_dependent_inputs()
                        .clipped_absolute_bounding_box;
                    overlap_map.add(child_bounds);
                    will_be_composited = true;
                    will_have_foreground_layer = true;
                }
            }
        }

        if will_have_foreground_layer {
            // The foreground layer is a fresh backing for everything after it.
            overlap_map.finish_current_overlap_testing_context();
            overlap_map.begin_new_overlap_testing_context();
            child_data.testing_overlap = true;
        }

        for child in lists.normal_flow_and_positive() {
            any_descendant_has_3d_transform |= self.update_recursive(child, overlap_map, &mut child_data);
        }

        let style = self.layers.layer(id).style().clone();
        let subtree_reasons = if can_be_composited {
            subtree_reasons_for_compositing(
                &style,
                child_data.subtree_is_compositing,
                any_descendant_has_3d_transform,
            )
        } else {
            CompositingReasons::empty()
        };
        reasons |= subtree_reasons;
        if !will_be_composited && subtree_reasons.requires_compositing_or_squashing() {
            child_data.compositing_ancestor = Some(id);
            overlap_map.begin_new_overlap_testing_context();
            will_be_composited = true;
        }

        if can_be_composited
            && reasons.is_empty()
            && child_data.subtree_is_compositing
            && style.has_clip_or_overflow_clip()
        {
            reasons |= CompositingReasons::CLIPS_COMPOSITING_DESCENDANTS;
            if !will_be_composited {
                child_data.compositing_ancestor = Some(id);
                overlap_map.begin_new_overlap_testing_context();
                will_be_composited = true;
            }
        }

        if child_data.subtree_is_compositing {
            current.subtree_is_compositing = true;
        }

        // Clipped content cannot leak an unpredictable animation past the clip.
        let is_composited_clipping_layer = will_be_composited && style.has_clip_or_overflow_clip();
        if (!child_data.testing_overlap && !is_composited_clipping_layer) || style.has_active_animation {
            current.testing_overlap = false;
        }

        if is_root {
            if child_data.subtree_is_compositing
                || reasons.requires_compositing_or_squashing()
                || self.settings.force_compositing_mode
            {
                reasons |= CompositingReasons::ROOT;
                will_be_composited = true;
            } else {
                log::debug!(target: "compositing", "nothing composites; leaving compositing mode");
                reasons = CompositingReasons::empty();
                will_be_composited = false;
            }
        }

        if child_data
            .compositing_ancestor
            .is_some_and(|ancestor| !self.layers.is_root(ancestor))
        {
            overlap_map.add(absolute_bounds);
        }
        if will_be_composited && !is_root {
            overlap_map.finish_current_overlap_testing_context();
        }

        if !reasons.is_empty() {
            log::trace!(
                target: "compositing",
                "{} composites for {reasons}",
                self.layers.layer(id).name()
            );
        }
        let layer = self.layers.layer_mut(id);
        layer.compositing_reasons = reasons;
        layer.has_compositing_descendant = child_data.subtree_is_compositing;

        style.has_3d_transform || any_descendant_has_3d_transform
    }

    fn direct_reasons(&self, id: LayerId) -> CompositingReasons {
        let layer = self.layers.layer(id);
        let style = layer.style();
        let mut reasons = CompositingReasons::empty();
        reasons.set(CompositingReasons::TRANSFORM_3D, style.has_3d_transform);
        reasons.set(
            CompositingReasons::VIDEO,
            style.accelerated_content == Some(AcceleratedContent::Video),
        );
        reasons.set(
            CompositingReasons::CANVAS,
            style.accelerated_content == Some(AcceleratedContent::Canvas),
        );
        reasons.set(CompositingReasons::BACKFACE_VISIBILITY_HIDDEN, style.backface_hidden);
        reasons.set(CompositingReasons::ACTIVE_ANIMATION, style.has_active_animation);
        reasons.set(
            CompositingReasons::POSITION_FIXED,
            style.position == Position::Fixed && !self.layers.is_root(id),
        );
        reasons.set(
            CompositingReasons::WILL_CHANGE_COMPOSITING_HINT,
            style.will_change_compositing,
        );
        reasons.set(
            CompositingReasons::COMPOSITED_SCROLLING,
            self.uses_composited_scrolling(id),
        );
        let scroll_parent = layer.ancestor_dependent_inputs().scroll_parent;
        reasons.set(
            CompositingReasons::OVERFLOW_SCROLLING_PARENT,
            scroll_parent.is_some_and(|parent| self.uses_composited_scrolling(parent)),
        );
        reasons
    }

    fn uses_composited_scrolling(&self, id: LayerId) -> bool {
        self.settings.prefer_compositing_to_lcd_text && self.layers.layer(id).scrolls_overflow()
    }
}

fn subtree_reasons_for_compositing(
    style: &crate::render_layer::LayerStyle,
    has_composited_descendants: bool,
    has_3d_transformed_descendants: bool,
) -> CompositingReasons {
    let mut reasons = CompositingReasons::empty();
    if !has_composited_descendants {
        return reasons;
    }
    reasons.set(
        CompositingReasons::TRANSFORM_WITH_COMPOSITED_DESCENDANTS,
        style.has_transform(),
    );
    reasons.set(
        CompositingReasons::OPACITY_WITH_COMPOSITED_DESCENDANTS,
        style.is_transparent(),
    );
    reasons.set(CompositingReasons::MASK_WITH_COMPOSITED_DESCENDANTS, style.has_mask);
    reasons.set(CompositingReasons::FILTER_WITH_COMPOSITED_DESCENDANTS, style.has_filter);
    reasons.set(
        CompositingReasons::CLIP_PATH_WITH_COMPOSITED_DESCENDANTS,
        style.has_clip_path,
    );
    reasons.set(
        CompositingReasons::PRESERVE_3D_WITH_COMPOSITED_DESCENDANTS,
        style.preserves_3d && has_3d_transformed_descendants,
    );
    reasons
}
