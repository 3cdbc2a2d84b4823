//! Backing assignment.
//!
//! Walks the render layers in paint order and decides, for each, whether it
//! gets a mapping of its own, paints into the squashing layer of the most
//! recent mapping, or paints into its compositing ancestor. Squashing may
//! never reorder painting, so a layer only joins the group of the mapping
//! immediately before it in paint order, and only once that mapping's whole
//! subtree has been assigned.

use crate::graphics_layer::GraphicsLayerTree;
use crate::invalidation::{CompositingState, InvalidationRequest, PaintInvalidation, invalidate_layer};
use crate::mapping::{CompositedLayerMapping, GraphicsLayerUpdateScope};
use crate::reasons::CompositingReasons;
use crate::render_layer::{LayerId, RenderLayerTree};
use crate::settings::CompositorSettings;
use crate::squashing_state::{FinishedSquashingGroup, SquashingState};
use std::collections::HashMap;

/// How a layer's backing changes in this assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositingStateTransition {
    NoCompositingStateChange,
    AllocateOwnCompositedLayerMapping,
    RemoveOwnCompositedLayerMapping,
    PutInSquashingLayer,
    RemoveFromSquashingLayer,
}

/// What the compositor needs after an assignment pass.
#[derive(Debug, Default)]
pub struct AssignmentResult {
    /// Mappings or squashing groups changed; the tree must be rebuilt.
    pub layers_changed: bool,
    /// Last scroll child in paint order, keyed by its scroll parent.
    pub topmost_scroll_children: HashMap<LayerId, LayerId>,
    /// Repaints issued against the state before the change.
    pub paint_invalidations: Vec<PaintInvalidation>,
    /// Layers to repaint once the new state is in place.
    pub layers_needing_paint_invalidation: Vec<LayerId>,
}

pub struct CompositingLayerAssigner<'tree> {
    layers: &'tree mut RenderLayerTree,
    graphics: &'tree mut GraphicsLayerTree,
    mappings: &'tree mut HashMap<LayerId, CompositedLayerMapping>,
    settings: &'tree CompositorSettings,
    compositing_mode: bool,
    result: AssignmentResult,
}

impl<'tree> CompositingLayerAssigner<'tree> {
    pub fn new(
        layers: &'tree mut RenderLayerTree,
        graphics: &'tree mut GraphicsLayerTree,
        mappings: &'tree mut HashMap<LayerId, CompositedLayerMapping>,
        settings: &'tree CompositorSettings,
        compositing_mode: bool,
    ) -> Self {
        Self {
            layers,
            graphics,
            mappings,
            settings,
            compositing_mode,
            result: AssignmentResult::default(),
        }
    }

    /// Assign every layer, consuming the assigner.
    pub fn assign(mut self) -> AssignmentResult {
        let _span = tracing::info_span!("compositing.assign").entered();
        let root = self.layers.root();
        let state = self.assign_recursive(root, SquashingState::default());
        if let Some(group) = state.finish() {
            self.finish_squashing_group(group);
        }
        self.result
    }

    fn assign_recursive(&mut self, id: LayerId, mut state: SquashingState) -> SquashingState {
        let squashing_enabled = self.settings.layer_squashing_enabled;
        if squashing_enabled && self.layers.layer(id).compositing_reasons().requires_squashing() {
            let preventing = self.reasons_preventing_squashing(id, &state);
            if !preventing.is_empty() {
                log::trace!(
                    target: "compositing",
                    "{} cannot squash: {preventing}",
                    self.layers.layer(id).name()
                );
                self.layers.layer_mut(id).compositing_reasons |= preventing;
            }
        }

        let transition = self.compute_composited_layer_update(id);
        if allocate_or_clear_composited_layer_mapping(
            self.layers,
            self.graphics,
            self.mappings,
            id,
            transition,
            &mut self.result.paint_invalidations,
        ) {
            self.result.layers_needing_paint_invalidation.push(id);
            self.result.layers_changed = true;
        }

        if squashing_enabled {
            if self.update_squashing_assignment(id, &state, transition) {
                self.result.layers_changed = true;
            }
            let is_squashed = transition == CompositingStateTransition::PutInSquashingLayer
                || (transition == CompositingStateTransition::NoCompositingStateChange
                    && self.layers.layer(id).grouped_mapping().is_some());
            if is_squashed {
                let bounds = self
                    .layers
                    .layer(id)
                    .ancestor_dependent_inputs()
                    .clipped_absolute_bounding_box;
                state = state.with_squashed_layer(bounds);
            }
        }

        self.update_intrinsic_backing_requirement(id);

        let lists = self.layers.z_order_lists(id);
        for child in &lists.negative {
            state = self.assign_recursive(*child, state);
        }

        // A separately composited layer is the newest backing in paint order.
        if squashing_enabled && self.mappings.contains_key(&id) {
            let (next, finished) = state.update_for_new_mapping(id);
            if let Some(group) = finished {
                self.finish_squashing_group(group);
            }
            state = next;
        }

        if let Some(scroll_parent) = self.layers.layer(id).ancestor_dependent_inputs().scroll_parent {
            self.result.topmost_scroll_children.insert(scroll_parent, id);
        }

        for child in lists.normal_flow_and_positive() {
            state = self.assign_recursive(child, state);
        }

        if state.most_recent_mapping == Some(id) {
            state.have_assigned_backings_to_entire_squashing_layer_subtree = true;
        }
        state
    }

    fn needs_own_backing(&self, id: LayerId) -> bool {
        let is_root = self.layers.is_root(id);
        let layer = self.layers.layer(id);
        if !is_root && !layer.is_self_painting() {
            return false;
        }
        let reasons = layer.compositing_reasons();
        let needs_own_backing_for_disabled_squashing =
            !self.settings.layer_squashing_enabled && reasons.requires_squashing();
        reasons.requires_compositing()
            || needs_own_backing_for_disabled_squashing
            || (self.compositing_mode && is_root)
    }

    fn compute_composited_layer_update(&self, id: LayerId) -> CompositingStateTransition {
        let has_mapping = self.mappings.contains_key(&id);
        if self.needs_own_backing(id) {
            return if has_mapping {
                CompositingStateTransition::NoCompositingStateChange
            } else {
                CompositingStateTransition::AllocateOwnCompositedLayerMapping
            };
        }
        let mut update = if has_mapping {
            CompositingStateTransition::RemoveOwnCompositedLayerMapping
        } else {
            CompositingStateTransition::NoCompositingStateChange
        };
        if self.settings.layer_squashing_enabled {
            let layer = self.layers.layer(id);
            if layer.is_self_painting() && layer.compositing_reasons().requires_squashing() {
                update = CompositingStateTransition::PutInSquashingLayer;
            } else if layer.grouped_mapping().is_some() || layer.lost_grouped_mapping {
                update = CompositingStateTransition::RemoveFromSquashingLayer;
            }
        }
        update
    }

    fn reasons_preventing_squashing(&self, id: LayerId, state: &SquashingState) -> CompositingReasons {
        let Some(owner) = state
            .most_recent_mapping
            .filter(|_| state.have_assigned_backings_to_entire_squashing_layer_subtree)
        else {
            return CompositingReasons::SQUASHING_WOULD_BREAK_PAINT_ORDER;
        };
        let layer = self.layers.layer(id);
        let inputs = layer.ancestor_dependent_inputs();
        let owner_layer = self.layers.layer(owner);
        let owner_inputs = owner_layer.ancestor_dependent_inputs();

        if state.would_exceed_sparsity_tolerance(inputs.clipped_absolute_bounding_box) {
            return CompositingReasons::SQUASHING_SPARSITY_EXCEEDED;
        }

        if inputs.clipping_container != owner_inputs.clipping_container {
            let clipped_by_squashed_layer = inputs
                .clipping_container
                .zip(self.mappings.get(&owner))
                .is_some_and(|(container, mapping)| {
                    mapping
                        .containing_squashed_layer(self.layers, container, state.next_squashed_layer_index)
                        .is_some()
                });
            if !clipped_by_squashed_layer {
                return CompositingReasons::SQUASHING_CLIPPING_CONTAINER_MISMATCH;
            }
        }

        // The clip for composited descendants needs a containment layer of its own.
        if layer.has_compositing_descendant() && layer.style().has_clip_or_overflow_clip() {
            return CompositingReasons::SQUASHED_LAYER_CLIPS_COMPOSITING_DESCENDANTS;
        }

        if owner_layer.style().preserves_3d {
            return CompositingReasons::SQUASHING_OWNER_DESCENDANTS_DEPTH_CLIPPED;
        }

        if inputs.ancestor_scrolling_layer != owner_inputs.ancestor_scrolling_layer {
            return CompositingReasons::SCROLLS_WITH_RESPECT_TO_SQUASHING_LAYER;
        }

        if inputs.opacity_ancestor != owner_inputs.opacity_ancestor {
            return CompositingReasons::SQUASHING_OPACITY_ANCESTOR_MISMATCH;
        }
        if inputs.transform_ancestor != owner_inputs.transform_ancestor {
            return CompositingReasons::SQUASHING_TRANSFORM_ANCESTOR_MISMATCH;
        }
        if inputs.filter_ancestor != owner_inputs.filter_ancestor {
            return CompositingReasons::SQUASHING_FILTER_ANCESTOR_MISMATCH;
        }
        CompositingReasons::empty()
    }

    /// Returns whether the squashing groups changed.
    fn update_squashing_assignment(
        &mut self,
        id: LayerId,
        state: &SquashingState,
        transition: CompositingStateTransition,
    ) -> bool {
        match transition {
            CompositingStateTransition::PutInSquashingLayer => {
                let Some(owner) = state.most_recent_mapping else {
                    return false;
                };
                let index = state.next_squashed_layer_index;
                let Some(mapping) = self.mappings.get(&owner) else {
                    return false;
                };
                if mapping
                    .squashed_layers()
                    .get(index)
                    .is_some_and(|info| info.render_layer == id)
                {
                    return false;
                }
                let displaced = mapping.displaced_squashed_layer(index);

                // Repaint where the layer and the entry it pushes along painted so far.
                self.invalidate_against_current_state(id);
                if let Some(displaced) = displaced {
                    self.invalidate_against_current_state(displaced);
                }

                let previous_owner = self
                    .layers
                    .layer(id)
                    .grouped_mapping()
                    .filter(|previous| *previous != owner);
                if let Some(previous_mapping) =
                    previous_owner.and_then(|previous| self.mappings.get_mut(&previous))
                {
                    previous_mapping.remove_render_layer_from_squashing_graphics_layer(id);
                    previous_mapping.set_needs_graphics_layer_update(GraphicsLayerUpdateScope::Subtree);
                }
                if let Some(mapping) = self.mappings.get_mut(&owner) {
                    mapping.update_squashing_layer_assignment(id, index);
                    mapping.set_needs_graphics_layer_update(GraphicsLayerUpdateScope::Subtree);
                }
                let layer = self.layers.layer_mut(id);
                layer.grouped_mapping = Some(owner);
                layer.lost_grouped_mapping = false;
                log::trace!(
                    target: "compositing",
                    "{} squashed into mapping of layer {} at {index}",
                    self.layers.layer(id).name(),
                    owner.index()
                );
                self.result.layers_needing_paint_invalidation.push(id);
                true
            }
            CompositingStateTransition::RemoveFromSquashingLayer => {
                if let Some(previous) = self.layers.layer(id).grouped_mapping() {
                    self.invalidate_against_current_state(id);
                    if let Some(mapping) = self.mappings.get_mut(&previous) {
                        mapping.remove_render_layer_from_squashing_graphics_layer(id);
                        mapping.set_needs_graphics_layer_update(GraphicsLayerUpdateScope::Subtree);
                    }
                    self.layers.layer_mut(id).grouped_mapping = None;
                }
                self.layers.layer_mut(id).lost_grouped_mapping = false;
                self.result.layers_needing_paint_invalidation.push(id);
                true
            }
            CompositingStateTransition::NoCompositingStateChange
            | CompositingStateTransition::AllocateOwnCompositedLayerMapping
            | CompositingStateTransition::RemoveOwnCompositedLayerMapping => false,
        }
    }

    /// Close a squashing group, releasing the entries it no longer holds.
    fn finish_squashing_group(&mut self, group: FinishedSquashingGroup) {
        let Some(mapping) = self.mappings.get_mut(&group.owner) else {
            return;
        };
        let stale = mapping.finish_accumulating_squashing_layers(group.next_squashed_layer_index);
        if stale.is_empty() {
            return;
        }
        mapping.set_needs_graphics_layer_update(GraphicsLayerUpdateScope::Subtree);
        self.result.layers_changed = true;
        for layer in stale {
            if self.layers.layer(layer).grouped_mapping() != Some(group.owner) {
                continue;
            }
            self.invalidate_against_current_state(layer);
            self.layers.layer_mut(layer).grouped_mapping = None;
            self.result.layers_needing_paint_invalidation.push(layer);
        }
    }

    fn update_intrinsic_backing_requirement(&mut self, id: LayerId) {
        let Some(mapping) = self.mappings.get_mut(&id) else {
            return;
        };
        let mut requests: Vec<InvalidationRequest> = Vec::new();
        if mapping.update_requires_own_backing_store_for_intrinsic_reasons(self.layers, &mut requests) {
            mapping.set_needs_graphics_layer_update(GraphicsLayerUpdateScope::Subtree);
        }
        for request in requests {
            let record = invalidate_layer(self.layers, self.mappings, self.graphics, request.layer, request.state);
            self.result.paint_invalidations.push(record);
        }
    }

    fn invalidate_against_current_state(&mut self, id: LayerId) {
        let state = CompositingState::of(self.layers, self.mappings, id);
        let record = invalidate_layer(self.layers, self.mappings, self.graphics, id, state);
        self.result.paint_invalidations.push(record);
    }
}

/// Create or destroy the mapping of `layer` as `transition` demands.
///
/// Mappings are created and destroyed nowhere else. Returns whether the
/// layer gained or lost a mapping.
pub fn allocate_or_clear_composited_layer_mapping(
    layers: &mut RenderLayerTree,
    graphics: &mut GraphicsLayerTree,
    mappings: &mut HashMap<LayerId, CompositedLayerMapping>,
    layer: LayerId,
    transition: CompositingStateTransition,
    paint_invalidations: &mut Vec<PaintInvalidation>,
) -> bool {
    let changed = match transition {
        CompositingStateTransition::AllocateOwnCompositedLayerMapping => {
            if mappings.contains_key(&layer) {
                return false;
            }
            // Repaint against the old state before the grouping is forgotten.
            let state = CompositingState::of(layers, mappings, layer);
            paint_invalidations.push(invalidate_layer(layers, mappings, graphics, layer, state));
            if let Some(previous) = layers
                .layer(layer)
                .grouped_mapping()
                .and_then(|previous_owner| mappings.get_mut(&previous_owner))
            {
                previous.remove_render_layer_from_squashing_graphics_layer(layer);
                previous.set_needs_graphics_layer_update(GraphicsLayerUpdateScope::Subtree);
            }
            let render_layer = layers.layer_mut(layer);
            render_layer.grouped_mapping = None;
            render_layer.lost_grouped_mapping = false;
            let mapping = CompositedLayerMapping::new(layer, layers, graphics);
            mappings.insert(layer, mapping);
            log::trace!(target: "compositing", "{} gets its own mapping", layers.layer(layer).name());
            true
        }
        // A layer moving into a squashing layer first gives up its own mapping.
        CompositingStateTransition::RemoveOwnCompositedLayerMapping
        | CompositingStateTransition::PutInSquashingLayer => {
            if !mappings.contains_key(&layer) {
                return false;
            }
            let state = CompositingState::of(layers, mappings, layer);
            paint_invalidations.push(invalidate_layer(layers, mappings, graphics, layer, state));
            if let Some(mapping) = mappings.remove(&layer) {
                mapping.destroy(layers, graphics);
            }
            log::trace!(target: "compositing", "{} loses its mapping", layers.layer(layer).name());
            true
        }
        CompositingStateTransition::RemoveFromSquashingLayer
        | CompositingStateTransition::NoCompositingStateChange => false,
    };
    if !changed {
        return false;
    }
    // The container's contents and draws-content state depend on what paints into it.
    let container = layers
        .compositing_ancestors(layer)
        .find(|ancestor| mappings.contains_key(ancestor));
    if let Some(mapping) = container.and_then(|container| mappings.get_mut(&container)) {
        mapping.set_needs_graphics_layer_update(GraphicsLayerUpdateScope::Subtree);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{LayoutRect, LayoutSize};
    use crate::inputs_updater::CompositingInputsUpdater;
    use crate::render_layer::{LayerStyle, Position};
    use crate::requirements_updater::CompositingRequirementsUpdater;
    use anyhow::Result;

    struct Pipeline {
        layers: RenderLayerTree,
        graphics: GraphicsLayerTree,
        mappings: HashMap<LayerId, CompositedLayerMapping>,
        settings: CompositorSettings,
    }

    impl Pipeline {
        fn new(settings: CompositorSettings) -> Self {
            Self {
                layers: RenderLayerTree::new(LayerStyle::default(), LayoutSize::new(800.0, 600.0)),
                graphics: GraphicsLayerTree::new(),
                mappings: HashMap::new(),
                settings,
            }
        }

        fn run(&mut self) -> AssignmentResult {
            CompositingInputsUpdater::new(&mut self.layers, &mut self.mappings).update();
            let compositing_mode =
                CompositingRequirementsUpdater::new(&mut self.layers, &self.settings).update();
            CompositingLayerAssigner::new(
                &mut self.layers,
                &mut self.graphics,
                &mut self.mappings,
                &self.settings,
                compositing_mode,
            )
            .assign()
        }
    }

    fn relative() -> LayerStyle {
        LayerStyle {
            position: Position::Relative,
            ..LayerStyle::default()
        }
    }

    /// Overlapping boxes join the squashing layer of the promoted box before them.
    #[test]
    fn overlapping_boxes_are_squashed() -> Result<()> {
        let mut pipeline = Pipeline::new(CompositorSettings::default());
        let root = pipeline.layers.root();
        let promoted = pipeline
            .layers
            .append_child(
                root,
                "promoted",
                LayerStyle {
                    will_change_compositing: true,
                    ..relative()
                },
                LayoutRect::new(0.0, 0.0, 200.0, 100.0),
            )?;
        let first = pipeline
            .layers
            .append_child(root, "first", relative(), LayoutRect::new(0.0, 0.0, 90.0, 90.0))?;
        let second = pipeline
            .layers
            .append_child(root, "second", relative(), LayoutRect::new(100.0, 0.0, 90.0, 90.0))?;

        let result = pipeline.run();
        assert!(result.layers_changed);
        assert!(pipeline.mappings.contains_key(&root));
        assert!(pipeline.mappings.contains_key(&promoted));
        assert_eq!(pipeline.layers.layer(first).grouped_mapping(), Some(promoted));
        assert_eq!(pipeline.layers.layer(second).grouped_mapping(), Some(promoted));
        let squashed: Vec<LayerId> = pipeline.mappings[&promoted]
            .squashed_layers()
            .iter()
            .map(|info| info.render_layer)
            .collect();
        assert_eq!(squashed, vec![first, second]);

        let again = pipeline.run();
        assert!(!again.layers_changed);
        Ok(())
    }

    /// With squashing off, overlap alone gives a layer its own mapping.
    #[test]
    fn disabled_squashing_allocates_mappings() -> Result<()> {
        let mut pipeline = Pipeline::new(CompositorSettings {
            layer_squashing_enabled: false,
            ..CompositorSettings::default()
        });
        let root = pipeline.layers.root();
        pipeline
            .layers
            .append_child(
                root,
                "promoted",
                LayerStyle {
                    has_3d_transform: true,
                    ..relative()
                },
                LayoutRect::new(0.0, 0.0, 100.0, 100.0),
            )?;
        let overlapping = pipeline
            .layers
            .append_child(root, "overlapping", relative(), LayoutRect::new(10.0, 10.0, 50.0, 50.0))?;

        pipeline.run();
        assert!(pipeline.mappings.contains_key(&overlapping));
        assert_eq!(pipeline.layers.layer(overlapping).grouped_mapping(), None);
        Ok(())
    }

    /// A box outside the translucent parent of the owner cannot join its group.
    #[test]
    fn opacity_ancestor_mismatch_prevents_squashing() -> Result<()> {
        let mut pipeline = Pipeline::new(CompositorSettings::default());
        let root = pipeline.layers.root();
        let faded = pipeline
            .layers
            .append_child(
                root,
                "faded",
                LayerStyle {
                    opacity: 0.5,
                    ..relative()
                },
                LayoutRect::new(0.0, 0.0, 100.0, 100.0),
            )?;
        pipeline
            .layers
            .append_child(
                faded,
                "promoted",
                LayerStyle {
                    will_change_compositing: true,
                    ..relative()
                },
                LayoutRect::new(0.0, 0.0, 100.0, 100.0),
            )?;
        let later = pipeline
            .layers
            .append_child(root, "later", relative(), LayoutRect::new(10.0, 10.0, 50.0, 50.0))?;

        pipeline.run();
        assert!(pipeline.mappings.contains_key(&faded));
        assert!(pipeline
            .layers
            .layer(later)
            .compositing_reasons()
            .contains(CompositingReasons::SQUASHING_OPACITY_ANCESTOR_MISMATCH));
        assert!(pipeline.mappings.contains_key(&later));
        Ok(())
    }
}
