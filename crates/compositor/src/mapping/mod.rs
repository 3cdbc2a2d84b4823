//! Per-layer clusters of graphics layers.
//!
//! A [`CompositedLayerMapping`] is owned by exactly one render layer (it is
//! keyed by that layer in the compositor's mapping table) and owns every
//! graphics layer it creates. The primary layer always exists; the helper
//! layers come and go with [`CompositedLayerMapping::update_graphics_layer_configuration`],
//! and [`CompositedLayerMapping::update_graphics_layer_geometry`] positions them.

mod configuration;
mod geometry;

use crate::geometry::{IntRect, IntSize, LayoutPoint, LayoutRect, LayoutSize};
use crate::graphics_layer::{
    GraphicsLayerClient, GraphicsLayerId, GraphicsLayerPurpose, GraphicsLayerTree,
};
use crate::invalidation::{CompositingState, InvalidationRequest};
use crate::reasons::CompositingReasons;
use crate::render_layer::{LayerId, RenderLayerTree};
use crate::settings::CompositorSettings;
use smallvec::SmallVec;
use std::collections::HashSet;

pub use geometry::bounding_box_for_compositing;

/// How much of the graphics-layer state below a mapping is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum GraphicsLayerUpdateScope {
    #[default]
    None,
    /// Only this mapping.
    Local,
    /// This mapping and every mapping below it.
    Subtree,
}

/// A render layer painting into a mapping's squashing layer.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsLayerPaintInfo {
    pub render_layer: LayerId,
    /// Bounds of the layer subtree in its own coordinates.
    pub composited_bounds: LayoutRect,
    /// Offset from the squashing layer's origin to the layer's origin, negated.
    pub offset_from_renderer: IntSize,
    pub offset_from_renderer_set: bool,
    /// Clip applied while painting, relative to the layer; infinite when unclipped.
    pub local_clip_rect_for_squashed_layer: LayoutRect,
}

impl GraphicsLayerPaintInfo {
    fn new(render_layer: LayerId) -> Self {
        Self {
            render_layer,
            composited_bounds: LayoutRect::default(),
            offset_from_renderer: IntSize::zero(),
            offset_from_renderer_set: false,
            local_clip_rect_for_squashed_layer: LayoutRect::infinite(),
        }
    }

    /// Bounds of the squashed layer inside the squashing layer.
    pub fn rect_in_squashing_layer(&self) -> IntRect {
        self.composited_bounds
            .pixel_snapped()
            .moved_by(-self.offset_from_renderer)
    }
}

/// What a child mapping needs to know about its compositing container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositingContainerInfo {
    pub layer: LayerId,
    /// Pixel-snapped composited bounds in the container's own space.
    pub local_bounds: IntRect,
    pub subpixel_accumulation: LayoutSize,
    /// Clip box when the container clips its children with a containment layer.
    pub child_clip_box: Option<IntRect>,
    pub has_child_transform_layer: bool,
    /// Scroll offset when the container scrolls its children in a scrolling layer.
    pub composited_scroll_offset: Option<LayoutSize>,
    pub main_layer_draws_content: bool,
    pub paints_into_composited_ancestor: bool,
}

/// Where an unclipped descendant takes its clip from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipParentInfo {
    /// The render layer whose clip applies.
    pub layer: LayerId,
    /// Sublayer host of the mapping the clip parent paints into.
    pub graphics_layer: GraphicsLayerId,
    /// That mapping belongs to the clip parent and clips with its own layer.
    pub clips_with_own_layer: bool,
}

/// Inputs shared by configuration and geometry updates of one mapping.
pub struct MappingUpdateContext<'ctx> {
    pub layers: &'ctx mut RenderLayerTree,
    pub graphics: &'ctx mut GraphicsLayerTree,
    pub settings: &'ctx CompositorSettings,
    /// Layers owning a mapping.
    pub composited: &'ctx HashSet<LayerId>,
    pub container: Option<CompositingContainerInfo>,
    /// Nearest composited stacking context above the owner.
    pub compositing_stacking_context: Option<LayerId>,
    /// Set when the owner escapes a clip of its compositing ancestors.
    pub clip_parent: Option<ClipParentInfo>,
    /// Scrolling contents layer of the scroller the owner must follow.
    pub scroll_parent: Option<GraphicsLayerId>,
    /// The owner's overflow controls are spliced above its scroll children.
    pub reparents_overflow_controls: bool,
    /// Layers to repaint once the update completes.
    pub layers_needing_paint_invalidation: &'ctx mut Vec<LayerId>,
    /// Repaints that must target a state that no longer holds.
    pub invalidation_requests: &'ctx mut Vec<InvalidationRequest>,
}

/// The graphics layers realizing one composited render layer.
#[derive(Debug)]
pub struct CompositedLayerMapping {
    owning_layer: LayerId,

    graphics_layer: GraphicsLayerId,
    ancestor_clipping_layer: Option<GraphicsLayerId>,
    child_containment_layer: Option<GraphicsLayerId>,
    child_transform_layer: Option<GraphicsLayerId>,
    scrolling_layer: Option<GraphicsLayerId>,
    scrolling_contents_layer: Option<GraphicsLayerId>,
    foreground_layer: Option<GraphicsLayerId>,
    background_layer: Option<GraphicsLayerId>,
    mask_layer: Option<GraphicsLayerId>,
    child_clipping_mask_layer: Option<GraphicsLayerId>,
    squashing_containment_layer: Option<GraphicsLayerId>,
    squashing_layer: Option<GraphicsLayerId>,
    overflow_controls_host_layer: Option<GraphicsLayerId>,
    overflow_controls_clipping_layer: Option<GraphicsLayerId>,

    squashed_layers: Vec<GraphicsLayerPaintInfo>,
    composited_bounds: LayoutRect,
    local_bounds: IntRect,
    squashing_layer_offset_from_transformed_ancestor: LayoutPoint,

    pending_update_scope: GraphicsLayerUpdateScope,
    requires_own_backing_store_for_intrinsic_reasons: bool,
    requires_own_backing_store_for_ancestor_reasons: bool,
    background_layer_paints_fixed_root_background: bool,
}

impl CompositedLayerMapping {
    /// Create the mapping and its primary graphics layer.
    pub fn new(
        owning_layer: LayerId,
        layers: &RenderLayerTree,
        graphics: &mut GraphicsLayerTree,
    ) -> Self {
        let graphics_layer = graphics.create(
            layers.layer(owning_layer).name().to_owned(),
            GraphicsLayerClient::Mapping(owning_layer),
            GraphicsLayerPurpose::Primary,
        );
        Self {
            owning_layer,
            graphics_layer,
            ancestor_clipping_layer: None,
            child_containment_layer: None,
            child_transform_layer: None,
            scrolling_layer: None,
            scrolling_contents_layer: None,
            foreground_layer: None,
            background_layer: None,
            mask_layer: None,
            child_clipping_mask_layer: None,
            squashing_containment_layer: None,
            squashing_layer: None,
            overflow_controls_host_layer: None,
            overflow_controls_clipping_layer: None,
            squashed_layers: Vec::new(),
            composited_bounds: LayoutRect::default(),
            local_bounds: IntRect::default(),
            squashing_layer_offset_from_transformed_ancestor: LayoutPoint::zero(),
            pending_update_scope: GraphicsLayerUpdateScope::Subtree,
            requires_own_backing_store_for_intrinsic_reasons: true,
            requires_own_backing_store_for_ancestor_reasons: true,
            background_layer_paints_fixed_root_background: false,
        }
    }

    /// Tear the mapping down, releasing the layers still squashed into it.
    pub fn destroy(self, layers: &mut RenderLayerTree, graphics: &mut GraphicsLayerTree) {
        for info in &self.squashed_layers {
            if let Some(squashed) = layers
                .get_mut(info.render_layer)
                .filter(|squashed| squashed.grouped_mapping == Some(self.owning_layer))
            {
                squashed.grouped_mapping = None;
                squashed.lost_grouped_mapping = true;
            }
        }
        for id in self.all_graphics_layers() {
            graphics.remove_from_parent(id);
            graphics.destroy(id);
        }
    }

    #[inline]
    pub fn owning_layer(&self) -> LayerId {
        self.owning_layer
    }

    #[inline]
    pub fn main_graphics_layer(&self) -> GraphicsLayerId {
        self.graphics_layer
    }

    #[inline]
    pub fn ancestor_clipping_layer(&self) -> Option<GraphicsLayerId> {
        self.ancestor_clipping_layer
    }

    #[inline]
    pub fn child_containment_layer(&self) -> Option<GraphicsLayerId> {
        self.child_containment_layer
    }

    #[inline]
    pub fn child_transform_layer(&self) -> Option<GraphicsLayerId> {
        self.child_transform_layer
    }

    #[inline]
    pub fn scrolling_layer(&self) -> Option<GraphicsLayerId> {
        self.scrolling_layer
    }

    #[inline]
    pub fn scrolling_contents_layer(&self) -> Option<GraphicsLayerId> {
        self.scrolling_contents_layer
    }

    #[inline]
    pub fn foreground_layer(&self) -> Option<GraphicsLayerId> {
        self.foreground_layer
    }

    #[inline]
    pub fn background_layer(&self) -> Option<GraphicsLayerId> {
        self.background_layer
    }

    #[inline]
    pub fn mask_layer(&self) -> Option<GraphicsLayerId> {
        self.mask_layer
    }

    #[inline]
    pub fn child_clipping_mask_layer(&self) -> Option<GraphicsLayerId> {
        self.child_clipping_mask_layer
    }

    #[inline]
    pub fn squashing_layer(&self) -> Option<GraphicsLayerId> {
        self.squashing_layer
    }

    #[inline]
    pub fn squashing_containment_layer(&self) -> Option<GraphicsLayerId> {
        self.squashing_containment_layer
    }

    #[inline]
    pub fn overflow_controls_host_layer(&self) -> Option<GraphicsLayerId> {
        self.overflow_controls_host_layer
    }

    #[inline]
    pub fn squashed_layers(&self) -> &[GraphicsLayerPaintInfo] {
        &self.squashed_layers
    }

    #[inline]
    pub fn composited_bounds(&self) -> LayoutRect {
        self.composited_bounds
    }

    /// Offset of the squashing layer origin from the owner's transformed ancestor.
    #[inline]
    pub fn squashing_layer_offset_from_transformed_ancestor(&self) -> LayoutPoint {
        self.squashing_layer_offset_from_transformed_ancestor
    }

    #[inline]
    pub fn has_clipping_layer(&self) -> bool {
        self.child_containment_layer.is_some()
    }

    #[inline]
    pub fn has_scrolling_layer(&self) -> bool {
        self.scrolling_layer.is_some()
    }

    #[inline]
    pub fn background_layer_paints_fixed_root_background(&self) -> bool {
        self.background_layer_paints_fixed_root_background
    }

    #[inline]
    pub fn pending_update_scope(&self) -> GraphicsLayerUpdateScope {
        self.pending_update_scope
    }

    #[inline]
    pub fn needs_graphics_layer_update(&self) -> bool {
        self.pending_update_scope > GraphicsLayerUpdateScope::None
    }

    /// Widen the pending update; scopes never shrink until cleared.
    pub fn set_needs_graphics_layer_update(&mut self, scope: GraphicsLayerUpdateScope) {
        self.pending_update_scope = self.pending_update_scope.max(scope);
    }

    pub fn clear_needs_graphics_layer_update(&mut self) {
        self.pending_update_scope = GraphicsLayerUpdateScope::None;
    }

    /// Whether descendants must be updated regardless of their own flags.
    #[inline]
    pub fn forces_subtree_update(&self) -> bool {
        self.pending_update_scope >= GraphicsLayerUpdateScope::Subtree
    }

    /// The owner paints into its compositing ancestor's backing instead of its own.
    #[inline]
    pub fn paints_into_composited_ancestor(&self) -> bool {
        !(self.requires_own_backing_store_for_ancestor_reasons
            || self.requires_own_backing_store_for_intrinsic_reasons)
    }

    /// State of the owner as implied by this mapping.
    pub fn compositing_state(&self) -> CompositingState {
        if self.paints_into_composited_ancestor() {
            CompositingState::HasOwnBackingButPaintsIntoAncestor
        } else {
            CompositingState::PaintsIntoOwnBacking
        }
    }

    /// Layer receiving the graphics layers of child mappings.
    pub fn parent_for_sublayers(&self) -> GraphicsLayerId {
        self.scrolling_contents_layer
            .or(self.child_containment_layer)
            .or(self.child_transform_layer)
            .unwrap_or(self.graphics_layer)
    }

    /// Outermost layer, which the parent mapping adopts.
    pub fn child_for_superlayers(&self) -> GraphicsLayerId {
        self.squashing_containment_layer
            .or(self.ancestor_clipping_layer)
            .unwrap_or(self.graphics_layer)
    }

    /// Every graphics layer owned by this mapping.
    pub fn all_graphics_layers(&self) -> SmallVec<GraphicsLayerId, 16> {
        let mut all = SmallVec::new();
        all.push(self.graphics_layer);
        all.extend(
            [
                self.ancestor_clipping_layer,
                self.child_containment_layer,
                self.child_transform_layer,
                self.scrolling_layer,
                self.scrolling_contents_layer,
                self.foreground_layer,
                self.background_layer,
                self.mask_layer,
                self.child_clipping_mask_layer,
                self.squashing_containment_layer,
                self.squashing_layer,
                self.overflow_controls_host_layer,
                self.overflow_controls_clipping_layer,
            ]
            .into_iter()
            .flatten(),
        );
        all
    }

    /// Graphics layers painting the owner's own contents.
    pub fn content_layers(&self) -> SmallVec<GraphicsLayerId, 8> {
        let mut layers = SmallVec::new();
        layers.push(self.graphics_layer);
        layers.extend(
            [
                self.scrolling_contents_layer,
                self.foreground_layer,
                self.background_layer,
                self.mask_layer,
                self.child_clipping_mask_layer,
            ]
            .into_iter()
            .flatten(),
        );
        layers
    }

    /// Summary handed to child mappings during geometry updates.
    pub fn container_info(
        &self,
        layers: &RenderLayerTree,
        graphics: &GraphicsLayerTree,
    ) -> CompositingContainerInfo {
        let owner = layers.layer(self.owning_layer);
        CompositingContainerInfo {
            layer: self.owning_layer,
            local_bounds: self.local_bounds,
            subpixel_accumulation: owner.subpixel_accumulation(),
            child_clip_box: self
                .child_containment_layer
                .map(|_| owner.clip_box().pixel_snapped()),
            has_child_transform_layer: self.child_transform_layer.is_some(),
            composited_scroll_offset: self.scrolling_layer.map(|_| owner.scroll_offset()),
            main_layer_draws_content: graphics
                .get(self.graphics_layer)
                .is_some_and(|layer| layer.draws_content),
            paints_into_composited_ancestor: self.paints_into_composited_ancestor(),
        }
    }

    /// Put `layer` at `index` of the squashed list, shifting later entries.
    ///
    /// Returns whether the list changed; the caller invalidates and records
    /// the grouping.
    pub fn update_squashing_layer_assignment(&mut self, layer: LayerId, index: usize) -> bool {
        if self
            .squashed_layers
            .get(index)
            .is_some_and(|existing| existing.render_layer == layer)
        {
            return false;
        }
        let position = index.min(self.squashed_layers.len());
        self.squashed_layers
            .insert(position, GraphicsLayerPaintInfo::new(layer));
        true
    }

    /// The layer at `index`, unless it also appears earlier in the list.
    ///
    /// Such a layer is about to move later or drop out of the group.
    pub fn displaced_squashed_layer(&self, index: usize) -> Option<LayerId> {
        let displaced = self.squashed_layers.get(index)?.render_layer;
        let has_preceding_entry = self.squashed_layers[..index]
            .iter()
            .any(|info| info.render_layer == displaced);
        (!has_preceding_entry).then_some(displaced)
    }

    /// Drop the entry for `layer`, if present.
    pub fn remove_render_layer_from_squashing_graphics_layer(&mut self, layer: LayerId) {
        if let Some(index) = self
            .squashed_layers
            .iter()
            .position(|info| info.render_layer == layer)
        {
            self.squashed_layers.remove(index);
        }
    }

    /// Trim entries past `next_index`.
    ///
    /// Returns the trimmed layers that were not re-added at an earlier
    /// index; the caller must release their grouping.
    pub fn finish_accumulating_squashing_layers(&mut self, next_index: usize) -> Vec<LayerId> {
        if next_index >= self.squashed_layers.len() {
            return Vec::new();
        }
        let stale = self.squashed_layers.split_off(next_index);
        stale
            .into_iter()
            .map(|info| info.render_layer)
            .filter(|layer| {
                !self
                    .squashed_layers
                    .iter()
                    .any(|info| info.render_layer == *layer)
            })
            .collect()
    }

    /// Whether `layer` lies under one of the first `max_index` squashed layers.
    pub fn containing_squashed_layer(
        &self,
        layers: &RenderLayerTree,
        layer: LayerId,
        max_index: usize,
    ) -> Option<&GraphicsLayerPaintInfo> {
        self.squashed_layers
            .iter()
            .take(max_index)
            .find(|info| layers.is_descendant_or_self(layer, info.render_layer))
    }

    /// Re-evaluate whether the owner needs its own store for reasons of its own.
    ///
    /// Returns whether the flag changed. When that flips the owner between
    /// painting into its ancestor and owning a backing, a repaint against the
    /// previous state is queued first.
    pub fn update_requires_own_backing_store_for_intrinsic_reasons(
        &mut self,
        layers: &RenderLayerTree,
        invalidation_requests: &mut Vec<InvalidationRequest>,
    ) -> bool {
        let previous = self.requires_own_backing_store_for_intrinsic_reasons;
        let previous_state = self.compositing_state();
        let owner = layers.layer(self.owning_layer);
        let style = owner.style();
        self.requires_own_backing_store_for_intrinsic_reasons = layers.is_root(self.owning_layer)
            || owner
                .compositing_reasons()
                .intersects(CompositingReasons::COMBO_REASONS_THAT_REQUIRE_OWN_BACKING)
            || style.has_transform()
            || (owner.clips_with_border_radius() && owner.has_compositing_descendant())
            || style.is_transparent()
            || style.has_mask
            || style.has_filter;
        if self.compositing_state() != previous_state {
            invalidation_requests.push(InvalidationRequest {
                layer: self.owning_layer,
                state: previous_state,
            });
        }
        self.requires_own_backing_store_for_intrinsic_reasons != previous
    }

    /// Re-evaluate whether the compositing ancestor can host the owner's painting.
    ///
    /// Returns whether the flag changed; a flip of the painting target queues
    /// a repaint against the previous state.
    pub fn update_requires_own_backing_store_for_ancestor_reasons(
        &mut self,
        container: Option<&CompositingContainerInfo>,
        invalidation_requests: &mut Vec<InvalidationRequest>,
    ) -> bool {
        let previous = self.requires_own_backing_store_for_ancestor_reasons;
        let previous_state = self.compositing_state();
        let can_paint_into_ancestor = container.is_some_and(|info| {
            info.main_layer_draws_content || info.paints_into_composited_ancestor
        });
        self.requires_own_backing_store_for_ancestor_reasons = !can_paint_into_ancestor;
        if self.compositing_state() != previous_state {
            invalidation_requests.push(InvalidationRequest {
                layer: self.owning_layer,
                state: previous_state,
            });
        }
        self.requires_own_backing_store_for_ancestor_reasons != previous
    }

    /// Detach the overflow controls so they can be stacked above scroll children.
    pub fn detach_layer_for_overflow_controls(
        &self,
        graphics: &mut GraphicsLayerTree,
    ) -> Option<GraphicsLayerId> {
        let host = self
            .overflow_controls_clipping_layer
            .or(self.overflow_controls_host_layer)?;
        graphics.remove_from_parent(host);
        Some(host)
    }

    /// Put the overflow controls back under the primary layer.
    pub fn reattach_overflow_controls(&self, graphics: &mut GraphicsLayerTree) {
        let Some(host) = self
            .overflow_controls_clipping_layer
            .or(self.overflow_controls_host_layer)
        else {
            return;
        };
        let children = graphics.children(self.graphics_layer);
        if children.last() != Some(&host) {
            graphics.add_child(self.graphics_layer, host);
        }
    }

    /// Mark every layer painting the owner's contents for repaint.
    pub fn set_contents_need_display(&self, graphics: &mut GraphicsLayerTree) {
        for id in self.content_layers() {
            graphics.set_needs_display(id);
        }
    }

    /// Repaint the part of the squashing layer covered by `layer`.
    pub fn set_squashed_layer_needs_display(&self, graphics: &mut GraphicsLayerTree, layer: LayerId) {
        let Some(squashing_layer) = self.squashing_layer else {
            return;
        };
        match self
            .squashed_layers
            .iter()
            .find(|info| info.render_layer == layer && info.offset_from_renderer_set)
        {
            Some(info) => {
                graphics.set_needs_display_in_rect(squashing_layer, info.rect_in_squashing_layer());
            }
            None => graphics.set_needs_display(squashing_layer),
        }
    }

    /// Name used for debug output of the mapping's layers.
    pub fn debug_name(
        &self,
        layers: &RenderLayerTree,
        purpose: GraphicsLayerPurpose,
    ) -> String {
        let owner = layers
            .get(self.owning_layer)
            .map_or("<removed>", |layer| layer.name());
        format!("{owner}{}", purpose.debug_suffix())
    }
}

/// Create or destroy the layer in `slot` so its presence matches `needed`.
///
/// Returns whether the slot changed.
fn toggle_graphics_layer(
    graphics: &mut GraphicsLayerTree,
    slot: &mut Option<GraphicsLayerId>,
    needed: bool,
    owner: LayerId,
    owner_name: &str,
    purpose: GraphicsLayerPurpose,
) -> bool {
    match (needed, slot.is_some()) {
        (true, false) => {
            *slot = Some(graphics.create(
                format!("{owner_name}{}", purpose.debug_suffix()),
                GraphicsLayerClient::Mapping(owner),
                purpose,
            ));
            true
        }
        (false, true) => {
            if let Some(id) = slot.take() {
                graphics.remove_from_parent(id);
                graphics.destroy(id);
            }
            true
        }
        _ => false,
    }
}
