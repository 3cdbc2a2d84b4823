//! The compositor: owns the render-layer tree, the mappings and the
//! graphics-layer tree, and drives the passes that keep them in sync.

use crate::geometry::{IntPoint, IntRect, IntSize, LayoutRect, LayoutSize};
use crate::graphics_layer::{
    CompositorLayerRole, GraphicsLayerClient, GraphicsLayerId, GraphicsLayerPaintingPhase,
    GraphicsLayerPurpose, GraphicsLayerSnapshot, GraphicsLayerTree,
};
use crate::graphics_layer_updater::GraphicsLayerUpdater;
use crate::inputs_updater::CompositingInputsUpdater;
use crate::invalidation::{CompositingState, PaintInvalidation, invalidate_layer};
use crate::layer_assigner::{
    CompositingLayerAssigner, CompositingStateTransition, allocate_or_clear_composited_layer_mapping,
};
use crate::mapping::{CompositedLayerMapping, GraphicsLayerUpdateScope};
use crate::render_layer::{LayerId, LayerStyle, RenderLayerTree};
use crate::requirements_updater::CompositingRequirementsUpdater;
use crate::settings::CompositorSettings;
use crate::tree_builder::GraphicsLayerTreeBuilder;
use anyhow::{Context as _, Result, anyhow};
use std::collections::HashMap;

/// How much work the next update has to do. Later variants include the
/// work of earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum CompositingUpdateType {
    #[default]
    None,
    AfterGeometryChange,
    AfterCompositingInputChange,
    RebuildTree,
}

/// Receives the root of the composited layer tree.
pub trait RootLayerHost {
    /// Attach `layer` as the frame's root graphics layer, or detach with `None`.
    fn attach_root_graphics_layer(&mut self, layer: Option<GraphicsLayerId>);
}

/// One unit of painting requested for a graphics layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PaintRequest {
    pub graphics_layer: GraphicsLayerId,
    pub render_layer: LayerId,
    pub phase: GraphicsLayerPaintingPhase,
    /// Area to repaint, in graphics-layer space.
    pub clip: IntRect,
    /// Offset from the graphics layer origin to the render layer origin, negated.
    pub offset_from_renderer: IntSize,
    /// Extra clip relative to the render layer; infinite when unclipped.
    pub local_clip: LayoutRect,
}

/// Paints render layers into graphics layers.
pub trait LayerPainter {
    fn paint_layer(&mut self, request: &PaintRequest);

    /// Paint one of the compositor's own layers. Nothing by default.
    fn paint_compositor_layer(&mut self, _role: CompositorLayerRole, _clip: IntRect) {}
}

/// Graphics layers holding the whole composited tree.
#[derive(Debug, Clone, Copy)]
struct RootScaffold {
    overflow_controls_host: GraphicsLayerId,
    container: GraphicsLayerId,
    scroll: GraphicsLayerId,
    root_content: GraphicsLayerId,
}

pub struct RenderLayerCompositor {
    layers: RenderLayerTree,
    graphics: GraphicsLayerTree,
    mappings: HashMap<LayerId, CompositedLayerMapping>,
    settings: CompositorSettings,
    host: Option<Box<dyn RootLayerHost>>,
    scaffold: Option<RootScaffold>,
    compositing: bool,
    pending_update_type: CompositingUpdateType,
    frame_scroll_offset: LayoutSize,
    topmost_scroll_children: HashMap<LayerId, LayerId>,
    tracking_paint_invalidations: bool,
    paint_invalidations: Vec<PaintInvalidation>,
}

impl RenderLayerCompositor {
    pub fn new(root_style: LayerStyle, viewport: LayoutSize, settings: CompositorSettings) -> Self {
        Self {
            layers: RenderLayerTree::new(root_style, viewport),
            graphics: GraphicsLayerTree::new(),
            mappings: HashMap::new(),
            settings,
            host: None,
            scaffold: None,
            compositing: false,
            pending_update_type: CompositingUpdateType::AfterCompositingInputChange,
            frame_scroll_offset: LayoutSize::zero(),
            topmost_scroll_children: HashMap::new(),
            tracking_paint_invalidations: false,
            paint_invalidations: Vec::new(),
        }
    }

    #[inline]
    pub fn settings(&self) -> &CompositorSettings {
        &self.settings
    }

    #[inline]
    pub fn layers(&self) -> &RenderLayerTree {
        &self.layers
    }

    /// Mutable access to the render layers. Mutations mark the affected
    /// layers dirty; the next [`Self::update_if_needed`] picks them up.
    #[inline]
    pub fn layers_mut(&mut self) -> &mut RenderLayerTree {
        &mut self.layers
    }

    #[inline]
    pub fn graphics_layers(&self) -> &GraphicsLayerTree {
        &self.graphics
    }

    #[inline]
    pub fn is_compositing(&self) -> bool {
        self.compositing
    }

    pub fn mapping(&self, layer: LayerId) -> Option<&CompositedLayerMapping> {
        self.mappings.get(&layer)
    }

    pub fn compositing_state(&self, layer: LayerId) -> CompositingState {
        CompositingState::of(&self.layers, &self.mappings, layer)
    }

    /// Outermost layer of the composited tree, while compositing.
    pub fn root_graphics_layer(&self) -> Option<GraphicsLayerId> {
        self.scaffold.map(|scaffold| scaffold.overflow_controls_host)
    }

    pub fn set_root_layer_host(&mut self, host: Option<Box<dyn RootLayerHost>>) {
        self.host = host;
        self.attach_root_layer();
    }

    pub fn set_needs_compositing_update(&mut self, update_type: CompositingUpdateType) {
        self.pending_update_type = self.pending_update_type.max(update_type);
    }

    pub fn has_pending_updates(&self) -> bool {
        self.pending_update_type > CompositingUpdateType::None
            || self.layers.needs_compositing_inputs_update()
    }

    /// Run every pass the pending changes require.
    pub fn update_if_needed(&mut self) {
        if !self.has_pending_updates() {
            return;
        }
        let _span = tracing::info_span!("compositing.update").entered();
        let mut update_type = std::mem::take(&mut self.pending_update_type);
        if self.layers.needs_compositing_inputs_update() {
            update_type = update_type.max(CompositingUpdateType::AfterCompositingInputChange);
        }
        let mut layers_needing_paint_invalidation = Vec::new();

        if update_type >= CompositingUpdateType::AfterCompositingInputChange {
            CompositingInputsUpdater::new(&mut self.layers, &mut self.mappings).update();
            let needs_compositing =
                CompositingRequirementsUpdater::new(&mut self.layers, &self.settings).update();
            self.update_compositing_mode(needs_compositing);

            let assignment = CompositingLayerAssigner::new(
                &mut self.layers,
                &mut self.graphics,
                &mut self.mappings,
                &self.settings,
                self.compositing,
            )
            .assign();
            self.record_paint_invalidations(assignment.paint_invalidations);
            layers_needing_paint_invalidation.extend(assignment.layers_needing_paint_invalidation);
            self.topmost_scroll_children = assignment.topmost_scroll_children;
            if assignment.layers_changed {
                update_type = update_type.max(CompositingUpdateType::RebuildTree);
            }
        }

        let graphics_update = GraphicsLayerUpdater::new(
            &mut self.layers,
            &mut self.graphics,
            &mut self.mappings,
            &self.settings,
            &self.topmost_scroll_children,
        )
        .update();
        self.record_paint_invalidations(graphics_update.paint_invalidations);
        layers_needing_paint_invalidation.extend(graphics_update.layers_needing_paint_invalidation);
        if graphics_update.needs_rebuild_tree {
            update_type = update_type.max(CompositingUpdateType::RebuildTree);
        }

        if update_type >= CompositingUpdateType::RebuildTree {
            self.rebuild_tree();
        }

        for layer in layers_needing_paint_invalidation {
            if self.layers.get(layer).is_some() {
                self.paint_invalidation_on_compositing_change(layer);
            }
        }

        debug_assert!(!self.layers.needs_compositing_inputs_update());
        debug_assert!(
            self.mappings
                .values()
                .all(|mapping| !mapping.needs_graphics_layer_update())
        );
    }

    fn rebuild_tree(&mut self) {
        let root = self.layers.root();
        let top_level = GraphicsLayerTreeBuilder::new(
            &self.layers,
            &mut self.graphics,
            &self.mappings,
            &self.topmost_scroll_children,
        )
        .rebuild(root);
        let Some(scaffold) = self.scaffold else {
            return;
        };
        self.graphics.set_children(scaffold.root_content, &top_level);

        // A fixed root background stays put while the frame scrolls.
        let fixed_background = self
            .mappings
            .get(&root)
            .filter(|mapping| mapping.background_layer_paints_fixed_root_background())
            .and_then(CompositedLayerMapping::background_layer);
        let container_children: Vec<GraphicsLayerId> =
            fixed_background.into_iter().chain([scaffold.scroll]).collect();
        self.graphics.set_children(scaffold.container, &container_children);
    }

    /// Create or destroy the mapping of `layer`.
    ///
    /// Returns whether the layer gained or lost a mapping. Allocating the
    /// first mapping enters compositing mode.
    pub fn allocate_or_clear_composited_layer_mapping(
        &mut self,
        layer: LayerId,
        transition: CompositingStateTransition,
    ) -> bool {
        let mut paint_invalidations = Vec::new();
        let changed = allocate_or_clear_composited_layer_mapping(
            &mut self.layers,
            &mut self.graphics,
            &mut self.mappings,
            layer,
            transition,
            &mut paint_invalidations,
        );
        self.record_paint_invalidations(paint_invalidations);
        if changed {
            if transition == CompositingStateTransition::AllocateOwnCompositedLayerMapping {
                self.update_compositing_mode(true);
            }
            self.set_needs_compositing_update(CompositingUpdateType::RebuildTree);
        }
        changed
    }

    /// Repaint whatever currently holds the pixels of `layer`.
    pub fn paint_invalidation_on_compositing_change(&mut self, layer: LayerId) {
        let state = CompositingState::of(&self.layers, &self.mappings, layer);
        let record = invalidate_layer(&self.layers, &self.mappings, &mut self.graphics, layer, state);
        self.record_paint_invalidations([record]);
    }

    /// Enter or leave compositing mode, creating or destroying the root scaffold.
    ///
    /// The root gains or drops its mapping on the next update.
    pub fn set_compositing_mode(&mut self, enabled: bool) {
        if self.update_compositing_mode(enabled) {
            self.set_needs_compositing_update(CompositingUpdateType::AfterCompositingInputChange);
        }
    }

    fn update_compositing_mode(&mut self, enabled: bool) -> bool {
        if enabled == self.compositing {
            return false;
        }
        self.compositing = enabled;
        if enabled {
            log::debug!(target: "compositing", "entering compositing mode");
            self.ensure_root_layer();
        } else {
            log::debug!(target: "compositing", "leaving compositing mode");
            self.destroy_root_layer();
        }
        self.attach_root_layer();
        true
    }

    fn ensure_root_layer(&mut self) {
        if self.scaffold.is_some() {
            return;
        }
        let create = |graphics: &mut GraphicsLayerTree, role: CompositorLayerRole| {
            graphics.create(
                compositor_layer_name(role).to_owned(),
                GraphicsLayerClient::Compositor(role),
                GraphicsLayerPurpose::Compositor(role),
            )
        };
        let scaffold = RootScaffold {
            overflow_controls_host: create(&mut self.graphics, CompositorLayerRole::OverflowControlsHost),
            container: create(&mut self.graphics, CompositorLayerRole::Container),
            scroll: create(&mut self.graphics, CompositorLayerRole::Scroll),
            root_content: create(&mut self.graphics, CompositorLayerRole::RootContent),
        };
        self.graphics
            .add_child(scaffold.overflow_controls_host, scaffold.container);
        self.graphics.add_child(scaffold.container, scaffold.scroll);
        self.graphics.add_child(scaffold.scroll, scaffold.root_content);
        self.scaffold = Some(scaffold);
        self.update_root_layer_geometry();
        self.update_root_layer_position();
    }

    fn destroy_root_layer(&mut self) {
        let Some(scaffold) = self.scaffold.take() else {
            return;
        };
        for id in [
            scaffold.root_content,
            scaffold.scroll,
            scaffold.container,
            scaffold.overflow_controls_host,
        ] {
            self.graphics.remove_all_children(id);
            self.graphics.remove_from_parent(id);
            self.graphics.destroy(id);
        }
    }

    /// Hand the scaffold root to the host; a missing host is a no-op.
    pub fn attach_root_layer(&mut self) {
        let root = self.root_graphics_layer();
        if let Some(host) = self.host.as_mut() {
            host.attach_root_graphics_layer(root);
        }
    }

    fn update_root_layer_geometry(&mut self) {
        let Some(scaffold) = self.scaffold else {
            return;
        };
        let root = self.layers.layer(self.layers.root());
        let viewport = root.size().rounded();
        let contents = root.contents_size().rounded();
        let contents_size = IntSize::new(
            contents.width.max(viewport.width),
            contents.height.max(viewport.height),
        );
        let clips = self.settings.main_frame_clips_content;
        self.graphics
            .update(scaffold.overflow_controls_host, |layer| layer.size = viewport);
        self.graphics.update(scaffold.container, |layer| {
            layer.size = viewport;
            layer.masks_to_bounds = clips;
        });
        self.graphics.update(scaffold.scroll, |layer| layer.size = viewport);
        self.graphics
            .update(scaffold.root_content, |layer| layer.size = contents_size);
    }

    fn update_root_layer_position(&mut self) {
        let Some(scaffold) = self.scaffold else {
            return;
        };
        let offset = -self.frame_scroll_offset.rounded();
        self.graphics.update(scaffold.scroll, |layer| {
            layer.position = IntPoint::zero().moved_by(offset);
        });
    }

    /// The frame was resized to `viewport`.
    ///
    /// # Errors
    /// Returns an error if the root layer cannot be resized.
    pub fn frame_view_did_change_size(&mut self, viewport: LayoutSize) -> Result<()> {
        let root = self.layers.root();
        let frame = LayoutRect::from_origin_size(self.layers.layer(root).frame().location(), viewport);
        self.layers
            .set_frame(root, frame)
            .context("Failed to resize the root layer")?;
        self.update_root_layer_geometry();
        self.set_needs_compositing_update(CompositingUpdateType::AfterGeometryChange);
        Ok(())
    }

    /// The frame scrolled to `offset`.
    pub fn frame_view_did_scroll(&mut self, offset: LayoutSize) {
        self.frame_scroll_offset = offset;
        self.update_root_layer_position();
    }

    /// Remove `layer` and its subtree, tearing down their mappings.
    ///
    /// # Errors
    /// Returns an error if `layer` is not a live, non-root layer.
    pub fn remove_layer(&mut self, layer: LayerId) -> Result<()> {
        if self.layers.get(layer).is_none() {
            return Err(anyhow!("render layer {} does not exist", layer.index()));
        }
        if self.layers.is_root(layer) {
            return Err(anyhow!("the root render layer cannot be removed"));
        }
        self.paint_invalidation_on_compositing_change(layer);
        let subtree: Vec<LayerId> = self.layers.descendants_and_self(layer).collect();
        for id in &subtree {
            if let Some(mapping) = self.mappings.remove(id) {
                mapping.destroy(&mut self.layers, &mut self.graphics);
            }
            let owner = self.layers.layer(*id).grouped_mapping();
            if let Some(mapping) = owner.and_then(|owner| self.mappings.get_mut(&owner)) {
                mapping.remove_render_layer_from_squashing_graphics_layer(*id);
                mapping.set_needs_graphics_layer_update(GraphicsLayerUpdateScope::Subtree);
            }
        }
        self.topmost_scroll_children
            .retain(|parent, child| !subtree.contains(parent) && !subtree.contains(child));
        self.layers.remove_layer(layer)?;
        self.set_needs_compositing_update(CompositingUpdateType::RebuildTree);
        Ok(())
    }

    /// Paint the contents of `graphics_layer` within `clip`.
    pub fn paint_contents(&self, graphics_layer: GraphicsLayerId, painter: &mut dyn LayerPainter, clip: IntRect) {
        let Some(layer) = self.graphics.get(graphics_layer) else {
            return;
        };
        match layer.client {
            GraphicsLayerClient::Mapping(owner) => {
                let Some(mapping) = self.mappings.get(&owner) else {
                    return;
                };
                if mapping.squashing_layer() == Some(graphics_layer) {
                    for info in mapping.squashed_layers() {
                        let dirty = clip.intersect(info.rect_in_squashing_layer());
                        if dirty.is_empty() {
                            continue;
                        }
                        painter.paint_layer(&PaintRequest {
                            graphics_layer,
                            render_layer: info.render_layer,
                            phase: layer.paint_phase,
                            clip: dirty,
                            offset_from_renderer: info.offset_from_renderer,
                            local_clip: info.local_clip_rect_for_squashed_layer,
                        });
                    }
                } else {
                    painter.paint_layer(&PaintRequest {
                        graphics_layer,
                        render_layer: owner,
                        phase: layer.paint_phase,
                        clip,
                        offset_from_renderer: layer.offset_from_renderer,
                        local_clip: LayoutRect::infinite(),
                    });
                }
            }
            GraphicsLayerClient::Compositor(role) => painter.paint_compositor_layer(role, clip),
        }
    }

    /// Name of `graphics_layer` for debug output.
    pub fn debug_name(&self, graphics_layer: GraphicsLayerId) -> String {
        let Some(layer) = self.graphics.get(graphics_layer) else {
            return String::from("<destroyed>");
        };
        match layer.client {
            GraphicsLayerClient::Mapping(owner) => self
                .mappings
                .get(&owner)
                .map_or_else(|| layer.name.clone(), |mapping| mapping.debug_name(&self.layers, layer.purpose)),
            GraphicsLayerClient::Compositor(role) => compositor_layer_name(role).to_owned(),
        }
    }

    /// An animation started on `graphics_layer`; returns the render layer to notify.
    pub fn notify_animation_started(&self, graphics_layer: GraphicsLayerId, monotonic_time: f64) -> Option<LayerId> {
        let layer = self.graphics.get(graphics_layer)?;
        match layer.client {
            GraphicsLayerClient::Mapping(owner) => {
                log::debug!(
                    target: "compositing",
                    "animation started on {} at {monotonic_time}",
                    self.debug_name(graphics_layer)
                );
                Some(owner)
            }
            GraphicsLayerClient::Compositor(_) => None,
        }
    }

    #[inline]
    pub fn is_tracking_paint_invalidations(&self) -> bool {
        self.tracking_paint_invalidations
    }

    pub fn set_tracking_paint_invalidations(&mut self, tracking: bool) {
        self.tracking_paint_invalidations = tracking;
        if !tracking {
            self.paint_invalidations.clear();
        }
    }

    /// Drain the invalidations recorded while tracking.
    pub fn take_paint_invalidations(&mut self) -> Vec<PaintInvalidation> {
        std::mem::take(&mut self.paint_invalidations)
    }

    fn record_paint_invalidations(&mut self, records: impl IntoIterator<Item = PaintInvalidation>) {
        if self.tracking_paint_invalidations {
            self.paint_invalidations.extend(records);
        }
    }

    pub fn layer_tree_snapshot(&self) -> Option<GraphicsLayerSnapshot> {
        self.root_graphics_layer()
            .and_then(|root| self.graphics.snapshot(root))
    }

    /// The composited tree as pretty-printed JSON; `"null"` when not compositing.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn layer_tree_as_text(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.layer_tree_snapshot()).context("Failed to serialize the layer tree")
    }
}

const fn compositor_layer_name(role: CompositorLayerRole) -> &'static str {
    match role {
        CompositorLayerRole::OverflowControlsHost => "Overflow Controls Host Layer",
        CompositorLayerRole::Container => "Frame Clipping Layer",
        CompositorLayerRole::Scroll => "Frame Scrolling Layer",
        CompositorLayerRole::RootContent => "Content Root Layer",
    }
}
