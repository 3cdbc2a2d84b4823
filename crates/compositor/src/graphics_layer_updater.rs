//! Pass 3a: per-mapping configuration and geometry.
//!
//! Visits mappings in paint order, parent before child, so every mapping sees
//! the finished geometry of its compositing container.

use crate::graphics_layer::{GraphicsLayerId, GraphicsLayerTree};
use crate::invalidation::{InvalidationRequest, PaintInvalidation, invalidate_layer};
use crate::mapping::{
    ClipParentInfo, CompositedLayerMapping, CompositingContainerInfo, GraphicsLayerUpdateScope, MappingUpdateContext,
};
use crate::render_layer::{LayerId, RenderLayerTree};
use crate::settings::CompositorSettings;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateType {
    DoNotForceUpdate,
    ForceUpdate,
}

/// Compositing context handed from a layer to its children.
#[derive(Debug, Clone, Copy, Default)]
struct UpdateContext {
    compositing_container: Option<LayerId>,
    compositing_stacking_context: Option<LayerId>,
}

/// What the compositor needs after the update.
#[derive(Debug, Default)]
pub struct GraphicsLayerUpdateResult {
    /// Some mapping added or removed graphics layers.
    pub needs_rebuild_tree: bool,
    pub paint_invalidations: Vec<PaintInvalidation>,
    pub layers_needing_paint_invalidation: Vec<LayerId>,
}

pub struct GraphicsLayerUpdater<'tree> {
    layers: &'tree mut RenderLayerTree,
    graphics: &'tree mut GraphicsLayerTree,
    mappings: &'tree mut HashMap<LayerId, CompositedLayerMapping>,
    settings: &'tree CompositorSettings,
    topmost_scroll_children: &'tree HashMap<LayerId, LayerId>,
    composited: HashSet<LayerId>,
    result: GraphicsLayerUpdateResult,
}

impl<'tree> GraphicsLayerUpdater<'tree> {
    pub fn new(
        layers: &'tree mut RenderLayerTree,
        graphics: &'tree mut GraphicsLayerTree,
        mappings: &'tree mut HashMap<LayerId, CompositedLayerMapping>,
        settings: &'tree CompositorSettings,
        topmost_scroll_children: &'tree HashMap<LayerId, LayerId>,
    ) -> Self {
        let composited = mappings.keys().copied().collect();
        Self {
            layers,
            graphics,
            mappings,
            settings,
            topmost_scroll_children,
            composited,
            result: GraphicsLayerUpdateResult::default(),
        }
    }

    pub fn update(mut self) -> GraphicsLayerUpdateResult {
        let _span = tracing::info_span!("compositing.graphics_layer_update").entered();
        let root = self.layers.root();
        self.update_recursive(root, UpdateType::DoNotForceUpdate, UpdateContext::default());
        self.result
    }

    fn update_recursive(&mut self, id: LayerId, update_type: UpdateType, context: UpdateContext) {
        let mut child_update_type = update_type;
        let mut child_context = context;

        if self.mappings.contains_key(&id) {
            if update_type == UpdateType::ForceUpdate
                || self
                    .mappings
                    .get(&id)
                    .is_some_and(CompositedLayerMapping::needs_graphics_layer_update)
            {
                let layers = &*self.layers;
                let graphics = &*self.graphics;
                let container_info = context.compositing_container.and_then(|container| {
                    self.mappings
                        .get(&container)
                        .map(|mapping| mapping.container_info(layers, graphics))
                });
                if self.update_mapping(id, container_info, context.compositing_stacking_context) {
                    child_update_type = UpdateType::ForceUpdate;
                }
            }
            child_context.compositing_container = Some(id);
            if self.layers.is_stacking_context(id) {
                child_context.compositing_stacking_context = Some(id);
            }
        }

        let children: Vec<LayerId> = self.layers.z_order_lists(id).all().collect();
        for child in children {
            self.update_recursive(child, child_update_type, child_context);
        }
    }

    /// Returns whether the mapping's descendants must be updated too.
    fn update_mapping(
        &mut self,
        id: LayerId,
        container_info: Option<CompositingContainerInfo>,
        compositing_stacking_context: Option<LayerId>,
    ) -> bool {
        let clip_parent = self.clip_parent_info(id);
        let scroll_parent = self.scroll_parent_layer(id);
        let Some(mapping) = self.mappings.get_mut(&id) else {
            return false;
        };
        let mut requests: Vec<InvalidationRequest> = Vec::new();
        if mapping.update_requires_own_backing_store_for_ancestor_reasons(container_info.as_ref(), &mut requests) {
            mapping.set_needs_graphics_layer_update(GraphicsLayerUpdateScope::Subtree);
        }

        let mut ctx = MappingUpdateContext {
            layers: &mut *self.layers,
            graphics: &mut *self.graphics,
            settings: self.settings,
            composited: &self.composited,
            container: container_info,
            compositing_stacking_context,
            clip_parent,
            scroll_parent,
            reparents_overflow_controls: self.topmost_scroll_children.contains_key(&id),
            layers_needing_paint_invalidation: &mut self.result.layers_needing_paint_invalidation,
            invalidation_requests: &mut requests,
        };
        if mapping.update_graphics_layer_configuration(&mut ctx) {
            self.result.needs_rebuild_tree = true;
        }
        mapping.update_graphics_layer_geometry(&mut ctx);
        let forces_subtree_update = mapping.forces_subtree_update();
        mapping.clear_needs_graphics_layer_update();

        for request in requests {
            let record = invalidate_layer(self.layers, self.mappings, self.graphics, request.layer, request.state);
            self.result.paint_invalidations.push(record);
        }
        forces_subtree_update
    }

    /// Clip source of an unclipped descendant: the mapping its clip parent
    /// paints into.
    fn clip_parent_info(&self, id: LayerId) -> Option<ClipParentInfo> {
        let inputs = self.layers.layer(id).ancestor_dependent_inputs();
        let clip_parent = inputs.clip_parent.filter(|_| inputs.is_unclipped_descendant)?;
        let (owner, mapping) = std::iter::once(clip_parent)
            .chain(self.layers.compositing_ancestors(clip_parent))
            .find_map(|layer| self.mappings.get(&layer).map(|mapping| (layer, mapping)))?;
        Some(ClipParentInfo {
            layer: clip_parent,
            graphics_layer: mapping.parent_for_sublayers(),
            clips_with_own_layer: owner == clip_parent
                && (mapping.has_clipping_layer() || mapping.has_scrolling_layer()),
        })
    }

    fn scroll_parent_layer(&self, id: LayerId) -> Option<GraphicsLayerId> {
        if !self.settings.prefer_compositing_to_lcd_text {
            return None;
        }
        let scroller = self.layers.layer(id).ancestor_dependent_inputs().scroll_parent?;
        self.mappings
            .get(&scroller)
            .and_then(CompositedLayerMapping::scrolling_contents_layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{IntPoint, IntSize, LayoutRect, LayoutSize};
    use crate::render_layer::LayerStyle;
    use anyhow::{Context as _, Result};

    /// A mapping nested in a mapped parent is positioned relative to it.
    #[test]
    fn child_geometry_is_relative_to_container() -> Result<()> {
        let mut layers = RenderLayerTree::new(LayerStyle::default(), LayoutSize::new(800.0, 600.0));
        let root = layers.root();
        let promoted = LayerStyle {
            will_change_compositing: true,
            ..LayerStyle::default()
        };
        let outer = layers.append_child(root, "outer", promoted.clone(), LayoutRect::new(10.0, 20.0, 200.0, 200.0))?;
        let inner = layers.append_child(outer, "inner", promoted, LayoutRect::new(5.0, 5.0, 50.0, 50.0))?;

        let mut graphics = GraphicsLayerTree::new();
        let mut mappings = HashMap::new();
        for id in [root, outer, inner] {
            mappings.insert(id, CompositedLayerMapping::new(id, &layers, &mut graphics));
        }
        crate::inputs_updater::CompositingInputsUpdater::new(&mut layers, &mut mappings).update();

        let settings = CompositorSettings::default();
        let scroll_children = HashMap::new();
        let result =
            GraphicsLayerUpdater::new(&mut layers, &mut graphics, &mut mappings, &settings, &scroll_children)
                .update();
        assert!(!result.needs_rebuild_tree);

        let inner_layer = graphics
            .get(mappings[&inner].main_graphics_layer())
            .context("inner primary layer")?;
        assert_eq!(inner_layer.position, IntPoint::new(5, 5));
        assert_eq!(inner_layer.size, IntSize::new(50, 50));
        let outer_layer = graphics
            .get(mappings[&outer].main_graphics_layer())
            .context("outer primary layer")?;
        assert_eq!(outer_layer.position, IntPoint::new(10, 20));
        assert!(mappings.values().all(|mapping| !mapping.needs_graphics_layer_update()));
        Ok(())
    }
}
