//! Routing of repaints to the graphics layer that holds a render layer's pixels.

use crate::graphics_layer::GraphicsLayerTree;
use crate::mapping::CompositedLayerMapping;
use crate::render_layer::{LayerId, RenderLayerTree};
use serde::Serialize;
use std::collections::HashMap;

/// Where a render layer's painted output currently ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CompositingState {
    /// Painted into the backing of a composited ancestor.
    NotComposited,
    /// Has a mapping that owns a backing store.
    PaintsIntoOwnBacking,
    /// Has a mapping but its contents paint into the ancestor's backing.
    HasOwnBackingButPaintsIntoAncestor,
    /// Painted into the squashing layer of an earlier mapping.
    PaintsIntoGroupedBacking,
}

impl CompositingState {
    /// State of `layer` as implied by the current mapping table.
    pub fn of(
        layers: &RenderLayerTree,
        mappings: &HashMap<LayerId, CompositedLayerMapping>,
        layer: LayerId,
    ) -> Self {
        match mappings.get(&layer) {
            Some(mapping) => mapping.compositing_state(),
            None if layers
                .get(layer)
                .is_some_and(|render_layer| render_layer.grouped_mapping().is_some()) =>
            {
                Self::PaintsIntoGroupedBacking
            }
            None => Self::NotComposited,
        }
    }

    /// Whether a layer in this state holds pixels of its own.
    #[inline]
    pub const fn is_paint_container(self) -> bool {
        matches!(
            self,
            Self::PaintsIntoOwnBacking | Self::PaintsIntoGroupedBacking
        )
    }
}

/// A repaint that must be routed against a state captured earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationRequest {
    pub layer: LayerId,
    pub state: CompositingState,
}

/// Record of one routed repaint, kept while paint invalidation tracking is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaintInvalidation {
    pub layer: LayerId,
    pub compositing_state: CompositingState,
    /// Layer whose graphics layers received the repaint; `None` when nothing did.
    pub paint_container: Option<LayerId>,
}

/// Repaint everything `layer` painted, as if it were in `state`.
///
/// Layers painting into an ancestor are routed to the nearest compositing
/// ancestor that holds pixels of its own.
pub fn invalidate_layer(
    layers: &RenderLayerTree,
    mappings: &HashMap<LayerId, CompositedLayerMapping>,
    graphics: &mut GraphicsLayerTree,
    layer: LayerId,
    state: CompositingState,
) -> PaintInvalidation {
    let paint_container = if state.is_paint_container() {
        Some(layer)
    } else {
        layers
            .compositing_ancestors(layer)
            .find(|ancestor| CompositingState::of(layers, mappings, *ancestor).is_paint_container())
    };
    match paint_container {
        Some(container) if container == layer => {
            repaint_target(layers, mappings, graphics, layer, state);
        }
        Some(container) => {
            let container_state = CompositingState::of(layers, mappings, container);
            repaint_target(layers, mappings, graphics, container, container_state);
        }
        None => {
            log::debug!(target: "compositing", "no paint container for layer {}", layer.index());
        }
    }
    PaintInvalidation {
        layer,
        compositing_state: state,
        paint_container,
    }
}

fn repaint_target(
    layers: &RenderLayerTree,
    mappings: &HashMap<LayerId, CompositedLayerMapping>,
    graphics: &mut GraphicsLayerTree,
    layer: LayerId,
    state: CompositingState,
) {
    match state {
        CompositingState::PaintsIntoOwnBacking => {
            if let Some(mapping) = mappings.get(&layer) {
                mapping.set_contents_need_display(graphics);
            }
        }
        CompositingState::PaintsIntoGroupedBacking => {
            let owner = layers.get(layer).and_then(|render_layer| render_layer.grouped_mapping());
            if let Some(mapping) = owner.and_then(|owner| mappings.get(&owner)) {
                mapping.set_squashed_layer_needs_display(graphics, layer);
            }
        }
        CompositingState::NotComposited | CompositingState::HasOwnBackingButPaintsIntoAncestor => {}
    }
}
