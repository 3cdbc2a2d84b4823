//! Pass 3b: global graphics-layer hierarchy.
//!
//! Each mapping's sublayer host receives, in paint order, the outputs of its
//! negative z-order children, its foreground layer, then the outputs of its
//! normal-flow and positive children. Layers without a mapping contribute
//! their descendants' outputs to the enclosing mapping's list.

use crate::graphics_layer::{GraphicsLayerId, GraphicsLayerTree};
use crate::mapping::CompositedLayerMapping;
use crate::render_layer::{LayerId, RenderLayerTree};
use std::collections::HashMap;

pub struct GraphicsLayerTreeBuilder<'tree> {
    layers: &'tree RenderLayerTree,
    graphics: &'tree mut GraphicsLayerTree,
    mappings: &'tree HashMap<LayerId, CompositedLayerMapping>,
    topmost_scroll_children: &'tree HashMap<LayerId, LayerId>,
}

impl<'tree> GraphicsLayerTreeBuilder<'tree> {
    pub fn new(
        layers: &'tree RenderLayerTree,
        graphics: &'tree mut GraphicsLayerTree,
        mappings: &'tree HashMap<LayerId, CompositedLayerMapping>,
        topmost_scroll_children: &'tree HashMap<LayerId, LayerId>,
    ) -> Self {
        Self {
            layers,
            graphics,
            mappings,
            topmost_scroll_children,
        }
    }

    /// Rebuild the hierarchy below `root`.
    ///
    /// Returns the graphics layers to attach under the root content layer.
    pub fn rebuild(&mut self, root: LayerId) -> Vec<GraphicsLayerId> {
        let _span = tracing::info_span!("compositing.rebuild_tree").entered();
        let mut top_level = Vec::new();
        self.rebuild_recursive(root, &mut top_level);
        top_level
    }

    fn rebuild_recursive(&mut self, id: LayerId, enclosing_children: &mut Vec<GraphicsLayerId>) {
        let (layers, mappings, scroll_children) = (self.layers, self.mappings, self.topmost_scroll_children);
        let mapping = mappings.get(&id);
        let mut layer_children: Vec<GraphicsLayerId> = Vec::new();
        let lists = layers.z_order_lists(id);

        {
            let children_list = if mapping.is_some() {
                &mut layer_children
            } else {
                &mut *enclosing_children
            };
            for child in &lists.negative {
                self.rebuild_recursive(*child, children_list);
            }
            // Painted above the negative children, below everything else.
            if let Some(foreground) = mapping.and_then(CompositedLayerMapping::foreground_layer) {
                children_list.push(foreground);
            }
            for child in lists.normal_flow_and_positive() {
                self.rebuild_recursive(child, children_list);
            }
        }

        if let Some(mapping) = mapping {
            let sublayer_host = mapping.parent_for_sublayers();
            self.graphics.set_children(sublayer_host, &layer_children);
            if !scroll_children.contains_key(&id) {
                mapping.reattach_overflow_controls(self.graphics);
            }
            enclosing_children.push(mapping.child_for_superlayers());
        }

        // Overflow controls of a composited scroller stack above its topmost scroll child.
        let scroll_parent = layers.layer(id).ancestor_dependent_inputs().scroll_parent;
        let reparented_controls = scroll_parent
            .filter(|parent| scroll_children.get(parent) == Some(&id))
            .and_then(|parent| mappings.get(&parent))
            .and_then(|parent_mapping| parent_mapping.detach_layer_for_overflow_controls(self.graphics));
        if let Some(controls) = reparented_controls {
            enclosing_children.push(controls);
        }
    }
}
