//! Pass 1: ancestor-dependent compositing inputs.
//!
//! One pre-order walk recomputes the inputs of every dirty layer from its
//! already-updated parent. Inputs of a clean layer whose ancestors are clean
//! are left untouched, so the walk only descends where a child flag is set.

use crate::geometry::IntRect;
use crate::mapping::{CompositedLayerMapping, GraphicsLayerUpdateScope};
use crate::render_layer::{AncestorDependentCompositingInputs, LayerId, RenderLayerTree};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateType {
    DoNotForceUpdate,
    ForceUpdate,
}

/// Context handed from a layer to its children.
#[derive(Debug, Clone, Copy, Default)]
struct AncestorInfo {
    has_ancestor_with_clip_or_overflow_clip: bool,
    last_scrolling_ancestor: Option<LayerId>,
    ancestor_stacking_context: Option<LayerId>,
}

pub struct CompositingInputsUpdater<'tree> {
    layers: &'tree mut RenderLayerTree,
    mappings: &'tree mut HashMap<LayerId, CompositedLayerMapping>,
}

impl<'tree> CompositingInputsUpdater<'tree> {
    pub fn new(
        layers: &'tree mut RenderLayerTree,
        mappings: &'tree mut HashMap<LayerId, CompositedLayerMapping>,
    ) -> Self {
        Self { layers, mappings }
    }

    /// Bring every layer's inputs up to date and clear the dirty bits.
    pub fn update(&mut self) {
        let _span = tracing::info_span!("compositing.inputs").entered();
        let root = self.layers.root();
        self.update_recursive(root, UpdateType::DoNotForceUpdate, AncestorInfo::default());
    }

    fn update_recursive(&mut self, id: LayerId, update_type: UpdateType, info: AncestorInfo) {
        let (needs_update, child_needs_update) = {
            let current = self.layers.layer(id);
            (
                current.needs_compositing_inputs_update(),
                current.child_needs_compositing_inputs_update(),
            )
        };
        if !needs_update && !child_needs_update && update_type == UpdateType::DoNotForceUpdate {
            return;
        }

        let mut update_type = update_type;
        if needs_update {
            self.mark_mappings_for_subtree_update(id);
            update_type = UpdateType::ForceUpdate;
        }

        if update_type == UpdateType::ForceUpdate {
            let inputs = self.compute_ancestor_dependent_inputs(id, &info);
            log::trace!(
                target: "compositing",
                "inputs of {}: bounds {:?}, clipping container {:?}",
                self.layers.layer(id).name(),
                inputs.clipped_absolute_bounding_box,
                inputs.clipping_container.map(LayerId::index)
            );
            self.layers.layer_mut(id).ancestor_inputs = inputs;
        }

        let layer = self.layers.layer(id);
        let style = layer.style();
        let mut child_info = info;
        if style.has_clip_or_overflow_clip() {
            child_info.has_ancestor_with_clip_or_overflow_clip = true;
        }
        if layer.scrolls_overflow() {
            child_info.last_scrolling_ancestor = Some(id);
        }
        if self.layers.is_stacking_context(id) {
            child_info.ancestor_stacking_context = Some(id);
        }

        let children: Vec<LayerId> = self.layers.children(id).collect();
        let mut has_descendant_with_clip_path = false;
        for child in children {
            self.update_recursive(child, update_type, child_info);
            let child_layer = self.layers.layer(child);
            has_descendant_with_clip_path |= child_layer.style().has_clip_path
                || child_layer.descendant_dependent_inputs().has_descendant_with_clip_path;
        }

        let updated = self.layers.layer_mut(id);
        updated.descendant_inputs.has_descendant_with_clip_path = has_descendant_with_clip_path;
        updated.needs_compositing_inputs_update = false;
        updated.child_needs_compositing_inputs_update = false;
    }

    /// A dirty layer invalidates the graphics layers it paints into.
    fn mark_mappings_for_subtree_update(&mut self, id: LayerId) {
        let squashing_owner = self.layers.layer(id).grouped_mapping();
        let enclosing = self
            .layers
            .compositing_ancestors(id)
            .find(|ancestor| self.mappings.contains_key(ancestor));
        for owner in [Some(id), enclosing, squashing_owner].into_iter().flatten() {
            if let Some(mapping) = self.mappings.get_mut(&owner) {
                mapping.set_needs_graphics_layer_update(GraphicsLayerUpdateScope::Subtree);
            }
        }
    }

    fn compute_ancestor_dependent_inputs(
        &self,
        id: LayerId,
        info: &AncestorInfo,
    ) -> AncestorDependentCompositingInputs {
        let layers = &*self.layers;
        let layer = layers.layer(id);
        let absolute_box = layers
            .map_to_absolute(id, layer.local_bounding_box())
            .enclosing_int_rect();
        let clip = layers.background_clip_rect(id);
        let mut clipped_box = if clip.is_infinite() {
            absolute_box
        } else {
            absolute_box.intersect(clip.pixel_snapped())
        };
        // Empty boxes would never overlap anything; keep a pixel so they still can.
        if clipped_box.is_empty() {
            clipped_box = IntRect::new(clipped_box.x, clipped_box.y, 1, 1);
        }

        let Some(parent) = layers.parent(id) else {
            return AncestorDependentCompositingInputs {
                clipped_absolute_bounding_box: clipped_box,
                ..AncestorDependentCompositingInputs::default()
            };
        };

        let parent_layer = layers.layer(parent);
        let parent_style = parent_layer.style();
        let parent_inputs = parent_layer.ancestor_dependent_inputs();
        let mut inputs = AncestorDependentCompositingInputs {
            clipped_absolute_bounding_box: clipped_box,
            opacity_ancestor: if parent_style.is_transparent() {
                Some(parent)
            } else {
                parent_inputs.opacity_ancestor
            },
            transform_ancestor: if parent_style.has_transform() {
                Some(parent)
            } else {
                parent_inputs.transform_ancestor
            },
            filter_ancestor: if parent_style.has_filter {
                Some(parent)
            } else {
                parent_inputs.filter_ancestor
            },
            ..AncestorDependentCompositingInputs::default()
        };

        let containing_layer = layers.containing_layer(id);
        if info.has_ancestor_with_clip_or_overflow_clip {
            inputs.clipping_container = containing_layer.and_then(|container| {
                let container_layer = layers.layer(container);
                if container_layer.style().has_clip_or_overflow_clip() {
                    Some(container)
                } else {
                    container_layer.ancestor_dependent_inputs().clipping_container
                }
            });
        }

        if info.last_scrolling_ancestor.is_some() {
            inputs.ancestor_scrolling_layer = containing_layer.and_then(|container| {
                let container_layer = layers.layer(container);
                if container_layer.scrolls_overflow() {
                    Some(container)
                } else {
                    container_layer.ancestor_dependent_inputs().ancestor_scrolling_layer
                }
            });

            if layer.style().position.is_out_of_flow() {
                inputs.clip_parent = self.unclipped_descendant_clip_parent(id, inputs.clipping_container);
                inputs.is_unclipped_descendant = inputs.clip_parent.is_some();
            }

            // Content stacked outside its scroller must follow it explicitly.
            inputs.scroll_parent = inputs
                .ancestor_scrolling_layer
                .zip(info.ancestor_stacking_context)
                .filter(|(scrolling_layer, stacking_context)| {
                    !layers.is_normal_flow_only(id)
                        && !layers.is_descendant_or_self(*stacking_context, *scrolling_layer)
                })
                .map(|(scrolling_layer, _)| scrolling_layer);
        }

        inputs
    }

    /// Clip parent of an out-of-flow layer that escapes a clip of its paint-order ancestry.
    ///
    /// Walks the compositing containers up to the layer's clipping layer. A
    /// container that clips, or is clipped by something, outside the
    /// clipping layer's ancestry would clip the layer if it were parented
    /// normally.
    fn unclipped_descendant_clip_parent(
        &self,
        id: LayerId,
        clipping_container: Option<LayerId>,
    ) -> Option<LayerId> {
        let layers = &*self.layers;
        let clipping_layer = clipping_container.unwrap_or_else(|| layers.root());
        if id == clipping_layer {
            return None;
        }
        for ancestor in layers.compositing_ancestors(id) {
            if ancestor == clipping_layer {
                break;
            }
            let ancestor_layer = layers.layer(ancestor);
            let clips_outside = ancestor_layer.style().has_clip_or_overflow_clip()
                && !layers.is_descendant_or_self(clipping_layer, ancestor);
            let clipped_outside = ancestor_layer
                .ancestor_dependent_inputs()
                .clipping_container
                .is_some_and(|container| !layers.is_descendant_or_self(clipping_layer, container));
            if clips_outside || clipped_outside {
                log::trace!(
                    target: "compositing",
                    "{} escapes the clip of {}",
                    layers.layer(id).name(),
                    ancestor_layer.name()
                );
                return Some(clipping_layer);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{LayoutRect, LayoutSize};
    use crate::render_layer::{LayerStyle, Position};
    use anyhow::Result;

    fn tree() -> RenderLayerTree {
        RenderLayerTree::new(LayerStyle::default(), LayoutSize::new(800.0, 600.0))
    }

    fn update(layers: &mut RenderLayerTree) {
        let mut mappings = HashMap::new();
        CompositingInputsUpdater::new(layers, &mut mappings).update();
    }

    /// Boxes are clipped by their clipping container and never collapse to nothing.
    #[test]
    fn clipped_boxes_keep_one_pixel() -> Result<()> {
        let mut layers = tree();
        let root = layers.root();
        let clipper = layers.append_child(
            root,
            "clipper",
            LayerStyle {
                overflow_clip: true,
                ..LayerStyle::default()
            },
            LayoutRect::new(10.0, 10.0, 100.0, 100.0),
        )?;
        let plain = LayerStyle::default();
        let partly = layers.append_child(clipper, "partly", plain.clone(), LayoutRect::new(50.0, 50.0, 100.0, 100.0))?;
        let outside = layers.append_child(clipper, "outside", plain, LayoutRect::new(300.0, 0.0, 10.0, 10.0))?;
        update(&mut layers);

        let inputs = layers.layer(partly).ancestor_dependent_inputs();
        assert_eq!(inputs.clipped_absolute_bounding_box, IntRect::new(60, 60, 50, 50));
        assert_eq!(inputs.clipping_container, Some(clipper));
        let outside_box = layers.layer(outside).ancestor_dependent_inputs().clipped_absolute_bounding_box;
        assert_eq!((outside_box.width, outside_box.height), (1, 1));
        assert!(!layers.needs_compositing_inputs_update());
        Ok(())
    }

    /// An empty root view still occupies a pixel for overlap testing.
    #[test]
    fn empty_root_keeps_one_pixel() {
        let mut layers = RenderLayerTree::new(LayerStyle::default(), LayoutSize::zero());
        update(&mut layers);
        let root_box = layers.layer(layers.root()).ancestor_dependent_inputs().clipped_absolute_bounding_box;
        assert_eq!(root_box, IntRect::new(0, 0, 1, 1));
    }

    /// Opacity ancestors skip opaque layers in between.
    #[test]
    fn opacity_ancestor_skips_opaque_layers() -> Result<()> {
        let mut layers = tree();
        let root = layers.root();
        let faded = layers.append_child(
            root,
            "faded",
            LayerStyle {
                opacity: 0.5,
                ..LayerStyle::default()
            },
            LayoutRect::new(0.0, 0.0, 50.0, 50.0),
        )?;
        let middle_frame = LayoutRect::new(0.0, 0.0, 10.0, 10.0);
        let middle = layers.append_child(faded, "middle", LayerStyle::default(), middle_frame)?;
        let leaf = layers.append_child(middle, "leaf", LayerStyle::default(), LayoutRect::new(0.0, 0.0, 5.0, 5.0))?;
        update(&mut layers);

        assert_eq!(layers.layer(middle).ancestor_dependent_inputs().opacity_ancestor, Some(faded));
        assert_eq!(layers.layer(leaf).ancestor_dependent_inputs().opacity_ancestor, Some(faded));
        assert_eq!(layers.layer(faded).ancestor_dependent_inputs().opacity_ancestor, None);
        Ok(())
    }

    /// Positioned content of a scroller that is not its stacking context gets a scroll parent.
    #[test]
    fn positioned_scroll_content_gets_scroll_parent() -> Result<()> {
        let mut layers = tree();
        let root = layers.root();
        let scroller = layers.append_child(
            root,
            "scroller",
            LayerStyle {
                scrollable: true,
                ..LayerStyle::default()
            },
            LayoutRect::new(0.0, 0.0, 100.0, 100.0),
        )?;
        let positioned = layers.append_child(
            scroller,
            "positioned",
            LayerStyle {
                position: Position::Relative,
                ..LayerStyle::default()
            },
            LayoutRect::new(0.0, 0.0, 10.0, 10.0),
        )?;
        update(&mut layers);

        let inputs = layers.layer(positioned).ancestor_dependent_inputs();
        assert_eq!(inputs.ancestor_scrolling_layer, Some(scroller));
        assert_eq!(inputs.scroll_parent, Some(scroller));
        Ok(())
    }

    /// An absolute layer stacked inside a scroller it is not contained by
    /// escapes the scroller's clip; one contained by the scroller does not.
    #[test]
    fn escaping_absolute_layer_gets_a_clip_parent() -> Result<()> {
        let mut layers = tree();
        let root = layers.root();
        let scroller = layers.append_child(
            root,
            "scroller",
            LayerStyle {
                scrollable: true,
                opacity: 0.5,
                ..LayerStyle::default()
            },
            LayoutRect::new(0.0, 0.0, 200.0, 200.0),
        )?;
        let absolute = LayerStyle {
            position: Position::Absolute,
            ..LayerStyle::default()
        };
        let escaping_frame = LayoutRect::new(400.0, 400.0, 50.0, 50.0);
        let escaping = layers.append_child(scroller, "escaping", absolute.clone(), escaping_frame)?;
        let positioned_scroller = LayerStyle {
            position: Position::Relative,
            ..layers.layer(scroller).style().clone()
        };
        let contained_scroller_frame = LayoutRect::new(0.0, 300.0, 200.0, 200.0);
        let contained_scroller =
            layers.append_child(root, "contained scroller", positioned_scroller, contained_scroller_frame)?;
        let contained_frame = LayoutRect::new(10.0, 10.0, 50.0, 50.0);
        let contained = layers.append_child(contained_scroller, "contained", absolute, contained_frame)?;
        update(&mut layers);

        let inputs = layers.layer(escaping).ancestor_dependent_inputs();
        assert!(inputs.is_unclipped_descendant);
        assert_eq!(inputs.clip_parent, Some(root));
        let inputs = layers.layer(contained).ancestor_dependent_inputs();
        assert!(!inputs.is_unclipped_descendant);
        assert_eq!(inputs.clip_parent, None);
        assert_eq!(inputs.clipping_container, Some(contained_scroller));
        Ok(())
    }
}
