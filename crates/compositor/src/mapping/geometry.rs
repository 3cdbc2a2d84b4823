//! Placement of a mapping's graphics layers.
//!
//! Everything is computed relative to the compositing container: the primary
//! layer is positioned inside whichever of the container's layers adopts it
//! (child containment, child transform, scrolling contents or primary), and
//! the fractional part of the offset is carried down as the owner's subpixel
//! accumulation so nested layers snap against absolute pixels.

use super::{CompositedLayerMapping, CompositingContainerInfo, GraphicsLayerPaintInfo, MappingUpdateContext};
use crate::geometry::{IntPoint, IntRect, IntSize, LayoutPoint, LayoutRect, LayoutSize};
use crate::graphics_layer::{GraphicsLayerId, GraphicsLayerTree};
use crate::render_layer::{LayerId, RenderLayerTree};
use smallvec::SmallVec;
use std::collections::HashSet;

/// Bounds of `layer` and everything painting into its backing, in its local space.
///
/// Descendants that own a mapping or are squashed elsewhere are skipped
/// together with their subtrees. A clipping layer is bounded by its clip box.
pub fn bounding_box_for_compositing(
    layers: &RenderLayerTree,
    composited: &HashSet<LayerId>,
    layer: LayerId,
) -> LayoutRect {
    let render_layer = layers.layer(layer);
    let mut bounds = render_layer.local_bounding_box();
    unite_painted_descendants(layers, composited, layer, layer, &mut bounds);
    if render_layer.style().has_clip_or_overflow_clip() {
        bounds = bounds.intersect(render_layer.clip_box());
    }
    bounds
}

fn paints_into_ancestor(layers: &RenderLayerTree, composited: &HashSet<LayerId>, id: LayerId) -> bool {
    !composited.contains(&id) && layers.layer(id).grouped_mapping().is_none()
}

fn unite_painted_descendants(
    layers: &RenderLayerTree,
    composited: &HashSet<LayerId>,
    ancestor: LayerId,
    id: LayerId,
    bounds: &mut LayoutRect,
) {
    for child in layers.z_order_lists(id).all() {
        if !paints_into_ancestor(layers, composited, child) {
            continue;
        }
        let local = layers.layer(child).local_bounding_box();
        *bounds = bounds.unite(layers.map_rect_to_ancestor(child, Some(ancestor), local));
        unite_painted_descendants(layers, composited, ancestor, child, bounds);
    }
}

/// Whether some descendant painting into this layer's backing has visible content.
pub fn has_visible_non_compositing_descendant(
    layers: &RenderLayerTree,
    composited: &HashSet<LayerId>,
    layer: LayerId,
) -> bool {
    layers.z_order_lists(layer).all().any(|child| {
        paints_into_ancestor(layers, composited, child)
            && (layers.layer(child).style().has_visible_content
                || has_visible_non_compositing_descendant(layers, composited, child))
    })
}

#[inline]
fn to_point(size: IntSize) -> IntPoint {
    IntPoint::zero().moved_by(size)
}

#[inline]
fn to_size(point: IntPoint) -> IntSize {
    point.offset_from(IntPoint::zero())
}

/// Origin of the graphics layer that adopts a child mapping, in the
/// container's coordinates.
fn graphics_layer_parent_location(container: Option<&CompositingContainerInfo>) -> IntPoint {
    let Some(info) = container else {
        return IntPoint::zero();
    };
    if let Some(scroll_offset) = info.composited_scroll_offset {
        return to_point(-scroll_offset.rounded());
    }
    if let Some(clip_box) = info.child_clip_box {
        return clip_box
            .location()
            .moved_by(info.subpixel_accumulation.rounded());
    }
    if info.has_child_transform_layer {
        return to_point(info.subpixel_accumulation.rounded());
    }
    info.local_bounds.location()
}

impl CompositedLayerMapping {
    /// Position and size every graphics layer of the mapping.
    ///
    /// Squashed layers whose offset inside the squashing layer moved are
    /// pushed to the context's paint invalidation list.
    pub fn update_graphics_layer_geometry(&mut self, ctx: &mut MappingUpdateContext<'_>) {
        let layers = &*ctx.layers;
        let composited = ctx.composited;
        let graphics = &mut *ctx.graphics;
        let owner_id = self.owning_layer;
        let owner = layers.layer(owner_id);
        let style = owner.style();
        let container = ctx.container;

        self.composited_bounds = bounding_box_for_compositing(layers, composited, owner_id);

        let mut offset_from_ancestor =
            layers.convert_to_layer_coords(owner_id, container.map(|info| info.layer));
        if let Some(info) = container {
            offset_from_ancestor = offset_from_ancestor.moved_by(info.subpixel_accumulation);
        }
        let snapped_offset = offset_from_ancestor.rounded();
        let subpixel_accumulation = offset_from_ancestor.offset_from(snapped_offset.to_layout());
        let local_bounds = self
            .composited_bounds
            .moved_by(subpixel_accumulation)
            .pixel_snapped();
        let relative_bounds = local_bounds.moved_by(to_size(snapped_offset));
        self.local_bounds = local_bounds;

        let mut parent_location = graphics_layer_parent_location(container.as_ref());

        if let (Some(info), Some(clip_layer)) = (container, self.ancestor_clipping_layer) {
            let clip = match ctx.clip_parent {
                Some(clip_parent) => {
                    layers.containing_block_clip_through(owner_id, clip_parent.layer, info.layer)
                }
                None => layers.clip_rect_relative_to(owner_id, info.layer, false),
            };
            let parent_clip = clip.unwrap_or_else(LayoutRect::infinite).pixel_snapped();
            graphics.update(clip_layer, |layer| {
                layer.position = to_point(parent_clip.location().offset_from(parent_location));
                layer.size = parent_clip.size();
                layer.offset_from_renderer = parent_clip.location().offset_from(snapped_offset);
            });
            parent_location = parent_clip.location();
        }

        let mut resized: SmallVec<GraphicsLayerId, 4> = SmallVec::new();
        let contents_visible = style.has_visible_content
            || has_visible_non_compositing_descendant(layers, composited, owner_id);
        let size = owner.size();
        let transform_origin = LayoutPoint::new(
            size.width / 2.0 - local_bounds.x as f32,
            size.height / 2.0 - local_bounds.y as f32,
        );
        let primary = self.graphics_layer;
        graphics.update(primary, |layer| {
            layer.position = to_point(relative_bounds.location().offset_from(parent_location));
            if layer.size != relative_bounds.size() {
                layer.size = relative_bounds.size();
                resized.push(primary);
            }
            layer.offset_from_renderer = to_size(local_bounds.location());
            layer.contents_visible = contents_visible;
            layer.backface_visible = !style.backface_hidden;
            layer.opacity = style.opacity;
            layer.transform = style.transform.unwrap_or_default();
            layer.transform_origin = transform_origin;
        });

        let squashed_subpixels = self.update_squashing_layer_geometry(
            layers,
            composited,
            graphics,
            LayoutPoint::new(
                offset_from_ancestor.x - parent_location.x as f32,
                offset_from_ancestor.y - parent_location.y as f32,
            ),
            ctx.layers_needing_paint_invalidation,
        );

        if let Some(containment) = self.child_containment_layer {
            let clip_box = owner.clip_box().pixel_snapped();
            graphics.update(containment, |layer| {
                layer.position = to_point(
                    clip_box.location().offset_from(local_bounds.location())
                        + subpixel_accumulation.rounded(),
                );
                layer.size = clip_box.size();
                layer.offset_from_renderer = to_size(clip_box.location());
            });
        }

        let mut child_transform_position = IntPoint::zero();
        if let Some(child_transform) = self.child_transform_layer {
            let border_box = owner.local_bounding_box().pixel_snapped();
            child_transform_position = to_point(-to_size(local_bounds.location()));
            graphics.update(child_transform, |layer| {
                layer.size = border_box.size();
                layer.position = child_transform_position;
                layer.transform_origin = LayoutPoint::new(size.width / 2.0, size.height / 2.0);
            });
        }

        for mask in [self.mask_layer, self.child_clipping_mask_layer]
            .into_iter()
            .flatten()
        {
            graphics.update(mask, |layer| {
                layer.position = IntPoint::zero();
                layer.size = relative_bounds.size();
                layer.offset_from_renderer = to_size(local_bounds.location());
            });
        }

        if let Some(foreground) = self.foreground_layer {
            let (foreground_size, foreground_offset) = if self.child_containment_layer.is_some() {
                let clip_box = owner.clip_box().pixel_snapped();
                (clip_box.size(), to_size(clip_box.location()))
            } else {
                (relative_bounds.size(), to_size(local_bounds.location()))
            };
            let foreground_position = if self.child_transform_layer.is_some() {
                to_point(-to_size(child_transform_position))
            } else {
                IntPoint::zero()
            };
            graphics.update(foreground, |layer| {
                layer.position = foreground_position;
                if layer.size != foreground_size {
                    layer.size = foreground_size;
                    resized.push(foreground);
                }
                layer.offset_from_renderer = foreground_offset;
            });
        }

        if let Some(background) = self.background_layer {
            let background_size = if self.background_layer_paints_fixed_root_background {
                layers.layer(layers.root()).size().rounded()
            } else {
                relative_bounds.size()
            };
            graphics.update(background, |layer| {
                layer.position = IntPoint::zero();
                if layer.size != background_size {
                    layer.size = background_size;
                    resized.push(background);
                }
                layer.offset_from_renderer = to_size(local_bounds.location());
            });
        }

        if let (Some(scrolling), Some(contents)) =
            (self.scrolling_layer, self.scrolling_contents_layer)
        {
            let scroll_offset = owner.scroll_offset().rounded();
            let contents_size = owner.contents_size().rounded();
            graphics.update(scrolling, |layer| {
                layer.position = to_point(
                    -to_size(local_bounds.location()) + subpixel_accumulation.rounded(),
                );
                layer.size = size.rounded();
                layer.offset_from_renderer = IntSize::zero();
            });
            graphics.update(contents, |layer| {
                layer.position = to_point(-scroll_offset);
                if layer.size != contents_size {
                    layer.size = contents_size;
                    resized.push(contents);
                }
                layer.offset_from_renderer = -scroll_offset;
            });
        }

        self.update_overflow_controls_host_layer_geometry(
            layers,
            graphics,
            container,
            ctx.compositing_stacking_context,
            ctx.reparents_overflow_controls,
        );

        self.update_draws_content(layers, composited, graphics);
        let contents_rect = style.accelerated_content.map(|_| {
            let snapped_size = size.rounded();
            IntRect::new(-local_bounds.x, -local_bounds.y, snapped_size.width, snapped_size.height)
        });
        graphics.update(primary, |layer| layer.contents_rect = contents_rect);

        for id in resized {
            graphics.set_needs_display(id);
        }

        ctx.layers.layer_mut(owner_id).subpixel_accumulation = subpixel_accumulation;
        for (layer, subpixel) in squashed_subpixels {
            ctx.layers.layer_mut(layer).subpixel_accumulation = subpixel;
        }
    }

    /// Lay out the squashing layer around its squashed layers.
    ///
    /// `offset_to_parent` is the owner's offset from the graphics layer that
    /// hosts the squashing layer. Returns each squashed layer's new subpixel
    /// accumulation.
    fn update_squashing_layer_geometry(
        &mut self,
        layers: &RenderLayerTree,
        composited: &HashSet<LayerId>,
        graphics: &mut GraphicsLayerTree,
        offset_to_parent: LayoutPoint,
        layers_needing_paint_invalidation: &mut Vec<LayerId>,
    ) -> Vec<(LayerId, LayoutSize)> {
        let Some(squashing_layer) = self.squashing_layer else {
            return Vec::new();
        };
        let offset_to_parent_size = offset_to_parent.offset_from(LayoutPoint::zero());
        let reference_offset = layers.offset_from_transformed_ancestor(self.owning_layer);

        let mut total_bounds = LayoutRect::default();
        for info in &mut self.squashed_layers {
            let bounds = bounding_box_for_compositing(layers, composited, info.render_layer);
            info.composited_bounds = bounds;
            let offset_from_owner = layers
                .offset_from_transformed_ancestor(info.render_layer)
                .offset_from(reference_offset);
            total_bounds = total_bounds.unite(bounds.moved_by(offset_from_owner));
        }

        let squash_bounds = total_bounds
            .moved_by(offset_to_parent_size)
            .enclosing_int_rect();
        let origin_in_owner_space = squash_bounds.location().to_layout().offset_from(offset_to_parent);

        let mut subpixels = Vec::with_capacity(self.squashed_layers.len());
        for info in &mut self.squashed_layers {
            let offset_from_origin = layers
                .offset_from_transformed_ancestor(info.render_layer)
                .offset_from(reference_offset)
                - origin_in_owner_space;
            let offset_from_renderer = -offset_from_origin.rounded();
            let subpixel = offset_from_origin + offset_from_renderer.to_layout();
            if info.offset_from_renderer_set && info.offset_from_renderer != offset_from_renderer {
                layers_needing_paint_invalidation.push(info.render_layer);
            }
            info.offset_from_renderer = offset_from_renderer;
            info.offset_from_renderer_set = true;
            subpixels.push((info.render_layer, subpixel));
        }

        graphics.update(squashing_layer, |layer| {
            layer.position = squash_bounds.location();
            layer.size = squash_bounds.size();
            layer.offset_from_renderer = origin_in_owner_space.rounded();
        });
        self.squashing_layer_offset_from_transformed_ancestor =
            reference_offset.moved_by(origin_in_owner_space);

        let reference_clipping_container = layers
            .layer(self.owning_layer)
            .ancestor_dependent_inputs()
            .clipping_container;
        let clip_rects: Vec<LayoutRect> = self
            .squashed_layers
            .iter()
            .map(|info| self.local_clip_rect_for_squashed_layer(layers, reference_clipping_container, info))
            .collect();
        for (info, clip_rect) in self.squashed_layers.iter_mut().zip(clip_rects) {
            info.local_clip_rect_for_squashed_layer = clip_rect;
        }
        subpixels
    }

    /// Clip a squashed layer needs from an earlier squashed ancestor, in its own space.
    fn local_clip_rect_for_squashed_layer(
        &self,
        layers: &RenderLayerTree,
        reference_clipping_container: Option<LayerId>,
        info: &GraphicsLayerPaintInfo,
    ) -> LayoutRect {
        let clipping_container = layers
            .layer(info.render_layer)
            .ancestor_dependent_inputs()
            .clipping_container;
        if clipping_container == reference_clipping_container {
            return LayoutRect::infinite();
        }
        let Some(ancestor) = clipping_container.and_then(|container| {
            self.containing_squashed_layer(layers, container, self.squashed_layers.len())
        }) else {
            return LayoutRect::infinite();
        };
        layers
            .clip_rect_relative_to(info.render_layer, ancestor.render_layer, true)
            .map_or_else(LayoutRect::infinite, |clip| {
                clip.moved_by((info.offset_from_renderer - ancestor.offset_from_renderer).to_layout())
            })
    }

    fn update_overflow_controls_host_layer_geometry(
        &self,
        layers: &RenderLayerTree,
        graphics: &mut GraphicsLayerTree,
        container: Option<CompositingContainerInfo>,
        stacking_context: Option<LayerId>,
        reparents_overflow_controls: bool,
    ) {
        let Some(host) = self.overflow_controls_host_layer else {
            return;
        };
        let owner = layers.layer(self.owning_layer);
        let mut host_position = IntPoint::zero();
        if reparents_overflow_controls {
            match (self.overflow_controls_clipping_layer, self.ancestor_clipping_layer) {
                (Some(clip), Some(ancestor_clip)) => {
                    let Some((position, size, offset)) = graphics
                        .get(ancestor_clip)
                        .map(|layer| (layer.position, layer.size, layer.offset_from_renderer))
                    else {
                        return;
                    };
                    let offset_from_stacking_context = stacking_context
                        .zip(container)
                        .filter(|(context, info)| *context != info.layer)
                        .map(|(context, info)| {
                            to_size(
                                layers
                                    .convert_to_layer_coords(info.layer, Some(context))
                                    .rounded(),
                            )
                        })
                        .unwrap_or_default();
                    let clip_position = position.moved_by(offset_from_stacking_context);
                    graphics.update(clip, |layer| {
                        layer.position = clip_position;
                        layer.size = size;
                        layer.offset_from_renderer = offset;
                    });
                    host_position = to_point(-offset);
                }
                _ => {
                    let mut position =
                        layers.convert_to_layer_coords(self.owning_layer, stacking_context);
                    if let Some(context) = stacking_context {
                        position = position.moved_by(layers.layer(context).scroll_offset());
                    }
                    host_position = position.rounded();
                }
            }
        } else if let Some(primary) = graphics.get(self.graphics_layer) {
            host_position = to_point(-primary.offset_from_renderer);
        }
        let border_box = owner.local_bounding_box().pixel_snapped();
        graphics.update(host, |layer| {
            layer.position = host_position;
            layer.size = border_box.size();
            layer.masks_to_bounds = true;
        });
    }

    fn update_draws_content(
        &self,
        layers: &RenderLayerTree,
        composited: &HashSet<LayerId>,
        graphics: &mut GraphicsLayerTree,
    ) {
        let owner = layers.layer(self.owning_layer);
        let style = owner.style();
        let has_visible_descendant =
            has_visible_non_compositing_descendant(layers, composited, self.owning_layer);

        if let Some(contents) = self.scrolling_contents_layer {
            let scrolled_content = style.has_visible_content || has_visible_descendant;
            graphics.update(self.graphics_layer, |layer| {
                layer.draws_content = style.has_visible_content;
            });
            graphics.update(contents, |layer| layer.draws_content = scrolled_content);
        } else {
            let has_painted_content = !self.paints_into_composited_ancestor()
                && style.accelerated_content.is_none()
                && (style.has_visible_content || has_visible_descendant);
            for id in [Some(self.graphics_layer), self.foreground_layer, self.background_layer]
                .into_iter()
                .flatten()
            {
                graphics.update(id, |layer| layer.draws_content = has_painted_content);
            }
        }

        if let Some(squashing) = self.squashing_layer {
            let has_squashed_layers = !self.squashed_layers.is_empty();
            graphics.update(squashing, |layer| layer.draws_content = has_squashed_layers);
        }
        for mask in [self.mask_layer, self.child_clipping_mask_layer]
            .into_iter()
            .flatten()
        {
            graphics.update(mask, |layer| layer.draws_content = true);
        }
    }
}
