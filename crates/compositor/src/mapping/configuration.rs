//! Which helper layers a mapping needs, and how they nest.

use super::{CompositedLayerMapping, MappingUpdateContext, toggle_graphics_layer};
use crate::graphics_layer::{GraphicsLayerId, GraphicsLayerPaintingPhase, GraphicsLayerPurpose, GraphicsLayerTree};

impl CompositedLayerMapping {
    /// Create or destroy helper layers to match the owner's current state.
    ///
    /// Returns whether the set of graphics layers changed, in which case the
    /// global hierarchy has to be rebuilt.
    pub fn update_graphics_layer_configuration(&mut self, ctx: &mut MappingUpdateContext<'_>) -> bool {
        let layers = &*ctx.layers;
        let owner_id = self.owning_layer;
        let owner = layers.layer(owner_id);
        let style = owner.style();
        let name = owner.name().to_owned();
        let needs_ancestor_clip = self.needs_ancestor_clip(ctx);
        let graphics = &mut *ctx.graphics;
        let mut hierarchy_changed = false;

        let paints_fixed_root_background = layers.is_root(owner_id)
            && style.has_fixed_background
            && ctx.settings.composited_fixed_root_background;
        hierarchy_changed |= toggle_graphics_layer(
            graphics,
            &mut self.background_layer,
            paints_fixed_root_background,
            owner_id,
            &name,
            GraphicsLayerPurpose::Background,
        );
        self.background_layer_paints_fixed_root_background = paints_fixed_root_background;

        hierarchy_changed |= toggle_graphics_layer(
            graphics,
            &mut self.foreground_layer,
            layers.has_negative_z_order_list(owner_id),
            owner_id,
            &name,
            GraphicsLayerPurpose::Foreground,
        );

        let uses_composited_scrolling =
            ctx.settings.prefer_compositing_to_lcd_text && owner.scrolls_overflow();
        let clips_compositing_descendants =
            owner.has_compositing_descendant() && style.has_clip_or_overflow_clip();

        hierarchy_changed |= toggle_graphics_layer(
            graphics,
            &mut self.ancestor_clipping_layer,
            needs_ancestor_clip,
            owner_id,
            &name,
            GraphicsLayerPurpose::AncestorClipping,
        );
        hierarchy_changed |= toggle_graphics_layer(
            graphics,
            &mut self.child_containment_layer,
            clips_compositing_descendants && !uses_composited_scrolling,
            owner_id,
            &name,
            GraphicsLayerPurpose::ChildContainment,
        );
        let needs_child_transform =
            style.perspective.is_some() && self.child_containment_layer.is_none();
        hierarchy_changed |= toggle_graphics_layer(
            graphics,
            &mut self.child_transform_layer,
            needs_child_transform,
            owner_id,
            &name,
            GraphicsLayerPurpose::ChildTransform,
        );
        hierarchy_changed |= toggle_graphics_layer(
            graphics,
            &mut self.scrolling_layer,
            uses_composited_scrolling,
            owner_id,
            &name,
            GraphicsLayerPurpose::Scrolling,
        );
        hierarchy_changed |= toggle_graphics_layer(
            graphics,
            &mut self.scrolling_contents_layer,
            uses_composited_scrolling,
            owner_id,
            &name,
            GraphicsLayerPurpose::ScrollingContents,
        );

        let needs_overflow_controls = style.scrollable;
        hierarchy_changed |= toggle_graphics_layer(
            graphics,
            &mut self.overflow_controls_host_layer,
            needs_overflow_controls,
            owner_id,
            &name,
            GraphicsLayerPurpose::OverflowControlsHost,
        );
        hierarchy_changed |= toggle_graphics_layer(
            graphics,
            &mut self.overflow_controls_clipping_layer,
            needs_overflow_controls && needs_ancestor_clip,
            owner_id,
            &name,
            GraphicsLayerPurpose::OverflowControlsClipping,
        );

        let has_squashed_layers = !self.squashed_layers.is_empty();
        hierarchy_changed |= toggle_graphics_layer(
            graphics,
            &mut self.squashing_layer,
            has_squashed_layers,
            owner_id,
            &name,
            GraphicsLayerPurpose::Squashing,
        );
        hierarchy_changed |= toggle_graphics_layer(
            graphics,
            &mut self.squashing_containment_layer,
            has_squashed_layers && !needs_ancestor_clip,
            owner_id,
            &name,
            GraphicsLayerPurpose::SquashingContainment,
        );

        if hierarchy_changed {
            self.update_internal_hierarchy(graphics);
        }

        let mut layer_config_changed = hierarchy_changed;
        layer_config_changed |= toggle_graphics_layer(
            graphics,
            &mut self.mask_layer,
            style.has_mask,
            owner_id,
            &name,
            GraphicsLayerPurpose::Mask,
        );
        let needs_child_clipping_mask = (style.has_clip_path || style.has_border_radius)
            && (self.child_containment_layer.is_some()
                || style.accelerated_content.is_some()
                || self.scrolling_layer.is_some());
        layer_config_changed |= toggle_graphics_layer(
            graphics,
            &mut self.child_clipping_mask_layer,
            needs_child_clipping_mask,
            owner_id,
            &name,
            GraphicsLayerPurpose::ChildClippingMask,
        );
        self.attach_masks(graphics, style.has_clip_path);

        self.update_masks_to_bounds(graphics);
        self.update_painting_phases(graphics);
        self.update_clip_and_scroll_parents(
            graphics,
            ctx.clip_parent.map(|clip_parent| clip_parent.graphics_layer),
            ctx.scroll_parent,
        );

        if layer_config_changed {
            log::trace!(
                target: "compositing",
                "graphics layer configuration of {name} changed"
            );
        }
        layer_config_changed
    }

    fn needs_ancestor_clip(&self, ctx: &MappingUpdateContext<'_>) -> bool {
        let layers = &*ctx.layers;
        let Some(container) = ctx.container else {
            return false;
        };
        // The clip parent's layer clips instead of the compositing ancestors;
        // only a clip that layer does not apply needs its own layer.
        if let Some(clip_parent) = ctx.clip_parent {
            return !clip_parent.clips_with_own_layer
                && layers
                    .containing_block_clip_through(self.owning_layer, clip_parent.layer, container.layer)
                    .is_some();
        }
        let inputs = layers.layer(self.owning_layer).ancestor_dependent_inputs();
        let Some(clipping_container) = inputs.clipping_container else {
            return false;
        };
        if layers.is_descendant_or_self(container.layer, clipping_container) {
            return false;
        }
        // A scroll child is clipped by its scroll parent's composited scrolling layer.
        if ctx.settings.prefer_compositing_to_lcd_text
            && inputs.scroll_parent.is_some()
            && layers.containing_layer(self.owning_layer) == inputs.ancestor_scrolling_layer
        {
            return false;
        }
        layers
            .clip_rect_relative_to(self.owning_layer, container.layer, false)
            .is_some()
    }

    /// Nest the mapping's own layers; sublayers from other mappings are left
    /// to the tree builder.
    fn update_internal_hierarchy(&self, graphics: &mut GraphicsLayerTree) {
        if let Some(clip) = self.ancestor_clipping_layer {
            graphics.remove_all_children(clip);
        }
        graphics.remove_from_parent(self.graphics_layer);
        if let Some(clip) = self.ancestor_clipping_layer {
            graphics.add_child(clip, self.graphics_layer);
        }

        if let Some(containment) = self.child_containment_layer {
            graphics.add_child(self.graphics_layer, containment);
        } else if let Some(child_transform) = self.child_transform_layer {
            graphics.add_child(self.graphics_layer, child_transform);
        }

        if let Some(scrolling) = self.scrolling_layer {
            let super_layer = self
                .child_transform_layer
                .or(self.child_containment_layer)
                .unwrap_or(self.graphics_layer);
            graphics.add_child(super_layer, scrolling);
            if let Some(contents) = self.scrolling_contents_layer {
                graphics.add_child(scrolling, contents);
            }
        }

        // Overflow controls sit beside the child clip, never under it.
        match (
            self.overflow_controls_clipping_layer,
            self.overflow_controls_host_layer,
        ) {
            (Some(clip), Some(host)) => {
                graphics.add_child(self.graphics_layer, clip);
                graphics.add_child(clip, host);
            }
            (None, Some(host)) => graphics.add_child(self.graphics_layer, host),
            _ => {}
        }

        if let Some(squashing) = self.squashing_layer {
            debug_assert!(
                self.ancestor_clipping_layer.is_some() != self.squashing_containment_layer.is_some()
            );
            if let Some(containment) = self.squashing_containment_layer {
                graphics.remove_all_children(containment);
                graphics.add_child(containment, self.graphics_layer);
                graphics.add_child(containment, squashing);
            } else if let Some(clip) = self.ancestor_clipping_layer {
                graphics.add_child(clip, squashing);
            }
        }
    }

    fn attach_masks(&self, graphics: &mut GraphicsLayerTree, has_clip_path: bool) {
        let primary = self.graphics_layer;
        let mask = self.mask_layer;
        graphics.update(primary, |layer| {
            layer.mask_layer = mask;
            layer.contents_clipping_mask_layer = None;
        });
        for holder in [self.child_containment_layer, self.scrolling_layer]
            .into_iter()
            .flatten()
        {
            graphics.update(holder, |layer| layer.mask_layer = None);
        }
        let Some(child_clipping_mask) = self.child_clipping_mask_layer else {
            return;
        };
        // A clip path clips the whole subtree, overflow controls included.
        if has_clip_path {
            graphics.update(primary, |layer| layer.mask_layer = Some(child_clipping_mask));
        } else if let Some(holder) = self.child_containment_layer.or(self.scrolling_layer) {
            graphics.update(holder, |layer| layer.mask_layer = Some(child_clipping_mask));
        } else {
            graphics.update(primary, |layer| {
                layer.contents_clipping_mask_layer = Some(child_clipping_mask);
            });
        }
    }

    /// The outermost layer of the mapping follows the clip and scroll parents.
    fn update_clip_and_scroll_parents(
        &self,
        graphics: &mut GraphicsLayerTree,
        clip_parent: Option<GraphicsLayerId>,
        scroll_parent: Option<GraphicsLayerId>,
    ) {
        let outermost = self.child_for_superlayers();
        for id in self.all_graphics_layers() {
            let (clip, scroll) = if id == outermost {
                (clip_parent, scroll_parent)
            } else {
                (None, None)
            };
            graphics.update(id, |layer| {
                layer.clip_parent = clip;
                layer.scroll_parent = scroll;
            });
        }
    }

    fn update_masks_to_bounds(&self, graphics: &mut GraphicsLayerTree) {
        for id in [
            self.ancestor_clipping_layer,
            self.child_containment_layer,
            self.scrolling_layer,
            self.overflow_controls_clipping_layer,
        ]
        .into_iter()
        .flatten()
        {
            graphics.update(id, |layer| layer.masks_to_bounds = true);
        }
    }

    fn update_painting_phases(&self, graphics: &mut GraphicsLayerTree) {
        let mut primary_phase = GraphicsLayerPaintingPhase::empty();
        primary_phase.set(GraphicsLayerPaintingPhase::BACKGROUND, self.background_layer.is_none());
        primary_phase.set(GraphicsLayerPaintingPhase::FOREGROUND, self.foreground_layer.is_none());
        primary_phase.set(GraphicsLayerPaintingPhase::MASK, self.mask_layer.is_none());
        if let Some(contents) = self.scrolling_contents_layer {
            primary_phase.remove(GraphicsLayerPaintingPhase::FOREGROUND);
            primary_phase.insert(GraphicsLayerPaintingPhase::COMPOSITED_SCROLL);
            let mut contents_phase = GraphicsLayerPaintingPhase::OVERFLOW_CONTENTS
                | GraphicsLayerPaintingPhase::COMPOSITED_SCROLL;
            contents_phase.set(GraphicsLayerPaintingPhase::FOREGROUND, self.foreground_layer.is_none());
            graphics.update(contents, |layer| layer.paint_phase = contents_phase);
        }
        graphics.update(self.graphics_layer, |layer| layer.paint_phase = primary_phase);

        let fixed_phases = [
            (self.foreground_layer, GraphicsLayerPaintingPhase::FOREGROUND),
            (self.background_layer, GraphicsLayerPaintingPhase::BACKGROUND),
            (self.mask_layer, GraphicsLayerPaintingPhase::MASK),
            (
                self.child_clipping_mask_layer,
                GraphicsLayerPaintingPhase::CHILD_CLIPPING_MASK,
            ),
            (
                self.squashing_layer,
                GraphicsLayerPaintingPhase::ALL_WITHOUT_MASK | GraphicsLayerPaintingPhase::MASK,
            ),
        ];
        for (id, phase) in fixed_phases {
            if let Some(id) = id {
                graphics.update(id, |layer| layer.paint_phase = phase);
            }
        }
    }
}
