#[cfg(test)]
mod tests {
    use anyhow::{Context as _, Result};
    use compositor::{
        CompositorSettings, GraphicsLayerId, GraphicsLayerPaintingPhase, GraphicsLayerPurpose, IntPoint, IntSize,
        LayerStyle, LayoutRect, LayoutSize, Position, RenderLayerCompositor,
    };

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn new_compositor(settings: CompositorSettings) -> RenderLayerCompositor {
        RenderLayerCompositor::new(LayerStyle::default(), LayoutSize::new(800.0, 600.0), settings)
    }

    fn composited_scrolling() -> CompositorSettings {
        CompositorSettings {
            prefer_compositing_to_lcd_text: true,
            ..CompositorSettings::default()
        }
    }

    fn promoted(z_index: Option<i32>) -> LayerStyle {
        LayerStyle {
            position: Position::Relative,
            z_index,
            will_change_compositing: true,
            ..LayerStyle::default()
        }
    }

    fn promoted_absolute() -> LayerStyle {
        LayerStyle {
            position: Position::Absolute,
            will_change_compositing: true,
            ..LayerStyle::default()
        }
    }

    /// A translucent scroller: a stacking context that does not contain absolute descendants.
    fn translucent_scroller() -> LayerStyle {
        LayerStyle {
            scrollable: true,
            opacity: 0.5,
            ..LayerStyle::default()
        }
    }

    fn scaffold_chain(compositor: &RenderLayerCompositor) -> Vec<GraphicsLayerId> {
        let graphics = compositor.graphics_layers();
        let mut chain = Vec::new();
        let mut current = compositor.root_graphics_layer();
        while let Some(id) = current {
            chain.push(id);
            current = graphics.children(id).last().copied();
            if chain.len() == 4 {
                break;
            }
        }
        chain
    }

    fn graphics_ancestors(compositor: &RenderLayerCompositor, id: GraphicsLayerId) -> Vec<GraphicsLayerId> {
        let graphics = compositor.graphics_layers();
        std::iter::successors(graphics.parent(id), |layer| graphics.parent(*layer)).collect()
    }

    #[test]
    fn root_mapping_hangs_below_the_scaffold() -> Result<()> {
        init_logging();
        let mut compositor = new_compositor(CompositorSettings::default());
        let root = compositor.layers().root();
        compositor
            .layers_mut()
            .append_child(root, "promoted", promoted(None), LayoutRect::new(0.0, 0.0, 50.0, 50.0))?;
        compositor.update_if_needed();

        let chain = scaffold_chain(&compositor);
        assert_eq!(chain.len(), 4);
        let graphics = compositor.graphics_layers();
        let container = graphics.get(chain[1]).context("scaffold container")?;
        assert!(container.masks_to_bounds);
        assert_eq!(container.size, IntSize::new(800, 600));

        let root_main = compositor.mapping(root).context("root mapping")?.child_for_superlayers();
        assert_eq!(graphics.children(chain[3]), vec![root_main]);
        assert_eq!(graphics.parent(root_main), Some(chain[3]));
        assert_eq!(compositor.debug_name(chain[2]), "Frame Scrolling Layer");
        Ok(())
    }

    #[test]
    fn negative_children_paint_below_the_foreground() -> Result<()> {
        init_logging();
        let mut compositor = new_compositor(CompositorSettings::default());
        let root = compositor.layers().root();
        let layers = compositor.layers_mut();
        let context = layers.append_child(root, "context", promoted(Some(0)), LayoutRect::new(0.0, 0.0, 300.0, 300.0))?;
        let below = layers.append_child(context, "below", promoted(Some(-1)), LayoutRect::new(10.0, 10.0, 50.0, 50.0))?;
        let above = layers.append_child(context, "above", promoted(Some(1)), LayoutRect::new(100.0, 10.0, 50.0, 50.0))?;
        compositor.update_if_needed();

        let context_mapping = compositor.mapping(context).context("context mapping")?;
        let foreground = context_mapping.foreground_layer().context("foreground layer")?;
        let expected = vec![
            compositor.mapping(below).context("below mapping")?.child_for_superlayers(),
            foreground,
            compositor.mapping(above).context("above mapping")?.child_for_superlayers(),
        ];
        let graphics = compositor.graphics_layers();
        assert_eq!(graphics.children(context_mapping.parent_for_sublayers()), expected);
        assert_eq!(
            graphics.get(foreground).map(|layer| layer.purpose),
            Some(GraphicsLayerPurpose::Foreground)
        );
        assert_eq!(compositor.debug_name(foreground), "context (foreground)");
        Ok(())
    }

    #[test]
    fn clip_from_unmapped_ancestor_gets_its_own_layer() -> Result<()> {
        init_logging();
        let mut compositor = new_compositor(CompositorSettings::default());
        let root = compositor.layers().root();
        let clipper_style = LayerStyle {
            position: Position::Relative,
            overflow_clip: true,
            is_self_painting: false,
            ..LayerStyle::default()
        };
        let layers = compositor.layers_mut();
        let clipper = layers.append_child(root, "clipper", clipper_style, LayoutRect::new(50.0, 50.0, 100.0, 100.0))?;
        let clipped_frame = LayoutRect::new(-20.0, -20.0, 200.0, 200.0);
        let clipped = layers.append_child(clipper, "clipped", promoted(None), clipped_frame)?;
        compositor.update_if_needed();

        assert!(compositor.mapping(clipper).is_none());
        let mapping = compositor.mapping(clipped).context("clipped mapping")?;
        let clip = mapping.ancestor_clipping_layer().context("ancestor clip")?;
        assert_eq!(mapping.child_for_superlayers(), clip);

        let graphics = compositor.graphics_layers();
        let clip_layer = graphics.get(clip).context("ancestor clip layer")?;
        assert!(clip_layer.masks_to_bounds);
        assert_eq!(clip_layer.size, IntSize::new(100, 100));
        assert_eq!(graphics.children(clip), vec![mapping.main_graphics_layer()]);

        let root_mapping = compositor.mapping(root).context("root mapping")?;
        assert!(graphics.children(root_mapping.parent_for_sublayers()).contains(&clip));
        Ok(())
    }

    /// Overflow controls of a composited scroller stack above the scroll
    /// child, outside the scroller's own layers.
    #[test]
    fn overflow_controls_stack_above_the_scroll_child() -> Result<()> {
        init_logging();
        let mut compositor = new_compositor(composited_scrolling());
        let root = compositor.layers().root();
        let layers = compositor.layers_mut();
        let scroller_style = LayerStyle {
            scrollable: true,
            ..LayerStyle::default()
        };
        let scroller = layers.append_child(root, "scroller", scroller_style, LayoutRect::new(0.0, 0.0, 200.0, 200.0))?;
        layers.set_contents_size(scroller, LayoutSize::new(200.0, 1000.0))?;
        let child = layers.append_child(scroller, "child", promoted(None), LayoutRect::new(0.0, 0.0, 50.0, 50.0))?;
        compositor.update_if_needed();

        let scroller_mapping = compositor.mapping(scroller).context("scroller mapping")?;
        let child_mapping = compositor.mapping(child).context("child mapping")?;
        let contents = scroller_mapping.scrolling_contents_layer().context("scrolling contents")?;
        let host = scroller_mapping.overflow_controls_host_layer().context("overflow controls host")?;
        let root_sublayers = compositor.mapping(root).context("root mapping")?.parent_for_sublayers();

        let graphics = compositor.graphics_layers();
        assert_eq!(
            graphics.children(root_sublayers),
            vec![scroller_mapping.child_for_superlayers(), child_mapping.child_for_superlayers(), host]
        );
        assert!(!graphics_ancestors(&compositor, host).contains(&contents));
        assert!(graphics.children(contents).is_empty());

        let child_layer = graphics.get(child_mapping.child_for_superlayers()).context("child layer")?;
        assert_eq!(child_layer.scroll_parent, Some(contents));
        assert_eq!(child_layer.clip_parent, None);
        Ok(())
    }

    /// An absolute layer stacked in a scroller that does not contain it
    /// takes its clip from the root instead of the scroller.
    #[test]
    fn unclipped_descendant_follows_its_clip_parent() -> Result<()> {
        init_logging();
        let mut compositor = new_compositor(composited_scrolling());
        let root = compositor.layers().root();
        let layers = compositor.layers_mut();
        let scroller_frame = LayoutRect::new(0.0, 0.0, 200.0, 200.0);
        let scroller = layers.append_child(root, "scroller", translucent_scroller(), scroller_frame)?;
        let escaping =
            layers.append_child(scroller, "escaping", promoted_absolute(), LayoutRect::new(400.0, 400.0, 50.0, 50.0))?;
        compositor.update_if_needed();

        let inputs = compositor
            .layers()
            .get(escaping)
            .context("escaping layer")?
            .ancestor_dependent_inputs();
        assert!(inputs.is_unclipped_descendant);
        assert_eq!(inputs.clip_parent, Some(root));

        let contents = compositor
            .mapping(scroller)
            .context("scroller mapping")?
            .scrolling_contents_layer()
            .context("scrolling contents")?;
        let root_sublayers = compositor.mapping(root).context("root mapping")?.parent_for_sublayers();
        let mapping = compositor.mapping(escaping).context("escaping mapping")?;
        assert!(mapping.ancestor_clipping_layer().is_none());

        let graphics = compositor.graphics_layers();
        let outermost = mapping.child_for_superlayers();
        assert_eq!(graphics.parent(outermost), Some(contents));
        assert_eq!(graphics.get(outermost).and_then(|layer| layer.clip_parent), Some(root_sublayers));
        Ok(())
    }

    /// A clip parent without a composited clip of its own is rebuilt as an
    /// ancestor clip that escapes the compositing container's clip.
    #[test]
    fn unclipped_descendant_gets_the_clip_parents_clip() -> Result<()> {
        init_logging();
        let mut compositor = new_compositor(composited_scrolling());
        let root = compositor.layers().root();
        let outer_style = LayerStyle {
            position: Position::Relative,
            overflow_clip: true,
            is_self_painting: false,
            ..LayerStyle::default()
        };
        let layers = compositor.layers_mut();
        let outer = layers.append_child(root, "outer", outer_style, LayoutRect::new(20.0, 20.0, 300.0, 300.0))?;
        let scroller =
            layers.append_child(outer, "scroller", translucent_scroller(), LayoutRect::new(10.0, 10.0, 200.0, 200.0))?;
        let escaping =
            layers.append_child(scroller, "escaping", promoted_absolute(), LayoutRect::new(100.0, 100.0, 40.0, 40.0))?;
        compositor.update_if_needed();

        assert!(compositor.mapping(outer).is_none());
        let inputs = compositor
            .layers()
            .get(escaping)
            .context("escaping layer")?
            .ancestor_dependent_inputs();
        assert_eq!(inputs.clip_parent, Some(outer));

        let root_sublayers = compositor.mapping(root).context("root mapping")?.parent_for_sublayers();
        let mapping = compositor.mapping(escaping).context("escaping mapping")?;
        let clip = mapping.ancestor_clipping_layer().context("ancestor clip")?;
        assert_eq!(mapping.child_for_superlayers(), clip);

        let graphics = compositor.graphics_layers();
        let clip_layer = graphics.get(clip).context("ancestor clip layer")?;
        assert_eq!(clip_layer.position, IntPoint::new(-10, -10));
        assert_eq!(clip_layer.size, IntSize::new(300, 300));
        assert_eq!(clip_layer.clip_parent, Some(root_sublayers));
        let main = graphics.get(mapping.main_graphics_layer()).context("escaping primary layer")?;
        assert_eq!(main.clip_parent, None);
        assert_eq!(main.position, IntPoint::new(110, 110));
        Ok(())
    }

    /// A mask gets its own layer, and a rounded clip of composited children
    /// masks the child containment layer.
    #[test]
    fn masks_attach_to_the_layers_they_clip() -> Result<()> {
        init_logging();
        let mut compositor = new_compositor(CompositorSettings::default());
        let root = compositor.layers().root();
        let masked_style = LayerStyle {
            has_mask: true,
            ..promoted(None)
        };
        let rounded_style = LayerStyle {
            position: Position::Relative,
            z_index: Some(0),
            overflow_clip: true,
            has_border_radius: true,
            ..LayerStyle::default()
        };
        let layers = compositor.layers_mut();
        let masked = layers.append_child(root, "masked", masked_style, LayoutRect::new(0.0, 0.0, 100.0, 100.0))?;
        let rounded = layers.append_child(root, "rounded", rounded_style, LayoutRect::new(200.0, 0.0, 100.0, 100.0))?;
        layers.append_child(rounded, "inner", promoted(None), LayoutRect::new(10.0, 10.0, 50.0, 50.0))?;
        compositor.update_if_needed();

        let graphics = compositor.graphics_layers();
        let masked_mapping = compositor.mapping(masked).context("masked mapping")?;
        let mask = masked_mapping.mask_layer().context("mask layer")?;
        let primary = graphics.get(masked_mapping.main_graphics_layer()).context("masked primary")?;
        assert_eq!(primary.mask_layer, Some(mask));
        assert!(!primary.paint_phase.contains(GraphicsLayerPaintingPhase::MASK));
        assert_eq!(
            graphics.get(mask).map(|layer| layer.paint_phase),
            Some(GraphicsLayerPaintingPhase::MASK)
        );

        let rounded_mapping = compositor.mapping(rounded).context("rounded mapping")?;
        let containment = rounded_mapping.child_containment_layer().context("child containment")?;
        let child_mask = rounded_mapping.child_clipping_mask_layer().context("child clipping mask")?;
        assert_eq!(graphics.get(containment).and_then(|layer| layer.mask_layer), Some(child_mask));
        assert_eq!(
            graphics.get(rounded_mapping.main_graphics_layer()).and_then(|layer| layer.mask_layer),
            None
        );
        Ok(())
    }

    /// Fractional offsets along a chain of mappings snap against absolute pixels.
    #[test]
    fn subpixel_offsets_accumulate_down_the_chain() -> Result<()> {
        init_logging();
        let mut compositor = new_compositor(CompositorSettings::default());
        let root = compositor.layers().root();
        let layers = compositor.layers_mut();
        let first = layers.append_child(root, "first", promoted(None), LayoutRect::new(10.3, 10.3, 100.0, 100.0))?;
        let second = layers.append_child(first, "second", promoted(None), LayoutRect::new(10.3, 10.3, 50.0, 50.0))?;
        let third = layers.append_child(second, "third", promoted(None), LayoutRect::new(10.3, 10.3, 25.0, 25.0))?;
        compositor.update_if_needed();

        let mut positions = Vec::new();
        for id in [first, second, third] {
            let main = compositor.mapping(id).context("chain mapping")?.main_graphics_layer();
            positions.push(compositor.graphics_layers().get(main).context("chain layer")?.position);
        }
        assert_eq!(positions, vec![IntPoint::new(10, 10), IntPoint::new(11, 11), IntPoint::new(10, 10)]);
        let total = positions.iter().fold(IntPoint::new(0, 0), |sum, point| {
            IntPoint::new(sum.x + point.x, sum.y + point.y)
        });
        let absolute = compositor.layers().absolute_offset(third);
        assert_eq!(total, IntPoint::new(absolute.x.round() as i32, absolute.y.round() as i32));

        let third_subpixel = compositor.layers().get(third).context("third layer")?.subpixel_accumulation();
        assert!((third_subpixel.width + 0.1).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn fixed_root_background_sits_below_the_scroll_layer() -> Result<()> {
        init_logging();
        let root_style = LayerStyle {
            has_fixed_background: true,
            ..LayerStyle::default()
        };
        let settings = CompositorSettings {
            composited_fixed_root_background: true,
            ..CompositorSettings::default()
        };
        let mut compositor = RenderLayerCompositor::new(root_style, LayoutSize::new(800.0, 600.0), settings);
        let root = compositor.layers().root();
        compositor
            .layers_mut()
            .append_child(root, "promoted", promoted(None), LayoutRect::new(0.0, 0.0, 50.0, 50.0))?;
        compositor.update_if_needed();

        let chain = scaffold_chain(&compositor);
        let background = compositor
            .mapping(root)
            .context("root mapping")?
            .background_layer()
            .context("background layer")?;
        assert_eq!(compositor.graphics_layers().children(chain[1]), vec![background, chain[2]]);
        Ok(())
    }

    #[test]
    fn layer_tree_text_lists_the_scaffold() -> Result<()> {
        init_logging();
        let mut compositor = new_compositor(CompositorSettings::default());
        assert_eq!(compositor.layer_tree_as_text()?, "null");

        let root = compositor.layers().root();
        compositor
            .layers_mut()
            .append_child(root, "promoted", promoted(None), LayoutRect::new(0.0, 0.0, 50.0, 50.0))?;
        compositor.update_if_needed();

        let text = compositor.layer_tree_as_text()?;
        assert!(text.contains("Frame Clipping Layer"));
        assert!(text.contains("promoted"));
        Ok(())
    }
}
