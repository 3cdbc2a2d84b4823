#[cfg(test)]
mod tests {
    use anyhow::{Context as _, Result};
    use compositor::{
        CompositingState, CompositingUpdateType, CompositorSettings, GraphicsLayerId, IntPoint, IntRect, IntSize,
        LayerId, LayerPainter, LayerStyle, LayoutRect, LayoutSize, PaintInvalidation, PaintRequest, Position,
        RenderLayerCompositor, RootLayerHost,
    };
    use std::cell::RefCell;
    use std::rc::Rc;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn new_compositor() -> RenderLayerCompositor {
        RenderLayerCompositor::new(
            LayerStyle::default(),
            LayoutSize::new(800.0, 600.0),
            CompositorSettings::default(),
        )
    }

    fn relative() -> LayerStyle {
        LayerStyle {
            position: Position::Relative,
            ..LayerStyle::default()
        }
    }

    fn promoted() -> LayerStyle {
        LayerStyle {
            will_change_compositing: true,
            ..relative()
        }
    }

    fn records_for(records: &[PaintInvalidation], layer: LayerId) -> Vec<PaintInvalidation> {
        records.iter().filter(|record| record.layer == layer).copied().collect()
    }

    #[derive(Default)]
    struct RecordingHost {
        attached: Rc<RefCell<Vec<Option<GraphicsLayerId>>>>,
    }

    impl RootLayerHost for RecordingHost {
        fn attach_root_graphics_layer(&mut self, layer: Option<GraphicsLayerId>) {
            self.attached.borrow_mut().push(layer);
        }
    }

    #[derive(Default)]
    struct RecordingPainter {
        requests: Vec<PaintRequest>,
    }

    impl LayerPainter for RecordingPainter {
        fn paint_layer(&mut self, request: &PaintRequest) {
            self.requests.push(request.clone());
        }
    }

    #[test]
    fn clean_update_changes_nothing() -> Result<()> {
        init_logging();
        let mut compositor = new_compositor();
        let root = compositor.layers().root();
        compositor
            .layers_mut()
            .append_child(root, "promoted", promoted(), LayoutRect::new(0.0, 0.0, 50.0, 50.0))?;
        compositor.update_if_needed();
        assert!(!compositor.has_pending_updates());
        let before = compositor.layer_tree_as_text()?;

        compositor.set_tracking_paint_invalidations(true);
        compositor.set_needs_compositing_update(CompositingUpdateType::AfterGeometryChange);
        compositor.update_if_needed();
        compositor.update_if_needed();

        assert!(!compositor.has_pending_updates());
        assert!(compositor.take_paint_invalidations().is_empty());
        assert_eq!(compositor.layer_tree_as_text()?, before);
        Ok(())
    }

    #[test]
    fn toggling_fixed_position_invalidates_against_the_previous_state() -> Result<()> {
        init_logging();
        let mut compositor = new_compositor();
        let root = compositor.layers().root();
        let layers = compositor.layers_mut();
        layers
            .append_child(root, "anchor", promoted(), LayoutRect::new(0.0, 0.0, 50.0, 50.0))?;
        let target = layers
            .append_child(root, "target", relative(), LayoutRect::new(300.0, 300.0, 50.0, 50.0))?;
        compositor.update_if_needed();
        assert_eq!(compositor.compositing_state(target), CompositingState::NotComposited);
        compositor.set_tracking_paint_invalidations(true);

        let fixed = LayerStyle {
            position: Position::Fixed,
            ..LayerStyle::default()
        };
        compositor.layers_mut().set_style(target, fixed)?;
        compositor.update_if_needed();

        assert_eq!(compositor.compositing_state(target), CompositingState::PaintsIntoOwnBacking);
        let records = records_for(&compositor.take_paint_invalidations(), target);
        let first = records.first().context("first invalidation")?;
        assert_eq!(first.compositing_state, CompositingState::NotComposited);
        assert_eq!(first.paint_container, Some(root));
        assert!(
            records
                .iter()
                .any(|record| record.compositing_state == CompositingState::PaintsIntoOwnBacking)
        );

        compositor.layers_mut().set_style(target, relative())?;
        compositor.update_if_needed();

        assert!(compositor.mapping(target).is_none());
        let records = records_for(&compositor.take_paint_invalidations(), target);
        let first = records.first().context("first invalidation")?;
        assert_eq!(first.compositing_state, CompositingState::PaintsIntoOwnBacking);
        assert_eq!(first.paint_container, Some(target));
        let last = records.last().context("last invalidation")?;
        assert_eq!(last.compositing_state, CompositingState::NotComposited);
        assert_eq!(last.paint_container, Some(root));
        Ok(())
    }

    #[test]
    fn host_follows_compositing_mode() -> Result<()> {
        init_logging();
        let mut compositor = new_compositor();
        let host = RecordingHost::default();
        let attached = Rc::clone(&host.attached);
        compositor.set_root_layer_host(Some(Box::new(host)));
        assert_eq!(*attached.borrow(), vec![None]);

        let root = compositor.layers().root();
        let layer = compositor
            .layers_mut()
            .append_child(root, "promoted", promoted(), LayoutRect::new(0.0, 0.0, 50.0, 50.0))?;
        compositor.update_if_needed();
        assert!(compositor.is_compositing());
        let root_graphics_layer = compositor.root_graphics_layer();
        assert!(root_graphics_layer.is_some());
        assert_eq!(attached.borrow().last().copied(), Some(root_graphics_layer));

        compositor.remove_layer(layer)?;
        compositor.update_if_needed();
        assert!(!compositor.is_compositing());
        assert!(compositor.mapping(root).is_none());
        assert_eq!(attached.borrow().last().copied(), Some(None));
        assert!(compositor.remove_layer(root).is_err());
        Ok(())
    }

    #[test]
    fn scrolling_and_resizing_move_the_scaffold() -> Result<()> {
        init_logging();
        let mut compositor = new_compositor();
        let root = compositor.layers().root();
        compositor
            .layers_mut()
            .append_child(root, "promoted", promoted(), LayoutRect::new(0.0, 0.0, 50.0, 50.0))?;
        compositor.update_if_needed();

        let host_layer = compositor.root_graphics_layer().context("root graphics layer")?;
        let container = compositor.graphics_layers().children(host_layer)[0];
        let scroll = compositor.graphics_layers().children(container)[0];

        compositor.frame_view_did_scroll(LayoutSize::new(0.0, 120.0));
        let scroll_layer = compositor.graphics_layers().get(scroll).context("scroll layer")?;
        assert_eq!(scroll_layer.position, IntPoint::new(0, -120));

        compositor.frame_view_did_change_size(LayoutSize::new(1024.0, 768.0))?;
        compositor.update_if_needed();
        let container_layer = compositor.graphics_layers().get(container).context("container layer")?;
        assert_eq!(container_layer.size, IntSize::new(1024, 768));
        assert!(!compositor.has_pending_updates());
        Ok(())
    }

    #[test]
    fn squashing_layer_paints_each_squashed_layer() -> Result<()> {
        init_logging();
        let mut compositor = new_compositor();
        let root = compositor.layers().root();
        let layers = compositor.layers_mut();
        let underlay = layers
            .append_child(root, "underlay", promoted(), LayoutRect::new(0.0, 0.0, 220.0, 100.0))?;
        let first = layers
            .append_child(root, "first", relative(), LayoutRect::new(0.0, 0.0, 100.0, 100.0))?;
        let second = layers
            .append_child(root, "second", relative(), LayoutRect::new(110.0, 0.0, 100.0, 100.0))?;
        compositor.update_if_needed();

        let mapping = compositor.mapping(underlay).context("underlay mapping")?;
        let squashing_layer = mapping.squashing_layer().context("squashing layer")?;
        let everything = IntRect::new(-1000, -1000, 4000, 4000);

        let mut painter = RecordingPainter::default();
        compositor.paint_contents(squashing_layer, &mut painter, everything);
        let painted: Vec<LayerId> = painter.requests.iter().map(|request| request.render_layer).collect();
        assert_eq!(painted, vec![first, second]);
        assert!(painter.requests.iter().all(|request| !request.clip.is_empty()));

        let mut painter = RecordingPainter::default();
        compositor.paint_contents(mapping.main_graphics_layer(), &mut painter, everything);
        assert_eq!(painter.requests.len(), 1);
        assert_eq!(painter.requests[0].render_layer, underlay);
        assert_eq!(compositor.notify_animation_started(squashing_layer, 1.5), Some(underlay));
        Ok(())
    }

    /// Moving one squashed box repaints only its slice of the squashing layer.
    #[test]
    fn moving_a_squashed_box_repaints_only_that_box() -> Result<()> {
        init_logging();
        let mut compositor = new_compositor();
        let root = compositor.layers().root();
        let layers = compositor.layers_mut();
        let underlay = layers.append_child(root, "underlay", promoted(), LayoutRect::new(0.0, 0.0, 330.0, 100.0))?;
        let first = layers.append_child(root, "box1", relative(), LayoutRect::new(0.0, 0.0, 100.0, 100.0))?;
        let second = layers.append_child(root, "box2", relative(), LayoutRect::new(110.0, 0.0, 100.0, 100.0))?;
        let third = layers.append_child(root, "box3", relative(), LayoutRect::new(220.0, 0.0, 100.0, 100.0))?;
        compositor.update_if_needed();
        compositor.set_tracking_paint_invalidations(true);

        compositor
            .layers_mut()
            .set_frame(second, LayoutRect::new(115.0, 0.0, 100.0, 100.0))?;
        compositor.update_if_needed();

        let records = compositor.take_paint_invalidations();
        let moved = records_for(&records, second);
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].compositing_state, CompositingState::PaintsIntoGroupedBacking);
        assert_eq!(moved[0].paint_container, Some(second));
        assert!(records_for(&records, first).is_empty());
        assert!(records_for(&records, third).is_empty());

        let mapping = compositor.mapping(underlay).context("underlay mapping")?;
        let info = mapping
            .squashed_layers()
            .iter()
            .find(|info| info.render_layer == second)
            .context("box2 is still squashed")?;
        assert_eq!(info.rect_in_squashing_layer(), IntRect::new(115, 0, 100, 100));
        Ok(())
    }
}
