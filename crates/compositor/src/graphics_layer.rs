//! Platform-facing graphics layers.
//!
//! A [`GraphicsLayerTree`] is the output of compositing: every composited
//! layer mapping owns a handful of graphics layers, and the compositor owns the
//! root scaffold. Layers are arena nodes so reparenting never needs shared
//! ownership; a layer has at most one parent at a time.

use crate::geometry::{IntPoint, IntRect, IntSize, LayoutPoint, Transform2D};
use crate::render_layer::LayerId;
use bitflags::bitflags;
use indextree::{Arena, NodeId};
use serde::Serialize;

/// Identifier of a graphics layer inside a [`GraphicsLayerTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphicsLayerId(pub(crate) NodeId);

bitflags! {
    /// Which parts of a render layer a graphics layer paints.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
    pub struct GraphicsLayerPaintingPhase: u8 {
        const BACKGROUND = 1 << 0;
        const FOREGROUND = 1 << 1;
        const MASK = 1 << 2;
        const OVERFLOW_CONTENTS = 1 << 3;
        const COMPOSITED_SCROLL = 1 << 4;
        const CHILD_CLIPPING_MASK = 1 << 5;
        const ALL_WITHOUT_MASK = Self::BACKGROUND.bits() | Self::FOREGROUND.bits();
    }
}

/// Root scaffold layers owned by the compositor itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CompositorLayerRole {
    OverflowControlsHost,
    Container,
    Scroll,
    RootContent,
}

/// Role of a graphics layer inside a composited layer mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GraphicsLayerPurpose {
    Primary,
    AncestorClipping,
    ChildContainment,
    ChildTransform,
    Scrolling,
    ScrollingContents,
    Foreground,
    Background,
    Mask,
    ChildClippingMask,
    SquashingContainment,
    Squashing,
    OverflowControlsHost,
    OverflowControlsClipping,
    Compositor(CompositorLayerRole),
}

impl GraphicsLayerPurpose {
    /// Suffix appended to the owner's name in debug output.
    pub const fn debug_suffix(self) -> &'static str {
        match self {
            Self::Primary => "",
            Self::AncestorClipping => " (ancestor clipping)",
            Self::ChildContainment => " (child clipping)",
            Self::ChildTransform => " (child transform)",
            Self::Scrolling => " (scrolling container)",
            Self::ScrollingContents => " (scrolling contents)",
            Self::Foreground => " (foreground)",
            Self::Background => " (background)",
            Self::Mask => " (mask)",
            Self::ChildClippingMask => " (child clipping mask)",
            Self::SquashingContainment => " (squashing containment)",
            Self::Squashing => " (squashing)",
            Self::OverflowControlsHost => " (overflow controls host)",
            Self::OverflowControlsClipping => " (overflow controls clipping)",
            Self::Compositor(_) => "",
        }
    }
}

/// Who answers paint and naming callbacks for a graphics layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphicsLayerClient {
    /// A composited layer mapping, identified by its owning render layer.
    Mapping(LayerId),
    /// The compositor's root scaffold.
    Compositor(CompositorLayerRole),
}

/// A single platform layer.
#[derive(Debug, Clone)]
pub struct GraphicsLayer {
    pub name: String,
    pub client: GraphicsLayerClient,
    pub purpose: GraphicsLayerPurpose,
    pub position: IntPoint,
    pub size: IntSize,
    pub transform: Transform2D,
    pub transform_origin: LayoutPoint,
    pub opacity: f32,
    pub masks_to_bounds: bool,
    pub draws_content: bool,
    pub contents_visible: bool,
    pub backface_visible: bool,
    pub contents_rect: Option<IntRect>,
    pub mask_layer: Option<GraphicsLayerId>,
    pub contents_clipping_mask_layer: Option<GraphicsLayerId>,
    pub scroll_parent: Option<GraphicsLayerId>,
    pub clip_parent: Option<GraphicsLayerId>,
    pub offset_from_renderer: IntSize,
    pub paint_phase: GraphicsLayerPaintingPhase,
    pub needs_display: bool,
    pub invalidated_rects: Vec<IntRect>,
}

impl GraphicsLayer {
    fn new(name: String, client: GraphicsLayerClient, purpose: GraphicsLayerPurpose) -> Self {
        Self {
            name,
            client,
            purpose,
            position: IntPoint::zero(),
            size: IntSize::zero(),
            transform: Transform2D::identity(),
            transform_origin: LayoutPoint::zero(),
            opacity: 1.0,
            masks_to_bounds: false,
            draws_content: false,
            contents_visible: true,
            backface_visible: true,
            contents_rect: None,
            mask_layer: None,
            contents_clipping_mask_layer: None,
            scroll_parent: None,
            clip_parent: None,
            offset_from_renderer: IntSize::zero(),
            paint_phase: GraphicsLayerPaintingPhase::ALL_WITHOUT_MASK,
            needs_display: false,
            invalidated_rects: Vec::new(),
        }
    }
}

/// Serializable view of a graphics layer subtree, for tests and debugging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphicsLayerSnapshot {
    pub name: String,
    pub position: IntPoint,
    pub size: IntSize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform2D>,
    #[serde(skip_serializing_if = "is_opaque")]
    pub opacity: f32,
    #[serde(skip_serializing_if = "is_false")]
    pub masks_to_bounds: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub draws_content: bool,
    #[serde(skip_serializing_if = "is_true")]
    pub contents_visible: bool,
    pub offset_from_renderer: IntSize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub paint_phase: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_layer: Option<Box<GraphicsLayerSnapshot>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents_clipping_mask_layer: Option<Box<GraphicsLayerSnapshot>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<GraphicsLayerSnapshot>,
}

#[allow(clippy::trivially_copy_pass_by_ref, reason = "serde passes fields by reference")]
fn is_false(value: &bool) -> bool {
    !*value
}

#[allow(clippy::trivially_copy_pass_by_ref, reason = "serde passes fields by reference")]
fn is_true(value: &bool) -> bool {
    *value
}

#[allow(clippy::trivially_copy_pass_by_ref, reason = "serde passes fields by reference")]
fn is_opaque(value: &f32) -> bool {
    *value >= 1.0
}

/// Arena of graphics layers.
#[derive(Debug, Default)]
pub struct GraphicsLayerTree {
    arena: Arena<GraphicsLayer>,
}

impl GraphicsLayerTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detached graphics layer.
    pub fn create(
        &mut self,
        name: String,
        client: GraphicsLayerClient,
        purpose: GraphicsLayerPurpose,
    ) -> GraphicsLayerId {
        log::trace!(target: "compositing", "create graphics layer {name}");
        GraphicsLayerId(self.arena.new_node(GraphicsLayer::new(name, client, purpose)))
    }

    /// Destroy a graphics layer. Its children are detached, not destroyed.
    pub fn destroy(&mut self, id: GraphicsLayerId) {
        if !self.contains(id) {
            return;
        }
        self.remove_all_children(id);
        id.0.remove(&mut self.arena);
    }

    /// Whether `id` still refers to a live layer.
    pub fn contains(&self, id: GraphicsLayerId) -> bool {
        self.arena.get(id.0).is_some_and(|node| !node.is_removed())
    }

    pub fn get(&self, id: GraphicsLayerId) -> Option<&GraphicsLayer> {
        self.arena
            .get(id.0)
            .filter(|node| !node.is_removed())
            .map(indextree::Node::get)
    }

    pub fn get_mut(&mut self, id: GraphicsLayerId) -> Option<&mut GraphicsLayer> {
        self.arena
            .get_mut(id.0)
            .filter(|node| !node.is_removed())
            .map(indextree::Node::get_mut)
    }

    /// Apply `update` to a live layer; unknown ids are ignored.
    pub fn update(&mut self, id: GraphicsLayerId, update: impl FnOnce(&mut GraphicsLayer)) {
        if let Some(layer) = self.get_mut(id) {
            update(layer);
        }
    }

    pub fn parent(&self, id: GraphicsLayerId) -> Option<GraphicsLayerId> {
        self.arena
            .get(id.0)
            .and_then(indextree::Node::parent)
            .map(GraphicsLayerId)
    }

    pub fn children(&self, id: GraphicsLayerId) -> Vec<GraphicsLayerId> {
        id.0.children(&self.arena).map(GraphicsLayerId).collect()
    }

    /// Append `child` to `parent`, detaching it from any previous parent.
    pub fn add_child(&mut self, parent: GraphicsLayerId, child: GraphicsLayerId) {
        if let Err(err) = parent.0.checked_append(child.0, &mut self.arena) {
            log::error!(target: "compositing", "Failed to append graphics layer: {err:?}");
        }
    }

    /// Replace the children of `parent`. Returns whether anything changed.
    pub fn set_children(&mut self, parent: GraphicsLayerId, children: &[GraphicsLayerId]) -> bool {
        if self.children(parent).as_slice() == children {
            return false;
        }
        self.remove_all_children(parent);
        for child in children {
            self.add_child(parent, *child);
        }
        true
    }

    pub fn remove_from_parent(&mut self, id: GraphicsLayerId) {
        if self.contains(id) {
            id.0.detach(&mut self.arena);
        }
    }

    pub fn remove_all_children(&mut self, id: GraphicsLayerId) {
        for child in self.children(id) {
            child.0.detach(&mut self.arena);
        }
    }

    /// Invalidate the whole layer.
    pub fn set_needs_display(&mut self, id: GraphicsLayerId) {
        self.update(id, |layer| {
            if layer.draws_content {
                layer.needs_display = true;
                layer.invalidated_rects.clear();
            }
        });
    }

    /// Invalidate part of the layer.
    pub fn set_needs_display_in_rect(&mut self, id: GraphicsLayerId, rect: IntRect) {
        self.update(id, |layer| {
            if layer.draws_content && !layer.needs_display && !rect.is_empty() {
                layer.invalidated_rects.push(rect);
            }
        });
    }

    /// Capture the subtree rooted at `id`.
    pub fn snapshot(&self, id: GraphicsLayerId) -> Option<GraphicsLayerSnapshot> {
        let layer = self.get(id)?;
        Some(GraphicsLayerSnapshot {
            name: layer.name.clone(),
            position: layer.position,
            size: layer.size,
            transform: (!layer.transform.is_identity()).then_some(layer.transform),
            opacity: layer.opacity,
            masks_to_bounds: layer.masks_to_bounds,
            draws_content: layer.draws_content,
            contents_visible: layer.contents_visible,
            offset_from_renderer: layer.offset_from_renderer,
            paint_phase: if layer.draws_content {
                layer.paint_phase.iter_names().map(|(name, _)| name).collect()
            } else {
                Vec::new()
            },
            mask_layer: layer
                .mask_layer
                .and_then(|mask| self.snapshot(mask))
                .map(Box::new),
            contents_clipping_mask_layer: layer
                .contents_clipping_mask_layer
                .and_then(|mask| self.snapshot(mask))
                .map(Box::new),
            children: self
                .children(id)
                .into_iter()
                .filter_map(|child| self.snapshot(child))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(tree: &mut GraphicsLayerTree, name: &str) -> GraphicsLayerId {
        tree.create(
            name.to_owned(),
            GraphicsLayerClient::Compositor(CompositorLayerRole::Container),
            GraphicsLayerPurpose::Compositor(CompositorLayerRole::Container),
        )
    }

    /// Reparenting moves a layer instead of duplicating it.
    #[test]
    fn set_children_reparents() {
        let mut tree = GraphicsLayerTree::new();
        let first = layer(&mut tree, "first");
        let second = layer(&mut tree, "second");
        let child = layer(&mut tree, "child");
        tree.add_child(first, child);
        assert!(tree.set_children(second, &[child]));
        assert!(tree.children(first).is_empty());
        assert_eq!(tree.parent(child), Some(second));
        assert!(!tree.set_children(second, &[child]));
    }

    /// Destroying a layer leaves its children alive and detached.
    #[test]
    fn destroy_detaches_children() {
        let mut tree = GraphicsLayerTree::new();
        let parent = layer(&mut tree, "parent");
        let child = layer(&mut tree, "child");
        tree.add_child(parent, child);
        tree.destroy(parent);
        assert!(!tree.contains(parent));
        assert!(tree.contains(child));
        assert_eq!(tree.parent(child), None);
    }

    /// Full invalidation supersedes partial rects.
    #[test]
    fn needs_display_clears_rects() {
        let mut tree = GraphicsLayerTree::new();
        let id = layer(&mut tree, "content");
        tree.update(id, |layer| layer.draws_content = true);
        tree.set_needs_display_in_rect(id, IntRect::new(0, 0, 5, 5));
        tree.set_needs_display(id);
        tree.set_needs_display_in_rect(id, IntRect::new(0, 0, 5, 5));
        let state = tree.get(id).map(|layer| (layer.needs_display, layer.invalidated_rects.len()));
        assert_eq!(state, Some((true, 0)));
    }
}
