//! The render-layer tree consumed by the compositing passes.
//!
//! Layout and style own the real data; this module holds the subset the
//! compositor reads (style flags, frame geometry, scroll state) together with
//! the per-layer state the passes write back (inputs, reasons, squashing
//! assignment, dirty bits). Layers live in an [`indextree::Arena`] so every
//! back-reference is an index, never a pointer.

use crate::geometry::{IntRect, LayoutPoint, LayoutRect, LayoutSize, Transform2D};
use crate::reasons::CompositingReasons;
use anyhow::{Result, anyhow};
use indextree::{Arena, NodeId};
use serde::{Serialize, Serializer};
use smallvec::SmallVec;

/// Identifier of a render layer inside a [`RenderLayerTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub(crate) NodeId);

impl LayerId {
    /// Stable arena index, used for debug output.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl Serialize for LayerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.index() as u64)
    }
}

/// CSS `position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Position {
    #[default]
    Static,
    Relative,
    Absolute,
    Fixed,
}

impl Position {
    #[inline]
    pub const fn is_positioned(self) -> bool {
        !matches!(self, Self::Static)
    }

    #[inline]
    pub const fn is_out_of_flow(self) -> bool {
        matches!(self, Self::Absolute | Self::Fixed)
    }
}

/// Replaced content that the platform can composite directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceleratedContent {
    Video,
    Canvas,
}

/// Style-derived inputs of a render layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerStyle {
    pub position: Position,
    pub z_index: Option<i32>,
    pub opacity: f32,
    /// 2D transform, applied around the centre of the layer box.
    pub transform: Option<Transform2D>,
    pub has_3d_transform: bool,
    pub perspective: Option<f32>,
    pub preserves_3d: bool,
    pub has_filter: bool,
    pub overflow_clip: bool,
    pub scrollable: bool,
    /// CSS `clip`, in the layer's local coordinates.
    pub clip: Option<LayoutRect>,
    pub has_clip_path: bool,
    pub has_border_radius: bool,
    pub has_mask: bool,
    pub will_change_compositing: bool,
    pub has_active_animation: bool,
    pub backface_hidden: bool,
    pub accelerated_content: Option<AcceleratedContent>,
    pub has_visible_content: bool,
    pub is_self_painting: bool,
    pub has_fixed_background: bool,
}

impl Default for LayerStyle {
    fn default() -> Self {
        Self {
            position: Position::Static,
            z_index: None,
            opacity: 1.0,
            transform: None,
            has_3d_transform: false,
            perspective: None,
            preserves_3d: false,
            has_filter: false,
            overflow_clip: false,
            scrollable: false,
            clip: None,
            has_clip_path: false,
            has_border_radius: false,
            has_mask: false,
            will_change_compositing: false,
            has_active_animation: false,
            backface_hidden: false,
            accelerated_content: None,
            has_visible_content: true,
            is_self_painting: true,
            has_fixed_background: false,
        }
    }
}

impl LayerStyle {
    #[inline]
    pub fn is_transparent(&self) -> bool {
        self.opacity < 1.0
    }

    #[inline]
    pub fn has_transform(&self) -> bool {
        self.has_3d_transform || self.transform.is_some_and(|transform| !transform.is_identity())
    }

    #[inline]
    pub fn has_clip_or_overflow_clip(&self) -> bool {
        self.overflow_clip || self.scrollable || self.clip.is_some()
    }

    /// Whether the layer establishes a stacking context on its own.
    pub fn creates_stacking_context(&self) -> bool {
        (self.position.is_positioned() && self.z_index.is_some())
            || matches!(self.position, Position::Fixed)
            || self.is_transparent()
            || self.has_transform()
            || self.has_filter
            || self.has_mask
            || self.has_clip_path
            || self.preserves_3d
            || self.will_change_compositing
    }
}

/// Inputs that depend on the state of the layer's ancestors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AncestorDependentCompositingInputs {
    pub clipped_absolute_bounding_box: IntRect,
    pub opacity_ancestor: Option<LayerId>,
    pub transform_ancestor: Option<LayerId>,
    pub filter_ancestor: Option<LayerId>,
    pub clipping_container: Option<LayerId>,
    pub ancestor_scrolling_layer: Option<LayerId>,
    pub scroll_parent: Option<LayerId>,
    pub clip_parent: Option<LayerId>,
    pub is_unclipped_descendant: bool,
}

/// Inputs aggregated from the layer's descendants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DescendantDependentCompositingInputs {
    pub has_descendant_with_clip_path: bool,
}

/// A node of the paint-order tree.
#[derive(Debug, Clone)]
pub struct RenderLayer {
    name: String,
    style: LayerStyle,
    /// Location relative to the parent layer, and border-box size.
    frame: LayoutRect,
    scroll_offset: LayoutSize,
    contents_size: Option<LayoutSize>,

    pub(crate) compositing_reasons: CompositingReasons,
    pub(crate) has_compositing_descendant: bool,
    pub(crate) ancestor_inputs: AncestorDependentCompositingInputs,
    pub(crate) descendant_inputs: DescendantDependentCompositingInputs,
    pub(crate) grouped_mapping: Option<LayerId>,
    pub(crate) lost_grouped_mapping: bool,
    pub(crate) subpixel_accumulation: LayoutSize,
    pub(crate) needs_compositing_inputs_update: bool,
    pub(crate) child_needs_compositing_inputs_update: bool,
}

impl RenderLayer {
    fn new(name: String, style: LayerStyle, frame: LayoutRect) -> Self {
        Self {
            name,
            style,
            frame,
            scroll_offset: LayoutSize::zero(),
            contents_size: None,
            compositing_reasons: CompositingReasons::empty(),
            has_compositing_descendant: false,
            ancestor_inputs: AncestorDependentCompositingInputs::default(),
            descendant_inputs: DescendantDependentCompositingInputs::default(),
            grouped_mapping: None,
            lost_grouped_mapping: false,
            subpixel_accumulation: LayoutSize::zero(),
            needs_compositing_inputs_update: true,
            child_needs_compositing_inputs_update: true,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn style(&self) -> &LayerStyle {
        &self.style
    }

    #[inline]
    pub fn frame(&self) -> LayoutRect {
        self.frame
    }

    #[inline]
    pub fn size(&self) -> LayoutSize {
        self.frame.size()
    }

    #[inline]
    pub fn scroll_offset(&self) -> LayoutSize {
        self.scroll_offset
    }

    /// Size of the scrollable contents; the border box when not set.
    #[inline]
    pub fn contents_size(&self) -> LayoutSize {
        self.contents_size.unwrap_or_else(|| self.frame.size())
    }

    #[inline]
    pub fn compositing_reasons(&self) -> CompositingReasons {
        self.compositing_reasons
    }

    #[inline]
    pub fn has_compositing_descendant(&self) -> bool {
        self.has_compositing_descendant
    }

    #[inline]
    pub fn ancestor_dependent_inputs(&self) -> &AncestorDependentCompositingInputs {
        &self.ancestor_inputs
    }

    #[inline]
    pub fn descendant_dependent_inputs(&self) -> DescendantDependentCompositingInputs {
        self.descendant_inputs
    }

    /// The layer whose mapping holds the squashing layer this layer paints into.
    #[inline]
    pub fn grouped_mapping(&self) -> Option<LayerId> {
        self.grouped_mapping
    }

    #[inline]
    pub fn subpixel_accumulation(&self) -> LayoutSize {
        self.subpixel_accumulation
    }

    #[inline]
    pub fn needs_compositing_inputs_update(&self) -> bool {
        self.needs_compositing_inputs_update
    }

    #[inline]
    pub fn child_needs_compositing_inputs_update(&self) -> bool {
        self.child_needs_compositing_inputs_update
    }

    #[inline]
    pub fn is_self_painting(&self) -> bool {
        self.style.is_self_painting
    }

    #[inline]
    pub fn scrolls_overflow(&self) -> bool {
        self.style.scrollable
    }

    /// Whether the layer clips its descendants with a border radius.
    #[inline]
    pub fn clips_with_border_radius(&self) -> bool {
        self.style.has_border_radius && self.style.has_clip_or_overflow_clip()
    }

    /// Local clip box: the CSS clip and/or the border box when overflow clips.
    pub fn clip_box(&self) -> LayoutRect {
        let border_box = LayoutRect::from_origin_size(LayoutPoint::zero(), self.frame.size());
        match (self.style.clip, self.style.overflow_clip || self.style.scrollable) {
            (Some(clip), true) => clip.intersect(border_box),
            (Some(clip), false) => clip,
            (None, _) => border_box,
        }
    }

    /// Local box used for overlap testing.
    #[inline]
    pub fn local_bounding_box(&self) -> LayoutRect {
        LayoutRect::from_origin_size(LayoutPoint::zero(), self.frame.size())
    }
}

/// Paint-order child lists of one layer.
#[derive(Debug, Clone, Default)]
pub struct ZOrderLists {
    pub negative: SmallVec<LayerId, 4>,
    pub normal_flow: SmallVec<LayerId, 8>,
    pub positive: SmallVec<LayerId, 4>,
}

impl ZOrderLists {
    /// Normal-flow children followed by positive z-order children.
    pub fn normal_flow_and_positive(&self) -> impl Iterator<Item = LayerId> + '_ {
        self.normal_flow.iter().chain(self.positive.iter()).copied()
    }

    /// Every child in paint order.
    pub fn all(&self) -> impl Iterator<Item = LayerId> + '_ {
        self.negative.iter().copied().chain(self.normal_flow_and_positive())
    }
}

/// Arena-backed render-layer tree rooted at the view layer.
#[derive(Debug)]
pub struct RenderLayerTree {
    arena: Arena<RenderLayer>,
    root: LayerId,
}

impl RenderLayerTree {
    /// Create a tree whose root (view) layer covers `viewport`.
    pub fn new(root_style: LayerStyle, viewport: LayoutSize) -> Self {
        let mut arena = Arena::new();
        let root = arena.new_node(RenderLayer::new(
            "#root".to_owned(),
            root_style,
            LayoutRect::from_origin_size(LayoutPoint::zero(), viewport),
        ));
        Self {
            arena,
            root: LayerId(root),
        }
    }

    #[inline]
    pub fn root(&self) -> LayerId {
        self.root
    }

    #[inline]
    pub fn is_root(&self, id: LayerId) -> bool {
        id == self.root
    }

    /// Look up a live layer.
    pub fn get(&self, id: LayerId) -> Option<&RenderLayer> {
        self.arena
            .get(id.0)
            .filter(|node| !node.is_removed())
            .map(indextree::Node::get)
    }

    pub(crate) fn get_mut(&mut self, id: LayerId) -> Option<&mut RenderLayer> {
        self.arena
            .get_mut(id.0)
            .filter(|node| !node.is_removed())
            .map(indextree::Node::get_mut)
    }

    /// Access a layer the passes already know to be live.
    pub(crate) fn layer(&self, id: LayerId) -> &RenderLayer {
        self.arena[id.0].get()
    }

    pub(crate) fn layer_mut(&mut self, id: LayerId) -> &mut RenderLayer {
        self.arena[id.0].get_mut()
    }

    fn checked(&self, id: LayerId) -> Result<()> {
        self.get(id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("unknown or removed render layer {}", id.index()))
    }

    /// Append a new layer as the last child of `parent`.
    ///
    /// # Errors
    /// Returns an error if `parent` is not a live layer of this tree.
    pub fn append_child(
        &mut self,
        parent: LayerId,
        name: &str,
        style: LayerStyle,
        frame: LayoutRect,
    ) -> Result<LayerId> {
        self.checked(parent)?;
        let node = self
            .arena
            .new_node(RenderLayer::new(name.to_owned(), style, frame));
        parent
            .0
            .checked_append(node, &mut self.arena)
            .map_err(|err| anyhow!("cannot append layer under {}: {err:?}", parent.index()))?;
        let child = LayerId(node);
        self.set_needs_compositing_inputs_update(child);
        Ok(child)
    }

    /// Remove a layer and its whole subtree from the tree.
    ///
    /// # Errors
    /// Returns an error if `id` is unknown or is the root layer.
    pub fn remove_layer(&mut self, id: LayerId) -> Result<()> {
        self.checked(id)?;
        if self.is_root(id) {
            return Err(anyhow!("the root render layer cannot be removed"));
        }
        if let Some(parent) = self.parent(id) {
            self.set_needs_compositing_inputs_update(parent);
        }
        id.0.remove_subtree(&mut self.arena);
        Ok(())
    }

    /// Replace the style inputs of a layer.
    ///
    /// # Errors
    /// Returns an error if `id` is not a live layer.
    pub fn set_style(&mut self, id: LayerId, style: LayerStyle) -> Result<()> {
        self.checked(id)?;
        self.layer_mut(id).style = style;
        self.set_needs_compositing_inputs_update(id);
        Ok(())
    }

    /// Move or resize a layer.
    ///
    /// # Errors
    /// Returns an error if `id` is not a live layer.
    pub fn set_frame(&mut self, id: LayerId, frame: LayoutRect) -> Result<()> {
        self.checked(id)?;
        self.layer_mut(id).frame = frame;
        self.set_needs_compositing_inputs_update(id);
        Ok(())
    }

    /// Scroll a scrollable layer.
    ///
    /// # Errors
    /// Returns an error if `id` is not a live layer.
    pub fn set_scroll_offset(&mut self, id: LayerId, offset: LayoutSize) -> Result<()> {
        self.checked(id)?;
        self.layer_mut(id).scroll_offset = offset;
        self.set_needs_compositing_inputs_update(id);
        Ok(())
    }

    /// Set the scrollable contents size of a layer.
    ///
    /// # Errors
    /// Returns an error if `id` is not a live layer.
    pub fn set_contents_size(&mut self, id: LayerId, size: LayoutSize) -> Result<()> {
        self.checked(id)?;
        self.layer_mut(id).contents_size = Some(size);
        self.set_needs_compositing_inputs_update(id);
        Ok(())
    }

    /// Mark a layer's ancestor-dependent inputs stale.
    pub(crate) fn set_needs_compositing_inputs_update(&mut self, id: LayerId) {
        self.layer_mut(id).needs_compositing_inputs_update = true;
        let mut current = Some(id.0);
        while let Some(node) = current {
            let layer = self.arena[node].get_mut();
            if layer.child_needs_compositing_inputs_update && node != id.0 {
                break;
            }
            layer.child_needs_compositing_inputs_update = true;
            current = self.arena[node].parent();
        }
    }

    /// Whether any layer still has stale compositing inputs.
    pub fn needs_compositing_inputs_update(&self) -> bool {
        self.layer(self.root).child_needs_compositing_inputs_update
    }

    #[inline]
    pub fn parent(&self, id: LayerId) -> Option<LayerId> {
        self.arena.get(id.0).and_then(indextree::Node::parent).map(LayerId)
    }

    /// Children in tree order.
    pub fn children(&self, id: LayerId) -> impl Iterator<Item = LayerId> + '_ {
        id.0.children(&self.arena).map(LayerId)
    }

    /// Strict ancestors, nearest first.
    pub fn ancestors(&self, id: LayerId) -> impl Iterator<Item = LayerId> + '_ {
        id.0.ancestors(&self.arena).skip(1).map(LayerId)
    }

    /// The layer and all its descendants, in tree order.
    pub fn descendants_and_self(&self, id: LayerId) -> impl Iterator<Item = LayerId> + '_ {
        id.0.descendants(&self.arena).map(LayerId)
    }

    /// Whether `id` is `ancestor` or lies below it.
    pub fn is_descendant_or_self(&self, id: LayerId, ancestor: LayerId) -> bool {
        id.0.ancestors(&self.arena).any(|node| node == ancestor.0)
    }

    #[inline]
    pub fn is_stacking_context(&self, id: LayerId) -> bool {
        self.is_root(id) || self.layer(id).style.creates_stacking_context()
    }

    /// Paint-order lists of `id`.
    ///
    /// Normal-flow-only children stay with their parent. Every other layer
    /// paints in the lists of its nearest stacking-context ancestor, so a
    /// stacking context collects them through non-stacking-context layers.
    pub fn z_order_lists(&self, id: LayerId) -> ZOrderLists {
        let mut lists = ZOrderLists::default();
        lists
            .normal_flow
            .extend(self.children(id).filter(|child| self.is_normal_flow_only(*child)));
        if !self.is_stacking_context(id) {
            return lists;
        }
        let mut negative: Vec<(i32, LayerId)> = Vec::new();
        let mut positive: Vec<(i32, LayerId)> = Vec::new();
        for child in self.children(id) {
            self.collect_layers(child, &mut negative, &mut positive);
        }
        negative.sort_by_key(|entry| entry.0);
        positive.sort_by_key(|entry| entry.0);
        lists.negative.extend(negative.into_iter().map(|entry| entry.1));
        lists.positive.extend(positive.into_iter().map(|entry| entry.1));
        lists
    }

    fn collect_layers(
        &self,
        id: LayerId,
        negative: &mut Vec<(i32, LayerId)>,
        positive: &mut Vec<(i32, LayerId)>,
    ) {
        if !self.is_normal_flow_only(id) {
            let z_index = self.layer(id).style.z_index.unwrap_or(0);
            if z_index < 0 {
                negative.push((z_index, id));
            } else {
                positive.push((z_index, id));
            }
        }
        if !self.is_stacking_context(id) {
            for child in self.children(id) {
                self.collect_layers(child, negative, positive);
            }
        }
    }

    /// The layer whose z-order lists contain `id`.
    pub fn compositing_container(&self, id: LayerId) -> Option<LayerId> {
        if self.is_normal_flow_only(id) {
            return self.parent(id);
        }
        self.ancestors(id).find(|ancestor| self.is_stacking_context(*ancestor))
    }

    /// Paint-order ancestors, nearest first.
    pub fn compositing_ancestors(&self, id: LayerId) -> impl Iterator<Item = LayerId> + '_ {
        std::iter::successors(self.compositing_container(id), |container| {
            self.compositing_container(*container)
        })
    }

    /// Whether the layer has negative z-order children.
    pub fn has_negative_z_order_list(&self, id: LayerId) -> bool {
        !self.z_order_lists(id).negative.is_empty()
    }

    /// Every layer below `root` (inclusive) in paint order.
    pub fn paint_order(&self, root: LayerId) -> Vec<LayerId> {
        let mut order = Vec::new();
        self.collect_paint_order(root, &mut order);
        order
    }

    fn collect_paint_order(&self, id: LayerId, order: &mut Vec<LayerId>) {
        let lists = self.z_order_lists(id);
        for child in &lists.negative {
            self.collect_paint_order(*child, order);
        }
        order.push(id);
        for child in lists.normal_flow_and_positive() {
            self.collect_paint_order(child, order);
        }
    }

    /// The layer of the containing block of `id`.
    pub fn containing_layer(&self, id: LayerId) -> Option<LayerId> {
        let parent = self.parent(id)?;
        match self.layer(id).style.position {
            Position::Fixed => Some(
                self.ancestors(id)
                    .find(|ancestor| self.layer(*ancestor).style.has_transform())
                    .unwrap_or(self.root),
            ),
            Position::Absolute => Some(
                self.ancestors(id)
                    .find(|ancestor| {
                        let style = &self.layer(*ancestor).style;
                        style.position.is_positioned() || style.has_transform()
                    })
                    .unwrap_or(self.root),
            ),
            Position::Static | Position::Relative => Some(parent),
        }
    }

    /// Whether `id` moves when `scroller` scrolls.
    pub fn is_scrolled_by(&self, id: LayerId, scroller: LayerId) -> bool {
        if id == scroller || !self.is_descendant_or_self(id, scroller) {
            return false;
        }
        let mut current = id;
        while let Some(container) = self.containing_layer(current) {
            if container == scroller {
                return true;
            }
            if !self.is_descendant_or_self(container, scroller) {
                return false;
            }
            current = container;
        }
        false
    }

    /// Offset of the layer origin from the root, ignoring transforms.
    pub fn absolute_offset(&self, id: LayerId) -> LayoutPoint {
        let mut offset = LayoutPoint::zero();
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            offset = offset.moved_by(self.offset_in_parent(current, parent));
            current = parent;
        }
        offset
    }

    fn offset_in_parent(&self, id: LayerId, parent: LayerId) -> LayoutSize {
        let frame = self.layer(id).frame;
        let mut delta = LayoutSize::new(frame.x, frame.y);
        let parent_layer = self.layer(parent);
        if parent_layer.scrolls_overflow() && self.is_scrolled_by(id, parent) {
            delta.width -= parent_layer.scroll_offset.width;
            delta.height -= parent_layer.scroll_offset.height;
        }
        delta
    }

    /// Offset of `id` in the coordinate space of `ancestor` (root when `None`).
    pub fn convert_to_layer_coords(&self, id: LayerId, ancestor: Option<LayerId>) -> LayoutPoint {
        let offset = self.absolute_offset(id);
        ancestor.map_or(offset, |ancestor| {
            let delta = offset.offset_from(self.absolute_offset(ancestor));
            LayoutPoint::new(delta.width, delta.height)
        })
    }

    /// Offset of `id` from its nearest transformed ancestor.
    pub fn offset_from_transformed_ancestor(&self, id: LayerId) -> LayoutPoint {
        let transform_ancestor = self.layer(id).ancestor_inputs.transform_ancestor;
        self.convert_to_layer_coords(id, transform_ancestor)
    }

    /// Map a rectangle in the local space of `id` to absolute space, applying transforms.
    pub fn map_to_absolute(&self, id: LayerId, rect: LayoutRect) -> LayoutRect {
        self.map_rect_to_ancestor(id, None, rect)
    }

    /// Map a rectangle in the local space of `id` into the space of `ancestor`.
    ///
    /// Transforms of `id` and of every layer strictly below `ancestor` apply;
    /// the transform of `ancestor` itself does not.
    pub fn map_rect_to_ancestor(
        &self,
        id: LayerId,
        ancestor: Option<LayerId>,
        rect: LayoutRect,
    ) -> LayoutRect {
        let mut mapped = rect;
        let mut current = id;
        while Some(current) != ancestor {
            let layer = self.layer(current);
            if let Some(transform) = layer.style.transform {
                let size = layer.frame.size();
                let centre = LayoutPoint::new(size.width / 2.0, size.height / 2.0);
                mapped = transform.about_origin(centre).map_rect(mapped);
            }
            let Some(parent) = self.parent(current) else {
                break;
            };
            mapped = mapped.moved_by(self.offset_in_parent(current, parent));
            current = parent;
        }
        mapped
    }

    /// Absolute clip applied to `id` by the clipping layers of its containing-block chain.
    pub fn background_clip_rect(&self, id: LayerId) -> LayoutRect {
        let mut clip = LayoutRect::infinite();
        let mut current = id;
        while let Some(container) = self.containing_layer(current) {
            let layer = self.layer(container);
            if layer.style.has_clip_or_overflow_clip() {
                clip = clip.intersect(self.map_to_absolute(container, layer.clip_box()));
            }
            current = container;
        }
        clip
    }

    /// Clip applied to `id` by the clipping layers of its containing-block
    /// chain below `ancestor`, in the transform-free space of `ancestor`.
    ///
    /// The clip of `ancestor` itself applies only when `include_ancestor` is
    /// set. Returns `None` when nothing clips.
    pub fn clip_rect_relative_to(
        &self,
        id: LayerId,
        ancestor: LayerId,
        include_ancestor: bool,
    ) -> Option<LayoutRect> {
        let base = self.absolute_offset(ancestor);
        let mut clip: Option<LayoutRect> = None;
        let mut current = id;
        while let Some(container) = self.containing_layer(current) {
            if !self.is_descendant_or_self(container, ancestor)
                || (container == ancestor && !include_ancestor)
            {
                break;
            }
            let layer = self.layer(container);
            if layer.style.has_clip_or_overflow_clip() {
                let offset = self.absolute_offset(container).offset_from(base);
                let local = layer.clip_box().moved_by(offset);
                clip = Some(clip.map_or(local, |existing| existing.intersect(local)));
            }
            if container == ancestor {
                break;
            }
            current = container;
        }
        clip
    }

    /// Clips of the containing-block chain of `id` up to and including
    /// `last`, in the transform-free space of `space`.
    ///
    /// Unlike [`Self::clip_rect_relative_to`] the walk is not bounded by the
    /// subtree of `space`; an unclipped descendant is clipped by layers that
    /// paint outside its compositing container.
    pub fn containing_block_clip_through(
        &self,
        id: LayerId,
        last: LayerId,
        space: LayerId,
    ) -> Option<LayoutRect> {
        let base = self.absolute_offset(space);
        let mut clip: Option<LayoutRect> = None;
        let mut current = id;
        while let Some(container) = self.containing_layer(current) {
            let layer = self.layer(container);
            if layer.style.has_clip_or_overflow_clip() {
                let offset = self.absolute_offset(container).offset_from(base);
                let local = layer.clip_box().moved_by(offset);
                clip = Some(clip.map_or(local, |existing| existing.intersect(local)));
            }
            if container == last {
                break;
            }
            current = container;
        }
        clip
    }

    /// Whether the layer only ever paints in its parent's normal-flow list.
    pub fn is_normal_flow_only(&self, id: LayerId) -> bool {
        if self.is_root(id) {
            return false;
        }
        let style = &self.layer(id).style;
        !style.position.is_positioned() && style.z_index.is_none() && !style.creates_stacking_context()
    }
}
