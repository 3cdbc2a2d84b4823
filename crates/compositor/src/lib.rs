//! Compositing layer assignment and graphics-layer tree synthesis.
//!
//! A [`RenderLayerCompositor`] owns a tree of render layers. Each update it
//! decides which layers get a graphics backing of their own, which are
//! squashed into a shared backing, and which paint into an ancestor, then
//! rebuilds the graphics-layer tree handed to the host.

pub mod compositor;
pub mod geometry;
pub mod graphics_layer;
mod graphics_layer_updater;
mod inputs_updater;
pub mod invalidation;
mod layer_assigner;
pub mod mapping;
pub mod reasons;
pub mod render_layer;
mod requirements_updater;
pub mod settings;
mod squashing_state;
mod tree_builder;

pub use compositor::{CompositingUpdateType, LayerPainter, PaintRequest, RenderLayerCompositor, RootLayerHost};
pub use geometry::{IntPoint, IntRect, IntSize, LayoutPoint, LayoutRect, LayoutSize, Transform2D};
pub use graphics_layer::{
    CompositorLayerRole, GraphicsLayer, GraphicsLayerClient, GraphicsLayerId, GraphicsLayerPaintingPhase,
    GraphicsLayerPurpose, GraphicsLayerSnapshot, GraphicsLayerTree,
};
pub use invalidation::{CompositingState, PaintInvalidation};
pub use layer_assigner::CompositingStateTransition;
pub use mapping::{CompositedLayerMapping, GraphicsLayerPaintInfo, GraphicsLayerUpdateScope};
pub use reasons::CompositingReasons;
pub use render_layer::{AcceleratedContent, LayerId, LayerStyle, Position, RenderLayer, RenderLayerTree};
pub use settings::CompositorSettings;
