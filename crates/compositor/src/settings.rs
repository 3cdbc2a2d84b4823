//! Compositor configuration.

/// A squashing group may not grow a bounding box larger than this many times
/// the summed area of the layers squashed into it.
pub const SQUASHING_SPARSITY_TOLERANCE: f64 = 6.0;

/// Settings read by the compositing passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositorSettings {
    /// Merge overlap-composited layers into shared backings.
    pub layer_squashing_enabled: bool,
    /// Composite scrollers (and their scroll children) even at the cost of LCD text.
    pub prefer_compositing_to_lcd_text: bool,
    /// Whether the root container layer masks to its bounds.
    pub main_frame_clips_content: bool,
    /// Keep the root layer composited even when nothing else is.
    pub force_compositing_mode: bool,
    /// Paint fixed root backgrounds into a dedicated background layer.
    pub composited_fixed_root_background: bool,
}

impl Default for CompositorSettings {
    fn default() -> Self {
        Self {
            layer_squashing_enabled: true,
            prefer_compositing_to_lcd_text: false,
            main_frame_clips_content: true,
            force_compositing_mode: false,
            composited_fixed_root_background: false,
        }
    }
}
