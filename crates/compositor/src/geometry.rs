//! Layout-space and device-pixel geometry used by the compositing passes.
//!
//! Layout geometry is fractional (`f32`); graphics layers are positioned on
//! whole pixels, so every conversion goes through [`round_to_int`] which rounds
//! halves upward the same way on both signs of the origin.

use serde::Serialize;

/// Round a layout value to the nearest device pixel, halves rounding up.
#[inline]
pub fn round_to_int(value: f32) -> i32 {
    (value + 0.5).floor() as i32
}

/// A point in layout space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LayoutPoint {
    pub x: f32,
    pub y: f32,
}

impl LayoutPoint {
    /// Create a new point.
    #[inline]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// The origin.
    #[inline]
    pub const fn zero() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    /// Offset this point by a size.
    #[inline]
    #[must_use]
    pub fn moved_by(self, delta: LayoutSize) -> Self {
        Self::new(self.x + delta.width, self.y + delta.height)
    }

    /// Difference between two points.
    #[inline]
    pub fn offset_from(self, other: Self) -> LayoutSize {
        LayoutSize::new(self.x - other.x, self.y - other.y)
    }

    /// Round to the nearest pixel.
    #[inline]
    pub fn rounded(self) -> IntPoint {
        IntPoint::new(round_to_int(self.x), round_to_int(self.y))
    }
}

/// A size (or offset) in layout space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LayoutSize {
    pub width: f32,
    pub height: f32,
}

impl LayoutSize {
    /// Create a new size.
    #[inline]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// The empty size.
    #[inline]
    pub const fn zero() -> Self {
        Self {
            width: 0.0,
            height: 0.0,
        }
    }

    /// Whether either dimension is non-positive.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Round both components.
    #[inline]
    pub fn rounded(self) -> IntSize {
        IntSize::new(round_to_int(self.width), round_to_int(self.height))
    }
}

/// A rectangle in layout space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LayoutRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Extent used for "no clip" rectangles.
const INFINITE_EXTENT: f32 = 1.0e7;

impl LayoutRect {
    /// Create a new rectangle.
    #[inline]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a rectangle from an origin and a size.
    #[inline]
    pub const fn from_origin_size(origin: LayoutPoint, size: LayoutSize) -> Self {
        Self::new(origin.x, origin.y, size.width, size.height)
    }

    /// A rectangle large enough to stand for "unclipped".
    #[inline]
    pub const fn infinite() -> Self {
        Self::new(
            -INFINITE_EXTENT / 2.0,
            -INFINITE_EXTENT / 2.0,
            INFINITE_EXTENT,
            INFINITE_EXTENT,
        )
    }

    /// Whether this is the unclipped sentinel.
    #[inline]
    pub fn is_infinite(self) -> bool {
        self == Self::infinite()
    }

    #[inline]
    pub const fn location(self) -> LayoutPoint {
        LayoutPoint::new(self.x, self.y)
    }

    #[inline]
    pub const fn size(self) -> LayoutSize {
        LayoutSize::new(self.width, self.height)
    }

    #[inline]
    pub fn max_x(self) -> f32 {
        self.x + self.width
    }

    #[inline]
    pub fn max_y(self) -> f32 {
        self.y + self.height
    }

    /// Whether the rectangle covers no area.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.size().is_empty()
    }

    /// Translate the rectangle.
    #[inline]
    #[must_use]
    pub fn moved_by(self, delta: LayoutSize) -> Self {
        Self::new(
            self.x + delta.width,
            self.y + delta.height,
            self.width,
            self.height,
        )
    }

    /// Intersection of two rectangles; empty rectangles keep the clamped origin.
    #[must_use]
    pub fn intersect(self, other: Self) -> Self {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.max_x().min(other.max_x());
        let bottom = self.max_y().min(other.max_y());
        if right <= left || bottom <= top {
            return Self::new(left, top, 0.0, 0.0);
        }
        Self::new(left, top, right - left, bottom - top)
    }

    /// Smallest rectangle containing both; empty operands are ignored.
    #[must_use]
    pub fn unite(self, other: Self) -> Self {
        if other.is_empty() {
            return self;
        }
        if self.is_empty() {
            return other;
        }
        let left = self.x.min(other.x);
        let top = self.y.min(other.y);
        let right = self.max_x().max(other.max_x());
        let bottom = self.max_y().max(other.max_y());
        Self::new(left, top, right - left, bottom - top)
    }

    /// Whether the two rectangles share any area.
    #[inline]
    pub fn intersects(self, other: Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.max_x()
            && other.x < self.max_x()
            && self.y < other.max_y()
            && other.y < self.max_y()
    }

    /// Snap each edge to the nearest pixel.
    pub fn pixel_snapped(self) -> IntRect {
        let left = round_to_int(self.x);
        let top = round_to_int(self.y);
        IntRect::new(
            left,
            top,
            round_to_int(self.max_x()) - left,
            round_to_int(self.max_y()) - top,
        )
    }

    /// Smallest pixel rectangle containing this one.
    pub fn enclosing_int_rect(self) -> IntRect {
        let left = self.x.floor() as i32;
        let top = self.y.floor() as i32;
        IntRect::new(
            left,
            top,
            self.max_x().ceil() as i32 - left,
            self.max_y().ceil() as i32 - top,
        )
    }
}

/// A point on the pixel grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct IntPoint {
    pub x: i32,
    pub y: i32,
}

impl IntPoint {
    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    #[inline]
    pub const fn zero() -> Self {
        Self { x: 0, y: 0 }
    }

    #[inline]
    pub fn offset_from(self, other: Self) -> IntSize {
        IntSize::new(self.x - other.x, self.y - other.y)
    }

    #[inline]
    #[must_use]
    pub fn moved_by(self, delta: IntSize) -> Self {
        Self::new(self.x + delta.width, self.y + delta.height)
    }

    /// Convert to layout space.
    #[inline]
    pub fn to_layout(self) -> LayoutPoint {
        LayoutPoint::new(self.x as f32, self.y as f32)
    }
}

/// A size on the pixel grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct IntSize {
    pub width: i32,
    pub height: i32,
}

impl IntSize {
    #[inline]
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub const fn zero() -> Self {
        Self {
            width: 0,
            height: 0,
        }
    }

    /// Area in pixels; negative dimensions count as zero.
    #[inline]
    pub fn area(self) -> u64 {
        u64::from(self.width.max(0).unsigned_abs()) * u64::from(self.height.max(0).unsigned_abs())
    }

    #[inline]
    pub fn to_layout(self) -> LayoutSize {
        LayoutSize::new(self.width as f32, self.height as f32)
    }
}

impl std::ops::Add for LayoutSize {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(self.width + other.width, self.height + other.height)
    }
}

impl std::ops::Sub for LayoutSize {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::new(self.width - other.width, self.height - other.height)
    }
}

impl std::ops::Neg for LayoutSize {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.width, -self.height)
    }
}

impl std::ops::Add for IntSize {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(self.width + other.width, self.height + other.height)
    }
}

impl std::ops::Sub for IntSize {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::new(self.width - other.width, self.height - other.height)
    }
}

impl std::ops::Neg for IntSize {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.width, -self.height)
    }
}

/// A rectangle on the pixel grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct IntRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl IntRect {
    #[inline]
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[inline]
    pub const fn location(self) -> IntPoint {
        IntPoint::new(self.x, self.y)
    }

    #[inline]
    pub const fn size(self) -> IntSize {
        IntSize::new(self.width, self.height)
    }

    #[inline]
    pub fn max_x(self) -> i32 {
        self.x + self.width
    }

    #[inline]
    pub fn max_y(self) -> i32 {
        self.y + self.height
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Area in pixels.
    #[inline]
    pub fn area(self) -> u64 {
        self.size().area()
    }

    #[inline]
    #[must_use]
    pub fn moved_by(self, delta: IntSize) -> Self {
        Self::new(
            self.x + delta.width,
            self.y + delta.height,
            self.width,
            self.height,
        )
    }

    /// Smallest rectangle containing both; empty operands are ignored.
    #[must_use]
    pub fn unite(self, other: Self) -> Self {
        if other.is_empty() {
            return self;
        }
        if self.is_empty() {
            return other;
        }
        let left = self.x.min(other.x);
        let top = self.y.min(other.y);
        Self::new(
            left,
            top,
            self.max_x().max(other.max_x()) - left,
            self.max_y().max(other.max_y()) - top,
        )
    }

    /// Intersection; an empty result keeps the clamped origin.
    #[must_use]
    pub fn intersect(self, other: Self) -> Self {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.max_x().min(other.max_x());
        let bottom = self.max_y().min(other.max_y());
        if right <= left || bottom <= top {
            return Self::new(left, top, 0, 0);
        }
        Self::new(left, top, right - left, bottom - top)
    }

    #[inline]
    pub fn intersects(self, other: Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.max_x()
            && other.x < self.max_x()
            && self.y < other.max_y()
            && other.y < self.max_y()
    }

    #[inline]
    pub fn to_layout(self) -> LayoutRect {
        LayoutRect::new(
            self.x as f32,
            self.y as f32,
            self.width as f32,
            self.height as f32,
        )
    }
}

/// A 2D affine transform: `x' = a*x + c*y + e`, `y' = b*x + d*y + f`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Transform2D {
    pub m11: f32,
    pub m12: f32,
    pub m21: f32,
    pub m22: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform2D {
    #[inline]
    pub const fn identity() -> Self {
        Self {
            m11: 1.0,
            m12: 0.0,
            m21: 0.0,
            m22: 1.0,
            tx: 0.0,
            ty: 0.0,
        }
    }

    #[inline]
    pub const fn translation(tx: f32, ty: f32) -> Self {
        Self {
            m11: 1.0,
            m12: 0.0,
            m21: 0.0,
            m22: 1.0,
            tx,
            ty,
        }
    }

    #[inline]
    pub const fn scale(sx: f32, sy: f32) -> Self {
        Self {
            m11: sx,
            m12: 0.0,
            m21: 0.0,
            m22: sy,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// Rotation by `radians` around the origin.
    pub fn rotation(radians: f32) -> Self {
        let (sin, cos) = radians.sin_cos();
        Self {
            m11: cos,
            m12: sin,
            m21: -sin,
            m22: cos,
            tx: 0.0,
            ty: 0.0,
        }
    }

    #[inline]
    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// `self` applied after `first`.
    #[must_use]
    pub fn then_after(&self, first: &Self) -> Self {
        Self {
            m11: self.m11 * first.m11 + self.m21 * first.m12,
            m12: self.m12 * first.m11 + self.m22 * first.m12,
            m21: self.m11 * first.m21 + self.m21 * first.m22,
            m22: self.m12 * first.m21 + self.m22 * first.m22,
            tx: self.m11 * first.tx + self.m21 * first.ty + self.tx,
            ty: self.m12 * first.tx + self.m22 * first.ty + self.ty,
        }
    }

    #[inline]
    pub fn map_point(&self, point: LayoutPoint) -> LayoutPoint {
        LayoutPoint::new(
            self.m11 * point.x + self.m21 * point.y + self.tx,
            self.m12 * point.x + self.m22 * point.y + self.ty,
        )
    }

    /// Bounding box of the transformed rectangle.
    pub fn map_rect(&self, rect: LayoutRect) -> LayoutRect {
        let corners = [
            self.map_point(LayoutPoint::new(rect.x, rect.y)),
            self.map_point(LayoutPoint::new(rect.max_x(), rect.y)),
            self.map_point(LayoutPoint::new(rect.x, rect.max_y())),
            self.map_point(LayoutPoint::new(rect.max_x(), rect.max_y())),
        ];
        let mut min_x = f32::INFINITY;
        let mut min_y = f32::INFINITY;
        let mut max_x = f32::NEG_INFINITY;
        let mut max_y = f32::NEG_INFINITY;
        for corner in corners {
            min_x = min_x.min(corner.x);
            min_y = min_y.min(corner.y);
            max_x = max_x.max(corner.x);
            max_y = max_y.max(corner.y);
        }
        LayoutRect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// Apply this transform around `origin` instead of the coordinate origin.
    pub fn about_origin(&self, origin: LayoutPoint) -> Self {
        Self::translation(origin.x, origin.y)
            .then_after(self)
            .then_after(&Self::translation(-origin.x, -origin.y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pixel snapping keeps the far edge on the grid instead of the width.
    #[test]
    fn pixel_snapping_rounds_edges() {
        let snapped = LayoutRect::new(0.4, 0.6, 10.2, 10.0).pixel_snapped();
        assert_eq!(snapped, IntRect::new(0, 1, 11, 10));
    }

    /// Empty intersections keep a zero size.
    #[test]
    fn disjoint_intersection_is_empty() {
        let first = IntRect::new(0, 0, 10, 10);
        let second = IntRect::new(20, 20, 5, 5);
        assert!(first.intersect(second).is_empty());
        assert!(!first.intersects(second));
    }

    /// Uniting with an empty rectangle is a no-op.
    #[test]
    fn unite_ignores_empty() {
        let rect = IntRect::new(5, 5, 10, 10);
        assert_eq!(rect.unite(IntRect::default()), rect);
        assert_eq!(IntRect::default().unite(rect), rect);
    }

    /// A half-turn about the centre maps a box onto itself.
    #[test]
    fn rotation_about_centre_keeps_bounds() {
        let rect = LayoutRect::new(0.0, 0.0, 100.0, 50.0);
        let mapped = Transform2D::rotation(std::f32::consts::PI)
            .about_origin(LayoutPoint::new(50.0, 25.0))
            .map_rect(rect);
        assert!((mapped.x - 0.0).abs() < 1e-3);
        assert!((mapped.width - 100.0).abs() < 1e-3);
        assert!((mapped.height - 50.0).abs() < 1e-3);
    }
}
