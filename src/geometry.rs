//! Geometry: pointer space → world space → snapped grid space.
//!
//! DESIGN
//! ======
//! Everything here is pure. A `Viewport` is the pan/scale pair of one
//! presentation surface; tables live in world space and seats live in the
//! rotating local frame of their table.

#[cfg(test)]
#[path = "geometry_test.rs"]
mod geometry_test;

use serde::{Deserialize, Serialize};

/// Smallest allowed viewport scale.
pub const MIN_SCALE: f64 = 0.1;

/// Largest allowed viewport scale.
pub const MAX_SCALE: f64 = 3.0;

/// A point in pointer, world, or table-local space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self { x: self.x + dx, y: self.y + dy }
    }
}

/// Pan/zoom state of a surface.
///
/// `pan_x` / `pan_y` are in pointer pixels. `scale` is always inside
/// `[MIN_SCALE, MAX_SCALE]`; every constructor clamps it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pan_x: f64,
    pan_y: f64,
    scale: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { pan_x: 0.0, pan_y: 0.0, scale: 1.0 }
    }
}

impl Viewport {
    #[must_use]
    pub fn new(pan_x: f64, pan_y: f64, scale: f64) -> Self {
        Self { pan_x, pan_y, scale: clamp_scale(scale) }
    }

    #[must_use]
    pub fn pan_x(&self) -> f64 {
        self.pan_x
    }

    #[must_use]
    pub fn pan_y(&self) -> f64 {
        self.pan_y
    }

    #[must_use]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Convert a pointer-space point to world coordinates.
    #[must_use]
    pub fn to_world(&self, pointer: Point) -> Point {
        Point {
            x: (pointer.x - self.pan_x) / self.scale,
            y: (pointer.y - self.pan_y) / self.scale,
        }
    }

    /// Convert a world-space point to pointer coordinates.
    #[must_use]
    pub fn to_screen(&self, world: Point) -> Point {
        Point {
            x: world.x * self.scale + self.pan_x,
            y: world.y * self.scale + self.pan_y,
        }
    }

    /// Move the viewport by a pointer-space delta.
    #[must_use]
    pub fn panned(self, dx: f64, dy: f64) -> Self {
        Self { pan_x: self.pan_x + dx, pan_y: self.pan_y + dy, scale: self.scale }
    }

    /// Zoom by `factor` keeping the world point under `pointer` fixed.
    #[must_use]
    pub fn zoom_at(self, pointer: Point, factor: f64) -> Self {
        let anchor = self.to_world(pointer);
        let scale = clamp_scale(self.scale * factor);
        Self {
            pan_x: pointer.x - anchor.x * scale,
            pan_y: pointer.y - anchor.y * scale,
            scale,
        }
    }
}

fn clamp_scale(scale: f64) -> f64 {
    if scale.is_nan() {
        return 1.0;
    }
    scale.clamp(MIN_SCALE, MAX_SCALE)
}

/// Round each axis to the nearest multiple of `grid_size`.
///
/// A non-positive grid disables snapping.
#[must_use]
pub fn snap(point: Point, grid_size: f64) -> Point {
    if grid_size <= 0.0 || !grid_size.is_finite() {
        return point;
    }
    Point {
        x: (point.x / grid_size).round() * grid_size,
        y: (point.y / grid_size).round() * grid_size,
    }
}

/// Normalize an angle in degrees into `[0, 360)`.
#[must_use]
pub fn normalize_degrees(degrees: f64) -> f64 {
    let r = degrees.rem_euclid(360.0);
    // rem_euclid can return 360.0 for tiny negative inputs.
    if r >= 360.0 { 0.0 } else { r }
}

/// Express a world point in the local frame of a table at `origin`
/// rotated by `rotation` degrees.
#[must_use]
pub fn to_table_local(world: Point, origin: Point, rotation: f64) -> Point {
    let (sin, cos) = rotation.to_radians().sin_cos();
    let dx = world.x - origin.x;
    let dy = world.y - origin.y;
    Point { x: dx * cos + dy * sin, y: -dx * sin + dy * cos }
}

/// Inverse of [`to_table_local`].
#[must_use]
pub fn to_table_world(local: Point, origin: Point, rotation: f64) -> Point {
    let (sin, cos) = rotation.to_radians().sin_cos();
    Point {
        x: origin.x + local.x * cos - local.y * sin,
        y: origin.y + local.x * sin + local.y * cos,
    }
}

/// Pointer position plus the viewport it was observed in, as delivered by a
/// drag gesture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragGeometry {
    pub pointer: Point,
    pub viewport: Viewport,
    /// World-space offset between the grabbed point and the entity origin.
    pub grab_offset: Point,
}

impl DragGeometry {
    #[must_use]
    pub fn new(pointer: Point, viewport: Viewport) -> Self {
        Self { pointer, viewport, grab_offset: Point::default() }
    }

    #[must_use]
    pub fn with_grab_offset(mut self, grab_offset: Point) -> Self {
        self.grab_offset = grab_offset;
        self
    }

    /// World position of the dragged entity's origin, before snapping.
    #[must_use]
    pub fn world_origin(&self) -> Point {
        self.viewport
            .to_world(self.pointer)
            .offset(-self.grab_offset.x, -self.grab_offset.y)
    }
}
