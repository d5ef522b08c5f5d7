use resvg::tiny_skia;

use crate::geometry::{Bounds, Point};

/// A 2D affine matrix.
///
/// Maps `(x, y)` to `(a*x + c*y + e, b*x + d*y + f)`. Composes
/// parent→child: a node's world matrix is its parent's world matrix
/// composed with its own local matrix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Matrix {
    /// Identity matrix (no transformation)
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn identity() -> Self {
        Self::IDENTITY
    }

    pub fn translate(x: f32, y: f32) -> Self {
        Self {
            e: x,
            f: y,
            ..Self::IDENTITY
        }
    }

    /// Rotation around the origin.
    pub fn rotate(angle_radians: f32) -> Self {
        let cos = angle_radians.cos();
        let sin = angle_radians.sin();
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn rotate_degrees(angle_degrees: f32) -> Self {
        Self::rotate(angle_degrees.to_radians())
    }

    pub fn scale(s: f32) -> Self {
        Self::scale_xy(s, s)
    }

    pub fn scale_xy(sx: f32, sy: f32) -> Self {
        Self {
            a: sx,
            d: sy,
            ..Self::IDENTITY
        }
    }

    /// Compose this matrix with another: `self * other`.
    /// Applies `other` first, then `self`.
    pub fn then(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            e: self.a * other.e + self.c * other.f + self.e,
            f: self.b * other.e + self.d * other.f + self.f,
        }
    }

    /// Inverse of this matrix. A degenerate matrix inverts to identity.
    pub fn inverse(&self) -> Matrix {
        let det = self.a * self.d - self.b * self.c;

        if det.abs() < 1e-10 {
            return Self::IDENTITY;
        }

        let inv_det = 1.0 / det;

        Matrix {
            a: self.d * inv_det,
            b: -self.b * inv_det,
            c: -self.c * inv_det,
            d: self.a * inv_det,
            e: (self.c * self.f - self.d * self.e) * inv_det,
            f: (self.b * self.e - self.a * self.f) * inv_det,
        }
    }

    /// `self * other⁻¹`: strips a trailing `other` from a composed matrix.
    ///
    /// `world.divide(&local)` yields the parent's world matrix.
    pub fn divide(&self, other: &Matrix) -> Matrix {
        self.then(&other.inverse())
    }

    /// Length of the transformed x axis.
    pub fn scale_x(&self) -> f32 {
        (self.a * self.a + self.b * self.b).sqrt()
    }

    /// Length of the transformed y axis.
    pub fn scale_y(&self) -> f32 {
        (self.c * self.c + self.d * self.d).sqrt()
    }

    pub fn transform_point(&self, point: Point) -> Point {
        Point::new(
            self.a * point.x + self.c * point.y + self.e,
            self.b * point.x + self.d * point.y + self.f,
        )
    }

    /// Axis-aligned bounds of the transformed rectangle.
    pub fn transform_bounds(&self, bounds: &Bounds) -> Bounds {
        let corners = bounds.corners().map(|p| self.transform_point(p));
        Bounds::from_points(&corners)
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    pub(crate) fn to_skia(self) -> tiny_skia::Transform {
        tiny_skia::Transform::from_row(self.a, self.b, self.c, self.d, self.e, self.f)
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    fn point_eq(p: Point, x: f32, y: f32) -> bool {
        approx_eq(p.x, x) && approx_eq(p.y, y)
    }

    #[test]
    fn test_identity() {
        let m = Matrix::identity();
        assert!(m.is_identity());
        assert!(point_eq(m.transform_point(Point::new(3.0, 4.0)), 3.0, 4.0));
    }

    #[test]
    fn test_rotate() {
        let m = Matrix::rotate_degrees(90.0);
        assert!(point_eq(m.transform_point(Point::new(1.0, 0.0)), 0.0, 1.0));
    }

    #[test]
    fn test_compose() {
        // Point (0,0) -> translate -> (10,0) -> scale -> (20,0)
        let composed = Matrix::scale(2.0).then(&Matrix::translate(10.0, 0.0));
        assert!(point_eq(composed.transform_point(Point::new(0.0, 0.0)), 20.0, 0.0));
    }

    #[test]
    fn test_inverse_round_trip() {
        let m = Matrix::translate(10.0, 20.0)
            .then(&Matrix::rotate_degrees(30.0))
            .then(&Matrix::scale_xy(2.0, 3.0));
        let back = m.then(&m.inverse());
        assert!(point_eq(back.transform_point(Point::new(5.0, 7.0)), 5.0, 7.0));
    }

    #[test]
    fn test_degenerate_inverse_is_identity() {
        assert!(Matrix::scale(0.0).inverse().is_identity());
    }

    #[test]
    fn test_divide_strips_local() {
        let parent = Matrix::translate(100.0, 0.0).then(&Matrix::scale(2.0));
        let local = Matrix::translate(5.0, 5.0);
        let world = parent.then(&local);
        let p = world.divide(&local).transform_point(Point::new(1.0, 1.0));
        let expected = parent.transform_point(Point::new(1.0, 1.0));
        assert!(point_eq(p, expected.x, expected.y));
    }

    #[test]
    fn test_scale_components() {
        let m = Matrix::rotate_degrees(45.0).then(&Matrix::scale_xy(2.0, 3.0));
        assert!(approx_eq(m.scale_x(), 2.0));
        assert!(approx_eq(m.scale_y(), 3.0));
    }

    #[test]
    fn test_transform_bounds() {
        let m = Matrix::translate(10.0, 20.0).then(&Matrix::scale(2.0));
        let b = m.transform_bounds(&Bounds::new(0.0, 0.0, 5.0, 5.0));
        assert_eq!(b, Bounds::new(10.0, 20.0, 10.0, 10.0));
    }
}
