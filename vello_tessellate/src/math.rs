// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Single precision points and affine transforms.

use std::ops::{Add, AddAssign, Mul, Neg, Sub};

use bytemuck::{Pod, Zeroable};
use peniko::kurbo;

/// A point or vector in single precision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Point {
    /// The x coordinate.
    pub x: f32,
    /// The y coordinate.
    pub y: f32,
}

impl Point {
    /// The point `(0, 0)`.
    pub const ZERO: Self = Self::new(0., 0.);

    /// Create a new point.
    #[inline(always)]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[inline(always)]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// The z component of the 3D cross product.
    #[inline(always)]
    pub fn cross(self, other: Self) -> f32 {
        self.x * other.y - self.y * other.x
    }

    #[inline(always)]
    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    #[inline(always)]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Whether both coordinates are exactly zero.
    ///
    /// Note that `-0.0` counts as zero.
    #[inline(always)]
    pub fn is_zero(self) -> bool {
        self.x == 0. && self.y == 0.
    }

    #[inline(always)]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Component-wise minimum.
    #[inline(always)]
    pub fn min(self, other: Self) -> Self {
        Self::new(self.x.min(other.x), self.y.min(other.y))
    }

    /// Component-wise maximum.
    #[inline(always)]
    pub fn max(self, other: Self) -> Self {
        Self::new(self.x.max(other.x), self.y.max(other.y))
    }

    /// Interpolates from `a` towards `b` by `t`, computed as `(b - a) * t + a`.
    ///
    /// This does not necessarily return `b` for `t == 1`, but it chops exact cusps more precisely
    /// than `a * (1 - t) + b * t`. Callers that need the endpoint must not rely on this.
    #[inline(always)]
    pub fn unchecked_mix(a: Self, b: Self, t: f32) -> Self {
        (b - a) * t + a
    }

    pub fn to_array(self) -> [f32; 2] {
        [self.x, self.y]
    }

    pub fn from_kurbo(point: kurbo::Point) -> Self {
        Self::new(point.x as f32, point.y as f32)
    }

    pub fn to_kurbo(self) -> kurbo::Point {
        kurbo::Point::new(self.x as f64, self.y as f64)
    }
}

impl Add for Point {
    type Output = Self;

    #[inline(always)]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Point {
    #[inline(always)]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Point {
    type Output = Self;

    #[inline(always)]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Point {
    type Output = Self;

    #[inline(always)]
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Point {
    type Output = Self;

    #[inline(always)]
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

impl From<[f32; 2]> for Point {
    fn from(p: [f32; 2]) -> Self {
        Self::new(p[0], p[1])
    }
}

impl From<(f32, f32)> for Point {
    fn from(p: (f32, f32)) -> Self {
        Self::new(p.0, p.1)
    }
}

/// Affine transformation matrix.
///
/// The matrix is stored column-major, so a point maps to
/// `(m[0] * x + m[2] * y + t[0], m[1] * x + m[3] * y + t[1])`.
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Transform {
    /// 2x2 matrix.
    pub matrix: [f32; 4],
    /// Translation.
    pub translation: [f32; 2],
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    /// Identity transform.
    pub const IDENTITY: Self = Self {
        matrix: [1.0, 0.0, 0.0, 1.0],
        translation: [0.0; 2],
    };

    /// Creates a uniform scale transform.
    pub fn scale(s: f32) -> Self {
        Self {
            matrix: [s, 0.0, 0.0, s],
            translation: [0.0; 2],
        }
    }

    /// Creates a transform from a kurbo affine matrix.
    pub fn from_kurbo(transform: &kurbo::Affine) -> Self {
        let c = transform.as_coeffs().map(|x| x as f32);
        Self {
            matrix: [c[0], c[1], c[2], c[3]],
            translation: [c[4], c[5]],
        }
    }

    /// Converts the transform to a kurbo affine matrix.
    pub fn to_kurbo(&self) -> kurbo::Affine {
        kurbo::Affine::new(
            [
                self.matrix[0],
                self.matrix[1],
                self.matrix[2],
                self.matrix[3],
                self.translation[0],
                self.translation[1],
            ]
            .map(|x| x as f64),
        )
    }

    /// Maps a point, including translation.
    #[inline(always)]
    pub fn map_point(&self, p: Point) -> Point {
        let m = &self.matrix;
        Point::new(
            m[0] * p.x + m[2] * p.y + self.translation[0],
            m[1] * p.x + m[3] * p.y + self.translation[1],
        )
    }

    /// Maps a vector. Translation does not apply.
    #[inline(always)]
    pub fn map_vector(&self, v: Point) -> Point {
        let m = &self.matrix;
        Point::new(m[0] * v.x + m[2] * v.y, m[1] * v.x + m[3] * v.y)
    }

    /// Returns the determinant of the 2x2 part.
    pub fn determinant(&self) -> f32 {
        let m = &self.matrix;
        m[0] * m[3] - m[1] * m[2]
    }

    /// Returns the inverse of the 2x2 part in the same column-major layout, or `None` if the
    /// matrix is singular.
    pub fn inverse_linear(&self) -> Option<[f32; 4]> {
        let det = self.determinant();
        if det == 0. || !det.is_finite() {
            return None;
        }
        let inv_det = 1. / det;
        let m = &self.matrix;
        let inv = [
            m[3] * inv_det,
            -m[1] * inv_det,
            -m[2] * inv_det,
            m[0] * inv_det,
        ];
        inv.iter().all(|v| v.is_finite()).then_some(inv)
    }

    /// Returns the smallest and largest factors by which the transform scales a unit vector.
    ///
    /// These are the singular values of the 2x2 part. Returns `None` if they are not finite.
    pub fn min_max_scales(&self) -> Option<[f32; 2]> {
        let m = &self.matrix;
        // Eigenvalues of the symmetric matrix M^T * M.
        let a = m[0] * m[0] + m[1] * m[1];
        let b = m[0] * m[2] + m[1] * m[3];
        let c = m[2] * m[2] + m[3] * m[3];
        let half_sum = (a + c) * 0.5;
        let half_diff = (a - c) * 0.5;
        let root = (half_diff * half_diff + b * b).sqrt();
        let max = half_sum + root;
        // Cancellation can produce a slightly negative value for singular matrices.
        let min = (half_sum - root).max(0.);
        let scales = [min.sqrt(), max.sqrt()];
        (scales[0].is_finite() && scales[1].is_finite()).then_some(scales)
    }

    /// Returns the largest scale factor, or 1 if it is not finite.
    pub fn max_scale(&self) -> f32 {
        self.min_max_scales().map_or(1., |s| s[1])
    }
}

impl Mul for Transform {
    type Output = Self;

    #[inline]
    fn mul(self, other: Self) -> Self {
        Self {
            matrix: [
                self.matrix[0] * other.matrix[0] + self.matrix[2] * other.matrix[1],
                self.matrix[1] * other.matrix[0] + self.matrix[3] * other.matrix[1],
                self.matrix[0] * other.matrix[2] + self.matrix[2] * other.matrix[3],
                self.matrix[1] * other.matrix[2] + self.matrix[3] * other.matrix[3],
            ],
            translation: [
                self.matrix[0] * other.translation[0]
                    + self.matrix[2] * other.translation[1]
                    + self.translation[0],
                self.matrix[1] * other.translation[0]
                    + self.matrix[3] * other.translation[1]
                    + self.translation[1],
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Point, Transform};
    use peniko::kurbo::Affine;

    #[test]
    fn kurbo_conversion_keeps_coefficients() {
        let affine = Affine::new([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let t = Transform::from_kurbo(&affine);
        assert_eq!(t.matrix, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(t.translation, [5.0, 6.0]);
        assert_eq!(t.to_kurbo(), affine);
    }

    #[test]
    fn map_point_matches_kurbo() {
        let affine = Affine::rotate(0.3).then_scale(2.0).then_translate((3.0, -1.0).into());
        let t = Transform::from_kurbo(&affine);
        let p = Point::new(4.0, 7.0);
        let expected = affine * p.to_kurbo();
        let mapped = t.map_point(p);
        assert!((mapped.x as f64 - expected.x).abs() < 1e-4);
        assert!((mapped.y as f64 - expected.y).abs() < 1e-4);
    }

    #[test]
    fn map_vector_ignores_translation() {
        let t = Transform {
            matrix: [2.0, 0.0, 0.0, 3.0],
            translation: [100.0, 100.0],
        };
        assert_eq!(t.map_vector(Point::new(1.0, 1.0)), Point::new(2.0, 3.0));
    }

    #[test]
    fn min_max_scales_of_scale_and_rotation() {
        let t = Transform::from_kurbo(&Affine::rotate(1.1).then_scale_non_uniform(2.0, 5.0));
        let [min, max] = t.min_max_scales().unwrap();
        assert!((min - 2.0).abs() < 1e-5);
        assert!((max - 5.0).abs() < 1e-5);
        assert_eq!(Transform::IDENTITY.min_max_scales(), Some([1.0, 1.0]));
    }

    #[test]
    fn singular_matrix_has_no_inverse() {
        let t = Transform {
            matrix: [1.0, 2.0, 2.0, 4.0],
            translation: [0.0; 2],
        };
        assert!(t.inverse_linear().is_none());
        assert_eq!(t.min_max_scales().unwrap()[0], 0.0);
    }

    #[test]
    fn inverse_linear_undoes_matrix() {
        let t = Transform {
            matrix: [2.0, 1.0, -1.0, 3.0],
            translation: [0.0; 2],
        };
        let inv = Transform {
            matrix: t.inverse_linear().unwrap(),
            translation: [0.0; 2],
        };
        let p = Point::new(0.5, -2.0);
        let round_trip = inv.map_vector(t.map_vector(p));
        assert!((round_trip - p).length() < 1e-6);
    }

    #[test]
    fn multiplication_composes() {
        let a = Transform::from_kurbo(&Affine::translate((1.0, 2.0)));
        let b = Transform::scale(3.0);
        let p = Point::new(1.0, 1.0);
        assert_eq!((a * b).map_point(p), a.map_point(b.map_point(p)));
    }
}
