// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wang's formula gives the minimum number of evenly spaced (in the parametric sense) line
//! segments that a Bézier curve must be chopped into in order to guarantee all lines stay within
//! a distance of `1/precision` pixels from the true curve. Its definition for a Bézier curve of
//! degree `n` is as follows:
//!
//! ```text
//!     maxLength = max([length(p[i+2] - 2p[i+1] + p[i]) for (0 <= i <= n-2)])
//!     numParametricSegments = sqrt(maxLength * precision * n*(n - 1)/8)
//! ```
//!
//! (Goldman, Ron. (2003). 5.6.3 Wang's Formula. "Pyramid Algorithms: A Dynamic Programming
//! Approach to Curves and Surfaces for Geometric Modeling". Morgan Kaufmann Publishers.)
//!
//! Every function here takes the precision, which is the reciprocal of the allowed error in
//! device pixels. The `_pow4` and `_pow2` variants skip the final roots, and the `_log2` variants
//! compute `ceil(log2(n))` straight from those powers without taking any roots.

use crate::math::{Point, Transform};

/// The linear part of a transform. Wang's formula only looks at differences of points, so the
/// translation never matters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VectorXform {
    m: [f32; 4],
}

impl VectorXform {
    pub const IDENTITY: Self = Self {
        m: [1., 0., 0., 1.],
    };

    pub fn new(transform: &Transform) -> Self {
        Self {
            m: transform.matrix,
        }
    }

    #[inline(always)]
    pub fn apply(&self, v: Point) -> Point {
        Point::new(
            self.m[0] * v.x + self.m[2] * v.y,
            self.m[1] * v.x + self.m[3] * v.y,
        )
    }

    pub fn matrix(&self) -> [f32; 4] {
        self.m
    }
}

impl Default for VectorXform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<&Transform> for VectorXform {
    fn from(transform: &Transform) -> Self {
        Self::new(transform)
    }
}

/// Returns the degree term `N*(N-1)/8 * precision` of Wang's formula for a Bézier of degree `N`.
#[inline]
pub const fn length_term<const N: usize>(precision: f32) -> f32 {
    (N * (N - 1)) as f32 / 8. * precision
}

/// Returns `length_term::<N>(precision)` squared.
#[inline]
pub const fn length_term_pow2<const N: usize>(precision: f32) -> f32 {
    ((N * N) * ((N - 1) * (N - 1))) as f32 / 64. * (precision * precision)
}

#[inline]
pub fn root4(x: f32) -> f32 {
    x.sqrt().sqrt()
}

/// Returns `ceil(log2(x))`, or 0 when `x <= 1`.
///
/// This reads the exponent out of the bit pattern: adding one less than the smallest mantissa
/// increment carries into the exponent for every value that is not an exact power of two. The
/// result is exact for every normal float, never rounded down. [`nextlog2_portable`] computes
/// the same value with `log2`.
///
/// Infinity and NaN, which come out of estimates that overflowed, return `u32::MAX` so callers
/// clamp them to their largest level.
#[inline]
pub fn nextlog2(x: f32) -> u32 {
    if x.is_nan() || x == f32::INFINITY {
        return u32::MAX;
    }
    let bits = x.to_bits().wrapping_add((1 << 23) - 1);
    let exp = ((bits as i32) >> 23) - 127;
    // Negative inputs have the sign bit set, which makes `exp` negative too.
    (exp & !(exp >> 31)) as u32
}

/// Same as [`nextlog2`], computed with floating point `log2`.
///
/// The logarithm is taken in double precision: in single precision, values just above a power of
/// two can round down onto it.
pub fn nextlog2_portable(x: f32) -> u32 {
    if x.is_nan() {
        return u32::MAX;
    }
    if x <= 1. {
        return 0;
    }
    (x as f64).log2().ceil() as u32
}

/// Returns `ceil(log4(x))`, which is `ceil(log2(sqrt(x)))`.
#[inline]
pub fn nextlog4(x: f32) -> u32 {
    nextlog2(x).saturating_add(1) >> 1
}

/// Returns `ceil(log16(x))`, which is `ceil(log2(root4(x)))`.
#[inline]
pub fn nextlog16(x: f32) -> u32 {
    nextlog2(x).saturating_add(3) >> 2
}

/// Returns Wang's formula, raised to the 4th power, specialized for a quadratic curve.
#[inline]
pub fn quadratic_pow4(precision: f32, pts: &[Point; 3], xform: &VectorXform) -> f32 {
    let v = xform.apply(pts[0] - pts[1] * 2. + pts[2]);
    v.length_squared() * length_term_pow2::<2>(precision)
}

/// Returns Wang's formula specialized for a quadratic curve.
pub fn quadratic(precision: f32, pts: &[Point; 3], xform: &VectorXform) -> f32 {
    root4(quadratic_pow4(precision, pts, xform))
}

/// Returns the log2 value of Wang's formula specialized for a quadratic curve, rounded up to the
/// next int.
pub fn quadratic_log2(precision: f32, pts: &[Point; 3], xform: &VectorXform) -> u32 {
    nextlog16(quadratic_pow4(precision, pts, xform))
}

/// Returns Wang's formula, raised to the 4th power, specialized for a cubic curve.
#[inline]
pub fn cubic_pow4(precision: f32, pts: &[Point; 4], xform: &VectorXform) -> f32 {
    let v0 = xform.apply(pts[0] - pts[1] * 2. + pts[2]);
    let v1 = xform.apply(pts[1] - pts[2] * 2. + pts[3]);
    v0.length_squared().max(v1.length_squared()) * length_term_pow2::<3>(precision)
}

/// Returns Wang's formula specialized for a cubic curve.
pub fn cubic(precision: f32, pts: &[Point; 4], xform: &VectorXform) -> f32 {
    root4(cubic_pow4(precision, pts, xform))
}

/// Returns the log2 value of Wang's formula specialized for a cubic curve, rounded up to the next
/// int.
pub fn cubic_log2(precision: f32, pts: &[Point; 4], xform: &VectorXform) -> u32 {
    nextlog16(cubic_pow4(precision, pts, xform))
}

/// Returns the maximum number of line segments a cubic with the given device-space bounding box
/// size would ever need to be divided into, raised to the 4th power.
///
/// Each component of a second difference is bounded by twice the box extent in that direction,
/// which gives `|p0 - 2p1 + p2|^2 <= 4 * (w^2 + h^2)`.
pub fn worst_case_cubic_pow4(precision: f32, dev_width: f32, dev_height: f32) -> f32 {
    let kk = length_term_pow2::<3>(precision);
    4. * kk * (dev_width * dev_width + dev_height * dev_height)
}

pub fn worst_case_cubic(precision: f32, dev_width: f32, dev_height: f32) -> f32 {
    root4(worst_case_cubic_pow4(precision, dev_width, dev_height))
}

pub fn worst_case_cubic_log2(precision: f32, dev_width: f32, dev_height: f32) -> u32 {
    nextlog16(worst_case_cubic_pow4(precision, dev_width, dev_height))
}

/// Returns the squared number of segments a conic with weight `w` needs.
///
/// This is not Wang's formula. The bound is from Zheng, J. & Sederberg, T. (2000). "Estimating
/// Tessellation Parameter Intervals for Rational Curves and Surfaces". ACM Transactions on
/// Graphics 19, 56-77. It combines the second difference of the weighted control points with
/// their distance from the origin, scaled by how far `w` is from 1. The points are centered on
/// their bounding box first, which keeps the distance term small.
///
/// `w` must be positive; callers turn other weights into lines.
pub fn conic_pow2(precision: f32, pts: &[Point; 3], w: f32, xform: &VectorXform) -> f32 {
    let p0 = xform.apply(pts[0]);
    let p1 = xform.apply(pts[1]);
    let p2 = xform.apply(pts[2]);
    let center = (p0.min(p1).min(p2) + p0.max(p1).max(p2)) * 0.5;
    let (p0, p1, p2) = (p0 - center, p1 - center, p2 - center);

    let max_len = p0
        .length_squared()
        .max(p1.length_squared())
        .max(p2.length_squared())
        .sqrt();

    let dp = p0 - p1 * (2. * w) + p2;
    let dw = (2. - 2. * w).abs();

    let rp_minus_1 = (max_len * precision - 1.).max(0.);
    let numer = dp.length() * precision + rp_minus_1 * dw;
    let denom = 4. * w.min(1.);
    numer / denom
}

/// Returns the number of segments a conic with weight `w` needs.
pub fn conic(precision: f32, pts: &[Point; 3], w: f32, xform: &VectorXform) -> f32 {
    conic_pow2(precision, pts, w, xform).sqrt()
}

/// Returns the log2 value of [`conic`], rounded up to the next int.
pub fn conic_log2(precision: f32, pts: &[Point; 3], w: f32, xform: &VectorXform) -> u32 {
    nextlog4(conic_pow2(precision, pts, w, xform))
}
