// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Curve evaluation, chopping and classification.
//!
//! Chopped curves are returned as one flat run of points where consecutive pieces share their
//! boundary point, so adjacent pieces always meet exactly.

use std::f32::consts::PI;

use smallvec::SmallVec;

use crate::math::Point;

/// Chop results closer than this to either end of the curve are ignored.
const CHOP_EPSILON: f32 = 1. / (1 << 11) as f32;

/// The bit pattern of `1 - 2 * CHOP_EPSILON`.
///
/// `(t - CHOP_EPSILON).to_bits() < ONE_MINUS_2_EPSILON_BITS` accepts `t` in
/// `[CHOP_EPSILON, 1 - CHOP_EPSILON)` and rejects NaN and negative values with a single compare.
const ONE_MINUS_2_EPSILON_BITS: u32 = 0x3f7f_c000;

#[inline(always)]
fn root_in_chop_range(t: f32) -> bool {
    (t - CHOP_EPSILON).to_bits() < ONE_MINUS_2_EPSILON_BITS
}

/// Points of a cubic chopped into at most three pieces.
pub type CubicChops = SmallVec<[Point; 10]>;

/// Parameter values a curve has to be chopped at.
pub type ChopTs = SmallVec<[f32; 2]>;

pub fn eval_quad_at(pts: &[Point; 3], t: f32) -> Point {
    let a = pts[2] - pts[1] * 2. + pts[0];
    let b = (pts[1] - pts[0]) * 2.;
    (a * t + b) * t + pts[0]
}

pub fn eval_cubic_at(pts: &[Point; 4], t: f32) -> Point {
    let a = pts[3] + (pts[1] - pts[2]) * 3. - pts[0];
    let b = (pts[2] - pts[1] * 2. + pts[0]) * 3.;
    let c = (pts[1] - pts[0]) * 3.;
    ((a * t + b) * t + c) * t + pts[0]
}

pub fn eval_conic_at(pts: &[Point; 3], w: f32, t: f32) -> Point {
    let a = pts[2] - pts[1] * (2. * w) + pts[0];
    let b = (pts[1] * w - pts[0]) * 2.;
    let numer = (a * t + b) * t + pts[0];
    let w_minus_1 = w - 1.;
    let denom = (-2. * w_minus_1 * t + 2. * w_minus_1) * t + 1.;
    numer * (1. / denom)
}

/// Splits a quadratic at `t`. The two halves are `[0..3]` and `[2..5]`.
pub fn chop_quad_at(src: &[Point; 3], t: f32) -> [Point; 5] {
    let p01 = Point::unchecked_mix(src[0], src[1], t);
    let p12 = Point::unchecked_mix(src[1], src[2], t);
    [src[0], p01, Point::unchecked_mix(p01, p12, t), p12, src[2]]
}

/// Splits a cubic at `t`. The two halves are `[0..4]` and `[3..7]`.
pub fn chop_cubic_at(src: &[Point; 4], t: f32) -> [Point; 7] {
    let ab = Point::unchecked_mix(src[0], src[1], t);
    let bc = Point::unchecked_mix(src[1], src[2], t);
    let cd = Point::unchecked_mix(src[2], src[3], t);
    let abc = Point::unchecked_mix(ab, bc, t);
    let bcd = Point::unchecked_mix(bc, cd, t);
    let abcd = Point::unchecked_mix(abc, bcd, t);
    [src[0], ab, abc, abcd, bcd, cd, src[3]]
}

/// Splits a cubic at each of the sorted values in `ts`, producing `3 * ts.len() + 4` points.
///
/// Each chop after the first is made on the remainder, with its `t` renormalized to that
/// remainder. If the renormalized value falls outside `(0, 1)`, the remaining pieces collapse
/// onto the end point.
pub fn chop_cubic_at_many(src: &[Point; 4], ts: &[f32]) -> CubicChops {
    let mut dst = CubicChops::with_capacity(3 * ts.len() + 4);
    dst.push(src[0]);
    let mut rest = *src;
    let mut prev_t = 0.;
    for (i, &t) in ts.iter().enumerate() {
        let local_t = if i == 0 { t } else { (t - prev_t) / (1. - prev_t) };
        if i > 0 && (local_t.is_nan() || local_t <= 0. || local_t >= 1.) {
            dst.extend_from_slice(&rest[1..]);
            for _ in i..ts.len() {
                dst.extend_from_slice(&[rest[3]; 3]);
            }
            return dst;
        }
        let chopped = chop_cubic_at(&rest, local_t);
        dst.extend_from_slice(&chopped[1..4]);
        rest = [chopped[3], chopped[4], chopped[5], chopped[6]];
        prev_t = t;
    }
    dst.extend_from_slice(&rest[1..]);
    dst
}

/// A conic split in two.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConicChop {
    /// The halves are `pts[0..3]` and `pts[2..5]`.
    pub pts: [Point; 5],
    pub weights: [f32; 2],
}

/// Splits a conic at `t`. Returns `None` if the result is not finite.
///
/// The split is computed on the homogeneous control points `(x, y, 1)`, `(wx, wy, w)` and
/// `(x, y, 1)`, then projected back.
pub fn chop_conic_at(src: &[Point; 3], w: f32, t: f32) -> Option<ConicChop> {
    fn lerp(a: [f32; 3], b: [f32; 3], t: f32) -> [f32; 3] {
        std::array::from_fn(|i| (b[i] - a[i]) * t + a[i])
    }
    fn project(p: [f32; 3]) -> Point {
        Point::new(p[0] / p[2], p[1] / p[2])
    }

    let p0 = [src[0].x, src[0].y, 1.];
    let p1 = [src[1].x * w, src[1].y * w, w];
    let p2 = [src[2].x, src[2].y, 1.];
    let ab = lerp(p0, p1, t);
    let bc = lerp(p1, p2, t);
    let abc = lerp(ab, bc, t);

    let root_z = abc[2].sqrt();
    let chop = ConicChop {
        pts: [src[0], project(ab), project(abc), project(bc), src[2]],
        weights: [ab[2] / root_z, bc[2] / root_z],
    };
    let finite = chop.pts.iter().all(|p| p.is_finite())
        && chop.weights.iter().all(|w| w.is_finite());
    finite.then_some(chop)
}

/// Converts a quadratic into the cubic that traces the same curve.
pub fn quad_to_cubic(pts: &[Point; 3]) -> [Point; 4] {
    [
        pts[0],
        Point::unchecked_mix(pts[0], pts[1], 2. / 3.),
        Point::unchecked_mix(pts[2], pts[1], 2. / 3.),
        pts[2],
    ]
}

/// Returns the angle between `a` and `b` in radians, in `[0, PI]`.
///
/// Returns 0 if either vector is zero.
pub fn measure_angle(a: Point, b: Point) -> f32 {
    let cos_theta = a.dot(b) / (a.length_squared() * b.length_squared()).sqrt();
    if cos_theta.is_nan() {
        return 0.;
    }
    cos_theta.clamp(-1., 1.).acos()
}

/// Returns how far the tangent of a quadratic turns, in radians.
pub fn measure_quad_rotation(pts: &[Point; 3]) -> f32 {
    measure_angle(pts[1] - pts[0], pts[2] - pts[1])
}

/// Returns how far the tangent of a cubic turns, in radians.
///
/// The cubic must be convex and free of inflections, as produced by
/// [`find_cubic_convex_180_chops`].
pub fn measure_non_inflect_cubic_rotation(pts: &[Point; 4]) -> f32 {
    let a = pts[1] - pts[0];
    let b = pts[2] - pts[1];
    let c = pts[3] - pts[2];
    if a.is_zero() {
        return measure_angle(b, c);
    }
    if b.is_zero() {
        return measure_angle(a, c);
    }
    if c.is_zero() {
        return measure_angle(a, b);
    }
    // The control polygon of a convex curve without colocated points turns by a full circle
    // minus its two interior angles.
    2. * PI - measure_angle(a, -b) - measure_angle(b, -c)
}

/// Returns a vector that bisects the angle between `a` and `b`. The vector is not normalized.
///
/// Vectors more than 90 degrees apart are rotated towards each other first, which keeps the sum
/// away from zero.
pub fn find_bisector(a: Point, b: Point) -> Point {
    let [v0, v1] = if a.dot(b) >= 0. {
        [a, b]
    } else if a.cross(b) >= 0. {
        [Point::new(-a.y, a.x), Point::new(b.y, -b.x)]
    } else {
        [Point::new(a.y, -a.x), Point::new(-b.y, b.x)]
    };
    v0 * (1. / v0.length()) + v1 * (1. / v1.length())
}

/// Solves `a*T^2 + b*T + c == 0` for the root closest to 0.5.
///
/// Returns 0.5 if there is no root inside `(0, 1)`.
fn solve_midtangent(a: f32, b: f32, c: f32) -> f32 {
    let b_over_minus_2 = -0.5 * b;
    let discr_over_4 = b_over_minus_2 * b_over_minus_2 - a * c;
    let mut t = f32::NAN;
    if discr_over_4 > 0. {
        let q = discr_over_4.sqrt().copysign(b_over_minus_2) + b_over_minus_2;
        // Both roots scaled by |q * a|, measured from 0.5.
        let half_qa = -0.5 * q * a;
        t = if (q * q + half_qa).abs() < (a * c + half_qa).abs() {
            q / a
        } else {
            c / q
        };
    }
    if t > 0. && t < 1. { t } else { 0.5 }
}

/// Returns the `t` where a quadratic's tangent is perpendicular to the bisector of its end
/// tangents, which halves its rotation.
pub fn find_quad_midtangent(pts: &[Point; 3]) -> f32 {
    let tan0 = pts[1] - pts[0];
    let tan1 = pts[2] - pts[1];
    let bisector = find_bisector(tan0, -tan1);
    let t = tan0.dot(bisector) / (tan0 - tan1).dot(bisector);
    if t > 0. && t < 1. { t } else { 0.5 }
}

/// Returns the `t` that halves a cubic's rotation. The cubic must be convex.
pub fn find_cubic_midtangent(pts: &[Point; 4]) -> f32 {
    let [p0, p1, p2, p3] = *pts;
    let tan0 = if p0 == p1 { p2 - p0 } else { p1 - p0 };
    let tan1 = if p2 == p3 { p3 - p1 } else { p3 - p2 };
    let bisector = find_bisector(tan0, -tan1);
    // The tangent, divided by 3, in power basis is a*T^2 + b*T + c.
    let a = (p3 - p0 + (p1 - p2) * 3.).dot(bisector);
    let b = ((p0 - p1 * 2. + p2) * 2.).dot(bisector);
    let c = (p1 - p0).dot(bisector);
    solve_midtangent(a, b, c)
}

/// Returns the `t` that halves a conic's rotation.
pub fn find_conic_midtangent(pts: &[Point; 3], w: f32) -> f32 {
    let tan0 = if pts[1] != pts[0] {
        pts[1] - pts[0]
    } else {
        pts[2] - pts[0]
    };
    let tan1 = if pts[2] != pts[1] {
        pts[2] - pts[1]
    } else {
        pts[2] - pts[0]
    };
    let bisector = find_bisector(tan0, -tan1);
    // Numerator of the tangent with p0 moved to the origin.
    let p1 = pts[1] - pts[0];
    let p2 = pts[2] - pts[0];
    let a = (p2 * (w - 1.)).dot(bisector);
    let b = (p2 - p1 * (2. * w)).dot(bisector);
    let c = (p1 * w).dot(bisector);
    solve_midtangent(a, b, c)
}

/// Finds where to chop a cubic so each piece is convex and rotates at most 180 degrees.
///
/// Returns up to two sorted chop points, and whether they are cusps. Roots within
/// `1/2048` of each other are treated as a cusp.
pub fn find_cubic_convex_180_chops(pts: &[Point; 4]) -> (ChopTs, bool) {
    let [p0, p1, p2, p3] = *pts;
    let mut ts = ChopTs::new();

    // The tangent in power basis is 3 * (A*T^2 + 2B*T + C). Inflections are where
    // cross(tangent, second derivative) is zero, which is a*T^2 + b*T + c with the coefficients
    // below.
    let c_vec = p1 - p0;
    let d_vec = p2 - p1;
    let e_vec = p3 - p0;
    let b_vec = d_vec - c_vec;
    let a_vec = d_vec * -3. + e_vec;

    let mut a = a_vec.cross(b_vec);
    let b = a_vec.cross(c_vec);
    let mut c = b_vec.cross(c_vec);
    let mut b_over_minus_2 = -0.5 * b;
    let mut discr_over_4 = b_over_minus_2 * b_over_minus_2 - a * c;

    let cusp_threshold = {
        let x = a * (CHOP_EPSILON / 2.);
        x * x
    };
    if discr_over_4 < -cusp_threshold {
        // No inflections. Chop where the tangent is parallel to the start tangent again, which is
        // where the curve would pass 180 degrees of rotation.
        let root = c / b_over_minus_2;
        if root_in_chop_range(root) {
            ts.push(root);
        }
        return (ts, false);
    }

    let are_cusps = discr_over_4 <= cusp_threshold;
    if are_cusps {
        if a != 0. || b_over_minus_2 != 0. || c != 0. {
            // The two inflections coincide in a single cusp.
            let root = b_over_minus_2 / a;
            if root_in_chop_range(root) {
                ts.push(root);
            }
            return (ts, true);
        }
        // A flat line. Chop where the tangent reverses: dot(tangent, tan0) == 0.
        let p2_minus_p0 = p2 - p0;
        let tan0 = Point::new(
            if c_vec.x != 0. { c_vec.x } else { p2_minus_p0.x },
            if c_vec.y != 0. { c_vec.y } else { p2_minus_p0.y },
        );
        a = tan0.dot(a_vec);
        b_over_minus_2 = -tan0.dot(b_vec);
        c = tan0.dot(c_vec);
        discr_over_4 = (b_over_minus_2 * b_over_minus_2 - a * c).max(0.);
    }

    let q = discr_over_4.sqrt().copysign(b_over_minus_2) + b_over_minus_2;
    let mut roots = [q / a, c / q];
    let inside = roots.map(|r| r > CHOP_EPSILON && r < 1. - CHOP_EPSILON);
    match inside {
        [true, true] if roots[0] != roots[1] => {
            if roots[0] > roots[1] {
                roots.swap(0, 1);
            }
            ts.extend_from_slice(&roots);
        }
        [true, _] => ts.push(roots[0]),
        [false, true] => ts.push(roots[1]),
        [false, false] => {}
    }
    (ts, are_cusps)
}

/// Returns true if the cubic has a cusp strictly inside it that the stroker has to handle.
///
/// Cusps at the endpoints, from `p0 == p1` or `p2 == p3`, need no special treatment unless the
/// cubic is a flat line.
pub fn cubic_has_cusp(pts: &[Point; 4]) -> bool {
    let [p0, p1, p2, p3] = *pts;
    let c_vec = p1 - p0;
    let d_vec = p2 - p1;
    let e_vec = p3 - p0;
    let b_vec = d_vec - c_vec;
    let a_vec = d_vec * -3. + e_vec;

    let a = a_vec.cross(b_vec);
    let b = a_vec.cross(c_vec);
    let c = b_vec.cross(c_vec);
    let discr = b * b - 4. * a * c;

    let cusp_threshold = {
        let x = (2. * CHOP_EPSILON) * a;
        x * x
    };
    discr.abs() <= cusp_threshold
        && (!(p0 == p1 || p2 == p3) || (a == 0. && b == 0. && c == 0.))
}

/// Returns true if a quadratic or conic is a flat line that turns back on itself.
///
/// That is the only way those curves can have a cusp.
pub fn conic_has_cusp(pts: &[Point; 3]) -> bool {
    let a = pts[1] - pts[0];
    let b = pts[2] - pts[1];
    a.cross(b) == 0. && a.dot(b) < 0.
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_near(a: Point, b: Point, tol: f32) {
        assert!((a - b).length() <= tol, "{a:?} != {b:?}");
    }

    #[test]
    fn cubic_chop_lands_on_curve() {
        let pts = [
            Point::new(0., 0.),
            Point::new(10., 40.),
            Point::new(50., -20.),
            Point::new(60., 10.),
        ];
        let chopped = chop_cubic_at(&pts, 0.3);
        assert_near(chopped[3], eval_cubic_at(&pts, 0.3), 1e-4);
        assert_eq!(chopped[0], pts[0]);
        assert_eq!(chopped[6], pts[3]);
    }

    #[test]
    fn chop_many_matches_single_chops() {
        let pts = [
            Point::new(0., 0.),
            Point::new(10., 40.),
            Point::new(50., -20.),
            Point::new(60., 10.),
        ];
        let chops = chop_cubic_at_many(&pts, &[0.25, 0.75]);
        assert_eq!(chops.len(), 10);
        assert_near(chops[3], eval_cubic_at(&pts, 0.25), 1e-4);
        assert_near(chops[6], eval_cubic_at(&pts, 0.75), 1e-4);
        assert_eq!(chops[9], pts[3]);
        let single = chop_cubic_at_many(&pts, &[0.4]);
        assert_eq!(single.as_slice(), &chop_cubic_at(&pts, 0.4));
    }

    #[test]
    fn chop_many_collapses_unordered_ts() {
        let pts = [
            Point::new(0., 0.),
            Point::new(1., 2.),
            Point::new(3., 2.),
            Point::new(4., 0.),
        ];
        let chops = chop_cubic_at_many(&pts, &[0.5, 0.5]);
        assert_eq!(chops.len(), 10);
        assert!(chops[6..].iter().all(|&p| p == pts[3]));
    }

    #[test]
    fn quad_chop_lands_on_curve() {
        let pts = [Point::new(0., 0.), Point::new(5., 10.), Point::new(10., 0.)];
        let chopped = chop_quad_at(&pts, 0.5);
        assert_eq!(chopped[2], Point::new(5., 5.));
        assert_eq!(chopped[2], eval_quad_at(&pts, 0.5));
    }

    #[test]
    fn conic_chop_lands_on_curve() {
        let pts = [Point::new(0., 0.), Point::new(10., 10.), Point::new(20., 0.)];
        let w = 0.7;
        let chop = chop_conic_at(&pts, w, 0.5).unwrap();
        assert_near(chop.pts[2], eval_conic_at(&pts, w, 0.5), 1e-4);
        assert!((chop.weights[0] - chop.weights[1]).abs() < 1e-6);
        let uneven = chop_conic_at(&pts, w, 0.3).unwrap();
        assert_near(uneven.pts[2], eval_conic_at(&pts, w, 0.3), 1e-4);
        assert_eq!(uneven.pts[0], pts[0]);
        assert_eq!(uneven.pts[4], pts[2]);
    }

    #[test]
    fn quad_to_cubic_traces_same_curve() {
        let quad = [Point::new(0., 0.), Point::new(3., 9.), Point::new(6., 0.)];
        let cubic = quad_to_cubic(&quad);
        for t in [0.1, 0.5, 0.8] {
            assert_near(eval_cubic_at(&cubic, t), eval_quad_at(&quad, t), 1e-4);
        }
    }

    #[test]
    fn rotations() {
        let quad = [Point::new(0., 0.), Point::new(1., 0.), Point::new(1., 1.)];
        assert!((measure_quad_rotation(&quad) - PI / 2.).abs() < 1e-6);
        let k = 0.552_284_8;
        let arc = [
            Point::new(1., 0.),
            Point::new(1., k),
            Point::new(k, 1.),
            Point::new(0., 1.),
        ];
        assert!((measure_non_inflect_cubic_rotation(&arc) - PI / 2.).abs() < 1e-5);
        assert_eq!(measure_angle(Point::ZERO, Point::new(1., 0.)), 0.);
        assert!((measure_angle(Point::new(1., 0.), Point::new(-1., 0.)) - PI).abs() < 1e-6);
    }

    #[test]
    fn midtangent_of_symmetric_curves_is_half() {
        let quad = [Point::new(0., 0.), Point::new(1., 1.), Point::new(2., 0.)];
        assert!((find_quad_midtangent(&quad) - 0.5).abs() < 1e-6);
        let cubic = [
            Point::new(0., 0.),
            Point::new(0., 1.),
            Point::new(2., 1.),
            Point::new(2., 0.),
        ];
        assert!((find_cubic_midtangent(&cubic) - 0.5).abs() < 1e-5);
        assert!((find_conic_midtangent(&quad, 3.) - 0.5).abs() < 1e-5);
    }

    #[test]
    fn bisector_of_opposite_vectors() {
        let bisector = find_bisector(Point::new(1., 0.), Point::new(-1., 0.));
        assert_eq!(bisector.dot(Point::new(1., 0.)), 0.);
        assert!(bisector.length() > 1.);
    }

    #[test]
    fn loop_cubic_chops_once() {
        let pts = [
            Point::new(0., 0.),
            Point::new(100., 0.),
            Point::new(0., 100.),
            Point::new(0., 0.),
        ];
        let (ts, are_cusps) = find_cubic_convex_180_chops(&pts);
        assert_eq!(ts.len(), 1);
        assert!((ts[0] - 2. / 3.).abs() < 1e-5);
        assert!(!are_cusps);
    }

    #[test]
    fn inflection_is_chopped() {
        let pts = [
            Point::new(0., 0.),
            Point::new(1., 1.),
            Point::new(2., -1.),
            Point::new(3., 0.),
        ];
        let (ts, are_cusps) = find_cubic_convex_180_chops(&pts);
        assert_eq!(ts.as_slice(), &[0.5]);
        assert!(!are_cusps);
    }

    #[test]
    fn perfect_cusp() {
        let pts = [
            Point::new(0., 0.),
            Point::new(1., 1.),
            Point::new(0., 1.),
            Point::new(1., 0.),
        ];
        assert!(cubic_has_cusp(&pts));
        let (ts, are_cusps) = find_cubic_convex_180_chops(&pts);
        assert_eq!(ts.as_slice(), &[0.5]);
        assert!(are_cusps);
    }

    #[test]
    fn flat_line_turnarounds() {
        let pts = [
            Point::new(0., 0.),
            Point::new(2., 0.),
            Point::new(-1., 0.),
            Point::new(1., 0.),
        ];
        assert!(cubic_has_cusp(&pts));
        let (ts, are_cusps) = find_cubic_convex_180_chops(&pts);
        assert!(are_cusps);
        assert_eq!(ts.len(), 2);
        assert!(ts[0] < ts[1]);
        // The tangent reverses at both chops, so x is extremal there.
        for &t in &ts {
            let x = |t: f32| eval_cubic_at(&pts, t).x;
            let d = x(t + 1e-3) - x(t - 1e-3);
            assert!(d.abs() < 1e-4, "{d}");
        }
    }

    #[test]
    fn endpoint_cusps_are_ignored() {
        let pts = [
            Point::new(0., 0.),
            Point::new(0., 0.),
            Point::new(5., 5.),
            Point::new(10., 0.),
        ];
        assert!(!cubic_has_cusp(&pts));
    }

    #[test]
    fn conic_cusps() {
        let back = [Point::new(0., 0.), Point::new(10., 0.), Point::new(5., 0.)];
        assert!(conic_has_cusp(&back));
        let forward = [Point::new(0., 0.), Point::new(5., 0.), Point::new(10., 0.)];
        assert!(!conic_has_cusp(&forward));
        let curved = [Point::new(0., 0.), Point::new(5., 5.), Point::new(10., 0.)];
        assert!(!conic_has_cusp(&curved));
    }
}
