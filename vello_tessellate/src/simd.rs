// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SIMD kernels for evaluating four curves or strokes at a time.

use fearless_simd::*;

use crate::math::Point;
use crate::wangs_formula::nextlog2;

/// Approximates `acos(x)` to within 0.96 degrees, using the rational polynomial from
/// <https://stackoverflow.com/questions/3380628/fast-arc-cos-algorithm>.
#[inline(always)]
pub(crate) fn approx_acos<S: Simd>(x: f32x4<S>) -> f32x4<S> {
    let simd = x.simd;

    const A: f32 = -0.939_115_6;
    const B: f32 = 0.921_784_15;
    const C: f32 = -1.284_590_6;
    const D: f32 = 0.295_624_14;
    const PI_OVER_2: f32 = std::f32::consts::FRAC_PI_2;

    let xx = x * x;
    let numer = f32x4::splat(simd, B).madd(xx, f32x4::splat(simd, A));
    let denom = xx.madd(
        f32x4::splat(simd, D).madd(xx, f32x4::splat(simd, C)),
        f32x4::splat(simd, 1.0),
    );
    x.madd(numer / denom, f32x4::splat(simd, PI_OVER_2))
}

/// Approximates the angle between the vectors `a` and `b`, lane-wise. Lanes where either vector
/// is zero get an angle of 0.
#[inline(always)]
pub(crate) fn approx_angle_between<S: Simd>(
    ax: f32x4<S>,
    ay: f32x4<S>,
    bx: f32x4<S>,
    by: f32x4<S>,
) -> f32x4<S> {
    let simd = ax.simd;
    let one = f32x4::splat(simd, 1.0);

    let dot = ax.madd(bx, ay * by);
    let a_len2 = ax.madd(ax, ay * ay);
    let b_len2 = bx.madd(bx, by * by);
    let cos_theta = dot / (a_len2 * b_len2).sqrt();
    // NaN only equals nothing, so this maps it to an angle of zero.
    let cos_theta = simd.select_f32x4(simd.simd_eq_f32x4(cos_theta, cos_theta), cos_theta, one);
    let cos_theta = cos_theta.max(f32x4::splat(simd, -1.0)).min(one);
    approx_acos(cos_theta)
}

/// Returns the number of radial segments per radian for four strokes.
///
/// The outer edge of a stroke of half width `r` stays within `1/precision` of the true arc as
/// long as each segment rotates no more than `2 * acos(1 - (1/precision) / r)` radians.
#[inline(always)]
fn radial_segments_per_radian_kernel<S: Simd>(
    simd: S,
    parametric_precision: f32,
    local_widths: [f32; 4],
) -> [f32; 4] {
    let widths = f32x4::from_slice(simd, &local_widths);
    let half_widths = widths * f32x4::splat(simd, 0.5);
    let tolerance = f32x4::splat(simd, 1.0 / parametric_precision);
    let cos_theta = f32x4::splat(simd, 1.0) - tolerance / half_widths;
    let cos_theta = cos_theta.max(f32x4::splat(simd, -1.0));
    let radial = f32x4::splat(simd, 0.5) / approx_acos(cos_theta);
    let mut out = [0.0; 4];
    out.copy_from_slice(radial.as_slice());
    out
}

/// Batched version of
/// [`StrokeTolerances::num_radial_segments_per_radian`](crate::tolerances::StrokeTolerances::num_radial_segments_per_radian)
/// that uses an approximate arc cosine.
pub(crate) fn approx_radial_segments_per_radian(
    level: Level,
    parametric_precision: f32,
    local_widths: [f32; 4],
) -> [f32; 4] {
    dispatch!(level, simd => radial_segments_per_radian_kernel(
        simd,
        parametric_precision,
        local_widths
    ))
}

/// One stroke piece waiting for its resolve level.
///
/// The number of parametric segments comes from Wang's formula on the two second differences,
/// scaled by `length_term_pow2`. The rotation is the sum of the angles within each tangent pair.
/// Unused differences and tangents are left zero, which contributes nothing.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct PendingPiece {
    pub(crate) second_differences: [Point; 2],
    pub(crate) length_term_pow2: f32,
    pub(crate) tangent_pairs: [[Point; 2]; 2],
    pub(crate) radial_segments_per_radian: f32,
}

/// Structure-of-arrays view of up to four [`PendingPiece`]s.
#[derive(Default)]
struct PieceLanes {
    dx: [[f32; 4]; 2],
    dy: [[f32; 4]; 2],
    length_term_pow2: [f32; 4],
    tan_ax: [[f32; 4]; 2],
    tan_ay: [[f32; 4]; 2],
    tan_bx: [[f32; 4]; 2],
    tan_by: [[f32; 4]; 2],
    radial: [f32; 4],
}

impl PieceLanes {
    fn new(pieces: &[PendingPiece]) -> Self {
        let mut lanes = Self::default();
        for (lane, piece) in pieces.iter().enumerate().take(4) {
            for j in 0..2 {
                lanes.dx[j][lane] = piece.second_differences[j].x;
                lanes.dy[j][lane] = piece.second_differences[j].y;
                lanes.tan_ax[j][lane] = piece.tangent_pairs[j][0].x;
                lanes.tan_ay[j][lane] = piece.tangent_pairs[j][0].y;
                lanes.tan_bx[j][lane] = piece.tangent_pairs[j][1].x;
                lanes.tan_by[j][lane] = piece.tangent_pairs[j][1].y;
            }
            lanes.length_term_pow2[lane] = piece.length_term_pow2;
            lanes.radial[lane] = piece.radial_segments_per_radian;
        }
        lanes
    }
}

#[inline(always)]
fn resolve_levels_kernel<S: Simd>(
    simd: S,
    lanes: &PieceLanes,
    matrix: [f32; 4],
    max_level: u8,
) -> [u8; 4] {
    let m: [f32x4<S>; 4] = matrix.map(|v| f32x4::splat(simd, v));
    let mut len2 = f32x4::splat(simd, 0.0);
    let mut rotation = f32x4::splat(simd, 0.0);
    for j in 0..2 {
        let x = f32x4::from_slice(simd, &lanes.dx[j]);
        let y = f32x4::from_slice(simd, &lanes.dy[j]);
        let tx = m[0].madd(x, m[2] * y);
        let ty = m[1].madd(x, m[3] * y);
        len2 = len2.max(tx.madd(tx, ty * ty));

        rotation = rotation
            + approx_angle_between(
                f32x4::from_slice(simd, &lanes.tan_ax[j]),
                f32x4::from_slice(simd, &lanes.tan_ay[j]),
                f32x4::from_slice(simd, &lanes.tan_bx[j]),
                f32x4::from_slice(simd, &lanes.tan_by[j]),
            );
    }
    let pow4 = len2 * f32x4::from_slice(simd, &lanes.length_term_pow2);
    let parametric = pow4.sqrt().sqrt();
    let radial = f32x4::from_slice(simd, &lanes.radial);
    let edges = radial.madd(rotation, parametric);

    let mut levels = [0; 4];
    for (level, &n) in levels.iter_mut().zip(edges.as_slice()) {
        *level = nextlog2(n).min(u32::from(max_level)) as u8;
    }
    levels
}

/// Computes the resolve levels of up to four pieces. Only the first `pieces.len()` results are
/// meaningful.
pub(crate) fn resolve_levels(
    level: Level,
    pieces: &[PendingPiece],
    matrix: [f32; 4],
    max_level: u8,
) -> [u8; 4] {
    debug_assert!(pieces.len() <= 4, "at most four pieces per batch");
    let lanes = PieceLanes::new(pieces);
    dispatch!(level, simd => resolve_levels_kernel(simd, &lanes, matrix, max_level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAX_RESOLVE_LEVEL;
    use std::f32::consts::PI;

    fn acos_lanes<S: Simd>(simd: S, xs: [f32; 4]) -> [f32; 4] {
        let mut out = [0.0; 4];
        out.copy_from_slice(approx_acos(f32x4::from_slice(simd, &xs)).as_slice());
        out
    }

    fn angle_lanes<S: Simd>(simd: S, a: [Point; 4], b: [Point; 4]) -> [f32; 4] {
        let v = |lanes: [f32; 4]| f32x4::from_slice(simd, &lanes);
        let angles = approx_angle_between(
            v(a.map(|p| p.x)),
            v(a.map(|p| p.y)),
            v(b.map(|p| p.x)),
            v(b.map(|p| p.y)),
        );
        let mut out = [0.0; 4];
        out.copy_from_slice(angles.as_slice());
        out
    }

    #[test]
    fn approx_acos_is_close() {
        let xs = [-1.0, -0.3, 0.5, 1.0];
        let approx = dispatch!(Level::fallback(), simd => acos_lanes(simd, xs));
        for (x, a) in xs.iter().zip(approx) {
            assert!((x.acos() - a).abs() < 1_f32.to_radians(), "{x}");
        }
    }

    #[test]
    fn angle_of_zero_vector_is_zero() {
        let a = [
            Point::ZERO,
            Point::new(1.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 0.0),
        ];
        let b = [
            Point::new(1.0, 0.0),
            Point::new(0.0, 1.0),
            Point::new(-1.0, 0.0),
            Point::new(1.0, 0.0),
        ];
        let angles = dispatch!(Level::fallback(), simd => angle_lanes(simd, a, b));
        assert!(angles[0].abs() < 1e-3);
        assert!((angles[1] - PI / 2.0).abs() < 0.02);
        assert!((angles[2] - PI).abs() < 0.02);
        assert!(angles[3].abs() < 1e-3);
    }

    #[test]
    fn resolve_levels_of_lines_and_curves() {
        let line = PendingPiece::default();
        let quarter_turn = PendingPiece {
            tangent_pairs: [
                [Point::new(1.0, 0.0), Point::new(0.0, 1.0)],
                [Point::ZERO; 2],
            ],
            radial_segments_per_radian: 8.0,
            ..Default::default()
        };
        let curve = PendingPiece {
            second_differences: [Point::new(100.0, 0.0), Point::ZERO],
            length_term_pow2: 36.0,
            ..Default::default()
        };
        let levels = resolve_levels(
            Level::fallback(),
            &[line, quarter_turn, curve],
            [1.0, 0.0, 0.0, 1.0],
            15,
        );
        assert_eq!(levels[0], 0);
        // About 8 * PI / 2 = 12.6 radial segments.
        assert_eq!(levels[1], 4);
        // root4(100^2 * 36) = 24.5 parametric segments.
        assert_eq!(levels[2], 5);
    }

    #[test]
    fn radial_segments_match_exact_formula() {
        let precision = 4.0;
        let widths = [1.0, 10.0, 100.0, 0.01];
        let approx = approx_radial_segments_per_radian(Level::fallback(), precision, widths);
        for (w, a) in widths.iter().zip(approx) {
            let exact = 0.5 / (1.0 - (1.0 / precision) / (w / 2.0)).max(-1.0).acos();
            assert!((exact - a).abs() <= exact * 0.1, "{w}: {exact} vs {a}");
        }
    }

    #[test]
    fn overflowing_pieces_get_the_max_level() {
        let huge_curve = PendingPiece {
            second_differences: [Point::new(1e20, 0.0), Point::ZERO],
            length_term_pow2: 36.0,
            ..Default::default()
        };
        let huge_turn = PendingPiece {
            tangent_pairs: [
                [Point::new(1.0, 0.0), Point::new(0.0, 1.0)],
                [Point::ZERO; 2],
            ],
            radial_segments_per_radian: f32::MAX,
            ..Default::default()
        };
        let levels = resolve_levels(
            Level::fallback(),
            &[huge_curve, huge_turn, PendingPiece::default()],
            [1.0, 0.0, 0.0, 1.0],
            MAX_RESOLVE_LEVEL,
        );
        assert_eq!(levels, [MAX_RESOLVE_LEVEL, MAX_RESOLVE_LEVEL, 0, 0]);
    }
}
