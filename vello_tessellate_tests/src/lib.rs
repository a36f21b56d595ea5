// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared helpers for the `vello_tessellate` integration tests.
//!
//! Every test that needs random input starts from [`rng`], so failures reproduce exactly.

#![allow(missing_docs, reason = "we don't need docs for testing")]
#![allow(clippy::cast_possible_truncation, reason = "not critical for testing")]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vello_tessellate::kurbo::Affine;
use vello_tessellate::{Path, Point, Transform};

pub const SEED: [u8; 32] = [0; 32];

pub fn rng() -> StdRng {
    StdRng::from_seed(SEED)
}

pub fn random_point(rng: &mut StdRng, extent: f32) -> Point {
    Point::new(rng.gen_range(-extent..extent), rng.gen_range(-extent..extent))
}

pub fn random_quad(rng: &mut StdRng, extent: f32) -> [Point; 3] {
    std::array::from_fn(|_| random_point(rng, extent))
}

pub fn random_cubic(rng: &mut StdRng, extent: f32) -> [Point; 4] {
    std::array::from_fn(|_| random_point(rng, extent))
}

/// A rotation followed by a uniform scale in `[0.25, 8)` and a translation.
pub fn random_transform(rng: &mut StdRng) -> Transform {
    let angle = rng.gen_range(0.0..std::f64::consts::TAU);
    let scale = rng.gen_range(0.25..8.0);
    let offset = (rng.gen_range(-200.0..200.0), rng.gen_range(-200.0..200.0));
    Transform::from_kurbo(
        &Affine::rotate(angle)
            .then_scale(scale)
            .then_translate(offset.into()),
    )
}

/// Which verbs [`random_path`] picks from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verbs {
    All,
    CubicsOnly,
}

/// Builds a path of `contours` contours with `verbs_per_contour` segments each. Roughly half of
/// the contours are closed.
pub fn random_path(
    rng: &mut StdRng,
    contours: usize,
    verbs_per_contour: usize,
    extent: f32,
    verbs: Verbs,
) -> Path {
    let mut b = Path::builder();
    for _ in 0..contours {
        b.move_to(random_point(rng, extent));
        for _ in 0..verbs_per_contour {
            let verb = match verbs {
                Verbs::All => rng.gen_range(0..4),
                Verbs::CubicsOnly => 3,
            };
            match verb {
                0 => b.line_to(random_point(rng, extent)),
                1 => b.quad_to(random_point(rng, extent), random_point(rng, extent)),
                2 => b.conic_to(
                    random_point(rng, extent),
                    random_point(rng, extent),
                    rng.gen_range(0.25..4.0),
                ),
                _ => b.cubic_to(
                    random_point(rng, extent),
                    random_point(rng, extent),
                    random_point(rng, extent),
                ),
            }
        }
        if rng.gen_bool(0.5) {
            b.close();
        }
    }
    b.finish()
}

/// Returns the distance from `p` to the line segment from `a` to `b`.
pub fn distance_to_segment(p: Point, a: Point, b: Point) -> f32 {
    let ab = b - a;
    let len2 = ab.length_squared();
    if len2 == 0. {
        return (p - a).length();
    }
    let t = ((p - a).dot(ab) / len2).clamp(0., 1.);
    (p - (a + ab * t)).length()
}

/// Returns the largest distance between the curve `eval` and the polyline through `segments`
/// evenly spaced parameter values, sampled densely within every segment.
pub fn max_polyline_error(eval: impl Fn(f32) -> Point, segments: u32) -> f32 {
    const SAMPLES: u32 = 16;
    let mut max_error = 0_f32;
    for i in 0..segments {
        let t0 = i as f32 / segments as f32;
        let t1 = (i + 1) as f32 / segments as f32;
        let (a, b) = (eval(t0), eval(t1));
        for j in 1..SAMPLES {
            let t = t0 + (t1 - t0) * (j as f32 / SAMPLES as f32);
            max_error = max_error.max(distance_to_segment(eval(t), a, b));
        }
    }
    max_error
}

#[track_caller]
pub fn assert_points_close(a: Point, b: Point, tolerance: f32) {
    assert!(
        (a - b).length() <= tolerance,
        "{a:?} and {b:?} are more than {tolerance} apart"
    );
}
