// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Segment-count estimates checked against the curves they approximate.

use rand::Rng;
use vello_tessellate::geometry::{eval_cubic_at, eval_quad_at};
use vello_tessellate::wangs_formula::{
    cubic, cubic_log2, length_term_pow2, nextlog2, nextlog2_portable, quadratic, quadratic_pow4,
    VectorXform,
};
use vello_tessellate::{Point, Transform};
use vello_tessellate_tests::{
    max_polyline_error, random_cubic, random_quad, random_transform, rng,
};

const PRECISION: f32 = 4.;

#[test]
fn nextlog2_rounds_up() {
    let mut rng = rng();
    for _ in 0..10_000 {
        let x: f32 = 2_f32.powf(rng.gen_range(-4.0..40.0));
        let n = nextlog2(x);
        assert_eq!(n, nextlog2_portable(x), "{x}");
        if x > 1. {
            assert!(2_f64.powi(n as i32) >= x as f64, "{x} -> {n}");
            assert!(2_f64.powi(n as i32 - 1) < x as f64, "{x} -> {n}");
        } else {
            assert_eq!(n, 0, "{x}");
        }
    }
}

#[test]
fn quadratic_closed_form() {
    let pts = [Point::new(0., 0.), Point::new(1., 0.), Point::new(1., 1.)];
    let dd = pts[0] - pts[1] * 2. + pts[2];
    assert_eq!(
        quadratic_pow4(PRECISION, &pts, &VectorXform::IDENTITY),
        dd.dot(dd) * length_term_pow2::<2>(PRECISION)
    );
}

#[test]
fn quadratic_polylines_stay_within_precision() {
    let mut rng = rng();
    for _ in 0..200 {
        let pts = random_quad(&mut rng, 500.);
        let n = quadratic(PRECISION, &pts, &VectorXform::IDENTITY).ceil().max(1.) as u32;
        let error = max_polyline_error(|t| eval_quad_at(&pts, t), n);
        assert!(error <= 1. / PRECISION + 1e-3, "{pts:?}: {error} with {n} segments");
    }
}

#[test]
fn cubic_polylines_stay_within_precision() {
    let mut rng = rng();
    for _ in 0..200 {
        let pts = random_cubic(&mut rng, 500.);
        let n = cubic(PRECISION, &pts, &VectorXform::IDENTITY).ceil().max(1.) as u32;
        let error = max_polyline_error(|t| eval_cubic_at(&pts, t), n);
        assert!(error <= 1. / PRECISION + 1e-3, "{pts:?}: {error} with {n} segments");
        assert!((1_u64 << cubic_log2(PRECISION, &pts, &VectorXform::IDENTITY)) >= n as u64);
    }
}

#[test]
fn transform_matches_mapped_points() {
    let mut rng = rng();
    for _ in 0..200 {
        let pts = random_cubic(&mut rng, 100.);
        let transform = random_transform(&mut rng);
        let mapped = pts.map(|p| transform.map_point(p));
        let local = cubic(PRECISION, &pts, &VectorXform::new(&transform));
        let device = cubic(PRECISION, &mapped, &VectorXform::IDENTITY);
        assert!(
            (local - device).abs() <= device * 1e-3 + 1e-3,
            "{local} vs {device}"
        );
    }
}

#[test]
fn zooming_in_never_needs_fewer_segments() {
    let mut rng = rng();
    for _ in 0..200 {
        let pts = random_cubic(&mut rng, 100.);
        let counts: Vec<f32> = [1., 2., 4., 8., 16.]
            .into_iter()
            .map(|s| cubic(PRECISION, &pts, &VectorXform::new(&Transform::scale(s))))
            .collect();
        for pair in counts.windows(2) {
            assert!(pair[0] <= pair[1], "{counts:?}");
        }
        // Segment counts grow with the square root of the scale.
        assert!((counts[4] - counts[0] * 4.).abs() <= counts[4] * 1e-4, "{counts:?}");
    }
}
