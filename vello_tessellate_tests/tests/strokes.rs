// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The three stroke writers on random and hand-picked paths.

use rand::Rng;
use vello_tessellate::fixed_count::write_fixed_count;
use vello_tessellate::geometry::{
    chop_cubic_at_many, measure_angle, measure_non_inflect_cubic_rotation,
};
use vello_tessellate::hardware::write_patches;
use vello_tessellate::indirect::{count_pass, write_pass, ResolveEntry};
use vello_tessellate::kurbo::{Cap, Join};
use vello_tessellate::tolerances::StrokeTolerances;
use vello_tessellate::wangs_formula::{cubic, nextlog2, VectorXform};
use vello_tessellate::{
    BumpAllocator, Level, Path, PathStroke, Point, StrokeStyle, TessellationConfig, Transform,
};
use vello_tessellate_tests::{random_path, random_transform, rng, Verbs};

fn random_stroke(rng: &mut impl Rng) -> StrokeStyle {
    let join = [Join::Miter, Join::Round, Join::Bevel][rng.gen_range(0..3)];
    let cap = [Cap::Butt, Cap::Round, Cap::Square][rng.gen_range(0..3)];
    let width = if rng.gen_bool(0.1) {
        0.
    } else {
        rng.gen_range(0.5..40.0)
    };
    StrokeStyle::new(width).with_join(join).with_cap(cap)
}

#[test]
fn indirect_bins_are_filled_exactly() {
    let mut rng = rng();
    let config = TessellationConfig::default();
    for _ in 0..50 {
        let paths: Vec<Path> = (0..rng.gen_range(1..5))
            .map(|_| random_path(&mut rng, 2, 6, 300., Verbs::All))
            .collect();
        let shared = random_stroke(&mut rng);
        let strokes: Vec<PathStroke<'_>> = paths
            .iter()
            .map(|path| {
                let stroke = if rng.gen_bool(0.5) {
                    shared
                } else {
                    random_stroke(&mut rng)
                };
                PathStroke::new(path, stroke)
            })
            .collect();
        let transform = random_transform(&mut rng);

        let levels = count_pass(Level::fallback(), &strokes, &transform, &config).unwrap();
        let mut alloc = BumpAllocator::new(1 << 22);
        let draw = write_pass(&strokes, &transform, &levels, &mut alloc).unwrap();

        assert_eq!(draw.instance_count(), levels.total_instance_count());
        let commands = draw.commands();
        assert_eq!(commands.len() as u32, levels.draw_indirect_count());
        let mut base_instance = draw.instances.base();
        for command in commands {
            assert_eq!(command.base_instance, base_instance);
            assert!(command.instance_count > 0);
            base_instance += command.instance_count;
        }
        assert_eq!(base_instance - draw.instances.base(), draw.instance_count());

        let edge_counts: Vec<f32> = commands
            .iter()
            .map(|c| (c.vertex_count / 2) as f32)
            .collect();
        let num_edges: Vec<f32> = if draw.dynamic_stroke {
            let records = draw.dynamic_instance_records().unwrap();
            records.iter().map(|r| r.instance.num_total_edges).collect()
        } else {
            let records = draw.instance_records().unwrap();
            records.iter().map(|r| r.num_total_edges).collect()
        };
        for edges in num_edges {
            assert!(edge_counts.contains(&edges.abs()), "{edges} not in {edge_counts:?}");
        }
    }
}

/// A cubic that starts and ends at the same point, with a loop in between.
fn closed_loop() -> (Path, [Point; 4]) {
    let pts = [
        Point::new(0., 0.),
        Point::new(100., 0.),
        Point::new(0., 100.),
        Point::new(0., 0.),
    ];
    let mut b = Path::builder();
    b.move_to(pts[0]);
    b.cubic_to(pts[1], pts[2], pts[3]);
    b.close();
    (b.finish(), pts)
}

/// Checks the resolve levels of the closed loop against the rotation measured on each piece.
///
/// The fast estimate may differ from the measured one by `tolerance` segments.
fn check_closed_loop_levels(join: Join, tolerance: f32) {
    let (path, pts) = closed_loop();
    let stroke = StrokeStyle::new(10.).with_join(join);
    let config = TessellationConfig::default();
    let levels = count_pass(
        Level::fallback(),
        &[PathStroke::new(&path, stroke)],
        &Transform::IDENTITY,
        &config,
    )
    .unwrap();

    let entries = levels.entries();
    let ResolveEntry::ChopSentinel { count, cusp_level } = entries[0] else {
        panic!("the loop was not chopped: {entries:?}");
    };
    assert!(count >= 1);
    assert_eq!(cusp_level, None);
    assert_eq!(entries.len(), count as usize + 2);
    assert_eq!(levels.chop_ts().len(), count as usize);

    let tolerances = StrokeTolerances::new(&config, &Transform::IDENTITY, &stroke);
    let chops = chop_cubic_at_many(&pts, levels.chop_ts());
    for (i, piece) in chops.windows(4).step_by(3).enumerate() {
        let piece = [piece[0], piece[1], piece[2], piece[3]];
        let parametric = cubic(
            tolerances.parametric_precision,
            &piece,
            &VectorXform::IDENTITY,
        );
        let mut rotation = measure_non_inflect_cubic_rotation(&piece);
        if join == Join::Round && i == 0 {
            // The contour joins back onto itself from the loop's last control point.
            rotation += measure_angle(pts[0] - pts[2], piece[1] - piece[0]);
        }
        let reference = parametric + tolerances.num_radial_segments_per_radian * rotation;
        let ResolveEntry::Level(level) = entries[i + 1] else {
            panic!("expected a level: {entries:?}");
        };
        let level = u32::from(level);
        assert!(
            level >= nextlog2(reference - tolerance) && level <= nextlog2(reference + tolerance),
            "piece {i}: level {level} for {reference} segments"
        );
    }
}

#[test]
fn closed_loop_levels_match_measured_rotation() {
    check_closed_loop_levels(Join::Miter, 1.15);
}

#[test]
fn closed_loop_levels_with_round_joins() {
    // Round joins add a second approximate angle.
    check_closed_loop_levels(Join::Round, 2.3);
}

#[test]
fn move_only_paths_draw_nothing() {
    let mut b = Path::builder();
    b.move_to((1.0, 1.0));
    b.move_to((2.0, 2.0));
    let path = b.finish();
    let config = TessellationConfig::default();
    for cap in [Cap::Butt, Cap::Round, Cap::Square] {
        let strokes = [PathStroke::new(&path, StrokeStyle::new(4.).with_cap(cap))];
        let mut alloc = BumpAllocator::new(1 << 16);

        let levels =
            count_pass(Level::fallback(), &strokes, &Transform::IDENTITY, &config).unwrap();
        assert_eq!(levels.total_instance_count(), 0);
        let draw = write_pass(&strokes, &Transform::IDENTITY, &levels, &mut alloc).unwrap();
        assert_eq!(draw.instance_count(), 0);
        assert!(draw.commands().is_empty());

        let patches = write_patches(
            Level::fallback(),
            &strokes,
            &Transform::IDENTITY,
            &config,
            &mut alloc,
        )
        .unwrap();
        assert_eq!(patches.patch_count(), 0);

        let fixed = write_fixed_count(
            Level::fallback(),
            &strokes,
            &Transform::IDENTITY,
            &config,
            &mut alloc,
        )
        .unwrap();
        assert_eq!(fixed.instance_count(), 0);
    }
}

#[test]
fn hardware_patches_are_finite() {
    let mut rng = rng();
    let config = TessellationConfig {
        max_tessellation_segments: 8,
        ..Default::default()
    };
    for _ in 0..50 {
        let path = random_path(&mut rng, 2, 6, 300., Verbs::All);
        let strokes = [PathStroke::new(&path, random_stroke(&mut rng))];
        let transform = random_transform(&mut rng);
        let mut alloc = BumpAllocator::new(1 << 22);
        let patches = write_patches(Level::fallback(), &strokes, &transform, &config, &mut alloc)
            .unwrap();
        assert!(patches.patch_count() > 0);
        for patch in patches.patches() {
            assert!(patch.prev_control_point.iter().all(|v| v.is_finite()));
            let [p0, p1, p2, p3] = patch.pts;
            assert!([p0, p1, p2].iter().flatten().all(|v| v.is_finite()), "{patch:?}");
            if p3[1].is_infinite() {
                // Conics store their weight in place of the last point.
                assert!(p3[0].is_finite() && p3[0] > 0., "{patch:?}");
            } else {
                assert!(p3.iter().all(|v| v.is_finite()), "{patch:?}");
            }
        }
    }
}

#[test]
fn fixed_count_pieces_fit_their_instances() {
    let mut rng = rng();
    let config = TessellationConfig {
        max_parametric_segments_log2: 3,
        ..Default::default()
    };
    let max_segments = config.max_parametric_segments();
    for _ in 0..50 {
        let path = random_path(&mut rng, 2, 4, 400., Verbs::CubicsOnly);
        let strokes = [PathStroke::new(&path, random_stroke(&mut rng))];
        let transform = random_transform(&mut rng);
        let xform = VectorXform::new(&transform);
        let mut alloc = BumpAllocator::new(1 << 22);
        let fixed = write_fixed_count(Level::fallback(), &strokes, &transform, &config, &mut alloc)
            .unwrap();
        assert!(fixed.fixed_edge_count >= 1);
        for instance in fixed.instances() {
            let pts = instance.pts.map(Point::from);
            let n = cubic(config.precision, &pts, &xform);
            assert!(n <= max_segments * 1.001 + 1e-3, "{n} segments in {pts:?}");
        }
    }
}
