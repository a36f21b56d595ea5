// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tolerances that decide how many segments a stroke needs.
//!
//! Strokes are tessellated with two kinds of segments: parametric segments, evenly spaced in `t`,
//! keep the centerline within `1/precision` pixels of the curve; radial segments, evenly spaced
//! in tangent angle, do the same for the outer edges as they sweep around joins and curves.

use std::f32::consts::PI;

use fearless_simd::Level;
use peniko::kurbo::Join;

use crate::config::TessellationConfig;
use crate::math::Transform;
use crate::simd::approx_radial_segments_per_radian;
use crate::style::StrokeStyle;
use crate::wangs_formula::nextlog2;
use crate::MAX_RESOLVE_LEVEL;

/// Returns the precision to use for parametric segments under `transform`.
pub fn parametric_precision(config: &TessellationConfig, transform: &Transform) -> f32 {
    config.precision * transform.max_scale()
}

/// Tolerances for one stroke under one transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrokeTolerances {
    pub parametric_precision: f32,
    pub num_radial_segments_per_radian: f32,
    /// Worst case number of edges any join of this stroke needs.
    pub edges_in_joins: u32,
}

impl StrokeTolerances {
    pub fn new(config: &TessellationConfig, transform: &Transform, stroke: &StrokeStyle) -> Self {
        let parametric_precision = parametric_precision(config, transform);
        let local_width = Self::local_stroke_width(transform, stroke.width);
        let num_radial_segments_per_radian =
            Self::num_radial_segments_per_radian(parametric_precision, local_width);
        Self {
            parametric_precision,
            num_radial_segments_per_radian,
            edges_in_joins: worst_case_edges_in_join(stroke.join, num_radial_segments_per_radian),
        }
    }

    /// Returns the stroke width in local coordinates.
    ///
    /// Hairlines are one device pixel wide, which is `1 / max scale` in local coordinates.
    pub fn local_stroke_width(transform: &Transform, width: f32) -> f32 {
        if width != 0. {
            return width;
        }
        match transform.min_max_scales() {
            Some([_, max]) if max.is_finite() && max != 0. => 1. / max,
            _ => 1.,
        }
    }

    /// Returns how many radial segments a stroke of `local_width` needs per radian of rotation.
    pub fn num_radial_segments_per_radian(parametric_precision: f32, local_width: f32) -> f32 {
        // Each segment may rotate by 2 * acos(cos_theta) and stay within 1/precision of the arc.
        let cos_theta = 1. - (1. / parametric_precision) / (local_width / 2.);
        0.5 / cos_theta.max(-1.).acos()
    }

    /// Returns how many radial segments a full half circle needs, at least 1.
    pub fn radial_segments_180(&self) -> u32 {
        (self.num_radial_segments_per_radian * PI).ceil().max(1.) as u32
    }
}

/// Returns the resolve level of a circle, used for round caps and cusps.
///
/// A circle is drawn as two half-circle joins, so it needs `PI` radians worth of radial segments.
pub fn circle_resolve_level(num_radial_segments_per_radian: f32) -> u8 {
    let level = nextlog2(num_radial_segments_per_radian * PI);
    level.clamp(1, MAX_RESOLVE_LEVEL as u32) as u8
}

/// Number of edges every join needs, before any round segments.
pub fn num_fixed_edges_in_join(join: Join) -> u32 {
    match join {
        // Miter joins need an extra edge for the tip.
        Join::Miter => 4,
        Join::Round | Join::Bevel => 3,
    }
}

/// Returns the most edges a join of `join` type can need.
pub fn worst_case_edges_in_join(join: Join, num_radial_segments_per_radian: f32) -> u32 {
    let mut edges = num_fixed_edges_in_join(join);
    if join == Join::Round {
        edges += ((num_radial_segments_per_radian * PI).ceil().max(1.) as u32) - 1;
    }
    edges
}

/// Computes radial segments per radian for a run of strokes, four at a time.
///
/// Used when each path of a draw has its own stroke. Values come from an approximate arc cosine,
/// so they can differ slightly from [`StrokeTolerances::num_radial_segments_per_radian`].
pub struct RadialToleranceBuffer {
    level: Level,
    parametric_precision: f32,
    values: [f32; 4],
    next: usize,
}

impl RadialToleranceBuffer {
    pub fn new(level: Level, parametric_precision: f32) -> Self {
        Self {
            level,
            parametric_precision,
            values: [0.; 4],
            next: 4,
        }
    }

    /// Returns the value for the first of `local_widths`, computing the next four if needed.
    ///
    /// Call this once per stroke, passing the widths of the current stroke and every one after it.
    pub fn fetch(&mut self, local_widths: impl IntoIterator<Item = f32>) -> f32 {
        if self.next == 4 {
            // Lanes past the last stroke get a width of 1 and are never read.
            let mut widths = [1.; 4];
            for (w, local) in widths.iter_mut().zip(local_widths) {
                *w = local;
            }
            self.values =
                approx_radial_segments_per_radian(self.level, self.parametric_precision, widths);
            self.next = 0;
        }
        let value = self.values[self.next];
        self.next += 1;
        value
    }
}
