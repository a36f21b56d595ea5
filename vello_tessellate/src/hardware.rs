// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stroke patches for backends with hardware tessellation shaders.
//!
//! Every patch is a [`StrokePatch`]: a curve, converted to a cubic, together with the control
//! point of the stroke before it. The tessellation shader draws the join between the two and
//! then the curve, all from one patch.
//!
//! The hardware can only emit a limited number of segments per patch. Most curves fit easily and
//! are accepted on a worst case estimate of their rotation. The rest are measured, and chopped if
//! they still do not fit. Joins that cannot share a patch with the curve that follows them are
//! written as patches of their own.
//!
//! Two point patterns are reserved:
//!
//! - `[p0, p3, p3, p3]` is a join on its own, from the previous control point through `p0`
//!   towards `p3`.
//! - `[p0, p0, p0, p3]` is a bowtie join: a round join without an inside or an outside, used
//!   where a curve was chopped.
//!
//! Conics store `(w, inf)` in their last point.

use std::f32::consts::PI;

use bytemuck::{Pod, Zeroable};
use fearless_simd::Level;
use peniko::kurbo::{Cap, Join};
use smallvec::{smallvec, SmallVec};
use static_assertions::const_assert_eq;

use crate::buffer::{FilledChunk, VertexAllocator, VertexChunkBuilder};
use crate::config::TessellationConfig;
use crate::geometry::{
    chop_conic_at, chop_cubic_at, chop_cubic_at_many, chop_quad_at, conic_has_cusp,
    cubic_has_cusp, eval_conic_at, eval_quad_at, find_bisector, find_conic_midtangent,
    find_cubic_convex_180_chops, find_cubic_midtangent, find_quad_midtangent, measure_angle,
    measure_non_inflect_cubic_rotation, measure_quad_rotation, quad_to_cubic,
};
use crate::math::{Point, Transform};
use crate::path::{Path, PathSegment};
use crate::style::{needs_dynamic_stroke, should_draw, DynamicStroke, PathStroke, StrokeStyle};
use crate::tolerances::{parametric_precision, RadialToleranceBuffer, StrokeTolerances};
use crate::wangs_formula::{conic_pow2, cubic_pow4, nextlog2, quadratic_pow4, root4, VectorXform};
use crate::Result;

/// Tangents whose squared cosine is this close to 1 are treated as parallel.
const NEARLY_ZERO: f32 = 1. / (1 << 12) as f32;

/// One hardware tessellation patch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct StrokePatch {
    /// The control point the patch is joined from.
    pub prev_control_point: [f32; 2],
    pub pts: [[f32; 2]; 4],
}

const_assert_eq!(size_of::<StrokePatch>(), 40);

impl StrokePatch {
    /// Whether the patch is a join on its own or a bowtie, rather than a curve.
    pub fn is_join(&self) -> bool {
        let [p0, p1, p2, p3] = self.pts;
        (p1 == p3 && p2 == p3 && p0 != p3) || (p1 == p0 && p2 == p0 && p3 != p0)
    }
}

/// A [`StrokePatch`] followed by its stroke, for draws whose strokes differ.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct DynamicStrokePatch {
    pub patch: StrokePatch,
    pub stroke: DynamicStroke,
}

const_assert_eq!(size_of::<DynamicStrokePatch>(), 48);

/// Number of patches to reserve for paths with `total_verbs` verbs in total.
///
/// Leaves room for one in four strokes to be chopped, and for a few caps.
pub fn patch_prealloc_count(total_verbs: usize) -> usize {
    total_verbs * 5 / 4 + 8
}

/// The joins a patch can start with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinType {
    Miter,
    Round,
    Bevel,
    /// A round join that goes both ways, for the inside of chopped curves.
    Bowtie,
}

impl From<Join> for JoinType {
    fn from(join: Join) -> Self {
        match join {
            Join::Miter => Self::Miter,
            Join::Round => Self::Round,
            Join::Bevel => Self::Bevel,
        }
    }
}

/// The patches written by [`write_patches`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StrokePatches {
    /// Records are [`DynamicStrokePatch`]es if `dynamic_stroke` is set, [`StrokePatch`]es
    /// otherwise.
    pub chunks: Vec<FilledChunk>,
    pub dynamic_stroke: bool,
}

impl StrokePatches {
    pub fn patch_count(&self) -> usize {
        self.chunks.iter().map(|c| c.count).sum()
    }

    /// Every patch, in the order it was written, without its stroke.
    pub fn patches(&self) -> Vec<StrokePatch> {
        if self.dynamic_stroke {
            return self.dynamic_patches().iter().map(|p| p.patch).collect();
        }
        self.chunks
            .iter()
            .filter_map(|c| c.records::<StrokePatch>())
            .flatten()
            .copied()
            .collect()
    }

    /// Every patch with its stroke. Empty unless `dynamic_stroke` is set.
    pub fn dynamic_patches(&self) -> Vec<DynamicStrokePatch> {
        self.chunks
            .iter()
            .filter_map(|c| c.records::<DynamicStrokePatch>())
            .flatten()
            .copied()
            .collect()
    }
}

fn pow4(x: f32) -> f32 {
    let xx = x * x;
    xx * xx
}

/// Segments in a patch that has both parametric and radial segments.
///
/// The first and last edges are shared by the two sets, which leaves one segment fewer than the
/// two counts added together.
fn num_combined_segments(num_parametric_segments: f32, num_radial_segments: f32) -> f32 {
    num_parametric_segments + num_radial_segments - 1.
}

/// Limits for the quick accepts, for one stroke radius and join.
#[derive(Clone, Copy, Debug, Default)]
struct PatchTolerances {
    num_radial_segments_per_radian: f32,
    /// Parametric segments, to the 4th power, that fit next to 180 and 360 degrees of rotation.
    max_parametric_segments_pow4: [f32; 2],
    /// The same, leaving room for the worst case join.
    max_parametric_segments_pow4_with_join: [f32; 2],
    max_combined_segments_with_join: f32,
    solo_round_join_always_fits: bool,
}

impl PatchTolerances {
    fn new(
        num_radial_segments_per_radian: f32,
        join: Join,
        max_tessellation_segments: f32,
    ) -> Self {
        let num_radial_segments_180_360 =
            [PI, 2. * PI].map(|angle| (angle * num_radial_segments_per_radian).ceil().max(1.));
        // There is one more edge than segments.
        let max_total_edges = max_tessellation_segments + 1.;
        let max_parametric_segments =
            num_radial_segments_180_360.map(|radial| (max_total_edges - radial).max(0.));

        let num_radial_segments_180 = num_radial_segments_180_360[0];
        let worst_case_segments_in_join = match join {
            Join::Bevel => 1.,
            Join::Miter => 2.,
            Join::Round => num_radial_segments_180,
        };
        // A join in the same patch needs one more redundant edge between it and the curve.
        let max_parametric_segments_pow4_with_join = max_parametric_segments
            .map(|n| pow4((n - worst_case_segments_in_join - 1.).max(0.)));

        Self {
            num_radial_segments_per_radian,
            max_parametric_segments_pow4: max_parametric_segments.map(pow4),
            max_parametric_segments_pow4_with_join,
            max_combined_segments_with_join: max_tessellation_segments
                - worst_case_segments_in_join
                - 1.,
            solo_round_join_always_fits: num_radial_segments_180 <= max_tessellation_segments,
        }
    }

    fn line_fits_with_join(&self) -> bool {
        self.max_combined_segments_with_join >= 1.
    }

    fn stroke_180_fits(&self, num_parametric_segments_pow4: f32) -> bool {
        num_parametric_segments_pow4 <= self.max_parametric_segments_pow4[0]
    }

    fn stroke_180_fits_with_join(&self, num_parametric_segments_pow4: f32) -> bool {
        num_parametric_segments_pow4 <= self.max_parametric_segments_pow4_with_join[0]
    }

    fn stroke_360_fits(&self, num_parametric_segments_pow4: f32) -> bool {
        num_parametric_segments_pow4 <= self.max_parametric_segments_pow4[1]
    }

    fn stroke_360_fits_with_join(&self, num_parametric_segments_pow4: f32) -> bool {
        num_parametric_segments_pow4 <= self.max_parametric_segments_pow4_with_join[1]
    }
}

/// A curve waiting to be written, possibly after being chopped further.
#[derive(Clone, Copy, Debug)]
struct PendingCurve<const N: usize> {
    join: JoinType,
    pts: [Point; N],
    w: f32,
    /// Chops left before the curve is written as is. `None` until the curve first needs one.
    max_depth: Option<u32>,
}

enum PendingJoin {
    Join {
        next_control_point: Point,
        max_depth: Option<u32>,
    },
    SetControlPoint(Point),
}

struct PatchWriter<'a, A: VertexAllocator + ?Sized> {
    out: VertexChunkBuilder<'a, A>,
    dynamic_stroke: Option<DynamicStroke>,
    max_tessellation_segments: f32,
    parametric_precision: f32,
    tolerances: PatchTolerances,
    stroke_join: JoinType,
    contour_start: Point,
    contour_first_control_point: Point,
    join_control_point: Option<Point>,
}

impl<'a, A: VertexAllocator + ?Sized> PatchWriter<'a, A> {
    fn new(
        out: VertexChunkBuilder<'a, A>,
        config: &TessellationConfig,
        transform: &Transform,
        dynamic_stroke: bool,
    ) -> Self {
        // Patches start with a join, and the tessellator needs a segment to get from the join
        // into the curve.
        let max_tessellation_segments =
            (config.max_tessellation_segments as f32 - 2.).max(1.);
        Self {
            out,
            dynamic_stroke: dynamic_stroke.then(DynamicStroke::default),
            max_tessellation_segments,
            parametric_precision: parametric_precision(config, transform),
            tolerances: PatchTolerances::default(),
            stroke_join: JoinType::Miter,
            contour_start: Point::ZERO,
            contour_first_control_point: Point::ZERO,
            join_control_point: None,
        }
    }

    fn update_tolerances(&mut self, num_radial_segments_per_radian: f32, stroke: &StrokeStyle) {
        self.tolerances = PatchTolerances::new(
            num_radial_segments_per_radian,
            stroke.join,
            self.max_tessellation_segments,
        );
        self.stroke_join = stroke.join.into();
        if let Some(dynamic) = &mut self.dynamic_stroke {
            *dynamic = DynamicStroke::new(stroke);
        }
    }

    fn emit(&mut self, prev_control_point: Point, pts: [Point; 4]) {
        let patch = StrokePatch {
            prev_control_point: prev_control_point.to_array(),
            pts: pts.map(Point::to_array),
        };
        match self.dynamic_stroke {
            Some(stroke) => self.out.append(&DynamicStrokePatch { patch, stroke }),
            None => self.out.append(&patch),
        };
    }

    fn move_to(&mut self, pt: Point) {
        self.contour_start = pt;
        self.join_control_point = None;
    }

    fn write_line_to(&mut self, join: JoinType, p0: Point, p1: Point) {
        if p0 == p1 {
            return;
        }
        let fits = self.tolerances.line_fits_with_join();
        self.internal_patch_to(join, fits, [p0, p0, p1, p1], p1);
    }

    /// Writes a quadratic (`w == 1`) or conic, chopping it until every piece fits in a patch.
    fn write_conic_patches(&mut self, join: JoinType, pts: [Point; 3], w: f32) {
        let mut stack: SmallVec<[PendingCurve<3>; 16]> = smallvec![PendingCurve {
            join,
            pts,
            w,
            max_depth: None,
        }];
        while let Some(PendingCurve {
            join,
            pts: p,
            w,
            max_depth,
        }) = stack.pop()
        {
            if p[1] == p[0] || p[1] == p[2] || w == 0. {
                self.write_line_to(join, p[0], p[2]);
                continue;
            }

            // Quadratics are drawn as cubics. Conics use the quadratic segment count.
            let (patch, num_parametric_segments_pow4) = if w == 1. {
                let pow4 = quadratic_pow4(self.parametric_precision, &p, &VectorXform::IDENTITY);
                (quad_to_cubic(&p), pow4)
            } else {
                let n = conic_pow2(self.parametric_precision, &p, w, &VectorXform::IDENTITY);
                ([p[0], p[1], p[2], Point::new(w, f32::INFINITY)], n * n)
            };
            let fits = self.tolerances.stroke_180_fits(num_parametric_segments_pow4);
            if fits || max_depth == Some(0) {
                if !fits {
                    log::warn!("Stopped chopping a curve that still exceeds the patch limit");
                }
                let fits_with_join = self
                    .tolerances
                    .stroke_180_fits_with_join(num_parametric_segments_pow4);
                self.internal_patch_to(join, fits_with_join, patch, p[2]);
                continue;
            }

            let num_radial_segments = (measure_quad_rotation(&p)
                * self.tolerances.num_radial_segments_per_radian)
                .ceil()
                .max(1.);
            let num_parametric_segments = root4(num_parametric_segments_pow4).ceil().max(1.);
            let num_combined_segments =
                num_combined_segments(num_parametric_segments, num_radial_segments);
            if num_combined_segments > self.max_tessellation_segments {
                // Guards against chopping forever when rounding keeps the midtangent off.
                let depth = max_depth.unwrap_or_else(|| {
                    nextlog2(num_parametric_segments)
                        .saturating_add(nextlog2(num_radial_segments))
                        .saturating_add(1)
                });
                let chop_at_half = num_parametric_segments >= num_radial_segments;
                let halves = if w == 1. {
                    let t = if chop_at_half { 0.5 } else { find_quad_midtangent(&p) };
                    let chops = chop_quad_at(&p, t);
                    let first = [chops[0], chops[1], chops[2]];
                    let second = [chops[2], chops[3], chops[4]];
                    Some((first, second, [1., 1.]))
                } else {
                    let t = if chop_at_half { 0.5 } else { find_conic_midtangent(&p, w) };
                    chop_conic_at(&p, w, t).map(|chop| {
                        let c = chop.pts;
                        ([c[0], c[1], c[2]], [c[2], c[3], c[4]], chop.weights)
                    })
                };
                let Some((first, second, weights)) = halves else {
                    log::trace!("Dropped a conic that could not be chopped");
                    continue;
                };
                log::trace!("Chopped a curve needing {num_combined_segments} segments");
                stack.push(PendingCurve {
                    join: JoinType::Bowtie,
                    pts: second,
                    w: weights[1],
                    max_depth: Some(depth - 1),
                });
                stack.push(PendingCurve {
                    join,
                    pts: first,
                    w: weights[0],
                    max_depth: Some(depth - 1),
                });
                continue;
            }

            let fits_with_join =
                num_combined_segments <= self.tolerances.max_combined_segments_with_join;
            self.internal_patch_to(join, fits_with_join, patch, p[2]);
        }
    }

    /// Writes a cubic that is convex and rotates 180 degrees or less, chopping it until every
    /// piece fits in a patch.
    fn write_cubic_convex_180_patches_to(&mut self, join: JoinType, pts: [Point; 4]) {
        let mut stack: SmallVec<[PendingCurve<4>; 16]> = smallvec![PendingCurve {
            join,
            pts,
            w: 1.,
            max_depth: None,
        }];
        while let Some(PendingCurve {
            join,
            pts: p,
            max_depth,
            ..
        }) = stack.pop()
        {
            if p[1] == p[2] && (p[1] == p[0] || p[1] == p[3]) {
                // The shaders give these patterns a special meaning.
                self.write_line_to(join, p[0], p[3]);
                continue;
            }

            let num_parametric_segments_pow4 =
                cubic_pow4(self.parametric_precision, &p, &VectorXform::IDENTITY);
            let fits = self.tolerances.stroke_180_fits(num_parametric_segments_pow4);
            if fits || max_depth == Some(0) {
                if !fits {
                    log::warn!("Stopped chopping a curve that still exceeds the patch limit");
                }
                let fits_with_join = self
                    .tolerances
                    .stroke_180_fits_with_join(num_parametric_segments_pow4);
                self.internal_patch_to(join, fits_with_join, p, p[3]);
                continue;
            }

            let num_radial_segments = (measure_non_inflect_cubic_rotation(&p)
                * self.tolerances.num_radial_segments_per_radian)
                .ceil()
                .max(1.);
            let num_parametric_segments = root4(num_parametric_segments_pow4).ceil().max(1.);
            let num_combined_segments =
                num_combined_segments(num_parametric_segments, num_radial_segments);
            if num_combined_segments > self.max_tessellation_segments {
                let depth = max_depth.unwrap_or_else(|| {
                    nextlog2(num_parametric_segments)
                        .saturating_add(nextlog2(num_radial_segments))
                        .saturating_add(1)
                });
                let t = if num_parametric_segments >= num_radial_segments {
                    0.5
                } else {
                    find_cubic_midtangent(&p)
                };
                let chops = chop_cubic_at(&p, t);
                log::trace!("Chopped a cubic needing {num_combined_segments} segments");
                stack.push(PendingCurve {
                    join: JoinType::Bowtie,
                    pts: [chops[3], chops[4], chops[5], chops[6]],
                    w: 1.,
                    max_depth: Some(depth - 1),
                });
                stack.push(PendingCurve {
                    join,
                    pts: [chops[0], chops[1], chops[2], chops[3]],
                    w: 1.,
                    max_depth: Some(depth - 1),
                });
                continue;
            }

            let fits_with_join =
                num_combined_segments <= self.tolerances.max_combined_segments_with_join;
            self.internal_patch_to(join, fits_with_join, p, p[3]);
        }
    }

    /// Chops a cubic into convex pieces that rotate 180 degrees or less, then writes them.
    fn write_cubic_convex_180_patches(&mut self, p: &[Point; 4]) {
        let (ts, are_cusps) = find_cubic_convex_180_chops(p);
        match ts.len() {
            0 => self.write_cubic_convex_180_patches_to(self.stroke_join, *p),
            1 => {
                let mut chops = chop_cubic_at(p, ts[0]);
                if are_cusps {
                    // Exactly on the cusp, these would coincide.
                    chops[2] = chops[3];
                    chops[4] = chops[3];
                }
                self.write_cubic_convex_180_patches_to(
                    self.stroke_join,
                    [chops[0], chops[1], chops[2], chops[3]],
                );
                self.write_cubic_convex_180_patches_to(
                    JoinType::Bowtie,
                    [chops[3], chops[4], chops[5], chops[6]],
                );
            }
            _ => {
                let chops = chop_cubic_at_many(p, &ts);
                if are_cusps {
                    // Two cusps only happen on a flat line that turns around twice.
                    self.write_line_to(self.stroke_join, chops[0], chops[3]);
                    self.write_line_to(JoinType::Bowtie, chops[3], chops[6]);
                    self.write_line_to(JoinType::Bowtie, chops[6], chops[9]);
                } else {
                    for (i, piece) in chops.windows(4).step_by(3).enumerate() {
                        let join = if i == 0 { self.stroke_join } else { JoinType::Bowtie };
                        self.write_cubic_convex_180_patches_to(
                            join,
                            [piece[0], piece[1], piece[2], piece[3]],
                        );
                    }
                }
            }
        }
    }

    fn internal_patch_to(
        &mut self,
        join: JoinType,
        mut prev_join_fits: bool,
        p: [Point; 4],
        end_pt: Point,
    ) {
        if join == JoinType::Bowtie {
            if let Some(last) = self.join_control_point {
                // Bowties only need writing where the chop is not smooth.
                let next = if p[1] == p[0] { p[2] } else { p[1] };
                let a = p[0] - last;
                let b = next - p[0];
                let ab_pow2 = a.dot(a) * b.dot(b);
                let ab_cos = a.dot(b);
                let cos_pow2 = ab_cos * ab_cos.abs();
                if (ab_pow2 - cos_pow2).abs() > ab_pow2 * NEARLY_ZERO {
                    self.internal_join_to(JoinType::Bowtie, p[0], next);
                    self.join_control_point = Some(p[0]);
                    prev_join_fits = true;
                }
            }
        }
        let end_control_point = if p[2] != end_pt { p[2] } else { p[1] };
        self.write_patch_to(prev_join_fits, p, end_control_point);
    }

    fn write_patch_to(&mut self, prev_join_fits: bool, p: [Point; 4], end_control_point: Point) {
        let next = if p[1] != p[0] { p[1] } else { p[2] };
        let prev_control_point = match self.join_control_point {
            None => {
                // The first stroke of a contour has nothing to join to yet.
                self.contour_first_control_point = next;
                p[0]
            }
            Some(_) if !prev_join_fits => {
                self.internal_join_to(self.stroke_join, p[0], next);
                p[0]
            }
            Some(last) => last,
        };
        self.emit(prev_control_point, p);
        self.join_control_point = Some(end_control_point);
    }

    /// Writes a join on its own, splitting round joins and bowties that rotate too far for one
    /// patch.
    fn internal_join_to(&mut self, join: JoinType, junction: Point, next_control_point: Point) {
        let mut stack: SmallVec<[PendingJoin; 16]> = smallvec![PendingJoin::Join {
            next_control_point,
            max_depth: None,
        }];
        while let Some(pending) = stack.pop() {
            let (next, max_depth) = match pending {
                PendingJoin::SetControlPoint(p) => {
                    self.join_control_point = Some(p);
                    continue;
                }
                PendingJoin::Join {
                    next_control_point,
                    max_depth,
                } => (next_control_point, max_depth),
            };
            let Some(last) = self.join_control_point else {
                continue;
            };

            if !self.tolerances.solo_round_join_always_fits
                && max_depth != Some(0)
                && matches!(join, JoinType::Round | JoinType::Bowtie)
            {
                let tan0 = junction - last;
                let tan1 = next - junction;
                let num_radial_segments = measure_angle(tan0, tan1)
                    * self.tolerances.num_radial_segments_per_radian;
                if num_radial_segments > self.max_tessellation_segments {
                    let depth = max_depth.unwrap_or_else(|| {
                        nextlog2(num_radial_segments / self.max_tessellation_segments).max(1)
                    });
                    // c0 ends the first half and c1 starts the second. `c0 - junction` must be
                    // exactly `-(c1 - junction)` or the halves leave a seam.
                    let mut bisector = find_bisector(tan0, tan1);
                    let mut c0 = junction;
                    let mut c1 = junction;
                    for _ in 0..10 {
                        bisector = (junction + bisector) - (junction - bisector);
                        c0 = junction + bisector;
                        c1 = junction - bisector;
                        if c0 - junction == -(c1 - junction) {
                            break;
                        }
                    }
                    stack.push(PendingJoin::Join {
                        next_control_point: next,
                        max_depth: Some(depth - 1),
                    });
                    stack.push(PendingJoin::SetControlPoint(c1));
                    stack.push(PendingJoin::Join {
                        next_control_point: c0,
                        max_depth: Some(depth - 1),
                    });
                    continue;
                }
            }

            let mid = if join == JoinType::Bowtie {
                junction
            } else {
                next
            };
            self.emit(last, [junction, mid, mid, next]);
            self.join_control_point = Some(next);
        }
    }

    fn internal_move_to(&mut self, pt: Point, next_control_point: Point) {
        self.contour_start = pt;
        self.contour_first_control_point = next_control_point;
        self.join_control_point = Some(next_control_point);
    }

    fn write_close(
        &mut self,
        contour_endpoint: Point,
        transform: &Transform,
        stroke: &StrokeStyle,
    ) {
        if self.join_control_point.is_none() {
            // A closed contour with no strokes still gets caps.
            self.write_caps(contour_endpoint, transform, stroke);
            return;
        }
        let (start, first_control_point) = (self.contour_start, self.contour_first_control_point);
        self.write_line_to(self.stroke_join, contour_endpoint, start);
        self.internal_join_to(self.stroke_join, start, first_control_point);
        self.join_control_point = None;
    }

    /// Returns `v` scaled to extend half the stroke width, or half a device pixel for hairlines.
    fn cap_extent(v: Point, transform: &Transform, stroke: &StrokeStyle) -> Point {
        let (length, half_width) = if stroke.is_hairline() {
            (transform.map_vector(v).length(), 0.5)
        } else {
            (v.length(), 0.5 * stroke.width)
        };
        if length == 0. {
            return v;
        }
        v * (half_width / length)
    }

    fn write_caps(
        &mut self,
        mut contour_endpoint: Point,
        transform: &Transform,
        stroke: &StrokeStyle,
    ) {
        let last = match self.join_control_point {
            Some(last) => last,
            None => {
                // Nothing orients the caps, so draw an axis-aligned square or circle. Hairlines
                // align with the device x axis: the inverse of the matrix maps (1, 0) onto
                // (d, -c), up to scale.
                let outset = if stroke.is_hairline() {
                    let [_, c, _, d] = transform.matrix;
                    Point::new(d, -c)
                } else {
                    Point::new(1., 0.)
                };
                self.contour_first_control_point = self.contour_start - outset;
                contour_endpoint = self.contour_start;
                self.contour_start + outset
            }
        };
        self.join_control_point = Some(last);

        let (start, first_control_point) = (self.contour_start, self.contour_first_control_point);
        match stroke.cap {
            Cap::Butt => {}
            Cap::Round => {
                // A round cap is a 180 degree round join. Bowties draw the same thing.
                let join = if stroke.join == Join::Round {
                    JoinType::Round
                } else {
                    JoinType::Bowtie
                };
                self.internal_join_to(join, contour_endpoint, last);
                self.internal_move_to(start, first_control_point);
                self.internal_join_to(join, start, first_control_point);
            }
            Cap::Square => {
                let last_tangent = Self::cap_extent(contour_endpoint - last, transform, stroke);
                self.write_line_to(
                    self.stroke_join,
                    contour_endpoint,
                    contour_endpoint + last_tangent,
                );
                self.internal_move_to(start, first_control_point);
                let first_tangent =
                    -Self::cap_extent(first_control_point - start, transform, stroke);
                self.write_line_to(self.stroke_join, start, start + first_tangent);
            }
        }
        self.join_control_point = None;
    }

    fn write_path(&mut self, path: &Path, transform: &Transform, stroke: &StrokeStyle) {
        let stroke_join = self.stroke_join;
        let precision = self.parametric_precision;
        // "A subpath consisting of a single moveto shall not be stroked."
        let mut contour_is_empty = true;
        let mut current = Point::ZERO;
        for segment in path.segments() {
            let (prev_join_fits, patch, end_control_point) = match segment {
                PathSegment::Move(p) => {
                    if !contour_is_empty {
                        self.write_caps(current, transform, stroke);
                    }
                    self.move_to(p);
                    contour_is_empty = true;
                    current = p;
                    continue;
                }
                PathSegment::Close([end, start]) => {
                    self.write_close(end, transform, stroke);
                    contour_is_empty = true;
                    current = start;
                    continue;
                }
                PathSegment::Line([p0, p1]) => {
                    contour_is_empty = false;
                    current = p1;
                    if p0 == p1 {
                        continue;
                    }
                    (self.tolerances.line_fits_with_join(), [p0, p0, p1, p1], p0)
                }
                PathSegment::Quad(p) => {
                    contour_is_empty = false;
                    current = p[2];
                    if p[1] == p[0] || p[1] == p[2] {
                        // Possibly zero length, which the line handles.
                        self.write_line_to(stroke_join, p[0], p[2]);
                        continue;
                    }
                    if conic_has_cusp(&p) {
                        let cusp = eval_quad_at(&p, find_quad_midtangent(&p));
                        self.write_line_to(stroke_join, p[0], cusp);
                        self.write_line_to(JoinType::Bowtie, cusp, p[2]);
                        continue;
                    }
                    let pow4 = quadratic_pow4(precision, &p, &VectorXform::IDENTITY);
                    if !self.tolerances.stroke_180_fits(pow4) {
                        self.write_conic_patches(stroke_join, p, 1.);
                        continue;
                    }
                    let patch = quad_to_cubic(&p);
                    (self.tolerances.stroke_180_fits_with_join(pow4), patch, patch[2])
                }
                PathSegment::Conic(p, w) => {
                    contour_is_empty = false;
                    current = p[2];
                    if p[1] == p[0] || p[1] == p[2] {
                        self.write_line_to(stroke_join, p[0], p[2]);
                        continue;
                    }
                    if conic_has_cusp(&p) {
                        let cusp = eval_conic_at(&p, w, find_conic_midtangent(&p, w));
                        self.write_line_to(stroke_join, p[0], cusp);
                        self.write_line_to(JoinType::Bowtie, cusp, p[2]);
                        continue;
                    }
                    let n = conic_pow2(precision, &p, w, &VectorXform::IDENTITY);
                    let pow4 = n * n;
                    if !self.tolerances.stroke_180_fits(pow4) {
                        self.write_conic_patches(stroke_join, p, w);
                        continue;
                    }
                    let patch = [p[0], p[1], p[2], Point::new(w, f32::INFINITY)];
                    (self.tolerances.stroke_180_fits_with_join(pow4), patch, p[1])
                }
                PathSegment::Cubic(p) => {
                    contour_is_empty = false;
                    current = p[3];
                    if p[1] == p[2] && (p[1] == p[0] || p[1] == p[3]) {
                        self.write_line_to(stroke_join, p[0], p[3]);
                        continue;
                    }
                    let pow4 = cubic_pow4(precision, &p, &VectorXform::IDENTITY);
                    if !self.tolerances.stroke_360_fits(pow4) || cubic_has_cusp(&p) {
                        self.write_cubic_convex_180_patches(&p);
                        continue;
                    }
                    let end_control_point = if p[2] != p[3] { p[2] } else { p[1] };
                    (self.tolerances.stroke_360_fits_with_join(pow4), p, end_control_point)
                }
            };
            self.write_patch_to(prev_join_fits, patch, end_control_point);
        }
        if !contour_is_empty {
            self.write_caps(current, transform, stroke);
        }
    }
}

/// Writes the hardware tessellation patches of `strokes`.
///
/// All strokes share `transform`. When the strokes differ, every patch carries its stroke and
/// the radial tolerances are computed four strokes at a time with SIMD at `level`.
///
/// Returns [`Error::AllocationFailed`](crate::Error::AllocationFailed) if the patches could not
/// all be allocated, in which case nothing should be drawn.
/// Returns [`Error::InvalidConfig`](crate::Error::InvalidConfig) if `config` does not validate.
pub fn write_patches(
    level: Level,
    strokes: &[PathStroke<'_>],
    transform: &Transform,
    config: &TessellationConfig,
    alloc: &mut impl VertexAllocator,
) -> Result<StrokePatches> {
    config.validate()?;
    let drawn: Vec<&PathStroke<'_>> = strokes.iter().filter(|s| should_draw(s)).collect();
    let dynamic_stroke = needs_dynamic_stroke(strokes);
    let stride = if dynamic_stroke {
        size_of::<DynamicStrokePatch>()
    } else {
        size_of::<StrokePatch>()
    };
    let total_verbs = drawn.iter().map(|s| s.path.verbs().len()).sum();
    let out = VertexChunkBuilder::new(alloc, stride, patch_prealloc_count(total_verbs));
    let mut writer = PatchWriter::new(out, config, transform, dynamic_stroke);

    if !dynamic_stroke {
        // Every stroke is the same, so the tolerances only need computing once.
        if let Some(first) = drawn.first() {
            let tolerances = StrokeTolerances::new(config, transform, &first.stroke);
            writer.update_tolerances(tolerances.num_radial_segments_per_radian, &first.stroke);
        }
    }
    let mut radial_tolerances =
        RadialToleranceBuffer::new(level, parametric_precision(config, transform));
    for (i, path_stroke) in drawn.iter().enumerate() {
        if dynamic_stroke {
            let num_radial_segments_per_radian = radial_tolerances.fetch(
                drawn[i..]
                    .iter()
                    .map(|s| StrokeTolerances::local_stroke_width(transform, s.stroke.width)),
            );
            writer.update_tolerances(num_radial_segments_per_radian, &path_stroke.stroke);
        }
        writer.write_path(path_stroke.path, transform, &path_stroke.stroke);
        if writer.out.failed() {
            break;
        }
    }

    let patch_count = writer.out.record_count();
    let chunks = writer.out.finish()?;
    log::debug!("Wrote {patch_count} stroke patches in {} chunks", chunks.len());
    Ok(StrokePatches {
        chunks,
        dynamic_stroke,
    })
}
