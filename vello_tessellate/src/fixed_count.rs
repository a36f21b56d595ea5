// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fixed-count instanced stroking.
//!
//! Every stroke piece becomes one [`FixedCountInstance`], and every instance is drawn as a
//! triangle strip with the same number of edges. That number has to cover the worst case of the
//! whole draw: the largest join, the most parametric segments of any piece, and a full half turn
//! of radial segments. Curves that need more parametric segments than an instance can hold are
//! chopped into pieces that fit.

use std::f32::consts::PI;

use bytemuck::{Pod, Zeroable};
use fearless_simd::Level;
use static_assertions::const_assert_eq;

use crate::buffer::{FilledChunk, VertexAllocator, VertexChunkBuilder};
use crate::config::TessellationConfig;
use crate::cull::CullTest;
use crate::geometry::{
    chop_conic_at, chop_cubic_at, chop_cubic_at_many, chop_quad_at, conic_has_cusp,
    eval_conic_at, eval_quad_at, find_conic_midtangent, find_cubic_convex_180_chops,
    find_quad_midtangent, quad_to_cubic,
};
use crate::math::{Point, Transform};
use crate::stroke_iter::{StrokeIterator, StrokeVerb};
use crate::style::{needs_dynamic_stroke, should_draw, DynamicStroke, PathStroke, StrokeStyle};
use crate::tolerances::{
    parametric_precision, worst_case_edges_in_join, RadialToleranceBuffer, StrokeTolerances,
};
use crate::wangs_formula::{conic_pow2, cubic_pow4, quadratic_pow4, root4, VectorXform};
use crate::{Result, MAX_RESOLVE_LEVEL};

/// Upper bound on the edges of an instance, so that its vertex IDs fit in a signed 16 bit
/// integer.
pub const MAX_FIXED_EDGES: u32 = (1 << 14) - 1;

/// One fixed-count stroke instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct FixedCountInstance {
    /// The piece as a cubic. Conics store `(w, inf)` in the last point.
    pub pts: [[f32; 2]; 4],
    /// The control point the piece is joined from.
    pub join_control_point: [f32; 2],
}

const_assert_eq!(size_of::<FixedCountInstance>(), 40);

/// A [`FixedCountInstance`] followed by its stroke, for draws whose strokes differ.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct DynamicFixedCountInstance {
    pub instance: FixedCountInstance,
    pub stroke: DynamicStroke,
}

const_assert_eq!(size_of::<DynamicFixedCountInstance>(), 48);

/// Number of instances to reserve for paths with `total_verbs` verbs in total.
///
/// Strokes are chopped at inflections, at 180 degree turns and wherever they need too many
/// segments, so this leaves room for every stroke to be chopped once, plus a few caps.
pub fn instance_prealloc_count(total_verbs: usize) -> usize {
    total_verbs * 2 + 8
}

/// Vertices needed to fill a curve with a middle-out triangulation at `resolve_level`.
///
/// A curve with `2^resolve_level` segments is filled with `2^resolve_level - 1` triangles.
pub fn fixed_vertex_count(resolve_level: u8) -> u32 {
    let level = resolve_level.min(MAX_RESOLVE_LEVEL);
    ((1_u32 << level) - 1) * 3
}

/// The instances written by [`write_fixed_count`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FixedCountStrokes {
    /// Records are [`DynamicFixedCountInstance`]s if `dynamic_stroke` is set,
    /// [`FixedCountInstance`]s otherwise.
    pub chunks: Vec<FilledChunk>,
    /// Edges drawn by every instance.
    pub fixed_edge_count: u32,
    pub dynamic_stroke: bool,
}

impl FixedCountStrokes {
    pub fn instance_count(&self) -> usize {
        self.chunks.iter().map(|c| c.count).sum()
    }

    /// Vertices drawn by every instance. Each edge has one vertex on either side of the stroke.
    pub fn vertex_count_per_instance(&self) -> u32 {
        self.fixed_edge_count * 2
    }

    /// Every instance, in the order it was written, without its stroke.
    pub fn instances(&self) -> Vec<FixedCountInstance> {
        if self.dynamic_stroke {
            return self.dynamic_instances().iter().map(|i| i.instance).collect();
        }
        self.chunks
            .iter()
            .filter_map(|c| c.records::<FixedCountInstance>())
            .flatten()
            .copied()
            .collect()
    }

    /// Every instance with its stroke. Empty unless `dynamic_stroke` is set.
    pub fn dynamic_instances(&self) -> Vec<DynamicFixedCountInstance> {
        self.chunks
            .iter()
            .filter_map(|c| c.records::<DynamicFixedCountInstance>())
            .flatten()
            .copied()
            .collect()
    }
}

struct InstanceWriter<'a, A: VertexAllocator + ?Sized> {
    out: VertexChunkBuilder<'a, A>,
    dynamic_stroke: Option<DynamicStroke>,
    precision: f32,
    xform: VectorXform,
    cull: Option<CullTest>,
    max_segments: f32,
    max_segments_pow4: f32,
    /// Parametric segments of the most demanding piece so far, to the 4th power.
    required_segments_pow4: f32,
    join_control_point: Option<Point>,
    /// The first piece of a contour, waiting for the control point it is joined from.
    deferred: Option<[Point; 4]>,
}

impl<'a, A: VertexAllocator + ?Sized> InstanceWriter<'a, A> {
    fn emit(&mut self, pts: [Point; 4], join_control_point: Point) {
        let instance = FixedCountInstance {
            pts: pts.map(Point::to_array),
            join_control_point: join_control_point.to_array(),
        };
        match self.dynamic_stroke {
            Some(stroke) => self.out.append(&DynamicFixedCountInstance { instance, stroke }),
            None => self.out.append(&instance),
        };
    }

    fn write_piece(&mut self, pts: [Point; 4], is_conic: bool) {
        match self.join_control_point {
            Some(join_control_point) => self.emit(pts, join_control_point),
            None => {
                debug_assert!(self.deferred.is_none());
                self.deferred = Some(pts);
            }
        }
        // The next piece is joined from the last control point that differs from the end.
        let [p0, p1, p2, p3] = pts;
        let next = if p2 != p3 && !is_conic {
            p2
        } else if p1 != p2 {
            p1
        } else {
            p0
        };
        self.join_control_point = Some(next);
    }

    fn write_deferred(&mut self) {
        if let Some(pts) = self.deferred.take() {
            let join_control_point = self.join_control_point.unwrap_or(pts[0]);
            self.emit(pts, join_control_point);
        }
        self.join_control_point = None;
    }

    /// Writes a 180 degree point stroke, which renders as a circle.
    fn write_circle(&mut self, center: Point) {
        self.emit([center; 4], center);
    }

    fn write_line(&mut self, p0: Point, p1: Point) {
        self.write_piece([p0, p0, p1, p1], false);
    }

    /// Records the parametric segments of a piece that is written without chopping.
    fn fits(&mut self, num_segments_pow4: f32) -> bool {
        if num_segments_pow4 <= self.max_segments_pow4 {
            self.required_segments_pow4 = self.required_segments_pow4.max(num_segments_pow4);
            return true;
        }
        false
    }

    /// Number of pieces to chop a curve into, or `None` if it is not visible and can be drawn
    /// as is.
    fn num_pieces(&mut self, num_segments_pow4: f32, pts: &[Point]) -> Option<u32> {
        if self.cull.is_some_and(|cull| !cull.are_visible(pts)) {
            return None;
        }
        // The pieces need up to the maximum.
        self.required_segments_pow4 = self.max_segments_pow4;
        let max_total = (1_u32 << MAX_RESOLVE_LEVEL) as f32;
        let n = root4(num_segments_pow4).min(max_total);
        let pieces = (n / self.max_segments).ceil().max(2.) as u32;
        log::trace!("Chopping a curve needing {n} segments into {pieces} pieces");
        Some(pieces)
    }

    fn write_quadratic(&mut self, p: [Point; 3]) {
        let n4 = quadratic_pow4(self.precision, &p, &self.xform);
        let pieces = if self.fits(n4) { None } else { self.num_pieces(n4, &p) };
        let mut rest = p;
        // Chopping off `1 / remaining` each time shares every chop point between two pieces.
        for remaining in (2..=pieces.unwrap_or(1)).rev() {
            let c = chop_quad_at(&rest, 1. / remaining as f32);
            self.write_piece(quad_to_cubic(&[c[0], c[1], c[2]]), false);
            rest = [c[2], c[3], c[4]];
        }
        self.write_piece(quad_to_cubic(&rest), false);
    }

    fn write_conic(&mut self, p: [Point; 3], w: f32) {
        let n2 = conic_pow2(self.precision, &p, w, &self.xform);
        let n4 = n2 * n2;
        let pieces = if self.fits(n4) { None } else { self.num_pieces(n4, &p) };
        let (mut rest, mut rest_w) = (p, w);
        for remaining in (2..=pieces.unwrap_or(1)).rev() {
            let Some(chop) = chop_conic_at(&rest, rest_w, 1. / remaining as f32) else {
                break;
            };
            let c = chop.pts;
            self.write_piece([c[0], c[1], c[2], Point::new(chop.weights[0], f32::INFINITY)], true);
            rest = [c[2], c[3], c[4]];
            rest_w = chop.weights[1];
        }
        self.write_piece([rest[0], rest[1], rest[2], Point::new(rest_w, f32::INFINITY)], true);
    }

    fn write_cubic(&mut self, p: [Point; 4]) {
        let n4 = cubic_pow4(self.precision, &p, &self.xform);
        let pieces = if self.fits(n4) { None } else { self.num_pieces(n4, &p) };
        let mut rest = p;
        for remaining in (2..=pieces.unwrap_or(1)).rev() {
            let c = chop_cubic_at(&rest, 1. / remaining as f32);
            self.write_piece([c[0], c[1], c[2], c[3]], false);
            rest = [c[3], c[4], c[5], c[6]];
        }
        self.write_piece(rest, false);
    }

    /// Parametric segments every instance needs to draw, at least 1.
    fn required_fixed_segments(&self) -> f32 {
        root4(self.required_segments_pow4)
            .ceil()
            .clamp(1., self.max_segments)
    }

    fn write_path(&mut self, path_stroke: &PathStroke<'_>, transform: &Transform) {
        for step in StrokeIterator::new(path_stroke.path, &path_stroke.stroke, transform) {
            let segment = step.current;
            let p = segment.pts;
            match segment.verb {
                StrokeVerb::ContourFinished => self.write_deferred(),
                StrokeVerb::Circle => {
                    // Round caps, and zero-length contours with round caps.
                    self.write_circle(p[0]);
                    self.join_control_point = Some(p[0]);
                }
                StrokeVerb::MoveWithinContour => self.join_control_point = Some(p[0]),
                StrokeVerb::Line => self.write_line(p[0], p[1]),
                StrokeVerb::Quad | StrokeVerb::Conic => {
                    let quad = segment.quad_pts();
                    let is_quad = segment.verb == StrokeVerb::Quad;
                    if conic_has_cusp(&quad) {
                        // Only a flat curve with a 180 degree turnaround has a cusp, and it is
                        // always at the midtangent.
                        let cusp = if is_quad {
                            eval_quad_at(&quad, find_quad_midtangent(&quad))
                        } else {
                            eval_conic_at(&quad, segment.w, find_conic_midtangent(&quad, segment.w))
                        };
                        self.write_circle(cusp);
                        self.write_line(quad[0], cusp);
                        self.write_line(cusp, quad[2]);
                    } else if is_quad {
                        self.write_quadratic(quad);
                    } else {
                        self.write_conic(quad, segment.w);
                    }
                }
                StrokeVerb::Cubic => {
                    let (ts, are_cusps) = find_cubic_convex_180_chops(&p);
                    match ts.len() {
                        0 => self.write_cubic(p),
                        1 => {
                            let mut chops = chop_cubic_at(&p, ts[0]);
                            if are_cusps {
                                self.write_circle(chops[3]);
                                // Exactly on the cusp, these would coincide.
                                chops[2] = chops[3];
                                chops[4] = chops[3];
                            }
                            self.write_cubic([chops[0], chops[1], chops[2], chops[3]]);
                            self.write_cubic([chops[3], chops[4], chops[5], chops[6]]);
                        }
                        _ => {
                            let chops = chop_cubic_at_many(&p, &ts);
                            if are_cusps {
                                // Two cusps only happen on a flat line that turns around twice.
                                self.write_circle(chops[3]);
                                self.write_circle(chops[6]);
                                self.write_line(chops[0], chops[3]);
                                self.write_line(chops[3], chops[6]);
                                self.write_line(chops[6], chops[9]);
                            } else {
                                for piece in chops.windows(4).step_by(3) {
                                    self.write_cubic([piece[0], piece[1], piece[2], piece[3]]);
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Writes the fixed-count instances of `strokes` and computes how many edges every instance
/// draws.
///
/// All strokes share `transform`. When the strokes differ, every instance carries its stroke and
/// the radial tolerances are computed four strokes at a time with SIMD at `level`.
///
/// Returns [`Error::AllocationFailed`](crate::Error::AllocationFailed) if the instances could not
/// all be allocated, in which case nothing should be drawn.
/// Returns [`Error::InvalidConfig`](crate::Error::InvalidConfig) if `config` does not validate.
pub fn write_fixed_count(
    level: Level,
    strokes: &[PathStroke<'_>],
    transform: &Transform,
    config: &TessellationConfig,
    alloc: &mut impl VertexAllocator,
) -> Result<FixedCountStrokes> {
    config.validate()?;
    let drawn: Vec<&PathStroke<'_>> = strokes.iter().filter(|s| should_draw(s)).collect();
    let dynamic_stroke = needs_dynamic_stroke(strokes);
    let stride = if dynamic_stroke {
        size_of::<DynamicFixedCountInstance>()
    } else {
        size_of::<FixedCountInstance>()
    };
    let total_verbs = drawn.iter().map(|s| s.path.verbs().len()).sum();
    let max_segments = config.max_parametric_segments();
    let mut writer = InstanceWriter {
        out: VertexChunkBuilder::new(alloc, stride, instance_prealloc_count(total_verbs)),
        dynamic_stroke: dynamic_stroke.then(DynamicStroke::default),
        precision: config.precision,
        xform: VectorXform::new(transform),
        cull: config.cull_bounds.map(|bounds| CullTest::new(bounds, transform)),
        max_segments,
        max_segments_pow4: max_segments.powi(4),
        required_segments_pow4: 0.,
        join_control_point: None,
        deferred: None,
    };

    let mut max_edges_in_join = 0;
    let mut max_radial_segments_per_radian = 0_f32;
    let mut include_stroke = |stroke: &StrokeStyle, num_radial_segments_per_radian: f32| {
        let edges = worst_case_edges_in_join(stroke.join, num_radial_segments_per_radian);
        max_edges_in_join = max_edges_in_join.max(edges);
        max_radial_segments_per_radian =
            max_radial_segments_per_radian.max(num_radial_segments_per_radian);
    };
    if !dynamic_stroke {
        // Every stroke is the same, so the tolerances only need computing once.
        if let Some(first) = drawn.first() {
            let tolerances = StrokeTolerances::new(config, transform, &first.stroke);
            include_stroke(&first.stroke, tolerances.num_radial_segments_per_radian);
        }
    }
    let mut radial_tolerances =
        RadialToleranceBuffer::new(level, parametric_precision(config, transform));
    for (i, path_stroke) in drawn.iter().enumerate() {
        let stroke = &path_stroke.stroke;
        if let Some(dynamic) = &mut writer.dynamic_stroke {
            let num_radial_segments_per_radian = radial_tolerances.fetch(
                drawn[i..]
                    .iter()
                    .map(|s| StrokeTolerances::local_stroke_width(transform, s.stroke.width)),
            );
            include_stroke(stroke, num_radial_segments_per_radian);
            *dynamic = DynamicStroke::new(stroke);
        }
        writer.write_path(path_stroke, transform);
        if writer.out.failed() {
            break;
        }
    }

    // A stroke rotates at most 180 degrees.
    let max_radial_segments_in_stroke = (max_radial_segments_per_radian * PI).ceil().max(1.) as u32;
    let max_parametric_segments_in_stroke = writer.required_fixed_segments() as u32;
    // The parametric and radial edges share their first and last edge, and there is one more
    // edge than segments, so the stroke section has as many edges as both kinds of segments.
    // The join section comes first, and its last edge is repeated at full width by the stroke.
    let mut fixed_edge_count =
        max_edges_in_join + max_radial_segments_in_stroke + max_parametric_segments_in_stroke;
    fixed_edge_count = fixed_edge_count.min(MAX_FIXED_EDGES);
    if !config.vertex_id_support {
        fixed_edge_count = fixed_edge_count.min(TessellationConfig::MAX_EDGES_NO_VERTEX_IDS);
    }

    let instance_count = writer.out.record_count();
    let chunks = writer.out.finish()?;
    log::debug!(
        "Wrote {instance_count} fixed-count stroke instances with {fixed_edge_count} edges each"
    );
    Ok(FixedCountStrokes {
        chunks,
        fixed_edge_count,
        dynamic_stroke,
    })
}
