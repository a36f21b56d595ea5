// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Indirect stroke tessellation, binned by resolve level.
//!
//! Every stroke piece is drawn as one instance with `2^resolve_level` segments, plus the edges of
//! the join that precedes it. Instances with the same resolve level form a bin, and each non-empty
//! bin is drawn with one indirect draw command.
//!
//! The work is split into two passes over the same strokes:
//!
//! 1. [`count_pass`] finds the resolve level of every piece and builds a histogram of them.
//! 2. [`write_pass`] lays the bins out back to back using that histogram, then walks the strokes
//!    again and writes each instance into the next free slot of its bin.
//!
//! The second pass never recomputes a resolve level or a chop point. It replays the
//! [`ResolveEntry`]s and chop parameters recorded by the first pass, so the two passes cannot
//! disagree about where an instance goes.

use bytemuck::{Pod, Zeroable};
use fearless_simd::Level;
use peniko::kurbo::Join;
use static_assertions::const_assert_eq;

use crate::buffer::{VertexAllocator, VertexChunk};
use crate::config::TessellationConfig;
use crate::geometry::{
    chop_cubic_at_many, conic_has_cusp, eval_conic_at, eval_quad_at, find_conic_midtangent,
    find_cubic_convex_180_chops, find_quad_midtangent, quad_to_cubic, CubicChops,
};
use crate::math::{Point, Transform};
use crate::simd::{resolve_levels, PendingPiece};
use crate::stroke_iter::{StrokeIterator, StrokeSegment, StrokeVerb};
use crate::style::{needs_dynamic_stroke, should_draw, DynamicStroke, PathStroke, StrokeStyle};
use crate::tolerances::{
    circle_resolve_level, num_fixed_edges_in_join, parametric_precision, StrokeTolerances,
};
use crate::wangs_formula::{length_term_pow2, VectorXform};
use crate::{Error, Result, MAX_RESOLVE_LEVEL};

/// Number of resolve-level bins.
pub const NUM_BINS: usize = MAX_RESOLVE_LEVEL as usize + 1;

/// One entry of the resolve-level list recorded by [`count_pass`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolveEntry {
    /// The resolve level of the next piece.
    Level(u8),
    /// The next curve is chopped `count` times, and the entries of its pieces follow.
    ///
    /// If the chop points are cusps, a circle is drawn at each of them with `cusp_level`.
    ChopSentinel { count: u8, cusp_level: Option<u8> },
}

/// An indirect draw command, laid out as `wgpu::util::DrawIndirectArgs`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct DrawIndirectCommand {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub base_vertex: u32,
    pub base_instance: u32,
}

const_assert_eq!(size_of::<DrawIndirectCommand>(), 16);

/// One stroke instance.
///
/// A circle, used for round caps and cusps, repeats its center in all five points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct IndirectInstance {
    /// The piece as a cubic. Conics store `(w, inf)` in the last point.
    pub pts: [[f32; 2]; 4],
    /// The control point the piece is joined from.
    pub prev_control_point: [f32; 2],
    /// Edges the instance draws, including its join. Negative after a chop, where the join
    /// collapses to a single segment, and for circles.
    pub num_total_edges: f32,
}

const_assert_eq!(size_of::<IndirectInstance>(), 40);

/// An [`IndirectInstance`] followed by its stroke, for draws whose strokes differ.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct DynamicIndirectInstance {
    pub instance: IndirectInstance,
    pub stroke: DynamicStroke,
}

const_assert_eq!(size_of::<DynamicIndirectInstance>(), 48);

/// Resolve levels of a list of strokes, as computed by [`count_pass`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolveLevels {
    entries: Vec<ResolveEntry>,
    chop_ts: Vec<f32>,
    histogram: [u32; NUM_BINS],
    max_extra_edges_in_join: u32,
}

impl ResolveLevels {
    /// Entries in the order the strokes were walked.
    pub fn entries(&self) -> &[ResolveEntry] {
        &self.entries
    }

    /// Chop parameters of every chopped cubic, in walk order.
    pub fn chop_ts(&self) -> &[f32] {
        &self.chop_ts
    }

    /// Number of instances at each resolve level.
    pub fn histogram(&self) -> &[u32; NUM_BINS] {
        &self.histogram
    }

    pub fn total_instance_count(&self) -> u32 {
        self.histogram.iter().sum()
    }

    /// Number of non-empty bins, which is the number of indirect draw commands.
    pub fn draw_indirect_count(&self) -> u32 {
        self.histogram.iter().filter(|&&n| n != 0).count() as u32
    }

    /// Edges every instance reserves for its join, before round join segments.
    pub fn max_extra_edges_in_join(&self) -> u32 {
        self.max_extra_edges_in_join
    }

    /// Edges drawn by an instance at `resolve_level`, including its join.
    pub fn num_edges_in_resolve_level(&self, resolve_level: u8) -> u32 {
        // There is an edge at both ends of every segment, so one more edge than segments.
        self.max_extra_edges_in_join + (1 << resolve_level) + 1
    }
}

/// Returns the control point that the join before `current` comes from, using the geometry of
/// `prev`. This only needs a direction, not the exact point the GPU will see after chopping.
fn last_control_point(prev: &StrokeSegment, current: &StrokeSegment) -> Point {
    let p = &prev.pts;
    match prev.verb {
        StrokeVerb::Cubic if p[2] != p[3] => p[2],
        StrokeVerb::Cubic | StrokeVerb::Quad | StrokeVerb::Conic if p[1] != p[2] => p[1],
        StrokeVerb::Cubic | StrokeVerb::Quad | StrokeVerb::Conic | StrokeVerb::Line => p[0],
        // Nothing to join to. Using the current point makes the join rotate by zero.
        StrokeVerb::MoveWithinContour | StrokeVerb::Circle | StrokeVerb::ContourFinished => {
            current.pts[0]
        }
    }
}

/// Counts resolve levels, batching pieces four at a time through the SIMD kernels.
struct ResolveLevelCounter {
    level: Level,
    matrix: [f32; 4],
    quad_term_pow2: f32,
    cubic_term_pow2: f32,
    levels: ResolveLevels,
    batch: [PendingPiece; 4],
    batch_slots: [usize; 4],
    batch_len: usize,
    // Per stroke.
    is_round_join: bool,
    radial_segments_per_radian: f32,
    circle_level: u8,
}

impl ResolveLevelCounter {
    fn new(level: Level, parametric_precision: f32) -> Self {
        Self {
            level,
            // The precision already includes the view scale.
            matrix: VectorXform::IDENTITY.matrix(),
            quad_term_pow2: length_term_pow2::<2>(parametric_precision),
            cubic_term_pow2: length_term_pow2::<3>(parametric_precision),
            levels: ResolveLevels::default(),
            batch: [PendingPiece::default(); 4],
            batch_slots: [0; 4],
            batch_len: 0,
            is_round_join: false,
            radial_segments_per_radian: 0.,
            circle_level: 1,
        }
    }

    fn update_tolerances(&mut self, tolerances: &StrokeTolerances, stroke: &StrokeStyle) {
        self.is_round_join = stroke.join == Join::Round;
        self.radial_segments_per_radian = tolerances.num_radial_segments_per_radian;
        self.circle_level = circle_resolve_level(tolerances.num_radial_segments_per_radian);
        self.levels.max_extra_edges_in_join = self
            .levels
            .max_extra_edges_in_join
            .max(num_fixed_edges_in_join(stroke.join));
    }

    /// Counts `n` circles and returns their resolve level.
    fn count_circles(&mut self, n: u32) -> u8 {
        self.levels.histogram[self.circle_level as usize] += n;
        self.circle_level
    }

    /// Reserves an entry for `piece` and queues it. The entry is filled in when the batch flushes.
    fn push(&mut self, mut piece: PendingPiece) {
        piece.radial_segments_per_radian = self.radial_segments_per_radian;
        self.batch[self.batch_len] = piece;
        self.batch_slots[self.batch_len] = self.levels.entries.len();
        self.levels.entries.push(ResolveEntry::Level(0));
        self.batch_len += 1;
        if self.batch_len == 4 {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.batch_len == 0 {
            return;
        }
        let levels = resolve_levels(
            self.level,
            &self.batch[..self.batch_len],
            self.matrix,
            MAX_RESOLVE_LEVEL,
        );
        for (&slot, &level) in self.batch_slots[..self.batch_len].iter().zip(&levels) {
            self.levels.entries[slot] = ResolveEntry::Level(level);
            self.levels.histogram[level as usize] += 1;
        }
        self.batch_len = 0;
    }

    /// Counts a line. Returns false if it needs no entry, which is when its join is not round and
    /// its resolve level is always 0.
    fn count_line(&mut self, pts: [Point; 2], last_control_point: Point) -> bool {
        if !self.is_round_join {
            self.levels.histogram[0] += 1;
            return false;
        }
        self.push(PendingPiece {
            tangent_pairs: [[pts[0] - last_control_point, pts[1] - pts[0]], [Point::ZERO; 2]],
            ..Default::default()
        });
        true
    }

    fn count_quad(&mut self, pts: [Point; 3], last_control_point: Point) {
        let [p0, p1, p2] = pts;
        // A quadratic rotates less than 180 degrees, so its rotation is the angle between its end
        // tangents. This is zero if two points coincide.
        let mut tangent_pairs = [[p1 - p0, p2 - p1], [Point::ZERO; 2]];
        if self.is_round_join {
            let next_tan = if p0 == p1 { p2 } else { p1 } - p0;
            tangent_pairs[1] = [p0 - last_control_point, next_tan];
        }
        self.push(PendingPiece {
            second_differences: [p0 - p1 * 2. + p2, Point::ZERO],
            length_term_pow2: self.quad_term_pow2,
            tangent_pairs,
            ..Default::default()
        });
    }

    /// Counts a cubic that is convex and rotates at most 180 degrees.
    fn count_cubic(&mut self, pts: &[Point], last_control_point: Point, count_round_join: bool) {
        let [p0, p1, p2, p3] = [pts[0], pts[1], pts[2], pts[3]];
        let tan0 = if p1 != p0 { p1 - p0 } else { p2 - p0 };
        let tan1 = if p3 != p2 { p3 - p2 } else { p3 - p1 };
        let mut tangent_pairs = [[tan0, tan1], [Point::ZERO; 2]];
        if self.is_round_join && count_round_join {
            let next_tan = if tan0.is_zero() { tan1 } else { tan0 };
            tangent_pairs[1] = [p0 - last_control_point, next_tan];
        }
        self.push(PendingPiece {
            second_differences: [p0 - p1 * 2. + p2, p1 - p2 * 2. + p3],
            length_term_pow2: self.cubic_term_pow2,
            tangent_pairs,
            ..Default::default()
        });
    }

    fn count_stroke(&mut self, segment: &StrokeSegment, last_control_point: Point) {
        let pts = &segment.pts;
        match segment.verb {
            StrokeVerb::Line => {
                self.count_line(segment.line_pts(), last_control_point);
            }
            // Conics use the quadratic estimate, ignoring the weight.
            StrokeVerb::Quad | StrokeVerb::Conic => {
                let quad = segment.quad_pts();
                if conic_has_cusp(&quad) {
                    // A flat line that turns back: two lines and a circle at the turnaround.
                    let cusp_level = self.count_circles(1);
                    self.levels.entries.push(ResolveEntry::ChopSentinel {
                        count: 1,
                        cusp_level: Some(cusp_level),
                    });
                    self.count_line([quad[0], quad[1]], last_control_point);
                    // The second line.
                    self.levels.histogram[0] += 1;
                } else {
                    self.count_quad(quad, last_control_point);
                }
            }
            StrokeVerb::Cubic => {
                let (ts, are_cusps) = find_cubic_convex_180_chops(pts);
                if ts.is_empty() {
                    self.count_cubic(pts, last_control_point, true);
                    return;
                }
                let cusp_level = are_cusps.then(|| self.count_circles(ts.len() as u32));
                self.levels.entries.push(ResolveEntry::ChopSentinel {
                    count: ts.len() as u8,
                    cusp_level,
                });
                let chops = chop_cubic_at_many(pts, &ts);
                self.count_cubic(&chops[0..4], last_control_point, true);
                // Joins between pieces of a chop collapse to a single segment.
                for piece in chops[3..].windows(4).step_by(3) {
                    self.count_cubic(piece, piece[0], false);
                }
                self.levels.chop_ts.extend_from_slice(&ts);
            }
            StrokeVerb::Circle => {
                let level = self.count_circles(1);
                self.levels.entries.push(ResolveEntry::Level(level));
            }
            StrokeVerb::MoveWithinContour | StrokeVerb::ContourFinished => {}
        }
    }

    fn finish(mut self) -> ResolveLevels {
        self.flush();
        self.levels
    }
}

/// Computes the resolve level of every piece of `strokes`.
///
/// All strokes share `transform`. Pieces are evaluated four at a time with SIMD at `level`.
///
/// Returns [`Error::InvalidConfig`] if `config` does not validate.
pub fn count_pass(
    level: Level,
    strokes: &[PathStroke<'_>],
    transform: &Transform,
    config: &TessellationConfig,
) -> Result<ResolveLevels> {
    config.validate()?;
    let mut counter = ResolveLevelCounter::new(level, parametric_precision(config, transform));
    let mut last_stroke: Option<StrokeStyle> = None;
    for path_stroke in strokes.iter().filter(|s| should_draw(s)) {
        let stroke = &path_stroke.stroke;
        if last_stroke.is_none_or(|last| last.width != stroke.width || last.join != stroke.join)
        {
            let tolerances = StrokeTolerances::new(config, transform, stroke);
            counter.update_tolerances(&tolerances, stroke);
            last_stroke = Some(*stroke);
        }
        for step in StrokeIterator::new(path_stroke.path, stroke, transform) {
            if !step.current.verb.is_geometric() {
                continue;
            }
            let last_control_point = last_control_point(&step.prev, &step.current);
            counter.count_stroke(&step.current, last_control_point);
        }
    }
    let levels = counter.finish();
    log::debug!(
        "Counted {} stroke instances in {} bins",
        levels.total_instance_count(),
        levels.draw_indirect_count()
    );
    Ok(levels)
}

/// The buffers written by [`write_pass`].
#[derive(Clone, Debug, PartialEq)]
pub struct IndirectDraw {
    /// One [`DrawIndirectCommand`] per non-empty bin, in increasing resolve level.
    pub indirect: VertexChunk,
    /// The instances of every bin, back to back. Records are [`DynamicIndirectInstance`]s if
    /// `dynamic_stroke` is set, [`IndirectInstance`]s otherwise.
    pub instances: VertexChunk,
    pub dynamic_stroke: bool,
}

impl IndirectDraw {
    fn empty() -> Self {
        Self {
            indirect: VertexChunk::new(size_of::<DrawIndirectCommand>(), 0, 0),
            instances: VertexChunk::new(size_of::<IndirectInstance>(), 0, 0),
            dynamic_stroke: false,
        }
    }

    pub fn instance_count(&self) -> u32 {
        self.instances.count() as u32
    }

    pub fn commands(&self) -> &[DrawIndirectCommand] {
        self.indirect.records().unwrap_or_default()
    }

    /// Returns the instance records, or `None` if they carry a dynamic stroke.
    pub fn instance_records(&self) -> Option<&[IndirectInstance]> {
        self.instances.records()
    }

    /// Returns the instance records with their strokes, or `None` if they carry no stroke.
    pub fn dynamic_instance_records(&self) -> Option<&[DynamicIndirectInstance]> {
        self.instances.records()
    }
}

/// Writes instances into the slots of their resolve level's bin.
struct BinningWriter {
    instances: VertexChunk,
    cursors: [usize; NUM_BINS],
    ends: [usize; NUM_BINS],
    num_edges: [f32; NUM_BINS],
    dynamic_stroke: Option<DynamicStroke>,
}

impl BinningWriter {
    /// Lays out the bins in `instances` and writes one draw command per non-empty bin.
    fn new(
        levels: &ResolveLevels,
        indirect: &mut VertexChunk,
        instances: VertexChunk,
        dynamic_stroke: bool,
    ) -> Self {
        let mut cursors = [0; NUM_BINS];
        let mut ends = [0; NUM_BINS];
        let mut num_edges = [0.; NUM_BINS];
        let mut running = 0;
        let mut command_ix = 0;
        for (resolve_level, &count) in levels.histogram.iter().enumerate() {
            cursors[resolve_level] = running;
            running += count as usize;
            ends[resolve_level] = running;
            if count == 0 {
                continue;
            }
            let edges = levels.num_edges_in_resolve_level(resolve_level as u8);
            num_edges[resolve_level] = edges as f32;
            let command = DrawIndirectCommand {
                vertex_count: edges * 2,
                instance_count: count,
                base_vertex: 0,
                base_instance: instances.base() + cursors[resolve_level] as u32,
            };
            let written = indirect.write(command_ix, &command);
            debug_assert!(written, "indirect buffer too small");
            command_ix += 1;
        }
        Self {
            instances,
            cursors,
            ends,
            num_edges,
            dynamic_stroke: dynamic_stroke.then(DynamicStroke::default),
        }
    }

    fn update_dynamic_stroke(&mut self, stroke: &StrokeStyle) {
        if let Some(dynamic) = &mut self.dynamic_stroke {
            *dynamic = DynamicStroke::new(stroke);
        }
    }

    fn write(&mut self, resolve_level: u8, instance: IndirectInstance) {
        let bin = resolve_level as usize;
        let index = self.cursors[bin];
        debug_assert!(index < self.ends[bin], "bin {bin} overflowed");
        let written = match self.dynamic_stroke {
            Some(stroke) => self
                .instances
                .write(index, &DynamicIndirectInstance { instance, stroke }),
            None => self.instances.write(index, &instance),
        };
        debug_assert!(written, "instance buffer too small");
        self.cursors[bin] += 1;
    }

    fn write_stroke(
        &mut self,
        resolve_level: u8,
        pts: &[Point; 4],
        prev_control_point: Point,
        is_internal_chop: bool,
    ) {
        let edges = self.num_edges[resolve_level as usize];
        self.write(
            resolve_level,
            IndirectInstance {
                pts: pts.map(Point::to_array),
                prev_control_point: prev_control_point.to_array(),
                num_total_edges: if is_internal_chop { -edges } else { edges },
            },
        );
    }

    /// Writes a 180 degree point stroke, which renders as a circle.
    fn write_circle(&mut self, resolve_level: u8, center: Point) {
        let edges = self.num_edges[resolve_level as usize];
        self.write(
            resolve_level,
            IndirectInstance {
                pts: [center.to_array(); 4],
                prev_control_point: center.to_array(),
                // Negative so the empty join before the circle gets as few edges as possible.
                num_total_edges: -edges,
            },
        );
    }

    fn finish(self) -> VertexChunk {
        debug_assert_eq!(self.cursors, self.ends, "bins were not filled exactly");
        self.instances
    }
}

/// Cursor over the entries and chop parameters recorded by [`count_pass`].
struct Replay<'a> {
    entries: std::slice::Iter<'a, ResolveEntry>,
    chop_ts: &'a [f32],
}

impl Replay<'_> {
    fn next_entry(&mut self) -> ResolveEntry {
        let entry = self.entries.next().copied();
        debug_assert!(entry.is_some(), "ran out of resolve levels");
        entry.unwrap_or(ResolveEntry::Level(0))
    }

    fn next_level(&mut self) -> u8 {
        match self.next_entry() {
            ResolveEntry::Level(level) => level,
            ResolveEntry::ChopSentinel { .. } => {
                debug_assert!(false, "expected a resolve level, found a chop");
                0
            }
        }
    }

    fn next_chop_ts(&mut self, count: usize) -> &[f32] {
        debug_assert!(self.chop_ts.len() >= count, "ran out of chop parameters");
        let (ts, rest) = self.chop_ts.split_at(count.min(self.chop_ts.len()));
        self.chop_ts = rest;
        ts
    }

    fn is_done(&self) -> bool {
        self.entries.len() == 0 && self.chop_ts.is_empty()
    }
}

/// Writes the indirect draw commands and instances of `strokes`.
///
/// `levels` must come from [`count_pass`] on the same strokes and transform. Returns
/// [`Error::AllocationFailed`] if either buffer cannot be allocated, in which case nothing should
/// be drawn.
///
/// Within a bin, instances follow path order one contour at a time. Inside a contour the order is
/// rotated: the first piece written waits until the contour is finished and its join is known,
/// so it lands after the other pieces of its contour.
pub fn write_pass(
    strokes: &[PathStroke<'_>],
    transform: &Transform,
    levels: &ResolveLevels,
    alloc: &mut impl VertexAllocator,
) -> Result<IndirectDraw> {
    let draw_indirect_count = levels.draw_indirect_count() as usize;
    if draw_indirect_count == 0 {
        return Ok(IndirectDraw::empty());
    }
    let dynamic_stroke = needs_dynamic_stroke(strokes);
    let stride = if dynamic_stroke {
        size_of::<DynamicIndirectInstance>()
    } else {
        size_of::<IndirectInstance>()
    };
    let command_stride = size_of::<DrawIndirectCommand>();
    let mut indirect = alloc
        .alloc_indirect(command_stride, draw_indirect_count)
        .ok_or(Error::AllocationFailed {
            stride: command_stride,
            count: draw_indirect_count,
        })?;
    let instance_count = levels.total_instance_count() as usize;
    let instances = alloc
        .alloc_vertices(stride, instance_count)
        .ok_or(Error::AllocationFailed {
            stride,
            count: instance_count,
        })?;

    let mut writer = BinningWriter::new(levels, &mut indirect, instances, dynamic_stroke);
    let mut replay = Replay {
        entries: levels.entries.iter(),
        chop_ts: &levels.chop_ts,
    };
    for path_stroke in strokes.iter().filter(|s| should_draw(s)) {
        let stroke = &path_stroke.stroke;
        writer.update_dynamic_stroke(stroke);
        write_path(&mut writer, &mut replay, path_stroke, transform);
    }
    debug_assert!(replay.is_done(), "resolve levels were not all consumed");
    let instances = writer.finish();
    log::debug!(
        "Wrote {instance_count} stroke instances with {draw_indirect_count} indirect draws"
    );
    Ok(IndirectDraw {
        indirect,
        instances,
        dynamic_stroke,
    })
}

fn write_path(
    writer: &mut BinningWriter,
    replay: &mut Replay<'_>,
    path_stroke: &PathStroke<'_>,
    transform: &Transform,
) {
    let stroke = &path_stroke.stroke;
    let is_round_join = stroke.join == Join::Round;
    let mut last_control_point = Point::ZERO;
    let mut has_last_control_point = false;
    // The first piece of a contour waits for the control point it is joined from.
    let mut first_piece: Option<([Point; 4], u8)> = None;

    for step in StrokeIterator::new(path_stroke.path, stroke, transform) {
        let segment = step.current;
        let pts = segment.pts;
        let mut num_chops = 0;
        // Pieces overlap by one point: piece `i` is `chops[3 * i..3 * i + 4]`.
        let mut chops = CubicChops::new();
        let mut resolve_level;
        match segment.verb {
            StrokeVerb::Circle => {
                writer.write_circle(replay.next_level(), pts[0]);
                // The next stroke is not joined to anything.
                last_control_point = pts[0];
                has_last_control_point = true;
                continue;
            }
            StrokeVerb::MoveWithinContour => {
                last_control_point = pts[0];
                has_last_control_point = true;
                continue;
            }
            StrokeVerb::ContourFinished => {
                debug_assert!(has_last_control_point);
                if let Some((first, level)) = first_piece.take() {
                    writer.write_stroke(level, &first, last_control_point, false);
                }
                has_last_control_point = false;
                continue;
            }
            StrokeVerb::Line => {
                resolve_level = if is_round_join { replay.next_level() } else { 0 };
                chops.extend_from_slice(&[pts[0], pts[0], pts[1], pts[1]]);
            }
            StrokeVerb::Quad | StrokeVerb::Conic => match replay.next_entry() {
                ResolveEntry::ChopSentinel { cusp_level, .. } => {
                    let quad = segment.quad_pts();
                    let cusp = if segment.verb == StrokeVerb::Quad {
                        eval_quad_at(&quad, find_quad_midtangent(&quad))
                    } else {
                        eval_conic_at(&quad, segment.w, find_conic_midtangent(&quad, segment.w))
                    };
                    // Two lines meeting at the cusp.
                    chops.extend_from_slice(&[
                        quad[0], quad[0], cusp, cusp, cusp, quad[2], quad[2],
                    ]);
                    num_chops = 1;
                    if let Some(cusp_level) = cusp_level {
                        writer.write_circle(cusp_level, cusp);
                    }
                    resolve_level = if is_round_join { replay.next_level() } else { 0 };
                }
                ResolveEntry::Level(level) => {
                    resolve_level = level;
                    let quad = segment.quad_pts();
                    if segment.verb == StrokeVerb::Quad {
                        chops.extend_from_slice(&quad_to_cubic(&quad));
                    } else {
                        chops.extend_from_slice(&quad);
                        chops.push(Point::new(segment.w, f32::INFINITY));
                    }
                }
            },
            StrokeVerb::Cubic => match replay.next_entry() {
                ResolveEntry::ChopSentinel { count, cusp_level } => {
                    num_chops = count as usize;
                    chops = chop_cubic_at_many(&pts, replay.next_chop_ts(num_chops));
                    if let Some(cusp_level) = cusp_level {
                        for i in 1..=num_chops {
                            writer.write_circle(cusp_level, chops[i * 3]);
                        }
                    }
                    resolve_level = replay.next_level();
                }
                ResolveEntry::Level(level) => {
                    resolve_level = level;
                    chops.extend_from_slice(&pts);
                }
            },
        }

        for (i, piece) in chops.windows(4).step_by(3).enumerate() {
            let piece = [piece[0], piece[1], piece[2], piece[3]];
            if has_last_control_point {
                writer.write_stroke(resolve_level, &piece, last_control_point, i != 0);
            } else {
                debug_assert!(first_piece.is_none());
                first_piece = Some((piece, resolve_level));
            }
            // Conics keep their weight in the last point.
            if piece[2] != piece[3] && segment.verb != StrokeVerb::Conic {
                last_control_point = piece[2];
            } else if piece[1] != piece[2] {
                last_control_point = piece[1];
            } else if piece[0] != piece[1] {
                last_control_point = piece[0];
            }
            // Otherwise every point of the piece coincides, and the previous control point stays.
            has_last_control_point = true;
            if i == num_chops {
                break;
            }
            // Chopped quadratics and conics became lines, which have no entries of their own.
            resolve_level = if segment.verb == StrokeVerb::Cubic {
                replay.next_level()
            } else {
                0
            };
        }
    }
}
