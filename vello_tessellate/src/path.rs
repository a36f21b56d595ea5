// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Paths made of lines, quadratics, conics and cubics.

use peniko::kurbo::{BezPath, PathEl};

use crate::math::Point;

/// A path verb.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathVerb {
    /// Starts a new contour. Carries one point.
    Move,
    /// Carries one point.
    Line,
    /// Carries two points.
    Quad,
    /// Carries two points and a weight.
    Conic,
    /// Carries three points.
    Cubic,
    /// Returns to the start of the contour. Carries no points.
    Close,
}

impl PathVerb {
    /// Number of points stored for this verb.
    pub fn num_points(self) -> usize {
        match self {
            Self::Move | Self::Line => 1,
            Self::Quad | Self::Conic => 2,
            Self::Cubic => 3,
            Self::Close => 0,
        }
    }
}

/// An immutable path.
///
/// Every contour starts with a [`PathVerb::Move`]. The segments of the path, with the implied
/// start points filled in, are available through [`Path::segments`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Path {
    verbs: Vec<PathVerb>,
    points: Vec<Point>,
    weights: Vec<f32>,
}

impl Path {
    /// Creates an empty path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts building a path.
    pub fn builder() -> PathBuilder {
        PathBuilder::new()
    }

    pub fn verbs(&self) -> &[PathVerb] {
        &self.verbs
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn is_empty(&self) -> bool {
        self.verbs.is_empty()
    }

    /// Returns true if all points and conic weights are finite.
    pub fn is_finite(&self) -> bool {
        self.points.iter().all(|p| p.is_finite()) && self.weights.iter().all(|w| w.is_finite())
    }

    /// Iterates over the segments of the path.
    pub fn segments(&self) -> Segments<'_> {
        Segments {
            path: self,
            verb_ix: 0,
            point_ix: 0,
            weight_ix: 0,
            start: Point::ZERO,
            last: Point::ZERO,
        }
    }
}

impl From<&BezPath> for Path {
    fn from(path: &BezPath) -> Self {
        let mut builder = PathBuilder::new();
        for el in path.elements() {
            match *el {
                PathEl::MoveTo(p) => builder.move_to(Point::from_kurbo(p)),
                PathEl::LineTo(p) => builder.line_to(Point::from_kurbo(p)),
                PathEl::QuadTo(p1, p2) => {
                    builder.quad_to(Point::from_kurbo(p1), Point::from_kurbo(p2));
                }
                PathEl::CurveTo(p1, p2, p3) => builder.cubic_to(
                    Point::from_kurbo(p1),
                    Point::from_kurbo(p2),
                    Point::from_kurbo(p3),
                ),
                PathEl::ClosePath => builder.close(),
            }
        }
        builder.finish()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum BuilderState {
    /// No contour is open. The next drawing verb injects a move.
    Start,
    MoveTo,
    NonemptyContour,
}

/// Builds a [`Path`].
///
/// Drawing without a preceding move starts a contour at the previous contour's start point
/// (or the origin). Consecutive moves collapse into the last one.
pub struct PathBuilder {
    path: Path,
    state: BuilderState,
    contour_start: Point,
}

impl Default for PathBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PathBuilder {
    pub fn new() -> Self {
        Self {
            path: Path::new(),
            state: BuilderState::Start,
            contour_start: Point::ZERO,
        }
    }

    /// Starts a new contour at `p`.
    pub fn move_to(&mut self, p: impl Into<Point>) {
        let p = p.into();
        if self.state == BuilderState::MoveTo {
            if let Some(last) = self.path.points.last_mut() {
                *last = p;
            }
        } else {
            self.path.verbs.push(PathVerb::Move);
            self.path.points.push(p);
        }
        self.contour_start = p;
        self.state = BuilderState::MoveTo;
    }

    pub fn line_to(&mut self, p: impl Into<Point>) {
        self.ensure_move();
        self.path.verbs.push(PathVerb::Line);
        self.path.points.push(p.into());
    }

    pub fn quad_to(&mut self, p1: impl Into<Point>, p2: impl Into<Point>) {
        self.ensure_move();
        self.path.verbs.push(PathVerb::Quad);
        self.path.points.extend([p1.into(), p2.into()]);
    }

    /// Adds a conic section with weight `w`.
    ///
    /// Non-positive weights degrade to a line and a weight of exactly 1 is stored as a quadratic.
    /// An infinite weight is the limit case of two lines through the control point.
    pub fn conic_to(&mut self, p1: impl Into<Point>, p2: impl Into<Point>, w: f32) {
        let (p1, p2) = (p1.into(), p2.into());
        if w.is_nan() || w <= 0. {
            self.line_to(p2);
        } else if w == f32::INFINITY {
            self.line_to(p1);
            self.line_to(p2);
        } else if w == 1. {
            self.quad_to(p1, p2);
        } else {
            self.ensure_move();
            self.path.verbs.push(PathVerb::Conic);
            self.path.points.extend([p1, p2]);
            self.path.weights.push(w);
        }
    }

    pub fn cubic_to(&mut self, p1: impl Into<Point>, p2: impl Into<Point>, p3: impl Into<Point>) {
        self.ensure_move();
        self.path.verbs.push(PathVerb::Cubic);
        self.path.points.extend([p1.into(), p2.into(), p3.into()]);
    }

    /// Closes the current contour. Does nothing if no contour is open.
    pub fn close(&mut self) {
        if self.state != BuilderState::Start {
            self.path.verbs.push(PathVerb::Close);
            self.state = BuilderState::Start;
        }
    }

    /// Finishes building, dropping a trailing move that has no segments.
    pub fn finish(mut self) -> Path {
        if self.state == BuilderState::MoveTo {
            self.path.verbs.pop();
            self.path.points.pop();
        }
        self.path
    }

    fn ensure_move(&mut self) {
        if self.state == BuilderState::Start {
            self.path.verbs.push(PathVerb::Move);
            self.path.points.push(self.contour_start);
        }
        self.state = BuilderState::NonemptyContour;
    }
}

/// A path segment with its start point filled in.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PathSegment {
    Move(Point),
    Line([Point; 2]),
    Quad([Point; 3]),
    Conic([Point; 3], f32),
    Cubic([Point; 4]),
    /// The current point, then the contour's start point.
    Close([Point; 2]),
}

/// Iterator over [`PathSegment`]s. See [`Path::segments`].
#[derive(Clone)]
pub struct Segments<'a> {
    path: &'a Path,
    verb_ix: usize,
    point_ix: usize,
    weight_ix: usize,
    start: Point,
    last: Point,
}

impl Iterator for Segments<'_> {
    type Item = PathSegment;

    fn next(&mut self) -> Option<PathSegment> {
        let verb = *self.path.verbs.get(self.verb_ix)?;
        self.verb_ix += 1;
        let n = verb.num_points();
        let pts = self.path.points.get(self.point_ix..self.point_ix + n)?;
        self.point_ix += n;
        let p0 = self.last;
        let segment = match verb {
            PathVerb::Move => {
                self.start = pts[0];
                PathSegment::Move(pts[0])
            }
            PathVerb::Line => PathSegment::Line([p0, pts[0]]),
            PathVerb::Quad => PathSegment::Quad([p0, pts[0], pts[1]]),
            PathVerb::Conic => {
                let w = *self.path.weights.get(self.weight_ix)?;
                self.weight_ix += 1;
                PathSegment::Conic([p0, pts[0], pts[1]], w)
            }
            PathVerb::Cubic => PathSegment::Cubic([p0, pts[0], pts[1], pts[2]]),
            PathVerb::Close => PathSegment::Close([p0, self.start]),
        };
        self.last = match verb {
            PathVerb::Close => self.start,
            _ => pts.last().copied().unwrap_or(self.last),
        };
        Some(segment)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.path.verbs.len() - self.verb_ix;
        (remaining, Some(remaining))
    }
}
