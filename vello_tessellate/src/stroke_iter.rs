// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Walks a path as a sequence of strokes, each paired with the stroke it joins to.
//!
//! Besides the path's own curves, the walk produces a few synthetic verbs:
//!
//! - [`StrokeVerb::Circle`] for round caps, and for zero-length contours with round caps.
//! - Short lines for square caps.
//! - [`StrokeVerb::MoveWithinContour`] to break the join between the end of an open contour and
//!   its beginning.
//! - [`StrokeVerb::ContourFinished`] once every stroke of a contour has been produced.
//!
//! The first stroke of every contour is held back and produced again at the end of the contour,
//! once it is known what precedes it: the closing line of a closed contour, or a cap of an open
//! one. Consumers that need a previous control point for joins can therefore defer the first
//! stroke until [`StrokeVerb::ContourFinished`].

use std::collections::VecDeque;

use peniko::kurbo::Cap;

use crate::math::{Point, Transform};
use crate::path::{Path, PathSegment, Segments};
use crate::style::StrokeStyle;

/// The kind of a [`StrokeSegment`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrokeVerb {
    Line,
    Quad,
    Conic,
    Cubic,
    /// A 180 degree point stroke centered at `pts[0]`, which renders as a circle with the
    /// diameter of the stroke width.
    Circle,
    /// Starts a new stroke at `pts[0]` that is not joined to the previous one.
    MoveWithinContour,
    ContourFinished,
}

impl StrokeVerb {
    /// Whether the verb draws something.
    pub fn is_geometric(self) -> bool {
        !matches!(self, Self::MoveWithinContour | Self::ContourFinished)
    }
}

/// One stroke of a contour.
///
/// Unused trailing points repeat the last used point, so lines are `[p0, p1, p1, p1]` and
/// quadratics are `[p0, p1, p2, p2]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrokeSegment {
    pub verb: StrokeVerb,
    pub pts: [Point; 4],
    /// Conic weight, 0 for every other verb.
    pub w: f32,
}

impl StrokeSegment {
    pub fn line(p0: Point, p1: Point) -> Self {
        Self {
            verb: StrokeVerb::Line,
            pts: [p0, p1, p1, p1],
            w: 0.,
        }
    }

    pub fn circle(center: Point) -> Self {
        Self::point(StrokeVerb::Circle, center)
    }

    pub fn move_within_contour(p: Point) -> Self {
        Self::point(StrokeVerb::MoveWithinContour, p)
    }

    fn point(verb: StrokeVerb, p: Point) -> Self {
        Self {
            verb,
            pts: [p; 4],
            w: 0.,
        }
    }

    fn contour_finished() -> Self {
        Self::point(StrokeVerb::ContourFinished, Point::ZERO)
    }

    /// Converts a drawing segment. Returns `None` for moves and closes.
    fn from_path_segment(segment: PathSegment) -> Option<Self> {
        let (verb, pts, w) = match segment {
            PathSegment::Line([p0, p1]) => (StrokeVerb::Line, [p0, p1, p1, p1], 0.),
            PathSegment::Quad([p0, p1, p2]) => (StrokeVerb::Quad, [p0, p1, p2, p2], 0.),
            PathSegment::Conic([p0, p1, p2], w) => (StrokeVerb::Conic, [p0, p1, p2, p2], w),
            PathSegment::Cubic(pts) => (StrokeVerb::Cubic, pts, 0.),
            PathSegment::Move(_) | PathSegment::Close(_) => return None,
        };
        Some(Self { verb, pts, w })
    }

    pub fn line_pts(&self) -> [Point; 2] {
        [self.pts[0], self.pts[1]]
    }

    pub fn quad_pts(&self) -> [Point; 3] {
        [self.pts[0], self.pts[1], self.pts[2]]
    }

    /// The final point of the stroke.
    pub fn end_point(&self) -> Point {
        self.pts[3]
    }

    /// Whether every point of the stroke coincides.
    fn is_degenerate(&self) -> bool {
        self.pts.iter().all(|&p| p == self.pts[0])
    }
}

/// A stroke together with the stroke that precedes it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrokeStep {
    pub prev: StrokeSegment,
    pub current: StrokeSegment,
}

/// Iterator over the [`StrokeStep`]s of a path. See the [module docs](self).
pub struct StrokeIterator<'a> {
    segments: Segments<'a>,
    stroke: StrokeStyle,
    transform: Transform,
    queue: VecDeque<StrokeSegment>,
    first_in_contour: Option<StrokeSegment>,
    last_degenerate_pt: Option<Point>,
}

impl<'a> StrokeIterator<'a> {
    pub fn new(path: &'a Path, stroke: &StrokeStyle, transform: &Transform) -> Self {
        Self {
            segments: path.segments(),
            stroke: *stroke,
            transform: *transform,
            queue: VecDeque::with_capacity(8),
            first_in_contour: None,
            last_degenerate_pt: None,
        }
    }

    fn step(&self) -> Option<StrokeStep> {
        Some(StrokeStep {
            prev: *self.queue.front()?,
            current: *self.queue.get(1)?,
        })
    }

    /// Appends the caps and the repeated first stroke of an open contour.
    ///
    /// Returns false if the contour draws nothing.
    fn finish_open_contour(&mut self) -> bool {
        let first = if let (Some(&back), Some(first)) = (self.queue.back(), self.first_in_contour)
        {
            match self.stroke.cap {
                // No caps, but the first stroke must not be joined to the end of the contour.
                Cap::Butt => self
                    .queue
                    .push_back(StrokeSegment::move_within_contour(first.pts[0])),
                // The circles also keep the ends from being joined.
                Cap::Round => {
                    self.queue.push_back(StrokeSegment::circle(back.end_point()));
                    self.queue.push_back(StrokeSegment::circle(first.pts[0]));
                }
                Cap::Square => {
                    let (ending, beginning) = self.square_cap_points(&first, &back);
                    self.queue.push_back(ending);
                    self.queue
                        .push_back(StrokeSegment::move_within_contour(beginning.pts[0]));
                    self.queue.push_back(beginning);
                }
            }
            first
        } else if let Some(pt) = self.last_degenerate_pt.take() {
            // A zero-length contour still gets caps.
            match self.stroke.cap {
                Cap::Butt => return false,
                Cap::Round => {
                    let circle = StrokeSegment::circle(pt);
                    self.queue.push_back(circle);
                    circle
                }
                Cap::Square => {
                    let Some(outset) = self.degenerate_square_outset() else {
                        return false;
                    };
                    let cap = StrokeSegment::line(pt - outset, pt + outset);
                    self.queue.push_back(cap);
                    self.queue
                        .push_back(StrokeSegment::move_within_contour(pt - outset));
                    cap
                }
            }
        } else {
            return false;
        };
        // The first stroke again, this time as the current stroke instead of the previous one.
        self.queue.push_back(first);
        self.queue.push_back(StrokeSegment::contour_finished());
        self.first_in_contour = None;
        self.last_degenerate_pt = None;
        true
    }

    /// Scales `tangent` to half the stroke width, or to half a device pixel for hairlines.
    fn cap_extent(&self, tangent: Point) -> Point {
        let len = if self.stroke.is_hairline() {
            self.transform.map_vector(tangent).length()
        } else {
            tangent.length() / self.stroke.width
        };
        if len == 0. || !len.is_finite() {
            return Point::ZERO;
        }
        tangent * (0.5 / len)
    }

    /// Returns the line of the ending cap and the line of the beginning cap.
    fn square_cap_points(
        &self,
        first: &StrokeSegment,
        back: &StrokeSegment,
    ) -> (StrokeSegment, StrokeSegment) {
        let [p0, p1, p2, p3] = back.pts;
        let last_tangent = [p3 - p2, p2 - p1, p1 - p0]
            .into_iter()
            .find(|v| !v.is_zero())
            .unwrap_or(Point::ZERO);
        let last_tangent = self.cap_extent(last_tangent);

        let [q0, q1, q2, q3] = first.pts;
        let first_tangent = [q1 - q0, q2 - q0, q3 - q0]
            .into_iter()
            .find(|v| !v.is_zero())
            .unwrap_or(Point::ZERO);
        let first_tangent = -self.cap_extent(first_tangent);

        (
            StrokeSegment::line(p3, p3 + last_tangent),
            StrokeSegment::line(q0 + first_tangent, q0),
        )
    }

    /// Returns the half extent of a square cap on a zero-length contour, which has no direction
    /// of its own and is drawn axis aligned in device space.
    fn degenerate_square_outset(&self) -> Option<Point> {
        if !self.stroke.is_hairline() {
            return Some(Point::new(self.stroke.width * 0.5, 0.));
        }
        // Half a device pixel along the device x axis, mapped back to local space.
        let inv = self.transform.inverse_linear()?;
        Some(Point::new(inv[0], inv[1]) * 0.5)
    }
}

impl Iterator for StrokeIterator<'_> {
    type Item = StrokeStep;

    fn next(&mut self) -> Option<StrokeStep> {
        if !self.queue.is_empty() {
            self.queue.pop_front();
            if self.queue.len() >= 2 {
                return self.step();
            }
            if self
                .queue
                .front()
                .is_some_and(|s| s.verb == StrokeVerb::ContourFinished)
            {
                // The next contour must not see it as a previous stroke.
                self.queue.clear();
            }
        }
        while let Some(segment) = self.segments.next() {
            match segment {
                PathSegment::Move(_) => {
                    if self.finish_open_contour() {
                        return self.step();
                    }
                }
                PathSegment::Close([current, _]) => {
                    let Some(first) = self.first_in_contour.filter(|_| !self.queue.is_empty())
                    else {
                        self.last_degenerate_pt = Some(current);
                        continue;
                    };
                    if current != first.pts[0] {
                        self.queue
                            .push_back(StrokeSegment::line(current, first.pts[0]));
                    }
                    self.queue.push_back(first);
                    self.queue.push_back(StrokeSegment::contour_finished());
                    self.first_in_contour = None;
                    self.last_degenerate_pt = None;
                    return self.step();
                }
                _ => {
                    let Some(stroke) = StrokeSegment::from_path_segment(segment) else {
                        continue;
                    };
                    if stroke.is_degenerate() {
                        self.last_degenerate_pt = Some(stroke.pts[0]);
                        continue;
                    }
                    self.queue.push_back(stroke);
                    if self.queue.len() == 1 {
                        // Held back until the end, when it is known what it joins to.
                        self.first_in_contour = Some(stroke);
                        continue;
                    }
                    return self.step();
                }
            }
        }
        if self.finish_open_contour() {
            return self.step();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{StrokeIterator, StrokeSegment, StrokeVerb};
    use crate::math::{Point, Transform};
    use crate::path::Path;
    use crate::style::StrokeStyle;
    use peniko::kurbo::Cap;

    fn currents(path: &Path, stroke: StrokeStyle) -> Vec<StrokeSegment> {
        StrokeIterator::new(path, &stroke, &Transform::IDENTITY)
            .map(|step| step.current)
            .collect()
    }

    fn verbs(segments: &[StrokeSegment]) -> Vec<StrokeVerb> {
        segments.iter().map(|s| s.verb).collect()
    }

    fn open_polyline() -> Path {
        let mut b = Path::builder();
        b.move_to((0.0, 0.0));
        b.line_to((10.0, 0.0));
        b.line_to((10.0, 10.0));
        b.finish()
    }

    #[test]
    fn open_contour_with_butt_caps() {
        let path = open_polyline();
        let steps: Vec<_> =
            StrokeIterator::new(&path, &StrokeStyle::new(2.0), &Transform::IDENTITY).collect();
        let first = StrokeSegment::line(Point::ZERO, Point::new(10.0, 0.0));
        let second = StrokeSegment::line(Point::new(10.0, 0.0), Point::new(10.0, 10.0));
        assert_eq!(
            verbs(&steps.iter().map(|s| s.current).collect::<Vec<_>>()),
            [
                StrokeVerb::Line,
                StrokeVerb::MoveWithinContour,
                StrokeVerb::Line,
                StrokeVerb::ContourFinished
            ]
        );
        assert_eq!(steps[0].prev, first);
        assert_eq!(steps[0].current, second);
        // The first stroke comes again after the move, so it is not joined to the last one.
        assert_eq!(steps[2].prev, StrokeSegment::move_within_contour(Point::ZERO));
        assert_eq!(steps[2].current, first);
    }

    #[test]
    fn closed_contour_joins_first_stroke_to_closing_line() {
        let mut b = Path::builder();
        b.move_to((0.0, 0.0));
        b.line_to((10.0, 0.0));
        b.line_to((10.0, 10.0));
        b.close();
        let path = b.finish();
        let steps: Vec<_> =
            StrokeIterator::new(&path, &StrokeStyle::new(2.0), &Transform::IDENTITY).collect();
        let closing = StrokeSegment::line(Point::new(10.0, 10.0), Point::ZERO);
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[1].current, closing);
        assert_eq!(steps[2].prev, closing);
        assert_eq!(
            steps[2].current,
            StrokeSegment::line(Point::ZERO, Point::new(10.0, 0.0))
        );
        assert_eq!(steps[3].current.verb, StrokeVerb::ContourFinished);
    }

    #[test]
    fn close_at_start_point_adds_no_line() {
        let mut b = Path::builder();
        b.move_to((0.0, 0.0));
        b.quad_to((10.0, 0.0), (10.0, 10.0));
        b.line_to((0.0, 0.0));
        b.close();
        let path = b.finish();
        let segments = currents(&path, StrokeStyle::new(1.0));
        assert_eq!(
            verbs(&segments),
            [
                StrokeVerb::Line,
                StrokeVerb::Quad,
                StrokeVerb::ContourFinished
            ]
        );
    }

    #[test]
    fn round_caps_are_circles() {
        let path = open_polyline();
        let segments = currents(&path, StrokeStyle::new(2.0).with_cap(Cap::Round));
        assert_eq!(
            verbs(&segments),
            [
                StrokeVerb::Line,
                StrokeVerb::Circle,
                StrokeVerb::Circle,
                StrokeVerb::Line,
                StrokeVerb::ContourFinished
            ]
        );
        assert_eq!(segments[1].pts[0], Point::new(10.0, 10.0));
        assert_eq!(segments[2].pts[0], Point::ZERO);
    }

    #[test]
    fn square_caps_extend_by_half_width() {
        let mut b = Path::builder();
        b.move_to((0.0, 0.0));
        b.line_to((10.0, 0.0));
        let path = b.finish();
        let segments = currents(&path, StrokeStyle::new(4.0).with_cap(Cap::Square));
        assert_eq!(
            verbs(&segments),
            [
                StrokeVerb::Line,
                StrokeVerb::MoveWithinContour,
                StrokeVerb::Line,
                StrokeVerb::Line,
                StrokeVerb::ContourFinished
            ]
        );
        assert_eq!(
            segments[0],
            StrokeSegment::line(Point::new(10.0, 0.0), Point::new(12.0, 0.0))
        );
        assert_eq!(segments[1].pts[0], Point::new(-2.0, 0.0));
        assert_eq!(
            segments[2],
            StrokeSegment::line(Point::new(-2.0, 0.0), Point::ZERO)
        );
    }

    #[test]
    fn zero_length_contours() {
        let mut b = Path::builder();
        b.move_to((5.0, 5.0));
        b.line_to((5.0, 5.0));
        let path = b.finish();

        assert!(currents(&path, StrokeStyle::new(2.0)).is_empty());

        let round = currents(&path, StrokeStyle::new(2.0).with_cap(Cap::Round));
        assert_eq!(
            verbs(&round),
            [StrokeVerb::Circle, StrokeVerb::ContourFinished]
        );
        assert_eq!(round[0].pts[0], Point::new(5.0, 5.0));

        let square = currents(&path, StrokeStyle::new(2.0).with_cap(Cap::Square));
        assert_eq!(
            verbs(&square),
            [
                StrokeVerb::MoveWithinContour,
                StrokeVerb::Line,
                StrokeVerb::ContourFinished
            ]
        );
        assert_eq!(
            square[1],
            StrokeSegment::line(Point::new(4.0, 5.0), Point::new(6.0, 5.0))
        );
    }

    #[test]
    fn move_then_close_is_a_dot() {
        let mut b = Path::builder();
        b.move_to((1.0, 2.0));
        b.close();
        let path = b.finish();
        let round = currents(&path, StrokeStyle::new(2.0).with_cap(Cap::Round));
        assert_eq!(
            verbs(&round),
            [StrokeVerb::Circle, StrokeVerb::ContourFinished]
        );
    }

    #[test]
    fn hairline_square_cap_is_half_a_device_pixel() {
        let mut b = Path::builder();
        b.move_to((0.0, 0.0));
        b.line_to((0.0, 0.0));
        let path = b.finish();
        let stroke = StrokeStyle::hairline().with_cap(Cap::Square);
        let steps: Vec<_> = StrokeIterator::new(&path, &stroke, &Transform::scale(2.0)).collect();
        let cap = steps[1].current;
        assert_eq!(cap.verb, StrokeVerb::Line);
        assert_eq!(cap.pts[0], Point::new(-0.25, 0.0));
        assert_eq!(cap.pts[1], Point::new(0.25, 0.0));
    }

    #[test]
    fn move_only_paths_produce_nothing() {
        let mut b = Path::builder();
        b.move_to((0.0, 0.0));
        b.move_to((3.0, 3.0));
        b.line_to((3.0, 4.0));
        b.move_to((9.0, 9.0));
        let with_line = b.finish();
        assert_eq!(currents(&with_line, StrokeStyle::new(1.0)).len(), 3);
        assert!(currents(&Path::new(), StrokeStyle::new(1.0)).is_empty());
    }

    #[test]
    fn contours_do_not_leak_into_each_other() {
        let mut b = Path::builder();
        b.move_to((0.0, 0.0));
        b.line_to((1.0, 0.0));
        b.close();
        b.move_to((5.0, 5.0));
        b.line_to((6.0, 5.0));
        let path = b.finish();
        let steps: Vec<_> =
            StrokeIterator::new(&path, &StrokeStyle::new(1.0), &Transform::IDENTITY).collect();
        let finished = steps
            .iter()
            .position(|s| s.current.verb == StrokeVerb::ContourFinished)
            .unwrap();
        assert!(
            steps[finished + 1..]
                .iter()
                .all(|s| s.prev.verb != StrokeVerb::ContourFinished)
        );
        assert_eq!(steps.last().unwrap().current.verb, StrokeVerb::ContourFinished);
    }
}
