// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stroke styles.

use bytemuck::{Pod, Zeroable};
use peniko::kurbo::{Cap, Join, Stroke};
use static_assertions::const_assert_eq;

use crate::path::Path;

/// Parameters of a stroke.
///
/// A width of exactly zero is a hairline: it is drawn about one device pixel wide regardless of
/// the view transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrokeStyle {
    pub width: f32,
    pub join: Join,
    pub miter_limit: f32,
    pub cap: Cap,
}

impl StrokeStyle {
    /// Creates a stroke with butt caps and miter joins.
    pub fn new(width: f32) -> Self {
        Self {
            width,
            join: Join::Miter,
            miter_limit: 4.,
            cap: Cap::Butt,
        }
    }

    pub fn hairline() -> Self {
        Self::new(0.)
    }

    pub fn with_join(mut self, join: Join) -> Self {
        self.join = join;
        self
    }

    pub fn with_cap(mut self, cap: Cap) -> Self {
        self.cap = cap;
        self
    }

    pub fn with_miter_limit(mut self, limit: f32) -> Self {
        self.miter_limit = limit;
        self
    }

    pub fn is_hairline(&self) -> bool {
        self.width == 0.
    }

    /// The value the shaders use to pick a join: the miter limit for miter joins, -1 for round
    /// joins and 0 for bevel joins.
    pub fn join_type(&self) -> f32 {
        match self.join {
            Join::Miter => self.miter_limit,
            Join::Round => -1.,
            Join::Bevel => 0.,
        }
    }
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self::new(1.)
    }
}

impl From<&Stroke> for StrokeStyle {
    /// Uses the start cap for both ends. Dashes are ignored.
    fn from(stroke: &Stroke) -> Self {
        Self {
            width: stroke.width as f32,
            join: stroke.join,
            miter_limit: stroke.miter_limit as f32,
            cap: stroke.start_cap,
        }
    }
}

/// A path and the stroke to draw it with.
#[derive(Clone, Copy, Debug)]
pub struct PathStroke<'a> {
    pub path: &'a Path,
    pub stroke: StrokeStyle,
}

impl<'a> PathStroke<'a> {
    pub fn new(path: &'a Path, stroke: StrokeStyle) -> Self {
        Self { path, stroke }
    }

    /// Whether the path and the stroke width are finite.
    pub fn is_finite(&self) -> bool {
        self.path.is_finite() && self.stroke.width.is_finite()
    }
}

/// Returns whether a stroke is drawn. Strokes that are not finite are skipped with a warning, the
/// same way by every writer.
pub(crate) fn should_draw(path_stroke: &PathStroke<'_>) -> bool {
    if !path_stroke.is_finite() {
        log::warn!("A stroked path with non-finite values was skipped");
        return false;
    }
    true
}

/// Stroke parameters carried by every instance when the paths of a draw use different strokes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct DynamicStroke {
    /// Half the stroke width.
    pub radius: f32,
    /// See [`StrokeStyle::join_type`].
    pub join_type: f32,
}

const_assert_eq!(size_of::<DynamicStroke>(), 8);

impl DynamicStroke {
    pub fn new(stroke: &StrokeStyle) -> Self {
        Self {
            radius: stroke.width * 0.5,
            join_type: stroke.join_type(),
        }
    }
}

/// Whether the strokes of a draw differ, so each instance needs a [`DynamicStroke`].
pub fn needs_dynamic_stroke(strokes: &[PathStroke<'_>]) -> bool {
    strokes.windows(2).any(|w| w[0].stroke != w[1].stroke)
}

#[cfg(test)]
mod tests {
    use super::{DynamicStroke, PathStroke, StrokeStyle, needs_dynamic_stroke};
    use crate::path::Path;
    use peniko::kurbo::{Cap, Join, Stroke};

    #[test]
    fn from_kurbo_stroke() {
        let stroke = Stroke::new(3.0)
            .with_join(Join::Round)
            .with_caps(Cap::Square)
            .with_miter_limit(2.0);
        let style = StrokeStyle::from(&stroke);
        assert_eq!(style.width, 3.0);
        assert_eq!(style.join, Join::Round);
        assert_eq!(style.cap, Cap::Square);
        assert_eq!(style.miter_limit, 2.0);
        assert!(!style.is_hairline());
        assert!(StrokeStyle::hairline().is_hairline());
    }

    #[test]
    fn join_type_encoding() {
        let style = StrokeStyle::new(1.).with_miter_limit(7.);
        assert_eq!(style.join_type(), 7.);
        assert_eq!(style.with_join(Join::Round).join_type(), -1.);
        assert_eq!(style.with_join(Join::Bevel).join_type(), 0.);
    }

    #[test]
    fn dynamic_stroke_only_when_strokes_differ() {
        let path = Path::new();
        let thin = StrokeStyle::new(2.);
        let same = [PathStroke::new(&path, thin), PathStroke::new(&path, thin)];
        assert!(!needs_dynamic_stroke(&same));
        assert!(!needs_dynamic_stroke(&same[..1]));
        let mixed = [
            PathStroke::new(&path, thin),
            PathStroke::new(&path, thin.with_join(Join::Round)),
        ];
        assert!(needs_dynamic_stroke(&mixed));
        let dynamic = DynamicStroke::new(&mixed[1].stroke);
        assert_eq!(dynamic.radius, 1.);
        assert_eq!(dynamic.join_type, -1.);
    }
}
