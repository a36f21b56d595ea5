// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Conservative visibility tests for points and curves.

use peniko::kurbo::Rect;

use crate::math::{Point, Transform};

/// Tests whether local-space points and curves can be visible inside device-space bounds.
///
/// The transform and bounds are packed into 4-lane vectors laid out as `[x, y, -x, -y]`, so the
/// four half-plane tests collapse into a single lane-wise compare. The bounds form an open
/// rectangle: a point exactly on an edge is not visible.
///
/// Curves are tested by the bounding box of their control points, which contains the curve. A
/// visible curve is never reported invisible, though an invisible curve may be reported visible.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CullTest {
    mat_x: [f32; 4],
    mat_y: [f32; 4],
    /// The bounds with the translation subtracted, in the same lane layout.
    bounds: [f32; 4],
}

impl CullTest {
    pub fn new(dev_cull_bounds: Rect, transform: &Transform) -> Self {
        let [a, b, c, d] = transform.matrix;
        let [tx, ty] = transform.translation;
        Self {
            mat_x: [a, b, -a, -b],
            mat_y: [c, d, -c, -d],
            bounds: [
                dev_cull_bounds.x0 as f32 - tx,
                dev_cull_bounds.y0 as f32 - ty,
                tx - dev_cull_bounds.x1 as f32,
                ty - dev_cull_bounds.y1 as f32,
            ],
        }
    }

    /// Maps `p` to `[X, Y, -X, -Y]`, where `(X, Y)` is the device position minus the translation.
    #[inline(always)]
    fn map(&self, p: Point) -> [f32; 4] {
        std::array::from_fn(|i| self.mat_x[i] * p.x + self.mat_y[i] * p.y)
    }

    #[inline(always)]
    fn inside(&self, dev: [f32; 4]) -> bool {
        self.bounds.iter().zip(dev).all(|(&bound, d)| bound < d)
    }

    pub fn is_visible(&self, p: Point) -> bool {
        self.inside(self.map(p))
    }

    /// Tests the device-space bounding box of `pts` against the bounds.
    ///
    /// The lane-wise max of `[X, Y, -X, -Y]` over all points is `[max X, max Y, -min X, -min Y]`.
    pub fn are_visible(&self, pts: &[Point]) -> bool {
        let Some((&first, rest)) = pts.split_first() else {
            return false;
        };
        let mut dev_max = self.map(first);
        for &p in rest {
            for (max, d) in dev_max.iter_mut().zip(self.map(p)) {
                *max = max.max(d);
            }
        }
        self.inside(dev_max)
    }
}
