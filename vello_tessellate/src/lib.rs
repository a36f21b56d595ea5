// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Adaptive curve tessellation for GPU stroking.
//!
//! This crate decides how finely each curve of a stroked path has to be subdivided to look
//! smooth after the view transform is applied, and packs the result into GPU-ready
//! instance/patch records.
//!
//! # Contents
//!
//! - [`wangs_formula`]: closed-form segment-count estimates for quadratics, cubics and conics.
//! - [`cull`]: conservative visibility rejection of points and curves.
//! - [`geometry`]: chopping, mid-tangents, rotation measurement and cusp detection.
//! - [`indirect`]: the two-pass resolve-level binning tessellator
//!   ([`count_pass`](indirect::count_pass) then [`write_pass`](indirect::write_pass)).
//! - [`hardware`]: the patch writer for backends with native tessellation shaders.
//! - [`fixed_count`]: the fixed-count instanced stroke writer and its edge count.
//!
//! Output records are [`bytemuck::Pod`] so they can be uploaded as-is. Memory comes from a
//! caller-provided [`VertexAllocator`]; an allocation failure stops emission for the current
//! draw and is reported as [`Error::AllocationFailed`].
//!
//! # Usage
//!
//! ```
//! use vello_tessellate::kurbo::{Affine, BezPath, Stroke};
//! use vello_tessellate::{BumpAllocator, Level, Path, PathStroke, StrokeStyle, TessellationConfig, Transform};
//! use vello_tessellate::indirect::{count_pass, write_pass};
//!
//! let mut bez = BezPath::new();
//! bez.move_to((10.0, 10.0));
//! bez.curve_to((60.0, 0.0), (0.0, 60.0), (50.0, 50.0));
//! let path = Path::from(&bez);
//! let strokes = [PathStroke::new(&path, StrokeStyle::from(&Stroke::new(4.0)))];
//! let transform = Transform::from_kurbo(&Affine::scale(2.0));
//! let config = TessellationConfig::default();
//!
//! let levels = count_pass(Level::fallback(), &strokes, &transform, &config).unwrap();
//! let mut alloc = BumpAllocator::new(1 << 20);
//! let draw = write_pass(&strokes, &transform, &levels, &mut alloc).unwrap();
//! assert_eq!(draw.instance_count(), levels.total_instance_count());
//! ```

// LINEBENDER LINT SET - lib.rs - v3
// See https://linebender.org/wiki/canonical-lints/
// These lints shouldn't apply to examples or tests.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
// These lints shouldn't apply to examples.
#![warn(clippy::print_stdout, clippy::print_stderr)]
// Targeting e.g. 32-bit means structs containing usize can give false positives for 64-bit.
#![cfg_attr(target_pointer_width = "64", warn(clippy::trivially_copy_pass_by_ref))]
// END LINEBENDER LINT SET
#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]
#![allow(
    clippy::cast_possible_truncation,
    reason = "Resolve levels, edge counts and chop counts are small by construction, and the \
f64 to f32 conversions only lose precision that the GPU never had."
)]

pub mod buffer;
pub mod config;
pub mod cull;
pub mod fixed_count;
pub mod geometry;
pub mod hardware;
pub mod indirect;
pub mod math;
pub mod path;
mod simd;
pub mod stroke_iter;
pub mod style;
pub mod tolerances;
pub mod wangs_formula;

pub use fearless_simd::Level;
pub use peniko;
pub use peniko::kurbo;

pub use buffer::{BumpAllocator, VertexAllocator, VertexChunk};
pub use config::TessellationConfig;
pub use cull::CullTest;
pub use math::{Point, Transform};
pub use path::{Path, PathBuilder, PathSegment, PathVerb};
pub use style::{PathStroke, StrokeStyle};

use thiserror::Error;

/// The largest resolve level any stroke instance can have.
///
/// A resolve level of `n` means the stroke is drawn with `2^n` line segments.
pub const MAX_RESOLVE_LEVEL: u8 = 15;

/// Errors that can occur while tessellating.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The vertex allocator could not provide the requested space.
    ///
    /// Nothing after the failed allocation was written, and the draw should be skipped.
    #[error("Couldn't allocate {count} records of {stride} bytes")]
    AllocationFailed {
        /// Size of each requested record in bytes.
        stride: usize,
        /// Number of requested records.
        count: usize,
    },
    /// A configuration value is out of range.
    #[error("Invalid tessellation config: {0}")]
    InvalidConfig(&'static str),
}

/// A specialized `Result` type for tessellation operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
