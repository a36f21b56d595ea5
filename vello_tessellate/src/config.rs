// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tessellation configuration.

use peniko::kurbo::Rect;

use crate::{Error, MAX_RESOLVE_LEVEL, Result};

/// Knobs that control how finely curves are tessellated, plus the relevant device limits.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TessellationConfig {
    /// Parametric precision per unit of view scale.
    ///
    /// This is an intolerance: a value of 4 keeps tessellated curves within a quarter pixel of
    /// the true curve.
    pub precision: f32,
    /// Maximum number of segments a hardware tessellation patch can produce.
    pub max_tessellation_segments: u32,
    /// The fixed-count writer chops curves to at most `2^max_parametric_segments_log2`
    /// parametric segments.
    pub max_parametric_segments_log2: u8,
    /// Whether the device supports vertex IDs.
    ///
    /// Without them, vertex data has to be supplied explicitly, which limits the fixed edge count
    /// to [`Self::MAX_EDGES_NO_VERTEX_IDS`].
    pub vertex_id_support: bool,
    /// Device-space bounds used to skip chopping curves that are not visible.
    pub cull_bounds: Option<Rect>,
}

impl TessellationConfig {
    /// Upper bound on the fixed edge count when the device has no vertex IDs.
    pub const MAX_EDGES_NO_VERTEX_IDS: u32 = 1024;

    /// Checks that every value is in range.
    pub fn validate(&self) -> Result<()> {
        if !(self.precision.is_finite() && self.precision > 0.) {
            return Err(Error::InvalidConfig("precision must be finite and positive"));
        }
        if self.max_tessellation_segments == 0 {
            return Err(Error::InvalidConfig(
                "max_tessellation_segments must be at least 1",
            ));
        }
        if self.max_parametric_segments_log2 > MAX_RESOLVE_LEVEL {
            return Err(Error::InvalidConfig(
                "max_parametric_segments_log2 exceeds the maximum resolve level",
            ));
        }
        if let Some(bounds) = self.cull_bounds {
            if !(bounds.is_finite() && bounds.x0 <= bounds.x1 && bounds.y0 <= bounds.y1) {
                return Err(Error::InvalidConfig("cull_bounds must be a finite, ordered rect"));
            }
        }
        Ok(())
    }

    /// Maximum number of parametric segments per fixed-count instance.
    ///
    /// Out of range exponents are clamped to [`MAX_RESOLVE_LEVEL`].
    pub fn max_parametric_segments(&self) -> f32 {
        (1_u32 << self.max_parametric_segments_log2.min(MAX_RESOLVE_LEVEL)) as f32
    }
}

impl Default for TessellationConfig {
    fn default() -> Self {
        Self {
            precision: 4.,
            max_tessellation_segments: 64,
            max_parametric_segments_log2: 5,
            vertex_id_support: true,
            cull_bounds: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TessellationConfig;
    use crate::Error;
    use peniko::kurbo::Rect;

    #[test]
    fn default_is_valid() {
        let config = TessellationConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.max_parametric_segments(), 32.);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let bad_precision = TessellationConfig {
            precision: 0.,
            ..Default::default()
        };
        assert!(matches!(
            bad_precision.validate(),
            Err(Error::InvalidConfig(_))
        ));
        let bad_segments = TessellationConfig {
            max_tessellation_segments: 0,
            ..Default::default()
        };
        assert!(bad_segments.validate().is_err());
        let bad_log2 = TessellationConfig {
            max_parametric_segments_log2: 16,
            ..Default::default()
        };
        assert!(bad_log2.validate().is_err());
        let huge_log2 = TessellationConfig {
            max_parametric_segments_log2: 40,
            ..Default::default()
        };
        assert!(huge_log2.validate().is_err());
        assert_eq!(huge_log2.max_parametric_segments(), 32768.);
        let bad_bounds = TessellationConfig {
            cull_bounds: Some(Rect::new(10., 0., 0., 10.)),
            ..Default::default()
        };
        assert!(bad_bounds.validate().is_err());
    }
}
