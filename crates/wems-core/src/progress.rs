// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Linear progress remapping.
//!
//! Adapters report progress on their own local scale. The lifecycle manager
//! assigns each adapter (and each workflow step) a contiguous slice of the
//! job's global 0-100 range and remaps local values into it.

use serde::{Deserialize, Serialize};

/// A closed progress interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressRange {
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
}

impl ProgressRange {
    /// The full percentage scale.
    pub const FULL: ProgressRange = ProgressRange {
        min: 0.0,
        max: 100.0,
    };

    /// Create a new range.
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// The sub-range covering `[from, to]` of this range, where `from` and
    /// `to` are expressed on the 0-100 scale.
    pub fn slice(&self, from: f64, to: f64) -> ProgressRange {
        ProgressRange {
            min: remap(from, ProgressRange::FULL, *self),
            max: remap(to, ProgressRange::FULL, *self),
        }
    }

    /// Remap a 0-100 local value into this range.
    pub fn scale(&self, local: f64) -> f64 {
        remap(local, ProgressRange::FULL, *self)
    }
}

/// Linearly rescale `value` from `local` into `global`, clamping to `global`.
///
/// A degenerate local range maps everything below its bound to
/// `global.min` and everything at or above it to `global.max`.
pub fn remap(value: f64, local: ProgressRange, global: ProgressRange) -> f64 {
    let (lo, hi) = if global.min <= global.max {
        (global.min, global.max)
    } else {
        (global.max, global.min)
    };

    let span = local.max - local.min;
    if span == 0.0 || !span.is_finite() {
        return if value >= local.max { global.max } else { global.min };
    }
    if value.is_nan() {
        return global.min;
    }
    if value <= local.min {
        return global.min;
    }
    if value >= local.max {
        return global.max;
    }

    let scaled = global.min + (value - local.min) / span * (global.max - global.min);
    scaled.clamp(lo, hi)
}

/// Remap and round down to an integer percentage.
pub fn remap_percent(value: f64, local: ProgressRange, global: ProgressRange) -> u8 {
    remap(value, local, global).floor().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: ProgressRange = ProgressRange::new(0.0, 100.0);
    const GLOBAL: ProgressRange = ProgressRange::new(10.0, 90.0);

    #[test]
    fn test_endpoints_map_exactly() {
        assert_eq!(remap(LOCAL.min, LOCAL, GLOBAL), GLOBAL.min);
        assert_eq!(remap(LOCAL.max, LOCAL, GLOBAL), GLOBAL.max);

        let odd_local = ProgressRange::new(3.0, 7.0);
        let odd_global = ProgressRange::new(33.3, 41.7);
        assert_eq!(remap(3.0, odd_local, odd_global), 33.3);
        assert_eq!(remap(7.0, odd_local, odd_global), 41.7);
    }

    #[test]
    fn test_linear_midpoint() {
        assert_eq!(remap(50.0, LOCAL, GLOBAL), 50.0);
        assert_eq!(remap(25.0, LOCAL, GLOBAL), 30.0);
    }

    #[test]
    fn test_out_of_range_clamps() {
        assert_eq!(remap(-20.0, LOCAL, GLOBAL), 10.0);
        assert_eq!(remap(250.0, LOCAL, GLOBAL), 90.0);
        assert_eq!(remap(f64::NAN, LOCAL, GLOBAL), 10.0);
    }

    #[test]
    fn test_degenerate_local_range() {
        let point = ProgressRange::new(5.0, 5.0);
        assert_eq!(remap(4.0, point, GLOBAL), 10.0);
        assert_eq!(remap(5.0, point, GLOBAL), 90.0);
    }

    #[test]
    fn test_monotonic() {
        let mut last = f64::MIN;
        for v in -10..=110 {
            let mapped = remap(v as f64, LOCAL, GLOBAL);
            assert!(mapped >= last);
            last = mapped;
        }
    }

    #[test]
    fn test_slices_compose() {
        let adapter = ProgressRange::new(5.0, 95.0);
        let step = adapter.slice(50.0, 100.0);
        assert_eq!(step.min, 50.0);
        assert_eq!(step.max, 95.0);
        assert_eq!(step.scale(0.0), 50.0);
        assert_eq!(step.scale(100.0), 95.0);
    }

    #[test]
    fn test_remap_percent_rounds_down() {
        assert_eq!(remap_percent(99.9, LOCAL, LOCAL), 99);
        assert_eq!(remap_percent(100.0, LOCAL, LOCAL), 100);
    }
}
