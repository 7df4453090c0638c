//! Bitrate-to-resolution selection policy.
//!
//! The three fixed lookup tables of the system (bandwidth thresholds, pixel
//! dimensions and default transports) live in one immutable [`SelectionPolicy`]
//! value that is built once at startup and shared by reference.

use thiserror::Error;

use crate::media::{Resolution, Transport};

/// Errors raised when constructing a custom selection policy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    /// Threshold for a tier is NaN, infinite or negative.
    #[error("invalid bandwidth threshold for {tier}: {value}")]
    InvalidThreshold { tier: Resolution, value: f64 },

    /// Thresholds must grow strictly with the tier.
    #[error("threshold for {tier} ({value} Mbps) does not exceed the previous tier ({previous} Mbps)")]
    NonMonotonic {
        tier: Resolution,
        value: f64,
        previous: f64,
    },
}

/// Output frame size used when synthesizing a rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelDimensions {
    pub width: u32,
    pub height: u32,
}

impl PixelDimensions {
    /// Formats the size the way the transcoder expects it (`1280x720`).
    pub fn as_size_arg(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Minimum bandwidth in Mbps required per tier, indexed by [`Resolution::rank`].
const DEFAULT_THRESHOLDS_MBPS: [f64; 5] = [0.4, 0.75, 1.0, 2.5, 4.5];

/// Immutable selection policy shared by every session.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionPolicy {
    thresholds_mbps: [f64; 5],
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            thresholds_mbps: DEFAULT_THRESHOLDS_MBPS,
        }
    }
}

impl SelectionPolicy {
    /// Creates a policy with custom per-tier thresholds, lowest tier first.
    ///
    /// # Errors
    ///
    /// - `PolicyError::InvalidThreshold` - A threshold is not a finite, non-negative number
    /// - `PolicyError::NonMonotonic` - Thresholds are not strictly increasing
    pub fn with_thresholds(thresholds_mbps: [f64; 5]) -> Result<Self, PolicyError> {
        let mut previous: Option<f64> = None;
        for (tier, value) in Resolution::ALL.into_iter().zip(thresholds_mbps) {
            if !value.is_finite() || value < 0.0 {
                return Err(PolicyError::InvalidThreshold { tier, value });
            }
            if let Some(previous) = previous
                && value <= previous
            {
                return Err(PolicyError::NonMonotonic {
                    tier,
                    value,
                    previous,
                });
            }
            previous = Some(value);
        }

        Ok(Self { thresholds_mbps })
    }

    /// Minimum bandwidth in Mbps needed to afford `tier`.
    pub fn threshold(&self, tier: Resolution) -> f64 {
        self.thresholds_mbps[tier.rank()]
    }

    /// Returns the highest tier affordable at `bandwidth_mbps`.
    ///
    /// `None` means no tier is affordable, which is a valid outcome rather
    /// than a failure. Non-finite or negative estimates afford nothing.
    pub fn max_resolution(&self, bandwidth_mbps: f64) -> Option<Resolution> {
        if !bandwidth_mbps.is_finite() || bandwidth_mbps < 0.0 {
            return None;
        }

        Resolution::ALL
            .into_iter()
            .rev()
            .find(|tier| self.threshold(*tier) <= bandwidth_mbps)
    }

    /// Transport chosen when the client leaves the protocol field empty.
    pub fn default_transport(&self, resolution: Resolution) -> Transport {
        match resolution {
            Resolution::P240 => Transport::Tcp,
            Resolution::P360 | Resolution::P480 => Transport::Udp,
            Resolution::P720 | Resolution::P1080 => Transport::Rtp,
        }
    }

    /// Frame size used when synthesizing a rendition of `resolution`.
    pub fn dimensions(&self, resolution: Resolution) -> PixelDimensions {
        let (width, height) = match resolution {
            Resolution::P240 => (426, 240),
            Resolution::P360 => (640, 360),
            Resolution::P480 => (854, 480),
            Resolution::P720 => (1280, 720),
            Resolution::P1080 => (1920, 1080),
        };
        PixelDimensions { width, height }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_default_thresholds() {
        let policy = SelectionPolicy::default();
        assert_eq!(policy.max_resolution(0.3), None);
        assert_eq!(policy.max_resolution(0.4), Some(Resolution::P240));
        assert_eq!(policy.max_resolution(0.8), Some(Resolution::P360));
        assert_eq!(policy.max_resolution(1.0), Some(Resolution::P480));
        assert_eq!(policy.max_resolution(3.0), Some(Resolution::P720));
        assert_eq!(policy.max_resolution(10.0), Some(Resolution::P1080));
    }

    #[test]
    fn test_low_bandwidth_with_custom_thresholds() {
        let policy = SelectionPolicy::with_thresholds([0.5, 1.0, 2.0, 4.0, 8.0]).unwrap();
        assert_eq!(policy.max_resolution(0.6), Some(Resolution::P240));
        assert_eq!(policy.max_resolution(0.49), None);
    }

    #[test]
    fn test_rejects_invalid_threshold_tables() {
        assert!(matches!(
            SelectionPolicy::with_thresholds([0.5, 0.5, 2.0, 4.0, 8.0]),
            Err(PolicyError::NonMonotonic {
                tier: Resolution::P360,
                ..
            })
        ));
        assert!(matches!(
            SelectionPolicy::with_thresholds([f64::NAN, 1.0, 2.0, 4.0, 8.0]),
            Err(PolicyError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_non_finite_bandwidth_selects_nothing() {
        let policy = SelectionPolicy::default();
        assert_eq!(policy.max_resolution(f64::NAN), None);
        assert_eq!(policy.max_resolution(f64::INFINITY), None);
        assert_eq!(policy.max_resolution(-1.0), None);
    }

    #[test]
    fn test_default_transport_table() {
        let policy = SelectionPolicy::default();
        assert_eq!(policy.default_transport(Resolution::P240), Transport::Tcp);
        assert_eq!(policy.default_transport(Resolution::P360), Transport::Udp);
        assert_eq!(policy.default_transport(Resolution::P480), Transport::Udp);
        assert_eq!(policy.default_transport(Resolution::P720), Transport::Rtp);
        assert_eq!(policy.default_transport(Resolution::P1080), Transport::Rtp);
    }

    #[test]
    fn test_dimension_table() {
        let policy = SelectionPolicy::default();
        assert_eq!(policy.dimensions(Resolution::P240).as_size_arg(), "426x240");
        assert_eq!(policy.dimensions(Resolution::P480).as_size_arg(), "854x480");
        assert_eq!(policy.dimensions(Resolution::P1080).as_size_arg(), "1920x1080");
    }

    proptest! {
        #[test]
        fn prop_selected_tier_is_affordable_and_maximal(bandwidth in 0.0f64..20.0) {
            let policy = SelectionPolicy::default();
            match policy.max_resolution(bandwidth) {
                Some(tier) => {
                    prop_assert!(policy.threshold(tier) <= bandwidth);
                    for higher in Resolution::ALL.into_iter().filter(|r| *r > tier) {
                        prop_assert!(policy.threshold(higher) > bandwidth);
                    }
                }
                None => prop_assert!(bandwidth < policy.threshold(Resolution::P240)),
            }
        }

        #[test]
        fn prop_selection_is_monotonic(a in 0.0f64..20.0, b in 0.0f64..20.0) {
            let policy = SelectionPolicy::default();
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(policy.max_resolution(low) <= policy.max_resolution(high));
        }
    }
}
