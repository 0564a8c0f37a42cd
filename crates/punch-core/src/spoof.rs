//! GPS plausibility heuristics

use punch_api::{FlagKind, FlagSet, LocationSample};
use punch_config::SpoofThresholds;

use crate::geo::sample_distance;

/// Flags location reports that look fabricated or too coarse to trust.
///
/// The guard only annotates; which flags block a punch is decided by
/// [`SpoofGuard::rejecting`].
#[derive(Debug, Clone)]
pub struct SpoofGuard {
    thresholds: SpoofThresholds,
}

impl SpoofGuard {
    pub fn new(thresholds: SpoofThresholds) -> Self {
        Self { thresholds }
    }

    /// Assess a sample, optionally against the user's previous sample
    pub fn assess(&self, sample: &LocationSample, previous: Option<&LocationSample>) -> FlagSet {
        let mut flags = FlagSet::new();

        if sample.accuracy_meters < self.thresholds.min_accuracy_meters {
            flags.insert(FlagKind::LowAccuracy);
        }
        if sample.accuracy_meters > self.thresholds.max_accuracy_meters {
            flags.insert(FlagKind::StaleAccuracy);
        }
        if let Some(prev) = previous
            && self.is_teleport(prev, sample)
        {
            flags.insert(FlagKind::Teleport);
        }

        flags
    }

    fn is_teleport(&self, prev: &LocationSample, sample: &LocationSample) -> bool {
        let distance = sample_distance(prev, sample);
        let elapsed = (sample.captured_at - prev.captured_at).num_milliseconds() as f64 / 1000.0;

        if elapsed <= 0.0 {
            // Same instant (or clock skew): only a jump past both error circles counts
            return distance > prev.accuracy_meters + sample.accuracy_meters;
        }

        distance / elapsed > self.thresholds.max_speed_mps
    }

    /// The subset of `flags` that policy treats as a hard rejection
    pub fn rejecting(&self, flags: &FlagSet) -> FlagSet {
        flags
            .intersection(&self.thresholds.reject_flags)
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Local, TimeZone};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 2, h, m, s).unwrap()
    }

    fn sample(lat: f64, lon: f64, accuracy: f64, captured_at: DateTime<Local>) -> LocationSample {
        LocationSample {
            latitude: lat,
            longitude: lon,
            accuracy_meters: accuracy,
            captured_at,
        }
    }

    fn guard() -> SpoofGuard {
        SpoofGuard::new(SpoofThresholds::default())
    }

    #[test]
    fn accuracy_floor_boundary() {
        let g = guard();

        let flags = g.assess(&sample(40.7128, -74.0060, 0.99, at(9, 0, 0)), None);
        assert!(flags.contains(&FlagKind::LowAccuracy));
        assert!(!g.rejecting(&flags).is_empty());

        let flags = g.assess(&sample(40.7128, -74.0060, 5.0, at(9, 0, 0)), None);
        assert!(flags.is_empty());

        let flags = g.assess(&sample(40.7128, -74.0060, 1.0, at(9, 0, 0)), None);
        assert!(flags.is_empty());
    }

    #[test]
    fn coarse_accuracy_is_inconclusive_not_fabricated() {
        let g = guard();
        let flags = g.assess(&sample(40.7128, -74.0060, 800.0, at(9, 0, 0)), None);

        assert!(flags.contains(&FlagKind::StaleAccuracy));
        assert!(!flags.contains(&FlagKind::LowAccuracy));
        // Default policy only annotates coarse fixes
        assert!(g.rejecting(&flags).is_empty());
    }

    #[test]
    fn teleport_detection() {
        let g = guard();
        let new_york = sample(40.7128, -74.0060, 5.0, at(8, 0, 0));

        // Los Angeles ten minutes later
        let la = sample(34.0522, -118.2437, 5.0, at(8, 10, 0));
        assert!(g.assess(&la, Some(&new_york)).contains(&FlagKind::Teleport));

        // A few blocks away half an hour later
        let nearby = sample(40.7200, -74.0000, 5.0, at(8, 30, 0));
        assert!(!g.assess(&nearby, Some(&new_york)).contains(&FlagKind::Teleport));
    }

    #[test]
    fn zero_elapsed_time() {
        let g = guard();
        let first = sample(40.7128, -74.0060, 50.0, at(8, 0, 0));

        // Within the combined accuracy circles
        let jitter = sample(40.7130, -74.0060, 50.0, at(8, 0, 0));
        assert!(!g.assess(&jitter, Some(&first)).contains(&FlagKind::Teleport));

        let jump = sample(40.7300, -74.0060, 50.0, at(8, 0, 0));
        assert!(g.assess(&jump, Some(&first)).contains(&FlagKind::Teleport));
    }

    #[test]
    fn configurable_reject_set() {
        let thresholds = SpoofThresholds {
            reject_flags: [FlagKind::LowAccuracy, FlagKind::StaleAccuracy].into_iter().collect(),
            ..SpoofThresholds::default()
        };
        let g = SpoofGuard::new(thresholds);

        let flags = g.assess(&sample(40.7128, -74.0060, 800.0, at(9, 0, 0)), None);
        assert_eq!(
            g.rejecting(&flags),
            [FlagKind::StaleAccuracy].into_iter().collect()
        );
    }
}
