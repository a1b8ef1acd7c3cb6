//! Bounded random reading generation.

use std::{fmt, str::FromStr};

use rand::{rngs::StdRng, Rng};

// ---

/// Half-width of the fixed-delta random walk step.
pub const FIXED_DELTA: f64 = 0.2;

/// Fraction of the average used as the relative fluctuation window.
pub const RELATIVE_FLUCTUATION: f64 = 0.02;

/// Source of uniformly distributed samples, stubbed in tests.
pub trait UniformSource {
    /// Draw from the closed interval `[low, high]`.
    fn uniform(&mut self, low: f64, high: f64) -> f64;
}

impl UniformSource for StdRng {
    fn uniform(&mut self, low: f64, high: f64) -> f64 {
        self.random_range(low..=high)
    }
}

/// How the next reading is derived from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadingStrategy {
    // ---
    /// Random walk: `current + Uniform(-0.2, 0.2)`.
    #[default]
    FixedDelta,
    /// Resample around the average: `Uniform(avg - 2%, avg + 2%)`.
    RelativeFluctuation,
}

impl ReadingStrategy {
    // ---
    /// Next reading, clamped to `[min, max]` and rounded to 2 decimals.
    ///
    /// `min`/`max` must carry at most 2 decimals themselves, which
    /// [`SensorRangeTable::new`](crate::sensors::SensorRangeTable::new)
    /// enforces, so rounding cannot leave the bounds.
    pub fn next_value<R: UniformSource + ?Sized>(
        self,
        current: f64,
        avg: f64,
        min: f64,
        max: f64,
        rng: &mut R,
    ) -> f64 {
        // ---
        let raw = match self {
            Self::FixedDelta => current + rng.uniform(-FIXED_DELTA, FIXED_DELTA),
            Self::RelativeFluctuation => {
                let fluctuation = (avg * RELATIVE_FLUCTUATION).abs();
                rng.uniform(avg - fluctuation, avg + fluctuation)
            }
        };
        round2(min.max(raw.min(max)))
    }
}

impl fmt::Display for ReadingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FixedDelta => f.write_str("fixed-delta"),
            Self::RelativeFluctuation => f.write_str("relative-fluctuation"),
        }
    }
}

impl FromStr for ReadingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed-delta" => Ok(Self::FixedDelta),
            "relative-fluctuation" => Ok(Self::RelativeFluctuation),
            other => Err(format!(
                "unknown reading strategy '{other}' (expected fixed-delta or relative-fluctuation)"
            )),
        }
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use rand::SeedableRng;

    /// Returns the same sample for every draw.
    struct Fixed(f64);

    impl UniformSource for Fixed {
        fn uniform(&mut self, _low: f64, _high: f64) -> f64 {
            self.0
        }
    }

    fn has_two_decimals(v: f64) -> bool {
        round2(v) == v
    }

    #[test]
    fn test_fixed_delta_walks_from_current() {
        // ---
        let v = ReadingStrategy::FixedDelta.next_value(129.10, 129.10, 16.0, 258.0, &mut Fixed(0.2));
        assert_eq!(v, 129.30);
    }

    #[test]
    fn test_relative_fluctuation_centers_on_average() {
        // ---
        let v = ReadingStrategy::RelativeFluctuation.next_value(
            200.0,
            129.10,
            16.0,
            258.0,
            &mut Fixed(129.10),
        );
        assert_eq!(v, 129.10);
    }

    #[test]
    fn test_values_are_clamped() {
        // ---
        let up = ReadingStrategy::FixedDelta.next_value(257.95, 129.1, 16.0, 258.0, &mut Fixed(0.2));
        let down = ReadingStrategy::FixedDelta.next_value(16.1, 129.1, 16.0, 258.0, &mut Fixed(-0.2));

        assert_eq!(up, 258.0);
        assert_eq!(down, 16.0);
    }

    #[test]
    fn test_bound_and_rounding_hold_for_random_inputs() {
        // ---
        let mut rng = StdRng::seed_from_u64(0x5EED);
        for case in 0..10_000 {
            let a = round2(rng.random_range(-500.0..500.0));
            let b = round2(rng.random_range(-500.0..500.0));
            let (min, max) = if a <= b { (a, b) } else { (b, a) };
            let avg = round2(rng.random_range(min..=max)).clamp(min, max);
            let current = rng.random_range(min - 1.0..=max + 1.0);

            for strategy in [ReadingStrategy::FixedDelta, ReadingStrategy::RelativeFluctuation] {
                let v = strategy.next_value(current, avg, min, max, &mut rng);
                assert!(
                    min <= v && v <= max,
                    "case {case}: {strategy} produced {v} outside [{min}, {max}]"
                );
                assert!(has_two_decimals(v), "case {case}: {v} has more than 2 decimals");
            }
        }
    }

    #[test]
    fn test_strategy_names_round_trip() {
        // ---
        for s in [ReadingStrategy::FixedDelta, ReadingStrategy::RelativeFluctuation] {
            assert_eq!(s.to_string().parse::<ReadingStrategy>(), Ok(s));
        }
        assert!("random".parse::<ReadingStrategy>().is_err());
    }
}
