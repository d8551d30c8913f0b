use std::time::Duration;

/// Target frames per second. Always at least 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate(u32);

#[derive(Debug, thiserror::Error)]
#[error("fps must be greater than 1 (got {0})")]
pub struct FrameRateError(pub u32);

impl FrameRate {
    pub const DEFAULT: FrameRate = FrameRate(60);

    pub fn new(fps: u32) -> Result<Self, FrameRateError> {
        if fps <= 1 {
            return Err(FrameRateError(fps));
        }
        Ok(Self(fps))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Wall-clock sleep between ticks.
    pub fn interval(self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.0))
    }

    /// Simulated seconds added per tick.
    pub fn step_secs(self) -> f64 {
        1.0 / f64::from(self.0)
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Simulated animation clock.
///
/// Time advances by exactly one frame step per tick regardless of how long the
/// tick took, so a cached loop always covers the same span of shader time.
#[derive(Debug, Clone)]
pub struct Pacing {
    rate: FrameRate,
    elapsed: f64,
    tick: u64,
}

impl Pacing {
    pub fn new(rate: FrameRate) -> Self {
        Self {
            rate,
            elapsed: 0.0,
            tick: 0,
        }
    }

    pub fn rate(&self) -> FrameRate {
        self.rate
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn advance(&mut self) {
        self.elapsed += self.rate.step_secs();
        self.tick += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_one_and_zero() {
        assert!(FrameRate::new(0).is_err());
        assert!(FrameRate::new(1).is_err());
        assert_eq!(FrameRate::new(2).unwrap().get(), 2);
    }

    #[test]
    fn interval_matches_rate() {
        assert_eq!(
            FrameRate::new(50).unwrap().interval(),
            Duration::from_millis(20)
        );
        assert_eq!(FrameRate::default().get(), 60);
    }

    #[test]
    fn elapsed_accumulates_fixed_steps() {
        let mut pacing = Pacing::new(FrameRate::new(4).unwrap());
        assert_eq!(pacing.elapsed(), 0.0);
        for _ in 0..8 {
            pacing.advance();
        }
        assert_eq!(pacing.tick(), 8);
        assert!((pacing.elapsed() - 2.0).abs() < 1e-9);
    }
}
