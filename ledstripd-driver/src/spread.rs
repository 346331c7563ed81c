//! Spread-spectrum clocking.
//!
//! Early strip revisions radiate enough EMI at a fixed clock to violate
//! emission limits, so the clock hops across a grid of channels inside a
//! configured bandwidth around the center frequency. Hops are rate-limited
//! by the hopping delay and either cycle the grid in order or pick channels
//! at random.

use std::time::{Duration, Instant};

use crate::error::DriverError;

/// Spread-spectrum parameters, in strip-frequency terms.
#[derive(Debug, Clone, PartialEq)]
pub struct SpreadSpectrum {
    pub randomized: bool,
    pub center_hz: u32,
    pub bandwidth_hz: u32,
    pub channel_width_hz: u32,
    pub hopping_delay: Duration,
}

impl SpreadSpectrum {
    /// Checks that the parameters describe a usable channel grid.
    pub fn validate(&self) -> Result<(), DriverError> {
        if self.channel_width_hz == 0 {
            return Err(DriverError::SpreadSpectrum(
                "channel width must be nonzero".into(),
            ));
        }
        if self.bandwidth_hz / 2 >= self.center_hz {
            return Err(DriverError::SpreadSpectrum(format!(
                "bandwidth {} Hz does not fit around center {} Hz",
                self.bandwidth_hz, self.center_hz
            )));
        }
        Ok(())
    }
}

/// Picks the next clock frequency whenever a hop is due.
pub struct HopScheduler {
    channels: Vec<u32>,
    delay: Duration,
    randomized: bool,
    index: usize,
    last_hop: Instant,
}

impl HopScheduler {
    pub fn new(params: &SpreadSpectrum) -> Result<Self, DriverError> {
        params.validate()?;
        let half = params.bandwidth_hz / 2;
        // The band may reach past u32::MAX, so the walk runs in u64 with the
        // top capped at the largest representable frequency.
        let top = (u64::from(params.center_hz) + u64::from(half)).min(u64::from(u32::MAX));
        let mut channels = Vec::new();
        let mut hz = u64::from(params.center_hz - half);
        while hz <= top {
            channels.push(hz as u32);
            hz += u64::from(params.channel_width_hz);
        }
        Ok(Self {
            channels,
            delay: params.hopping_delay,
            randomized: params.randomized,
            index: 0,
            last_hop: Instant::now(),
        })
    }

    /// Returns the next strip frequency when a hop is due, `None` while the
    /// hopping delay has not elapsed yet.
    pub fn poll(&mut self, now: Instant) -> Option<u32> {
        if self.channels.is_empty() || now.duration_since(self.last_hop) < self.delay {
            return None;
        }
        self.last_hop = now;
        self.index = if self.randomized {
            rand::random_range(0..self.channels.len())
        } else {
            (self.index + 1) % self.channels.len()
        };
        Some(self.channels[self.index])
    }

    pub fn channels(&self) -> &[u32] {
        &self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(randomized: bool) -> SpreadSpectrum {
        SpreadSpectrum {
            randomized,
            center_hz: 800_000,
            bandwidth_hz: 200_000,
            channel_width_hz: 9_000,
            hopping_delay: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_channels_stay_in_band() {
        let hopper = HopScheduler::new(&params(false)).unwrap();
        assert_eq!(hopper.channels().first(), Some(&700_000));
        assert!(hopper
            .channels()
            .iter()
            .all(|&hz| (700_000..=900_000).contains(&hz)));
        // Grid is aligned to the channel width.
        assert!(hopper
            .channels()
            .iter()
            .all(|&hz| (hz - 700_000) % 9_000 == 0));
    }

    #[test]
    fn test_sequential_hops_cycle_the_grid() {
        let mut hopper = HopScheduler::new(&params(false)).unwrap();
        let count = hopper.channels().len();
        let expected: Vec<u32> = (1..=count)
            .map(|i| hopper.channels()[i % count])
            .collect();
        let mut now = Instant::now();
        let mut seen = Vec::new();
        for _ in 0..count {
            now += Duration::from_millis(50);
            seen.push(hopper.poll(now).unwrap());
        }
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_hops_are_rate_limited() {
        let mut hopper = HopScheduler::new(&params(false)).unwrap();
        let start = Instant::now();
        assert_eq!(hopper.poll(start + Duration::from_millis(10)), None);
        assert!(hopper.poll(start + Duration::from_millis(50)).is_some());
        assert_eq!(hopper.poll(start + Duration::from_millis(60)), None);
    }

    #[test]
    fn test_randomized_hops_stay_in_band() {
        let mut hopper = HopScheduler::new(&params(true)).unwrap();
        let mut now = Instant::now();
        for _ in 0..100 {
            now += Duration::from_millis(50);
            let hz = hopper.poll(now).unwrap();
            assert!((700_000..=900_000).contains(&hz));
        }
    }

    #[test]
    fn test_zero_channel_width_rejected() {
        let mut p = params(false);
        p.channel_width_hz = 0;
        assert!(HopScheduler::new(&p).is_err());
    }

    #[test]
    fn test_oversized_bandwidth_rejected() {
        let mut p = params(false);
        p.bandwidth_hz = 2_000_000;
        assert!(HopScheduler::new(&p).is_err());
    }

    #[test]
    fn test_band_against_the_frequency_ceiling() {
        let mut p = params(false);
        p.center_hz = u32::MAX;
        p.bandwidth_hz = 2;
        let mut hopper = HopScheduler::new(&p).unwrap();
        // Channels above u32::MAX are cut off, the remainder stays usable.
        assert_eq!(hopper.channels(), &[u32::MAX - 1]);
        let hz = hopper.poll(Instant::now() + Duration::from_millis(50));
        assert_eq!(hz, Some(u32::MAX - 1));
    }

    #[test]
    fn test_zero_bandwidth_degenerates_to_center() {
        let mut p = params(false);
        p.center_hz = u32::MAX;
        p.bandwidth_hz = 0;
        let hopper = HopScheduler::new(&p).unwrap();
        assert_eq!(hopper.channels(), &[u32::MAX]);
    }
}
