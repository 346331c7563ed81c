//! WS281x LED strip driving over SPI.
//!
//! The daemon renders frames against the [`LedStrip`] trait. [`SpiStrip`]
//! pushes them to real hardware through `/dev/spidev`, [`MemoryStrip`] keeps
//! them in memory for tests and headless runs.

use std::sync::Arc;

use parking_lot::Mutex;

pub mod encode;
pub mod error;
pub mod spread;

mod spi;

pub use error::DriverError;
pub use spi::SpiStrip;
pub use spread::SpreadSpectrum;

/// One LED color, 8 bits per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Scales each channel by `factor`, clamped to [0, 1].
    pub fn scale(self, factor: f32) -> Rgb {
        let f = factor.clamp(0.0, 1.0);
        Rgb::new(
            (f32::from(self.r) * f).round() as u8,
            (f32::from(self.g) * f).round() as u8,
            (f32::from(self.b) * f).round() as u8,
        )
    }
}

/// A sink for rendered frames.
pub trait LedStrip: Send {
    /// Number of addressable pixels on the strip.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes one frame. `frame` must hold exactly `len()` colors.
    fn render(&mut self, frame: &[Rgb], brightness: u8) -> Result<(), DriverError>;

    /// Reconfigures spread-spectrum clocking, `None` disables it. Strips
    /// without a tunable clock accept the call and ignore it.
    fn set_spread_spectrum(&mut self, _params: Option<SpreadSpectrum>) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Captures frames instead of driving hardware.
///
/// Clones share the same backing store, so one handle can live inside the
/// render task while another inspects what was pushed.
#[derive(Clone)]
pub struct MemoryStrip {
    inner: Arc<Mutex<MemoryInner>>,
    len: usize,
}

#[derive(Default)]
struct MemoryInner {
    last_frame: Vec<Rgb>,
    last_brightness: u8,
    frames_rendered: u64,
    spread: Option<Option<SpreadSpectrum>>,
}

impl MemoryStrip {
    pub fn new(len: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryInner::default())),
            len,
        }
    }

    pub fn last_frame(&self) -> Vec<Rgb> {
        self.inner.lock().last_frame.clone()
    }

    pub fn last_brightness(&self) -> u8 {
        self.inner.lock().last_brightness
    }

    pub fn frames_rendered(&self) -> u64 {
        self.inner.lock().frames_rendered
    }

    /// Last spread-spectrum reconfiguration, if any was requested.
    pub fn last_spread_spectrum(&self) -> Option<Option<SpreadSpectrum>> {
        self.inner.lock().spread.clone()
    }
}

impl LedStrip for MemoryStrip {
    fn len(&self) -> usize {
        self.len
    }

    fn render(&mut self, frame: &[Rgb], brightness: u8) -> Result<(), DriverError> {
        if frame.len() != self.len {
            return Err(DriverError::FrameSize {
                expected: self.len,
                got: frame.len(),
            });
        }
        let mut inner = self.inner.lock();
        inner.last_frame.clear();
        inner.last_frame.extend_from_slice(frame);
        inner.last_brightness = brightness;
        inner.frames_rendered += 1;
        Ok(())
    }

    fn set_spread_spectrum(&mut self, params: Option<SpreadSpectrum>) -> Result<(), DriverError> {
        self.inner.lock().spread = Some(params);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_clamps_factor() {
        let c = Rgb::new(100, 200, 40);
        assert_eq!(c.scale(2.0), c);
        assert_eq!(c.scale(-1.0), Rgb::new(0, 0, 0));
        assert_eq!(c.scale(0.5), Rgb::new(50, 100, 20));
    }

    #[test]
    fn test_memory_strip_captures_frames() {
        let strip = MemoryStrip::new(3);
        let mut sink = strip.clone();
        let frame = vec![Rgb::new(1, 2, 3); 3];
        sink.render(&frame, 200).unwrap();
        assert_eq!(strip.last_frame(), frame);
        assert_eq!(strip.last_brightness(), 200);
        assert_eq!(strip.frames_rendered(), 1);
    }

    #[test]
    fn test_memory_strip_rejects_wrong_size() {
        let mut strip = MemoryStrip::new(3);
        let err = strip.render(&[Rgb::default(); 2], 255).unwrap_err();
        assert!(matches!(
            err,
            DriverError::FrameSize {
                expected: 3,
                got: 2
            }
        ));
    }

    #[test]
    fn test_memory_strip_records_spread_config() {
        let strip = MemoryStrip::new(1);
        let mut sink = strip.clone();
        sink.set_spread_spectrum(None).unwrap();
        assert_eq!(strip.last_spread_spectrum(), Some(None));
    }
}
