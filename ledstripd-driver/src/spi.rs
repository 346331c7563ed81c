//! SPI transport for WS281x strips.
//!
//! Talks to `/dev/spidevX.Y` directly: mode and clock are configured through
//! the spidev ioctls, frames are plain `write(2)`s of the encoded waveform.
//! The kernel keeps MOSI shifting continuously as long as a frame is one
//! contiguous write, which is what the strip's timing window needs.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::debug;

use crate::encode;
use crate::error::DriverError;
use crate::spread::{HopScheduler, SpreadSpectrum};
use crate::{LedStrip, Rgb};

// spidev ioctl request codes, _IOW('k', nr, size) expanded by hand since
// libc does not carry them.
const SPI_IOC_WR_MODE: libc::c_ulong = 0x4001_6B01;
const SPI_IOC_WR_BITS_PER_WORD: libc::c_ulong = 0x4001_6B03;
const SPI_IOC_WR_MAX_SPEED_HZ: libc::c_ulong = 0x4004_6B04;

pub struct SpiStrip {
    device: File,
    path: PathBuf,
    len: usize,
    invert: bool,
    base_strip_hz: u32,
    spi_hz: u32,
    buf: Vec<u8>,
    hopper: Option<HopScheduler>,
}

impl SpiStrip {
    /// Opens the SPI device and tunes it for `strip_hz` WS281x data.
    pub fn open(
        path: &Path,
        len: usize,
        strip_hz: u32,
        invert: bool,
        spread: Option<SpreadSpectrum>,
    ) -> Result<Self, DriverError> {
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| DriverError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        let hopper = spread.as_ref().map(HopScheduler::new).transpose()?;
        let mut strip = Self {
            device,
            path: path.to_path_buf(),
            len,
            invert,
            base_strip_hz: strip_hz,
            spi_hz: 0,
            buf: Vec::new(),
            hopper,
        };
        strip.ioctl_u8(SPI_IOC_WR_MODE, 0, "SPI_IOC_WR_MODE")?;
        strip.ioctl_u8(SPI_IOC_WR_BITS_PER_WORD, 8, "SPI_IOC_WR_BITS_PER_WORD")?;
        strip.set_clock(strip_hz)?;
        debug!(path = %strip.path.display(), len, strip_hz, "SPI strip ready");
        Ok(strip)
    }

    fn ioctl_u8(&self, request: libc::c_ulong, value: u8, name: &'static str) -> Result<(), DriverError> {
        let rc = unsafe { libc::ioctl(self.device.as_raw_fd(), request, &value as *const u8) };
        if rc < 0 {
            return Err(DriverError::Ioctl {
                name,
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn set_clock(&mut self, strip_hz: u32) -> Result<(), DriverError> {
        let spi_hz = encode::spi_clock_hz(strip_hz);
        let rc = unsafe {
            libc::ioctl(
                self.device.as_raw_fd(),
                SPI_IOC_WR_MAX_SPEED_HZ,
                &spi_hz as *const u32,
            )
        };
        if rc < 0 {
            return Err(DriverError::Ioctl {
                name: "SPI_IOC_WR_MAX_SPEED_HZ",
                source: std::io::Error::last_os_error(),
            });
        }
        self.spi_hz = spi_hz;
        Ok(())
    }
}

impl LedStrip for SpiStrip {
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
        let hop = self.hopper.as_mut().and_then(|h| h.poll(Instant::now()));
        if let Some(hz) = hop {
            self.set_clock(hz)?;
        }
        encode::encode_frame(frame, brightness, self.invert, self.spi_hz, &mut self.buf);
        self.device.write_all(&self.buf)?;
        Ok(())
    }

    fn set_spread_spectrum(&mut self, params: Option<SpreadSpectrum>) -> Result<(), DriverError> {
        match params {
            Some(p) => {
                let hopper = HopScheduler::new(&p)?;
                self.set_clock(p.center_hz)?;
                self.hopper = Some(hopper);
                debug!(center_hz = p.center_hz, bandwidth_hz = p.bandwidth_hz, "spread spectrum on");
            }
            None => {
                self.hopper = None;
                self.set_clock(self.base_strip_hz)?;
                debug!(strip_hz = self.base_strip_hz, "spread spectrum off");
            }
        }
        Ok(())
    }
}
