//! WS281x waveform encoding for SPI transmission.
//!
//! The strip's one-wire protocol is bit-banged over the SPI MOSI line at
//! three times the data rate: each data bit becomes a 3-bit symbol, `1` is
//! sent as `110` and `0` as `100`. Every frame ends with a low gap long
//! enough for the strip to latch the shifted colors.

use crate::Rgb;

/// SPI symbol bits per strip data bit.
const SYMBOL_BITS: u32 = 3;

/// Latch gap the strip needs after a frame, in microseconds.
const LATCH_US: u64 = 80;

/// SPI clock required to express `strip_hz` data bits as 3-bit symbols.
/// Saturates at u32::MAX, the most the spidev speed ioctl can carry.
pub fn spi_clock_hz(strip_hz: u32) -> u32 {
    strip_hz.saturating_mul(SYMBOL_BITS)
}

/// Number of idle bytes that cover the latch gap at a given SPI clock.
pub fn latch_bytes(spi_hz: u32) -> usize {
    (u64::from(spi_hz) * LATCH_US).div_ceil(8 * 1_000_000) as usize
}

/// Expands one data byte into its 3-byte symbol sequence, MSB first.
fn expand_byte(byte: u8, invert: bool) -> [u8; 3] {
    let mut bits = 0u32;
    for i in (0..8).rev() {
        bits <<= 3;
        bits |= if byte & (1 << i) != 0 { 0b110 } else { 0b100 };
    }
    if invert {
        bits = !bits;
    }
    [(bits >> 16) as u8, (bits >> 8) as u8, bits as u8]
}

/// Encodes a full frame into `buf`: brightness-scaled GRB pixel data framed
/// by idle padding and the trailing latch gap. `buf` is cleared first so it
/// can be reused across frames.
pub fn encode_frame(pixels: &[Rgb], brightness: u8, invert: bool, spi_hz: u32, buf: &mut Vec<u8>) {
    // The wire must rest low; with an inverting level shifter that means
    // resting high.
    let idle = if invert { 0xFF } else { 0x00 };
    buf.clear();
    // One leading idle byte so the first symbol never starts mid-edge.
    buf.push(idle);
    let scale = f32::from(brightness) / 255.0;
    for px in pixels {
        let scaled = px.scale(scale);
        for channel in [scaled.g, scaled.r, scaled.b] {
            buf.extend_from_slice(&expand_byte(channel, invert));
        }
    }
    buf.resize(buf.len() + latch_bytes(spi_hz), idle);
}
