//! Driver error types

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while driving a strip
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("failed to open SPI device {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("ioctl {name} failed: {source}")]
    Ioctl { name: &'static str, source: io::Error },

    #[error("SPI write failed: {0}")]
    Write(#[from] io::Error),

    #[error("frame has {got} pixels, strip has {expected}")]
    FrameSize { expected: usize, got: usize },

    #[error("invalid spread spectrum config: {0}")]
    SpreadSpectrum(String),
}
