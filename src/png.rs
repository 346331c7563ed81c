// PNG file parsing and strip frame mapping
// Each pixel row of the image is one animation frame, cycling top to bottom

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::color::{self, Rgb};

#[derive(Debug, Error)]
pub enum PngError {
    #[error("png {path} not readable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("png {path} too large: {size} bytes, max {max}")]
    TooLarge { path: PathBuf, size: u64, max: u64 },
    #[error("png {path} failed to decode: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("png {path} has no pixels")]
    Empty { path: PathBuf },
}

/// Loads and caches animations from a folder of PNG files.
///
/// Rows are resampled to the strip width with nearest-neighbor lookup, so
/// images both narrower and wider than the strip render sensibly. Files
/// that cannot be used are cached as unusable and render a dark frame, so
/// the render loop logs the reason once instead of every tick.
pub struct PngLibrary {
    folder: PathBuf,
    max_bytes: u64,
    width: usize,
    cache: HashMap<String, Option<Arc<Vec<Vec<Rgb>>>>>,
}

impl PngLibrary {
    pub fn new(folder: impl Into<PathBuf>, max_bytes: u64, width: usize) -> Self {
        PngLibrary {
            folder: folder.into(),
            max_bytes,
            width,
            cache: HashMap::new(),
        }
    }

    /// One frame of `file` at `phase`. Rows advance at the frame rate and
    /// wrap around at the bottom of the image.
    pub fn frame(&mut self, file: &str, phase: Duration, fps: f64) -> Vec<Rgb> {
        match self.animation(file) {
            Some(rows) => {
                let row = (phase.as_secs_f64() * fps).round() as usize % rows.len();
                rows[row].clone()
            }
            None => vec![color::OFF; self.width],
        }
    }

    fn animation(&mut self, file: &str) -> Option<Arc<Vec<Vec<Rgb>>>> {
        if let Some(cached) = self.cache.get(file) {
            return cached.clone();
        }
        let loaded = match self.load(file) {
            Ok(rows) => {
                info!("loaded png animation {} ({} rows)", file, rows.len());
                Some(Arc::new(rows))
            }
            Err(err) => {
                warn!("png animation {} unusable: {}", file, err);
                None
            }
        };
        self.cache.insert(file.to_string(), loaded.clone());
        loaded
    }

    fn load(&self, file: &str) -> Result<Vec<Vec<Rgb>>, PngError> {
        let path = self.folder.join(file);
        let meta = std::fs::metadata(&path).map_err(|source| PngError::Unreadable {
            path: path.clone(),
            source,
        })?;
        if meta.len() >= self.max_bytes {
            return Err(PngError::TooLarge { path, size: meta.len(), max: self.max_bytes });
        }
        let img = image::open(&path)
            .map_err(|source| PngError::Decode { path: path.clone(), source })?
            .to_rgb8();
        if img.width() == 0 || img.height() == 0 {
            return Err(PngError::Empty { path });
        }
        let mut rows = Vec::with_capacity(img.height() as usize);
        for y in 0..img.height() {
            let src: Vec<Rgb> = (0..img.width())
                .map(|x| {
                    let px = img.get_pixel(x, y);
                    Rgb::new(px[0], px[1], px[2])
                })
                .collect();
            rows.push(resample(&src, self.width));
        }
        Ok(rows)
    }
}

fn resample(src: &[Rgb], width: usize) -> Vec<Rgb> {
    (0..width).map(|i| src[i * src.len() / width]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb as Pixel, RgbImage};
    use std::path::Path;

    const FPS: f64 = 28.0;

    fn write_rows(dir: &Path, name: &str, rows: &[[u8; 3]], width: u32) {
        let img = RgbImage::from_fn(width, rows.len() as u32, |_, y| Pixel(rows[y as usize]));
        img.save(dir.join(name)).unwrap();
    }

    #[test]
    fn test_rows_map_to_strip_width() {
        let dir = tempfile::tempdir().unwrap();
        write_rows(dir.path(), "flag.png", &[[255, 0, 0], [0, 0, 255]], 4);
        let mut lib = PngLibrary::new(dir.path(), 30_000, 8);

        let first = lib.frame("flag.png", Duration::ZERO, FPS);
        assert_eq!(first, vec![Rgb::new(255, 0, 0); 8]);
        let second = lib.frame("flag.png", Duration::from_secs_f64(1.0 / FPS), FPS);
        assert_eq!(second, vec![Rgb::new(0, 0, 255); 8]);
    }

    #[test]
    fn test_animation_wraps_around() {
        let dir = tempfile::tempdir().unwrap();
        write_rows(dir.path(), "wrap.png", &[[10, 0, 0], [0, 10, 0], [0, 0, 10]], 2);
        let mut lib = PngLibrary::new(dir.path(), 30_000, 2);

        let wrapped = lib.frame("wrap.png", Duration::from_secs_f64(4.0 / FPS), FPS);
        assert_eq!(wrapped, vec![Rgb::new(0, 10, 0); 2]);
    }

    #[test]
    fn test_missing_file_renders_dark() {
        let dir = tempfile::tempdir().unwrap();
        let mut lib = PngLibrary::new(dir.path(), 30_000, 5);
        assert_eq!(lib.frame("nope.png", Duration::ZERO, FPS), vec![color::OFF; 5]);
        // the negative result is cached
        assert_eq!(lib.frame("nope.png", Duration::ZERO, FPS), vec![color::OFF; 5]);
    }

    #[test]
    fn test_oversized_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_rows(dir.path(), "big.png", &[[1, 2, 3]], 64);
        let mut lib = PngLibrary::new(dir.path(), 16, 4);
        assert_eq!(lib.frame("big.png", Duration::ZERO, FPS), vec![color::OFF; 4]);
    }
}
