// Daemon configuration, loaded from a TOML file.
//
// Every field has a default, so a missing file, a missing section and a
// missing key all behave the same: the daemon comes up with the values
// below and only the keys present in the file override them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ledstripd_driver::SpreadSpectrum;

use crate::state::{self, Transients};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub strip: StripConfig,
    #[serde(default)]
    pub spread_spectrum: SpreadSpectrumConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transients: TransientsConfig,
    #[serde(default)]
    pub png: PngConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripConfig {
    /// Number of LEDs on the strip.
    #[serde(default = "default_led_count")]
    pub led_count: usize,
    /// Render rate in frames per second.
    #[serde(default = "default_fps")]
    pub fps: f64,
    /// Global brightness, 0-255. Dim if too much power is drawn.
    #[serde(default = "default_brightness")]
    pub brightness: u8,
    /// SPI device the strip hangs off.
    #[serde(default = "default_spi_device")]
    pub spi_device: String,
    /// LED signal frequency in Hz, usually 800 kHz.
    #[serde(default = "default_freq_hz")]
    pub freq_hz: u32,
    /// Invert the output signal (for inverting level shifters).
    #[serde(default)]
    pub invert: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpreadSpectrumConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Hop to a random channel instead of walking the grid in order.
    #[serde(default = "default_true")]
    pub randomized: bool,
    #[serde(default = "default_bandwidth_hz")]
    pub bandwidth_hz: u32,
    #[serde(default = "default_channel_width_hz")]
    pub channel_width_hz: u32,
    #[serde(default = "default_hopping_delay_ms")]
    pub hopping_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Unix domain socket the command server listens on.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
}

/// Lifetimes of the short-lived animations, in milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransientsConfig {
    #[serde(default = "default_button_reject_ms")]
    pub button_reject_ms: u64,
    #[serde(default = "default_upload_ms")]
    pub upload_ms: u64,
    #[serde(default = "default_settings_updated_ms")]
    pub settings_updated_ms: u64,
    #[serde(default = "default_ignore_stop_window_ms")]
    pub ignore_stop_window_ms: u64,
    #[serde(default = "default_paused_block_ms")]
    pub paused_block_ms: u64,
    #[serde(default = "default_fade_ms")]
    pub fade_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PngConfig {
    /// Folder PNG animations are looked up in.
    #[serde(default = "default_png_folder")]
    pub folder: PathBuf,
    /// Maximum accepted PNG file size in bytes.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

fn default_led_count() -> usize {
    46
}

fn default_fps() -> f64 {
    state::DEFAULT_FPS
}

fn default_brightness() -> u8 {
    255
}

fn default_spi_device() -> String {
    "/dev/spidev0.0".to_string()
}

fn default_freq_hz() -> u32 {
    800_000
}

fn default_true() -> bool {
    true
}

fn default_bandwidth_hz() -> u32 {
    200_000
}

fn default_channel_width_hz() -> u32 {
    9_000
}

fn default_hopping_delay_ms() -> u64 {
    50
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/var/run/ledstripd.sock")
}

fn default_button_reject_ms() -> u64 {
    1_000
}

fn default_upload_ms() -> u64 {
    2_000
}

fn default_settings_updated_ms() -> u64 {
    1_800
}

fn default_ignore_stop_window_ms() -> u64 {
    10_000
}

fn default_paused_block_ms() -> u64 {
    1_000
}

fn default_fade_ms() -> u64 {
    360
}

fn default_png_folder() -> PathBuf {
    PathBuf::from("/usr/share/ledstripd/png")
}

fn default_max_bytes() -> u64 {
    30 * 1024
}

impl Default for StripConfig {
    fn default() -> Self {
        StripConfig {
            led_count: default_led_count(),
            fps: default_fps(),
            brightness: default_brightness(),
            spi_device: default_spi_device(),
            freq_hz: default_freq_hz(),
            invert: false,
        }
    }
}

impl Default for SpreadSpectrumConfig {
    fn default() -> Self {
        SpreadSpectrumConfig {
            enabled: default_true(),
            randomized: default_true(),
            bandwidth_hz: default_bandwidth_hz(),
            channel_width_hz: default_channel_width_hz(),
            hopping_delay_ms: default_hopping_delay_ms(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            socket_path: default_socket_path(),
        }
    }
}

impl Default for TransientsConfig {
    fn default() -> Self {
        TransientsConfig {
            button_reject_ms: default_button_reject_ms(),
            upload_ms: default_upload_ms(),
            settings_updated_ms: default_settings_updated_ms(),
            ignore_stop_window_ms: default_ignore_stop_window_ms(),
            paused_block_ms: default_paused_block_ms(),
            fade_ms: default_fade_ms(),
        }
    }
}

impl Default for PngConfig {
    fn default() -> Self {
        PngConfig {
            folder: default_png_folder(),
            max_bytes: default_max_bytes(),
        }
    }
}

impl Config {
    /// Loads the configuration from `path`.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Spread-spectrum parameters for the driver, centered on the strip
    /// signal frequency. `None` when disabled in the config.
    pub fn spread_spectrum_params(&self) -> Option<SpreadSpectrum> {
        if !self.spread_spectrum.enabled {
            return None;
        }
        Some(SpreadSpectrum {
            randomized: self.spread_spectrum.randomized,
            center_hz: self.strip.freq_hz,
            bandwidth_hz: self.spread_spectrum.bandwidth_hz,
            channel_width_hz: self.spread_spectrum.channel_width_hz,
            hopping_delay: Duration::from_millis(self.spread_spectrum.hopping_delay_ms),
        })
    }

    pub fn transients(&self) -> Transients {
        Transients {
            button_reject: Duration::from_millis(self.transients.button_reject_ms),
            upload: Duration::from_millis(self.transients.upload_ms),
            settings_updated: Duration::from_millis(self.transients.settings_updated_ms),
            ignore_stop_window: Duration::from_millis(self.transients.ignore_stop_window_ms),
            paused_block: Duration::from_millis(self.transients.paused_block_ms),
            fade: Duration::from_millis(self.transients.fade_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.strip.led_count, 46);
        assert_eq!(config.strip.fps, 28.0);
        assert_eq!(config.strip.brightness, 255);
        assert_eq!(config.strip.spi_device, "/dev/spidev0.0");
        assert_eq!(config.strip.freq_hz, 800_000);
        assert!(!config.strip.invert);
        assert!(config.spread_spectrum.enabled);
        assert_eq!(config.png.max_bytes, 30 * 1024);
        assert_eq!(
            config.server.socket_path,
            PathBuf::from("/var/run/ledstripd.sock")
        );
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [strip]
            led_count = 90
            fps = 50.0

            [spread_spectrum]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.strip.led_count, 90);
        assert_eq!(config.strip.fps, 50.0);
        assert_eq!(config.strip.brightness, 255);
        assert!(!config.spread_spectrum.enabled);
        assert_eq!(config.spread_spectrum.bandwidth_hz, 200_000);
        assert_eq!(config.transients.fade_ms, 360);
    }

    #[test]
    fn default_matches_empty_toml() {
        let from_toml: Config = toml::from_str("").unwrap();
        let built_in = Config::default();
        assert_eq!(from_toml.strip.led_count, built_in.strip.led_count);
        assert_eq!(from_toml.strip.fps, built_in.strip.fps);
        assert_eq!(
            from_toml.spread_spectrum.channel_width_hz,
            built_in.spread_spectrum.channel_width_hz
        );
        assert_eq!(
            from_toml.transients.ignore_stop_window_ms,
            built_in.transients.ignore_stop_window_ms
        );
        assert_eq!(from_toml.png.folder, built_in.png.folder);
    }

    #[test]
    fn spread_params_follow_strip_frequency() {
        let config: Config = toml::from_str(
            r#"
            [strip]
            freq_hz = 1200000
            "#,
        )
        .unwrap();
        let params = config.spread_spectrum_params().unwrap();
        assert_eq!(params.center_hz, 1_200_000);
        assert_eq!(params.bandwidth_hz, 200_000);
        assert_eq!(params.hopping_delay, Duration::from_millis(50));

        let off: Config = toml::from_str("[spread_spectrum]\nenabled = false\n").unwrap();
        assert!(off.spread_spectrum_params().is_none());
    }

    #[test]
    fn load_reports_missing_file_and_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            Config::load(&missing),
            Err(ConfigError::Read { .. })
        ));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[strip\nled_count = 46").unwrap();
        assert!(matches!(Config::load(&bad), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn transients_convert_to_durations() {
        let config: Config = toml::from_str("[transients]\nfade_ms = 500\n").unwrap();
        let t = config.transients();
        assert_eq!(t.fade, Duration::from_millis(500));
        assert_eq!(t.button_reject, Duration::from_millis(1_000));
        assert_eq!(t.ignore_stop_window, Duration::from_millis(10_000));
    }
}
