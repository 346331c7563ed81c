//! Typed command events and the colon-grammar parser.
//!
//! Every raw command string maps to exactly one [`Event`]; input that cannot
//! be understood becomes [`Event::Unknown`] with the raw string preserved for
//! diagnostics. Parsing never fails and never panics.

use std::num::IntErrorKind;

use crate::color::{self, Rgb};

/// Spread-spectrum reconfiguration carried by the `spread_spectrum` command.
#[derive(Debug, Clone, PartialEq)]
pub enum SpreadSpectrumCmd {
    Off,
    On {
        center_hz: u32,
        bandwidth_hz: u32,
        channel_width_hz: u32,
        hopping_delay_ms: u64,
        randomized: bool,
    },
}

/// One externally observed occurrence, normalized from its wire spelling.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // Daemon listening
    Listening,
    ListeningColor { color: Rgb, background: Option<Rgb> },
    ListeningNet,
    ListeningAp,
    ListeningApAndNet,
    ListeningFind,

    // Server lifecycle
    ClientOpened,
    ClientClosed,
    Error,
    Shutdown,
    ShutdownPrepare,
    ShutdownPrepareCancel,

    // Job lifecycle
    PrintStarted,
    PrintDone,
    PrintCancelled,
    PrintPaused,
    PrintPausedTimeout,
    PrintPausedTimeoutBlock,
    PrintResumed,
    Pause,
    ReadyToPrint,
    ReadyToPrintCancel,
    JobFinished,
    LaserJobDone,
    LaserJobCancelled,
    LaserJobFailed,
    Progress(u8),

    // Slicing
    SlicingStarted,
    SlicingDone,
    SlicingCancelled,
    SlicingFailed,
    SlicingProgress(u8),

    // Transient feedback
    ButtonPressReject,
    Upload,
    SettingsUpdated,

    // Direct animation commands
    SolidColor { color: Rgb, hold_frames: Option<u32> },
    Flash { color: Rgb, speed: u32, hold_frames: Option<u32> },
    Blink { color: Rgb, speed: u32, hold_frames: Option<u32> },
    PngAnimation(String),
    LensCalibration { hold_frames: Option<u32> },

    // Control flags
    IgnoreNextCommand,
    IgnoreStop,
    Rollback,
    DebugStop(f64),

    // Runtime settings
    SetFps(f64),
    SetBrightness(u8),
    SpreadSpectrum(SpreadSpectrumCmd),

    Unknown(String),
}

/// Parses one raw command string. Unparseable input degrades to
/// [`Event::Unknown`]; numeric fields out of range are clamped, structurally
/// malformed ones (non-numeric) reject the whole command.
pub fn parse(raw: &str) -> Event {
    let trimmed = raw.trim();
    let mut parts = trimmed.split(':');
    let head = parts.next().unwrap_or_default().trim();
    // A single leading underscore is an accepted alias spelling, more are not.
    let head = head.strip_prefix('_').unwrap_or(head).to_ascii_lowercase();
    let args: Vec<&str> = parts.map(str::trim).collect();
    parse_command(&head, &args).unwrap_or_else(|| Event::Unknown(trimmed.to_string()))
}

fn parse_command(head: &str, args: &[&str]) -> Option<Event> {
    let event = match head {
        "listening" | "startup" => Event::Listening,
        "listening_color" => Event::ListeningColor {
            color: rgb(args)?,
            background: if args.len() >= 6 { Some(rgb(&args[3..])?) } else { None },
        },
        "listening_net" | "listening_network" => Event::ListeningNet,
        "listening_ap" => Event::ListeningAp,
        "listening_ap_and_net" | "listening_net_and_ap" => Event::ListeningApAndNet,
        "listening_find" => Event::ListeningFind,

        "clientopened" => Event::ClientOpened,
        "clientclosed" => Event::ClientClosed,
        "error" => Event::Error,
        "shutdown" => Event::Shutdown,
        "shutdownprepare" => Event::ShutdownPrepare,
        "shutdownpreparecancel" => Event::ShutdownPrepareCancel,

        "printstarted" => Event::PrintStarted,
        "printdone" => Event::PrintDone,
        "printcancelled" => Event::PrintCancelled,
        "printpaused" => Event::PrintPaused,
        "printpausedtimeout" => Event::PrintPausedTimeout,
        "printpausedtimeoutblock" => Event::PrintPausedTimeoutBlock,
        "printresumed" => Event::PrintResumed,
        "pause" => Event::Pause,
        "readytoprint" => Event::ReadyToPrint,
        "readytoprintcancel" => Event::ReadyToPrintCancel,
        "jobfinished" | "job_finished" => Event::JobFinished,
        "laserjobdone" => Event::LaserJobDone,
        "laserjobcancelled" => Event::LaserJobCancelled,
        "laserjobfailed" => Event::LaserJobFailed,
        "progress" => Event::Progress(pct(args.first()?)?),

        "slicingstarted" => Event::SlicingStarted,
        "slicingdone" => Event::SlicingDone,
        "slicingcancelled" => Event::SlicingCancelled,
        "slicingfailed" => Event::SlicingFailed,
        "slicingprogress" | "slicing_progress" => Event::SlicingProgress(pct(args.first()?)?),

        "buttonpressreject" => Event::ButtonPressReject,
        "upload" => Event::Upload,
        "settingsupdated" => Event::SettingsUpdated,

        "color" => Event::SolidColor {
            color: rgb(args)?,
            hold_frames: opt_frames(args.get(3))?,
        },
        "flash_color" => Event::Flash {
            color: rgb(args)?,
            speed: opt_speed(args.get(3), 1)?,
            hold_frames: opt_frames(args.get(4))?,
        },
        "blink_color" => Event::Blink {
            color: rgb(args)?,
            speed: opt_speed(args.get(3), 8)?,
            hold_frames: opt_frames(args.get(4))?,
        },
        "png" => {
            let file = args.first().filter(|f| !f.is_empty())?;
            Event::PngAnimation((*file).to_string())
        }
        "lens_calibration" => Event::LensCalibration {
            hold_frames: opt_frames(args.first())?,
        },

        "rollback" => Event::Rollback,
        "ignore_next_command" => Event::IgnoreNextCommand,
        "ignore_stop" => Event::IgnoreStop,
        "debugstop" => {
            let secs: f64 = args.first()?.parse().ok()?;
            if !secs.is_finite() {
                return None;
            }
            Event::DebugStop(secs.max(0.0))
        }

        "fps" => {
            let fps: f64 = args.first()?.parse().ok()?;
            if !fps.is_finite() {
                return None;
            }
            Event::SetFps(fps)
        }
        "brightness" | "bright" | "b" => Event::SetBrightness(channel(args.first()?)?),
        "spread_spectrum" => Event::SpreadSpectrum(spread_spectrum(args)?),

        _ => {
            if let Some(rest) = head.strip_prefix("flash_") {
                Event::Flash {
                    color: named_color(rest)?,
                    speed: opt_speed(args.first(), 1)?,
                    hold_frames: opt_frames(args.get(1))?,
                }
            } else if let Some(rest) = head.strip_prefix("blink_") {
                Event::Blink {
                    color: named_color(rest)?,
                    speed: opt_speed(args.first(), 8)?,
                    hold_frames: opt_frames(args.get(1))?,
                }
            } else {
                Event::SolidColor {
                    color: named_color(head.strip_prefix("all_").unwrap_or(head))?,
                    hold_frames: opt_frames(args.first())?,
                }
            }
        }
    };
    Some(event)
}

// ── field parsers ──────────────────────────────────────────────────────────

fn pct(arg: &str) -> Option<u8> {
    let v: f64 = arg.parse().ok()?;
    if !v.is_finite() {
        return None;
    }
    Some(v.clamp(0.0, 100.0).round() as u8)
}

/// Integer field. Well-formed numbers past i64 saturate so the caller's
/// range clamp still applies; only non-numeric input rejects.
fn int_field(arg: &str) -> Option<i64> {
    match arg.parse::<i64>() {
        Ok(v) => Some(v),
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => Some(i64::MAX),
            IntErrorKind::NegOverflow => Some(i64::MIN),
            _ => None,
        },
    }
}

fn channel(arg: &str) -> Option<u8> {
    Some(int_field(arg)?.clamp(0, 255) as u8)
}

fn rgb(args: &[&str]) -> Option<Rgb> {
    if args.len() < 3 {
        return None;
    }
    Some(Rgb::new(channel(args[0])?, channel(args[1])?, channel(args[2])?))
}

/// Frame counts: absent or zero means "hold forever".
fn opt_frames(arg: Option<&&str>) -> Option<Option<u32>> {
    match arg {
        None => Some(None),
        Some(a) => {
            let v = int_field(a)?.clamp(0, u32::MAX as i64) as u32;
            Some(if v == 0 { None } else { Some(v) })
        }
    }
}

/// Animation speed in ticks per step, at least 1.
fn opt_speed(arg: Option<&&str>, default: u32) -> Option<u32> {
    match arg {
        None => Some(default),
        Some(a) => Some(int_field(a)?.clamp(1, 1_000) as u32),
    }
}

fn named_color(name: &str) -> Option<Rgb> {
    Some(match name {
        "on" | "white" => color::WHITE,
        "off" => color::OFF,
        "red" => color::RED,
        "green" => color::GREEN,
        "blue" => color::BLUE,
        "yellow" => color::YELLOW,
        "orange" => color::ORANGE,
        _ => return None,
    })
}

fn spread_spectrum(args: &[&str]) -> Option<SpreadSpectrumCmd> {
    match *args.first()? {
        "off" => Some(SpreadSpectrumCmd::Off),
        "on" => {
            if args.len() < 5 {
                return None;
            }
            Some(SpreadSpectrumCmd::On {
                center_hz: freq(args[1], 1)?,
                bandwidth_hz: freq(args[2], 0)?,
                channel_width_hz: freq(args[3], 1)?,
                hopping_delay_ms: int_field(args[4])?.clamp(1, 3_600_000) as u64,
                randomized: args.get(5).is_some_and(|a| a.starts_with('r')),
            })
        }
        _ => None,
    }
}

fn freq(arg: &str, min: u32) -> Option<u32> {
    Some(int_field(arg)?.clamp(min as i64, u32::MAX as i64) as u32)
}

// ── names and labels ───────────────────────────────────────────────────────

impl Event {
    /// Canonical command spelling, used for logs and the command catalogue.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Listening => "listening",
            Event::ListeningColor { .. } => "listening_color",
            Event::ListeningNet => "listening_net",
            Event::ListeningAp => "listening_ap",
            Event::ListeningApAndNet => "listening_ap_and_net",
            Event::ListeningFind => "listening_find",
            Event::ClientOpened => "ClientOpened",
            Event::ClientClosed => "ClientClosed",
            Event::Error => "Error",
            Event::Shutdown => "Shutdown",
            Event::ShutdownPrepare => "ShutdownPrepare",
            Event::ShutdownPrepareCancel => "ShutdownPrepareCancel",
            Event::PrintStarted => "PrintStarted",
            Event::PrintDone => "PrintDone",
            Event::PrintCancelled => "PrintCancelled",
            Event::PrintPaused => "PrintPaused",
            Event::PrintPausedTimeout => "PrintPausedTimeout",
            Event::PrintPausedTimeoutBlock => "PrintPausedTimeoutBlock",
            Event::PrintResumed => "PrintResumed",
            Event::Pause => "Pause",
            Event::ReadyToPrint => "ReadyToPrint",
            Event::ReadyToPrintCancel => "ReadyToPrintCancel",
            Event::JobFinished => "JobFinished",
            Event::LaserJobDone => "LaserJobDone",
            Event::LaserJobCancelled => "LaserJobCancelled",
            Event::LaserJobFailed => "LaserJobFailed",
            Event::Progress(_) => "Progress",
            Event::SlicingStarted => "SlicingStarted",
            Event::SlicingDone => "SlicingDone",
            Event::SlicingCancelled => "SlicingCancelled",
            Event::SlicingFailed => "SlicingFailed",
            Event::SlicingProgress(_) => "SlicingProgress",
            Event::ButtonPressReject => "ButtonPressReject",
            Event::Upload => "Upload",
            Event::SettingsUpdated => "SettingsUpdated",
            Event::SolidColor { .. } => "color",
            Event::Flash { .. } => "flash_color",
            Event::Blink { .. } => "blink_color",
            Event::PngAnimation(_) => "png",
            Event::LensCalibration { .. } => "lens_calibration",
            Event::IgnoreNextCommand => "ignore_next_command",
            Event::IgnoreStop => "ignore_stop",
            Event::Rollback => "rollback",
            Event::DebugStop(_) => "DebugStop",
            Event::SetFps(_) => "fps",
            Event::SetBrightness(_) => "brightness",
            Event::SpreadSpectrum(_) => "spread_spectrum",
            Event::Unknown(_) => "unknown",
        }
    }

    /// Command spelling with arguments, the form state labels use.
    pub fn label(&self) -> String {
        match self {
            Event::Progress(p) => format!("Progress:{p}"),
            Event::SlicingProgress(p) => format!("SlicingProgress:{p}"),
            Event::PngAnimation(file) => format!("png:{file}"),
            Event::SolidColor { color, .. } => color_label("", "color", *color),
            Event::Flash { color, .. } => color_label("flash_", "flash_color", *color),
            Event::Blink { color, .. } => color_label("blink_", "blink_color", *color),
            Event::ListeningColor { color, .. } => {
                format!("listening_color:{}:{}:{}", color.r, color.g, color.b)
            }
            Event::Unknown(raw) => raw.clone(),
            _ => self.name().to_string(),
        }
    }
}

fn color_label(prefix: &str, custom: &str, c: Rgb) -> String {
    let named = [
        (color::WHITE, "white"),
        (color::OFF, "off"),
        (color::RED, "red"),
        (color::GREEN, "green"),
        (color::BLUE, "blue"),
        (color::YELLOW, "yellow"),
        (color::ORANGE, "orange"),
    ];
    match named.iter().find(|(rgb, _)| *rgb == c) {
        Some((_, name)) => format!("{prefix}{name}"),
        None => format!("{custom}:{}:{}:{}", c.r, c.g, c.b),
    }
}

/// Everything the daemon answers to, for the `?` catalogue.
pub const COMMANDS: &[&str] = &[
    "listening",
    "listening_color",
    "listening_net",
    "listening_ap",
    "listening_ap_and_net",
    "listening_find",
    "ClientOpened",
    "ClientClosed",
    "Error",
    "Shutdown",
    "ShutdownPrepare",
    "ShutdownPrepareCancel",
    "PrintStarted",
    "PrintDone",
    "PrintCancelled",
    "PrintPaused",
    "PrintPausedTimeout",
    "PrintPausedTimeoutBlock",
    "PrintResumed",
    "Pause",
    "ReadyToPrint",
    "ReadyToPrintCancel",
    "JobFinished",
    "LaserJobDone",
    "LaserJobCancelled",
    "LaserJobFailed",
    "Progress",
    "SlicingStarted",
    "SlicingDone",
    "SlicingCancelled",
    "SlicingFailed",
    "SlicingProgress",
    "ButtonPressReject",
    "Upload",
    "SettingsUpdated",
    "on",
    "off",
    "white",
    "red",
    "green",
    "blue",
    "yellow",
    "orange",
    "color",
    "flash_white",
    "flash_red",
    "flash_green",
    "flash_blue",
    "flash_yellow",
    "flash_orange",
    "flash_color",
    "blink_white",
    "blink_red",
    "blink_green",
    "blink_blue",
    "blink_yellow",
    "blink_orange",
    "blink_color",
    "png",
    "lens_calibration",
    "rollback",
    "ignore_next_command",
    "ignore_stop",
    "DebugStop",
    "fps",
    "brightness",
    "spread_spectrum",
];
