//! Pure frame synthesis for every animation program.
//!
//! A frame is fully determined by (program, phase, strip length, frame
//! rate), so the render loop can restart or switch programs at any tick
//! without carrying pixel state across frames.

use std::time::Duration;

use keyframe::functions as ease;
use keyframe::EasingFunction;

use crate::color::{self, Rgb};
use crate::state::Anim;

/// Lit-pixel counts (out of 7) for the pulse growing from the center.
const FLASH_STEPS: [usize; 9] = [0, 1, 3, 5, 7, 7, 5, 3, 1];

/// Renders one frame of `anim` at `phase` since the animation started.
///
/// `Png` programs are resolved by the caller that owns the image library;
/// here they fall back to a dark frame.
pub fn render(anim: &Anim, phase: Duration, n: usize, fps: f64) -> Vec<Rgb> {
    if n == 0 {
        return Vec::new();
    }
    let fps = fps.max(1.0);
    let frames = phase.as_secs_f64() * fps;
    match anim {
        Anim::BreathingStatic { color } => breathing_static(*color, frames, n, fps),
        Anim::Breathing { color, alt, background } => {
            breathing(*color, *alt, *background, frames, n, fps)
        }
        Anim::Idle => chase(color::WHITE, 1.0, frames, n),
        Anim::Progress { pct, style } => {
            let (done, drip) = style.colors();
            progress(*pct, done, drip, style.speed(), frames, n)
        }
        Anim::ProgressPause { pct, pulse, drip } => {
            let dim = if *pulse { breath_factor(frames, 1.5, fps) } else { 1.0 };
            progress(*pct, color::WHITE, drip.scale(dim as f32), 1.5, frames, n)
        }
        Anim::Flash { color, speed } => flash(*color, f64::from(*speed), frames, n),
        Anim::Blink { color, speed } => blink(*color, f64::from(*speed), frames, n),
        Anim::Solid { color } => vec![*color; n],
        Anim::Sweep { color } => sweep(*color, frames, n, fps),
        Anim::ShutdownPrepare => shutdown_prepare(frames, n, fps),
        Anim::FadeOff { inner, inner_phase, fade: length } => {
            fade(render(inner, *inner_phase, n, fps), phase, *length)
        }
        Anim::Png { .. } => vec![color::OFF; n],
    }
}

/// Dims a captured frame towards black over `length`.
pub fn fade(mut frame: Vec<Rgb>, phase: Duration, length: Duration) -> Vec<Rgb> {
    let t = if length.is_zero() {
        1.0
    } else {
        (phase.as_secs_f64() / length.as_secs_f64()).min(1.0)
    };
    for px in frame.iter_mut() {
        *px = px.scale((1.0 - t) as f32);
    }
    frame
}

/// Triangle wave through an ease-in-out curve, 0.0 at the cycle edges and
/// 1.0 mid-cycle. One full breath takes `speed * speed * fps` frames.
fn breath_factor(frames: f64, speed: f64, fps: f64) -> f64 {
    let f_count = (speed * fps).max(1.0);
    let x = (frames / speed) % f_count;
    let triangle = 1.0 - (2.0 * x - (f_count - 1.0)).abs() / f_count;
    ease::EaseInOut.y(triangle.clamp(0.0, 1.0))
}

fn breathing(color: Rgb, alt: Option<Rgb>, background: Rgb, frames: f64, n: usize, fps: f64) -> Vec<Rgb> {
    let speed = 2.0;
    let f_count = speed * fps;
    let dim = breath_factor(frames, speed, fps);
    let active = match alt {
        // switch color once per full breath
        Some(second) if (frames / f_count / 2.0) as usize % 2 == 1 => second,
        _ => color,
    };
    band(active.scale(dim as f32), background, n)
}

fn breathing_static(color: Rgb, frames: f64, n: usize, fps: f64) -> Vec<Rgb> {
    let f_count = 2.0 * fps;
    if frames < f_count {
        breathing(color, None, color::OFF, frames, n, fps)
    } else {
        band(color, color::OFF, n)
    }
}

/// Steady band at the strip bottom, sized like 1 of 7 pixels (2 of 7 when a
/// visible background needs room).
fn band(color: Rgb, background: Rgb, n: usize) -> Vec<Rgb> {
    let per_seven = if background == color::OFF { 1 } else { 2 };
    let lit = ((n * per_seven + 3) / 7).clamp(1, n);
    let mut frame = vec![background; n];
    for px in frame.iter_mut().skip(n - lit) {
        *px = color;
    }
    frame
}

fn chase(color: Rgb, speed: f64, frames: f64, n: usize) -> Vec<Rgb> {
    let c = (frames / speed).round() as usize % n;
    let mut frame = vec![color::OFF; n];
    frame[c] = color;
    frame
}

fn flash(color: Rgb, speed: f64, frames: f64, n: usize) -> Vec<Rgb> {
    let step = (frames / speed).round() as usize % FLASH_STEPS.len();
    let lit = FLASH_STEPS[step] * n / 7;
    let start = (n - lit) / 2;
    let mut frame = vec![color::OFF; n];
    for px in frame.iter_mut().skip(start).take(lit) {
        *px = color;
    }
    frame
}

fn blink(color: Rgb, speed: f64, frames: f64, n: usize) -> Vec<Rgb> {
    let lit = (n * 3 / 7).max(1);
    let top = (frames / speed).round() as usize % 2 == 0;
    let mut frame = vec![color::OFF; n];
    let range = if top { 0..lit } else { n - lit..n };
    for px in &mut frame[range] {
        *px = color;
    }
    frame
}

/// Bar filling bottom-up (towards index 0) with a drip chasing through the
/// unfinished part.
fn progress(pct: u8, done: Rgb, drip: Rgb, speed: f64, frames: f64, n: usize) -> Vec<Rgb> {
    let c = (frames / speed).round() as usize % n;
    let threshold = f64::from(pct) / 100.0 * (n - 1) as f64;
    (0..n)
        .map(|i| {
            let bottom_up = (n - 1 - i) as f64;
            if threshold < bottom_up {
                if i == c {
                    drip
                } else {
                    color::OFF
                }
            } else {
                done
            }
        })
        .collect()
}

/// Fill the strip one pixel per two frames, then dim the filled strip back
/// out over one second.
fn sweep(color: Rgb, frames: f64, n: usize, fps: f64) -> Vec<Rgb> {
    let grow = (2 * n) as f64;
    let cycle = (fps + grow).max(1.0);
    let f = frames.round() % cycle;
    if f < grow {
        let filled = ((f / 2.0).round() as usize).min(n);
        let mut frame = vec![color::OFF; n];
        for px in frame.iter_mut().take(filled) {
            *px = color;
        }
        frame
    } else {
        let dim = (1.0 - (f - grow) / fps).clamp(0.0, 1.0);
        vec![color.scale(dim as f32); n]
    }
}

/// Red warning blink: six frames on out of ten, dimming out over five
/// seconds, full red afterwards.
fn shutdown_prepare(frames: f64, n: usize, fps: f64) -> Vec<Rgb> {
    let on = frames.round() as u64 % 10 > 3;
    if !on {
        return vec![color::OFF; n];
    }
    let peak = 5.0 * fps;
    let px = if frames <= peak {
        color::RED.scale((205.0 / 255.0 * (1.0 - frames / peak)) as f32)
    } else {
        color::RED
    };
    vec![px; n]
}
