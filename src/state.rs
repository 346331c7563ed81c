//! Animation state machine with a bounded rollback stack.
//!
//! Durable machine states replace the base context at the bottom of the
//! stack. Transient feedback animations are pushed on top with a deadline
//! and pop back automatically, restoring whatever was active beneath them.
//! Expiry is evaluated lazily whenever the state is read, so no timer
//! callbacks race with incoming events.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use ledstripd_driver::SpreadSpectrum;

use crate::color::{self, Rgb};
use crate::event::{Event, SpreadSpectrumCmd};

/// Frame rate used when none is configured or a caller sets an empty one.
pub const DEFAULT_FPS: f64 = 28.0;

/// Base context plus at most three stacked transients.
const MAX_STACK: usize = 4;

/// Progress bars for laser jobs and slicing differ only in palette and pace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStyle {
    Job,
    Slicing,
}

impl ProgressStyle {
    /// (done, drip) colors.
    pub fn colors(self) -> (Rgb, Rgb) {
        match self {
            ProgressStyle::Job => (color::WHITE, color::BLUE),
            ProgressStyle::Slicing => (color::BLUE, color::WHITE),
        }
    }

    /// Ticks per chase step.
    pub fn speed(self) -> f64 {
        match self {
            ProgressStyle::Job => 2.0,
            ProgressStyle::Slicing => 3.0,
        }
    }
}

/// One renderable animation program. Stateless: a frame is fully determined
/// by the program, the phase since its start, the strip length and the
/// frame rate.
#[derive(Debug, Clone, PartialEq)]
pub enum Anim {
    /// One breath cycle, then a steady dim band at the strip bottom.
    BreathingStatic { color: Rgb },
    /// Continuous breathing, optionally alternating with a second color.
    Breathing { color: Rgb, alt: Option<Rgb>, background: Rgb },
    /// Single white dot chasing along the strip.
    Idle,
    /// Percentage bar filling bottom-up with a chasing drip above it.
    Progress { pct: u8, style: ProgressStyle },
    /// Progress bar frozen at a percentage, drip pulsing or steady.
    ProgressPause { pct: u8, pulse: bool, drip: Rgb },
    /// Pulse growing from the strip center.
    Flash { color: Rgb, speed: u32 },
    /// Top and bottom thirds lit alternately.
    Blink { color: Rgb, speed: u32 },
    Solid { color: Rgb },
    /// Fill the strip step by step, then dim it back out.
    Sweep { color: Rgb },
    /// Red blinking that dims out over a few seconds, then stays bright.
    ShutdownPrepare,
    /// Previously visible frame dimming down to black.
    FadeOff { inner: Box<Anim>, inner_phase: Duration, fade: Duration },
    /// Animation rows taken from an image file.
    Png { file: String },
}

/// What happens when a context reaches its deadline.
#[derive(Debug, Clone, PartialEq)]
pub enum FollowUp {
    /// Pop the context, resuming whatever is beneath it.
    Pop,
    /// Swap the context in place for a successor state.
    Become { anim: Anim, label: &'static str },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Until {
    pub at: Instant,
    pub then: FollowUp,
}

/// The unit held on the rollback stack: an animation program, the command
/// spelling that produced it and the timestamp animation phase is measured
/// from.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationContext {
    pub anim: Anim,
    pub label: String,
    pub started: Instant,
    pub until: Option<Until>,
}

impl AnimationContext {
    fn durable(anim: Anim, label: String, started: Instant) -> Self {
        AnimationContext { anim, label, started, until: None }
    }
}

/// Durations of the auto-rollback animations, configurable per animation.
#[derive(Debug, Clone, PartialEq)]
pub struct Transients {
    pub button_reject: Duration,
    pub upload: Duration,
    pub settings_updated: Duration,
    pub ignore_stop_window: Duration,
    pub paused_block: Duration,
    pub fade: Duration,
}

impl Default for Transients {
    fn default() -> Self {
        Transients {
            button_reject: Duration::from_millis(1000),
            upload: Duration::from_millis(2000),
            settings_updated: Duration::from_millis(1800),
            ignore_stop_window: Duration::from_millis(10_000),
            paused_block: Duration::from_millis(1000),
            fade: Duration::from_millis(360),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ShutdownPhase {
    None,
    /// Warning animation running, previous base saved for cancellation.
    Preparing { prev: Box<AnimationContext> },
    /// Shutdown committed, the render loop exits after the current frame.
    Final,
}

/// Outcome of applying one event, shaped for the wire response.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Ok { old: String, now: String },
    Ignored { attempted: String, kept: String },
    Unknown { raw: String, state: String },
    Setting { name: &'static str, value: String },
    SettingError { name: &'static str },
}

/// Read-only view of the machine for the `?` liveness probe.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub state: String,
    pub stack: Vec<String>,
    pub job_progress: u8,
    pub fps: f64,
    pub brightness: u8,
    pub ignore_next: bool,
    pub ignore_stop_active: bool,
    pub shutdown: &'static str,
}

pub struct StateMachine {
    stack: Vec<AnimationContext>,
    job_progress: u8,
    ignore_next: bool,
    ignore_stop_until: Option<Instant>,
    shutdown: ShutdownPhase,
    debug_stop: Option<Duration>,
    pending_spread: Option<Option<SpreadSpectrum>>,
    fps: f64,
    brightness: u8,
    transients: Transients,
}

impl StateMachine {
    pub fn new(fps: f64, brightness: u8, transients: Transients) -> Self {
        StateMachine {
            stack: vec![listening_context(Instant::now())],
            job_progress: 0,
            ignore_next: false,
            ignore_stop_until: None,
            shutdown: ShutdownPhase::None,
            debug_stop: None,
            pending_spread: None,
            fps: normalize_fps(fps),
            brightness,
            transients,
        }
    }

    /// Applies one event, settling any expired transients first so the
    /// reported transition is truthful.
    pub fn apply(&mut self, event: Event, now: Instant) -> Applied {
        self.expire(now);

        // Runtime settings bypass the state stack and the ignore machinery.
        match &event {
            Event::SetFps(v) => {
                self.fps = normalize_fps(*v);
                info!("fps set to {}", self.fps);
                return Applied::Setting { name: "fps", value: format!("{}", self.fps) };
            }
            Event::SetBrightness(v) => {
                self.brightness = *v;
                info!("brightness set to {}", self.brightness);
                return Applied::Setting { name: "brightness", value: format!("{v}") };
            }
            Event::SpreadSpectrum(cmd) => return self.apply_spread_spectrum(cmd),
            _ => {}
        }

        let old = self.current_label();

        if self.ignore_next && !matches!(&event, Event::IgnoreNextCommand | Event::IgnoreStop) {
            self.ignore_next = false;
            info!("state change ignored! keeping: {}, ignored: {}", old, event.label());
            return Applied::Ignored { attempted: event.label(), kept: old };
        }

        if let Some(until) = self.ignore_stop_until {
            if now >= until {
                self.ignore_stop_until = None;
            } else if is_stop_class(&event) {
                info!("stop command {} dropped, ignore window still open", event.label());
                return Applied::Ignored { attempted: event.label(), kept: old };
            }
        }

        let label = event.label();
        match event {
            Event::Listening => {
                self.replace_base(listening_context(now));
            }
            Event::ListeningColor { color, background } => {
                let anim = Anim::Breathing {
                    color,
                    alt: None,
                    background: background.unwrap_or(color::OFF),
                };
                self.replace_base(AnimationContext::durable(anim, label, now));
            }
            Event::ListeningNet => self.breathe(color::WHITE, None, label, now),
            Event::ListeningAp => self.breathe(color::CHARTREUSE, None, label, now),
            Event::ListeningApAndNet => {
                self.breathe(color::CHARTREUSE, Some(color::WHITE), label, now)
            }
            Event::ListeningFind => self.breathe(color::ORANGE, None, label, now),
            Event::ClientOpened | Event::ReadyToPrintCancel | Event::SlicingCancelled => {
                self.replace_base(AnimationContext::durable(Anim::Idle, label, now));
            }
            Event::ClientClosed => self.breathe(color::ORANGE, None, label, now),
            Event::Error => {
                let anim = Anim::Flash { color: color::RED, speed: 1 };
                self.replace_base(AnimationContext::durable(anim, label, now));
            }

            Event::Shutdown => {
                let anim = Anim::Solid { color: color::RED };
                self.replace_base(AnimationContext::durable(anim, label, now));
                self.shutdown = ShutdownPhase::Final;
                info!("shutdown committed");
            }
            Event::ShutdownPrepare => {
                if !matches!(self.shutdown, ShutdownPhase::Preparing { .. }) {
                    self.stack.truncate(1);
                    let prev = Box::new(self.stack[0].clone());
                    self.stack[0] =
                        AnimationContext::durable(Anim::ShutdownPrepare, label, now);
                    self.shutdown = ShutdownPhase::Preparing { prev };
                }
            }
            Event::ShutdownPrepareCancel => {
                match std::mem::replace(&mut self.shutdown, ShutdownPhase::None) {
                    ShutdownPhase::Preparing { prev } => {
                        self.stack.truncate(1);
                        self.stack[0] = *prev;
                        info!("shutdown cancelled, back to {}", self.current_label());
                    }
                    // a finalized shutdown cannot be taken back
                    other => self.shutdown = other,
                }
            }

            Event::PrintStarted => {
                self.job_progress = 0;
                self.set_progress(0, ProgressStyle::Job, label, now);
            }
            Event::PrintDone | Event::PrintCancelled => {
                self.job_progress = 0;
                let anim = Anim::Sweep { color: color::WHITE };
                self.replace_base(AnimationContext::durable(anim, label, now));
            }
            Event::LaserJobDone => {
                self.job_progress = 0;
                let anim = Anim::Sweep { color: color::GREEN };
                self.replace_base(AnimationContext::durable(anim, label, now));
            }
            Event::JobFinished => {
                let anim = Anim::Sweep { color: color::GREEN };
                self.replace_base(AnimationContext::durable(anim, label, now));
            }
            Event::LaserJobCancelled => {
                self.job_progress = 0;
                self.fade_to_idle(label, now);
            }
            Event::LaserJobFailed | Event::SlicingFailed => self.fade_to_idle(label, now),

            Event::PrintPaused | Event::Pause => {
                let anim = Anim::ProgressPause {
                    pct: self.job_progress,
                    pulse: true,
                    drip: color::BLUE,
                };
                self.replace_base(AnimationContext::durable(anim, label, now));
            }
            Event::PrintPausedTimeout => {
                let anim = Anim::ProgressPause {
                    pct: self.job_progress,
                    pulse: false,
                    drip: color::BLUE,
                };
                self.replace_base(AnimationContext::durable(anim, label, now));
            }
            Event::PrintPausedTimeoutBlock => {
                let pct = self.job_progress;
                let anim = Anim::ProgressPause { pct, pulse: false, drip: color::RED };
                let mut ctx = AnimationContext::durable(anim, label, now);
                ctx.until = Some(Until {
                    at: now + self.transients.paused_block,
                    then: FollowUp::Become {
                        anim: Anim::ProgressPause { pct, pulse: false, drip: color::BLUE },
                        label: "PrintPausedTimeout",
                    },
                });
                self.replace_base(ctx);
            }
            Event::PrintResumed => {
                self.set_progress(self.job_progress, ProgressStyle::Job, label, now);
            }
            Event::Progress(pct) => {
                self.job_progress = pct;
                self.set_progress(pct, ProgressStyle::Job, label, now);
            }
            Event::ReadyToPrint => {
                let anim = Anim::Flash { color: color::BLUE, speed: 2 };
                self.replace_base(AnimationContext::durable(anim, label, now));
            }

            Event::SlicingStarted => {
                self.set_progress(0, ProgressStyle::Slicing, label, now);
            }
            Event::SlicingDone => {
                self.set_progress(100, ProgressStyle::Slicing, label, now);
            }
            Event::SlicingProgress(pct) => {
                self.set_progress(pct, ProgressStyle::Slicing, label, now);
            }

            Event::ButtonPressReject => {
                let anim = Anim::ProgressPause {
                    pct: self.job_progress,
                    pulse: false,
                    drip: color::RED,
                };
                self.push_transient(anim, label, self.transients.button_reject, now);
            }
            Event::Upload => {
                let anim = Anim::Blink { color: color::YELLOW, speed: 8 };
                self.push_transient(anim, label, self.transients.upload, now);
            }
            Event::SettingsUpdated => {
                let anim = Anim::Flash { color: color::WHITE, speed: 1 };
                self.push_transient(anim, label, self.transients.settings_updated, now);
            }

            Event::SolidColor { color, hold_frames } => {
                self.direct(Anim::Solid { color }, label, hold_frames, now);
            }
            Event::Flash { color, speed, hold_frames } => {
                self.direct(Anim::Flash { color, speed }, label, hold_frames, now);
            }
            Event::Blink { color, speed, hold_frames } => {
                self.direct(Anim::Blink { color, speed }, label, hold_frames, now);
            }
            Event::LensCalibration { hold_frames } => {
                self.direct(Anim::Solid { color: color::BLUE }, label, hold_frames, now);
            }
            Event::PngAnimation(file) => {
                let anim = Anim::Png { file };
                self.replace_base(AnimationContext::durable(anim, label, now));
            }

            Event::Rollback => {
                if self.stack.len() > 1 {
                    if let Some(done) = self.stack.pop() {
                        info!("rollback from '{}' to '{}'", done.label, self.current_label());
                    }
                } else {
                    debug!("rollback at stack floor, nothing to pop");
                }
            }
            Event::IgnoreNextCommand => {
                self.ignore_next = true;
            }
            Event::IgnoreStop => {
                self.ignore_next = false;
                let open = self.ignore_stop_until.is_some_and(|u| now < u);
                if open {
                    debug!("ignore_stop window already open, not extending");
                } else {
                    self.ignore_stop_until = Some(now + self.transients.ignore_stop_window);
                    info!(
                        "ignore_stop window open for {:?}",
                        self.transients.ignore_stop_window
                    );
                }
            }
            Event::DebugStop(secs) => {
                self.debug_stop = Some(Duration::from_secs_f64(secs));
                info!("debug stop requested for {}s", secs);
            }

            Event::Unknown(raw) => {
                warn!("don't know about command: {}", raw);
                return Applied::Unknown { raw, state: old };
            }
            Event::SetFps(_) | Event::SetBrightness(_) | Event::SpreadSpectrum(_) => {}
        }

        let now_label = self.current_label();
        if old != now_label {
            info!("state change {} => {}", old, now_label);
        }
        Applied::Ok { old, now: now_label }
    }

    /// Top of the stack after settling deadlines, never empty.
    pub fn current_animation(&mut self, now: Instant) -> AnimationContext {
        self.expire(now);
        self.stack
            .last()
            .cloned()
            .unwrap_or_else(|| listening_context(now))
    }

    /// Read-only view, safe to take from the liveness probe path.
    pub fn snapshot(&self, now: Instant) -> Snapshot {
        Snapshot {
            state: self.current_label(),
            stack: self.stack.iter().map(|c| c.label.clone()).collect(),
            job_progress: self.job_progress,
            fps: self.fps,
            brightness: self.brightness,
            ignore_next: self.ignore_next,
            ignore_stop_active: self.ignore_stop_until.is_some_and(|u| now < u),
            shutdown: match self.shutdown {
                ShutdownPhase::None => "none",
                ShutdownPhase::Preparing { .. } => "preparing",
                ShutdownPhase::Final => "final",
            },
        }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    /// True once `Shutdown` has been committed.
    pub fn finalized(&self) -> bool {
        matches!(self.shutdown, ShutdownPhase::Final)
    }

    /// Hands the pending render-thread stall to the render loop, once.
    pub fn take_debug_stop(&mut self) -> Option<Duration> {
        self.debug_stop.take()
    }

    /// Hands a pending spread-spectrum reconfiguration to the render loop.
    /// `Some(None)` means "switch it off".
    pub fn take_pending_spread(&mut self) -> Option<Option<SpreadSpectrum>> {
        self.pending_spread.take()
    }

    fn apply_spread_spectrum(&mut self, cmd: &SpreadSpectrumCmd) -> Applied {
        match cmd {
            SpreadSpectrumCmd::Off => {
                self.pending_spread = Some(None);
                info!("spread spectrum off");
                Applied::Setting { name: "spread_spectrum", value: "off".to_string() }
            }
            SpreadSpectrumCmd::On {
                center_hz,
                bandwidth_hz,
                channel_width_hz,
                hopping_delay_ms,
                randomized,
            } => {
                let params = SpreadSpectrum {
                    randomized: *randomized,
                    center_hz: *center_hz,
                    bandwidth_hz: *bandwidth_hz,
                    channel_width_hz: *channel_width_hz,
                    hopping_delay: Duration::from_millis(*hopping_delay_ms),
                };
                if let Err(err) = params.validate() {
                    warn!("rejected spread spectrum parameters: {}", err);
                    return Applied::SettingError { name: "spread_spectrum" };
                }
                let value = format!(
                    "freq={}, bandwidth={}, channel_width={}, hopping_delay={}, random:{}",
                    center_hz, bandwidth_hz, channel_width_hz, hopping_delay_ms, randomized
                );
                info!("spread spectrum on: {}", value);
                self.pending_spread = Some(Some(params));
                Applied::Setting { name: "spread_spectrum", value }
            }
        }
    }

    fn current_label(&self) -> String {
        self.stack
            .last()
            .map(|c| c.label.clone())
            .unwrap_or_else(|| "listening".to_string())
    }

    /// Pops or swaps every context whose deadline has passed.
    fn expire(&mut self, now: Instant) {
        while let Some(top) = self.stack.last() {
            let Some(until) = top.until.clone() else { break };
            if now < until.at {
                break;
            }
            match until.then {
                FollowUp::Pop => {
                    if self.stack.len() > 1 {
                        if let Some(done) = self.stack.pop() {
                            debug!(
                                "transient '{}' finished, back to '{}'",
                                done.label,
                                self.current_label()
                            );
                        }
                    } else if let Some(base) = self.stack.last_mut() {
                        base.until = None;
                    }
                }
                FollowUp::Become { mut anim, label } => {
                    if let Anim::Progress { pct, .. } | Anim::ProgressPause { pct, .. } = &mut anim
                    {
                        *pct = self.job_progress;
                    }
                    if let Some(top) = self.stack.last_mut() {
                        *top = AnimationContext::durable(anim, label.to_string(), until.at);
                        info!("state change follow-up => {}", label);
                    }
                }
            }
        }
    }

    fn breathe(&mut self, color: Rgb, alt: Option<Rgb>, label: String, now: Instant) {
        let anim = Anim::Breathing { color, alt, background: color::OFF };
        self.replace_base(AnimationContext::durable(anim, label, now));
    }

    /// Progress updates mutate the base bar in place so the chase phase and
    /// any stacked transient above it are left untouched.
    fn set_progress(&mut self, pct: u8, style: ProgressStyle, label: String, now: Instant) {
        match &mut self.stack[0].anim {
            Anim::Progress { pct: current, style: s } if *s == style => {
                *current = pct;
                self.stack[0].label = label;
            }
            _ => {
                let anim = Anim::Progress { pct, style };
                self.replace_base(AnimationContext::durable(anim, label, now));
            }
        }
    }

    /// Direct color/flash/blink commands: durable without a frame count,
    /// transient with one.
    fn direct(&mut self, anim: Anim, label: String, hold_frames: Option<u32>, now: Instant) {
        match hold_frames {
            Some(frames) => {
                let duration = Duration::from_secs_f64(f64::from(frames) / self.fps);
                self.push_transient(anim, label, duration, now);
            }
            None => self.replace_base(AnimationContext::durable(anim, label, now)),
        }
    }

    fn push_transient(&mut self, anim: Anim, label: String, duration: Duration, now: Instant) {
        if self.stack.len() >= MAX_STACK {
            let evicted = self.stack.remove(1);
            debug!("rollback stack full, dropping oldest transient '{}'", evicted.label);
        }
        let until = Some(Until { at: now + duration, then: FollowUp::Pop });
        self.stack.push(AnimationContext { anim, label, started: now, until });
    }

    /// Swaps the base context. A durable state arriving while shutdown is
    /// being prepared abandons the preparation.
    fn replace_base(&mut self, ctx: AnimationContext) {
        if matches!(self.shutdown, ShutdownPhase::Preparing { .. }) {
            self.shutdown = ShutdownPhase::None;
        }
        self.stack[0] = ctx;
    }

    /// Captures whatever is visible and dims it out, ending in the idle
    /// chase the way a closed client session does.
    fn fade_to_idle(&mut self, label: String, now: Instant) {
        let fade = self.transients.fade;
        let (inner, inner_phase) = match self.stack.last() {
            Some(top) => match &top.anim {
                // restarting a fade keeps dimming the frame it had captured
                Anim::FadeOff { inner, inner_phase, .. } => (inner.clone(), *inner_phase),
                other => (Box::new(other.clone()), now.saturating_duration_since(top.started)),
            },
            None => (Box::new(Anim::Idle), Duration::ZERO),
        };
        let mut ctx = AnimationContext::durable(
            Anim::FadeOff { inner, inner_phase, fade },
            label,
            now,
        );
        ctx.until = Some(Until {
            at: now + fade,
            then: FollowUp::Become { anim: Anim::Idle, label: "ClientOpened" },
        });
        self.stack.truncate(1);
        self.replace_base(ctx);
    }
}

fn listening_context(now: Instant) -> AnimationContext {
    AnimationContext::durable(
        Anim::BreathingStatic { color: color::listening_white() },
        "listening".to_string(),
        now,
    )
}

fn normalize_fps(value: f64) -> f64 {
    if value == 0.0 {
        DEFAULT_FPS
    } else {
        value.abs().max(1.0)
    }
}

fn is_stop_class(event: &Event) -> bool {
    matches!(
        event,
        Event::PrintCancelled | Event::LaserJobCancelled | Event::SlicingCancelled
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::parse;

    fn machine() -> StateMachine {
        StateMachine::new(DEFAULT_FPS, 255, Transients::default())
    }

    #[test]
    fn test_starts_listening() {
        let mut sm = machine();
        let ctx = sm.current_animation(Instant::now());
        assert_eq!(ctx.label, "listening");
        assert!(matches!(ctx.anim, Anim::BreathingStatic { .. }));
    }

    #[test]
    fn test_durable_events_replace_base() {
        let mut sm = machine();
        let t0 = Instant::now();
        sm.apply(Event::PrintStarted, t0);
        sm.apply(Event::ClientOpened, t0);
        let snap = sm.snapshot(t0);
        assert_eq!(snap.stack, vec!["ClientOpened".to_string()]);
    }

    #[test]
    fn test_progress_updates_in_place() {
        let mut sm = machine();
        let t0 = Instant::now();
        sm.apply(Event::PrintStarted, t0);
        let started = sm.current_animation(t0).started;
        sm.apply(Event::Progress(10), t0 + Duration::from_secs(1));
        let ctx = sm.current_animation(t0 + Duration::from_secs(1));
        assert_eq!(ctx.anim, Anim::Progress { pct: 10, style: ProgressStyle::Job });
        assert_eq!(ctx.label, "Progress:10");
        // chase phase is not reset by a percentage update
        assert_eq!(ctx.started, started);
    }

    #[test]
    fn test_transient_pops_back_to_updated_base() {
        let mut sm = machine();
        let t0 = Instant::now();
        sm.apply(Event::PrintStarted, t0);
        sm.apply(Event::Progress(55), t0);
        sm.apply(Event::ButtonPressReject, t0);
        assert!(matches!(
            sm.current_animation(t0).anim,
            Anim::ProgressPause { pct: 55, pulse: false, drip } if drip == color::RED
        ));

        // base keeps receiving updates while the transient is visible
        sm.apply(Event::Progress(60), t0 + Duration::from_millis(10));
        assert_eq!(sm.current_animation(t0 + Duration::from_millis(10)).label, "ButtonPressReject");

        let after = t0 + Duration::from_millis(1100);
        let ctx = sm.current_animation(after);
        assert_eq!(ctx.anim, Anim::Progress { pct: 60, style: ProgressStyle::Job });
        assert_eq!(ctx.label, "Progress:60");
    }

    #[test]
    fn test_stack_is_bounded_and_evicts_oldest_transient() {
        let mut sm = machine();
        let t0 = Instant::now();
        for i in 0..6u32 {
            sm.apply(
                Event::SolidColor { color: crate::color::RED, hold_frames: Some(100 + i) },
                t0,
            );
        }
        let snap = sm.snapshot(t0);
        assert_eq!(snap.stack.len(), 4);
        assert_eq!(snap.stack[0], "listening");
    }

    #[test]
    fn test_explicit_rollback_pops_and_is_noop_at_floor() {
        let mut sm = machine();
        let t0 = Instant::now();
        sm.apply(Event::Upload, t0);
        assert_eq!(sm.current_animation(t0).label, "Upload");
        sm.apply(Event::Rollback, t0);
        assert_eq!(sm.current_animation(t0).label, "listening");
        // at the floor rollback does nothing
        sm.apply(Event::Rollback, t0);
        let snap = sm.snapshot(t0);
        assert_eq!(snap.stack, vec!["listening".to_string()]);
    }

    #[test]
    fn test_ignore_next_drops_exactly_one_event() {
        let mut sm = machine();
        let t0 = Instant::now();
        sm.apply(Event::IgnoreNextCommand, t0);
        let applied = sm.apply(Event::PrintStarted, t0);
        assert_eq!(
            applied,
            Applied::Ignored { attempted: "PrintStarted".to_string(), kept: "listening".to_string() }
        );
        assert_eq!(sm.current_animation(t0).label, "listening");

        // the very next event is applied normally
        let applied = sm.apply(Event::PrintStarted, t0);
        assert!(matches!(applied, Applied::Ok { .. }));
        assert_eq!(sm.current_animation(t0).label, "PrintStarted");
    }

    #[test]
    fn test_ignore_next_passes_flag_setters_through() {
        let mut sm = machine();
        let t0 = Instant::now();
        sm.apply(Event::IgnoreNextCommand, t0);
        sm.apply(Event::IgnoreStop, t0);
        // ignore_stop cleared the pending one-shot flag
        let applied = sm.apply(Event::PrintStarted, t0);
        assert!(matches!(applied, Applied::Ok { .. }));
    }

    #[test]
    fn test_ignore_stop_window_drops_cancels_until_it_expires() {
        let mut sm = machine();
        let t0 = Instant::now();
        sm.apply(Event::PrintStarted, t0);
        sm.apply(Event::Progress(40), t0);
        sm.apply(Event::IgnoreStop, t0);

        let inside = t0 + Duration::from_secs(5);
        let applied = sm.apply(Event::PrintCancelled, inside);
        assert!(matches!(applied, Applied::Ignored { .. }));
        assert_eq!(sm.current_animation(inside).label, "Progress:40");

        // a second trigger does not extend the window
        sm.apply(Event::IgnoreStop, inside);
        let outside = t0 + Duration::from_secs(11);
        let applied = sm.apply(Event::PrintCancelled, outside);
        assert!(matches!(applied, Applied::Ok { .. }));
        assert!(matches!(sm.current_animation(outside).anim, Anim::Sweep { .. }));
    }

    #[test]
    fn test_unknown_leaves_state_untouched() {
        let mut sm = machine();
        let t0 = Instant::now();
        sm.apply(Event::PrintStarted, t0);
        let applied = sm.apply(parse("fnord:12"), t0);
        assert_eq!(
            applied,
            Applied::Unknown { raw: "fnord:12".to_string(), state: "PrintStarted".to_string() }
        );
        assert_eq!(sm.current_animation(t0).label, "PrintStarted");
    }

    #[test]
    fn test_shutdown_prepare_can_be_cancelled() {
        let mut sm = machine();
        let t0 = Instant::now();
        sm.apply(Event::PrintStarted, t0);
        sm.apply(Event::Progress(30), t0);
        sm.apply(Event::ShutdownPrepare, t0);
        assert_eq!(sm.current_animation(t0).anim, Anim::ShutdownPrepare);
        assert!(!sm.finalized());

        sm.apply(Event::ShutdownPrepareCancel, t0);
        let ctx = sm.current_animation(t0);
        assert_eq!(ctx.label, "Progress:30");
        assert_eq!(ctx.anim, Anim::Progress { pct: 30, style: ProgressStyle::Job });
    }

    #[test]
    fn test_shutdown_finalizes() {
        let mut sm = machine();
        let t0 = Instant::now();
        sm.apply(Event::Shutdown, t0);
        assert!(sm.finalized());
        assert_eq!(sm.current_animation(t0).anim, Anim::Solid { color: color::RED });
    }

    #[test]
    fn test_paused_block_becomes_paused_timeout() {
        let mut sm = machine();
        let t0 = Instant::now();
        sm.apply(Event::Progress(70), t0);
        sm.apply(Event::PrintPausedTimeoutBlock, t0);
        assert!(matches!(
            sm.current_animation(t0).anim,
            Anim::ProgressPause { drip, .. } if drip == color::RED
        ));

        let later = t0 + Duration::from_millis(1100);
        let ctx = sm.current_animation(later);
        assert_eq!(ctx.label, "PrintPausedTimeout");
        assert!(matches!(
            ctx.anim,
            Anim::ProgressPause { pct: 70, pulse: false, drip } if drip == color::BLUE
        ));
    }

    #[test]
    fn test_fade_off_captures_frame_then_idles() {
        let mut sm = machine();
        let t0 = Instant::now();
        sm.apply(Event::Progress(80), t0);
        sm.apply(Event::LaserJobFailed, t0 + Duration::from_secs(2));
        let ctx = sm.current_animation(t0 + Duration::from_secs(2));
        match ctx.anim {
            Anim::FadeOff { inner, inner_phase, .. } => {
                assert_eq!(*inner, Anim::Progress { pct: 80, style: ProgressStyle::Job });
                assert_eq!(inner_phase, Duration::from_secs(2));
            }
            other => panic!("expected fade, got {other:?}"),
        }

        let ctx = sm.current_animation(t0 + Duration::from_secs(3));
        assert_eq!(ctx.anim, Anim::Idle);
        assert_eq!(ctx.label, "ClientOpened");
    }

    #[test]
    fn test_settings_bypass_ignore_machinery() {
        let mut sm = machine();
        let t0 = Instant::now();
        sm.apply(Event::IgnoreNextCommand, t0);
        let applied = sm.apply(Event::SetBrightness(40), t0);
        assert_eq!(applied, Applied::Setting { name: "brightness", value: "40".to_string() });
        assert_eq!(sm.brightness(), 40);
        // the one-shot flag is still armed
        let applied = sm.apply(Event::PrintStarted, t0);
        assert!(matches!(applied, Applied::Ignored { .. }));
    }

    #[test]
    fn test_fps_setting_normalizes() {
        let mut sm = machine();
        let t0 = Instant::now();
        sm.apply(Event::SetFps(0.0), t0);
        assert_eq!(sm.fps(), DEFAULT_FPS);
        sm.apply(Event::SetFps(-12.0), t0);
        assert_eq!(sm.fps(), 12.0);
        sm.apply(Event::SetFps(0.2), t0);
        assert_eq!(sm.fps(), 1.0);
    }

    #[test]
    fn test_spread_spectrum_setting_is_validated() {
        let mut sm = machine();
        let t0 = Instant::now();
        let applied = sm.apply(parse("spread_spectrum:on:800000:200000:9000:50:rand"), t0);
        assert!(matches!(applied, Applied::Setting { name: "spread_spectrum", .. }));
        let pending = sm.take_pending_spread();
        assert!(matches!(pending, Some(Some(_))));
        assert!(sm.take_pending_spread().is_none());

        // bandwidth wider than twice the center cannot form a channel grid
        let applied = sm.apply(parse("spread_spectrum:on:100000:300000:9000:50"), t0);
        assert_eq!(applied, Applied::SettingError { name: "spread_spectrum" });
    }

    #[test]
    fn test_debug_stop_is_handed_over_once() {
        let mut sm = machine();
        let t0 = Instant::now();
        sm.apply(Event::DebugStop(1.5), t0);
        assert_eq!(sm.take_debug_stop(), Some(Duration::from_millis(1500)));
        assert_eq!(sm.take_debug_stop(), None);
    }
}
