// Fixed-rate render loop.
//
// One task owns the strip. Each tick reads the state machine once inside
// a short critical section, renders the current animation and pushes the
// frame. Ticks the loop falls behind on are skipped, never queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use ledstripd_driver::{LedStrip, Rgb};

use crate::anim;
use crate::color;
use crate::png::PngLibrary;
use crate::state::{Anim, StateMachine};

pub async fn run(
    state: Arc<Mutex<StateMachine>>,
    mut strip: Box<dyn LedStrip>,
    mut png: PngLibrary,
    running: Arc<AtomicBool>,
) {
    let n = strip.len();
    let mut fps = state.lock().await.fps();
    let mut brightness = 255;
    let mut interval = tick_interval(fps);
    info!("render loop up: {} LEDs at {} fps", n, fps);

    loop {
        interval.tick().await;
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let (machine_now, context, current_fps, stall, spread, finalized) = {
            let mut machine = state.lock().await;
            let now = Instant::now();
            let context = machine.current_animation(now);
            brightness = machine.brightness();
            (
                now,
                context,
                machine.fps(),
                machine.take_debug_stop(),
                machine.take_pending_spread(),
                machine.finalized(),
            )
        };

        if let Some(stall) = stall {
            warn!("debug stop: render loop sleeping {:?}", stall);
            tokio::time::sleep(stall).await;
        }

        if current_fps != fps {
            fps = current_fps;
            interval = tick_interval(fps);
            debug!("render interval now {} fps", fps);
        }

        if let Some(params) = spread {
            if let Err(err) = strip.set_spread_spectrum(params) {
                warn!("spread spectrum reconfiguration failed: {}", err);
            }
        }

        let phase = machine_now.saturating_duration_since(context.started);
        let frame = render_frame(&context.anim, phase, n, fps, &mut png);
        if let Err(err) = strip.render(&frame, brightness) {
            warn!("frame render failed: {}", err);
        }

        if finalized {
            info!("shutdown frame pushed, render loop exiting");
            break;
        }
    }

    // Parting frame: a faint red so a still-powered strip shows the
    // daemon is gone.
    if let Err(err) = strip.render(&vec![color::EXIT_RED; n], brightness) {
        warn!("exit frame failed: {}", err);
    }
}

fn tick_interval(fps: f64) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / fps.max(1.0)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Renders one frame, routing PNG-backed programs through the library.
fn render_frame(
    anim: &Anim,
    phase: Duration,
    n: usize,
    fps: f64,
    png: &mut PngLibrary,
) -> Vec<Rgb> {
    match anim {
        Anim::Png { file } => png.frame(file, phase, fps),
        Anim::FadeOff { inner, inner_phase, fade } => {
            if let Anim::Png { file } = inner.as_ref() {
                anim::fade(png.frame(file, *inner_phase, fps), phase, *fade)
            } else {
                anim::render(anim, phase, n, fps)
            }
        }
        _ => anim::render(anim, phase, n, fps),
    }
}
