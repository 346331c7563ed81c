// Command dispatch for the control socket and CLI.
//
// Two inputs are answered without touching the state machine: an empty
// command returns the daemon version and "?" returns a debug snapshot.
// Everything else is parsed into an event and applied.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::event;
use crate::state::{Applied, StateMachine};

pub const VERSION: &str = concat!("ledstripd v", env!("CARGO_PKG_VERSION"));

/// Shared entry point for all transports. Cheap to clone, one per
/// connection task.
#[derive(Clone)]
pub struct Dispatcher {
    state: Arc<Mutex<StateMachine>>,
}

impl Dispatcher {
    pub fn new(state: Arc<Mutex<StateMachine>>) -> Self {
        Dispatcher { state }
    }

    /// Handles one raw command line and returns the response text.
    pub async fn handle(&self, raw: &str) -> String {
        let raw = raw.trim();
        if raw.is_empty() {
            return VERSION.to_string();
        }
        if raw == "?" || raw.eq_ignore_ascii_case("info") {
            return self.info();
        }

        let event = event::parse(raw);
        let applied = self.state.lock().await.apply(event, Instant::now());
        match applied {
            Applied::Ok { old, now } => format!("OK {now}   # {old} -> {now}"),
            Applied::Ignored { attempted, kept } => {
                format!("IGNORED {attempted}   # {kept} -> {kept}")
            }
            Applied::Unknown { raw, state } => format!("ERROR {raw}   # {state} -> {state}"),
            Applied::Setting { name, value } => format!("OK setting {name} -> {value}"),
            Applied::SettingError { name } => format!("ERROR setting {name}"),
        }
    }

    /// Builds the `?` response. Uses try_lock so the probe answers even
    /// while the state lock is held elsewhere.
    fn info(&self) -> String {
        let mut lines = vec![
            "INFO:".to_string(),
            format!("version: {}", env!("CARGO_PKG_VERSION")),
        ];
        match self.state.try_lock() {
            Ok(machine) => {
                let snap = machine.snapshot(Instant::now());
                lines.push(format!(
                    "LEDS: state:{}, stack:{:?}, job_progress:{}, fps:{}, brightness:{}, ignore_next:{}, ignore_stop:{}, shutdown:{}",
                    snap.state,
                    snap.stack,
                    snap.job_progress,
                    snap.fps,
                    snap.brightness,
                    snap.ignore_next,
                    snap.ignore_stop_active,
                    snap.shutdown,
                ));
            }
            Err(_) => lines.push("LEDS: busy, state lock held".to_string()),
        }
        let mut commands: Vec<&str> = event::COMMANDS.to_vec();
        commands.sort_unstable();
        lines.push(format!("COMMANDS: {}", commands.join(" ")));
        lines.push(String::new());
        lines.join("\n")
    }
}
