// ledstripd - LED strip daemon for machine status display
// Event parsing, animation state machine, render loop and socket server

pub mod anim;
pub mod color;
pub mod config;
pub mod dispatch;
pub mod event;
pub mod png;
pub mod render;
pub mod server;
pub mod state;

pub use config::Config;
pub use dispatch::Dispatcher;
pub use event::Event;
pub use state::StateMachine;
