//! LED strip daemon.
//!
//! Listens for machine lifecycle commands on a Unix socket and renders
//! the matching animation onto a WS281x strip at a fixed frame rate.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::Mutex;
use tracing::{info, warn};

use ledstripd::config::Config;
use ledstripd::png::PngLibrary;
use ledstripd::state::StateMachine;
use ledstripd::{dispatch, render, server};
use ledstripd_driver::{LedStrip, MemoryStrip, SpiStrip};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_CONFIG: &str = "/etc/ledstripd.toml";

/// LED strip daemon translating machine events into animations
#[derive(Parser)]
#[command(name = "ledstripd", version = VERSION, about)]
struct Cli {
    /// Config file location, defaults apply when the file is absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the control socket path from the config
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Render into memory instead of SPI hardware
    #[arg(long)]
    memory_strip: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => {
            Config::load(path).with_context(|| format!("loading config {}", path.display()))
        }
        None => {
            let path = Path::new(DEFAULT_CONFIG);
            if path.exists() {
                Config::load(path).with_context(|| format!("loading config {}", path.display()))
            } else {
                Ok(Config::default())
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    info!("ledstripd v{} starting", VERSION);
    let config = load_config(&cli)?;
    let socket_path = cli
        .socket
        .clone()
        .unwrap_or_else(|| config.server.socket_path.clone());

    let strip: Box<dyn LedStrip> = if cli.memory_strip {
        info!("memory strip, {} LEDs, frames stay in process", config.strip.led_count);
        Box::new(MemoryStrip::new(config.strip.led_count))
    } else {
        let spi = SpiStrip::open(
            Path::new(&config.strip.spi_device),
            config.strip.led_count,
            config.strip.freq_hz,
            config.strip.invert,
            config.spread_spectrum_params(),
        )
        .with_context(|| format!("opening SPI strip on {}", config.strip.spi_device))?;
        Box::new(spi)
    };

    let machine = StateMachine::new(
        config.strip.fps,
        config.strip.brightness,
        config.transients(),
    );
    let state = Arc::new(Mutex::new(machine));
    let png = PngLibrary::new(
        config.png.folder.clone(),
        config.png.max_bytes,
        config.strip.led_count,
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
    })
    .context("installing signal handler")?;

    let dispatcher = dispatch::Dispatcher::new(Arc::clone(&state));
    let control = server::bind(&socket_path)
        .with_context(|| format!("binding control socket {}", socket_path.display()))?;
    let listener = tokio::spawn(server::run(control, dispatcher));

    render::run(state, strip, png, running).await;

    listener.abort();
    match std::fs::remove_file(&socket_path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(
            "could not remove socket file {}: {}",
            socket_path.display(),
            err
        ),
    }
    info!("ledstripd stopped");
    Ok(())
}
