//! pi-companion: voice and vision companion for a Raspberry Pi
//!
//! Captures audio and images on the Pi, sends them to a remote inference
//! service, and plays back the spoken answer. Three front-ends:
//! - `menu`: numbered interactive menu over all modes
//! - `run <mode>`: one mode in a loop, stepped by Enter or a GPIO button
//! - `supervise`: GPIO buttons switch between single-mode programs,
//!   keeping at most one running

mod artifact;
mod config;
mod console;
mod devices;
mod dispatch;
mod error;
mod events;
mod lifecycle;
mod mode;
mod session;
mod supervisor;

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::console::Console;
use crate::devices::{Camera, CaptureTrigger, Immediate, Microphone, Speaker};
use crate::dispatch::HttpDispatcher;
use crate::events::{SessionEvent, SupervisorEvent};
use crate::lifecycle::ShutdownSignal;
use crate::mode::Mode;
use crate::session::{SessionDevices, SessionMachine};
use crate::supervisor::{
    BindingTable, ButtonListener, InputLine, OsLauncher, PlaybackGuard, Supervisor,
    SupervisorTimings, SysfsGpioLine,
};

#[derive(Debug, Parser)]
#[command(name = "pi-companion", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive numbered menu over all modes (default)
    Menu,
    /// Run one mode in a loop
    Run {
        mode: Mode,
        /// GPIO line that starts each cycle instead of Enter
        #[arg(long)]
        button_line: Option<u32>,
    },
    /// Switch between mode programs with GPIO buttons
    Supervise,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout belongs to the menu
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!(version = env!("CARGO_PKG_VERSION"), "pi-companion starting");

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    info!(server_url = %config.server_url, "configuration loaded");

    let shutdown = CancellationToken::new();
    let signal_watch = ShutdownSignal::new()
        .context("failed to register signal handlers")?
        .cancel_on_signal(shutdown.clone());

    let result = match cli.command.unwrap_or(Command::Menu) {
        Command::Menu => menu(&config, &shutdown).await,
        Command::Run { mode, button_line } => run(&config, mode, button_line, &shutdown).await,
        Command::Supervise => supervise(&config, cli.config.as_deref(), &shutdown).await,
    };

    shutdown.cancel();
    let _ = signal_watch.await;
    info!("pi-companion stopped");

    result
}

async fn menu(config: &Config, shutdown: &CancellationToken) -> Result<()> {
    let console = Arc::new(Console::stdin().context("failed to start stdin reader")?);
    let trigger: Arc<dyn CaptureTrigger> = console.clone();
    let mut machine = build_machine(config, Some(trigger.clone()), trigger)?;

    console::run_menu(&console, &mut machine, shutdown).await;
    Ok(())
}

async fn run(
    config: &Config,
    mode: Mode,
    button_line: Option<u32>,
    shutdown: &CancellationToken,
) -> Result<()> {
    info!(%mode, ?button_line, "single-mode program");

    match button_line {
        Some(line) => {
            // the press starts the cycle; nothing waits on the keyboard
            let mut machine = build_machine(config, None, Arc::new(Immediate))?;
            let input: Arc<dyn InputLine> = Arc::new(
                SysfsGpioLine::open(&config.supervisor.gpio_root, line)
                    .with_context(|| format!("failed to open GPIO line {line}"))?,
            );
            let mut guard = PlaybackGuard::start(
                input,
                config.supervisor.guard_lockout(),
                config.supervisor.edge_poll(),
                config.supervisor.settle(),
            )?;
            console::run_guarded(&mut guard, &mut machine, mode, shutdown).await;
            guard.stop();
        }
        None => {
            let console = Arc::new(Console::stdin().context("failed to start stdin reader")?);
            let trigger: Arc<dyn CaptureTrigger> = console.clone();
            let mut machine = build_machine(config, Some(trigger.clone()), trigger)?;
            console::run_interactive(&console, &mut machine, mode, shutdown).await;
        }
    }
    Ok(())
}

async fn supervise(
    config: &Config,
    config_path: Option<&Path>,
    shutdown: &CancellationToken,
) -> Result<()> {
    let exe = std::env::current_exe().context("cannot locate own executable")?;
    let bindings = BindingTable::from_config(&config.supervisor.bindings, &exe, config_path);
    if bindings.is_empty() {
        anyhow::bail!("no button bindings configured");
    }

    let mut lines: Vec<Arc<dyn InputLine>> = Vec::with_capacity(bindings.len());
    for line in bindings.lines() {
        let input = SysfsGpioLine::open(&config.supervisor.gpio_root, line)
            .with_context(|| format!("failed to open GPIO line {line}"))?;
        lines.push(Arc::new(input));
    }

    // Listener thread -> supervisor loop
    let (button_tx, button_rx) = mpsc::channel(32);
    // Supervisor -> event log
    let (event_tx, event_rx) = broadcast::channel::<SupervisorEvent>(64);
    let logger = spawn_event_logger(event_rx, "supervisor");

    let listener = ButtonListener::new(
        button_tx,
        lines.clone(),
        config.supervisor.lockout(),
        config.supervisor.edge_poll(),
    );
    let timings = SupervisorTimings {
        settle: config.supervisor.settle(),
        termination_grace: config.supervisor.termination_grace(),
    };

    for line in bindings.lines() {
        if let Some(program) = bindings.resolve(line) {
            println!("Button on GPIO {line}: {program}");
        }
    }
    println!("Program switcher running. Press Ctrl+C to exit.");

    let supervisor = Supervisor::new(bindings, lines, Arc::new(OsLauncher), timings, event_tx);
    supervisor::supervise(supervisor, listener, button_rx, shutdown.clone()).await?;

    let _ = logger.await;
    Ok(())
}

/// Wire real devices and the HTTP dispatcher into a session machine
fn build_machine(
    config: &Config,
    record_trigger: Option<Arc<dyn CaptureTrigger>>,
    capture_trigger: Arc<dyn CaptureTrigger>,
) -> Result<SessionMachine> {
    config
        .ensure_dirs()
        .context("failed to create artifact directories")?;

    let mut microphone = Microphone::new(config.microphone.clone(), config.audio_capture_dir());
    if let Some(trigger) = record_trigger {
        microphone = microphone.with_trigger(trigger);
    }
    let devices = SessionDevices {
        microphone: Arc::new(microphone),
        camera: Arc::new(Camera::new(
            config.camera.clone(),
            config.image_capture_dir(),
            capture_trigger,
        )),
        speaker: Arc::new(Speaker::new(&config.speaker)),
    };
    let dispatcher = Arc::new(
        HttpDispatcher::from_config(config).context("failed to build HTTP client")?,
    );

    let (event_tx, event_rx) = broadcast::channel::<SessionEvent>(64);
    spawn_event_logger(event_rx, "session");

    Ok(SessionMachine::new(devices, dispatcher, event_tx))
}

/// Forward events to the log until every sender is gone
fn spawn_event_logger<E>(
    mut rx: broadcast::Receiver<E>,
    source: &'static str,
) -> tokio::task::JoinHandle<()>
where
    E: Display + Clone + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => debug!(source, %event, "event"),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(source, skipped = n, "event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
