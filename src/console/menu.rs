//! Menu and single-mode loops

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{say, Console};
use crate::mode::Mode;
use crate::session::{CycleOutcome, SessionMachine};
use crate::supervisor::PlaybackGuard;

const EXIT_CHOICE: &str = "5";

fn print_menu() {
    say("");
    say("=== Pi Companion ===");
    for mode in Mode::ALL {
        say(&format!("{}. {}", mode.menu_number(), mode.title()));
    }
    say(&format!("{EXIT_CHOICE}. Exit"));
}

fn report(mode: Mode, outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Completed { response } => {
            say(&format!("Playback complete ({})", response.path().display()))
        }
        CycleOutcome::Failed { error } => say(&format!("{} failed: {error}", mode.title())),
        CycleOutcome::Cancelled => say("Cancelled"),
    }
}

async fn cycle(machine: &mut SessionMachine, mode: Mode, shutdown: &CancellationToken) {
    let outcome = machine.run_cycle(mode, &shutdown.child_token()).await;
    debug!(%mode, status = %machine.status(), "cycle returned");
    report(mode, &outcome);
}

/// The numbered menu. Returns on Exit, end of input, or shutdown.
pub async fn run_menu(
    console: &Console,
    machine: &mut SessionMachine,
    shutdown: &CancellationToken,
) {
    while !shutdown.is_cancelled() {
        print_menu();
        let Some(choice) = console.prompt("\nChoose option (1-5): ", shutdown).await else {
            break;
        };
        let choice = choice.trim();
        if choice == EXIT_CHOICE || choice.eq_ignore_ascii_case("q") {
            break;
        }

        match Mode::from_menu_choice(choice) {
            Some(Mode::AudiobookPlayback) => audiobook_loop(console, machine, shutdown).await,
            Some(mode) => {
                say(&format!("\n=== {} ===", mode.title()));
                cycle(machine, mode, shutdown).await;
            }
            None => say("\nInvalid choice. Please try again."),
        }
    }
    say("\nGoodbye");
}

/// Play one sentence, then Enter for the next; `b` or `q` goes back
async fn audiobook_loop(
    console: &Console,
    machine: &mut SessionMachine,
    shutdown: &CancellationToken,
) {
    let mode = Mode::AudiobookPlayback;
    say(&format!("\n=== {} ===", mode.title()));
    loop {
        cycle(machine, mode, shutdown).await;
        loop {
            let Some(input) = console
                .prompt("Press Enter for next sentence, 'b' to go back to main menu: ", shutdown)
                .await
            else {
                return;
            };
            match input.trim() {
                "" => break,
                "b" | "B" | "q" | "Q" => return,
                _ => say("Invalid input"),
            }
        }
    }
}

/// One mode, one cycle per Enter, until `q`, end of input, or shutdown
pub async fn run_interactive(
    console: &Console,
    machine: &mut SessionMachine,
    mode: Mode,
    shutdown: &CancellationToken,
) {
    say(&format!("=== {} ===", mode.title()));
    while let Some(input) = console
        .prompt("Press Enter to start, 'q' to quit: ", shutdown)
        .await
    {
        if input.trim().eq_ignore_ascii_case("q") {
            break;
        }
        cycle(machine, mode, shutdown).await;
    }
    info!(%mode, "single-mode loop finished");
}

/// One mode, one cycle per button press. Presses during a cycle are dropped.
pub async fn run_guarded(
    guard: &mut PlaybackGuard,
    machine: &mut SessionMachine,
    mode: Mode,
    shutdown: &CancellationToken,
) {
    say(&format!("=== {} ===", mode.title()));
    say("Press the button to start, Ctrl+C to exit");
    while guard.next_press(shutdown).await {
        cycle(machine, mode, shutdown).await;
        guard.discard_pending();
    }
    info!(%mode, "button loop finished");
}
