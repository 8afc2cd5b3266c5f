//! REPL – operator console for feeding detections by hand.
//!
//! Supported slash-commands:
//!   /marker <id>...      – publish a marker batch (first id is acted upon)
//!   /reached [true|false] – publish a goal-reached notification
//!   /status              – show search state and current goal
//!   /frames              – list frames known to the frame graph
//!   /help                – show this list
//!   /quit | /exit        – exit the CLI

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use tagnav_middleware::{EventBus, Topic};
use tagnav_perception::TfClient;
use tagnav_runtime::{ReacherStatus, SearchState};
use tagnav_types::{Event, EventPayload, MarkerId, MarkerObservation, NavEvent};
use tokio::sync::watch;

const SOURCE: &str = "tagnav-cli::console";

/// Handles the console needs into the running pipeline.
pub struct Console {
    pub bus: Arc<EventBus>,
    pub status: watch::Receiver<ReacherStatus>,
    pub graph: Arc<TfClient>,
    pub working_frame: String,
}

/// A parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Marker(Vec<MarkerId>),
    Reached(bool),
    Status,
    Frames,
    Help,
    Quit,
}

/// Parse one trimmed, non-empty console line.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let head = words.next().unwrap_or_default();
    let rest: Vec<&str> = words.collect();

    match head {
        "/marker" => {
            let ids = rest
                .iter()
                .map(|w| w.parse::<MarkerId>().map_err(|_| format!("'{w}' is not a marker id")))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Command::Marker(ids))
        }
        "/reached" => match rest.as_slice() {
            [] | ["true"] => Ok(Command::Reached(true)),
            ["false"] => Ok(Command::Reached(false)),
            _ => Err("usage: /reached [true|false]".to_string()),
        },
        "/status" => Ok(Command::Status),
        "/frames" => Ok(Command::Frames),
        "/help" => Ok(Command::Help),
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("Unknown command: '{other}'")),
    }
}

/// Entry point for the interactive REPL.  Returns on `/quit` or EOF.
pub fn run(console: Console) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{} ", "tagnav>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_command(line) {
            Ok(Command::Marker(ids)) => {
                let batch = NavEvent::MarkerObserved(MarkerObservation::new(ids));
                publish(&console.bus, batch);
            }
            Ok(Command::Reached(reached)) => publish(&console.bus, NavEvent::GoalReached { reached }),
            Ok(Command::Status) => cmd_status(&console),
            Ok(Command::Frames) => cmd_frames(&console),
            Ok(Command::Help) => cmd_help(),
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                break;
            }
            Err(e) => println!(
                "{} Type {} for available commands.",
                e.red(),
                "/help".bold()
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn publish(bus: &EventBus, event: NavEvent) {
    if let Err(e) = bus.publish_to(Topic::Detections, Event::new(SOURCE, EventPayload::Nav(event))) {
        println!("{}: {}", "Publish failed".red(), e);
    }
}

fn cmd_help() {
    println!();
    println!("{}", "tagnav Commands".bold().underline());
    println!("  {}  – publish a marker batch", "/marker <id>...".bold().cyan());
    println!("  {} – publish a goal-reached notification", "/reached [bool]".bold().cyan());
    println!("  {}          – search state and current goal", "/status".bold().cyan());
    println!("  {}          – frames in the frame graph", "/frames".bold().cyan());
    println!("  {}     – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_status(console: &Console) {
    let status = console.status.borrow().clone();
    let state = match status.search_state {
        SearchState::Searching => "searching".yellow(),
        SearchState::MarkerDetected => "marker detected".green(),
    };
    println!("{}", "Reacher Status".bold().underline());
    println!("  Search state : {}", state);
    match status.goal {
        Some(goal) => println!(
            "  Goal ({})   : ({:.3}, {:.3}){}",
            console.working_frame,
            goal.x,
            goal.y,
            if status.resolved { " resolved".green() } else { " initial".dimmed() }
        ),
        None => println!("  Goal         : {}", "none".dimmed()),
    }
    println!("  Events       : {}", status.handled);
}

fn cmd_frames(console: &Console) {
    let frames = console.graph.frames();
    println!("{}", "Frame Graph".bold().underline());
    if frames.is_empty() {
        println!("  {}", "no frames published yet".dimmed());
    }
    for frame in frames {
        println!("    • {}", frame.bold());
    }
}
