//! `tagnav-cli` – tagnav Command Line Interface
//!
//! This binary wires the marker-to-goal pipeline together.  It:
//!
//! 1. Loads the parameter file (`--config`, `TAGNAV_CONFIG` or
//!    `./tagnav.toml`) and exits with status 1 when a required key is
//!    missing.
//! 2. Seeds the frame graph, starts the target reacher and sends the initial
//!    search goal.
//! 3. Prints every motion command and alert the pipeline produces.
//! 4. Feeds detections either from a replay file (`--replay <file.jsonl>`) or
//!    from an **interactive REPL**.
//! 5. Intercepts **Ctrl-C** to publish a zero twist and exit.

mod config;
mod replay;
mod repl;

use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use tagnav_middleware::{BusMotionController, EventBus, Topic, TopicReceiver};
use tagnav_perception::TfClient;
use tagnav_runtime::{GoalResolver, SearchStateMachine, TargetReacher};
use tagnav_types::{Event, EventPayload, VelocityCommand};

/// Slack added to the lookup timeout when waiting on a replayed event.
const REPLAY_MARGIN: Duration = Duration::from_secs(1);

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG sets the filter; TAGNAV_LOG_FORMAT=json switches to JSON.
    // User-facing output still uses println!.
    let _guard = tagnav_runtime::init_tracing("tagnav");

    let args = Args::parse();

    print_banner();

    let path = args.config;
    let cfg = match config::load_from(&path) {
        Ok(cfg) => {
            println!("  Parameters loaded from {}", path.display().to_string().bold());
            cfg
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "parameter file rejected");
            eprintln!("{}: {}", "Config error".red(), e);
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start Tokio runtime".red(), e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cfg, args.replay)) {
        eprintln!("{}: {}", "Error".red(), e);
        std::process::exit(1);
    }
}

async fn run(cfg: config::Config, replay_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let bus = Arc::new(EventBus::default());

    // Subscribe before anything is published; the bus rejects sends with no
    // receiver.
    let motion = bus.subscribe_to(Topic::MotionCommands);
    let alerts = bus.subscribe_to(Topic::SystemAlerts);
    tokio::spawn(print_outputs(motion, alerts));

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let bus_ctrlc = bus.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the robot …".yellow().bold());
        let stop = Event::new("tagnav-cli", EventPayload::Velocity(VelocityCommand::stop()));
        match bus_ctrlc.publish_to(Topic::MotionCommands, stop) {
            Ok(_) => println!("{}", "  ✓ Zero twist published.".green()),
            Err(e) => println!("{}: {}", "  Stop command failed".red(), e),
        }
        std::process::exit(130);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the robot will not be stopped on Ctrl-C");
    }

    // ── Pipeline ──────────────────────────────────────────────────────────
    let graph = Arc::new(TfClient::with_engine(
        cfg.seeded_engine()?,
        cfg.navigation.lookup_timeout(),
    ));
    let resolver = GoalResolver::new(Arc::new(cfg.catalog.clone()), graph.clone());
    let mut reacher = TargetReacher::new(
        resolver,
        Arc::new(BusMotionController::new(bus.clone())),
        cfg.navigation.working_frame.clone(),
        SearchStateMachine::new(cfg.navigation.rotation_speed),
    );
    if let Err(e) = reacher.start().await {
        warn!(error = %e, "initial search goal not delivered");
    }
    let status = reacher.subscribe();
    tokio::spawn(reacher.run(bus.subscribe_to(Topic::Detections), Arc::downgrade(&bus)));

    println!(
        "  Working frame {} · {} destinations in {}",
        cfg.navigation.working_frame.bold(),
        cfg.catalog.marker_ids().count(),
        cfg.catalog.reference_frame().bold()
    );

    match replay_path {
        Some(path) => {
            let per_event = cfg.navigation.lookup_timeout() + REPLAY_MARGIN;
            let last = replay::run(&path, &bus, status, per_event).await?;
            // Let the printer drain the final commands.
            tokio::time::sleep(Duration::from_millis(50)).await;
            match last.goal {
                Some(goal) if last.resolved => println!(
                    "\n  {} Goal resolved: ({:.3}, {:.3})",
                    "✓".green().bold(),
                    goal.x,
                    goal.y
                ),
                _ => println!("\n  {} No marker was resolved.", "•".yellow()),
            }
        }
        None => {
            println!();
            println!("  Type {} for a list of commands.\n", "/help".bold().cyan());
            let console = repl::Console {
                bus: bus.clone(),
                status,
                graph,
                working_frame: cfg.navigation.working_frame.clone(),
            };
            tokio::task::spawn_blocking(move || repl::run(console)).await?;
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

/// Print motion commands and alerts until both topics close.
async fn print_outputs(mut motion: TopicReceiver, mut alerts: TopicReceiver) {
    loop {
        tokio::select! {
            Some(event) = motion.next() => match event.payload {
                EventPayload::SetGoal(goal) => println!(
                    "  {} set goal ({:.3}, {:.3})",
                    "→".cyan().bold(),
                    goal.x,
                    goal.y
                ),
                EventPayload::Velocity(cmd) => println!(
                    "  {} twist linear.x={:.2} angular.z={:.2}",
                    "↻".cyan().bold(),
                    cmd.linear_x,
                    cmd.angular_z
                ),
                _ => {}
            },
            Some(event) = alerts.next() => {
                if let EventPayload::ResolutionFailed { marker_id, reason } = event.payload {
                    println!("  {} marker {}: {}", "✗".red().bold(), marker_id, reason.red());
                }
            }
            else => break,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Arguments
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug, PartialEq)]
#[command(name = "tagnav", version, about = "Marker-driven goal resolution")]
struct Args {
    /// Parameter file.
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "TAGNAV_CONFIG",
        default_value = config::DEFAULT_CONFIG_FILE
    )]
    config: PathBuf,

    /// Replay a JSON-lines event file instead of starting the console.
    #[arg(short, long, value_name = "EVENTS")]
    replay: Option<PathBuf>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("  {} {}",
        "tagnav".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Marker-driven goal resolution");
    println!();
}
