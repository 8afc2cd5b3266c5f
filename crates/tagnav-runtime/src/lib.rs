//! `tagnav-runtime` – marker-driven goal resolution.
//!
//! # Modules
//!
//! - [`search`] – [`SearchStateMachine`][search::SearchStateMachine]: keeps
//!   the robot rotating in place until the first marker is seen, then latches.
//! - [`catalog`] – [`DestinationCatalog`][catalog::DestinationCatalog]:
//!   immutable marker id → destination table loaded at startup.
//! - [`resolver`] – [`GoalResolver`][resolver::GoalResolver]: publishes a
//!   marker's destination into the frame graph and reads it back in the
//!   motion controller's working frame.
//! - [`reacher`] – [`TargetReacher`][reacher::TargetReacher]: single-dispatch
//!   handler for marker batches and goal-reached notifications, driven from
//!   the event bus.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: initialises
//!   the global `tracing` subscriber with an optional OTLP span exporter.

pub mod catalog;
pub mod reacher;
pub mod resolver;
pub mod search;
pub mod telemetry;

pub use catalog::{DEFAULT_EXPECTED_MARKERS, DestinationCatalog};
pub use reacher::{Outcome, ReacherStatus, TargetReacher};
pub use resolver::{FINAL_DESTINATION_FRAME, GoalResolver};
pub use search::{DEFAULT_ROTATION_SPEED, SearchAction, SearchState, SearchStateMachine};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
