use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Integer identity of a fiducial marker as reported by the detector.
pub type MarkerId = u32;

/// A navigation target expressed in the motion controller's working frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub x: f64,
    pub y: f64,
}

impl Goal {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One batch of marker detections.  Only the first id is acted upon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerObservation {
    pub marker_ids: Vec<MarkerId>,
    #[serde(default = "Utc::now")]
    pub stamp: DateTime<Utc>,
}

impl MarkerObservation {
    /// Build a batch stamped with the current time.
    pub fn new(marker_ids: Vec<MarkerId>) -> Self {
        Self {
            marker_ids,
            stamp: Utc::now(),
        }
    }

    /// The id the pipeline acts on, or `None` for an empty batch.
    pub fn first_id(&self) -> Option<MarkerId> {
        self.marker_ids.first().copied()
    }
}

/// A configured destination for one marker, relative to `reference_frame`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationEntry {
    pub reference_frame: String,
    pub x: f64,
    pub y: f64,
}

/// Planar twist sent to the robot's velocity topic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocityCommand {
    /// Forward velocity in m/s.
    pub linear_x: f64,
    /// Yaw rate in rad/s.
    pub angular_z: f64,
}

impl VelocityCommand {
    /// Rotate in place at `angular_z` rad/s.
    pub fn rotate(angular_z: f64) -> Self {
        Self {
            linear_x: 0.0,
            angular_z,
        }
    }

    /// All-zero twist.
    pub fn stop() -> Self {
        Self::rotate(0.0)
    }
}

/// Inbound events driving the target reacher.
///
/// Serialised with an `event` tag so replay files read naturally:
///
/// ```json
/// {"event": "marker_observed", "marker_ids": [1]}
/// {"event": "goal_reached", "reached": true}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NavEvent {
    /// The detector reported a (possibly empty) batch of markers.
    MarkerObserved(MarkerObservation),
    /// The motion controller reported on its current target.
    GoalReached { reached: bool },
}

/// Unified event wrapper for the in-process event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "tagnav-cli::console"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// Detection or goal-status input for the reacher.
    Nav(NavEvent),
    /// "Set goal" request for the motion controller.
    SetGoal(Goal),
    /// Velocity command for the robot base.
    Velocity(VelocityCommand),
    /// A marker could not be turned into a goal.
    ResolutionFailed { marker_id: MarkerId, reason: String },
}

/// Error type shared by every tagnav crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NavError {
    #[error("Missing required parameter: {0}")]
    ConfigurationMissing(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("No destination configured for marker {0}")]
    UnknownMarkerId(MarkerId),

    #[error("Frame unavailable: {target_frame} <- {source_frame}: {details}")]
    FrameUnavailable {
        target_frame: String,
        source_frame: String,
        details: String,
    },

    #[error("Frame {child} cannot be re-parented to {parent}; it is a child of {previous}")]
    ChangingParent {
        child: String,
        parent: String,
        previous: String,
    },

    #[error("Event bus error: {0}")]
    Channel(String),

    #[error("Motion controller error: {0}")]
    Controller(String),
}
