//! Replay mode – feeds a JSON-lines file of [`NavEvent`]s through the bus.
//!
//! One event per line; blank lines and lines starting with `#` are skipped:
//!
//! ```text
//! {"event": "goal_reached", "reached": true}
//! {"event": "marker_observed", "marker_ids": [2, 0]}
//! ```
//!
//! Each event is published on [`Topic::Detections`] and the next one is only
//! sent after the reacher reports it handled, so a replay is deterministic.

use std::path::Path;
use std::time::Duration;

use tagnav_middleware::{EventBus, Topic};
use tagnav_runtime::ReacherStatus;
use tagnav_types::{Event, EventPayload, NavError, NavEvent};
use tokio::sync::watch;
use tracing::info;

const SOURCE: &str = "tagnav-cli::replay";

/// Parse a replay file's contents.
pub fn parse_events(raw: &str) -> Result<Vec<NavEvent>, NavError> {
    raw.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(n, line)| {
            serde_json::from_str(line)
                .map_err(|e| NavError::ConfigurationInvalid(format!("replay line {n}: {e}")))
        })
        .collect()
}

/// Read and replay `path`.  Returns the reacher status after the last event.
///
/// `per_event` bounds how long to wait for each event to be handled; it must
/// exceed the frame lookup timeout.
pub async fn run(
    path: &Path,
    bus: &EventBus,
    status: watch::Receiver<ReacherStatus>,
    per_event: Duration,
) -> Result<ReacherStatus, NavError> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        NavError::ConfigurationInvalid(format!("cannot read {}: {e}", path.display()))
    })?;
    let events = parse_events(&raw)?;
    info!(path = %path.display(), events = events.len(), "replaying events");
    replay(events, bus, status, per_event).await
}

async fn replay(
    events: Vec<NavEvent>,
    bus: &EventBus,
    mut status: watch::Receiver<ReacherStatus>,
    per_event: Duration,
) -> Result<ReacherStatus, NavError> {
    let mut expected = status.borrow_and_update().handled;
    for event in events {
        bus.publish_to(Topic::Detections, Event::new(SOURCE, EventPayload::Nav(event)))?;
        expected += 1;
        tokio::time::timeout(per_event, status.wait_for(|s| s.handled >= expected))
            .await
            .map_err(|_| NavError::Channel(format!("event {expected} not handled in time")))?
            .map_err(|_| NavError::Channel("target reacher stopped".to_string()))?;
    }
    let last = status.borrow().clone();
    Ok(last)
}
