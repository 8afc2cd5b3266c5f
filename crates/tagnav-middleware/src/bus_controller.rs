//! [`BusMotionController`] – motion controller adapter backed by the event
//! bus.
//!
//! Goals become [`EventPayload::SetGoal`] and twists become
//! [`EventPayload::Velocity`] events on [`Topic::MotionCommands`], where a
//! bridge (or the CLI's command printer) picks them up.

use std::sync::Arc;

use async_trait::async_trait;
use tagnav_types::{Event, EventPayload, Goal, NavError, VelocityCommand};
use tracing::debug;

use crate::adapter::MotionController;
use crate::bus::{EventBus, Topic};

const SOURCE: &str = "tagnav-middleware::motion";

/// Publishes motion commands onto the [`EventBus`].
pub struct BusMotionController {
    bus: Arc<EventBus>,
}

impl BusMotionController {
    /// Create a new [`BusMotionController`] backed by the given [`EventBus`].
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl MotionController for BusMotionController {
    async fn set_goal(&self, goal: Goal) -> Result<(), NavError> {
        debug!(x = goal.x, y = goal.y, "publishing goal");
        self.bus
            .publish_to(Topic::MotionCommands, Event::new(SOURCE, EventPayload::SetGoal(goal)))
            .map(|_| ())
            .map_err(|e| NavError::Controller(format!("goal not delivered: {e}")))
    }

    async fn send_velocity(&self, command: VelocityCommand) -> Result<(), NavError> {
        debug!(
            linear_x = command.linear_x,
            angular_z = command.angular_z,
            "publishing velocity command"
        );
        self.bus
            .publish_to(
                Topic::MotionCommands,
                Event::new(SOURCE, EventPayload::Velocity(command)),
            )
            .map(|_| ())
            .map_err(|e| NavError::Controller(format!("velocity command not delivered: {e}")))
    }
}
