//! The motion-controller seam.
//!
//! The reacher never drives the robot directly.  It hands goals and velocity
//! commands to a [`MotionController`]; adapters translate those into whatever
//! the outside world speaks.
//!
//! - [`BusMotionController`][crate::bus_controller::BusMotionController] –
//!   publishes commands on the [`EventBus`][crate::bus::EventBus]
//!   `MotionCommands` topic.

use async_trait::async_trait;
use tagnav_types::{Goal, NavError, VelocityCommand};

/// Every motion-controller adapter must implement this trait.
///
/// # Contract
///
/// * `set_goal` – replaces the controller's current target with `goal`,
///   expressed in the controller's working frame.
/// * `send_velocity` – forwards a raw twist to the robot base.
#[async_trait]
pub trait MotionController: Send + Sync {
    async fn set_goal(&self, goal: Goal) -> Result<(), NavError>;

    async fn send_velocity(&self, command: VelocityCommand) -> Result<(), NavError>;
}
