//! `tagnav-middleware` – event routing and the motion-controller seam.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels.
//! - [`adapter`] – [`MotionController`], the trait the reacher drives the
//!   robot through.
//! - [`bus_controller`] – [`BusMotionController`], a [`MotionController`]
//!   that publishes commands on the bus.

pub mod adapter;
pub mod bus;
pub mod bus_controller;

pub use adapter::MotionController;
pub use bus::{EventBus, Topic, TopicReceiver};
pub use bus_controller::BusMotionController;
