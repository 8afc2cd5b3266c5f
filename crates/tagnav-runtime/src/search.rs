//! [`SearchStateMachine`] – rotate-until-seen gate.
//!
//! While no marker has been seen the robot keeps scanning: every time the
//! motion controller reports it reached its target, the machine asks for an
//! in-place rotation.  The first marker observation latches the machine into
//! [`SearchState::MarkerDetected`] for the rest of the run, after which no
//! rotation is ever requested again.
//!
//! # Example
//!
//! ```rust
//! use tagnav_runtime::search::{SearchAction, SearchState, SearchStateMachine};
//!
//! let mut search = SearchStateMachine::new(0.2);
//! assert!(matches!(search.on_goal_reached(), SearchAction::Rotate(_)));
//!
//! assert!(search.on_marker_observed());
//! assert!(!search.on_marker_observed()); // already latched
//! assert_eq!(search.state(), SearchState::MarkerDetected);
//! assert_eq!(search.on_goal_reached(), SearchAction::Hold);
//! ```

use tagnav_types::VelocityCommand;

/// Yaw rate used while scanning for a marker, in rad/s.
pub const DEFAULT_ROTATION_SPEED: f64 = 0.2;

/// Search progress.  The only transition is `Searching → MarkerDetected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Searching,
    MarkerDetected,
}

/// What to do in response to a goal-reached notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchAction {
    /// Keep scanning with this in-place rotation.
    Rotate(VelocityCommand),
    /// Do not rotate.
    Hold,
}

#[derive(Debug)]
pub struct SearchStateMachine {
    state: SearchState,
    rotation_speed: f64,
}

impl Default for SearchStateMachine {
    fn default() -> Self {
        Self::new(DEFAULT_ROTATION_SPEED)
    }
}

impl SearchStateMachine {
    /// Start in [`SearchState::Searching`], scanning at `rotation_speed`.
    pub fn new(rotation_speed: f64) -> Self {
        Self {
            state: SearchState::Searching,
            rotation_speed,
        }
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    /// Exactly one rotation command while searching, none once latched.
    pub fn on_goal_reached(&self) -> SearchAction {
        match self.state {
            SearchState::Searching => SearchAction::Rotate(VelocityCommand::rotate(self.rotation_speed)),
            SearchState::MarkerDetected => SearchAction::Hold,
        }
    }

    /// Latch the detected state.  Returns `true` only for the call that
    /// performed the transition.
    pub fn on_marker_observed(&mut self) -> bool {
        let transitioned = self.state == SearchState::Searching;
        self.state = SearchState::MarkerDetected;
        transitioned
    }
}
