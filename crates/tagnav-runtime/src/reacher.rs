//! [`TargetReacher`] – the single-dispatch event handler that ties search,
//! resolution and motion together.
//!
//! Events are handled strictly one at a time, in arrival order:
//!
//! * **Marker batch** – an empty batch is ignored.  Otherwise the search
//!   machine latches (a stop twist is sent on the transition), and, unless a
//!   goal has already been resolved, the first id is resolved through the
//!   [`GoalResolver`] and sent to the [`MotionController`].  A failed
//!   resolution leaves the reacher unresolved so a later batch can retry.
//! * **Goal reached** – `reached = false` is ignored.  Otherwise the search
//!   machine decides between one in-place rotation and holding still.
//!
//! [`TargetReacher::run`] drives the handler from the event bus and reports
//! resolution failures on [`Topic::SystemAlerts`].

use std::sync::{Arc, Weak};

use tagnav_middleware::{EventBus, MotionController, Topic, TopicReceiver};
use tagnav_types::{Event, EventPayload, Goal, MarkerId, NavError, NavEvent, VelocityCommand};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::resolver::GoalResolver;
use crate::search::{SearchAction, SearchState, SearchStateMachine};

const SOURCE: &str = "tagnav-runtime::reacher";

/// Snapshot published after every handled event.
#[derive(Debug, Clone, PartialEq)]
pub struct ReacherStatus {
    pub search_state: SearchState,
    /// Last goal handed to the motion controller.
    pub goal: Option<Goal>,
    /// `true` once a marker has been turned into a goal.
    pub resolved: bool,
    /// Events handled so far, successful or not.
    pub handled: u64,
}

/// What handling one event did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// One rotation command was sent.
    Rotated(VelocityCommand),
    /// Goal reached after detection; nothing sent.
    Held,
    /// The event required no action.
    Ignored,
    /// A marker was resolved and its goal sent.
    GoalResolved(Goal),
}

pub struct TargetReacher {
    search: SearchStateMachine,
    resolver: GoalResolver,
    controller: Arc<dyn MotionController>,
    working_frame: String,
    resolved: Option<Goal>,
    status: watch::Sender<ReacherStatus>,
}

impl TargetReacher {
    pub fn new(
        resolver: GoalResolver,
        controller: Arc<dyn MotionController>,
        working_frame: impl Into<String>,
        search: SearchStateMachine,
    ) -> Self {
        let (status, _) = watch::channel(ReacherStatus {
            search_state: search.state(),
            goal: None,
            resolved: false,
            handled: 0,
        });
        Self {
            search,
            resolver,
            controller,
            working_frame: working_frame.into(),
            resolved: None,
            status,
        }
    }

    /// Watch the reacher's progress.
    pub fn subscribe(&self) -> watch::Receiver<ReacherStatus> {
        self.status.subscribe()
    }

    pub fn search_state(&self) -> SearchState {
        self.search.state()
    }

    pub fn resolved_goal(&self) -> Option<Goal> {
        self.resolved
    }

    /// Send the catalog's initial goal so the robot heads to the search area.
    pub async fn start(&mut self) -> Result<(), NavError> {
        let goal = self.resolver.catalog().initial_goal();
        info!(x = goal.x, y = goal.y, "sending initial search goal");
        self.controller.set_goal(goal).await?;
        self.status.send_modify(|s| s.goal = Some(goal));
        Ok(())
    }

    /// Handle a single event.
    ///
    /// # Errors
    ///
    /// Resolution errors ([`NavError::UnknownMarkerId`],
    /// [`NavError::FrameUnavailable`], …) and controller errors are returned
    /// as-is.  The reacher stays usable afterwards.
    #[instrument(skip(self), fields(working_frame = %self.working_frame))]
    pub async fn handle(&mut self, event: &NavEvent) -> Result<Outcome, NavError> {
        let outcome = self.dispatch(event).await;
        self.publish_status();
        outcome
    }

    /// Consume `events` until the bus closes, i.e. until every strong
    /// [`EventBus`] handle has been dropped.
    ///
    /// Alerts go out through `bus`, which is only held weakly so the loop
    /// itself never keeps the bus open.  A controller publishing on the same
    /// bus does keep it open; abort the task to stop it in that case.
    pub async fn run(mut self, mut events: TopicReceiver, bus: Weak<EventBus>) {
        info!(working_frame = %self.working_frame, "target reacher running");
        while let Some(event) = events.next().await {
            let EventPayload::Nav(nav) = event.payload else {
                continue;
            };
            match self.handle(&nav).await {
                Ok(outcome) => debug!(?outcome, "event handled"),
                Err(e) => {
                    warn!(error = %e, "event handling failed");
                    if let NavEvent::MarkerObserved(observation) = &nav
                        && let Some(marker_id) = observation.first_id()
                    {
                        let alert = Event::new(
                            SOURCE,
                            EventPayload::ResolutionFailed {
                                marker_id,
                                reason: e.to_string(),
                            },
                        );
                        if let Some(bus) = bus.upgrade() {
                            let _ = bus.publish_to(Topic::SystemAlerts, alert);
                        }
                    }
                }
            }
        }
        info!("event bus closed; target reacher stopped");
    }

    async fn dispatch(&mut self, event: &NavEvent) -> Result<Outcome, NavError> {
        match event {
            NavEvent::MarkerObserved(observation) => match observation.first_id() {
                Some(marker_id) => self.on_marker(marker_id).await,
                None => {
                    debug!("empty marker batch ignored");
                    Ok(Outcome::Ignored)
                }
            },
            NavEvent::GoalReached { reached: false } => {
                debug!("goal not reached; ignored");
                Ok(Outcome::Ignored)
            }
            NavEvent::GoalReached { reached: true } => match self.search.on_goal_reached() {
                SearchAction::Rotate(command) => {
                    debug!(angular_z = command.angular_z, "still searching; rotating");
                    self.controller.send_velocity(command).await?;
                    Ok(Outcome::Rotated(command))
                }
                SearchAction::Hold => Ok(Outcome::Held),
            },
        }
    }

    async fn on_marker(&mut self, marker_id: MarkerId) -> Result<Outcome, NavError> {
        if self.search.on_marker_observed() {
            info!(marker_id, "marker detected; search stopped");
            if let Err(e) = self.controller.send_velocity(VelocityCommand::stop()).await {
                warn!(error = %e, "stop command not delivered");
            }
        }

        if let Some(goal) = self.resolved {
            debug!(marker_id, x = goal.x, y = goal.y, "goal already resolved; batch ignored");
            return Ok(Outcome::Ignored);
        }

        let goal = self.resolver.resolve(marker_id, &self.working_frame).await?;
        self.controller.set_goal(goal).await?;
        self.resolved = Some(goal);
        info!(marker_id, x = goal.x, y = goal.y, "goal sent to motion controller");
        Ok(Outcome::GoalResolved(goal))
    }

    fn publish_status(&self) {
        let search_state = self.search.state();
        let resolved = self.resolved;
        self.status.send_modify(|s| {
            s.search_state = search_state;
            s.resolved = resolved.is_some();
            s.handled += 1;
            if resolved.is_some() {
                s.goal = resolved;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tagnav_perception::TfClient;
    use tagnav_types::MarkerObservation;

    use crate::catalog::{DEFAULT_EXPECTED_MARKERS, DestinationCatalog};

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Goal(Goal),
        Velocity(VelocityCommand),
    }

    #[derive(Default)]
    struct RecordingController {
        sent: Mutex<Vec<Sent>>,
        /// Number of upcoming `set_goal` calls to refuse.
        goal_failures: AtomicUsize,
    }

    impl RecordingController {
        fn refusing_goals(n: usize) -> Self {
            Self {
                goal_failures: AtomicUsize::new(n),
                ..Default::default()
            }
        }

        fn goals(&self) -> Vec<Goal> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter_map(|s| match s {
                    Sent::Goal(g) => Some(*g),
                    Sent::Velocity(_) => None,
                })
                .collect()
        }

        fn velocities(&self) -> Vec<VelocityCommand> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter_map(|s| match s {
                    Sent::Velocity(v) => Some(*v),
                    Sent::Goal(_) => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl MotionController for RecordingController {
        async fn set_goal(&self, goal: Goal) -> Result<(), NavError> {
            let refuse = self
                .goal_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refuse {
                return Err(NavError::Controller("rejected".to_string()));
            }
            self.sent.lock().unwrap().push(Sent::Goal(goal));
            Ok(())
        }

        async fn send_velocity(&self, command: VelocityCommand) -> Result<(), NavError> {
            self.sent.lock().unwrap().push(Sent::Velocity(command));
            Ok(())
        }
    }

    fn reacher(controller: Arc<RecordingController>) -> TargetReacher {
        let catalog = DestinationCatalog::new(
            "map",
            Goal::new(1.0, -1.5),
            [(0, (1.0, 2.0)), (1, (2.0, 3.0)), (2, (-1.0, -2.0)), (3, (1.0, -2.0))],
            &DEFAULT_EXPECTED_MARKERS,
        )
        .unwrap();
        let graph = Arc::new(TfClient::new(Duration::from_millis(200)));
        let resolver = GoalResolver::new(Arc::new(catalog), graph);
        TargetReacher::new(resolver, controller, "map", SearchStateMachine::new(0.2))
    }

    fn markers(ids: &[u32]) -> NavEvent {
        NavEvent::MarkerObserved(MarkerObservation::new(ids.to_vec()))
    }

    const REACHED: NavEvent = NavEvent::GoalReached { reached: true };

    #[tokio::test]
    async fn start_sends_initial_goal() {
        let controller = Arc::new(RecordingController::default());
        let mut reacher = reacher(controller.clone());
        reacher.start().await.unwrap();
        assert_eq!(controller.goals(), vec![Goal::new(1.0, -1.5)]);
        assert_eq!(reacher.subscribe().borrow().goal, Some(Goal::new(1.0, -1.5)));
    }

    #[tokio::test]
    async fn rotates_once_per_goal_reached_while_searching() {
        let controller = Arc::new(RecordingController::default());
        let mut reacher = reacher(controller.clone());

        for _ in 0..3 {
            let outcome = reacher.handle(&REACHED).await.unwrap();
            assert_eq!(outcome, Outcome::Rotated(VelocityCommand::rotate(0.2)));
        }
        assert_eq!(controller.velocities().len(), 3);
        assert!(controller.goals().is_empty());
    }

    #[tokio::test]
    async fn goal_not_reached_is_ignored() {
        let controller = Arc::new(RecordingController::default());
        let mut reacher = reacher(controller.clone());
        let outcome = reacher
            .handle(&NavEvent::GoalReached { reached: false })
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Ignored);
        assert!(controller.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_batch_changes_nothing() {
        let controller = Arc::new(RecordingController::default());
        let mut reacher = reacher(controller.clone());
        assert_eq!(reacher.handle(&markers(&[])).await.unwrap(), Outcome::Ignored);
        assert_eq!(reacher.search_state(), SearchState::Searching);
        assert!(controller.sent.lock().unwrap().is_empty());
        assert_eq!(reacher.subscribe().borrow().handled, 1);
    }

    #[tokio::test]
    async fn first_batch_latches_stops_and_sends_goal() {
        let controller = Arc::new(RecordingController::default());
        let mut reacher = reacher(controller.clone());

        let outcome = reacher.handle(&markers(&[1, 3])).await.unwrap();
        assert_eq!(outcome, Outcome::GoalResolved(Goal::new(2.0, 3.0)));
        assert_eq!(reacher.search_state(), SearchState::MarkerDetected);
        assert_eq!(
            *controller.sent.lock().unwrap(),
            vec![Sent::Velocity(VelocityCommand::stop()), Sent::Goal(Goal::new(2.0, 3.0))]
        );

        let status = reacher.subscribe().borrow().clone();
        assert!(status.resolved);
        assert_eq!(status.goal, Some(Goal::new(2.0, 3.0)));
    }

    #[tokio::test]
    async fn repeated_batches_send_a_single_goal() {
        let controller = Arc::new(RecordingController::default());
        let mut reacher = reacher(controller.clone());

        reacher.handle(&markers(&[1])).await.unwrap();
        for ids in [[1], [2], [0]] {
            assert_eq!(reacher.handle(&markers(&ids)).await.unwrap(), Outcome::Ignored);
        }
        assert_eq!(controller.goals(), vec![Goal::new(2.0, 3.0)]);
        assert_eq!(controller.velocities(), vec![VelocityCommand::stop()]);
    }

    #[tokio::test]
    async fn no_rotation_after_detection() {
        let controller = Arc::new(RecordingController::default());
        let mut reacher = reacher(controller.clone());

        reacher.handle(&REACHED).await.unwrap();
        reacher.handle(&markers(&[0])).await.unwrap();
        for _ in 0..3 {
            assert_eq!(reacher.handle(&REACHED).await.unwrap(), Outcome::Held);
        }
        // One search rotation, then the stop on detection.
        assert_eq!(
            controller.velocities(),
            vec![VelocityCommand::rotate(0.2), VelocityCommand::stop()]
        );
    }

    #[tokio::test]
    async fn unknown_marker_latches_but_sends_no_goal() {
        let controller = Arc::new(RecordingController::default());
        let mut reacher = reacher(controller.clone());

        let err = reacher.handle(&markers(&[9])).await.unwrap_err();
        assert_eq!(err, NavError::UnknownMarkerId(9));
        assert_eq!(reacher.search_state(), SearchState::MarkerDetected);
        assert!(controller.goals().is_empty());
        assert_eq!(reacher.resolved_goal(), None);

        // A known marker afterwards still resolves.
        let outcome = reacher.handle(&markers(&[2])).await.unwrap();
        assert_eq!(outcome, Outcome::GoalResolved(Goal::new(-1.0, -2.0)));
    }

    #[tokio::test]
    async fn rejected_goal_is_not_recorded() {
        let controller = Arc::new(RecordingController::refusing_goals(usize::MAX));
        let mut reacher = reacher(controller.clone());

        let err = reacher.handle(&markers(&[1])).await.unwrap_err();
        assert!(matches!(err, NavError::Controller(_)));
        assert_eq!(reacher.resolved_goal(), None);
        assert!(!reacher.subscribe().borrow().resolved);
    }

    #[tokio::test]
    async fn retry_after_refused_goal_resolves_the_new_marker() {
        let controller = Arc::new(RecordingController::refusing_goals(1));
        let mut reacher = reacher(controller.clone());

        // Marker 1 is published and resolved, but the controller refuses it.
        let err = reacher.handle(&markers(&[1])).await.unwrap_err();
        assert!(matches!(err, NavError::Controller(_)));

        // The retry republishes the destination for marker 2 and must not
        // read back the relation left over from marker 1.
        let outcome = reacher.handle(&markers(&[2])).await.unwrap();
        assert_eq!(outcome, Outcome::GoalResolved(Goal::new(-1.0, -2.0)));
        assert_eq!(reacher.resolved_goal(), Some(Goal::new(-1.0, -2.0)));
        assert_eq!(controller.goals(), vec![Goal::new(-1.0, -2.0)]);
    }

    #[tokio::test]
    async fn run_dispatches_bus_events_and_alerts_on_failure() -> Result<(), Box<dyn std::error::Error>> {
        let controller = Arc::new(RecordingController::default());
        let reacher = reacher(controller.clone());
        let mut status = reacher.subscribe();

        let bus = Arc::new(EventBus::default());
        let events = bus.subscribe_to(Topic::Detections);
        let mut alerts = bus.subscribe_to(Topic::SystemAlerts);
        let task = tokio::spawn(reacher.run(events, Arc::downgrade(&bus)));

        bus.publish_to(Topic::Detections, Event::new("test", EventPayload::Nav(markers(&[7]))))?;
        let alert = tokio::time::timeout(Duration::from_secs(1), alerts.recv()).await??;
        assert!(matches!(alert.payload, EventPayload::ResolutionFailed { marker_id: 7, .. }));

        bus.publish_to(Topic::Detections, Event::new("test", EventPayload::Nav(markers(&[3]))))?;
        tokio::time::timeout(Duration::from_secs(1), status.wait_for(|s| s.resolved)).await??;
        assert_eq!(controller.goals(), vec![Goal::new(1.0, -2.0)]);

        task.abort();
        Ok(())
    }

    #[tokio::test]
    async fn run_returns_once_the_bus_is_dropped() {
        let reacher = reacher(Arc::new(RecordingController::default()));
        let bus = Arc::new(EventBus::default());
        let task = tokio::spawn(reacher.run(bus.subscribe_to(Topic::Detections), Arc::downgrade(&bus)));

        drop(bus);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("run should return when the bus closes")
            .unwrap();
    }
}
