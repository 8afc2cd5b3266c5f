//! [`GoalResolver`] – marker id → goal in the working frame.
//!
//! Resolution runs in four steps:
//!
//! 1. look the marker up in the [`DestinationCatalog`];
//! 2. publish the destination into the frame graph as the static frame
//!    [`FINAL_DESTINATION_FRAME`], child of the entry's reference frame;
//! 3. query that frame's position in the working frame (the frame graph
//!    waits, bounded, for the publication to propagate);
//! 4. return the translation as a [`Goal`].
//!
//! An unknown marker fails at step 1, before anything is published.

use std::sync::Arc;

use chrono::Utc;
use tagnav_perception::{FrameGraph, LookupTime};
use tagnav_types::{Goal, MarkerId, NavError};
use tracing::{debug, info, instrument};

use crate::catalog::DestinationCatalog;

/// Name of the frame published for each resolved destination.
pub const FINAL_DESTINATION_FRAME: &str = "final_destination";

pub struct GoalResolver {
    catalog: Arc<DestinationCatalog>,
    graph: Arc<dyn FrameGraph>,
}

impl GoalResolver {
    pub fn new(catalog: Arc<DestinationCatalog>, graph: Arc<dyn FrameGraph>) -> Self {
        Self { catalog, graph }
    }

    pub fn catalog(&self) -> &DestinationCatalog {
        &self.catalog
    }

    /// Resolve `marker_id` into a goal expressed in `working_frame`.
    ///
    /// # Errors
    ///
    /// * [`NavError::UnknownMarkerId`] – no destination configured; nothing
    ///   is published.
    /// * [`NavError::FrameUnavailable`] – the destination could not be
    ///   related to `working_frame` before the lookup timeout.
    /// * [`NavError::ChangingParent`] / [`NavError::Channel`] – the
    ///   publication itself was refused.
    #[instrument(skip(self))]
    pub async fn resolve(&self, marker_id: MarkerId, working_frame: &str) -> Result<Goal, NavError> {
        let entry = self.catalog.lookup(marker_id)?;
        debug!(
            marker_id,
            reference_frame = %entry.reference_frame,
            x = entry.x,
            y = entry.y,
            "destination found"
        );

        self.graph
            .publish_static(FINAL_DESTINATION_FRAME, &entry.reference_frame, entry.x, entry.y)
            .await?;

        let (x, y) = self
            .graph
            .query(working_frame, FINAL_DESTINATION_FRAME, LookupTime::At(Utc::now()))
            .await?;

        info!(marker_id, working_frame, x, y, "goal resolved");
        Ok(Goal::new(x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tagnav_perception::{TfClient, TfEngine, Transform3D};
    use tagnav_perception::transform::Vec3;

    use crate::catalog::DEFAULT_EXPECTED_MARKERS;

    const EPS: f64 = 1e-9;

    /// Frame graph double: one fixed working←reference relation, immediate
    /// propagation, and a switch that makes every query fail.
    struct FakeGraph {
        working_frame: String,
        reference_frame: String,
        working_from_reference: Transform3D,
        available: bool,
        published: Mutex<Vec<(String, String, f64, f64)>>,
    }

    impl FakeGraph {
        fn new(working: &str, reference: &str, working_from_reference: Transform3D) -> Self {
            Self {
                working_frame: working.to_string(),
                reference_frame: reference.to_string(),
                working_from_reference,
                available: true,
                published: Mutex::new(Vec::new()),
            }
        }

        fn publications(&self) -> usize {
            self.published.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl FrameGraph for FakeGraph {
        async fn publish_static(
            &self,
            child_frame: &str,
            parent_frame: &str,
            x: f64,
            y: f64,
        ) -> Result<(), NavError> {
            self.published.lock().unwrap().push((
                child_frame.to_string(),
                parent_frame.to_string(),
                x,
                y,
            ));
            Ok(())
        }

        async fn query(
            &self,
            target_frame: &str,
            source_frame: &str,
            _at: LookupTime,
        ) -> Result<(f64, f64), NavError> {
            let unavailable = || NavError::FrameUnavailable {
                target_frame: target_frame.to_string(),
                source_frame: source_frame.to_string(),
                details: "fake graph".to_string(),
            };
            if !self.available {
                return Err(unavailable());
            }
            let published = self.published.lock().unwrap();
            let (_, parent, x, y) = published
                .iter()
                .rev()
                .find(|(child, ..)| child == source_frame)
                .ok_or_else(unavailable)?;
            if parent == target_frame {
                return Ok((*x, *y));
            }
            if *parent == self.reference_frame && target_frame == self.working_frame {
                let p = self.working_from_reference.apply(Vec3::new(*x, *y, 0.0));
                return Ok((p.x, p.y));
            }
            Err(unavailable())
        }
    }

    fn catalog(frame: &str) -> Arc<DestinationCatalog> {
        Arc::new(
            DestinationCatalog::new(
                frame,
                Goal::new(0.0, 0.0),
                [(0, (1.0, 2.0)), (1, (2.0, 3.0)), (2, (-1.0, -2.0)), (3, (4.0, -0.5))],
                &DEFAULT_EXPECTED_MARKERS,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn resolves_every_marker_through_fixed_relation() {
        // origin1 sits at (0.5, -1.0) in odom, yawed +90°:
        // (x, y) in origin1 is (0.5 - y, -1.0 + x) in odom.
        let graph = Arc::new(FakeGraph::new(
            "odom",
            "origin1",
            Transform3D::from_xy_yaw(0.5, -1.0, FRAC_PI_2),
        ));
        let catalog = catalog("origin1");
        let resolver = GoalResolver::new(catalog.clone(), graph.clone());

        for id in catalog.marker_ids() {
            let entry = catalog.lookup(id).unwrap();
            let goal = resolver.resolve(id, "odom").await.unwrap();
            assert!((goal.x - (0.5 - entry.y)).abs() < EPS, "marker {id}: x={}", goal.x);
            assert!((goal.y - (-1.0 + entry.x)).abs() < EPS, "marker {id}: y={}", goal.y);
        }
        assert_eq!(graph.publications(), 4);
    }

    #[tokio::test]
    async fn publishes_final_destination_under_reference_frame() {
        let graph = Arc::new(FakeGraph::new("odom", "origin1", Transform3D::identity()));
        let resolver = GoalResolver::new(catalog("origin1"), graph.clone());

        resolver.resolve(2, "odom").await.unwrap();

        let published = graph.published.lock().unwrap();
        assert_eq!(
            published.as_slice(),
            &[(FINAL_DESTINATION_FRAME.to_string(), "origin1".to_string(), -1.0, -2.0)]
        );
    }

    #[tokio::test]
    async fn unknown_marker_has_no_frame_side_effects() {
        let graph = Arc::new(FakeGraph::new("odom", "origin1", Transform3D::identity()));
        let resolver = GoalResolver::new(catalog("origin1"), graph.clone());

        let err = resolver.resolve(4, "odom").await.unwrap_err();
        assert_eq!(err, NavError::UnknownMarkerId(4));
        assert_eq!(graph.publications(), 0);
    }

    #[tokio::test]
    async fn unavailable_graph_surfaces_frame_unavailable() {
        let mut fake = FakeGraph::new("odom", "origin1", Transform3D::identity());
        fake.available = false;
        let graph = Arc::new(fake);
        let resolver = GoalResolver::new(catalog("origin1"), graph.clone());

        let err = resolver.resolve(0, "odom").await.unwrap_err();
        assert!(matches!(err, NavError::FrameUnavailable { .. }));
        assert_eq!(graph.publications(), 1);
    }

    #[tokio::test]
    async fn identity_case_through_real_frame_graph_is_exact() {
        let graph = Arc::new(TfClient::new(Duration::from_secs(1)));
        let resolver = GoalResolver::new(catalog("map"), graph);

        let goal = resolver.resolve(1, "map").await.unwrap();
        assert_eq!(goal, Goal::new(2.0, 3.0));
    }

    #[tokio::test]
    async fn back_to_back_markers_resolve_to_their_own_goals() {
        let graph = Arc::new(TfClient::new(Duration::from_secs(1)));
        let resolver = GoalResolver::new(catalog("map"), graph);

        assert_eq!(resolver.resolve(1, "map").await.unwrap(), Goal::new(2.0, 3.0));
        assert_eq!(resolver.resolve(2, "map").await.unwrap(), Goal::new(-1.0, -2.0));
        assert_eq!(resolver.resolve(1, "map").await.unwrap(), Goal::new(2.0, 3.0));
    }

    #[tokio::test]
    async fn every_marker_resolves_in_sequence_through_real_frame_graph() {
        // Same rotated origin1 as the fake-graph case, seeded into the buffer.
        let mut engine = TfEngine::new();
        engine
            .set_static("odom", "origin1", Transform3D::from_xy_yaw(0.5, -1.0, FRAC_PI_2))
            .unwrap();
        let graph = Arc::new(TfClient::with_engine(engine, Duration::from_secs(1)));
        let catalog = catalog("origin1");
        let resolver = GoalResolver::new(catalog.clone(), graph);

        for id in catalog.marker_ids() {
            let entry = catalog.lookup(id).unwrap();
            let goal = resolver.resolve(id, "odom").await.unwrap();
            assert!((goal.x - (0.5 - entry.y)).abs() < EPS, "marker {id}: x={}", goal.x);
            assert!((goal.y - (-1.0 + entry.x)).abs() < EPS, "marker {id}: y={}", goal.y);
        }
    }

    #[tokio::test]
    async fn disconnected_working_frame_times_out() {
        let graph = Arc::new(TfClient::new(Duration::from_millis(30)));
        let resolver = GoalResolver::new(catalog("map"), graph);

        let err = resolver.resolve(1, "odom").await.unwrap_err();
        assert!(matches!(err, NavError::FrameUnavailable { ref target_frame, .. } if target_frame == "odom"));
    }
}
