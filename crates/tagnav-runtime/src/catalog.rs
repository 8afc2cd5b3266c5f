//! [`DestinationCatalog`] – marker id → configured destination.
//!
//! Built once at startup from the parameter file and never mutated.  Every
//! entry shares the catalog's reference frame (`final_destination.frame_id`).
//! The catalog also carries the initial search goal the robot is sent to
//! before any marker has been seen.

use std::collections::BTreeMap;

use tagnav_types::{DestinationEntry, Goal, MarkerId, NavError};

/// Markers a deployment must configure unless told otherwise.
pub const DEFAULT_EXPECTED_MARKERS: [MarkerId; 4] = [0, 1, 2, 3];

/// Parameter key holding the destination of `marker_id`.
pub fn parameter_key(marker_id: MarkerId) -> String {
    format!("final_destination.aruco_{marker_id}")
}

#[derive(Debug, Clone)]
pub struct DestinationCatalog {
    reference_frame: String,
    initial_goal: Goal,
    entries: BTreeMap<MarkerId, DestinationEntry>,
}

impl DestinationCatalog {
    /// Build the catalog from `(marker_id, (x, y))` pairs.
    ///
    /// # Errors
    ///
    /// [`NavError::ConfigurationMissing`] when the reference frame is empty
    /// or any id in `expected` has no destination.
    pub fn new(
        reference_frame: impl Into<String>,
        initial_goal: Goal,
        destinations: impl IntoIterator<Item = (MarkerId, (f64, f64))>,
        expected: &[MarkerId],
    ) -> Result<Self, NavError> {
        let reference_frame = reference_frame.into();
        if reference_frame.trim().is_empty() {
            return Err(NavError::ConfigurationMissing(
                "final_destination.frame_id".to_string(),
            ));
        }

        let entries: BTreeMap<MarkerId, DestinationEntry> = destinations
            .into_iter()
            .map(|(id, (x, y))| {
                (
                    id,
                    DestinationEntry {
                        reference_frame: reference_frame.clone(),
                        x,
                        y,
                    },
                )
            })
            .collect();

        if let Some(missing) = expected.iter().find(|id| !entries.contains_key(*id)) {
            return Err(NavError::ConfigurationMissing(parameter_key(*missing)));
        }
        if entries.is_empty() {
            return Err(NavError::ConfigurationMissing(
                "final_destination.aruco_<id>".to_string(),
            ));
        }

        Ok(Self {
            reference_frame,
            initial_goal,
            entries,
        })
    }

    /// The destination configured for `marker_id`.
    ///
    /// # Errors
    ///
    /// [`NavError::UnknownMarkerId`] for an id with no entry.
    pub fn lookup(&self, marker_id: MarkerId) -> Result<&DestinationEntry, NavError> {
        self.entries
            .get(&marker_id)
            .ok_or(NavError::UnknownMarkerId(marker_id))
    }

    pub fn reference_frame(&self) -> &str {
        &self.reference_frame
    }

    /// Where the robot goes to look for a marker.
    pub fn initial_goal(&self) -> Goal {
        self.initial_goal
    }

    /// Configured ids in ascending order.
    pub fn marker_ids(&self) -> impl Iterator<Item = MarkerId> + '_ {
        self.entries.keys().copied()
    }
}
