//! Transform Frame (TF) Engine.
//!
//! Maintains a tree of named reference frames and the rigid-body transforms
//! (translation + quaternion rotation) that relate each frame to its single
//! parent.  Given any two frame names the engine composes the chain of
//! transforms between them via BFS, walking parent→child edges forward and
//! child→parent edges through their inverse.
//!
//! Relations are either *static* (valid forever once set) or *dynamic*
//! (stamped, and only valid for [`TfEngine::dynamic_ttl`] after the stamp).
//!
//! # Example
//!
//! ```rust
//! use tagnav_perception::transform::{LookupTime, TfEngine, Transform3D};
//!
//! let mut tf = TfEngine::new();
//!
//! // odom sits 1 m forward of map.
//! tf.set_static("map", "odom", Transform3D::from_xy_yaw(1.0, 0.0, 0.0)).unwrap();
//! // the goal frame is 2 m forward, 3 m left of map.
//! tf.set_static("map", "goal", Transform3D::from_xy_yaw(2.0, 3.0, 0.0)).unwrap();
//!
//! let t = tf.lookup("odom", "goal", LookupTime::Latest).unwrap();
//! assert!((t.translation.x - 1.0).abs() < 1e-9);
//! assert!((t.translation.y - 3.0).abs() < 1e-9);
//! ```

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tagnav_types::NavError;

/// How long a dynamic relation stays usable after its stamp.
pub const DEFAULT_DYNAMIC_TTL: Duration = Duration::from_secs(10);

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D translation vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    /// Create a new vector.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The zero vector.
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1).
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation (no rotation).
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Rotation of `yaw` radians about +Z.
    pub fn from_yaw(yaw: f64) -> Self {
        let half = yaw * 0.5;
        Self::new(half.cos(), 0.0, 0.0, half.sin())
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: rotation followed by translation.
///
/// `T_a_b` is the pose of frame B in frame A: to express a point given in
/// frame B in frame A, rotate it by `rotation` then add `translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3D {
    /// Create a transform from a translation and rotation.
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// The identity transform (no translation, no rotation).
    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    /// Planar pose: (x, y) on the ground plane, heading `yaw` about +Z.
    pub fn from_xy_yaw(x: f64, y: f64, yaw: f64) -> Self {
        Self::new(Vec3::new(x, y, 0.0), Quaternion::from_yaw(yaw))
    }

    /// Compose two transforms.
    ///
    /// If `self` = T_A_B and `other` = T_B_C, the result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation.add(self.rotation.rotate(other.translation));
        let rotated = self.rotation.mul(other.rotation);
        Self::new(translated, rotated)
    }

    /// T_A_B → T_B_A.
    pub fn inverse(self) -> Self {
        let rotation = self.rotation.conjugate();
        Self::new(rotation.rotate(self.translation.neg()), rotation)
    }

    /// Express `point`, given in this transform's child frame, in its parent.
    pub fn apply(self, point: Vec3) -> Vec3 {
        self.translation.add(self.rotation.rotate(point))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Relations
// ────────────────────────────────────────────────────────────────────────────

/// The instant a lookup should be evaluated at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupTime {
    /// Whatever is currently valid.
    Latest,
    /// A specific instant; dynamic relations stamped after it are not yet
    /// usable.
    At(DateTime<Utc>),
}

/// Lifetime of a parent→child relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Valid indefinitely once set.
    Static,
    /// Valid from `stamp` for the engine's dynamic TTL.
    Dynamic { stamp: DateTime<Utc> },
}

#[derive(Debug, Clone)]
struct Relation {
    parent: String,
    transform: Transform3D,
    kind: RelationKind,
}

impl Relation {
    fn usable_at(&self, time: LookupTime, ttl: chrono::Duration) -> bool {
        match (self.kind, time) {
            (RelationKind::Static, _) => true,
            (RelationKind::Dynamic { stamp }, LookupTime::Latest) => Utc::now() - stamp <= ttl,
            (RelationKind::Dynamic { stamp }, LookupTime::At(t)) => stamp <= t && t - stamp <= ttl,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TfEngine
// ────────────────────────────────────────────────────────────────────────────

/// A tree of named reference frames and the [`Transform3D`]s that relate
/// them.
///
/// Every frame has at most one parent.  Setting a relation for an existing
/// child under the same parent overwrites it; setting it under a different
/// parent is rejected with [`NavError::ChangingParent`].
#[derive(Debug)]
pub struct TfEngine {
    /// `relations[child] = parent + T_parent_child`
    relations: HashMap<String, Relation>,
    dynamic_ttl: chrono::Duration,
}

impl Default for TfEngine {
    fn default() -> Self {
        Self::with_dynamic_ttl(DEFAULT_DYNAMIC_TTL)
    }
}

impl TfEngine {
    /// Create an empty TF engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty engine whose dynamic relations expire after `ttl`.
    pub fn with_dynamic_ttl(ttl: Duration) -> Self {
        Self {
            relations: HashMap::new(),
            dynamic_ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
        }
    }

    pub fn dynamic_ttl(&self) -> chrono::Duration {
        self.dynamic_ttl
    }

    /// Register or update the relation from `parent_frame` to `child_frame`.
    pub fn set_transform(
        &mut self,
        parent_frame: &str,
        child_frame: &str,
        transform: Transform3D,
        kind: RelationKind,
    ) -> Result<(), NavError> {
        self.check_parent(parent_frame, child_frame)?;
        self.relations.insert(
            child_frame.to_string(),
            Relation {
                parent: parent_frame.to_string(),
                transform,
                kind,
            },
        );
        Ok(())
    }

    /// Shorthand for a [`RelationKind::Static`] relation.
    pub fn set_static(
        &mut self,
        parent_frame: &str,
        child_frame: &str,
        transform: Transform3D,
    ) -> Result<(), NavError> {
        self.set_transform(parent_frame, child_frame, transform, RelationKind::Static)
    }

    /// Fails when `child_frame` already hangs off a frame other than
    /// `parent_frame`, or when the relation would point a frame at itself.
    pub fn check_parent(&self, parent_frame: &str, child_frame: &str) -> Result<(), NavError> {
        if parent_frame == child_frame {
            return Err(NavError::ChangingParent {
                child: child_frame.to_string(),
                parent: parent_frame.to_string(),
                previous: "itself".to_string(),
            });
        }
        match self.relations.get(child_frame) {
            Some(existing) if existing.parent != parent_frame => Err(NavError::ChangingParent {
                child: child_frame.to_string(),
                parent: parent_frame.to_string(),
                previous: existing.parent.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// The parent of `frame`, if it has one.
    pub fn parent_of(&self, frame: &str) -> Option<&str> {
        self.relations.get(frame).map(|r| r.parent.as_str())
    }

    /// `true` if `frame` appears anywhere in the tree.
    pub fn contains(&self, frame: &str) -> bool {
        self.relations.contains_key(frame) || self.relations.values().any(|r| r.parent == frame)
    }

    /// All known frame names, sorted.
    pub fn frames(&self) -> Vec<String> {
        let mut names: BTreeSet<&str> = BTreeSet::new();
        for (child, relation) in &self.relations {
            names.insert(child);
            names.insert(&relation.parent);
        }
        names.into_iter().map(str::to_string).collect()
    }

    /// Compute T_target_source: the transform that expresses points given in
    /// `source_frame` in `target_frame`.  Its translation is the origin of
    /// `source_frame` seen from `target_frame`.
    ///
    /// Fails with [`NavError::FrameUnavailable`] when either frame is
    /// unknown or no chain of relations usable at `time` connects them.
    pub fn lookup(
        &self,
        target_frame: &str,
        source_frame: &str,
        time: LookupTime,
    ) -> Result<Transform3D, NavError> {
        if target_frame == source_frame {
            return Ok(Transform3D::identity());
        }

        let unavailable = |details: String| NavError::FrameUnavailable {
            target_frame: target_frame.to_string(),
            source_frame: source_frame.to_string(),
            details,
        };
        for frame in [target_frame, source_frame] {
            if !self.contains(frame) {
                return Err(unavailable(format!("frame '{frame}' does not exist")));
            }
        }

        // BFS over the tree; each queue item carries T_target_current.
        let mut queue: VecDeque<(&str, Transform3D)> = VecDeque::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stale_edges = 0usize;

        queue.push_back((target_frame, Transform3D::identity()));
        visited.insert(target_frame);

        while let Some((current, accumulated)) = queue.pop_front() {
            for (next, relation, edge_tf) in self.neighbours(current) {
                if visited.contains(next) {
                    continue;
                }
                if !relation.usable_at(time, self.dynamic_ttl) {
                    stale_edges += 1;
                    continue;
                }
                let composed = accumulated.compose(edge_tf);
                if next == source_frame {
                    return Ok(composed);
                }
                visited.insert(next);
                queue.push_back((next, composed));
            }
        }

        if stale_edges > 0 {
            Err(unavailable(format!(
                "no usable path; {stale_edges} relation(s) expired or not yet valid"
            )))
        } else {
            Err(unavailable("frames are not connected".to_string()))
        }
    }

    /// Edges leaving `frame`, each with the transform from `frame` to the
    /// neighbour (parent edges are inverted).
    fn neighbours<'a>(
        &'a self,
        frame: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a Relation, Transform3D)> + 'a {
        let up = self
            .relations
            .get(frame)
            .map(|r| (r.parent.as_str(), r, r.transform.inverse()));
        let down = self
            .relations
            .iter()
            .filter(move |(_, r)| r.parent == frame)
            .map(|(child, r)| (child.as_str(), r, r.transform));
        up.into_iter().chain(down)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
