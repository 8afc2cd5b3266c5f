//! `tagnav-perception` – the spatial frame graph.
//!
//! # Modules
//!
//! - [`transform`] – [`TfEngine`][transform::TfEngine]: tree of named
//!   reference frames that composes rigid transforms (translation + rotation)
//!   between any two connected frames, with static and time-limited relations.
//! - [`frame_graph`] – [`FrameGraph`][frame_graph::FrameGraph], the
//!   publish/query seam used by the goal resolver, and
//!   [`TfClient`][frame_graph::TfClient], its in-process implementation with
//!   asynchronous propagation and bounded-wait queries.

pub mod frame_graph;
pub mod transform;

pub use frame_graph::{DEFAULT_LOOKUP_TIMEOUT, FrameGraph, TfClient};
pub use transform::{LookupTime, RelationKind, TfEngine, Transform3D};
