//! Frame graph client.
//!
//! [`FrameGraph`] is the narrow publish/query seam the goal resolver talks
//! to.  [`TfClient`] is the in-process implementation: publications are
//! broadcast over a channel and applied to a shared [`TfEngine`] buffer by a
//! background listener task, so a relation becomes queryable a short, bounded
//! time after it is published.  Every publication carries a sequence number
//! and the listener reports the last one it applied; [`TfClient::query`]
//! waits (up to the configured lookup timeout) until everything published
//! before the call has been applied, and only then trusts a lookup.  Past the
//! deadline it gives up with [`NavError::FrameUnavailable`].

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tagnav_types::NavError;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::transform::{LookupTime, RelationKind, TfEngine, Transform3D};

/// Default bound on how long [`TfClient::query`] waits for a relation.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(1);

/// Publish/query access to the process-wide frame graph.
#[async_trait]
pub trait FrameGraph: Send + Sync {
    /// Announce a fixed planar relation (z = 0, identity rotation) from
    /// `parent_frame` to `child_frame`.  Never expires.
    async fn publish_static(
        &self,
        child_frame: &str,
        parent_frame: &str,
        x: f64,
        y: f64,
    ) -> Result<(), NavError>;

    /// Return the (x, y) translation of the relation that carries a point in
    /// `source_frame` into `target_frame`.
    ///
    /// # Errors
    ///
    /// [`NavError::FrameUnavailable`] when the relation cannot be resolved
    /// within the implementation's bounded wait.
    async fn query(
        &self,
        target_frame: &str,
        source_frame: &str,
        at: LookupTime,
    ) -> Result<(f64, f64), NavError>;
}

/// A relation travelling from a publisher to the listener task.
#[derive(Debug, Clone)]
struct RelationUpdate {
    seq: u64,
    parent_frame: String,
    child_frame: String,
    transform: Transform3D,
    kind: RelationKind,
}

/// In-process frame graph: a [`TfEngine`] buffer fed asynchronously by a
/// listener task.
///
/// Must be created from within a Tokio runtime.  The listener task stops
/// once the client is dropped.
pub struct TfClient {
    buffer: Arc<RwLock<TfEngine>>,
    updates: mpsc::UnboundedSender<RelationUpdate>,
    /// Sequence number of the last publication handed to the listener.
    published: Mutex<u64>,
    /// Sequence number of the last publication the listener applied.
    applied: watch::Receiver<u64>,
    lookup_timeout: Duration,
}

impl TfClient {
    /// Create a client over an empty buffer.
    pub fn new(lookup_timeout: Duration) -> Self {
        Self::with_engine(TfEngine::new(), lookup_timeout)
    }

    /// Create a client over an existing buffer.
    pub fn with_engine(engine: TfEngine, lookup_timeout: Duration) -> Self {
        let buffer = Arc::new(RwLock::new(engine));
        let (updates, mut incoming) = mpsc::unbounded_channel::<RelationUpdate>();
        let (ack, applied) = watch::channel(0u64);

        let listener_buffer = buffer.clone();
        tokio::spawn(async move {
            while let Some(update) = incoming.recv().await {
                let applied = match listener_buffer.write() {
                    Ok(mut engine) => engine.set_transform(
                        &update.parent_frame,
                        &update.child_frame,
                        update.transform,
                        update.kind,
                    ),
                    Err(_) => Err(NavError::Channel("transform buffer lock poisoned".to_string())),
                };
                match applied {
                    Ok(()) => debug!(
                        parent = %update.parent_frame,
                        child = %update.child_frame,
                        "relation applied to transform buffer"
                    ),
                    Err(e) => warn!(
                        parent = %update.parent_frame,
                        child = %update.child_frame,
                        error = %e,
                        "relation rejected by transform buffer"
                    ),
                }
                // Rejected relations are acknowledged too so waiters never stall.
                ack.send_replace(update.seq);
            }
            debug!("frame graph listener stopped");
        });

        Self {
            buffer,
            updates,
            published: Mutex::new(0),
            applied,
            lookup_timeout,
        }
    }

    pub fn lookup_timeout(&self) -> Duration {
        self.lookup_timeout
    }

    /// Broadcast an arbitrary static relation.
    pub fn publish_static_transform(
        &self,
        child_frame: &str,
        parent_frame: &str,
        transform: Transform3D,
    ) -> Result<(), NavError> {
        self.send(child_frame, parent_frame, transform, RelationKind::Static)
    }

    /// Broadcast a time-limited relation stamped at `stamp`.
    pub fn publish_dynamic(
        &self,
        child_frame: &str,
        parent_frame: &str,
        transform: Transform3D,
        stamp: DateTime<Utc>,
    ) -> Result<(), NavError> {
        self.send(
            child_frame,
            parent_frame,
            transform,
            RelationKind::Dynamic { stamp },
        )
    }

    /// Single non-waiting lookup against what the buffer holds right now.
    pub fn lookup(
        &self,
        target_frame: &str,
        source_frame: &str,
        at: LookupTime,
    ) -> Result<Transform3D, NavError> {
        self.buffer
            .read()
            .map_err(|_| NavError::FrameUnavailable {
                target_frame: target_frame.to_string(),
                source_frame: source_frame.to_string(),
                details: "transform buffer lock poisoned".to_string(),
            })?
            .lookup(target_frame, source_frame, at)
    }

    /// Names of every frame currently in the buffer.
    pub fn frames(&self) -> Vec<String> {
        self.buffer
            .read()
            .map(|engine| engine.frames())
            .unwrap_or_default()
    }

    fn send(
        &self,
        child_frame: &str,
        parent_frame: &str,
        transform: Transform3D,
        kind: RelationKind,
    ) -> Result<(), NavError> {
        // Reject a re-parenting up front; the listener re-checks on apply.
        if let Ok(engine) = self.buffer.read() {
            engine.check_parent(parent_frame, child_frame)?;
        }
        // Numbering and sending under one lock keeps the channel in order.
        let mut published = self
            .published
            .lock()
            .map_err(|_| NavError::Channel("publication counter poisoned".to_string()))?;
        let seq = *published + 1;
        self.updates
            .send(RelationUpdate {
                seq,
                parent_frame: parent_frame.to_string(),
                child_frame: child_frame.to_string(),
                transform,
                kind,
            })
            .map_err(|_| NavError::Channel("frame graph listener has stopped".to_string()))?;
        *published = seq;
        Ok(())
    }

    fn last_published(&self) -> u64 {
        self.published.lock().map(|seq| *seq).unwrap_or(u64::MAX)
    }
}

#[async_trait]
impl FrameGraph for TfClient {
    async fn publish_static(
        &self,
        child_frame: &str,
        parent_frame: &str,
        x: f64,
        y: f64,
    ) -> Result<(), NavError> {
        self.publish_static_transform(
            child_frame,
            parent_frame,
            Transform3D::from_xy_yaw(x, y, 0.0),
        )
    }

    async fn query(
        &self,
        target_frame: &str,
        source_frame: &str,
        at: LookupTime,
    ) -> Result<(f64, f64), NavError> {
        let deadline = Instant::now() + self.lookup_timeout;
        let pending = self.last_published();
        let mut applied = self.applied.clone();

        loop {
            // Mark the current value seen before looking, so an update
            // landing between the lookup and the wait still wakes us.
            let caught_up = *applied.borrow_and_update() >= pending;
            let last_error = if caught_up {
                match self.lookup(target_frame, source_frame, at) {
                    Ok(t) => return Ok((t.translation.x, t.translation.y)),
                    Err(e) => e,
                }
            } else {
                NavError::FrameUnavailable {
                    target_frame: target_frame.to_string(),
                    source_frame: source_frame.to_string(),
                    details: format!("publication {pending} not yet applied"),
                }
            };

            match tokio::time::timeout_at(deadline, applied.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => {
                    warn!(
                        target_frame,
                        source_frame,
                        timeout_ms = self.lookup_timeout.as_millis() as u64,
                        error = %last_error,
                        "frame lookup gave up"
                    );
                    return Err(last_error);
                }
            }
        }
    }
}
