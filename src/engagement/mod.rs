//! Engagement toggle engine
//!
//! Maintains the like/dislike relation between users and targets (videos,
//! comments, tweets). A subject holds at most one edge per target, and the
//! edge carries exactly one polarity — the engine never lets a like and a
//! dislike coexist, no matter how requests interleave.
//!
//! One generic routine handles every target kind and polarity; the kind is
//! data, not a reason for parallel handlers.

pub mod store;

use std::sync::Arc;

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Result, TurnstileError};

pub use store::{EngagementStore, MemoryEngagementStore, MongoEngagementStore};

/// What an engagement edge can point at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Video,
    Comment,
    Tweet,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Video => "video",
            TargetKind::Comment => "comment",
            TargetKind::Tweet => "tweet",
        }
    }

    /// Route tag used in URL paths (`/toggle/v/{id}` etc.)
    pub fn from_route_tag(tag: &str) -> Option<Self> {
        match tag {
            "v" => Some(TargetKind::Video),
            "c" => Some(TargetKind::Comment),
            "t" => Some(TargetKind::Tweet),
            _ => None,
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of an engagement edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Like,
    Dislike,
}

impl Polarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Polarity::Like => "like",
            Polarity::Dislike => "dislike",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Polarity::Like => Polarity::Dislike,
            Polarity::Dislike => Polarity::Like,
        }
    }
}

impl std::fmt::Display for Polarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable engagement state between a subject and a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementState {
    Like,
    Dislike,
    None,
}

impl From<Option<Polarity>> for EngagementState {
    fn from(p: Option<Polarity>) -> Self {
        match p {
            Some(Polarity::Like) => EngagementState::Like,
            Some(Polarity::Dislike) => EngagementState::Dislike,
            None => EngagementState::None,
        }
    }
}

/// Denormalized counts plus the viewer's own edge for one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Aggregate {
    pub likes: u64,
    pub dislikes: u64,
    pub viewer_polarity: EngagementState,
}

/// Orchestrates toggle transitions over an injected store
pub struct EngagementEngine {
    store: Arc<dyn EngagementStore>,
}

impl EngagementEngine {
    pub fn new(store: Arc<dyn EngagementStore>) -> Self {
        Self { store }
    }

    /// Toggle the subject's reaction to a target.
    ///
    /// Repeating the same action clears it; the opposite action flips the
    /// edge in place. Returns the state the edge is left in.
    pub async fn toggle(
        &self,
        subject_id: &str,
        target_id: &str,
        kind: TargetKind,
        desired: Polarity,
    ) -> Result<EngagementState> {
        validate_object_id(target_id)?;

        // At most two passes: the second absorbs a lost race on the
        // store's uniqueness constraint.
        let mut attempts = 0;
        loop {
            attempts += 1;

            let existing = self.find_retry(subject_id, target_id, kind).await?;

            match existing {
                // Toggle-off: same action twice clears the edge. A racer
                // removing it first leaves us in the same resulting state.
                Some(current) if current == desired => {
                    self.store
                        .delete_if(subject_id, target_id, kind, desired)
                        .await?;
                    return Ok(EngagementState::None);
                }

                // Flip: single conditional write keyed on the old polarity,
                // so readers never observe both edges.
                Some(current) => {
                    let flipped = self
                        .store
                        .flip(subject_id, target_id, kind, current, desired)
                        .await?;
                    if flipped {
                        return Ok(EngagementState::from(Some(desired)));
                    }
                    if attempts >= 2 {
                        return Err(TurnstileError::Conflict(
                            "engagement edge changed underneath the toggle twice".into(),
                        ));
                    }
                    debug!(subject_id, target_id, kind = %kind, "flip raced, re-reading");
                }

                None => match self.store.create(subject_id, target_id, kind, desired).await {
                    Ok(()) => return Ok(EngagementState::from(Some(desired))),
                    Err(TurnstileError::Conflict(_)) => {
                        // Lost the creation race. If the winner wrote the
                        // same polarity, this request has effectively been
                        // applied: converge instead of toggling it back off.
                        let now = self.find_retry(subject_id, target_id, kind).await?;
                        if now == Some(desired) {
                            return Ok(EngagementState::from(Some(desired)));
                        }
                        if attempts >= 2 {
                            return Err(TurnstileError::Conflict(
                                "engagement toggle lost the creation race twice".into(),
                            ));
                        }
                        debug!(subject_id, target_id, kind = %kind, "create raced, retrying toggle");
                    }
                    Err(e) => return Err(e),
                },
            }
        }
    }

    /// Like/dislike counts for a target, plus the viewer's own polarity.
    ///
    /// Reflects the result of the most recent completed toggle; a target
    /// with no edges (including one whose edges were purged) reports zeros.
    pub async fn aggregate_for(
        &self,
        target_id: &str,
        kind: TargetKind,
        viewer_id: Option<&str>,
    ) -> Result<Aggregate> {
        validate_object_id(target_id)?;

        // Idempotent reads: retried once on a transient store failure
        let (likes, dislikes) = match self.store.counts(target_id, kind).await {
            Err(e) if e.is_transient() => self.store.counts(target_id, kind).await?,
            other => other?,
        };

        let viewer_polarity = match viewer_id {
            Some(subject_id) => self.find_retry(subject_id, target_id, kind).await?.into(),
            None => EngagementState::None,
        };

        Ok(Aggregate {
            likes,
            dislikes,
            viewer_polarity,
        })
    }

    /// Cascading delete: remove every edge referencing a target.
    ///
    /// Called by the subsystem that owns the target when the target itself
    /// is deleted. Returns the number of edges removed.
    pub async fn purge_target(&self, target_id: &str, kind: TargetKind) -> Result<u64> {
        validate_object_id(target_id)?;

        let removed = self.store.purge_target(target_id, kind).await?;
        debug!(target_id, kind = %kind, removed, "purged engagement edges for deleted target");
        Ok(removed)
    }

    /// Edge lookup, retried once on a transient store failure
    async fn find_retry(
        &self,
        subject_id: &str,
        target_id: &str,
        kind: TargetKind,
    ) -> Result<Option<Polarity>> {
        match self.store.find(subject_id, target_id, kind).await {
            Err(e) if e.is_transient() => self.store.find(subject_id, target_id, kind).await,
            other => other,
        }
    }
}

/// Targets are referenced by ObjectId; anything else is a caller bug
fn validate_object_id(id: &str) -> Result<()> {
    ObjectId::parse_str(id)
        .map(|_| ())
        .map_err(|_| TurnstileError::InvalidArgument(format!("Invalid target id: {}", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn engine() -> EngagementEngine {
        EngagementEngine::new(Arc::new(MemoryEngagementStore::new()))
    }

    fn oid() -> String {
        ObjectId::new().to_hex()
    }

    #[tokio::test]
    async fn rejects_malformed_target_id() {
        let engine = engine();
        let result = engine
            .toggle("u1", "not-an-object-id", TargetKind::Video, Polarity::Like)
            .await;
        assert!(matches!(result, Err(TurnstileError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn toggle_on_then_off() {
        let engine = engine();
        let video = oid();

        let first = engine
            .toggle("u1", &video, TargetKind::Video, Polarity::Like)
            .await
            .unwrap();
        assert_eq!(first, EngagementState::Like);

        let second = engine
            .toggle("u1", &video, TargetKind::Video, Polarity::Like)
            .await
            .unwrap();
        assert_eq!(second, EngagementState::None);

        let agg = engine
            .aggregate_for(&video, TargetKind::Video, Some("u1"))
            .await
            .unwrap();
        assert_eq!(agg.likes, 0);
        assert_eq!(agg.viewer_polarity, EngagementState::None);
    }

    #[tokio::test]
    async fn flip_replaces_polarity_atomically() {
        let engine = engine();
        let video = oid();

        engine
            .toggle("u1", &video, TargetKind::Video, Polarity::Like)
            .await
            .unwrap();
        let flipped = engine
            .toggle("u1", &video, TargetKind::Video, Polarity::Dislike)
            .await
            .unwrap();
        assert_eq!(flipped, EngagementState::Dislike);

        let agg = engine
            .aggregate_for(&video, TargetKind::Video, Some("u1"))
            .await
            .unwrap();
        assert_eq!(agg.likes, 0);
        assert_eq!(agg.dislikes, 1);
        assert_eq!(agg.viewer_polarity, EngagementState::Dislike);
    }

    #[tokio::test]
    async fn like_then_dislike_moves_the_counts() {
        // U likes video V, then dislikes it
        let engine = engine();
        let video = oid();

        let liked = engine
            .toggle("U", &video, TargetKind::Video, Polarity::Like)
            .await
            .unwrap();
        assert_eq!(liked, EngagementState::Like);
        let agg = engine
            .aggregate_for(&video, TargetKind::Video, Some("U"))
            .await
            .unwrap();
        assert_eq!((agg.likes, agg.dislikes), (1, 0));
        assert_eq!(agg.viewer_polarity, EngagementState::Like);

        let disliked = engine
            .toggle("U", &video, TargetKind::Video, Polarity::Dislike)
            .await
            .unwrap();
        assert_eq!(disliked, EngagementState::Dislike);
        let agg = engine
            .aggregate_for(&video, TargetKind::Video, Some("U"))
            .await
            .unwrap();
        assert_eq!((agg.likes, agg.dislikes), (0, 1));
        assert_eq!(agg.viewer_polarity, EngagementState::Dislike);
    }

    #[tokio::test]
    async fn kinds_are_independent() {
        let engine = engine();
        let id = oid();

        // Same id under different kinds holds independent edges
        engine
            .toggle("u1", &id, TargetKind::Video, Polarity::Like)
            .await
            .unwrap();
        engine
            .toggle("u1", &id, TargetKind::Comment, Polarity::Dislike)
            .await
            .unwrap();

        let video = engine
            .aggregate_for(&id, TargetKind::Video, Some("u1"))
            .await
            .unwrap();
        let comment = engine
            .aggregate_for(&id, TargetKind::Comment, Some("u1"))
            .await
            .unwrap();
        assert_eq!(video.viewer_polarity, EngagementState::Like);
        assert_eq!(comment.viewer_polarity, EngagementState::Dislike);
    }

    #[tokio::test]
    async fn counts_span_subjects() {
        let engine = engine();
        let video = oid();

        for user in ["u1", "u2", "u3"] {
            engine
                .toggle(user, &video, TargetKind::Video, Polarity::Like)
                .await
                .unwrap();
        }
        engine
            .toggle("u4", &video, TargetKind::Video, Polarity::Dislike)
            .await
            .unwrap();

        let agg = engine
            .aggregate_for(&video, TargetKind::Video, None)
            .await
            .unwrap();
        assert_eq!(agg.likes, 3);
        assert_eq!(agg.dislikes, 1);
        assert_eq!(agg.viewer_polarity, EngagementState::None);
    }

    #[tokio::test]
    async fn concurrent_same_toggle_never_doubles() {
        let engine = Arc::new(engine());
        let video = oid();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = Arc::clone(&engine);
            let video = video.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .toggle("u1", &video, TargetKind::Video, Polarity::Like)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // However the calls interleaved, the uniqueness invariant holds:
        // never more than one edge, never a dual polarity.
        let agg = engine
            .aggregate_for(&video, TargetKind::Video, Some("u1"))
            .await
            .unwrap();
        assert!(agg.likes + agg.dislikes <= 1);
        match agg.viewer_polarity {
            EngagementState::Like => assert_eq!((agg.likes, agg.dislikes), (1, 0)),
            EngagementState::None => assert_eq!((agg.likes, agg.dislikes), (0, 0)),
            EngagementState::Dislike => panic!("dislike edge cannot appear from like toggles"),
        }
    }

    #[tokio::test]
    async fn purge_removes_every_edge() {
        let engine = engine();
        let video = oid();

        for user in ["u1", "u2"] {
            engine
                .toggle(user, &video, TargetKind::Video, Polarity::Like)
                .await
                .unwrap();
        }
        engine
            .toggle("u3", &video, TargetKind::Video, Polarity::Dislike)
            .await
            .unwrap();

        let removed = engine.purge_target(&video, TargetKind::Video).await.unwrap();
        assert_eq!(removed, 3);

        let agg = engine
            .aggregate_for(&video, TargetKind::Video, Some("u1"))
            .await
            .unwrap();
        assert_eq!((agg.likes, agg.dislikes), (0, 0));
        assert_eq!(agg.viewer_polarity, EngagementState::None);
    }

    /// Store wrapper that makes the first create lose its race: the rival's
    /// edge appears and the caller gets Conflict.
    struct RaceOnCreate {
        inner: MemoryEngagementStore,
        tripped: AtomicBool,
    }

    #[async_trait]
    impl EngagementStore for RaceOnCreate {
        async fn find(
            &self,
            subject_id: &str,
            target_id: &str,
            kind: TargetKind,
        ) -> Result<Option<Polarity>> {
            self.inner.find(subject_id, target_id, kind).await
        }

        async fn create(
            &self,
            subject_id: &str,
            target_id: &str,
            kind: TargetKind,
            polarity: Polarity,
        ) -> Result<()> {
            if !self.tripped.swap(true, Ordering::SeqCst) {
                self.inner
                    .create(subject_id, target_id, kind, polarity)
                    .await?;
                return Err(TurnstileError::Conflict("simulated rival create".into()));
            }
            self.inner.create(subject_id, target_id, kind, polarity).await
        }

        async fn delete_if(
            &self,
            subject_id: &str,
            target_id: &str,
            kind: TargetKind,
            polarity: Polarity,
        ) -> Result<bool> {
            self.inner.delete_if(subject_id, target_id, kind, polarity).await
        }

        async fn flip(
            &self,
            subject_id: &str,
            target_id: &str,
            kind: TargetKind,
            from: Polarity,
            to: Polarity,
        ) -> Result<bool> {
            self.inner.flip(subject_id, target_id, kind, from, to).await
        }

        async fn counts(&self, target_id: &str, kind: TargetKind) -> Result<(u64, u64)> {
            self.inner.counts(target_id, kind).await
        }

        async fn purge_target(&self, target_id: &str, kind: TargetKind) -> Result<u64> {
            self.inner.purge_target(target_id, kind).await
        }
    }

    #[tokio::test]
    async fn lost_create_race_converges_idempotently() {
        let engine = EngagementEngine::new(Arc::new(RaceOnCreate {
            inner: MemoryEngagementStore::new(),
            tripped: AtomicBool::new(false),
        }));
        let video = oid();

        // The rival wrote the same polarity, so the toggle converges to
        // `like` instead of clearing the rival's edge.
        let outcome = engine
            .toggle("u1", &video, TargetKind::Video, Polarity::Like)
            .await
            .unwrap();
        assert_eq!(outcome, EngagementState::Like);

        let agg = engine
            .aggregate_for(&video, TargetKind::Video, Some("u1"))
            .await
            .unwrap();
        assert_eq!((agg.likes, agg.dislikes), (1, 0));
    }
}
