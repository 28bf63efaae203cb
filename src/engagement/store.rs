//! Engagement edge storage
//!
//! The store owns the uniqueness constraint on (subject, target, kind):
//! racing double-creates must come back as one success and one `Conflict`,
//! and a polarity flip must be a single conditional write.

use async_trait::async_trait;
use bson::doc;
use dashmap::DashMap;

use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{ReactionDoc, REACTION_COLLECTION};
use crate::engagement::{Polarity, TargetKind};
use crate::types::Result;

/// Durable relation of (subject, target, kind) → polarity
#[async_trait]
pub trait EngagementStore: Send + Sync {
    /// Current edge polarity for the tuple, if any
    async fn find(
        &self,
        subject_id: &str,
        target_id: &str,
        kind: TargetKind,
    ) -> Result<Option<Polarity>>;

    /// Create the edge. `Conflict` if the tuple already has one.
    async fn create(
        &self,
        subject_id: &str,
        target_id: &str,
        kind: TargetKind,
        polarity: Polarity,
    ) -> Result<()>;

    /// Delete the edge only if it currently carries `polarity`.
    /// Returns whether anything was removed.
    async fn delete_if(
        &self,
        subject_id: &str,
        target_id: &str,
        kind: TargetKind,
        polarity: Polarity,
    ) -> Result<bool>;

    /// Atomically rewrite the edge from one polarity to the other.
    /// Returns false when the edge no longer carries `from`.
    async fn flip(
        &self,
        subject_id: &str,
        target_id: &str,
        kind: TargetKind,
        from: Polarity,
        to: Polarity,
    ) -> Result<bool>;

    /// (likes, dislikes) across all subjects for one target
    async fn counts(&self, target_id: &str, kind: TargetKind) -> Result<(u64, u64)>;

    /// Remove every edge referencing the target. Returns edges removed.
    async fn purge_target(&self, target_id: &str, kind: TargetKind) -> Result<u64>;
}

// =============================================================================
// MongoDB-backed store
// =============================================================================

/// Production store over the `reactions` collection.
///
/// The schema declares a unique compound index on
/// (subject_id, target_id, target_kind); `insert_one` surfaces a duplicate
/// key as `Conflict`, which is exactly the signal the toggle engine needs.
#[derive(Clone)]
pub struct MongoEngagementStore {
    collection: MongoCollection<ReactionDoc>,
}

impl MongoEngagementStore {
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: mongo.collection::<ReactionDoc>(REACTION_COLLECTION).await?,
        })
    }

    fn edge_filter(subject_id: &str, target_id: &str, kind: TargetKind) -> bson::Document {
        doc! {
            "subject_id": subject_id,
            "target_id": target_id,
            "target_kind": kind.as_str(),
        }
    }
}

#[async_trait]
impl EngagementStore for MongoEngagementStore {
    async fn find(
        &self,
        subject_id: &str,
        target_id: &str,
        kind: TargetKind,
    ) -> Result<Option<Polarity>> {
        let edge = self
            .collection
            .find_one(Self::edge_filter(subject_id, target_id, kind))
            .await?;
        Ok(edge.map(|doc| doc.polarity))
    }

    async fn create(
        &self,
        subject_id: &str,
        target_id: &str,
        kind: TargetKind,
        polarity: Polarity,
    ) -> Result<()> {
        self.collection
            .insert_one(ReactionDoc::new(
                subject_id.to_string(),
                target_id.to_string(),
                kind,
                polarity,
            ))
            .await?;
        Ok(())
    }

    async fn delete_if(
        &self,
        subject_id: &str,
        target_id: &str,
        kind: TargetKind,
        polarity: Polarity,
    ) -> Result<bool> {
        let mut filter = Self::edge_filter(subject_id, target_id, kind);
        filter.insert("polarity", polarity.as_str());
        Ok(self.collection.delete_one(filter).await? == 1)
    }

    async fn flip(
        &self,
        subject_id: &str,
        target_id: &str,
        kind: TargetKind,
        from: Polarity,
        to: Polarity,
    ) -> Result<bool> {
        let mut filter = Self::edge_filter(subject_id, target_id, kind);
        filter.insert("polarity", from.as_str());

        let previous = self
            .collection
            .find_one_and_update(
                filter,
                doc! {
                    "$set": {
                        "polarity": to.as_str(),
                        "metadata.updated_at": bson::DateTime::now(),
                    }
                },
            )
            .await?;
        Ok(previous.is_some())
    }

    async fn counts(&self, target_id: &str, kind: TargetKind) -> Result<(u64, u64)> {
        let likes = self
            .collection
            .count(doc! {
                "target_id": target_id,
                "target_kind": kind.as_str(),
                "polarity": Polarity::Like.as_str(),
            })
            .await?;
        let dislikes = self
            .collection
            .count(doc! {
                "target_id": target_id,
                "target_kind": kind.as_str(),
                "polarity": Polarity::Dislike.as_str(),
            })
            .await?;
        Ok((likes, dislikes))
    }

    async fn purge_target(&self, target_id: &str, kind: TargetKind) -> Result<u64> {
        self.collection
            .delete_many(doc! {
                "target_id": target_id,
                "target_kind": kind.as_str(),
            })
            .await
    }
}

// =============================================================================
// In-memory store (dev mode, test fake)
// =============================================================================

type EdgeKey = (String, String, TargetKind);

/// Map-backed store with the same atomicity guarantees as the Mongo
/// collection: each entry operation holds the shard lock, so a racing
/// double-create resolves to one success and one `Conflict`.
#[derive(Default)]
pub struct MemoryEngagementStore {
    edges: DashMap<EdgeKey, Polarity>,
}

impl MemoryEngagementStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(subject_id: &str, target_id: &str, kind: TargetKind) -> EdgeKey {
        (subject_id.to_string(), target_id.to_string(), kind)
    }
}

#[async_trait]
impl EngagementStore for MemoryEngagementStore {
    async fn find(
        &self,
        subject_id: &str,
        target_id: &str,
        kind: TargetKind,
    ) -> Result<Option<Polarity>> {
        Ok(self
            .edges
            .get(&Self::key(subject_id, target_id, kind))
            .map(|entry| *entry.value()))
    }

    async fn create(
        &self,
        subject_id: &str,
        target_id: &str,
        kind: TargetKind,
        polarity: Polarity,
    ) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        match self.edges.entry(Self::key(subject_id, target_id, kind)) {
            Entry::Occupied(_) => Err(crate::types::TurnstileError::Conflict(
                "engagement edge already exists".into(),
            )),
            Entry::Vacant(vacant) => {
                vacant.insert(polarity);
                Ok(())
            }
        }
    }

    async fn delete_if(
        &self,
        subject_id: &str,
        target_id: &str,
        kind: TargetKind,
        polarity: Polarity,
    ) -> Result<bool> {
        Ok(self
            .edges
            .remove_if(&Self::key(subject_id, target_id, kind), |_, current| {
                *current == polarity
            })
            .is_some())
    }

    async fn flip(
        &self,
        subject_id: &str,
        target_id: &str,
        kind: TargetKind,
        from: Polarity,
        to: Polarity,
    ) -> Result<bool> {
        use dashmap::mapref::entry::Entry;

        match self.edges.entry(Self::key(subject_id, target_id, kind)) {
            Entry::Occupied(mut occupied) if *occupied.get() == from => {
                occupied.insert(to);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn counts(&self, target_id: &str, kind: TargetKind) -> Result<(u64, u64)> {
        let mut likes = 0;
        let mut dislikes = 0;
        for entry in self.edges.iter() {
            let (_, entry_target, entry_kind) = entry.key();
            if entry_target == target_id && *entry_kind == kind {
                match entry.value() {
                    Polarity::Like => likes += 1,
                    Polarity::Dislike => dislikes += 1,
                }
            }
        }
        Ok((likes, dislikes))
    }

    async fn purge_target(&self, target_id: &str, kind: TargetKind) -> Result<u64> {
        let before = self.edges.len() as u64;
        self.edges
            .retain(|(_, entry_target, entry_kind), _| {
                !(entry_target == target_id && *entry_kind == kind)
            });
        Ok(before - self.edges.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TurnstileError;

    #[tokio::test]
    async fn create_is_exclusive() {
        let store = MemoryEngagementStore::new();
        store.create("u1", "t1", TargetKind::Video, Polarity::Like).await.unwrap();

        let second = store.create("u1", "t1", TargetKind::Video, Polarity::Dislike).await;
        assert!(matches!(second, Err(TurnstileError::Conflict(_))));
    }

    #[tokio::test]
    async fn delete_if_checks_polarity() {
        let store = MemoryEngagementStore::new();
        store.create("u1", "t1", TargetKind::Tweet, Polarity::Like).await.unwrap();

        assert!(!store.delete_if("u1", "t1", TargetKind::Tweet, Polarity::Dislike).await.unwrap());
        assert!(store.delete_if("u1", "t1", TargetKind::Tweet, Polarity::Like).await.unwrap());
        assert!(!store.delete_if("u1", "t1", TargetKind::Tweet, Polarity::Like).await.unwrap());
    }

    #[tokio::test]
    async fn flip_is_conditional_on_old_polarity() {
        let store = MemoryEngagementStore::new();
        store.create("u1", "t1", TargetKind::Comment, Polarity::Like).await.unwrap();

        // Wrong pre-image: no-op
        assert!(!store
            .flip("u1", "t1", TargetKind::Comment, Polarity::Dislike, Polarity::Like)
            .await
            .unwrap());

        assert!(store
            .flip("u1", "t1", TargetKind::Comment, Polarity::Like, Polarity::Dislike)
            .await
            .unwrap());
        assert_eq!(
            store.find("u1", "t1", TargetKind::Comment).await.unwrap(),
            Some(Polarity::Dislike)
        );
    }

    #[tokio::test]
    async fn concurrent_creates_admit_exactly_one() {
        use std::sync::Arc;

        let store = Arc::new(MemoryEngagementStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.create("u1", "t1", TargetKind::Video, Polarity::Like).await
            }));
        }

        let mut created = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => created += 1,
                Err(TurnstileError::Conflict(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(conflicts, 15);
    }
}
