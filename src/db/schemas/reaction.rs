//! Engagement edge document schema
//!
//! One document per (subject, target, kind) tuple; the unique compound
//! index is what turns a racing double-create into one success and one
//! duplicate-key error.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::engagement::{Polarity, TargetKind};

/// Collection name for engagement edges
pub const REACTION_COLLECTION: &str = "reactions";

/// Engagement edge stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReactionDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at)
    #[serde(default)]
    pub metadata: Metadata,

    /// User holding the reaction
    pub subject_id: String,

    /// Target the reaction points at (ObjectId hex)
    pub target_id: String,

    /// What the target is (video, comment, tweet)
    pub target_kind: TargetKind,

    /// like or dislike — never both; the tuple is unique
    pub polarity: Polarity,
}

impl ReactionDoc {
    /// Create a new engagement edge document
    pub fn new(
        subject_id: String,
        target_id: String,
        target_kind: TargetKind,
        polarity: Polarity,
    ) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            subject_id,
            target_id,
            target_kind,
            polarity,
        }
    }
}

impl IntoIndexes for ReactionDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // The mutual-exclusion invariant, enforced by the store
            (
                doc! { "subject_id": 1, "target_id": 1, "target_kind": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("subject_target_unique".to_string())
                        .build(),
                ),
            ),
            // Count path: per-target polarity tallies
            (
                doc! { "target_id": 1, "target_kind": 1, "polarity": 1 },
                Some(
                    IndexOptions::builder()
                        .name("target_polarity_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ReactionDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
