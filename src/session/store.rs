//! Credential storage
//!
//! Durable record of user identity, password hash, and the single
//! currently-valid refresh token. Rotation is a compare-and-set on that
//! field: the swap happens only if the presented value is still current,
//! which is what makes concurrent refreshes resolve to one winner.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bson::{doc, oid::ObjectId};

use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{UserDoc, USER_COLLECTION};
use crate::types::{Result, TurnstileError};

/// A user identity as the session layer sees it
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub refresh_token: Option<String>,
}

/// Fields required to create an identity
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
}

/// Key-value store of identities with compare-and-set semantics on the
/// refresh-credential field
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Create an identity. `Conflict` when the username or email is taken.
    async fn create(&self, new: NewIdentity) -> Result<Identity>;

    /// Look up by username OR email
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Identity>>;

    /// Look up by user id
    async fn find_by_id(&self, user_id: &str) -> Result<Option<Identity>>;

    /// Overwrite the stored refresh token (login), or clear it (logout).
    /// Clearing an already-absent value is not an error.
    async fn set_refresh_token(&self, user_id: &str, token: Option<&str>) -> Result<()>;

    /// Compare-and-set: swap `presented` for `next` only if `presented` is
    /// the currently stored value. Returns whether the swap happened.
    async fn rotate_refresh_token(
        &self,
        user_id: &str,
        presented: &str,
        next: &str,
    ) -> Result<bool>;

    /// Replace the stored password hash
    async fn set_password_hash(&self, user_id: &str, password_hash: &str) -> Result<()>;
}

// =============================================================================
// MongoDB-backed store
// =============================================================================

/// Production store over the `users` collection
#[derive(Clone)]
pub struct MongoCredentialStore {
    collection: MongoCollection<UserDoc>,
}

impl MongoCredentialStore {
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: mongo.collection::<UserDoc>(USER_COLLECTION).await?,
        })
    }
}

fn identity_from_doc(doc: UserDoc) -> Result<Identity> {
    let id = doc
        ._id
        .ok_or_else(|| TurnstileError::Database("User document missing _id".into()))?;
    Ok(Identity {
        id: id.to_hex(),
        username: doc.username,
        email: doc.email,
        full_name: doc.full_name,
        password_hash: doc.password_hash,
        refresh_token: doc.refresh_token,
    })
}

#[async_trait]
impl CredentialStore for MongoCredentialStore {
    async fn create(&self, new: NewIdentity) -> Result<Identity> {
        let doc = UserDoc::new(new.username, new.email, new.full_name, new.password_hash);
        let username = doc.username.clone();
        let email = doc.email.clone();
        let full_name = doc.full_name.clone();
        let password_hash = doc.password_hash.clone();

        // The unique indexes on username/email make this insert the
        // existence check; a lost race comes back as Conflict.
        let id = self.collection.insert_one(doc).await.map_err(|e| match e {
            TurnstileError::Conflict(_) => TurnstileError::Conflict(
                "An account with this username or email already exists".into(),
            ),
            other => other,
        })?;

        Ok(Identity {
            id: id.to_hex(),
            username,
            email,
            full_name,
            password_hash,
            refresh_token: None,
        })
    }

    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Identity>> {
        let filter = doc! {
            "$or": [
                { "username": identifier.to_lowercase() },
                { "email": identifier },
            ],
            "is_active": true,
        };
        match self.collection.find_one(filter).await? {
            Some(doc) => Ok(Some(identity_from_doc(doc)?)),
            None => Ok(None),
        }
    }

    async fn find_by_id(&self, user_id: &str) -> Result<Option<Identity>> {
        let oid = match ObjectId::parse_str(user_id) {
            Ok(oid) => oid,
            Err(_) => return Ok(None),
        };
        match self
            .collection
            .find_one(doc! { "_id": oid, "is_active": true })
            .await?
        {
            Some(doc) => Ok(Some(identity_from_doc(doc)?)),
            None => Ok(None),
        }
    }

    async fn set_refresh_token(&self, user_id: &str, token: Option<&str>) -> Result<()> {
        let oid = ObjectId::parse_str(user_id)
            .map_err(|_| TurnstileError::InvalidArgument(format!("Invalid user id: {user_id}")))?;

        let update = match token {
            Some(value) => doc! {
                "$set": {
                    "refresh_token": value,
                    "metadata.updated_at": bson::DateTime::now(),
                }
            },
            // $unset removes the field entirely, matching "absent"
            None => doc! {
                "$unset": { "refresh_token": 1 },
                "$set": { "metadata.updated_at": bson::DateTime::now() },
            },
        };

        self.collection.update_one(doc! { "_id": oid }, update).await?;
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        user_id: &str,
        presented: &str,
        next: &str,
    ) -> Result<bool> {
        let oid = ObjectId::parse_str(user_id)
            .map_err(|_| TurnstileError::InvalidArgument(format!("Invalid user id: {user_id}")))?;

        // Single-document CAS: the filter is the compare, the update is the
        // swap. A concurrent rotation that landed first leaves nothing for
        // this filter to match.
        let previous = self
            .collection
            .find_one_and_update(
                doc! { "_id": oid, "refresh_token": presented },
                doc! {
                    "$set": {
                        "refresh_token": next,
                        "metadata.updated_at": bson::DateTime::now(),
                    }
                },
            )
            .await?;

        Ok(previous.is_some())
    }

    async fn set_password_hash(&self, user_id: &str, password_hash: &str) -> Result<()> {
        let oid = ObjectId::parse_str(user_id)
            .map_err(|_| TurnstileError::InvalidArgument(format!("Invalid user id: {user_id}")))?;

        self.collection
            .update_one(
                doc! { "_id": oid },
                doc! {
                    "$set": {
                        "password_hash": password_hash,
                        "metadata.updated_at": bson::DateTime::now(),
                    }
                },
            )
            .await?;
        Ok(())
    }
}

// =============================================================================
// In-memory store (dev mode, test fake)
// =============================================================================

/// Mutex-backed store. Every operation holds the one lock, so rotation is
/// trivially a compare-and-set.
#[derive(Default)]
pub struct MemoryCredentialStore {
    users: Mutex<HashMap<String, Identity>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn create(&self, new: NewIdentity) -> Result<Identity> {
        let mut users = self.users.lock().unwrap();

        let username = new.username.to_lowercase();
        if users
            .values()
            .any(|u| u.username == username || u.email == new.email)
        {
            return Err(TurnstileError::Conflict(
                "An account with this username or email already exists".into(),
            ));
        }

        let identity = Identity {
            id: ObjectId::new().to_hex(),
            username,
            email: new.email,
            full_name: new.full_name,
            password_hash: new.password_hash,
            refresh_token: None,
        };
        users.insert(identity.id.clone(), identity.clone());
        Ok(identity)
    }

    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Identity>> {
        let users = self.users.lock().unwrap();
        let lowered = identifier.to_lowercase();
        Ok(users
            .values()
            .find(|u| u.username == lowered || u.email == identifier)
            .cloned())
    }

    async fn find_by_id(&self, user_id: &str) -> Result<Option<Identity>> {
        Ok(self.users.lock().unwrap().get(user_id).cloned())
    }

    async fn set_refresh_token(&self, user_id: &str, token: Option<&str>) -> Result<()> {
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.get_mut(user_id) {
            user.refresh_token = token.map(|t| t.to_string());
        }
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        user_id: &str,
        presented: &str,
        next: &str,
    ) -> Result<bool> {
        let mut users = self.users.lock().unwrap();
        match users.get_mut(user_id) {
            Some(user) if user.refresh_token.as_deref() == Some(presented) => {
                user.refresh_token = Some(next.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_password_hash(&self, user_id: &str, password_hash: &str) -> Result<()> {
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.get_mut(user_id) {
            user.password_hash = password_hash.to_string();
        }
        Ok(())
    }
}
