//! Session manager
//!
//! Orchestrates login, logout, refresh rotation, and access verification
//! over an injected credential store. A user holds at most one valid
//! refresh token: every login and every rotation overwrites it, and a
//! presented token that no longer matches the stored value is a replay.

pub mod store;

use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::{
    check_password_strength, hash_password, verify_password, TokenCodec, TokenKind, TokenSubject,
};
use crate::types::{Result, TurnstileError};

pub use store::{
    CredentialStore, Identity, MemoryCredentialStore, MongoCredentialStore, NewIdentity,
};

/// Access/refresh pair handed out by login and rotation
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access: String,
    pub refresh: String,
}

/// Authenticated identity extracted from a verified access token
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub identifier: String,
}

/// Fields required to register an account
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password: String,
}

/// Issues, verifies, and rotates session credentials
pub struct SessionManager {
    store: Arc<dyn CredentialStore>,
    codec: TokenCodec,
}

impl SessionManager {
    pub fn new(store: Arc<dyn CredentialStore>, codec: TokenCodec) -> Self {
        Self { store, codec }
    }

    /// Create an account. Returns the identity; no tokens are issued —
    /// the caller logs in separately.
    pub async fn register(&self, registration: Registration) -> Result<Identity> {
        let Registration {
            username,
            email,
            full_name,
            password,
        } = registration;

        if [&username, &email, &full_name, &password]
            .iter()
            .any(|field| field.trim().is_empty())
        {
            return Err(TurnstileError::InvalidArgument(
                "All fields are required".into(),
            ));
        }
        check_password_strength(&password)?;

        let identity = self
            .store
            .create(NewIdentity {
                username,
                email,
                full_name,
                password_hash: hash_password(&password)?,
            })
            .await?;

        info!(user_id = %identity.id, username = %identity.username, "registered new user");
        Ok(identity)
    }

    /// Authenticate with username-or-email and password.
    ///
    /// On success the new refresh token overwrites whatever was stored,
    /// which is what keeps one refresh credential valid per identity.
    pub async fn login(&self, identifier: &str, password: &str) -> Result<(Identity, SessionTokens)> {
        if identifier.trim().is_empty() || password.is_empty() {
            return Err(TurnstileError::InvalidArgument(
                "username or email and password are required".into(),
            ));
        }

        let identity = self
            .find_by_identifier_retry(identifier)
            .await?
            .ok_or_else(|| TurnstileError::NotFound("User doesn't exist".into()))?;

        if !verify_password(password, &identity.password_hash)? {
            return Err(TurnstileError::Unauthorized("Invalid user credentials".into()));
        }

        let tokens = self.mint_pair(&identity)?;
        self.store
            .set_refresh_token(&identity.id, Some(&tokens.refresh))
            .await?;

        info!(user_id = %identity.id, "login successful");
        Ok((identity, tokens))
    }

    /// Rotate a refresh token into a fresh access/refresh pair.
    ///
    /// The swap is a compare-and-set against the stored value: of two
    /// concurrent rotations with the same token, exactly one wins, and the
    /// loser's presented value reads as a replay.
    pub async fn refresh(&self, presented: Option<&str>) -> Result<SessionTokens> {
        let presented = presented.ok_or_else(|| {
            TurnstileError::Unauthenticated("Refresh token not found, please log in again".into())
        })?;

        let claims = self.codec.verify(presented, TokenKind::Refresh)?;

        let identity = self
            .find_by_id_retry(&claims.sub)
            .await?
            .ok_or_else(|| TurnstileError::InvalidToken("Invalid refresh token".into()))?;

        let tokens = self.mint_pair(&identity)?;
        let rotated = self
            .store
            .rotate_refresh_token(&identity.id, presented, &tokens.refresh)
            .await?;

        if !rotated {
            // The stored value moved on (rotation, logout, or theft):
            // this presented token is superseded. Surface the distinct
            // signal; revocation scope beyond that is the caller's call.
            warn!(
                user_id = %identity.id,
                token_iat = claims.iat,
                "refresh token reuse detected"
            );
            return Err(TurnstileError::TokenReuseDetected(identity.id));
        }

        Ok(tokens)
    }

    /// Invalidate the stored refresh token. Idempotent: logging out an
    /// already-logged-out identity is not an error.
    pub async fn logout(&self, user_id: &str) -> Result<()> {
        self.store.set_refresh_token(user_id, None).await?;
        info!(user_id = %user_id, "logged out");
        Ok(())
    }

    /// Verify an access token. Pure signature + expiry check — no store
    /// round-trip, so access tokens cannot be revoked before expiry.
    pub fn verify_access(&self, presented: Option<&str>) -> Result<AuthContext> {
        let presented = presented
            .ok_or_else(|| TurnstileError::Unauthenticated("No token provided".into()))?;

        let claims = self.codec.verify(presented, TokenKind::Access)?;
        Ok(AuthContext {
            user_id: claims.sub,
            identifier: claims.identifier,
        })
    }

    /// Fetch the up-to-date identity behind a verified access token
    pub async fn current_user(&self, user_id: &str) -> Result<Identity> {
        self.find_by_id_retry(user_id)
            .await?
            .ok_or_else(|| TurnstileError::NotFound("User not found".into()))
    }

    /// Verify the old password and store a hash of the new one
    pub async fn change_password(&self, user_id: &str, old: &str, new: &str) -> Result<()> {
        let identity = self
            .find_by_id_retry(user_id)
            .await?
            .ok_or_else(|| TurnstileError::NotFound("User not found".into()))?;

        if !verify_password(old, &identity.password_hash)? {
            return Err(TurnstileError::Unauthorized("Invalid old password".into()));
        }
        check_password_strength(new)?;

        self.store
            .set_password_hash(&identity.id, &hash_password(new)?)
            .await?;
        info!(user_id = %identity.id, "password changed");
        Ok(())
    }

    fn mint_pair(&self, identity: &Identity) -> Result<SessionTokens> {
        let subject = TokenSubject {
            user_id: identity.id.clone(),
            identifier: identity.username.clone(),
        };
        Ok(SessionTokens {
            access: self.codec.mint_access(&subject)?,
            refresh: self.codec.mint_refresh(&subject)?,
        })
    }

    async fn find_by_identifier_retry(&self, identifier: &str) -> Result<Option<Identity>> {
        match self.store.find_by_identifier(identifier).await {
            Err(e) if e.is_transient() => self.store.find_by_identifier(identifier).await,
            other => other,
        }
    }

    async fn find_by_id_retry(&self, user_id: &str) -> Result<Option<Identity>> {
        match self.store.find_by_id(user_id).await {
            Err(e) if e.is_transient() => self.store.find_by_id(user_id).await,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(MemoryCredentialStore::new()), TokenCodec::new_dev())
    }

    fn registration(username: &str) -> Registration {
        Registration {
            username: username.into(),
            email: format!("{username}@example.com"),
            full_name: "Test User".into(),
            password: "correct-horse-battery-staple".into(),
        }
    }

    async fn registered(manager: &SessionManager, username: &str) -> Identity {
        manager.register(registration(username)).await.unwrap()
    }

    #[tokio::test]
    async fn register_rejects_empty_fields() {
        let manager = manager();
        let mut reg = registration("chai");
        reg.full_name = "   ".into();
        assert!(matches!(
            manager.register(reg).await,
            Err(TurnstileError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn register_rejects_duplicates() {
        let manager = manager();
        registered(&manager, "chai").await;
        assert!(matches!(
            manager.register(registration("chai")).await,
            Err(TurnstileError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn login_then_verify_access() {
        let manager = manager();
        let identity = registered(&manager, "chai").await;

        let (user, tokens) = manager
            .login("chai", "correct-horse-battery-staple")
            .await
            .unwrap();
        assert_eq!(user.id, identity.id);

        let ctx = manager.verify_access(Some(&tokens.access)).unwrap();
        assert_eq!(ctx.user_id, identity.id);
        assert_eq!(ctx.identifier, "chai");
    }

    #[tokio::test]
    async fn login_matches_email_too() {
        let manager = manager();
        registered(&manager, "chai").await;

        assert!(manager
            .login("chai@example.com", "correct-horse-battery-staple")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn login_failures() {
        let manager = manager();
        registered(&manager, "chai").await;

        assert!(matches!(
            manager.login("nobody", "whatever-password").await,
            Err(TurnstileError::NotFound(_))
        ));
        assert!(matches!(
            manager.login("chai", "wrong-password").await,
            Err(TurnstileError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn verify_access_failures() {
        let manager = manager();
        assert!(matches!(
            manager.verify_access(None),
            Err(TurnstileError::Unauthenticated(_))
        ));
        assert!(matches!(
            manager.verify_access(Some("garbage")),
            Err(TurnstileError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn refresh_token_is_single_use() {
        let manager = manager();
        registered(&manager, "chai").await;
        let (_, tokens) = manager
            .login("chai", "correct-horse-battery-staple")
            .await
            .unwrap();

        // First rotation succeeds
        manager.refresh(Some(&tokens.refresh)).await.unwrap();

        // Replaying the superseded token is reuse, not merely invalid
        assert!(matches!(
            manager.refresh(Some(&tokens.refresh)).await,
            Err(TurnstileError::TokenReuseDetected(_))
        ));
    }

    #[tokio::test]
    async fn rotation_chain() {
        let manager = manager();
        registered(&manager, "chai").await;
        let (_, mut tokens) = manager
            .login("chai", "correct-horse-battery-staple")
            .await
            .unwrap();

        for _ in 0..3 {
            let previous = tokens.refresh.clone();
            tokens = manager.refresh(Some(&previous)).await.unwrap();
            assert_ne!(tokens.refresh, previous);

            // Each link in the chain works exactly once
            assert!(manager.refresh(Some(&previous)).await.is_err());
        }
    }

    #[tokio::test]
    async fn refresh_requires_a_refresh_token() {
        let manager = manager();
        registered(&manager, "chai").await;
        let (_, tokens) = manager
            .login("chai", "correct-horse-battery-staple")
            .await
            .unwrap();

        assert!(matches!(
            manager.refresh(None).await,
            Err(TurnstileError::Unauthenticated(_))
        ));
        // An access token is the wrong class even though it is validly signed
        assert!(matches!(
            manager.refresh(Some(&tokens.access)).await,
            Err(TurnstileError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn logout_kills_the_refresh_token() {
        let manager = manager();
        let identity = registered(&manager, "chai").await;
        let (_, tokens) = manager
            .login("chai", "correct-horse-battery-staple")
            .await
            .unwrap();

        manager.logout(&identity.id).await.unwrap();
        // Idempotent
        manager.logout(&identity.id).await.unwrap();

        assert!(manager.refresh(Some(&tokens.refresh)).await.is_err());
    }

    #[tokio::test]
    async fn login_supersedes_previous_refresh_token() {
        let manager = manager();
        registered(&manager, "chai").await;
        let (_, first) = manager
            .login("chai", "correct-horse-battery-staple")
            .await
            .unwrap();
        let (_, second) = manager
            .login("chai", "correct-horse-battery-staple")
            .await
            .unwrap();

        assert!(manager.refresh(Some(&first.refresh)).await.is_err());
        assert!(manager.refresh(Some(&second.refresh)).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_refresh_has_one_winner() {
        let manager = Arc::new(manager());
        registered(&manager, "chai").await;
        let (_, tokens) = manager
            .login("chai", "correct-horse-battery-staple")
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..2 {
            let manager = Arc::clone(&manager);
            let refresh = tokens.refresh.clone();
            handles.push(tokio::spawn(
                async move { manager.refresh(Some(&refresh)).await },
            ));
        }

        let mut successes = 0;
        let mut reuses = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(TurnstileError::TokenReuseDetected(_)) => reuses += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(reuses, 1);
    }

    #[tokio::test]
    async fn change_password_flow() {
        let manager = manager();
        let identity = registered(&manager, "chai").await;

        assert!(matches!(
            manager
                .change_password(&identity.id, "wrong-old", "new-password-123")
                .await,
            Err(TurnstileError::Unauthorized(_))
        ));

        manager
            .change_password(&identity.id, "correct-horse-battery-staple", "new-password-123")
            .await
            .unwrap();

        assert!(manager.login("chai", "correct-horse-battery-staple").await.is_err());
        assert!(manager.login("chai", "new-password-123").await.is_ok());
    }
}
