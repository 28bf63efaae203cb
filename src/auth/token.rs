//! Signed token minting and verification
//!
//! Stateless HS256 tokens carrying an identity claim. Access and refresh
//! tokens are separate expiry classes signed with separate secrets; the
//! `kind` claim keeps one from standing in for the other.
//!
//! Security notes:
//! - Tokens are signed with HS256 (HMAC-SHA256)
//! - Secrets must be at least 32 characters outside dev mode
//! - Expiry is enforced with zero leeway

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::types::{Result, TurnstileError};

/// Which expiry class a token belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Access => write!(f, "access"),
            TokenKind::Refresh => write!(f, "refresh"),
        }
    }
}

/// Payload carried in every signed token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id the token proves
    pub sub: String,
    /// User identifier (username or email) for logging and display
    pub identifier: String,
    /// Expiry class discriminant
    pub kind: TokenKind,
    /// Unique token id. Guarantees each minted token is byte-distinct, so
    /// refresh rotation always produces a new stored value even when two
    /// rotations land within the same second.
    pub jti: String,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Identity a token is minted for
#[derive(Debug, Clone)]
pub struct TokenSubject {
    pub user_id: String,
    pub identifier: String,
}

#[derive(Clone)]
struct SigningKey {
    secret: String,
    expiry_seconds: u64,
}

/// Mints and verifies the two token classes
#[derive(Clone)]
pub struct TokenCodec {
    access: SigningKey,
    refresh: SigningKey,
}

impl TokenCodec {
    /// Create a codec from configured secrets
    ///
    /// Returns an error if either secret is empty or too short.
    pub fn new(
        access_secret: String,
        access_expiry_seconds: u64,
        refresh_secret: String,
        refresh_expiry_seconds: u64,
    ) -> Result<Self> {
        for (name, secret) in [
            ("ACCESS_TOKEN_SECRET", &access_secret),
            ("REFRESH_TOKEN_SECRET", &refresh_secret),
        ] {
            if secret.is_empty() {
                return Err(TurnstileError::Config(format!("{} is required", name)));
            }
            if secret.len() < 32 {
                return Err(TurnstileError::Config(format!(
                    "{} must be at least 32 characters",
                    name
                )));
            }
        }

        Ok(Self {
            access: SigningKey {
                secret: access_secret,
                expiry_seconds: access_expiry_seconds,
            },
            refresh: SigningKey {
                secret: refresh_secret,
                expiry_seconds: refresh_expiry_seconds,
            },
        })
    }

    /// Create a codec for dev mode and tests
    pub fn new_dev() -> Self {
        Self {
            access: SigningKey {
                secret: "dev-only-insecure-access-secret-0123456789".into(),
                expiry_seconds: 3600,
            },
            refresh: SigningKey {
                secret: "dev-only-insecure-refresh-secret-0123456789".into(),
                expiry_seconds: 864_000,
            },
        }
    }

    fn key(&self, kind: TokenKind) -> &SigningKey {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    /// Mint a short-lived access token
    pub fn mint_access(&self, subject: &TokenSubject) -> Result<String> {
        self.mint(TokenKind::Access, subject)
    }

    /// Mint a long-lived refresh token
    pub fn mint_refresh(&self, subject: &TokenSubject) -> Result<String> {
        self.mint(TokenKind::Refresh, subject)
    }

    fn mint(&self, kind: TokenKind, subject: &TokenSubject) -> Result<String> {
        let now = unix_now()?;
        let key = self.key(kind);

        let claims = Claims {
            sub: subject.user_id.clone(),
            identifier: subject.identifier.clone(),
            kind,
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + key.expiry_seconds,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(key.secret.as_bytes()),
        )
        .map_err(|e| TurnstileError::Internal(format!("Failed to mint {} token: {}", kind, e)))
    }

    /// Verify signature and expiry, and that the token is of the expected
    /// class. Returns the decoded claims on success.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.leeway = 0;

        let key = self.key(expected);
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(key.secret.as_bytes()),
            &validation,
        )
        .map_err(|err| {
            use jsonwebtoken::errors::ErrorKind;
            let msg = match err.kind() {
                ErrorKind::ExpiredSignature => "token expired",
                ErrorKind::InvalidSignature => "invalid signature",
                ErrorKind::InvalidToken => "malformed token",
                _ => "token validation failed",
            };
            TurnstileError::InvalidToken(msg.into())
        })?;

        if data.claims.kind != expected {
            return Err(TurnstileError::InvalidToken(format!(
                "expected {} token, got {}",
                expected, data.claims.kind
            )));
        }

        Ok(data.claims)
    }
}

/// Current Unix timestamp in seconds
fn unix_now() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| TurnstileError::Internal(format!("System time error: {}", e)))
}

/// Extract a bearer token from an Authorization header value.
/// Supports "Bearer <token>" format and raw tokens.
pub fn extract_token_from_header(auth_header: Option<&str>) -> Option<&str> {
    let header = auth_header?;

    if let Some(token) = header.strip_prefix("Bearer ") {
        let token = token.trim();
        if !token.is_empty() {
            return Some(token);
        }
    }

    if !header.contains(' ') {
        let token = header.trim();
        if !token.is_empty() {
            return Some(token);
        }
    }

    None
}

/// Extract a named cookie value from a Cookie header value
pub fn extract_token_from_cookie<'a>(cookie_header: Option<&'a str>, name: &str) -> Option<&'a str> {
    let header = cookie_header?;

    for pair in header.split(';') {
        let pair = pair.trim();
        if let Some((key, value)) = pair.split_once('=') {
            if key == name && !value.is_empty() {
                return Some(value);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_codec() -> TokenCodec {
        TokenCodec::new(
            "access-secret-that-is-at-least-32-chars".into(),
            3600,
            "refresh-secret-that-is-at-least-32-chars".into(),
            864_000,
        )
        .unwrap()
    }

    fn subject() -> TokenSubject {
        TokenSubject {
            user_id: "64a7f0c2e13d5a0001b0c001".into(),
            identifier: "chai@example.com".into(),
        }
    }

    #[test]
    fn mint_and_verify_access() {
        let codec = test_codec();
        let token = codec.mint_access(&subject()).unwrap();

        let claims = codec.verify(&token, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, "64a7f0c2e13d5a0001b0c001");
        assert_eq!(claims.identifier, "chai@example.com");
        assert_eq!(claims.kind, TokenKind::Access);
    }

    #[test]
    fn refresh_token_rejected_as_access() {
        let codec = test_codec();
        let token = codec.mint_refresh(&subject()).unwrap();

        // Different secret AND different kind claim; either alone must sink it
        assert!(matches!(
            codec.verify(&token, TokenKind::Access),
            Err(TurnstileError::InvalidToken(_))
        ));
    }

    #[test]
    fn minted_tokens_are_byte_distinct() {
        let codec = test_codec();
        let t1 = codec.mint_refresh(&subject()).unwrap();
        let t2 = codec.mint_refresh(&subject()).unwrap();
        // Same subject, same second: jti still separates them
        assert_ne!(t1, t2);
    }

    #[test]
    fn wrong_secret_fails() {
        let codec = test_codec();
        let other = TokenCodec::new(
            "a-completely-different-access-secret-123".into(),
            3600,
            "a-completely-different-refresh-secret-12".into(),
            864_000,
        )
        .unwrap();

        let token = codec.mint_access(&subject()).unwrap();
        assert!(other.verify(&token, TokenKind::Access).is_err());
    }

    #[test]
    fn expired_token_fails() {
        let codec = test_codec();
        let now = unix_now().unwrap();

        let claims = Claims {
            sub: "u1".into(),
            identifier: "u1@example.com".into(),
            kind: TokenKind::Access,
            jti: Uuid::new_v4().to_string(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(codec.access.secret.as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            codec.verify(&token, TokenKind::Access),
            Err(TurnstileError::InvalidToken(_))
        ));
    }

    #[test]
    fn garbage_token_fails() {
        let codec = test_codec();
        assert!(codec.verify("not-a-token", TokenKind::Access).is_err());
        assert!(codec.verify("", TokenKind::Refresh).is_err());
    }

    #[test]
    fn secret_length_is_enforced() {
        assert!(TokenCodec::new("short".into(), 3600, "also-short".into(), 7200).is_err());
        assert!(TokenCodec::new(
            "access-secret-that-is-at-least-32-chars".into(),
            3600,
            "refresh-secret-that-is-at-least-32-chars".into(),
            7200
        )
        .is_ok());
    }

    #[test]
    fn header_extraction() {
        assert_eq!(
            extract_token_from_header(Some("Bearer abc123")),
            Some("abc123")
        );
        assert_eq!(extract_token_from_header(Some("abc123")), Some("abc123"));
        assert_eq!(extract_token_from_header(None), None);
        assert_eq!(extract_token_from_header(Some("")), None);
        assert_eq!(extract_token_from_header(Some("Bearer ")), None);
        assert_eq!(extract_token_from_header(Some("Basic abc123")), None);
    }

    #[test]
    fn cookie_extraction() {
        assert_eq!(
            extract_token_from_cookie(Some("accessToken=abc; refreshToken=def"), "refreshToken"),
            Some("def")
        );
        assert_eq!(
            extract_token_from_cookie(Some("accessToken=abc"), "accessToken"),
            Some("abc")
        );
        assert_eq!(
            extract_token_from_cookie(Some("accessToken="), "accessToken"),
            None
        );
        assert_eq!(extract_token_from_cookie(None, "accessToken"), None);
    }
}
