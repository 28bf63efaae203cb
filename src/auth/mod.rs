//! Authentication primitives for Turnstile
//!
//! Provides:
//! - Signed access/refresh token minting and verification
//! - Password hashing with Argon2

pub mod password;
pub mod token;

pub use password::{check_password_strength, hash_password, verify_password, MIN_PASSWORD_LEN};
pub use token::{
    extract_token_from_cookie, extract_token_from_header, Claims, TokenCodec, TokenKind,
    TokenSubject,
};
