//! Shared types for Turnstile

mod error;

pub use error::{Result, TurnstileError};
