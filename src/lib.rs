//! Turnstile - session and engagement gateway for a video-sharing platform
//!
//! Turnstile carries the two subsystems of the platform API where incorrect
//! concurrency handling corrupts data silently instead of crashing loudly:
//!
//! - **Sessions**: short-lived access tokens plus single-use-per-rotation
//!   refresh tokens, with replay detection on rotation
//! - **Engagement**: the like/dislike relation between users and targets
//!   (videos, comments, tweets), with a strict one-edge-one-polarity
//!   invariant under concurrent toggles

pub mod auth;
pub mod config;
pub mod db;
pub mod engagement;
pub mod routes;
pub mod server;
pub mod session;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{Result, TurnstileError};
