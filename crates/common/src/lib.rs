//! Common types shared across the GoMeet signaling components.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for shared identifier types
pub mod types;
