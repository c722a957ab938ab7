//! Background tasks for the signaling hub.
//!
//! # Tasks
//!
//! - `inactivity_reaper` - Removes stale rooms and peers from storage and the hub

pub mod inactivity_reaper;

pub use inactivity_reaper::{start_inactivity_reaper, ReaperConfig};
