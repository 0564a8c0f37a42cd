//! Punch engine for punchclock
//!
//! This crate is the heart of punchd, containing:
//! - Geofence verification (haversine distance, plausibility scoring)
//! - GPS spoofing heuristics
//! - Session state machine (Idle -> Active <-> OnBreak -> Completed)
//! - Exception escalation to the approval workflow
//! - Team presence for managers

mod engine;
mod error;
mod escalator;
pub mod geo;
mod session;
mod spoof;
mod team;

pub use engine::*;
pub use error::*;
pub use escalator::*;
pub use session::*;
pub use spoof::*;
pub use team::*;
