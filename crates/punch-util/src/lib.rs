//! Shared utilities for punchclock
//!
//! This crate provides:
//! - ID types (UserId, SiteId, SessionId, BreakId, TicketRef)
//! - Clock access with debug-only mock time, wall-clock helpers
//! - Per-user rate limiting
//! - Default paths for config and data directories

mod ids;
mod paths;
mod rate_limit;
mod time;

pub use ids::*;
pub use paths::*;
pub use rate_limit::*;
pub use time::*;
