//! Domain and wire types for punchclock
//!
//! This crate defines the stable API between punchd and its clients:
//! - Sessions, breaks, location samples and workplace sites
//! - Typed request bodies, one per transition
//! - Responses and stable error kinds

mod error;
mod requests;
mod types;

pub use error::*;
pub use requests::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
