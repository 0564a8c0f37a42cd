//! Collaborator interfaces for punchclock
//!
//! The attendance engine talks to three services it does not own:
//! the approval workflow (exception tickets), the evidence store (photo
//! references) and the org directory (manager rosters). This crate holds
//! the traits plus the HTTP, static and mock implementations.

mod directory;
mod http;
mod mock;
mod traits;

pub use directory::*;
pub use http::*;
pub use mock::*;
pub use traits::*;
