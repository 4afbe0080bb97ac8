//! ERP Core - shared data structures for the admin session client
//!
//! Domain types exchanged with the auth backend, the unified error type,
//! configuration loading and logging setup.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use error::*;
pub use logging::*;
pub use types::*;

// Re-export commonly used external types
pub use tracing;
