//! ERP Session - client-side authentication lifecycle
//!
//! [`SessionManager`] owns the access/refresh token pair, the current user and
//! a coalescing permission cache. It restores a persisted session on startup,
//! renews the access token in the background before it expires, and degrades
//! to an anonymous session whenever the token set stops being valid.
//!
//! ```text
//! Uninitialized -> Initializing -> Authenticated | Anonymous
//! Authenticated -> Authenticated   (refresh)
//! Authenticated -> Anonymous       (logout, failed refresh)
//! ```

pub mod manager;
pub mod navigation;
pub mod permissions;
pub mod renewal;
pub mod state;

pub use manager::{SessionManager, SessionManagerBuilder, SessionOptions};
pub use navigation::{Navigator, NoopNavigator, RecordingNavigator};
pub use permissions::PermissionCache;
pub use renewal::RenewalOutcome;
pub use state::{SessionSnapshot, TokenPair};

pub use erp_core::{SessionError, SessionResult, SessionStatus};
