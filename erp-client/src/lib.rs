//! ERP Client - network and storage collaborators of the session manager
//!
//! - [`api`]: the [`ApiClient`] trait and its reqwest implementation
//! - [`storage`]: the [`TokenStore`] trait with memory and file backends

pub mod api;
pub mod storage;

pub use api::{ApiClient, ApiClientConfig, AuthEndpoints, HttpApiClient};
pub use storage::{FileTokenStore, MemoryTokenStore, StoredTokens, TokenStore};
