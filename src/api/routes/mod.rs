//! Route handlers
//!
//! - [`tasks`] - task submission and result lookup (proxy)
//! - [`system`] - health, OpenAPI, metrics and events

use serde::{Deserialize, Serialize};

mod system;
mod tasks;

pub use system::*;
pub use tasks::*;

/// Body of the health endpoints
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct HealthResponse {
    /// `ok`, or `shutting_down` once the requester stopped accepting work
    pub status: String,
    /// Crate version
    pub version: String,
}

impl HealthResponse {
    pub(crate) fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
