//! Shared state for the HTTP surfaces

use crate::db::Database;
use crate::requester::RequesterService;
use crate::submitter::ProxyService;
use std::sync::Arc;

/// State of the proxy router
///
/// Cloned for each request (cheap Arc clone).
#[derive(Clone)]
pub struct ProxyState {
    /// Submission service
    pub service: Arc<ProxyService>,
}

impl ProxyState {
    /// Create a new ProxyState
    pub fn new(service: Arc<ProxyService>) -> Self {
        Self { service }
    }
}

/// State of the requester's monitoring router
#[derive(Clone)]
pub struct RequesterState {
    /// Consumer service, source of counters and events
    pub service: Arc<RequesterService>,

    /// Task store, read for per-status counts
    pub db: Database,
}

impl RequesterState {
    /// Create a new RequesterState
    pub fn new(service: Arc<RequesterService>, db: Database) -> Self {
        Self { service, db }
    }
}
