//! Data source abstraction
//!
//! This module defines the read-only contract every work item backend
//! implements, and the errors it can report.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::models::{Iteration, LinkedRef, WorkItem};
use crate::registry::Connection;

/// Errors reported by a work item backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("backend unreachable: {0}")]
    Transport(String),

    #[error("access denied by backend (HTTP {0})")]
    Unauthorized(u16),

    #[error("backend returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response from backend: {0}")]
    Decode(String),

    #[error("invalid connection settings: {0}")]
    InvalidConfig(String),
}

impl GatewayError {
    /// Returns true when the credentials themselves were rejected
    ///
    /// That is 401, or 203 (the sign-in page served for a bad token). A 403
    /// only denies access to the requested item, so it is not included.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, GatewayError::Unauthorized(401 | 203))
    }

    /// Returns true if the backend could not be reached at all
    pub fn is_transport(&self) -> bool {
        matches!(self, GatewayError::Transport(_))
    }
}

/// Basic facts about the project a connection points at
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectInfo {
    pub id: String,
    pub name: String,
}

/// Read-only access to a work item tracking backend
///
/// `Ok(None)` means the item does not exist; `Err` means the request itself
/// failed. Implementations must be safe to call concurrently.
#[async_trait]
pub trait WorkItemSource: Send + Sync {
    /// Short name of the backend, for logs
    fn backend_tag(&self) -> &'static str;

    /// Verifies the backend is reachable and accepts the credentials
    async fn test_connection(&self) -> Result<ProjectInfo, GatewayError>;

    /// Fetches one work item by id
    async fn fetch_item(&self, id: u64) -> Result<Option<WorkItem>, GatewayError>;

    /// Fetches one work item together with its raw relations
    async fn fetch_item_with_links(
        &self,
        id: u64,
    ) -> Result<Option<(WorkItem, Vec<LinkedRef>)>, GatewayError>;

    /// Runs a backend-specific query and returns matching ids in backend order
    async fn query_by_filter(&self, query: &str) -> Result<Vec<u64>, GatewayError>;

    /// Lists the iterations (sprints) defined for the project
    async fn list_iterations(&self) -> Result<Vec<Iteration>, GatewayError>;
}

/// Builds a [`WorkItemSource`] for a stored connection
pub trait SourceFactory: Send + Sync {
    fn connect(&self, connection: &Connection) -> Result<Arc<dyn WorkItemSource>, GatewayError>;
}
