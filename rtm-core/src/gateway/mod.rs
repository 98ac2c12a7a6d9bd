//! Work item gateway layer
//!
//! This module provides a trait-based abstraction over the tracking backend,
//! so the matrix engine can run against Azure DevOps or an in-memory set of
//! work items through the same interface.

mod azure;
mod memory;
mod traits;

pub use azure::{
    AzureDevOpsGateway, AzureSourceFactory, GatewayConfig, RetryPolicy, DEFAULT_API_VERSION,
};
pub use memory::InMemorySource;
pub use traits::{GatewayError, ProjectInfo, SourceFactory, WorkItemSource};
