//! In-memory work item source
//!
//! Serves a fixed set of work items. Used by tests and for offline demos;
//! individual ids can be made to fail to exercise per-item error handling.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::traits::{GatewayError, ProjectInfo, WorkItemSource};
use crate::models::{Iteration, LinkedRef, WorkItem};

#[derive(Debug, Default)]
pub struct InMemorySource {
    project: String,
    items: HashMap<u64, (WorkItem, Vec<LinkedRef>)>,
    failures: HashMap<u64, GatewayError>,
    iterations: Vec<Iteration>,
    /// (substring of the query, ids returned when it matches)
    query_results: Vec<(String, Vec<u64>)>,
    latency: Option<Duration>,
    executed_queries: Mutex<Vec<String>>,
    fetches: AtomicUsize,
}

impl InMemorySource {
    pub fn new(project: &str) -> Self {
        Self {
            project: project.to_string(),
            ..Self::default()
        }
    }

    /// Adds a work item without relations
    pub fn with_item(self, item: WorkItem) -> Self {
        self.with_links(item, Vec::new())
    }

    /// Adds a work item with relations
    pub fn with_links(mut self, item: WorkItem, links: Vec<LinkedRef>) -> Self {
        self.items.insert(item.id, (item, links));
        self
    }

    /// Makes every fetch of `id` fail with `error`
    pub fn with_failure(mut self, id: u64, error: GatewayError) -> Self {
        self.failures.insert(id, error);
        self
    }

    pub fn with_iteration(mut self, iteration: Iteration) -> Self {
        self.iterations.push(iteration);
        self
    }

    /// Returns `ids` for any query containing `needle`
    pub fn with_query_result(mut self, needle: &str, ids: Vec<u64>) -> Self {
        self.query_results.push((needle.to_string(), ids));
        self
    }

    /// Delays every fetch, so concurrent callers actually overlap
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queries executed so far, oldest first
    pub fn executed_queries(&self) -> Vec<String> {
        match self.executed_queries.lock() {
            Ok(queries) => queries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of item fetches served so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    async fn lookup(&self, id: u64) -> Result<Option<&(WorkItem, Vec<LinkedRef>)>, GatewayError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(err) = self.failures.get(&id) {
            return Err(err.clone());
        }
        Ok(self.items.get(&id))
    }
}

#[async_trait]
impl WorkItemSource for InMemorySource {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn test_connection(&self) -> Result<ProjectInfo, GatewayError> {
        Ok(ProjectInfo {
            id: format!("memory-{}", self.project),
            name: self.project.clone(),
        })
    }

    async fn fetch_item(&self, id: u64) -> Result<Option<WorkItem>, GatewayError> {
        Ok(self.lookup(id).await?.map(|(item, _)| item.clone()))
    }

    async fn fetch_item_with_links(
        &self,
        id: u64,
    ) -> Result<Option<(WorkItem, Vec<LinkedRef>)>, GatewayError> {
        Ok(self.lookup(id).await?.cloned())
    }

    async fn query_by_filter(&self, query: &str) -> Result<Vec<u64>, GatewayError> {
        match self.executed_queries.lock() {
            Ok(mut queries) => queries.push(query.to_string()),
            Err(poisoned) => poisoned.into_inner().push(query.to_string()),
        }
        Ok(self
            .query_results
            .iter()
            .find(|(needle, _)| query.contains(needle.as_str()))
            .map(|(_, ids)| ids.clone())
            .unwrap_or_default())
    }

    async fn list_iterations(&self) -> Result<Vec<Iteration>, GatewayError> {
        Ok(self.iterations.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_and_failures() {
        let source = InMemorySource::new("Shop")
            .with_links(WorkItem::new(1), vec![LinkedRef::tested_by(2)])
            .with_item(WorkItem::new(2))
            .with_failure(3, GatewayError::Transport("down".into()));

        let (item, links) = source.fetch_item_with_links(1).await.unwrap().unwrap();
        assert_eq!(item.id, 1);
        assert_eq!(links.len(), 1);
        assert!(source.fetch_item(2).await.unwrap().is_some());
        assert_eq!(source.fetch_item(9).await, Ok(None));
        assert!(source.fetch_item(3).await.unwrap_err().is_transport());
        assert_eq!(source.fetch_count(), 4);
    }

    #[tokio::test]
    async fn test_query_matching_is_recorded() {
        let source = InMemorySource::new("Shop").with_query_result("Sprint 4", vec![5, 6]);

        assert_eq!(source.query_by_filter("... 'Shop\\Sprint 4'").await.unwrap(), vec![5, 6]);
        assert!(source.query_by_filter("other").await.unwrap().is_empty());
        assert_eq!(source.executed_queries().len(), 2);
    }
}
