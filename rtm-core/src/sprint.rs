//! Sprint lookup
//!
//! Sprints are backend iterations. A sprint name resolves to the ids of the
//! requirements planned in it.

use tracing::instrument;

use crate::config::{EngineConfig, FieldMap};
use crate::gateway::{GatewayError, WorkItemSource};
use crate::models::{Iteration, TimeFrame};

/// Iterations that have started, oldest first as the backend returns them
pub async fn list_sprints(source: &dyn WorkItemSource) -> Result<Vec<Iteration>, GatewayError> {
    Ok(source
        .list_iterations()
        .await?
        .into_iter()
        .filter(|iteration| iteration.time_frame != TimeFrame::Future)
        .collect())
}

/// Quotes a value for use inside a WIQL string literal
fn wiql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// WIQL selecting the requirements of one iteration
pub fn sprint_query(fields: &FieldMap, requirement_type: &str, iteration_path: &str) -> String {
    format!(
        "SELECT [System.Id] FROM WorkItems WHERE [{}] = {} \
         AND [{}] = {} ORDER BY [System.Id]",
        fields.work_item_type,
        wiql_literal(requirement_type),
        fields.iteration_path,
        wiql_literal(iteration_path)
    )
}

/// Resolves a sprint name to requirement ids
///
/// The name is matched case-insensitively against iteration names, then
/// against full iteration paths. An unknown sprint yields no ids.
#[instrument(skip(source, config), fields(backend = source.backend_tag()))]
pub async fn resolve_sprint(
    source: &dyn WorkItemSource,
    name: &str,
    config: &EngineConfig,
) -> Result<Vec<u64>, GatewayError> {
    let wanted = name.trim();
    let iterations = source.list_iterations().await?;
    let found = iterations
        .iter()
        .find(|it| it.name.eq_ignore_ascii_case(wanted))
        .or_else(|| iterations.iter().find(|it| it.path.eq_ignore_ascii_case(wanted)));

    let Some(iteration) = found else {
        tracing::warn!(sprint = wanted, "No iteration matches sprint name");
        return Ok(Vec::new());
    };

    let ids = source
        .query_by_filter(&sprint_query(
            &config.fields,
            &config.requirement_type,
            &iteration.path,
        ))
        .await?;
    tracing::info!(sprint = %iteration.path, requirements = ids.len(), "Resolved sprint");
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InMemorySource;

    fn iteration(name: &str, time_frame: TimeFrame) -> Iteration {
        Iteration {
            id: name.to_lowercase(),
            name: name.to_string(),
            path: format!("Shop\\{}", name),
            start_date: None,
            finish_date: None,
            time_frame,
        }
    }

    fn source() -> InMemorySource {
        InMemorySource::new("Shop")
            .with_iteration(iteration("Sprint 1", TimeFrame::Past))
            .with_iteration(iteration("Sprint 2", TimeFrame::Current))
            .with_iteration(iteration("Sprint 3", TimeFrame::Future))
            .with_query_result("'Shop\\Sprint 2'", vec![11, 12, 13])
    }

    #[tokio::test]
    async fn test_list_sprints_excludes_future() {
        let sprints = list_sprints(&source()).await.unwrap();
        let names: Vec<&str> = sprints.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Sprint 1", "Sprint 2"]);
    }

    #[tokio::test]
    async fn test_resolve_sprint_by_name_and_path() {
        let source = source();
        let config = EngineConfig::default();
        assert_eq!(
            resolve_sprint(&source, "sprint 2", &config).await.unwrap(),
            vec![11, 12, 13]
        );
        assert_eq!(
            resolve_sprint(&source, "Shop\\Sprint 2", &config).await.unwrap(),
            vec![11, 12, 13]
        );

        let queries = source.executed_queries();
        assert_eq!(queries.len(), 2);
        assert!(queries[0].contains("[System.WorkItemType] = 'User Story'"));
        assert!(queries[0].contains("[System.IterationPath] = 'Shop\\Sprint 2'"));
    }

    #[tokio::test]
    async fn test_unknown_sprint_is_empty() {
        let source = source();
        assert!(resolve_sprint(&source, "Sprint 9", &EngineConfig::default()).await.unwrap().is_empty());
        assert!(source.executed_queries().is_empty());
    }

    #[test]
    fn test_query_escapes_quotes() {
        let query = sprint_query(&FieldMap::default(), "User Story", "Shop\\Bob's Sprint");
        assert!(query.contains("'Shop\\Bob''s Sprint'"));
    }

    #[tokio::test]
    async fn test_resolve_sprint_uses_configured_fields() {
        let source = source();
        let mut config = EngineConfig::default();
        config.requirement_type = "Product Backlog Item".to_string();
        config.fields.iteration_path = "Custom.Sprint".to_string();

        resolve_sprint(&source, "Sprint 2", &config).await.unwrap();

        let queries = source.executed_queries();
        assert!(queries[0].contains("[System.WorkItemType] = 'Product Backlog Item'"));
        assert!(queries[0].contains("[Custom.Sprint] = 'Shop\\Sprint 2'"));
        assert!(!queries[0].contains("[System.IterationPath]"));
    }
}
