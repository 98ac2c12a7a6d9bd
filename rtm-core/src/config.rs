//! Engine configuration
//!
//! Everything the matrix engine needs to interpret backend work items is
//! carried in explicit structs passed to constructors. Nothing here reads
//! process-wide state except [`default_database_path`] and [`AppConfig::load`],
//! which are only called from the binaries.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default number of requirement pipelines processed concurrently
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Names of the backend fields read from each work item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FieldMap {
    pub title: String,
    pub description: String,
    pub state: String,
    pub priority: String,
    pub area_path: String,
    pub iteration_path: String,
    pub tags: String,
    pub work_item_type: String,
    pub acceptance_criteria: String,
    /// Field on a test case naming the acceptance criterion it verifies
    pub criterion_reference: String,
    /// Optional explicit scenario type on a test case
    pub scenario_type: String,
    pub steps: String,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            title: "System.Title".to_string(),
            description: "System.Description".to_string(),
            state: "System.State".to_string(),
            priority: "Microsoft.VSTS.Common.Priority".to_string(),
            area_path: "System.AreaPath".to_string(),
            iteration_path: "System.IterationPath".to_string(),
            tags: "System.Tags".to_string(),
            work_item_type: "System.WorkItemType".to_string(),
            acceptance_criteria: "Microsoft.VSTS.Common.AcceptanceCriteria".to_string(),
            criterion_reference: "Custom.ACCriteria".to_string(),
            scenario_type: "Custom.ScenarioType".to_string(),
            steps: "Microsoft.VSTS.TCM.Steps".to_string(),
        }
    }
}

/// What to do with linked test cases that reference no known criterion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnreferencedTestPolicy {
    /// Leave them out of the matrix
    #[default]
    Drop,
    /// Emit one Covered row each, after the criterion rows
    AppendCovered,
}

/// What to do when a requirement has linked tests but produced no rows
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmptyCriteriaPolicy {
    /// Emit the same single Missing row as a requirement without tests
    #[default]
    FallbackMissing,
    /// Emit nothing for the requirement
    EmitNothing,
}

/// Reconciliation policies for the ambiguous cases
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ReconcilePolicy {
    pub unreferenced_tests: UnreferencedTestPolicy,
    pub empty_criteria: EmptyCriteriaPolicy,
}

/// Configuration for [`crate::RtmEngine`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of requirements processed at the same time
    pub concurrency: usize,
    /// Work item type a requested id must have to be treated as a requirement
    pub requirement_type: String,
    /// Work item type expected for linked test cases
    pub test_case_type: String,
    /// Test case states that count as a passing execution
    pub done_states: Vec<String>,
    pub fields: FieldMap,
    pub policy: ReconcilePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            requirement_type: "User Story".to_string(),
            test_case_type: "Test Case".to_string(),
            done_states: vec!["Done".to_string(), "Closed".to_string(), "Passed".to_string()],
            fields: FieldMap::default(),
            policy: ReconcilePolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Returns true if the state is one of the configured done states
    pub fn is_done_state(&self, state: &str) -> bool {
        let state = state.trim();
        self.done_states.iter().any(|s| s.eq_ignore_ascii_case(state))
    }
}

/// Application-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    /// Path of the connection registry database
    pub database: Option<PathBuf>,
}

impl AppConfig {
    /// Loads the configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))
    }

    /// Loads the file if given, otherwise returns defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Resolves the registry database path
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => default_database_path(),
        }
    }
}

/// Gets the path to the connection registry database
pub fn default_database_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("RTM_DB") {
        return Ok(PathBuf::from(path));
    }

    let config_dir = dirs::config_dir().context("Failed to determine config directory")?;

    Ok(config_dir.join("rtm").join("connections.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.requirement_type, "User Story");
        assert_eq!(config.policy.unreferenced_tests, UnreferencedTestPolicy::Drop);
        assert_eq!(config.policy.empty_criteria, EmptyCriteriaPolicy::FallbackMissing);
    }

    #[test]
    fn test_done_state_is_case_insensitive() {
        let config = EngineConfig::default();
        assert!(config.is_done_state("Done"));
        assert!(config.is_done_state("closed "));
        assert!(!config.is_done_state("Design"));
        assert!(!config.is_done_state(""));
    }

    #[test]
    fn test_load_partial_yaml() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("rtm.yaml");
        fs::write(
            &path,
            "engine:\n  concurrency: 2\n  policy:\n    unreferenced_tests: append_covered\ndatabase: /tmp/x.db\n",
        )?;

        let config = AppConfig::load(&path)?;
        assert_eq!(config.engine.concurrency, 2);
        assert_eq!(
            config.engine.policy.unreferenced_tests,
            UnreferencedTestPolicy::AppendCovered
        );
        assert_eq!(config.engine.fields.title, "System.Title");
        assert_eq!(config.database_path()?, PathBuf::from("/tmp/x.db"));
        Ok(())
    }
}
