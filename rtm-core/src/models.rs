use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::{EngineConfig, FieldMap};
use crate::criteria::{html_to_text, parse_acceptance_criteria, parse_criterion_reference};

/// A raw work item as returned by the tracking backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkItem {
    pub id: u64,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl WorkItem {
    /// Creates a work item with no fields
    pub fn new(id: u64) -> Self {
        Self {
            id,
            fields: Map::new(),
        }
    }

    /// Builder-style field setter
    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Gets a field value, treating JSON null as absent
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).filter(|v| !v.is_null())
    }

    /// Gets a field as text; numbers are stringified
    pub fn field_text(&self, name: &str) -> String {
        match self.field(name) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => String::new(),
        }
    }

    /// Returns true if the item's type matches, ignoring case
    pub fn is_type(&self, fields: &FieldMap, expected: &str) -> bool {
        self.field_text(&fields.work_item_type)
            .trim()
            .eq_ignore_ascii_case(expected.trim())
    }

    /// Returns true if the item declares a type at all
    pub fn has_type(&self, fields: &FieldMap) -> bool {
        !self.field_text(&fields.work_item_type).trim().is_empty()
    }
}

/// A relation from one work item to another
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkedRef {
    /// Relation kind, e.g. `Microsoft.VSTS.Common.TestedBy-Forward`
    pub kind: String,
    /// Display label of the relation, e.g. `Tested By`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Target reference; the id is the last path segment
    pub url: String,
}

impl LinkedRef {
    pub fn new(kind: &str, label: Option<&str>, url: &str) -> Self {
        Self {
            kind: kind.to_string(),
            label: label.map(str::to_string),
            url: url.to_string(),
        }
    }

    /// A "Tested By" relation pointing at the given work item id
    pub fn tested_by(target_id: u64) -> Self {
        Self::new(
            "Microsoft.VSTS.Common.TestedBy-Forward",
            Some("Tested By"),
            &format!("https://dev.azure.com/_apis/wit/workItems/{}", target_id),
        )
    }

    /// Resolves the target id from the reference
    pub fn target_id(&self) -> Option<u64> {
        self.url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .and_then(|segment| segment.parse::<u64>().ok())
    }

    /// Returns true if the relation links to a test artifact
    ///
    /// Covers "Tested By" relations and any kind or label mentioning "test".
    pub fn is_test_link(&self) -> bool {
        let mentions_test = |s: &str| s.to_lowercase().contains("test");
        mentions_test(self.kind.as_str()) || self.label.as_deref().is_some_and(mentions_test)
    }
}

/// Timeframe marker of an iteration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeFrame {
    Past,
    Current,
    Future,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A time-boxed grouping of work (a sprint)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Iteration {
    pub id: String,
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time_frame: TimeFrame,
}

/// A requirement (user story) fetched from the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Requirement {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub state: String,
    /// Raw priority; numeric or textual depending on the process template
    pub priority: Option<Value>,
    /// Last segment of the area path, or the title when there is no path
    pub feature: String,
    pub tags: String,
    /// Acceptance criteria keyed by their 1-based number
    pub acceptance_criteria: BTreeMap<u32, String>,
}

impl Requirement {
    /// Builds a requirement from a work item
    pub fn from_work_item(item: &WorkItem, fields: &FieldMap) -> Self {
        let title = item.field_text(&fields.title);
        let area_path = item.field_text(&fields.area_path);
        Self {
            id: item.id,
            description: html_to_text(&item.field_text(&fields.description)),
            state: item.field_text(&fields.state),
            priority: item.field(&fields.priority).cloned(),
            feature: feature_from_area_path(&area_path, &title),
            tags: item.field_text(&fields.tags),
            acceptance_criteria: parse_acceptance_criteria(
                &item.field_text(&fields.acceptance_criteria),
            ),
            title,
        }
    }
}

/// Derives the feature label from a `\`-separated area path
pub fn feature_from_area_path(area_path: &str, fallback: &str) -> String {
    area_path
        .split('\\')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .last()
        .unwrap_or(fallback)
        .to_string()
}

/// A test case linked to a requirement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCase {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub state: String,
    pub priority: Option<Value>,
    /// Derived from the state: Pass for done states, otherwise Fail
    pub execution: Execution,
    /// Raw step text, carried through untouched
    pub steps: String,
    /// Number of the acceptance criterion this test verifies
    pub criterion_ref: Option<u32>,
    /// Explicit scenario type tag
    pub scenario_type: Option<String>,
}

impl TestCase {
    /// Builds a test case from a work item
    pub fn from_work_item(item: &WorkItem, config: &EngineConfig) -> Self {
        let fields = &config.fields;
        let state = item.field_text(&fields.state);
        let scenario_type = item.field_text(&fields.scenario_type);
        Self {
            id: item.id,
            title: item.field_text(&fields.title),
            description: html_to_text(&item.field_text(&fields.description)),
            execution: if config.is_done_state(&state) {
                Execution::Pass
            } else {
                Execution::Fail
            },
            state,
            priority: item.field(&fields.priority).cloned(),
            steps: item.field_text(&fields.steps),
            criterion_ref: item
                .field(&fields.criterion_reference)
                .and_then(parse_criterion_reference),
            scenario_type: Some(scenario_type.trim().to_string()).filter(|s| !s.is_empty()),
        }
    }
}

/// Normalized priority of a matrix row
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "Low"),
            Priority::Medium => write!(f, "Medium"),
            Priority::High => write!(f, "High"),
        }
    }
}

/// Coverage status of a matrix row
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CoverageStatus {
    Covered,
    Missing,
}

impl fmt::Display for CoverageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoverageStatus::Covered => write!(f, "Covered"),
            CoverageStatus::Missing => write!(f, "Missing"),
        }
    }
}

/// Execution outcome of a matrix row
///
/// Covered rows are always Pass or Fail; Blank is reserved for Missing rows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Execution {
    Pass,
    Fail,
    #[serde(rename = "")]
    Blank,
}

impl Execution {
    pub fn is_blank(&self) -> bool {
        matches!(self, Execution::Blank)
    }
}

impl fmt::Display for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Execution::Pass => write!(f, "Pass"),
            Execution::Fail => write!(f, "Fail"),
            Execution::Blank => Ok(()),
        }
    }
}

/// Scenario type of a matrix row
///
/// The classifier only produces Functional, API, UI, Integration, Performance
/// and Security. Positive, Negative and Edge Case appear only when a test case
/// tags itself that way; any other tag is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScenarioType {
    Functional,
    Api,
    Ui,
    Integration,
    Performance,
    Security,
    Positive,
    Negative,
    EdgeCase,
    Custom(String),
}

impl ScenarioType {
    /// Parses an explicit scenario type label
    pub fn from_label(s: &str) -> Self {
        let trimmed = s.trim();
        match trimmed.to_lowercase().as_str() {
            "functional" => ScenarioType::Functional,
            "api" => ScenarioType::Api,
            "ui" => ScenarioType::Ui,
            "integration" => ScenarioType::Integration,
            "performance" => ScenarioType::Performance,
            "security" => ScenarioType::Security,
            "positive" => ScenarioType::Positive,
            "negative" => ScenarioType::Negative,
            "edge case" | "edge-case" | "edge_case" | "edgecase" => ScenarioType::EdgeCase,
            _ => ScenarioType::Custom(trimmed.to_string()),
        }
    }

    /// Parses an optional tag, defaulting to Functional
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag.map(str::trim) {
            Some(t) if !t.is_empty() => Self::from_label(t),
            _ => ScenarioType::Functional,
        }
    }

    /// The display label, also used on the wire
    pub fn label(&self) -> &str {
        match self {
            ScenarioType::Functional => "Functional",
            ScenarioType::Api => "API",
            ScenarioType::Ui => "UI",
            ScenarioType::Integration => "Integration",
            ScenarioType::Performance => "Performance",
            ScenarioType::Security => "Security",
            ScenarioType::Positive => "Positive",
            ScenarioType::Negative => "Negative",
            ScenarioType::EdgeCase => "Edge Case",
            ScenarioType::Custom(name) => name,
        }
    }
}

impl fmt::Display for ScenarioType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl Serialize for ScenarioType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for ScenarioType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ScenarioType::from_tag(Some(&s)))
    }
}

/// One row of the traceability matrix
///
/// Field names on the wire are fixed: `UserStoryId`, `Feature`,
/// `ScenarioType`, `Description`, `TestCaseId`, `Status`, `Priority`,
/// `Execution`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct MatrixRow {
    pub user_story_id: u64,
    pub feature: String,
    pub scenario_type: ScenarioType,
    pub description: String,
    #[serde(with = "empty_as_none")]
    pub test_case_id: Option<u64>,
    pub status: CoverageStatus,
    pub priority: Priority,
    pub execution: Execution,
}

impl MatrixRow {
    /// Checks the row-level invariants:
    /// Covered iff a test case id is present, and a non-blank execution only on Covered rows
    pub fn is_consistent(&self) -> bool {
        let covered = self.status == CoverageStatus::Covered;
        covered == self.test_case_id.is_some() && (self.execution.is_blank() || covered)
    }
}

/// `TestCaseId` is a number when present and `""` when absent
mod empty_as_none {
    use serde::de::{self, Deserializer, Unexpected, Visitor};
    use serde::Serializer;
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(id) => serializer.serialize_u64(*id),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        struct IdVisitor;

        impl<'de> Visitor<'de> for IdVisitor {
            type Value = Option<u64>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a test case id or an empty string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(Some(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u64::try_from(v)
                    .map(Some)
                    .map_err(|_| E::invalid_value(Unexpected::Signed(v), &self))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                let v = v.trim();
                if v.is_empty() {
                    return Ok(None);
                }
                v.parse::<u64>()
                    .map(Some)
                    .map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(None)
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

/// Why an item was left out of the matrix
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DiagnosticKind {
    /// The requirement id does not exist
    NotFound,
    /// The id exists but is not of the expected work item type
    WrongType,
    /// The requirement could not be fetched
    FetchFailed,
    /// A linked test case could not be resolved
    TestCaseUnavailable,
    /// Processing the requirement panicked
    Aborted,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::NotFound => write!(f, "not found"),
            DiagnosticKind::WrongType => write!(f, "wrong type"),
            DiagnosticKind::FetchFailed => write!(f, "fetch failed"),
            DiagnosticKind::TestCaseUnavailable => write!(f, "test case unavailable"),
            DiagnosticKind::Aborted => write!(f, "aborted"),
        }
    }
}

/// A skipped item, reported alongside the matrix
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub requirement_id: u64,
    /// Linked item id when the problem was with a test case
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<u64>,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(requirement_id: u64, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            requirement_id,
            item_id: None,
            kind,
            message: message.into(),
        }
    }

    pub fn for_item(mut self, item_id: u64) -> Self {
        self.item_id = Some(item_id);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.item_id {
            Some(item) => write!(
                f,
                "#{} (linked #{}): {}: {}",
                self.requirement_id, item, self.kind, self.message
            ),
            None => write!(f, "#{}: {}: {}", self.requirement_id, self.kind, self.message),
        }
    }
}

/// A generated matrix plus the items that were skipped
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MatrixReport {
    pub rows: Vec<MatrixRow>,
    pub diagnostics: Vec<Diagnostic>,
}
