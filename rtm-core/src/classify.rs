//! Scenario type and priority classification

use serde_json::Value;

use crate::models::{Priority, ScenarioType};

/// Keyword groups checked in order; the first group with a hit wins
const SCENARIO_KEYWORDS: &[(&[&str], ScenarioType)] = &[
    (&["api", "service", "endpoint"], ScenarioType::Api),
    (&["ui", "interface", "screen", "page"], ScenarioType::Ui),
    (&["integration", "end-to-end", "e2e"], ScenarioType::Integration),
    (&["performance", "load", "stress"], ScenarioType::Performance),
    (
        &["security", "authentication", "authorization"],
        ScenarioType::Security,
    ),
];

/// Classifies free text into a scenario type
///
/// Matching is plain substring containment on the lower-cased text, so
/// "guide" counts as "ui" and "download" as "load".
pub fn classify_scenario_type(title: &str, description: &str, tags: &str) -> ScenarioType {
    let text = format!("{} {} {}", title, description, tags).to_lowercase();

    SCENARIO_KEYWORDS
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| text.contains(k)))
        .map(|(_, scenario)| scenario.clone())
        .unwrap_or(ScenarioType::Functional)
}

/// Maps a raw backend priority to Low, Medium or High
///
/// Missing and unrecognized values map to Medium.
pub fn map_priority(raw: Option<&Value>) -> Priority {
    let text = match raw {
        Some(Value::String(s)) => s.trim().to_lowercase(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => return Priority::Medium,
    };

    match text.as_str() {
        "1" | "critical" | "high" => Priority::High,
        "2" | "medium" | "normal" => Priority::Medium,
        "3" | "4" | "low" => Priority::Low,
        _ => Priority::Medium,
    }
}
