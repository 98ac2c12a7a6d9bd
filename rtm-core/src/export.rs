use crate::coverage::CoverageStatistics;
use crate::models::{Diagnostic, MatrixReport, MatrixRow};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Column names of the matrix table, matching the JSON field names
pub const MATRIX_COLUMNS: [&str; 8] = [
    "UserStoryId",
    "Feature",
    "ScenarioType",
    "Description",
    "TestCaseId",
    "Status",
    "Priority",
    "Execution",
];

const FEATURE_COLUMNS: [&str; 10] = [
    "Feature",
    "Total Use Cases",
    "Positive Covered",
    "Negative Covered",
    "Edge Cases Covered",
    "Integration Covered",
    "Total Covered",
    "Coverage %",
    "Pass",
    "Fail",
];

/// A generated matrix with its statistics, as served and exported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub matrix: Vec<MatrixRow>,
    pub statistics: CoverageStatistics,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

impl ReportDocument {
    pub fn new(report: MatrixReport) -> Self {
        let statistics = CoverageStatistics::compute(&report.rows);
        Self {
            matrix: report.rows,
            statistics,
            diagnostics: report.diagnostics,
        }
    }
}

/// Export a report document to JSON format
pub fn export_json(document: &ReportDocument, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(document)?;
    fs::write(output_path, json)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    tracing::info!(
        path = %output_path.display(),
        rows = document.matrix.len(),
        "Exported matrix to JSON"
    );
    Ok(())
}

/// Quotes a CSV field when it contains a separator, quote or line break
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_line<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut line = fields
        .into_iter()
        .map(|f| csv_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

fn matrix_cells(row: &MatrixRow) -> [String; 8] {
    [
        row.user_story_id.to_string(),
        row.feature.clone(),
        row.scenario_type.to_string(),
        row.description.clone(),
        row.test_case_id.map(|id| id.to_string()).unwrap_or_default(),
        row.status.to_string(),
        row.priority.to_string(),
        row.execution.to_string(),
    ]
}

/// Render the workbook as CSV
///
/// Holds the matrix table, then a blank line and the KPI key/value table,
/// then a blank line and the per-feature table.
pub fn render_workbook_csv(rows: &[MatrixRow], stats: &CoverageStatistics) -> String {
    let mut output = String::new();

    output.push_str(&csv_line(MATRIX_COLUMNS));
    for row in rows {
        output.push_str(&csv_line(matrix_cells(row)));
    }

    output.push('\n');
    output.push_str(&csv_line(["KPI", "Value"]));
    for kpi in stats.kpis() {
        output.push_str(&csv_line([kpi.label, kpi.value]));
    }

    output.push('\n');
    output.push_str(&csv_line(FEATURE_COLUMNS));
    for module in &stats.module_wise_coverage {
        output.push_str(&csv_line([
            module.feature.clone(),
            module.total_use_cases.to_string(),
            module.positive_covered.to_string(),
            module.negative_covered.to_string(),
            module.edge_cases_covered.to_string(),
            module.integration_covered.to_string(),
            module.total_covered.to_string(),
            format!("{}%", module.coverage_percentage),
            module.pass.to_string(),
            module.fail.to_string(),
        ]));
    }

    output
}

/// Export the CSV workbook to a file
pub fn export_workbook(rows: &[MatrixRow], stats: &CoverageStatistics, output_path: &Path) -> Result<()> {
    fs::write(output_path, render_workbook_csv(rows, stats))
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    tracing::info!(path = %output_path.display(), rows = rows.len(), "Exported workbook");
    Ok(())
}

fn markdown_cell(value: &str) -> String {
    value.replace('|', "\\|").replace(['\r', '\n'], " ")
}

/// Render a human-readable markdown summary
pub fn render_markdown(rows: &[MatrixRow], stats: &CoverageStatistics) -> String {
    let mut output = String::new();

    output.push_str("# Requirements Traceability Matrix\n\n");

    output.push_str("## Summary\n\n");
    output.push_str("| KPI | Value |\n|-----|-------|\n");
    for kpi in stats.kpis() {
        output.push_str(&format!("| {} | {} |\n", kpi.label, kpi.value));
    }
    output.push('\n');

    if !stats.module_wise_coverage.is_empty() {
        output.push_str("## Coverage by Feature\n\n");
        output.push_str("| Feature | Use Cases | Covered | Coverage | Pass | Fail |\n");
        output.push_str("|---------|-----------|---------|----------|------|------|\n");
        for module in &stats.module_wise_coverage {
            output.push_str(&format!(
                "| {} | {} | {} | {}% | {} | {} |\n",
                markdown_cell(&module.feature),
                module.total_use_cases,
                module.total_covered,
                module.coverage_percentage,
                module.pass,
                module.fail
            ));
        }
        output.push('\n');
    }

    if !stats.summary.risk_areas.is_empty() {
        output.push_str("## Risk Areas\n\n");
        for risk in &stats.summary.risk_areas {
            output.push_str(&format!(
                "- **{}**: {}% covered, {} of {} use cases uncovered\n",
                risk.feature, risk.coverage_percentage, risk.gap, risk.total_use_cases
            ));
        }
        output.push('\n');
    }

    output.push_str("## Matrix\n\n");
    output.push_str(&format!("| {} |\n", MATRIX_COLUMNS.join(" | ")));
    output.push_str(&format!("|{}\n", "---|".repeat(MATRIX_COLUMNS.len())));
    for row in rows {
        let cells: Vec<String> = matrix_cells(row).iter().map(|c| markdown_cell(c)).collect();
        output.push_str(&format!("| {} |\n", cells.join(" | ")));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CoverageStatus, DiagnosticKind, Execution, Priority, ScenarioType};
    use tempfile::tempdir;

    fn rows() -> Vec<MatrixRow> {
        vec![
            MatrixRow {
                user_story_id: 100,
                feature: "Accounts".into(),
                scenario_type: ScenarioType::EdgeCase,
                description: "Login, with \"remember me\"".into(),
                test_case_id: Some(501),
                status: CoverageStatus::Covered,
                priority: Priority::High,
                execution: Execution::Pass,
            },
            MatrixRow {
                user_story_id: 100,
                feature: "Accounts".into(),
                scenario_type: ScenarioType::Functional,
                description: "can log out".into(),
                test_case_id: None,
                status: CoverageStatus::Missing,
                priority: Priority::Medium,
                execution: Execution::Blank,
            },
        ]
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn test_workbook_has_three_tables() {
        let rows = rows();
        let stats = CoverageStatistics::compute(&rows);
        let csv = render_workbook_csv(&rows, &stats);

        let sections: Vec<&str> = csv.split("\n\n").collect();
        assert_eq!(sections.len(), 3);

        let matrix: Vec<&str> = sections[0].lines().collect();
        assert_eq!(
            matrix[0],
            "UserStoryId,Feature,ScenarioType,Description,TestCaseId,Status,Priority,Execution"
        );
        assert_eq!(
            matrix[1],
            "100,Accounts,Edge Case,\"Login, with \"\"remember me\"\"\",501,Covered,High,Pass"
        );
        assert_eq!(matrix[2], "100,Accounts,Functional,can log out,,Missing,Medium,");

        assert!(sections[1].starts_with("KPI,Value\n"));
        assert!(sections[1].contains("Coverage %,50%"));
        assert!(sections[2].starts_with("Feature,Total Use Cases"));
        assert!(sections[2].contains("Accounts,2,0,0,1,0,1,50%,1,0"));
    }

    #[test]
    fn test_export_workbook_and_json() -> Result<()> {
        let dir = tempdir()?;
        let report = MatrixReport {
            rows: rows(),
            diagnostics: vec![Diagnostic::new(300, DiagnosticKind::NotFound, "gone")],
        };
        let document = ReportDocument::new(report);

        let csv_path = dir.path().join("rtm.csv");
        export_workbook(&document.matrix, &document.statistics, &csv_path)?;
        let csv = fs::read_to_string(&csv_path)?;
        assert!(csv.starts_with("UserStoryId,"));

        let json_path = dir.path().join("rtm.json");
        export_json(&document, &json_path)?;
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&json_path)?)?;
        assert_eq!(value["matrix"][0]["TestCaseId"], 501);
        assert_eq!(value["matrix"][1]["TestCaseId"], "");
        assert_eq!(value["statistics"]["overallCoverage"]["coverage"]["coveragePercentage"], 50);
        assert_eq!(value["diagnostics"][0]["kind"], "notFound");

        let loaded: ReportDocument = serde_json::from_value(value)?;
        assert_eq!(loaded, document);
        Ok(())
    }

    #[test]
    fn test_export_to_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("rtm.csv");
        let stats = CoverageStatistics::compute(&[]);
        assert!(export_workbook(&[], &stats, &path).is_err());
    }

    #[test]
    fn test_render_markdown() {
        let rows = rows();
        let stats = CoverageStatistics::compute(&rows);
        let md = render_markdown(&rows, &stats);

        assert!(md.starts_with("# Requirements Traceability Matrix\n"));
        assert!(md.contains("| Coverage % | 50% |"));
        assert!(md.contains("| Accounts | 2 | 1 | 50% | 1 | 0 |"));
        assert!(md.contains("- **Accounts**: 50% covered, 1 of 2 use cases uncovered"));
        assert!(md.contains("| 100 | Accounts | Functional | can log out |  | Missing | Medium |  |"));
    }
}
