//! Coverage statistics derived from a matrix
//!
//! The same `CoverageStatistics` value feeds the JSON report, the KPI list and
//! the exported workbook, so every surface shows identical numbers.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::models::{CoverageStatus, Execution, MatrixRow, ScenarioType};

/// Features below this coverage percentage are reported as risks
pub const RISK_THRESHOLD: u32 = 80;

/// Number of features in the top and bottom rankings
pub const RANKING_SIZE: usize = 5;

/// `round(part / whole * 100)`, or 0 when `whole` is 0
pub fn percentage(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        return 0;
    }
    (part as f64 / whole as f64 * 100.0).round() as u32
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCasesByType {
    pub positive: usize,
    pub negative: usize,
    pub edge_cases: usize,
    pub integration: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageSummary {
    pub total_covered: usize,
    pub coverage_percentage: u32,
    pub uncovered_user_stories: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub total: usize,
    pub pass: usize,
    pub fail: usize,
    pub pass_percentage: u32,
    pub fail_percentage: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallCoverage {
    pub total_user_stories: usize,
    pub total_modules: usize,
    pub total_use_cases: usize,
    pub test_cases_by_type: TestCasesByType,
    pub coverage: CoverageSummary,
    pub execution: ExecutionSummary,
}

/// Coverage of one feature
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleCoverage {
    pub feature: String,
    pub total_use_cases: usize,
    pub positive_covered: usize,
    pub negative_covered: usize,
    pub edge_cases_covered: usize,
    pub integration_covered: usize,
    pub total_covered: usize,
    pub coverage_percentage: u32,
    pub pass: usize,
    pub fail: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRanking {
    pub feature: String,
    pub coverage_percentage: u32,
    pub total_use_cases: usize,
    pub total_covered: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskArea {
    pub feature: String,
    pub coverage_percentage: u32,
    pub total_use_cases: usize,
    pub total_covered: usize,
    /// Rows of the feature still lacking coverage
    pub gap: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingSummary {
    pub top_performing_modules: Vec<ModuleRanking>,
    pub low_performing_modules: Vec<ModuleRanking>,
    pub risk_areas: Vec<RiskArea>,
}

/// A labelled headline number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kpi {
    pub label: String,
    pub value: String,
}

impl Kpi {
    fn new(label: &str, value: impl ToString) -> Self {
        Self {
            label: label.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageStatistics {
    pub overall_coverage: OverallCoverage,
    pub module_wise_coverage: Vec<ModuleCoverage>,
    pub summary: RankingSummary,
}

/// Counters shared by the overall and per-feature views
#[derive(Default)]
struct Tally {
    rows: usize,
    covered: usize,
    positive: usize,
    negative: usize,
    edge_cases: usize,
    integration: usize,
    pass: usize,
    fail: usize,
}

impl Tally {
    fn add(&mut self, row: &MatrixRow) {
        self.rows += 1;
        if row.status == CoverageStatus::Covered {
            self.covered += 1;
            match row.scenario_type {
                ScenarioType::Positive => self.positive += 1,
                ScenarioType::Negative => self.negative += 1,
                ScenarioType::EdgeCase => self.edge_cases += 1,
                ScenarioType::Integration => self.integration += 1,
                _ => {}
            }
        }
        match row.execution {
            Execution::Pass => self.pass += 1,
            Execution::Fail => self.fail += 1,
            Execution::Blank => {}
        }
    }
}

impl CoverageStatistics {
    /// Computes the statistics of a matrix; an empty matrix gives all zeros
    pub fn compute(rows: &[MatrixRow]) -> Self {
        let mut overall = Tally::default();
        let mut requirements = Vec::new();
        let mut seen_requirements = HashSet::new();
        let mut covered_requirements = HashSet::new();
        let mut features: Vec<(String, Tally)> = Vec::new();

        for row in rows {
            overall.add(row);

            if seen_requirements.insert(row.user_story_id) {
                requirements.push(row.user_story_id);
            }
            if row.status == CoverageStatus::Covered {
                covered_requirements.insert(row.user_story_id);
            }

            let feature = row.feature.trim();
            if feature.is_empty() {
                continue;
            }
            match features.iter_mut().find(|(name, _)| name.as_str() == feature) {
                Some((_, tally)) => tally.add(row),
                None => {
                    let mut tally = Tally::default();
                    tally.add(row);
                    features.push((feature.to_string(), tally));
                }
            }
        }

        let uncovered_user_stories = requirements
            .iter()
            .filter(|id| !covered_requirements.contains(*id))
            .count();
        let executed = overall.pass + overall.fail;

        let overall_coverage = OverallCoverage {
            total_user_stories: requirements.len(),
            total_modules: features.len(),
            total_use_cases: overall.rows,
            test_cases_by_type: TestCasesByType {
                positive: overall.positive,
                negative: overall.negative,
                edge_cases: overall.edge_cases,
                integration: overall.integration,
            },
            coverage: CoverageSummary {
                total_covered: overall.covered,
                coverage_percentage: percentage(overall.covered, overall.rows),
                uncovered_user_stories,
            },
            execution: ExecutionSummary {
                total: executed,
                pass: overall.pass,
                fail: overall.fail,
                pass_percentage: percentage(overall.pass, executed),
                fail_percentage: percentage(overall.fail, executed),
            },
        };

        let module_wise_coverage: Vec<ModuleCoverage> = features
            .into_iter()
            .map(|(feature, tally)| ModuleCoverage {
                feature,
                total_use_cases: tally.rows,
                positive_covered: tally.positive,
                negative_covered: tally.negative,
                edge_cases_covered: tally.edge_cases,
                integration_covered: tally.integration,
                total_covered: tally.covered,
                coverage_percentage: percentage(tally.covered, tally.rows),
                pass: tally.pass,
                fail: tally.fail,
            })
            .collect();

        let summary = rank(&module_wise_coverage);

        Self {
            overall_coverage,
            module_wise_coverage,
            summary,
        }
    }

    /// The headline numbers as labelled values, in display order
    pub fn kpis(&self) -> Vec<Kpi> {
        let overall = &self.overall_coverage;
        vec![
            Kpi::new("Total User Stories", overall.total_user_stories),
            Kpi::new("Total Modules", overall.total_modules),
            Kpi::new("Total Use Cases", overall.total_use_cases),
            Kpi::new("Positive Test Cases", overall.test_cases_by_type.positive),
            Kpi::new("Negative Test Cases", overall.test_cases_by_type.negative),
            Kpi::new("Edge Case Test Cases", overall.test_cases_by_type.edge_cases),
            Kpi::new("Integration Test Cases", overall.test_cases_by_type.integration),
            Kpi::new("Total Covered", overall.coverage.total_covered),
            Kpi::new(
                "Coverage %",
                format!("{}%", overall.coverage.coverage_percentage),
            ),
            Kpi::new("Uncovered User Stories", overall.coverage.uncovered_user_stories),
            Kpi::new("Executed Test Cases", overall.execution.total),
            Kpi::new("Passed", overall.execution.pass),
            Kpi::new("Failed", overall.execution.fail),
            Kpi::new("Pass %", format!("{}%", overall.execution.pass_percentage)),
            Kpi::new("Fail %", format!("{}%", overall.execution.fail_percentage)),
        ]
    }
}

fn rank(modules: &[ModuleCoverage]) -> RankingSummary {
    let ranked: Vec<&ModuleCoverage> = modules.iter().filter(|m| m.total_use_cases > 0).collect();
    let to_ranking = |m: &&ModuleCoverage| ModuleRanking {
        feature: m.feature.clone(),
        coverage_percentage: m.coverage_percentage,
        total_use_cases: m.total_use_cases,
        total_covered: m.total_covered,
    };

    // Stable sorts keep discovery order among ties
    let mut best = ranked.clone();
    best.sort_by(|a, b| b.coverage_percentage.cmp(&a.coverage_percentage));
    let mut worst = ranked.clone();
    worst.sort_by_key(|m| m.coverage_percentage);

    RankingSummary {
        top_performing_modules: best.iter().take(RANKING_SIZE).map(to_ranking).collect(),
        low_performing_modules: worst.iter().take(RANKING_SIZE).map(to_ranking).collect(),
        risk_areas: ranked
            .iter()
            .filter(|m| m.coverage_percentage < RISK_THRESHOLD)
            .map(|m| RiskArea {
                feature: m.feature.clone(),
                coverage_percentage: m.coverage_percentage,
                total_use_cases: m.total_use_cases,
                total_covered: m.total_covered,
                gap: m.total_use_cases - m.total_covered,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;

    fn row(story: u64, feature: &str, covered: bool) -> MatrixRow {
        MatrixRow {
            user_story_id: story,
            feature: feature.to_string(),
            scenario_type: ScenarioType::Functional,
            description: "criterion".into(),
            test_case_id: covered.then_some(story * 10),
            status: if covered {
                CoverageStatus::Covered
            } else {
                CoverageStatus::Missing
            },
            priority: Priority::Medium,
            execution: if covered { Execution::Pass } else { Execution::Blank },
        }
    }

    #[test]
    fn test_empty_matrix_is_all_zero() {
        let stats = CoverageStatistics::compute(&[]);
        assert_eq!(stats, CoverageStatistics::default());
        assert_eq!(stats.overall_coverage.coverage.coverage_percentage, 0);
        assert_eq!(stats.overall_coverage.execution.pass_percentage, 0);
        assert!(stats.summary.risk_areas.is_empty());
    }

    #[test]
    fn test_seven_of_ten_is_seventy_percent() {
        let rows: Vec<MatrixRow> = (0..10).map(|i| row(1, "Login", i < 7)).collect();
        let stats = CoverageStatistics::compute(&rows);

        let overall = &stats.overall_coverage;
        assert_eq!(overall.total_use_cases, 10);
        assert_eq!(overall.coverage.total_covered, 7);
        assert_eq!(overall.coverage.coverage_percentage, 70);
        assert_eq!(overall.coverage.uncovered_user_stories, 0);
        assert_eq!(overall.execution.total, 7);
        assert_eq!(overall.execution.pass_percentage, 100);

        assert_eq!(stats.summary.risk_areas.len(), 1);
        assert_eq!(stats.summary.risk_areas[0].gap, 3);
    }

    #[test]
    fn test_counts_and_breakdown() {
        let mut negative = row(2, "Cart", true);
        negative.scenario_type = ScenarioType::Negative;
        negative.execution = Execution::Fail;
        let mut integration = row(2, "Cart", true);
        integration.scenario_type = ScenarioType::Integration;
        let mut uncovered_integration = row(3, "Cart", false);
        uncovered_integration.scenario_type = ScenarioType::Integration;

        let rows = vec![
            row(1, "Login", true),
            negative,
            integration,
            uncovered_integration,
            row(4, "", false),
        ];
        let stats = CoverageStatistics::compute(&rows);
        let overall = &stats.overall_coverage;

        assert_eq!(overall.total_user_stories, 4);
        assert_eq!(overall.total_modules, 2);
        assert_eq!(overall.test_cases_by_type.negative, 1);
        assert_eq!(overall.test_cases_by_type.integration, 1);
        assert_eq!(overall.test_cases_by_type.positive, 0);
        assert_eq!(overall.coverage.uncovered_user_stories, 2);
        assert_eq!(overall.execution.pass, 2);
        assert_eq!(overall.execution.fail, 1);
        assert_eq!(overall.execution.pass_percentage, 67);
        assert_eq!(overall.execution.fail_percentage, 33);

        let cart = &stats.module_wise_coverage[1];
        assert_eq!(cart.feature, "Cart");
        assert_eq!(cart.total_use_cases, 3);
        assert_eq!(cart.total_covered, 2);
        assert_eq!(cart.coverage_percentage, 67);
        assert_eq!(cart.negative_covered, 1);
        assert_eq!(cart.integration_covered, 1);
        assert_eq!((cart.pass, cart.fail), (1, 1));
    }

    #[test]
    fn test_rankings_keep_discovery_order_on_ties() {
        let mut rows = Vec::new();
        // A: 100%, B: 50%, C: 100%, D: 0%, E: 50%, F: 0%, G: 100%
        for (feature, covered, total) in [
            ("A", 1, 1),
            ("B", 1, 2),
            ("C", 2, 2),
            ("D", 0, 1),
            ("E", 1, 2),
            ("F", 0, 3),
            ("G", 1, 1),
        ] {
            for i in 0..total {
                rows.push(row(1, feature, i < covered));
            }
        }
        let stats = CoverageStatistics::compute(&rows);
        let names = |list: &[ModuleRanking]| -> Vec<String> {
            list.iter().map(|m| m.feature.clone()).collect()
        };

        assert_eq!(names(&stats.summary.top_performing_modules), vec!["A", "C", "G", "B", "E"]);
        assert_eq!(names(&stats.summary.low_performing_modules), vec!["D", "F", "B", "E", "A"]);

        let risks: Vec<(String, usize)> = stats
            .summary
            .risk_areas
            .iter()
            .map(|r| (r.feature.clone(), r.gap))
            .collect();
        assert_eq!(
            risks,
            vec![("B".into(), 1), ("D".into(), 1), ("E".into(), 1), ("F".into(), 3)]
        );
    }

    #[test]
    fn test_statistics_json_shape() {
        let stats = CoverageStatistics::compute(&[row(1, "Login", true)]);
        let json = serde_json::to_value(&stats).unwrap();

        assert_eq!(json["overallCoverage"]["totalUserStories"], 1);
        assert_eq!(json["overallCoverage"]["testCasesByType"]["edgeCases"], 0);
        assert_eq!(json["overallCoverage"]["coverage"]["coveragePercentage"], 100);
        assert_eq!(json["overallCoverage"]["execution"]["passPercentage"], 100);
        assert_eq!(json["moduleWiseCoverage"][0]["edgeCasesCovered"], 0);
        assert_eq!(json["summary"]["topPerformingModules"][0]["feature"], "Login");
        assert!(json["summary"]["riskAreas"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_kpis_match_statistics() {
        let rows: Vec<MatrixRow> = (0..10).map(|i| row(i, "Login", i < 7)).collect();
        let kpis = CoverageStatistics::compute(&rows).kpis();

        let value = |label: &str| {
            kpis.iter()
                .find(|k| k.label == label)
                .map(|k| k.value.clone())
                .unwrap()
        };
        assert_eq!(value("Total User Stories"), "10");
        assert_eq!(value("Coverage %"), "70%");
        assert_eq!(value("Uncovered User Stories"), "3");
        assert_eq!(value("Passed"), "7");
    }
}
