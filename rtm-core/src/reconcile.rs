//! Reconciliation of acceptance criteria against linked test cases
//!
//! For one requirement this produces its matrix rows: one Covered row per
//! criterion/test pairing and one Missing row per criterion without tests.

use std::collections::{BTreeMap, HashSet};

use crate::classify::{classify_scenario_type, map_priority};
use crate::config::{EmptyCriteriaPolicy, ReconcilePolicy, UnreferencedTestPolicy};
use crate::models::{
    CoverageStatus, Execution, MatrixRow, Priority, Requirement, ScenarioType, TestCase,
};

/// Builds the matrix rows for one requirement
///
/// `test_cases` are in the order they were fetched; that order is kept for
/// the Covered rows under each criterion. Criteria are visited in ascending
/// number order.
pub fn reconcile(
    requirement: &Requirement,
    test_cases: &[TestCase],
    policy: &ReconcilePolicy,
) -> Vec<MatrixRow> {
    if test_cases.is_empty() {
        return vec![requirement_missing_row(requirement)];
    }

    let mut by_criterion: BTreeMap<u32, Vec<&TestCase>> = BTreeMap::new();
    for tc in test_cases {
        if let Some(number) = tc.criterion_ref {
            by_criterion.entry(number).or_default().push(tc);
        }
    }

    let mut rows = Vec::new();
    for (number, text) in &requirement.acceptance_criteria {
        match by_criterion.get(number) {
            Some(tests) if !tests.is_empty() => {
                rows.extend(tests.iter().map(|tc| covered_row(requirement, tc)));
            }
            _ => rows.push(criterion_missing_row(requirement, text)),
        }
    }

    if policy.unreferenced_tests == UnreferencedTestPolicy::AppendCovered {
        let known: HashSet<u32> = requirement.acceptance_criteria.keys().copied().collect();
        rows.extend(
            test_cases
                .iter()
                .filter(|tc| !tc.criterion_ref.is_some_and(|n| known.contains(&n)))
                .map(|tc| covered_row(requirement, tc)),
        );
    }

    if rows.is_empty() && policy.empty_criteria == EmptyCriteriaPolicy::FallbackMissing {
        rows.push(requirement_missing_row(requirement));
    }

    rows
}

/// The single row for a requirement nothing tests
fn requirement_missing_row(requirement: &Requirement) -> MatrixRow {
    MatrixRow {
        user_story_id: requirement.id,
        feature: requirement.feature.clone(),
        scenario_type: classify_scenario_type(
            &requirement.title,
            &requirement.description,
            &requirement.tags,
        ),
        description: requirement.title.clone(),
        test_case_id: None,
        status: CoverageStatus::Missing,
        priority: map_priority(requirement.priority.as_ref()),
        execution: Execution::Blank,
    }
}

fn criterion_missing_row(requirement: &Requirement, criterion: &str) -> MatrixRow {
    MatrixRow {
        user_story_id: requirement.id,
        feature: requirement.feature.clone(),
        scenario_type: ScenarioType::Functional,
        description: criterion.to_string(),
        test_case_id: None,
        status: CoverageStatus::Missing,
        priority: Priority::Medium,
        execution: Execution::Blank,
    }
}

fn covered_row(requirement: &Requirement, tc: &TestCase) -> MatrixRow {
    let description = if tc.description.trim().is_empty() {
        tc.title.clone()
    } else {
        tc.description.clone()
    };
    MatrixRow {
        user_story_id: requirement.id,
        feature: requirement.feature.clone(),
        scenario_type: ScenarioType::from_tag(tc.scenario_type.as_deref()),
        description,
        test_case_id: Some(tc.id),
        status: CoverageStatus::Covered,
        priority: map_priority(tc.priority.as_ref()),
        execution: tc.execution,
    }
}
