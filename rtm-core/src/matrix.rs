//! Matrix aggregation
//!
//! `RtmEngine` fans out over the requested requirement ids, resolves their
//! linked test cases and reconciles each requirement into matrix rows. Every
//! task returns its own rows; merging happens once all tasks are done.

use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

use crate::config::EngineConfig;
use crate::gateway::{GatewayError, WorkItemSource};
use crate::models::{
    Diagnostic, DiagnosticKind, LinkedRef, MatrixReport, MatrixRow, Requirement, TestCase,
};
use crate::reconcile::reconcile;
use crate::runner::run_bounded;

/// Failures that abort a whole matrix generation
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("Backend rejected the credentials: {0}")]
    Unauthorized(GatewayError),

    #[error("Backend unreachable, no requirement could be fetched: {0}")]
    Unreachable(GatewayError),
}

/// Result of processing one requirement
enum Outcome {
    Rows {
        rows: Vec<MatrixRow>,
        diagnostics: Vec<Diagnostic>,
    },
    Skipped(Diagnostic),
    Failed(GatewayError),
}

pub struct RtmEngine {
    source: Arc<dyn WorkItemSource>,
    config: EngineConfig,
}

impl RtmEngine {
    pub fn new(source: Arc<dyn WorkItemSource>, config: EngineConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn source(&self) -> &Arc<dyn WorkItemSource> {
        &self.source
    }

    /// Builds the traceability matrix for the given requirement ids
    ///
    /// Rows of one requirement stay together in criterion order, and groups
    /// follow the order of `ids`. A repeated id is processed again and repeats
    /// its rows; deduplication is up to the caller. Items that
    /// are missing, of the wrong type or fail to load are reported in
    /// `diagnostics` instead of failing the call; the call itself fails only
    /// when the credentials are rejected or no requirement could be reached.
    #[instrument(
        skip(self, ids),
        fields(backend = self.source.backend_tag(), requested = ids.len())
    )]
    pub async fn generate_matrix(&self, ids: &[u64]) -> Result<MatrixReport, EngineError> {
        if ids.is_empty() {
            return Ok(MatrixReport::default());
        }
        let requested: Vec<(usize, u64)> = ids.iter().copied().enumerate().collect();

        let mut outcomes = run_bounded(requested.clone(), self.config.concurrency, |(index, id)| {
            async move { (index, id, self.process_requirement(id).await) }
        })
        .await;
        outcomes.sort_by_key(|(index, _, _)| *index);

        let mut report = MatrixReport::default();
        let mut transport_failures = 0;
        let mut last_transport = None;
        let finished: HashSet<usize> = outcomes.iter().map(|(index, _, _)| *index).collect();

        for (_, id, outcome) in outcomes {
            match outcome {
                Outcome::Rows { rows, diagnostics } => {
                    report.rows.extend(rows);
                    report.diagnostics.extend(diagnostics);
                }
                Outcome::Skipped(diagnostic) => report.diagnostics.push(diagnostic),
                Outcome::Failed(err) if err.is_unauthorized() => {
                    tracing::error!(requirement = id, error = %err, "Credentials rejected");
                    return Err(EngineError::Unauthorized(err));
                }
                Outcome::Failed(err) => {
                    if err.is_transport() {
                        transport_failures += 1;
                        last_transport = Some(err.clone());
                    }
                    report.diagnostics.push(Diagnostic::new(
                        id,
                        DiagnosticKind::FetchFailed,
                        err.to_string(),
                    ));
                }
            }
        }

        if transport_failures == requested.len() {
            if let Some(err) = last_transport {
                return Err(EngineError::Unreachable(err));
            }
        }

        for (_, id) in requested.iter().filter(|(index, _)| !finished.contains(index)) {
            report.diagnostics.push(Diagnostic::new(
                *id,
                DiagnosticKind::Aborted,
                "processing panicked",
            ));
        }

        tracing::info!(
            rows = report.rows.len(),
            skipped = report.diagnostics.len(),
            "Generated traceability matrix"
        );
        Ok(report)
    }

    async fn process_requirement(&self, id: u64) -> Outcome {
        let fields = &self.config.fields;

        let (item, links) = match self.source.fetch_item_with_links(id).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                tracing::warn!(requirement = id, "Requirement not found, skipping");
                return Outcome::Skipped(Diagnostic::new(
                    id,
                    DiagnosticKind::NotFound,
                    "work item does not exist",
                ));
            }
            Err(err) => {
                tracing::warn!(requirement = id, error = %err, "Failed to fetch requirement");
                return Outcome::Failed(err);
            }
        };

        if !item.is_type(fields, &self.config.requirement_type) {
            let actual = item.field_text(&fields.work_item_type);
            tracing::warn!(
                requirement = id,
                work_item_type = %actual,
                "Not a {}, skipping",
                self.config.requirement_type
            );
            return Outcome::Skipped(Diagnostic::new(
                id,
                DiagnosticKind::WrongType,
                format!(
                    "expected {}, found '{}'",
                    self.config.requirement_type, actual
                ),
            ));
        }

        let requirement = Requirement::from_work_item(&item, fields);
        let (test_cases, diagnostics) = match self.resolve_test_cases(id, &links).await {
            Ok(resolved) => resolved,
            Err(err) => return Outcome::Failed(err),
        };

        let rows = reconcile(&requirement, &test_cases, &self.config.policy);
        tracing::debug!(
            requirement = id,
            test_cases = test_cases.len(),
            rows = rows.len(),
            "Reconciled requirement"
        );
        Outcome::Rows { rows, diagnostics }
    }

    /// Fetches the test cases behind the test links, keeping link order
    ///
    /// Individual failures become diagnostics; only rejected credentials
    /// escalate.
    async fn resolve_test_cases(
        &self,
        requirement_id: u64,
        links: &[LinkedRef],
    ) -> Result<(Vec<TestCase>, Vec<Diagnostic>), GatewayError> {
        let fields = &self.config.fields;
        let mut seen = HashSet::new();
        let targets: Vec<u64> = links
            .iter()
            .filter(|link| link.is_test_link())
            .filter_map(LinkedRef::target_id)
            .filter(|id| seen.insert(*id))
            .collect();

        let fetched = join_all(targets.iter().map(|id| self.source.fetch_item(*id))).await;

        let mut test_cases = Vec::new();
        let mut diagnostics = Vec::new();
        for (target, result) in targets.into_iter().zip(fetched) {
            match result {
                Ok(Some(item)) => {
                    if item.has_type(fields) && !item.is_type(fields, &self.config.test_case_type) {
                        tracing::debug!(
                            requirement = requirement_id,
                            item = target,
                            "Linked item is not a test case, ignoring"
                        );
                        continue;
                    }
                    test_cases.push(TestCase::from_work_item(&item, &self.config));
                }
                Ok(None) => {
                    tracing::warn!(requirement = requirement_id, item = target, "Linked test case not found");
                    diagnostics.push(
                        Diagnostic::new(
                            requirement_id,
                            DiagnosticKind::TestCaseUnavailable,
                            "linked work item does not exist",
                        )
                        .for_item(target),
                    );
                }
                Err(err) if err.is_unauthorized() => return Err(err),
                Err(err) => {
                    tracing::warn!(
                        requirement = requirement_id,
                        item = target,
                        error = %err,
                        "Failed to fetch linked test case"
                    );
                    diagnostics.push(
                        Diagnostic::new(
                            requirement_id,
                            DiagnosticKind::TestCaseUnavailable,
                            err.to_string(),
                        )
                        .for_item(target),
                    );
                }
            }
        }

        Ok((test_cases, diagnostics))
    }
}
