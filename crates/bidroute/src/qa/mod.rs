//! Regression and audit harness.
//!
//! Runs orthogonally to the pipeline: it replays the fixture corpus through
//! the same triage code, audits mailbox snapshots against downstream state,
//! and writes only to its own ledger tables.

pub mod audit;
pub mod fixtures;
pub mod ledger;

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, info_span, warn};

use crate::config::{QaConfig, ReplyScoring};
use crate::db::{Database, DatabaseError};
use crate::message::InboundMessage;
use crate::triage::{Category, Decision, PatternTables, Triage};

pub use audit::{
    audit_pipeline, derive_expectations, grade, price_check_id, score, AuditReport,
    DownstreamRecord, DownstreamState, Expectation, Gap,
};
pub use fixtures::{Fixture, FixtureActiveItems, FIXTURES};
pub use ledger::{QaLedger, Trend, TrendReport};

/// Outcome of one fixture.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureResult {
    pub label: String,
    pub subject: String,
    pub expected: Category,
    pub actual: Category,
    pub passed: bool,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub score: u32,
    pub grade: String,
    pub results: Vec<FixtureResult>,
}

impl ScoreReport {
    pub fn failures(&self) -> impl Iterator<Item = &FixtureResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

pub struct QaHarness {
    /// Triage wired to the live active-item lookup, used for audits.
    live: Arc<Triage>,
    /// Triage wired to the fixture world, used for regression runs.
    fixtures: Triage,
    tables: Arc<PatternTables>,
    ledger: QaLedger,
}

impl QaHarness {
    pub fn new(
        db: Database,
        tables: Arc<PatternTables>,
        scoring: ReplyScoring,
        live: Arc<Triage>,
        config: QaConfig,
    ) -> Self {
        let fixtures = Triage::from_tables(
            tables.clone(),
            scoring,
            Arc::new(FixtureActiveItems::default()),
        );
        Self {
            live,
            fixtures,
            tables,
            ledger: QaLedger::new(db, config),
        }
    }

    pub fn ledger(&self) -> &QaLedger {
        &self.ledger
    }

    /// Replays the fixture corpus. Touches no persistent state.
    pub fn run_classification_tests(&self) -> ScoreReport {
        let _span = info_span!("qa_fixtures", total = FIXTURES.len()).entered();

        let results: Vec<FixtureResult> = FIXTURES
            .iter()
            .enumerate()
            .map(|(i, fixture)| {
                let message = fixture.to_message(i as u32 + 1);
                let decision = self.fixtures.evaluate(&message);
                let actual = decision.category();
                let reasons = match &decision {
                    Decision::Classified(c) => c.reasons.clone(),
                    Decision::FollowUp { detection, .. } => {
                        vec![format!("follow-up, body score {}", detection.body_score)]
                    }
                };
                FixtureResult {
                    label: fixture.label.to_string(),
                    subject: fixture.subject.to_string(),
                    expected: fixture.expected,
                    actual,
                    passed: actual == fixture.expected,
                    reasons,
                }
            })
            .collect();

        let total = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        let score = audit::score(passed, total);

        for failure in results.iter().filter(|r| !r.passed) {
            warn!(
                label = %failure.label,
                expected = failure.expected.as_str(),
                actual = failure.actual.as_str(),
                "Fixture regression"
            );
        }
        info!(passed, total, score, "Fixture run complete");

        ScoreReport {
            total,
            passed,
            failed: total - passed,
            score,
            grade: grade(score).to_string(),
            results,
        }
    }

    /// Derives expectations for `messages` with the live triage, audits them
    /// against `state` and records the run and its gaps.
    pub fn audit_snapshot(
        &self,
        messages: &[InboundMessage],
        state: &DownstreamState,
    ) -> Result<AuditReport, DatabaseError> {
        let _span = info_span!("qa_audit", messages = messages.len()).entered();

        let expectations = derive_expectations(&self.live, &self.tables, messages);
        let report = audit_pipeline(&expectations, state);
        self.ledger.record_audit(&report)?;

        info!(
            actionable = report.actionable,
            matched = report.matched,
            gaps = report.gaps.len(),
            score = report.score,
            grade = %report.grade,
            "Audit complete"
        );
        Ok(report)
    }

    pub fn trend(&self) -> Result<TrendReport, DatabaseError> {
        self.ledger.trend()
    }
}
