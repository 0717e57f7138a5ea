//! Persistent QA history: audit runs, learned gap patterns and the score
//! trend derived from them.

use serde::Serialize;

use crate::config::QaConfig;
use crate::db::{format_timestamp, qa_repo, Database, DatabaseError};

use super::audit::AuditReport;

const AUDIT_RUN_KIND: &str = "audit";
const MISSING_GAP_KIND: &str = "missing";
const MIN_RUNS_FOR_TREND: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
    InsufficientData,
    NoData,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendReport {
    pub runs: usize,
    pub average_score: f64,
    pub latest_score: Option<u32>,
    pub latest_grade: Option<String>,
    pub trend: Trend,
}

/// Compares the mean of the older half of `scores` (oldest first) with the
/// newer half.
pub fn trend_of(scores: &[u32], margin: f64) -> Trend {
    if scores.is_empty() {
        return Trend::NoData;
    }
    if scores.len() < MIN_RUNS_FOR_TREND {
        return Trend::InsufficientData;
    }

    let (older, newer) = scores.split_at(scores.len() / 2);
    let older = mean(older);
    let newer = mean(newer);
    if newer > older + margin {
        Trend::Improving
    } else if newer < older - margin {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

fn mean(scores: &[u32]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().map(|s| f64::from(*s)).sum::<f64>() / scores.len() as f64
}

/// Append-only, capped QA history.
#[derive(Clone)]
pub struct QaLedger {
    db: Database,
    config: QaConfig,
}

impl QaLedger {
    pub fn new(db: Database, config: QaConfig) -> Self {
        Self { db, config }
    }

    /// Persists an audit run and one learned pattern per gap.
    pub fn record_audit(&self, report: &AuditReport) -> Result<i64, DatabaseError> {
        let run_at = format_timestamp(report.run_at);
        let details = serde_json::json!({
            "totalMessages": report.total_messages,
            "recalls": report.recalls,
            "skipped": report.skipped,
        });

        let run_id = qa_repo::insert_run(
            &self.db,
            &qa_repo::QaRunRow {
                id: 0,
                run_at: run_at.clone(),
                kind: AUDIT_RUN_KIND.to_string(),
                score: report.score,
                grade: report.grade.clone(),
                total: report.actionable as u32,
                matched: report.matched as u32,
                gap_count: report.gaps.len() as u32,
                details: details.to_string(),
            },
            self.config.run_history_cap,
        )?;

        let learned: Vec<_> = report
            .gaps
            .iter()
            .map(|gap| qa_repo::LearnedPatternRow {
                id: 0,
                recorded_at: run_at.clone(),
                gap_kind: MISSING_GAP_KIND.to_string(),
                expected_category: gap.expected_category.as_str().to_string(),
                subject: gap.subject.clone(),
                sender: gap.sender.clone(),
                expected_id: Some(gap.expected_id.clone()).filter(|id| !id.is_empty()),
                detail: gap.reasons.join("; "),
            })
            .collect();
        qa_repo::insert_learned(&self.db, &learned, self.config.learned_pattern_cap)?;

        log::info!(
            "Recorded QA run {} (score {}, {} gaps)",
            run_id,
            report.score,
            report.gaps.len()
        );
        Ok(run_id)
    }

    pub fn trend(&self) -> Result<TrendReport, DatabaseError> {
        // Newest first from the store; the trend wants oldest first.
        let mut runs = qa_repo::recent_runs(&self.db, self.config.trend_window)?;
        runs.reverse();

        let scores: Vec<u32> = runs.iter().map(|r| r.score).collect();
        let latest = runs.last();
        Ok(TrendReport {
            runs: runs.len(),
            average_score: (mean(&scores) * 10.0).round() / 10.0,
            latest_score: latest.map(|r| r.score),
            latest_grade: latest.map(|r| r.grade.clone()),
            trend: trend_of(&scores, self.config.trend_margin),
        })
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<qa_repo::QaRunRow>, DatabaseError> {
        qa_repo::recent_runs(&self.db, limit)
    }

    pub fn learned_patterns(&self, limit: usize) -> Result<Vec<qa_repo::LearnedPatternRow>, DatabaseError> {
        qa_repo::recent_learned(&self.db, limit)
    }
}
