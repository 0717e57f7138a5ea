//! Audit completeness against the journal the daemon writes.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use bidroute::app::{journal_collaborators, App};
use bidroute::config::AppConfig;
use bidroute::db::Database;
use bidroute::message::InboundMessage;
use bidroute::qa::{score, DownstreamState, FixtureActiveItems, Trend, FIXTURES};
use bidroute::triage::Category;
use common::{mailbox_config, MessageBuilder, ScriptedMailbox};

fn fixture(label: &str, uid: u32) -> InboundMessage {
    FIXTURES
        .iter()
        .find(|f| f.label == label)
        .unwrap_or_else(|| panic!("no fixture labeled '{}'", label))
        .to_message(uid)
}

fn app_in(dir: &TempDir, config: AppConfig) -> App {
    let db = Database::open(&dir.path().join("bidroute.db")).unwrap();
    let journal = dir.path().join("journal");
    let collaborators = journal_collaborators(&journal).unwrap();
    App::build_with(
        config,
        db,
        journal,
        collaborators,
        Arc::new(FixtureActiveItems::default()),
    )
    .unwrap()
}

fn journal_records(dir: &Path) -> usize {
    let state = DownstreamState::from_journal(dir).unwrap();
    state.rfqs.len() + state.price_checks.len() + state.shipments.len() + state.cs_drafts.len()
}

fn wait_for_journal(dir: &Path, count: usize) -> DownstreamState {
    let deadline = Instant::now() + Duration::from_secs(5);
    while journal_records(dir) < count && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    DownstreamState::from_journal(dir).unwrap()
}

#[test]
fn test_audit_counts_exactly_the_missing_records() {
    let dir = TempDir::new().unwrap();
    let app = app_in(&dir, AppConfig::default());

    let routed = vec![
        fixture("price check, Med OS", 1),
        fixture("formal RFQ with 703B and 704B", 2),
        fixture("cs pricing question", 3),
        fixture("ups shipping notice", 4),
        fixture("meeting notes", 5),
        fixture("recall by subject marker", 6),
    ];
    for message in &routed {
        app.pipeline().process(message).unwrap();
    }
    let state = wait_for_journal(app.journal_dir(), 4);

    // Arrived but never routed.
    let missed = fixture("price check, BLS Med", 7);
    let mut snapshot = routed.clone();
    snapshot.push(missed);

    let report = app.qa().audit_snapshot(&snapshot, &state).unwrap();

    assert_eq!(report.total_messages, 7);
    assert_eq!(report.actionable, 5);
    assert_eq!(report.matched, 4);
    assert_eq!(report.recalls, 1);
    assert_eq!(report.score, score(4, 5));
    assert_eq!(report.score, 80);
    assert_eq!(report.grade, "B");
    assert_eq!(report.gaps.len(), report.actionable - report.matched);
    assert_eq!(report.gaps[0].expected_category, Category::PriceCheck);
    assert_eq!(report.gaps[0].expected_id, "BLS Med");

    let learned = app.qa().ledger().learned_patterns(10).unwrap();
    assert_eq!(learned.len(), 1);
    assert_eq!(learned[0].gap_kind, "missing");

    let trend = app.qa().trend().unwrap();
    assert_eq!(trend.runs, 1);
    assert_eq!(trend.latest_score, Some(80));
    assert_eq!(trend.trend, Trend::InsufficientData);

    app.shutdown();
}

#[test]
fn test_fully_routed_snapshot_scores_100() {
    let dir = TempDir::new().unwrap();
    let app = app_in(&dir, AppConfig::default());

    let messages = vec![
        fixture("price check, airway adapter", 1),
        fixture("cs invoice question", 2),
    ];
    for message in &messages {
        app.pipeline().process(message).unwrap();
    }
    let state = wait_for_journal(app.journal_dir(), 2);

    let report = app.qa().audit_snapshot(&messages, &state).unwrap();

    assert_eq!(report.actionable, 2);
    assert_eq!(report.matched, 2);
    assert!(report.gaps.is_empty());
    assert_eq!(report.score, 100);
    assert_eq!(report.grade, "A");
    app.shutdown();
}

#[tokio::test]
async fn test_daemon_audit_reads_mailbox_and_journal() {
    let dir = TempDir::new().unwrap();
    let mut config = AppConfig::default();
    config.mailboxes = vec![mailbox_config("sales")];
    let app = app_in(&dir, config);

    let routed = MessageBuilder::price_check(1, "Med OS");
    let missed = MessageBuilder::price_check(2, "MH OS");
    let mailbox = ScriptedMailbox::new(100);
    mailbox.deliver(1, routed.to_rfc822());
    mailbox.deliver(2, missed.to_rfc822());

    app.pipeline().process(&routed.build()).unwrap();
    wait_for_journal(app.journal_dir(), 1);

    let report = app.audit(mailbox.factory()).await.unwrap();

    assert_eq!(report.total_messages, 2);
    assert_eq!(report.actionable, 2);
    assert_eq!(report.matched, 1);
    assert_eq!(report.score, 50);
    assert_eq!(report.gaps.len(), 1);
    assert_eq!(report.gaps[0].subject, "Quote - MH OS - 02.19.26");
    assert_eq!(app.qa().ledger().recent_runs(5).unwrap().len(), 1);

    app.shutdown();
}

#[test]
fn test_fixture_runs_leave_the_ledger_alone() {
    let dir = TempDir::new().unwrap();
    let app = app_in(&dir, AppConfig::default());

    let report = app.qa().run_classification_tests();

    assert_eq!(report.total, FIXTURES.len());
    assert_eq!(report.failed, 0, "failures: {:?}", report.failures().collect::<Vec<_>>());
    assert!(app.qa().ledger().recent_runs(5).unwrap().is_empty());
    app.shutdown();
}
