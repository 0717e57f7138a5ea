use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError};
use tracing::{error, info, warn};

use bidroute::config::{load_config, resolve_config_path};
use bidroute::telemetry::init_logging;
use bidroute::{App, ImapTransportFactory, Result};

const TICK: Duration = Duration::from_secs(5);
const PRUNE_EVERY: Duration = Duration::from_secs(3600);

fn main() -> ExitCode {
    let path = resolve_config_path();
    let config = match load_config(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("bidroute: {} ({})", e, path.display());
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("bidroute: {}", e);
        return ExitCode::FAILURE;
    }

    match run(App::build(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(app: Result<App>) -> Result<()> {
    let app = app?;
    info!("Starting bidroute v{}", env!("CARGO_PKG_VERSION"));

    let report = app.qa().run_classification_tests();
    if report.failed > 0 {
        for failure in report.failures() {
            warn!(
                fixture = %failure.label,
                expected = %failure.expected,
                actual = %failure.actual,
                "Fixture misclassified"
            );
        }
    }
    info!(
        "Fixture regression: {}/{} passed, grade {}",
        report.passed, report.total, report.grade
    );

    if let Err(e) = app.prune_cursor() {
        warn!("Cursor prune failed: {}", e);
    }

    let (signal_tx, signal_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = signal_tx.try_send(());
    })?;

    let watchers = app.start(Arc::new(ImapTransportFactory))?;
    info!("Watching {} mailbox(es); press Ctrl-C to stop", watchers.len());

    let mut last_prune = Instant::now();
    loop {
        match signal_rx.recv_timeout(TICK) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        for result in app.drain_results() {
            if result.success {
                info!(
                    mailbox = %result.mailbox,
                    uid = result.uid,
                    target = result.target.as_str(),
                    record = result.record_id.as_deref().unwrap_or("-"),
                    "Dispatch completed"
                );
            }
        }

        if last_prune.elapsed() >= PRUNE_EVERY {
            if let Err(e) = app.prune_cursor() {
                warn!("Cursor prune failed: {}", e);
            }
            last_prune = Instant::now();
        }
    }

    info!("Shutting down...");
    watchers.stop();
    app.shutdown();
    info!("Stopped");
    Ok(())
}
