//! Periodic mailbox polling, one thread per mailbox.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::email::{MailboxWatcher, PollReport};

/// Drives one `MailboxWatcher` on an interval, with a manual trigger.
pub struct WatcherScheduler {
    name: String,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    last_report: Arc<Mutex<Option<PollReport>>>,
}

impl WatcherScheduler {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            last_report: Arc::new(Mutex::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts the poll loop on its own thread with a current-thread runtime.
    /// The first poll runs immediately. A trigger runs a sweep, which
    /// ignores back-off.
    pub fn start(
        &self,
        mut watcher: MailboxWatcher,
        mut trigger_rx: broadcast::Receiver<()>,
    ) -> std::io::Result<JoinHandle<()>> {
        let shutdown = Arc::clone(&self.shutdown);
        let last_report = Arc::clone(&self.last_report);
        let interval = self.interval;
        let name = self.name.clone();

        std::thread::Builder::new()
            .name(format!("watch-{}", name))
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!(mailbox = %name, "Failed to start watcher runtime: {}", e);
                        return;
                    }
                };

                rt.block_on(async {
                    let mut interval_timer = tokio::time::interval(interval);
                    interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

                    loop {
                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }

                        let manual = tokio::select! {
                            _ = interval_timer.tick() => false,
                            recv = trigger_rx.recv() => match recv {
                                Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => true,
                                Err(broadcast::error::RecvError::Closed) => {
                                    // No more triggers; keep the timer.
                                    interval_timer.tick().await;
                                    false
                                }
                            },
                        };

                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }

                        let report = if manual {
                            info!(mailbox = %name, "Manual sweep triggered");
                            watcher.sweep().await
                        } else {
                            watcher.poll().await
                        };

                        if let Ok(mut slot) = last_report.lock() {
                            *slot = Some(report);
                        }
                    }

                    info!(mailbox = %name, "Watcher stopped");
                });
            })
    }

    /// Signals the loop to stop. Send a trigger to wake it immediately.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// The report of the most recent cycle, if any ran.
    pub fn last_report(&self) -> Option<PollReport> {
        self.last_report.lock().ok().and_then(|slot| slot.clone())
    }
}
