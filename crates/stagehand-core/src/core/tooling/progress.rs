use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use stagehand_store::FetchProgress;
use tracing::debug;

use crate::pipeline::StageObserver;

const UNKNOWN_TOTAL: u64 = 0;

/// Stderr byte counter for a single transfer; a spinner while the total is unknown.
pub struct ProgressReporter {
    transferred: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
    stop: Option<Arc<AtomicBool>>,
    handle: Option<thread::JoinHandle<()>>,
    enabled: bool,
}

impl ProgressReporter {
    #[must_use]
    pub fn bytes(label: impl Into<String>, enabled: bool) -> Self {
        let transferred = Arc::new(AtomicU64::new(0));
        let total = Arc::new(AtomicU64::new(UNKNOWN_TOTAL));
        if !enabled {
            return Self {
                transferred,
                total,
                stop: None,
                handle: None,
                enabled: false,
            };
        }

        let label = label.into();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread_transferred = Arc::clone(&transferred);
        let thread_total = Arc::clone(&total);
        let handle = thread::spawn(move || {
            ProgressReporter::run(&label, &thread_transferred, &thread_total, &thread_stop);
        });

        Self {
            transferred,
            total,
            stop: Some(stop),
            handle: Some(handle),
            enabled: true,
        }
    }

    pub fn update(&self, progress: FetchProgress) {
        if self.enabled {
            self.transferred
                .store(progress.transferred, AtomicOrdering::Relaxed);
            if let Some(total) = progress.total {
                self.total.store(total, AtomicOrdering::Relaxed);
            }
        }
    }

    pub fn finish(mut self, message: impl Into<String>) {
        if self.enabled {
            self.stop_thread();
            eprintln!("stagehand ▸ {}", message.into());
        }
    }

    fn stop_thread(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.store(true, AtomicOrdering::Relaxed);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let _ = io::stderr().write_all(b"\r\x1b[2K");
        let _ = io::stderr().flush();
    }

    fn run(label: &str, transferred: &AtomicU64, total: &AtomicU64, stop: &AtomicBool) {
        const FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
        let mut idx = 0;
        while !stop.load(AtomicOrdering::Relaxed) {
            let frame = FRAMES[idx % FRAMES.len()];
            idx += 1;
            let current = transferred.load(AtomicOrdering::Relaxed);
            let line = match total.load(AtomicOrdering::Relaxed) {
                UNKNOWN_TOTAL => {
                    format!("\r\x1b[2Kstagehand ▸ {label} {} {frame}", format_bytes(current))
                }
                total => format!(
                    "\r\x1b[2Kstagehand ▸ {label} [{}/{}] {frame}",
                    format_bytes(current.min(total)),
                    format_bytes(total)
                ),
            };
            let _ = io::stderr().write_all(line.as_bytes());
            let _ = io::stderr().flush();
            thread::sleep(Duration::from_millis(80));
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if self.enabled {
            self.stop_thread();
        }
    }
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Renders one [`ProgressReporter`] per archive download.
#[derive(Default)]
pub struct ProgressObserver {
    enabled: bool,
    active: Option<ProgressReporter>,
}

impl ProgressObserver {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            active: None,
        }
    }
}

impl StageObserver for ProgressObserver {
    fn fetch_started(&mut self, archive: &str, _url: &str) {
        self.active = Some(ProgressReporter::bytes(
            format!("fetching {archive}"),
            self.enabled,
        ));
    }

    fn fetch_progress(&mut self, _archive: &str, progress: FetchProgress) {
        if let Some(reporter) = &self.active {
            reporter.update(progress);
        }
    }

    fn fetch_finished(&mut self, archive: &str, bytes: u64) {
        if let Some(reporter) = self.active.take() {
            reporter.finish(format!("fetched {archive} ({})", format_bytes(bytes)));
        }
    }

    fn fetch_failed(&mut self, archive: &str) {
        debug!(%archive, "download abandoned");
        self.active = None;
    }

    fn archive_reused(&mut self, archive: &str) {
        debug!(%archive, "reusing cached archive");
    }
}
