//! Orchestration: version gate, fetch, unpack, then launch.
//!
//! Downloads run on the caller's thread while the unpack worker extracts whatever was
//! already fetched. A download failure stops the queue; the worker is still drained so no
//! archive is left half extracted, and the bootstrap ends before any launch. An extraction
//! failure in turn cancels the download in flight.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use stagehand_store::{ArchiveFetcher, CancelToken, FetchError, FetchProgress};
use tracing::{debug, info, warn};

use crate::config::{BootstrapConfig, ConfigError};
use crate::launch::{
    EntryPointLoader, LaunchDescription, LaunchError, LaunchOutcome, LaunchPlan,
    RegisteredEntryPoints,
};
use crate::outcome::ExecutionOutcome;
use crate::stage::{check_and_update, ExtractionError, UnpackReport, UnpackWorker};

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error(transparent)]
    Network(#[from] FetchError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("{app} was interrupted before launch")]
    Interrupted { app: String },
}

impl BootstrapError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Network(_) => "network",
            Self::Extraction(_) => "extraction",
            Self::Launch(_) => "launch",
            Self::Interrupted { .. } => "interrupted",
        }
    }

    /// Configuration problems are the user's to fix; everything else is a failure.
    #[must_use]
    pub fn to_outcome(&self) -> ExecutionOutcome {
        let mut details = json!({
            "reason": self.kind(),
            "error": format!("{self:#}"),
        });
        match self {
            Self::Configuration(_) => {
                details["hint"] = json!(
                    "Pass --config <file> or -D key=value to supply the missing settings."
                );
                ExecutionOutcome::user_error(self.to_string(), details)
            }
            Self::Network(err) => {
                details["cancelled"] = json!(err.is_cancelled());
                ExecutionOutcome::failure(self.to_string(), details)
            }
            Self::Interrupted { .. } => {
                details["cancelled"] = json!(true);
                ExecutionOutcome::failure(self.to_string(), details)
            }
            Self::Extraction(_) | Self::Launch(_) => {
                ExecutionOutcome::failure(self.to_string(), details)
            }
        }
    }
}

/// Hooks for rendering fetch activity. Every method defaults to a no-op.
pub trait StageObserver {
    fn fetch_started(&mut self, _archive: &str, _url: &str) {}
    fn fetch_progress(&mut self, _archive: &str, _progress: FetchProgress) {}
    fn fetch_finished(&mut self, _archive: &str, _bytes: u64) {}
    fn fetch_failed(&mut self, _archive: &str) {}
    fn archive_reused(&mut self, _archive: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl StageObserver for NoopObserver {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagingReport {
    pub staging_dir: PathBuf,
    pub force_refresh: bool,
    pub fetched: Vec<String>,
    pub reused: Vec<String>,
    pub unpack: UnpackReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub staging: StagingReport,
    pub launch: LaunchDescription,
    pub outcome: LaunchOutcome,
}

pub struct Bootstrap {
    config: BootstrapConfig,
    fetcher: ArchiveFetcher,
    loader: Arc<dyn EntryPointLoader>,
}

impl Bootstrap {
    /// # Errors
    /// Returns an error when the http client cannot be built.
    pub fn new(config: BootstrapConfig) -> Result<Self, BootstrapError> {
        Ok(Self {
            config,
            fetcher: ArchiveFetcher::new()?,
            loader: Arc::new(RegisteredEntryPoints::new()),
        })
    }

    /// Entry points used by the in-process strategy.
    #[must_use]
    pub fn with_entry_points(mut self, loader: Arc<dyn EntryPointLoader>) -> Self {
        self.loader = loader;
        self
    }

    #[must_use]
    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    #[must_use]
    pub fn launch_plan(&self) -> LaunchPlan {
        LaunchPlan::from_config(&self.config, Arc::clone(&self.loader))
    }

    /// Runs the version gate, downloads missing archives and unpacks every archive of the
    /// manifest into the staging directory.
    ///
    /// # Errors
    /// Returns the first network or extraction failure; nothing after it is attempted.
    pub fn stage(
        &self,
        cancel: &CancelToken,
        observer: &mut dyn StageObserver,
    ) -> Result<StagingReport, BootstrapError> {
        let layout = self.config.layout();
        fs::create_dir_all(layout.app_root()).map_err(|source| ExtractionError::Directory {
            path: layout.app_root().to_path_buf(),
            source,
        })?;

        let force_refresh = check_and_update(self.config.app_version(), &layout.marker());
        info!(
            app = self.config.app_name(),
            version = self.config.app_version(),
            force_refresh,
            staging = %layout.unpacked().display(),
            "staging application"
        );

        // Tripped by the worker on a fatal extraction error, and by the caller's token.
        let abort = cancel.child_token();
        let worker =
            UnpackWorker::spawn_with_abort(layout.unpacked(), force_refresh, abort.clone())?;
        let mut fetched = Vec::new();
        let mut reused = Vec::new();
        for archive in self.config.manifest() {
            let dest = layout.archive(&archive);
            if abort.is_cancelled() && !cancel.is_cancelled() {
                return Err(worker_failure(worker, dest));
            }
            if force_refresh || !dest.is_file() {
                let url = self.config.archive_url(&archive);
                observer.fetch_started(&archive, &url);
                let result = self.fetcher.fetch(&url, &dest, &abort, |progress| {
                    observer.fetch_progress(&archive, progress);
                });
                match result {
                    Ok(summary) => {
                        observer.fetch_finished(&archive, summary.bytes);
                        fetched.push(archive.clone());
                    }
                    Err(err) => {
                        observer.fetch_failed(&archive);
                        let drained = worker.finish();
                        if err.is_cancelled() && !cancel.is_cancelled() {
                            if let Err(cause) = drained {
                                return Err(cause.into());
                            }
                        } else if let Err(unpack) = drained {
                            warn!(error = %unpack, "unpack also failed while aborting");
                        }
                        return Err(err.into());
                    }
                }
            } else {
                debug!(%archive, path = %dest.display(), "archive already present");
                observer.archive_reused(&archive);
                reused.push(archive.clone());
            }

            if let Err(stopped) = worker.enqueue(dest) {
                return Err(match worker.finish() {
                    Err(cause) => cause.into(),
                    Ok(_) => stopped.into(),
                });
            }
        }

        let unpack = worker.finish()?;
        self.ensure_not_cancelled(cancel)?;
        info!(
            archives = unpack.archives,
            files = unpack.files_written,
            skipped = unpack.entries_skipped,
            "staging complete"
        );
        Ok(StagingReport {
            staging_dir: layout.unpacked().to_path_buf(),
            force_refresh,
            fetched,
            reused,
            unpack,
        })
    }

    /// Stages the application, then hands control to the launcher.
    ///
    /// # Errors
    /// See [`Bootstrap::stage`]; launch failures surface as [`BootstrapError::Launch`].
    pub fn run(
        &self,
        cancel: &CancelToken,
        observer: &mut dyn StageObserver,
    ) -> Result<RunReport, BootstrapError> {
        let plan = self.launch_plan();
        plan.preflight()?;
        let staging = self.stage(cancel, observer)?;
        let launch = plan.describe();
        self.ensure_not_cancelled(cancel)?;
        let outcome = plan.dispatch()?;
        Ok(RunReport {
            staging,
            launch,
            outcome,
        })
    }

    fn ensure_not_cancelled(&self, cancel: &CancelToken) -> Result<(), BootstrapError> {
        if cancel.is_cancelled() {
            warn!(app = self.config.app_name(), "interrupted; not launching");
            return Err(BootstrapError::Interrupted {
                app: self.config.app_name().to_string(),
            });
        }
        Ok(())
    }
}

/// The worker already gave up; its own error explains why.
fn worker_failure(worker: UnpackWorker, pending: PathBuf) -> BootstrapError {
    match worker.finish() {
        Err(cause) => cause.into(),
        Ok(_) => ExtractionError::WorkerStopped { archive: pending }.into(),
    }
}
