use std::sync::Arc;

use serde_json::json;
use stagehand_store::CancelToken;
use tracing::debug;

use crate::config::{BootstrapConfig, GlobalOptions};
use crate::launch::{EntryPointLoader, RegisteredEntryPoints};
use crate::outcome::ExecutionOutcome;
use crate::pipeline::{Bootstrap, BootstrapError};
use crate::progress::ProgressObserver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagehandCommand {
    /// Stage, then launch.
    Run,
    /// Gate, fetch and unpack only.
    Stage,
    /// Print the resolved launch plan without touching the network.
    ShowLaunch,
}

impl StagehandCommand {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Stage => "stage",
            Self::ShowLaunch => "show-launch",
        }
    }
}

/// Runs `command` with no in-process entry points registered, so `run` needs a runtime.
#[must_use]
pub fn execute(
    global: &GlobalOptions,
    command: StagehandCommand,
    cancel: &CancelToken,
) -> ExecutionOutcome {
    execute_with(global, command, cancel, Arc::new(RegisteredEntryPoints::new()))
}

/// Runs `command`, resolving in-process launches through `loader`.
#[must_use]
pub fn execute_with(
    global: &GlobalOptions,
    command: StagehandCommand,
    cancel: &CancelToken,
    loader: Arc<dyn EntryPointLoader>,
) -> ExecutionOutcome {
    match dispatch(global, command, cancel, loader) {
        Ok(outcome) => outcome,
        Err(err) => {
            debug!(command = command.name(), error = %err, "command failed");
            err.to_outcome()
        }
    }
}

fn dispatch(
    global: &GlobalOptions,
    command: StagehandCommand,
    cancel: &CancelToken,
    loader: Arc<dyn EntryPointLoader>,
) -> Result<ExecutionOutcome, BootstrapError> {
    let config = BootstrapConfig::load(global)?;
    let show_progress = config.progress() && !global.quiet && !global.json;
    let bootstrap = Bootstrap::new(config)?.with_entry_points(loader);
    let mut observer = ProgressObserver::new(show_progress);

    match command {
        StagehandCommand::ShowLaunch => {
            let described = bootstrap.launch_plan().describe();
            Ok(ExecutionOutcome::success(
                described.invocation.clone(),
                json!({ "launch": described }),
            ))
        }
        StagehandCommand::Stage => {
            let report = bootstrap.stage(cancel, &mut observer)?;
            let message = format!(
                "staged {} archive(s) into {}",
                report.unpack.archives,
                report.staging_dir.display()
            );
            Ok(ExecutionOutcome::success(message, json!(report)))
        }
        StagehandCommand::Run => {
            let report = bootstrap.run(cancel, &mut observer)?;
            let message = format!(
                "launched {} ({})",
                bootstrap.config().app_name(),
                report.launch.strategy
            );
            Ok(ExecutionOutcome::success(message, json!(report)))
        }
    }
}
