//! Version-gated staging and launch of a hosted application bundle.

mod core;

pub(crate) use crate::core::tooling::{outcome, progress};
pub(crate) use crate::core::{config, fs, launch, pipeline, stage};

pub use crate::core::commands::{execute, execute_with, StagehandCommand};
pub use crate::core::config::{
    BootstrapConfig, ConfigError, CustomProperties, EnvSnapshot, GlobalOptions, PlatformSpec,
    Properties, RuntimeConfig,
};
pub use crate::core::launch::{
    EntryPoint, EntryPointLoader, InProcessLauncher, LaunchDescription, LaunchEnvironment,
    LaunchError, LaunchMode, LaunchOutcome, LaunchPlan, LaunchSpec, LaunchStrategy,
    RegisteredEntryPoints, SpawnLauncher,
};
pub use crate::core::pipeline::{
    Bootstrap, BootstrapError, NoopObserver, RunReport, StageObserver, StagingReport,
};
pub use crate::core::stage::{
    check_and_update, clean_staging_dir, extract_archive, ExtractionError, StagingLayout,
    UnpackReport, UnpackWorker, WORKSPACE_DIR,
};
pub use crate::core::tooling::outcome::{
    format_status_message, to_json_response, CommandStatus, ExecutionOutcome,
};
pub use crate::core::tooling::progress::{ProgressObserver, ProgressReporter};

pub use stagehand_store::{CancelToken, FetchError, FetchProgress};
