mod in_process;
mod spawn;
mod spec;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::config::{BootstrapConfig, ConfigError, KEY_BASE_URL, KEY_RUNTIME_EXECUTABLE};

pub use in_process::{EntryPoint, EntryPointLoader, InProcessLauncher, RegisteredEntryPoints};
pub use spawn::SpawnLauncher;
pub use spec::{LaunchMode, LaunchSpec};

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("launcher artifact {} not found", path.display())]
    MissingLauncher { path: PathBuf },
    #[error("failed to load entry point from {}: {source:#}", path.display())]
    EntryPoint {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("launcher entry point failed: {source:#}")]
    Invocation {
        #[source]
        source: anyhow::Error,
    },
    #[error("runtime executable {} not found", path.display())]
    MissingExecutable { path: PathBuf },
    #[error("failed to prepare {}: {source}", path.display())]
    Prepare {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What the launched application sees besides its argument string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LaunchEnvironment {
    pub properties: Vec<(String, String)>,
    pub base_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LaunchOutcome {
    /// The in-process entry point returned.
    Completed,
    /// A detached child was started; it is not awaited.
    Spawned { pid: u32 },
}

pub enum LaunchStrategy {
    InProcess(InProcessLauncher),
    Spawn(SpawnLauncher),
}

impl LaunchStrategy {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InProcess(_) => "in-process",
            Self::Spawn(_) => "spawn",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchDescription {
    pub strategy: &'static str,
    pub launcher: PathBuf,
    pub invocation: String,
    pub working_dir: PathBuf,
}

/// A resolved launch: strategy, argument inputs and environment, ready to dispatch once.
pub struct LaunchPlan {
    strategy: LaunchStrategy,
    spec: LaunchSpec,
    environment: LaunchEnvironment,
}

impl LaunchPlan {
    /// Spawn when a runtime is configured, otherwise run the launcher's entry point in
    /// process.
    #[must_use]
    pub fn from_config(config: &BootstrapConfig, loader: Arc<dyn EntryPointLoader>) -> Self {
        let layout = config.layout();
        let install_dir = layout.unpacked();
        let launcher = install_dir.join(config.launcher_name());
        let spec = LaunchSpec::new(config.platform(), install_dir, config.mode().clone());
        let environment = LaunchEnvironment {
            properties: config.custom().env_pairs(),
            base_url: config.base_url().to_string(),
        };
        let strategy = match config.runtime() {
            Some(runtime) => {
                let flags = config
                    .custom()
                    .clone()
                    .with(KEY_BASE_URL, config.base_url())
                    .flags();
                LaunchStrategy::Spawn(SpawnLauncher::new(
                    &layout,
                    Path::new(&runtime.executable),
                    launcher,
                    flags,
                ))
            }
            None => LaunchStrategy::InProcess(InProcessLauncher::new(launcher, loader)),
        };
        Self {
            strategy,
            spec,
            environment,
        }
    }

    #[must_use]
    pub fn strategy(&self) -> &LaunchStrategy {
        &self.strategy
    }

    #[must_use]
    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    #[must_use]
    pub fn environment(&self) -> &LaunchEnvironment {
        &self.environment
    }

    #[must_use]
    pub fn describe(&self) -> LaunchDescription {
        match &self.strategy {
            LaunchStrategy::InProcess(launcher) => LaunchDescription {
                strategy: self.strategy.name(),
                launcher: launcher.launcher().to_path_buf(),
                invocation: self.spec.compose(),
                working_dir: self.spec.install_dir.clone(),
            },
            LaunchStrategy::Spawn(launcher) => LaunchDescription {
                strategy: self.strategy.name(),
                launcher: launcher.launcher().to_path_buf(),
                invocation: launcher.display_command(&self.spec.mode),
                working_dir: launcher.working_dir().to_path_buf(),
            },
        }
    }

    /// Checks what can be known before staging: an in-process launch needs an entry point
    /// for the launcher.
    ///
    /// # Errors
    /// Returns [`ConfigError::NoEntryPoint`] when the loader cannot provide one.
    pub fn preflight(&self) -> Result<(), ConfigError> {
        match &self.strategy {
            LaunchStrategy::InProcess(launcher) if !launcher.resolvable() => {
                Err(ConfigError::NoEntryPoint {
                    launcher: launcher.launcher().to_path_buf(),
                    key: KEY_RUNTIME_EXECUTABLE,
                })
            }
            _ => Ok(()),
        }
    }

    /// Starts the application. Consumes the plan; there is no retry.
    ///
    /// # Errors
    /// Returns [`LaunchError`] when the launcher cannot be resolved, the entry point fails,
    /// or the runtime cannot be spawned.
    pub fn dispatch(self) -> Result<LaunchOutcome, LaunchError> {
        info!(strategy = self.strategy.name(), "dispatching launch");
        match &self.strategy {
            LaunchStrategy::InProcess(launcher) => launcher.launch(&self.spec, &self.environment),
            LaunchStrategy::Spawn(launcher) => launcher.launch(&self.spec.mode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvSnapshot, Properties};

    fn config(extra: &[(&str, &str)]) -> BootstrapConfig {
        let mut props = Properties::new();
        props.set("app.name", "atlas");
        props.set("app.version", "1.0");
        props.set("app.archives", "core");
        props.set("base.url", "https://downloads.example.invalid/atlas/");
        props.set("launch.application", "atlas.app");
        props.set("launcher.name", "launcher.jar");
        props.set("platform.os", "linux");
        props.set("platform.ws", "gtk");
        props.set("platform.arch", "amd64");
        props.set("platform.nl", "en_US");
        props.set("staging.root", "/srv/stage");
        props.set("custom.theme", "dark");
        for (key, value) in extra {
            props.set(*key, *value);
        }
        BootstrapConfig::from_properties(&props, &EnvSnapshot::from_pairs(&[])).expect("config")
    }

    #[test]
    fn in_process_plan_describes_argument_string() {
        let plan = LaunchPlan::from_config(&config(&[]), Arc::new(RegisteredEntryPoints::new()));
        let described = plan.describe();
        assert_eq!(described.strategy, "in-process");
        assert_eq!(
            described.launcher,
            Path::new("/srv/stage/atlas/unpacked/launcher.jar")
        );
        assert_eq!(
            described.invocation,
            "-os linux -ws gtk -arch amd64 -install /srv/stage/atlas/unpacked \
             -data /srv/stage/atlas/unpacked/workspace/ -user /srv/stage/atlas/unpacked/workspace/ \
             -nl en_US -application atlas.app"
        );
        assert_eq!(
            plan.environment().properties,
            vec![("theme".to_string(), "dark".to_string())]
        );
        assert_eq!(
            plan.environment().base_url,
            "https://downloads.example.invalid/atlas/"
        );
    }

    #[test]
    fn runtime_selects_spawn_with_property_flags() {
        let plan = LaunchPlan::from_config(
            &config(&[("runtime.archive", "jre"), ("runtime.executable", "jre/bin/java")]),
            Arc::new(RegisteredEntryPoints::new()),
        );
        let described = plan.describe();
        assert_eq!(described.strategy, "spawn");
        assert_eq!(described.working_dir, Path::new("/srv/stage/atlas/unpacked"));
        assert_eq!(
            described.invocation,
            "/srv/stage/atlas/unpacked/jre/bin/java -Dtheme=dark \
             -Dbase.url=https://downloads.example.invalid/atlas/ \
             -jar /srv/stage/atlas/unpacked/launcher.jar -application atlas.app"
        );
    }

    #[test]
    fn preflight_rejects_unregistered_in_process_launcher() {
        let plan = LaunchPlan::from_config(&config(&[]), Arc::new(RegisteredEntryPoints::new()));
        let err = plan.preflight().expect_err("nothing registered");
        assert!(matches!(err, ConfigError::NoEntryPoint { .. }));

        let registered = RegisteredEntryPoints::new()
            .register("launcher.jar", |_: &str, _: &LaunchEnvironment| Ok(()));
        let plan = LaunchPlan::from_config(&config(&[]), Arc::new(registered));
        plan.preflight().expect("registered launcher");
    }

    #[test]
    fn preflight_accepts_spawn_without_entry_points() {
        let plan = LaunchPlan::from_config(
            &config(&[("runtime.archive", "jre"), ("runtime.executable", "jre/bin/java")]),
            Arc::new(RegisteredEntryPoints::new()),
        );
        plan.preflight().expect("spawn needs no entry point");
    }

    #[test]
    fn dispatch_fails_without_launcher_artifact() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().to_string_lossy().to_string();
        let plan = LaunchPlan::from_config(
            &config(&[("staging.root", root.as_str())]),
            Arc::new(RegisteredEntryPoints::new()),
        );
        let err = plan.dispatch().expect_err("no launcher staged");
        assert!(matches!(err, LaunchError::MissingLauncher { .. }));
    }
}
