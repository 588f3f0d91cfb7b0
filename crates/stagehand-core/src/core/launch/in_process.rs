use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::info;

use super::{LaunchEnvironment, LaunchError, LaunchOutcome, LaunchSpec};

/// The designated entry point of a staged launcher. Receives the composed argument string
/// and runs to completion on the caller's thread.
pub trait EntryPoint: Send + Sync {
    fn main(&self, args: &str, env: &LaunchEnvironment) -> Result<()>;
}

impl<F> EntryPoint for F
where
    F: Fn(&str, &LaunchEnvironment) -> Result<()> + Send + Sync,
{
    fn main(&self, args: &str, env: &LaunchEnvironment) -> Result<()> {
        self(args, env)
    }
}

/// Resolves the entry point provided by a launcher artifact on disk.
pub trait EntryPointLoader: Send + Sync {
    fn load(&self, artifact: &Path) -> Result<Arc<dyn EntryPoint>>;

    /// Whether [`load`](Self::load) can resolve `artifact`, asked before anything is
    /// staged. Loaders that only find out by reading the artifact keep the default.
    fn provides(&self, _artifact: &Path) -> bool {
        true
    }
}

/// Entry points supplied by the embedding program, keyed by launcher file name.
#[derive(Clone, Default)]
pub struct RegisteredEntryPoints {
    entries: HashMap<String, Arc<dyn EntryPoint>>,
}

impl RegisteredEntryPoints {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn register(
        mut self,
        launcher_name: impl Into<String>,
        entry: impl EntryPoint + 'static,
    ) -> Self {
        self.entries.insert(launcher_name.into(), Arc::new(entry));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for RegisteredEntryPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("RegisteredEntryPoints")
            .field("launchers", &names)
            .finish()
    }
}

impl EntryPointLoader for RegisteredEntryPoints {
    fn load(&self, artifact: &Path) -> Result<Arc<dyn EntryPoint>> {
        let name = artifact
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("launcher path {} has no file name", artifact.display()))?;
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("no entry point registered for launcher `{name}`"))
    }

    fn provides(&self, artifact: &Path) -> bool {
        artifact
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.entries.contains_key(name))
    }
}

/// Runs the launcher's entry point on the current thread.
pub struct InProcessLauncher {
    launcher: PathBuf,
    loader: Arc<dyn EntryPointLoader>,
}

impl InProcessLauncher {
    #[must_use]
    pub fn new(launcher: PathBuf, loader: Arc<dyn EntryPointLoader>) -> Self {
        Self { launcher, loader }
    }

    #[must_use]
    pub fn launcher(&self) -> &Path {
        &self.launcher
    }

    #[must_use]
    pub fn resolvable(&self) -> bool {
        self.loader.provides(&self.launcher)
    }

    pub(crate) fn launch(
        &self,
        spec: &LaunchSpec,
        env: &LaunchEnvironment,
    ) -> Result<LaunchOutcome, LaunchError> {
        if !self.launcher.is_file() {
            return Err(LaunchError::MissingLauncher {
                path: self.launcher.clone(),
            });
        }
        let entry = self
            .loader
            .load(&self.launcher)
            .map_err(|source| LaunchError::EntryPoint {
                path: self.launcher.clone(),
                source,
            })?;
        let args = spec.compose();
        info!(launcher = %self.launcher.display(), %args, "invoking launcher entry point");
        entry
            .main(&args, env)
            .map_err(|source| LaunchError::Invocation { source })?;
        Ok(LaunchOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlatformSpec;
    use crate::launch::LaunchMode;
    use std::sync::Mutex;

    fn spec(install: &Path) -> LaunchSpec {
        let platform = PlatformSpec {
            os: "linux".into(),
            ws: "gtk".into(),
            arch: "amd64".into(),
            locale: "en_US".into(),
        };
        LaunchSpec::new(&platform, install, LaunchMode::Application("demo".into()))
    }

    #[test]
    fn invokes_registered_entry_point_with_composed_args() {
        let temp = tempfile::tempdir().expect("tempdir");
        let launcher = temp.path().join("launcher.jar");
        std::fs::write(&launcher, b"launcher").expect("launcher");

        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let loader = RegisteredEntryPoints::new().register(
            "launcher.jar",
            move |args: &str, env: &LaunchEnvironment| {
                *sink.lock().expect("lock") = Some((args.to_string(), env.base_url.clone()));
                Ok(())
            },
        );
        let env = LaunchEnvironment {
            properties: Vec::new(),
            base_url: "https://example.invalid/".into(),
        };

        let outcome = InProcessLauncher::new(launcher, Arc::new(loader))
            .launch(&spec(temp.path()), &env)
            .expect("launch");

        assert_eq!(outcome, LaunchOutcome::Completed);
        let (args, base_url) = seen.lock().expect("lock").clone().expect("invoked");
        assert!(args.starts_with("-os linux -ws gtk -arch amd64 -install "));
        assert!(args.ends_with("-application demo"));
        assert_eq!(base_url, "https://example.invalid/");
    }

    #[test]
    fn registered_entry_points_report_what_they_provide() {
        let loader = RegisteredEntryPoints::new()
            .register("launcher.jar", |_: &str, _: &LaunchEnvironment| Ok(()));
        assert!(loader.provides(Path::new("/stage/unpacked/launcher.jar")));
        assert!(!loader.provides(Path::new("/stage/unpacked/other.jar")));
        assert!(!RegisteredEntryPoints::new().provides(Path::new("launcher.jar")));
    }

    #[test]
    fn missing_launcher_artifact_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let launcher = temp.path().join("launcher.jar");
        let err = InProcessLauncher::new(launcher, Arc::new(RegisteredEntryPoints::new()))
            .launch(&spec(temp.path()), &LaunchEnvironment::default())
            .expect_err("missing launcher");
        assert!(matches!(err, LaunchError::MissingLauncher { .. }));
    }

    #[test]
    fn unregistered_launcher_fails_resolution() {
        let temp = tempfile::tempdir().expect("tempdir");
        let launcher = temp.path().join("other.jar");
        std::fs::write(&launcher, b"launcher").expect("launcher");
        let err = InProcessLauncher::new(launcher, Arc::new(RegisteredEntryPoints::new()))
            .launch(&spec(temp.path()), &LaunchEnvironment::default())
            .expect_err("unregistered");
        assert!(matches!(err, LaunchError::EntryPoint { .. }));
        assert!(err.to_string().contains("no entry point registered"));
    }

    #[test]
    fn entry_point_failure_carries_cause() {
        let temp = tempfile::tempdir().expect("tempdir");
        let launcher = temp.path().join("launcher.jar");
        std::fs::write(&launcher, b"launcher").expect("launcher");
        let loader = RegisteredEntryPoints::new().register(
            "launcher.jar",
            |_: &str, _: &LaunchEnvironment| Err(anyhow!("splash screen crashed")),
        );
        let err = InProcessLauncher::new(launcher, Arc::new(loader))
            .launch(&spec(temp.path()), &LaunchEnvironment::default())
            .expect_err("invocation failure");
        assert!(matches!(err, LaunchError::Invocation { .. }));
        assert!(err.to_string().contains("splash screen crashed"));
    }
}
