use std::collections::HashMap;
use std::env;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::platform::PlatformSpec;
use super::properties::{CustomProperties, Properties};
use crate::launch::LaunchMode;
use crate::stage::StagingLayout;

pub const KEY_APP_NAME: &str = "app.name";
pub const KEY_APP_VERSION: &str = "app.version";
pub const KEY_ARCHIVES: &str = "app.archives";
pub const KEY_BASE_URL: &str = "base.url";
pub const KEY_LAUNCH_APPLICATION: &str = "launch.application";
pub const KEY_LAUNCH_PRODUCT: &str = "launch.product";
pub const KEY_LAUNCHER_NAME: &str = "launcher.name";
pub const KEY_RUNTIME_ARCHIVE: &str = "runtime.archive";
pub const KEY_RUNTIME_EXECUTABLE: &str = "runtime.executable";
pub const KEY_STAGING_ROOT: &str = "staging.root";

const ENV_CONFIG: &str = "STAGEHAND_CONFIG";
const ENV_TMPDIR: &str = "STAGEHAND_TMPDIR";
const ENV_PROGRESS: &str = "STAGEHAND_PROGRESS";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalOptions {
    pub quiet: bool,
    pub verbose: u8,
    pub trace: bool,
    pub json: bool,
    pub config: Option<String>,
    pub defines: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} is required")]
    Missing { key: String },
    #[error("launch.application or launch.product is required")]
    MissingMode,
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("malformed definition `{raw}` (expected key=value)")]
    MalformedDefine { raw: String },
    #[error(
        "no entry point is registered for launcher {}; set {key} to spawn it instead",
        launcher.display()
    )]
    NoEntryPoint {
        launcher: PathBuf,
        key: &'static str,
    },
    #[error("unsupported host {what} `{host}`; set {key} explicitly")]
    UnknownPlatform {
        what: &'static str,
        host: String,
        key: &'static str,
    },
}

#[derive(Debug, Clone)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    #[must_use]
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    #[must_use]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// Runtime archive plus the executable it provides; presence selects the spawn strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub archive: String,
    pub executable: String,
}

/// Everything the pipeline needs, resolved once at startup and passed by reference.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub(crate) app_name: String,
    pub(crate) app_version: String,
    pub(crate) archives: Vec<String>,
    pub(crate) base_url: String,
    pub(crate) mode: LaunchMode,
    pub(crate) launcher_name: String,
    pub(crate) runtime: Option<RuntimeConfig>,
    pub(crate) platform: PlatformSpec,
    pub(crate) tmp_root: PathBuf,
    pub(crate) custom: CustomProperties,
    pub(crate) progress: bool,
}

impl BootstrapConfig {
    /// Builds the configuration from the config file (if any), `-D` definitions and the
    /// current process environment.
    ///
    /// # Errors
    /// Returns an error when a source cannot be read or a required setting is missing.
    pub fn load(global: &GlobalOptions) -> Result<Self, ConfigError> {
        let snapshot = EnvSnapshot::capture();
        let mut props = match config_path(global, &snapshot) {
            Some(path) => {
                debug!(path = %path.display(), "loading config file");
                Properties::load_file(&path)?
            }
            None => Properties::new(),
        };
        let mut overrides = Properties::new();
        for raw in &global.defines {
            overrides.apply_define(raw)?;
        }
        props.merge(overrides);
        Self::from_properties(&props, &snapshot)
    }

    /// # Errors
    /// Returns an error when a required key is missing or a value is invalid.
    pub fn from_properties(
        props: &Properties,
        snapshot: &EnvSnapshot,
    ) -> Result<Self, ConfigError> {
        let app_name = props.required(KEY_APP_NAME)?.trim().to_string();
        plain_name(KEY_APP_NAME, &app_name)?;
        let app_version = props.required(KEY_APP_VERSION)?.trim().to_string();
        let archives = parse_archive_list(props.required(KEY_ARCHIVES)?)?;
        if archives.is_empty() {
            return Err(ConfigError::Missing {
                key: KEY_ARCHIVES.to_string(),
            });
        }

        let base_url = props.required(KEY_BASE_URL)?.trim().to_string();
        Url::parse(&base_url).map_err(|err| ConfigError::Invalid {
            key: KEY_BASE_URL.to_string(),
            reason: err.to_string(),
        })?;

        let mode = if let Some(app) = props.get(KEY_LAUNCH_APPLICATION) {
            LaunchMode::Application(app.trim().to_string())
        } else if let Some(product) = props.get(KEY_LAUNCH_PRODUCT) {
            LaunchMode::Product(product.trim().to_string())
        } else {
            return Err(ConfigError::MissingMode);
        };

        let launcher_name = props.required(KEY_LAUNCHER_NAME)?.trim().to_string();
        let runtime = match (props.get(KEY_RUNTIME_ARCHIVE), props.get(KEY_RUNTIME_EXECUTABLE)) {
            (Some(archive), Some(executable)) => {
                let archive = archive.trim().to_string();
                plain_name(KEY_RUNTIME_ARCHIVE, &archive)?;
                Some(RuntimeConfig {
                    archive,
                    executable: executable.trim().to_string(),
                })
            }
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::Invalid {
                    key: KEY_RUNTIME_EXECUTABLE.to_string(),
                    reason: format!("required when {KEY_RUNTIME_ARCHIVE} is set"),
                })
            }
            (None, Some(_)) => {
                return Err(ConfigError::Invalid {
                    key: KEY_RUNTIME_ARCHIVE.to_string(),
                    reason: format!("required when {KEY_RUNTIME_EXECUTABLE} is set"),
                })
            }
        };

        let tmp_root = props
            .get(KEY_STAGING_ROOT)
            .or_else(|| snapshot.var(ENV_TMPDIR))
            .map_or_else(env::temp_dir, PathBuf::from);

        let progress = match snapshot.var(ENV_PROGRESS) {
            Some(value) => value != "0",
            None => io::stderr().is_terminal(),
        };

        Ok(Self {
            app_name,
            app_version,
            archives,
            base_url,
            mode,
            launcher_name,
            runtime,
            platform: PlatformSpec::resolve(props, snapshot)?,
            tmp_root,
            custom: CustomProperties::from_properties(props),
            progress,
        })
    }

    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    #[must_use]
    pub fn app_version(&self) -> &str {
        &self.app_version
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn mode(&self) -> &LaunchMode {
        &self.mode
    }

    #[must_use]
    pub fn launcher_name(&self) -> &str {
        &self.launcher_name
    }

    #[must_use]
    pub fn runtime(&self) -> Option<&RuntimeConfig> {
        self.runtime.as_ref()
    }

    #[must_use]
    pub fn platform(&self) -> &PlatformSpec {
        &self.platform
    }

    #[must_use]
    pub fn custom(&self) -> &CustomProperties {
        &self.custom
    }

    #[must_use]
    pub fn progress(&self) -> bool {
        self.progress
    }

    #[must_use]
    pub fn layout(&self) -> StagingLayout {
        StagingLayout::new(&self.tmp_root, &self.app_name)
    }

    /// Archives to fetch in queue order; the runtime archive, when configured, goes last.
    #[must_use]
    pub fn manifest(&self) -> Vec<String> {
        let mut names = self.archives.clone();
        if let Some(runtime) = &self.runtime {
            if !names.contains(&runtime.archive) {
                names.push(runtime.archive.clone());
            }
        }
        names
    }

    #[must_use]
    pub fn archive_url(&self, archive: &str) -> String {
        format!("{}{archive}.zip", self.base_url)
    }
}

fn parse_archive_list(raw: &str) -> Result<Vec<String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| plain_name(KEY_ARCHIVES, name).map(|()| name.to_owned()))
        .collect()
}

/// Names that become a single path component under the staging root.
fn plain_name(key: &str, name: &str) -> Result<(), ConfigError> {
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(ConfigError::Invalid {
            key: key.to_string(),
            reason: format!("`{name}` must be a plain file name"),
        });
    }
    Ok(())
}

fn config_path(global: &GlobalOptions, snapshot: &EnvSnapshot) -> Option<PathBuf> {
    if let Some(explicit) = &global.config {
        return Some(PathBuf::from(explicit));
    }
    if let Some(from_env) = snapshot.var(ENV_CONFIG) {
        return Some(PathBuf::from(from_env));
    }
    dirs_next::config_dir()
        .map(|dir| default_config_file(&dir))
        .filter(|path| path.is_file())
}

fn default_config_file(config_dir: &Path) -> PathBuf {
    config_dir.join("stagehand").join("stagehand.toml")
}
