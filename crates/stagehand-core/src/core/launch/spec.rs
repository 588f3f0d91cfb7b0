use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::PlatformSpec;
use crate::stage::WORKSPACE_DIR;

/// Which launcher target to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum LaunchMode {
    Application(String),
    Product(String),
}

impl LaunchMode {
    #[must_use]
    pub fn flag(&self) -> &'static str {
        match self {
            Self::Application(_) => "-application",
            Self::Product(_) => "-product",
        }
    }

    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::Application(name) | Self::Product(name) => name,
        }
    }

    #[must_use]
    pub fn args(&self) -> [String; 2] {
        [self.flag().to_string(), self.target().to_string()]
    }
}

impl fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.flag(), self.target())
    }
}

/// Inputs that fully determine the in-process launcher argument string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchSpec {
    pub os: String,
    pub ws: String,
    pub arch: String,
    pub install_dir: PathBuf,
    pub locale: String,
    pub mode: LaunchMode,
}

impl LaunchSpec {
    #[must_use]
    pub fn new(platform: &PlatformSpec, install_dir: &Path, mode: LaunchMode) -> Self {
        Self {
            os: platform.os.clone(),
            ws: platform.ws.clone(),
            arch: platform.arch.clone(),
            install_dir: install_dir.to_path_buf(),
            locale: platform.locale.clone(),
            mode,
        }
    }

    /// Data and user directory handed to the launcher; always ends with a separator.
    #[must_use]
    pub fn workspace_dir(&self) -> String {
        format!("{}/{WORKSPACE_DIR}/", self.install_dir.display())
    }

    /// `-os <os> -ws <ws> -arch <arch> -install <dir> -data <dir>/workspace/
    /// -user <dir>/workspace/ -nl <locale> <mode>`
    #[must_use]
    pub fn compose(&self) -> String {
        let workspace = self.workspace_dir();
        format!(
            "-os {} -ws {} -arch {} -install {} -data {workspace} -user {workspace} -nl {} {}",
            self.os,
            self.ws,
            self.arch,
            self.install_dir.display(),
            self.locale,
            self.mode,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux_platform() -> PlatformSpec {
        PlatformSpec {
            os: "linux".into(),
            ws: "gtk".into(),
            arch: "amd64".into(),
            locale: "en_US".into(),
        }
    }

    #[test]
    fn composes_application_arguments() {
        let spec = LaunchSpec::new(
            &linux_platform(),
            Path::new("/tmp/app/unpacked"),
            LaunchMode::Application("foo".into()),
        );
        assert_eq!(
            spec.compose(),
            "-os linux -ws gtk -arch amd64 -install /tmp/app/unpacked \
             -data /tmp/app/unpacked/workspace/ -user /tmp/app/unpacked/workspace/ \
             -nl en_US -application foo"
        );
    }

    #[test]
    fn composes_product_arguments() {
        let spec = LaunchSpec::new(
            &linux_platform(),
            Path::new("/opt/stage"),
            LaunchMode::Product("org.example.product".into()),
        );
        assert!(spec.compose().ends_with("-nl en_US -product org.example.product"));
    }

    #[test]
    fn mode_renders_as_flag_and_target() {
        let mode = LaunchMode::Application("foo".into());
        assert_eq!(mode.to_string(), "-application foo");
        assert_eq!(mode.args(), ["-application".to_string(), "foo".to_string()]);
    }
}
