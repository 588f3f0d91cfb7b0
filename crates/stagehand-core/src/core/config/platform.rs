use std::env::consts;

use serde::Serialize;

use super::properties::Properties;
use super::settings::{ConfigError, EnvSnapshot};

pub const KEY_OS: &str = "platform.os";
pub const KEY_WS: &str = "platform.ws";
pub const KEY_ARCH: &str = "platform.arch";
pub const KEY_LOCALE: &str = "platform.nl";

const DEFAULT_LOCALE: &str = "en_US";

/// Launcher-facing platform identifiers (`-os`, `-ws`, `-arch`, `-nl`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformSpec {
    pub os: String,
    pub ws: String,
    pub arch: String,
    pub locale: String,
}

impl PlatformSpec {
    /// Explicit `platform.*` keys win; anything left unset falls back to the host.
    ///
    /// # Errors
    /// Returns an error when the host is not in the small default table and no explicit
    /// value was configured.
    pub fn resolve(props: &Properties, snapshot: &EnvSnapshot) -> Result<Self, ConfigError> {
        let os = match props.get(KEY_OS) {
            Some(os) => os.trim().to_string(),
            None => host_os(consts::OS)
                .ok_or_else(|| ConfigError::UnknownPlatform {
                    what: "operating system",
                    host: consts::OS.to_string(),
                    key: KEY_OS,
                })?
                .to_string(),
        };
        let ws = props
            .get(KEY_WS)
            .map_or_else(|| window_system(&os).to_string(), |ws| ws.trim().to_string());
        let arch = match props.get(KEY_ARCH) {
            Some(arch) => arch.trim().to_string(),
            None => host_arch(consts::ARCH)
                .ok_or_else(|| ConfigError::UnknownPlatform {
                    what: "architecture",
                    host: consts::ARCH.to_string(),
                    key: KEY_ARCH,
                })?
                .to_string(),
        };
        let locale = props.get(KEY_LOCALE).map_or_else(
            || {
                snapshot
                    .var("LC_ALL")
                    .or_else(|| snapshot.var("LANG"))
                    .and_then(locale_from_env)
                    .unwrap_or_else(|| DEFAULT_LOCALE.to_string())
            },
            |nl| nl.trim().to_string(),
        );
        Ok(Self {
            os,
            ws,
            arch,
            locale,
        })
    }
}

fn host_os(os: &str) -> Option<&'static str> {
    match os {
        "linux" => Some("linux"),
        "macos" => Some("macosx"),
        "windows" => Some("win32"),
        "solaris" | "illumos" => Some("solaris"),
        "aix" => Some("aix"),
        "nto" => Some("qnx"),
        _ => None,
    }
}

fn window_system(os: &str) -> &'static str {
    match os {
        "win32" => "win32",
        "linux" => "gtk",
        "qnx" => "photon",
        "macosx" => "carbon",
        _ => "motif",
    }
}

fn host_arch(arch: &str) -> Option<&'static str> {
    match arch {
        "x86_64" => Some("amd64"),
        "x86" => Some("x86"),
        "aarch64" => Some("aarch64"),
        "powerpc" | "powerpc64" => Some("ppc"),
        "sparc" | "sparc64" => Some("sparc"),
        _ => None,
    }
}

/// `de_DE.UTF-8@euro` -> `de_DE`; the C/POSIX locales carry no language.
fn locale_from_env(raw: &str) -> Option<String> {
    let base = raw.split(['.', '@']).next().unwrap_or_default().trim();
    if base.is_empty() || base == "C" || base == "POSIX" {
        None
    } else {
        Some(base.to_string())
    }
}
