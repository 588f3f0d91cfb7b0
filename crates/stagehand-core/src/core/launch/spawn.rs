use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, error, info};

use super::{LaunchError, LaunchMode, LaunchOutcome};
use crate::stage::StagingLayout;

const LOG_ROTATE_BYTES: u64 = 1024 * 1024;
const STDOUT_LOG: &str = "stdout.log";
const STDERR_LOG: &str = "stderr.log";

/// Starts the staged runtime as a detached child process.
#[derive(Debug, Clone)]
pub struct SpawnLauncher {
    executable: PathBuf,
    launcher: PathBuf,
    flags: Vec<String>,
    working_dir: PathBuf,
    replay_file: PathBuf,
    logs_dir: PathBuf,
}

impl SpawnLauncher {
    /// Relative executables resolve against the staging directory.
    #[must_use]
    pub fn new(
        layout: &StagingLayout,
        executable: &Path,
        launcher: PathBuf,
        flags: Vec<String>,
    ) -> Self {
        let executable = if executable.is_absolute() {
            executable.to_path_buf()
        } else {
            layout.unpacked().join(executable)
        };
        Self {
            executable,
            launcher,
            flags,
            working_dir: layout.unpacked().to_path_buf(),
            replay_file: layout.replay_file(),
            logs_dir: layout.logs(),
        }
    }

    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    #[must_use]
    pub fn launcher(&self) -> &Path {
        &self.launcher
    }

    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// `-D<key>=<value>... -jar <launcher> <mode flag> <mode target>`
    #[must_use]
    pub fn command_args(&self, mode: &LaunchMode) -> Vec<String> {
        let mut args = self.flags.clone();
        args.push("-jar".to_string());
        args.push(self.launcher.display().to_string());
        args.extend(mode.args());
        args
    }

    #[must_use]
    pub fn display_command(&self, mode: &LaunchMode) -> String {
        let mut parts = vec![self.executable.display().to_string()];
        parts.extend(self.command_args(mode));
        parts.join(" ")
    }

    pub(crate) fn launch(&self, mode: &LaunchMode) -> Result<LaunchOutcome, LaunchError> {
        if !self.executable.is_file() {
            return Err(LaunchError::MissingExecutable {
                path: self.executable.clone(),
            });
        }
        fs::create_dir_all(&self.logs_dir).map_err(|source| LaunchError::Prepare {
            path: self.logs_dir.clone(),
            source,
        })?;
        let stdin = open_replay(&self.replay_file)?;
        let stdout = open_log(&self.logs_dir.join(STDOUT_LOG))?;
        let stderr = open_log(&self.logs_dir.join(STDERR_LOG))?;

        let args = self.command_args(mode);
        let mut command = Command::new(&self.executable);
        command
            .args(&args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        match command.spawn() {
            Ok(child) => {
                let pid = child.id();
                info!(
                    program = %self.executable.display(),
                    pid,
                    logs = %self.logs_dir.display(),
                    "runtime spawned"
                );
                Ok(LaunchOutcome::Spawned { pid })
            }
            Err(source) => {
                error!(
                    program = %self.executable.display(),
                    error = %source,
                    "failed to spawn runtime"
                );
                Err(LaunchError::Spawn {
                    program: self.executable.clone(),
                    source,
                })
            }
        }
    }
}

fn open_replay(path: &Path) -> Result<File, LaunchError> {
    OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)
        .map_err(|source| LaunchError::Prepare {
            path: path.to_path_buf(),
            source,
        })
}

fn open_log(path: &Path) -> Result<File, LaunchError> {
    let prepare = |source| LaunchError::Prepare {
        path: path.to_path_buf(),
        source,
    };
    rotate_log(path).map_err(prepare)?;
    OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(prepare)
}

/// Moves an oversized log to `<name>.1`, replacing any previous rotation.
fn rotate_log(path: &Path) -> io::Result<()> {
    let len = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if len <= LOG_ROTATE_BYTES {
        return Ok(());
    }
    let mut rotated = path.as_os_str().to_owned();
    rotated.push(".1");
    debug!(log = %path.display(), bytes = len, "rotating runtime log");
    fs::rename(path, PathBuf::from(rotated))
}
