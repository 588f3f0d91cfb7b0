use std::path::{Path, PathBuf};

/// Reserved user-configuration directory inside the staging root; never cleaned.
pub const WORKSPACE_DIR: &str = "workspace";

const UNPACKED_DIR: &str = "unpacked";
const MARKER_FILE: &str = "version";
const LOGS_DIR: &str = "logs";
const REPLAY_FILE: &str = "launch.replay";

/// `<tmp>/<app>/` holds the marker and downloaded archives, `<tmp>/<app>/unpacked/` the
/// extracted application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingLayout {
    app_root: PathBuf,
    unpacked: PathBuf,
}

impl StagingLayout {
    #[must_use]
    pub fn new(tmp_root: &Path, app_name: &str) -> Self {
        let app_root = tmp_root.join(app_name);
        let unpacked = app_root.join(UNPACKED_DIR);
        Self { app_root, unpacked }
    }

    #[must_use]
    pub fn app_root(&self) -> &Path {
        &self.app_root
    }

    #[must_use]
    pub fn unpacked(&self) -> &Path {
        &self.unpacked
    }

    #[must_use]
    pub fn marker(&self) -> PathBuf {
        self.app_root.join(MARKER_FILE)
    }

    #[must_use]
    pub fn archive(&self, name: &str) -> PathBuf {
        self.app_root.join(format!("{name}.zip"))
    }

    #[must_use]
    pub fn workspace(&self) -> PathBuf {
        self.unpacked.join(WORKSPACE_DIR)
    }

    #[must_use]
    pub fn logs(&self) -> PathBuf {
        self.unpacked.join(LOGS_DIR)
    }

    #[must_use]
    pub fn replay_file(&self) -> PathBuf {
        self.unpacked.join(REPLAY_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_hang_off_the_app_root() {
        let layout = StagingLayout::new(Path::new("/tmp"), "atlas");
        assert_eq!(layout.app_root(), Path::new("/tmp/atlas"));
        assert_eq!(layout.unpacked(), Path::new("/tmp/atlas/unpacked"));
        assert_eq!(layout.marker(), Path::new("/tmp/atlas/version"));
        assert_eq!(layout.archive("core"), Path::new("/tmp/atlas/core.zip"));
        assert_eq!(layout.workspace(), Path::new("/tmp/atlas/unpacked/workspace"));
    }
}
