use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};

/// Compare `new_version` against the persisted marker and record it.
///
/// Returns `true` when staged content must be refreshed: no readable prior version, a
/// different prior version, or a marker that could not be written. The marker is rewritten
/// on every call regardless of the outcome.
///
/// An unreadable marker is indistinguishable from a fresh install and forces a full
/// re-stage on every run until it becomes readable again.
pub fn check_and_update(new_version: &str, marker: &Path) -> bool {
    let previous = match fs::read_to_string(marker) {
        Ok(contents) => contents.lines().next().map(ToOwned::to_owned),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => {
            warn!(
                marker = %marker.display(),
                error = %err,
                "version marker unreadable; treating as fresh install"
            );
            None
        }
    };

    if let Err(err) = write_marker(marker, new_version) {
        warn!(
            marker = %marker.display(),
            error = %err,
            "failed to record version marker; forcing refresh"
        );
        return true;
    }

    let refresh = previous.as_deref() != Some(new_version);
    debug!(
        previous = previous.as_deref().unwrap_or("<none>"),
        current = new_version,
        refresh,
        "version gate evaluated"
    );
    refresh
}

fn write_marker(marker: &Path, version: &str) -> io::Result<()> {
    if let Some(parent) = marker.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(marker, version)
}
