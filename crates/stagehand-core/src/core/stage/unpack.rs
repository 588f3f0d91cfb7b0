//! Background extraction of downloaded archives into the staging directory.
//!
//! Archives are queued over a channel and extracted one at a time, in queue order, on a
//! single worker thread while the producer keeps downloading. Extraction merges: an entry
//! whose destination already exists is skipped rather than overwritten, so the first
//! archive to provide a path wins. Any failure stops the worker; the error is returned
//! from [`UnpackWorker::finish`] and the staged tree must not be launched.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use serde::Serialize;
use stagehand_store::CancelToken;
use tracing::{debug, error, info};
use zip::result::ZipError;
use zip::ZipArchive;

use super::layout::WORKSPACE_DIR;
use crate::fs::remove_path;

const CHUNK_SIZE: usize = 32 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("failed to start unpack worker: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed to clean staging directory {}: {source}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("temporary archive {} couldn't be opened: {source}", archive.display())]
    Open {
        archive: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("temporary archive {} couldn't be extracted: {source}", archive.display())]
    Corrupt {
        archive: PathBuf,
        #[source]
        source: ZipError,
    },
    #[error("archive {} contains unsafe entry `{entry}`", archive.display())]
    UnsafeEntry { archive: PathBuf, entry: String },
    #[error("couldn't create directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("couldn't read `{entry}` from {}: {source}", archive.display())]
    Read {
        archive: PathBuf,
        entry: String,
        #[source]
        source: io::Error,
    },
    #[error("couldn't write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unpack worker stopped before {} could be queued", archive.display())]
    WorkerStopped { archive: PathBuf },
    #[error("unpack worker panicked")]
    WorkerPanicked,
}

/// Totals accumulated by the worker across every archive it consumed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnpackReport {
    pub cleaned: bool,
    pub archives: usize,
    pub files_written: usize,
    pub dirs_created: usize,
    pub entries_skipped: usize,
}

/// Handle to the unpack thread. Dropping the handle without [`finish`](Self::finish)
/// detaches the worker; it still drains whatever was queued.
pub struct UnpackWorker {
    sender: Sender<PathBuf>,
    handle: JoinHandle<Result<UnpackReport, ExtractionError>>,
}

impl UnpackWorker {
    /// Starts the worker. With `clean_up` set, the worker first empties `dest` (keeping the
    /// workspace directory) before it consumes any job.
    ///
    /// # Errors
    /// Returns an error when the thread cannot be spawned.
    pub fn spawn(dest: impl Into<PathBuf>, clean_up: bool) -> Result<Self, ExtractionError> {
        Self::spawn_with_abort(dest, clean_up, CancelToken::new())
    }

    /// Like [`spawn`](Self::spawn), but trips `abort` as soon as extraction fails so a
    /// producer polling it stops downloading without waiting for the next enqueue.
    ///
    /// # Errors
    /// Returns an error when the thread cannot be spawned.
    pub fn spawn_with_abort(
        dest: impl Into<PathBuf>,
        clean_up: bool,
        abort: CancelToken,
    ) -> Result<Self, ExtractionError> {
        let dest = dest.into();
        let (sender, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("stagehand-unpack".into())
            .spawn(move || {
                let result = run_worker(&dest, clean_up, &receiver);
                if result.is_err() {
                    abort.cancel();
                }
                result
            })
            .map_err(ExtractionError::Spawn)?;
        Ok(Self { sender, handle })
    }

    /// Queues an archive for extraction. Never blocks.
    ///
    /// # Errors
    /// Returns [`ExtractionError::WorkerStopped`] when the worker already gave up after a
    /// fatal error; call [`finish`](Self::finish) to obtain that error.
    pub fn enqueue(&self, archive: PathBuf) -> Result<(), ExtractionError> {
        debug!(archive = %archive.display(), "queued for unpack");
        self.sender
            .send(archive)
            .map_err(|err| ExtractionError::WorkerStopped { archive: err.0 })
    }

    /// Signals that no more archives follow and blocks until every queued archive has been
    /// extracted and the worker exited.
    ///
    /// # Errors
    /// Returns the first extraction failure, or [`ExtractionError::WorkerPanicked`].
    pub fn finish(self) -> Result<UnpackReport, ExtractionError> {
        let Self { sender, handle } = self;
        drop(sender);
        handle.join().map_err(|_| ExtractionError::WorkerPanicked)?
    }
}

fn run_worker(
    dest: &Path,
    clean_up: bool,
    jobs: &Receiver<PathBuf>,
) -> Result<UnpackReport, ExtractionError> {
    let mut report = UnpackReport::default();
    if clean_up {
        clean_staging_dir(dest)?;
        report.cleaned = true;
    }
    create_verified_dir(dest)?;

    while let Ok(archive) = jobs.recv() {
        if let Err(err) = extract_archive(&archive, dest, &mut report) {
            error!(archive = %archive.display(), error = %err, "extraction failed");
            return Err(err);
        }
        report.archives += 1;
    }
    info!(
        archives = report.archives,
        files = report.files_written,
        skipped = report.entries_skipped,
        "unpack finished"
    );
    Ok(report)
}

/// Deletes every entry under `dest` except the workspace directory.
///
/// # Errors
/// Returns an error when an entry cannot be listed or removed.
pub fn clean_staging_dir(dest: &Path) -> Result<usize, ExtractionError> {
    let cleanup_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ExtractionError::Cleanup { path, source }
    };
    let entries = match fs::read_dir(dest) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(cleanup_err(dest)(err)),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(cleanup_err(dest))?;
        if entry.file_name().to_str() == Some(WORKSPACE_DIR) {
            continue;
        }
        let path = entry.path();
        remove_path(&path).map_err(cleanup_err(&path))?;
        removed += 1;
    }
    info!(dest = %dest.display(), removed, "cleaned staging directory");
    Ok(removed)
}

/// Extracts one archive into `dest`, skipping entries that already exist there.
///
/// # Errors
/// Returns an error for unreadable or corrupt archives, unsafe entry names and any
/// failure to create directories or write files.
pub fn extract_archive(
    archive: &Path,
    dest: &Path,
    report: &mut UnpackReport,
) -> Result<(), ExtractionError> {
    debug!(archive = %archive.display(), dest = %dest.display(), "unpacking");
    let corrupt = |source| ExtractionError::Corrupt {
        archive: archive.to_path_buf(),
        source,
    };
    let file = File::open(archive).map_err(|source| ExtractionError::Open {
        archive: archive.to_path_buf(),
        source,
    })?;
    let mut zip = ZipArchive::new(file).map_err(corrupt)?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(corrupt)?;
        let name = entry.name().to_string();
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(ExtractionError::UnsafeEntry {
                archive: archive.to_path_buf(),
                entry: name,
            });
        };
        let target = dest.join(&relative);

        if fs::symlink_metadata(&target).is_ok() {
            report.entries_skipped += 1;
            continue;
        }

        if entry.is_dir() {
            create_verified_dir(&target)?;
            report.dirs_created += 1;
            continue;
        }

        if let Some(parent) = target.parent() {
            create_verified_dir(parent)?;
        }
        if let Err(err) = copy_entry(&mut entry, archive, &name, &target) {
            let _ = fs::remove_file(&target);
            return Err(err);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&target, fs::Permissions::from_mode(mode)).map_err(
                    |source| ExtractionError::Write {
                        path: target.clone(),
                        source,
                    },
                )?;
            }
        }
        report.files_written += 1;
    }
    Ok(())
}

fn copy_entry(
    entry: &mut impl Read,
    archive: &Path,
    name: &str,
    target: &Path,
) -> Result<(), ExtractionError> {
    let write_err = |source| ExtractionError::Write {
        path: target.to_path_buf(),
        source,
    };
    let mut out = File::create(target).map_err(write_err)?;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = match entry.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(ExtractionError::Read {
                    archive: archive.to_path_buf(),
                    entry: name.to_string(),
                    source,
                })
            }
        };
        out.write_all(&buffer[..read]).map_err(write_err)?;
    }
    out.flush().map_err(write_err)
}

fn create_verified_dir(path: &Path) -> Result<(), ExtractionError> {
    let dir_err = |source| ExtractionError::Directory {
        path: path.to_path_buf(),
        source,
    };
    fs::create_dir_all(path).map_err(dir_err)?;
    if path.is_dir() {
        Ok(())
    } else {
        Err(dir_err(io::Error::new(
            io::ErrorKind::Other,
            "path exists but is not a directory",
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zip::write::FileOptions;

    enum Entry<'a> {
        Dir(&'a str),
        File(&'a str, &'a [u8]),
    }

    fn write_zip(path: &Path, entries: &[Entry<'_>]) {
        let file = File::create(path).expect("create zip");
        let mut writer = zip::ZipWriter::new(file);
        let options = FileOptions::default();
        for entry in entries {
            match entry {
                Entry::Dir(name) => writer.add_directory(*name, options).expect("dir entry"),
                Entry::File(name, body) => {
                    writer.start_file(*name, options).expect("file entry");
                    writer.write_all(body).expect("file body");
                }
            }
        }
        writer.finish().expect("finish zip");
    }

    #[test]
    fn finish_waits_for_every_queued_archive() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("unpacked");
        let first = temp.path().join("core.zip");
        let second = temp.path().join("ui.zip");
        write_zip(
            &first,
            &[
                Entry::Dir("plugins/"),
                Entry::File("plugins/core.jar", b"core"),
                Entry::File("launcher.jar", b"launcher"),
            ],
        );
        write_zip(
            &second,
            &[Entry::File("plugins/ui/ui.jar", b"ui"), Entry::File("config.ini", b"ini")],
        );

        let worker = UnpackWorker::spawn(&dest, false).expect("spawn");
        worker.enqueue(first).expect("enqueue core");
        worker.enqueue(second).expect("enqueue ui");
        let report = worker.finish().expect("finish");

        assert_eq!(report.archives, 2);
        assert_eq!(report.files_written, 4);
        for path in ["plugins/core.jar", "launcher.jar", "plugins/ui/ui.jar", "config.ini"] {
            assert!(dest.join(path).is_file(), "{path} missing after finish");
        }
    }

    #[test]
    fn overlapping_entries_keep_first_archive_version() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("unpacked");
        let first = temp.path().join("first.zip");
        let second = temp.path().join("second.zip");
        write_zip(&first, &[Entry::File("shared/P.txt", b"from first")]);
        write_zip(
            &second,
            &[Entry::File("shared/P.txt", b"from second"), Entry::File("extra.txt", b"x")],
        );

        let worker = UnpackWorker::spawn(&dest, false).expect("spawn");
        worker.enqueue(first).expect("enqueue");
        worker.enqueue(second).expect("enqueue");
        let report = worker.finish().expect("finish");

        assert_eq!(
            fs::read_to_string(dest.join("shared/P.txt")).expect("read P"),
            "from first"
        );
        assert!(dest.join("extra.txt").is_file());
        assert_eq!(report.entries_skipped, 1);
    }

    #[test]
    fn cleanup_preserves_workspace() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("unpacked");
        fs::create_dir_all(dest.join("workspace")).expect("workspace");
        fs::create_dir_all(dest.join("B")).expect("dir B");
        fs::write(dest.join("A"), b"a").expect("file A");
        fs::write(dest.join("B").join("nested.txt"), b"b").expect("nested");
        fs::write(dest.join("workspace").join("config.txt"), b"user settings").expect("config");

        let report = UnpackWorker::spawn(&dest, true)
            .expect("spawn")
            .finish()
            .expect("finish");

        assert!(report.cleaned);
        assert!(!dest.join("A").exists());
        assert!(!dest.join("B").exists());
        assert_eq!(
            fs::read_to_string(dest.join("workspace").join("config.txt")).expect("config"),
            "user settings"
        );
    }

    #[test]
    fn cleanup_runs_before_queued_archives() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("unpacked");
        fs::create_dir_all(&dest).expect("dest");
        fs::write(dest.join("launcher.jar"), b"stale").expect("stale");
        let archive = temp.path().join("core.zip");
        write_zip(&archive, &[Entry::File("launcher.jar", b"fresh")]);

        let worker = UnpackWorker::spawn(&dest, true).expect("spawn");
        worker.enqueue(archive).expect("enqueue");
        worker.finish().expect("finish");

        assert_eq!(
            fs::read_to_string(dest.join("launcher.jar")).expect("read"),
            "fresh"
        );
    }

    #[test]
    fn finish_on_empty_queue_returns_immediately() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("unpacked");
        let report = UnpackWorker::spawn(&dest, false)
            .expect("spawn")
            .finish()
            .expect("finish");
        assert_eq!(report, UnpackReport::default());
        assert!(dest.is_dir());
    }

    #[test]
    fn corrupt_archive_is_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("unpacked");
        let bogus = temp.path().join("bogus.zip");
        fs::write(&bogus, b"definitely not a zip").expect("bogus");

        let worker = UnpackWorker::spawn(&dest, false).expect("spawn");
        worker.enqueue(bogus).expect("enqueue");
        let err = worker.finish().expect_err("corrupt");
        assert!(matches!(err, ExtractionError::Corrupt { .. }));
    }

    #[test]
    fn fatal_error_trips_abort_token() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("unpacked");
        let bogus = temp.path().join("bogus.zip");
        fs::write(&bogus, b"not an archive").expect("bogus");
        let abort = CancelToken::new();

        let worker = UnpackWorker::spawn_with_abort(&dest, false, abort.clone()).expect("spawn");
        worker.enqueue(bogus).expect("enqueue");
        assert!(worker.finish().is_err());
        assert!(abort.is_cancelled());
    }

    #[test]
    fn clean_run_leaves_abort_token_alone() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("unpacked");
        let good = temp.path().join("good.zip");
        write_zip(&good, &[Entry::File("good.txt", b"ok")]);
        let abort = CancelToken::new();

        let worker = UnpackWorker::spawn_with_abort(&dest, false, abort.clone()).expect("spawn");
        worker.enqueue(good).expect("enqueue");
        worker.finish().expect("finish");
        assert!(!abort.is_cancelled());
    }

    #[test]
    fn escaping_entry_names_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("unpacked");
        fs::create_dir_all(&dest).expect("dest");
        let archive = temp.path().join("evil.zip");
        write_zip(&archive, &[Entry::File("../escaped.txt", b"nope")]);

        let err = extract_archive(&archive, &dest, &mut UnpackReport::default())
            .expect_err("unsafe entry");
        assert!(matches!(err, ExtractionError::UnsafeEntry { .. }));
        assert!(!temp.path().join("escaped.txt").exists());
    }

    #[test]
    fn file_blocking_a_directory_is_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("unpacked");
        fs::create_dir_all(&dest).expect("dest");
        fs::write(dest.join("plugins"), b"a file where a dir belongs").expect("blocker");
        let archive = temp.path().join("core.zip");
        write_zip(&archive, &[Entry::File("plugins/core/core.jar", b"core")]);

        let err = extract_archive(&archive, &dest, &mut UnpackReport::default())
            .expect_err("dir conflict");
        assert!(matches!(err, ExtractionError::Directory { .. }));
    }

    #[test]
    fn later_jobs_are_refused_after_a_fatal_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("unpacked");
        let bogus = temp.path().join("bogus.zip");
        fs::write(&bogus, b"garbage").expect("bogus");
        let good = temp.path().join("good.zip");
        write_zip(&good, &[Entry::File("good.txt", b"ok")]);

        let worker = UnpackWorker::spawn(&dest, false).expect("spawn");
        worker.enqueue(bogus).expect("enqueue");
        // The worker may or may not have died yet; either way the good archive is never
        // extracted after the failure.
        let _ = worker.enqueue(good);
        assert!(worker.finish().is_err());
        assert!(!dest.join("good.txt").exists());
    }
}
