use std::fs;
use std::io;
use std::path::Path;

/// Best-effort recursive chmod for staged trees that were unpacked read-only.
#[cfg(unix)]
pub(crate) fn make_writable_recursive(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let Ok(meta) = fs::symlink_metadata(path) else {
        return;
    };
    if meta.file_type().is_symlink() {
        return;
    }
    let mode = if meta.is_dir() { 0o755 } else { 0o644 };
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode));
    if meta.is_dir() {
        if let Ok(entries) = fs::read_dir(path) {
            for entry in entries.flatten() {
                make_writable_recursive(&entry.path());
            }
        }
    }
}

#[cfg(not(unix))]
pub(crate) fn make_writable_recursive(path: &Path) {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return;
    };
    if meta.file_type().is_symlink() {
        return;
    }
    let mut perms = meta.permissions();
    if perms.readonly() {
        perms.set_readonly(false);
        let _ = fs::set_permissions(path, perms);
    }
    if meta.is_dir() {
        if let Ok(entries) = fs::read_dir(path) {
            for entry in entries.flatten() {
                make_writable_recursive(&entry.path());
            }
        }
    }
}

/// Remove a file, symlink or directory tree. Symlinks are unlinked, never followed.
pub(crate) fn remove_path(path: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    let file_type = meta.file_type();
    if file_type.is_symlink() || !file_type.is_dir() {
        return match fs::remove_file(path) {
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                make_writable_recursive(path);
                fs::remove_file(path)
            }
            other => other,
        };
    }
    make_writable_recursive(path);
    match fs::remove_dir_all(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_read_only_trees() {
        let root = tempfile::tempdir().expect("root tempdir");
        let nested = root.path().join("plugins").join("core");
        fs::create_dir_all(&nested).expect("nested dir");
        let file = nested.join("plugin.xml");
        fs::write(&file, b"<plugin/>").expect("write file");
        let mut perms = fs::metadata(&file).expect("meta").permissions();
        perms.set_readonly(true);
        fs::set_permissions(&file, perms).expect("harden");

        remove_path(&root.path().join("plugins")).expect("remove");
        assert!(!root.path().join("plugins").exists());
    }

    #[test]
    fn missing_path_is_not_an_error() {
        let root = tempfile::tempdir().expect("root tempdir");
        remove_path(&root.path().join("absent")).expect("noop");
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_unlinked_not_followed() {
        let root = tempfile::tempdir().expect("root tempdir");
        let target = root.path().join("target");
        fs::create_dir_all(&target).expect("target");
        fs::write(target.join("keep.txt"), b"keep").expect("write");
        let link = root.path().join("link");
        std::os::unix::fs::symlink(&target, &link).expect("symlink");

        remove_path(&link).expect("remove link");
        assert!(!link.exists());
        assert!(target.join("keep.txt").exists());
    }
}
