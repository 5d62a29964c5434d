//! Whole-file replacement: write a sibling temp file, fsync it, rename it over
//! the target, then fsync the directory.
//!
//! [`lock_exclusive`] takes an `fs2` lock on a `.lock` sidecar. The store holds
//! it across reload, change and replace, so handles in different processes
//! sharing one snapshot file never overwrite each other's updates.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "store.json".into());
    name.push(suffix);
    path.with_file_name(name)
}

/// Block until this process holds the exclusive lock for `path`. The lock is
/// released when the returned file is dropped.
pub fn lock_exclusive(path: &Path) -> io::Result<File> {
    let lock_file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(sidecar(path, ".lock"))?;
    lock_file.lock_exclusive()?;
    Ok(lock_file)
}

/// Atomically replace `path` with `content`. Blocking; call from
/// `spawn_blocking` inside async code. Callers coordinating with other
/// writers hold [`lock_exclusive`] around it.
pub fn replace_file(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut counter = 0u32;
    let tmp_path = loop {
        let candidate = sidecar(path, &format!(".tmp-{}-{}", std::process::id(), counter));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut tmp) => {
                let written = tmp
                    .write_all(content)
                    .and_then(|_| tmp.flush())
                    .and_then(|_| tmp.sync_all());
                if let Err(e) = written {
                    let _ = fs::remove_file(&candidate);
                    return Err(e);
                }
                break candidate;
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                counter = counter.saturating_add(1);
            }
            Err(e) => return Err(e),
        }
    };

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    // Persist the rename itself (best-effort; not supported everywhere).
    if let Ok(dir_file) = File::open(&dir) {
        let _ = dir_file.sync_all();
    }

    Ok(())
}

/// Move an unreadable snapshot aside so the next write does not destroy it.
pub fn quarantine(path: &Path, stamp: &str) -> io::Result<PathBuf> {
    let target = sidecar(path, &format!(".corrupt-{}", stamp));
    fs::rename(path, &target)?;
    Ok(target)
}
