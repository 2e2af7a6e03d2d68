//! Free-space queries for the local destination.
//!
//! The destination directory may not exist yet when a job starts, so the
//! query walks up to the nearest existing ancestor and asks about the
//! filesystem that will receive the data.

use std::io;
use std::path::Path;

/// Bytes available to an unprivileged user on the filesystem holding `path`.
///
/// Returns [`io::ErrorKind::Unsupported`] on platforms without `statvfs`.
pub fn available_space(path: &Path) -> io::Result<u64> {
    let existing = nearest_existing(path).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no existing ancestor for {}", path.display()),
        )
    })?;
    platform::available_space(existing)
}

fn nearest_existing(path: &Path) -> Option<&Path> {
    let mut candidate = Some(path);
    while let Some(p) = candidate {
        if p.as_os_str().is_empty() {
            return Some(Path::new("."));
        }
        if p.exists() {
            return Some(p);
        }
        candidate = p.parent();
    }
    None
}

#[cfg(unix)]
mod platform {
    use std::ffi::CString;
    use std::io;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    pub fn available_space(path: &Path) -> io::Result<u64> {
        let path_cstr = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let result = unsafe { libc::statvfs(path_cstr.as_ptr(), &mut stat) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }

        #[allow(clippy::unnecessary_cast)]
        Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
    }
}

#[cfg(not(unix))]
mod platform {
    use std::io;
    use std::path::Path;

    pub fn available_space(_path: &Path) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "free-space query not supported on this platform",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    #[test]
    fn test_available_space_on_missing_child() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("not").join("yet").join("created");
        let here = available_space(dir.path()).unwrap();
        let there = available_space(&missing).unwrap();
        assert!(here > 0);
        // Same filesystem; allow for concurrent writers elsewhere.
        assert!(there.abs_diff(here) < 1024 * 1024 * 1024);
    }

    #[test]
    fn test_nearest_existing() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("a").join("b");
        assert_eq!(nearest_existing(&missing), Some(dir.path()));
        assert_eq!(nearest_existing(Path::new("relative-missing")), Some(Path::new(".")));
    }
}
