//! Plain synchronous file access shared by every backend.
//!
//! The final path component is opened without following links, so a path
//! checked by the broker cannot be swapped for a link to somewhere else.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use tracing::debug;

use crate::{FileStore, PlatformError, Result, TextEncoding};

#[cfg(windows)]
const FILE_FLAG_OPEN_REPARSE_POINT: u32 = 0x0020_0000;

fn link_refused(path: &Path) -> PlatformError {
    PlatformError::InvalidArgument(format!(
        "refusing to follow a link at {}",
        path.display()
    ))
}

fn open_no_follow(path: &Path, options: &mut OpenOptions) -> Result<File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(nix::libc::O_NOFOLLOW);
        match options.open(path) {
            Ok(file) => Ok(file),
            Err(err) if err.raw_os_error() == Some(nix::libc::ELOOP) => Err(link_refused(path)),
            Err(err) => Err(err.into()),
        }
    }
    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        options.custom_flags(FILE_FLAG_OPEN_REPARSE_POINT);
        let file = options.open(path)?;
        if file.metadata()?.file_type().is_symlink() {
            return Err(link_refused(path));
        }
        Ok(file)
    }
    #[cfg(not(any(unix, windows)))]
    {
        Ok(options.open(path)?)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileStore;

impl FileStore for StdFileStore {
    fn read_text(&self, path: &Path, encoding: TextEncoding) -> Result<String> {
        let mut file = open_no_follow(path, OpenOptions::new().read(true))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "File read");
        encoding.decode(&bytes)
    }

    fn write_text(&self, path: &Path, content: &str, encoding: TextEncoding) -> Result<u64> {
        let bytes = encoding.encode(content);
        let mut file = open_no_follow(
            path,
            OpenOptions::new().write(true).create(true).truncate(true),
        )?;
        file.write_all(&bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "File written");
        Ok(bytes.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_then_read_utf16() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        let store = StdFileStore;

        let written = store
            .write_text(&path, "hello", TextEncoding::Utf16Le)
            .unwrap();
        assert_eq!(written, 12);
        assert_eq!(
            store.read_text(&path, TextEncoding::Utf16Le).unwrap(),
            "hello"
        );
    }

    #[test]
    fn test_read_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = StdFileStore
            .read_text(&dir.path().join("missing.txt"), TextEncoding::Utf8)
            .unwrap_err();
        assert!(matches!(err, crate::PlatformError::Io(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_links_are_not_followed() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real.txt");
        let link = dir.path().join("link.txt");
        std::fs::write(&real, "secret").unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let err = StdFileStore
            .read_text(&link, TextEncoding::Utf8)
            .unwrap_err();
        assert!(matches!(err, crate::PlatformError::InvalidArgument(_)), "{err}");

        let err = StdFileStore
            .write_text(&link, "overwritten", TextEncoding::Utf8)
            .unwrap_err();
        assert!(matches!(err, crate::PlatformError::InvalidArgument(_)), "{err}");
        assert_eq!(std::fs::read_to_string(&real).unwrap(), "secret");
    }
}
