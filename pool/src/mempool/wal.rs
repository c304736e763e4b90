//! Append-only audit log of accepted transactions.
//!
//! One record per accepted transaction: the raw bytes followed by a newline.
//! The log is an audit trail, not a recovery journal; nothing ever reads
//! it back at startup. Append failures propagate to the submitter before
//! the fingerprint is cached, so a retry after an I/O failure is legal.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

/// File name inside the WAL directory.
const WAL_FILE: &str = "wal";

/// Directory permission bits. The log contains raw client transactions.
#[cfg(unix)]
const WAL_DIR_MODE: u32 = 0o700;

/// Line-delimited append-only sink of accepted transaction bytes.
pub struct WriteAheadLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl WriteAheadLog {
    /// Ensures `dir` exists with owner-only permissions and opens
    /// `<dir>/wal` for appending.
    pub fn open(dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(WAL_DIR_MODE))?;
        }
        let path = dir.join(WAL_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Appends one record: the transaction bytes plus a trailing newline.
    pub fn write(&self, tx: &[u8]) -> std::io::Result<()> {
        let mut file = self.file.lock();
        file.write_all(tx)?;
        file.write_all(b"\n")
    }

    /// Flushes buffered state down to the OS.
    pub fn close(&self) -> std::io::Result<()> {
        self.file.lock().sync_all()
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_newline_delimited_records() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path()).unwrap();
        wal.write(b"first").unwrap();
        wal.write(b"second").unwrap();
        wal.close().unwrap();

        let contents = std::fs::read(wal.path()).unwrap();
        assert_eq!(contents, b"first\nsecond\n");
    }

    #[test]
    fn reopen_appends_rather_than_truncates() {
        let dir = tempfile::tempdir().unwrap();
        {
            let wal = WriteAheadLog::open(dir.path()).unwrap();
            wal.write(b"one").unwrap();
            wal.close().unwrap();
        }
        let wal = WriteAheadLog::open(dir.path()).unwrap();
        wal.write(b"two").unwrap();
        wal.close().unwrap();

        let contents = std::fs::read(wal.path()).unwrap();
        assert_eq!(contents, b"one\ntwo\n");
    }

    #[cfg(unix)]
    #[test]
    fn directory_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("mempool");
        let _wal = WriteAheadLog::open(&dir).unwrap();
        let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
