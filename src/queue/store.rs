//! Trait abstraction for the queue's backing store to enable testing

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::record::Record;

/// Non-volatile storage holding the newline-delimited queue log
///
/// The queue is the sole owner of its store and never re-enters it.
pub trait QueueStore {
    /// Make the store ready for use (create directories, check access)
    fn mount(&mut self) -> io::Result<()>;

    /// Wipe and re-create the store after a failed mount
    fn reformat(&mut self) -> io::Result<()>;

    /// Read the raw persisted bytes; an absent log reads as empty
    fn read_all(&mut self) -> io::Result<Vec<u8>>;

    /// Append one line followed by `\n`
    ///
    /// On failure nothing of the line may remain in the log.
    fn append(&mut self, line: &str) -> io::Result<()>;

    /// Replace the whole log with exactly `records`, in order
    fn rewrite(&mut self, records: &[Record]) -> io::Result<()>;

    /// Delete the log; deleting an absent log succeeds
    fn remove(&mut self) -> io::Result<()>;

    /// Human-readable location for log messages
    fn location(&self) -> String;
}

/// Queue log kept as a single file on the local filesystem
///
/// Growth is a plain append. Shrinking writes the retained lines to a
/// sibling `.tmp` file, syncs it, then renames it over the log, so a crash
/// mid-rewrite leaves either the old or the new content.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// Make a rename or delete inside the log's directory durable
    #[cfg(unix)]
    fn sync_parent(&self) -> io::Result<()> {
        File::open(self.parent_dir())?.sync_all()
    }

    /// NTFS journals directory metadata; there is no directory fsync to call
    #[cfg(not(unix))]
    fn sync_parent(&self) -> io::Result<()> {
        Ok(())
    }

    fn ensure_parent(&self) -> io::Result<()> {
        fs::create_dir_all(self.parent_dir())
    }
}

impl QueueStore for FileStore {
    fn mount(&mut self) -> io::Result<()> {
        self.ensure_parent()?;

        if self.path.exists() {
            if !self.path.is_file() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{} is not a regular file", self.path.display()),
                ));
            }
            File::open(&self.path)?;
        }

        Ok(())
    }

    fn reformat(&mut self) -> io::Result<()> {
        if self.path.is_dir() {
            fs::remove_dir_all(&self.path)?;
        } else if self.path.exists() {
            fs::remove_file(&self.path)?;
        }

        let temp = self.temp_path();
        if temp.exists() {
            fs::remove_file(&temp)?;
        }

        self.ensure_parent()
    }

    fn read_all(&mut self) -> io::Result<Vec<u8>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn append(&mut self, line: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let prior_len = file.metadata()?.len();

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');

        let result = file.write_all(&buf).and_then(|_| file.sync_data());
        if result.is_err() {
            // Roll back a partial write so the next append starts on a line boundary
            if let Err(e) = file.set_len(prior_len).and_then(|_| file.sync_data()) {
                warn!(
                    "Rollback of failed append to {} failed ({}); a torn line may remain",
                    self.path.display(),
                    e
                );
            }
        }
        result
    }

    fn rewrite(&mut self, records: &[Record]) -> io::Result<()> {
        if records.is_empty() {
            return self.remove();
        }

        let temp = self.temp_path();
        {
            let mut file = File::create(&temp)?;
            let mut buf = Vec::new();
            for record in records {
                buf.extend_from_slice(record.as_str().as_bytes());
                buf.push(b'\n');
            }
            file.write_all(&buf)?;
            file.sync_all()?;
        }

        fs::rename(&temp, &self.path)?;
        self.sync_parent()
    }

    fn remove(&mut self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => self.sync_parent(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// In-memory store with switchable failures
    ///
    /// Clones share state, so a test can keep a handle while the queue owns
    /// another and can "restart" by building a fresh queue over a clone.
    #[derive(Clone, Default)]
    pub struct MockStore {
        pub data: Arc<Mutex<Vec<u8>>>,
        pub mount_failures: Arc<Mutex<usize>>,
        pub reformat_count: Arc<Mutex<usize>>,
        pub fail_append: Arc<Mutex<bool>>,
        pub fail_rewrite: Arc<Mutex<bool>>,
        pub fail_remove: Arc<Mutex<bool>>,
        pub rewrite_count: Arc<Mutex<usize>>,
    }

    impl MockStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_bytes(bytes: &[u8]) -> Self {
            let store = Self::new();
            *store.data.lock().unwrap() = bytes.to_vec();
            store
        }

        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.data.lock().unwrap()).into_owned()
        }

        pub fn set_mount_failures(&self, failures: usize) {
            *self.mount_failures.lock().unwrap() = failures;
        }

        pub fn set_fail_append(&self, fail: bool) {
            *self.fail_append.lock().unwrap() = fail;
        }

        pub fn set_fail_rewrite(&self, fail: bool) {
            *self.fail_rewrite.lock().unwrap() = fail;
        }

        pub fn set_fail_remove(&self, fail: bool) {
            *self.fail_remove.lock().unwrap() = fail;
        }

        pub fn reformats(&self) -> usize {
            *self.reformat_count.lock().unwrap()
        }

        pub fn rewrites(&self) -> usize {
            *self.rewrite_count.lock().unwrap()
        }
    }

    impl QueueStore for MockStore {
        fn mount(&mut self) -> io::Result<()> {
            let mut failures = self.mount_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(io::Error::new(io::ErrorKind::Other, "Mock mount error"));
            }
            Ok(())
        }

        fn reformat(&mut self) -> io::Result<()> {
            *self.reformat_count.lock().unwrap() += 1;
            self.data.lock().unwrap().clear();
            Ok(())
        }

        fn read_all(&mut self) -> io::Result<Vec<u8>> {
            Ok(self.data.lock().unwrap().clone())
        }

        fn append(&mut self, line: &str) -> io::Result<()> {
            if *self.fail_append.lock().unwrap() {
                return Err(io::Error::new(io::ErrorKind::Other, "Mock append error"));
            }
            let mut data = self.data.lock().unwrap();
            data.extend_from_slice(line.as_bytes());
            data.push(b'\n');
            Ok(())
        }

        fn rewrite(&mut self, records: &[Record]) -> io::Result<()> {
            if *self.fail_rewrite.lock().unwrap() {
                return Err(io::Error::new(io::ErrorKind::Other, "Mock rewrite error"));
            }
            *self.rewrite_count.lock().unwrap() += 1;
            let mut data = self.data.lock().unwrap();
            data.clear();
            for record in records {
                data.extend_from_slice(record.as_str().as_bytes());
                data.push(b'\n');
            }
            Ok(())
        }

        fn remove(&mut self) -> io::Result<()> {
            if *self.fail_remove.lock().unwrap() {
                return Err(io::Error::new(io::ErrorKind::Other, "Mock remove error"));
            }
            self.data.lock().unwrap().clear();
            Ok(())
        }

        fn location(&self) -> String {
            "memory".to_string()
        }
    }
}
