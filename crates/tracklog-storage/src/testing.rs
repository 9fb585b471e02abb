//! A storage wrapper whose log handles can be made to fail on demand.

use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use tracklog_core::fs::{FileMeta, MemStorage, Storage};

/// Bytes the next writes may still accept; `None` means unlimited.
type Budget = Arc<Mutex<Option<usize>>>;

#[derive(Clone, Default)]
pub struct FlakyStorage {
    inner: MemStorage,
    budget: Budget,
}

impl FlakyStorage {
    pub fn new(inner: MemStorage) -> Self {
        Self {
            inner,
            budget: Budget::default(),
        }
    }

    /// Accept `bytes` more bytes across all open handles, then fail.
    pub fn fail_after(&self, bytes: usize) {
        *self.budget.lock().unwrap_or_else(PoisonError::into_inner) = Some(bytes);
    }

    pub fn fail_now(&self) {
        self.fail_after(0);
    }

    pub fn heal(&self) {
        *self.budget.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

struct FlakyFile {
    inner: Box<dyn Write + Send>,
    budget: Budget,
}

impl Write for FlakyFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut budget = self.budget.lock().unwrap_or_else(PoisonError::into_inner);
        match *budget {
            None => self.inner.write(buf),
            Some(0) => Err(io::Error::new(io::ErrorKind::Other, "device unavailable")),
            Some(left) => {
                let n = self.inner.write(&buf[..left.min(buf.len())])?;
                *budget = Some(left - n);
                Ok(n)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Storage for FlakyStorage {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.inner.create_dir_all(path)
    }

    fn open_append(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(FlakyFile {
            inner: self.inner.open_append(path)?,
            budget: Arc::clone(&self.budget),
        }))
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        self.inner.write_file(path, contents)
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.inner.read_file(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.inner.rename(from, to)
    }

    fn stat(&self, path: &Path) -> io::Result<FileMeta> {
        self.inner.stat(path)
    }
}
