//! Storage capability used by the checkpoint store and the append log.
//!
//! Writers never touch `std::fs` directly; they receive an `Arc<dyn Storage>`
//! at construction. [`OsStorage`] backs production tracks and [`MemStorage`]
//! backs the `memory` storage kind and tests.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Minimal metadata returned by [`Storage::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub len: u64,
    pub is_dir: bool,
}

/// Narrow filesystem capability: just what the log and checkpoint need.
pub trait Storage: Send + Sync {
    /// Create `path` and all missing parents.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Open `path` for appending, creating it if needed. Parents must exist.
    fn open_append(&self, path: &Path) -> io::Result<Box<dyn Write + Send>>;

    /// Create or truncate `path` and write `contents` to it.
    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Read the whole of `path`.
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Atomically replace `to` with `from`.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Metadata for `path`; `NotFound` if it does not exist.
    fn stat(&self, path: &Path) -> io::Result<FileMeta>;
}

// ─── OS filesystem ───────────────────────────────────────────────────────────

/// The real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsStorage;

impl Storage for OsStorage {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn open_append(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Box::new(file))
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut file = fs::File::create(path)?;
        file.write_all(contents)?;
        file.sync_all()
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn stat(&self, path: &Path) -> io::Result<FileMeta> {
        let meta = fs::metadata(path)?;
        Ok(FileMeta {
            len: meta.len(),
            is_dir: meta.is_dir(),
        })
    }
}

// ─── In-memory filesystem ────────────────────────────────────────────────────

type SharedBytes = Arc<Mutex<Vec<u8>>>;

#[derive(Default)]
struct MemInner {
    files: HashMap<PathBuf, SharedBytes>,
    dirs: HashSet<PathBuf>,
}

/// In-memory filesystem. Cloning shares the same underlying tree.
///
/// All data is lost when the last clone is dropped.
#[derive(Default, Clone)]
pub struct MemStorage {
    inner: Arc<Mutex<MemInner>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{}: no such file or directory", path.display()),
    )
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents of `path` as UTF-8 (lossy), if the file exists.
    pub fn contents(&self, path: &Path) -> Option<String> {
        let inner = lock(&self.inner);
        let bytes = inner.files.get(path)?;
        let text = String::from_utf8_lossy(&lock(bytes)).into_owned();
        Some(text)
    }

    /// All file paths under `prefix`, sorted.
    pub fn files_under(&self, prefix: &Path) -> Vec<PathBuf> {
        let inner = lock(&self.inner);
        let mut out: Vec<_> = inner
            .files
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect();
        out.sort();
        out
    }

    fn parent_exists(inner: &MemInner, path: &Path) -> bool {
        match path.parent() {
            None => true,
            Some(p) if p.as_os_str().is_empty() => true,
            Some(p) => inner.dirs.contains(p),
        }
    }
}

struct MemFile {
    bytes: SharedBytes,
}

impl Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.bytes).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Storage for MemStorage {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut inner = lock(&self.inner);
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            if inner.files.contains_key(ancestor) {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} is a file", ancestor.display()),
                ));
            }
            inner.dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    fn open_append(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        let mut inner = lock(&self.inner);
        if !Self::parent_exists(&inner, path) {
            return Err(not_found(path));
        }
        let bytes = inner.files.entry(path.to_path_buf()).or_default().clone();
        Ok(Box::new(MemFile { bytes }))
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut inner = lock(&self.inner);
        if !Self::parent_exists(&inner, path) {
            return Err(not_found(path));
        }
        inner
            .files
            .insert(path.to_path_buf(), Arc::new(Mutex::new(contents.to_vec())));
        Ok(())
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        let inner = lock(&self.inner);
        let bytes = inner.files.get(path).ok_or_else(|| not_found(path))?;
        let out = lock(bytes).clone();
        Ok(out)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut inner = lock(&self.inner);
        if !Self::parent_exists(&inner, to) {
            return Err(not_found(to));
        }
        let bytes = inner.files.remove(from).ok_or_else(|| not_found(from))?;
        inner.files.insert(to.to_path_buf(), bytes);
        Ok(())
    }

    fn stat(&self, path: &Path) -> io::Result<FileMeta> {
        let inner = lock(&self.inner);
        if let Some(bytes) = inner.files.get(path) {
            return Ok(FileMeta {
                len: lock(bytes).len() as u64,
                is_dir: false,
            });
        }
        if inner.dirs.contains(path) {
            return Ok(FileMeta { len: 0, is_dir: true });
        }
        Err(not_found(path))
    }
}
