//! Rotating JSONL append log.
//!
//! Layout: `{base}/{track}/{epoch}/{YYYY-MM-DD-HH}.jsonl`, one JSON object per
//! line. The file rotates when the UTC hour or the epoch changes; the old file
//! is flushed and closed before the next one opens.
//!
//! Lines are buffered in memory and leave the buffer only once the storage
//! has accepted them. A failed write keeps the unwritten bytes and drops the
//! handle; the next flush reopens the same file and resumes where it stopped.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use tracklog_core::config::WriterTuning;
use tracklog_core::error::StoreError;
use tracklog_core::fs::Storage;
use tracklog_core::types::Event;

/// Size of the in-memory buffer in front of each log file.
pub const BUFFER_SIZE: usize = 64 * 1024;

/// Source of wall-clock time for hour partitioning.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Hour partition name for `at`, e.g. `2024-03-09-17`.
pub fn hour_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d-%H").to_string()
}

/// Path of the log file for `(track, epoch, hour)` under `base`.
pub fn log_path(base: &Path, track_id: &str, epoch: i64, hour: &str) -> PathBuf {
    base.join(track_id)
        .join(epoch.to_string())
        .join(format!("{hour}.jsonl"))
}

struct OpenFile {
    path: PathBuf,
    hour: String,
    epoch: i64,
    /// `None` after a failed write; reopened on the next flush.
    out: Option<Box<dyn Write + Send>>,
}

/// Buffered, rotating writer for one track's event log.
pub struct JsonlWriter {
    storage: Arc<dyn Storage>,
    base: PathBuf,
    track_id: String,
    flush_size: usize,
    flush_interval: Duration,
    clock: Clock,
    epoch: i64,
    current: Option<OpenFile>,
    buf: Vec<u8>,
    pending: usize,
    last_flush: Instant,
}

impl JsonlWriter {
    pub fn new(storage: Arc<dyn Storage>, base: impl Into<PathBuf>, track_id: impl Into<String>) -> Self {
        let tuning = WriterTuning::default();
        Self {
            storage,
            base: base.into(),
            track_id: track_id.into(),
            flush_size: tuning.flush_size,
            flush_interval: tuning.flush_interval(),
            clock: Arc::new(Utc::now),
            epoch: 0,
            current: None,
            buf: Vec::with_capacity(BUFFER_SIZE),
            pending: 0,
            last_flush: Instant::now(),
        }
    }

    /// Apply flush thresholds from config. A zero `flush_size` flushes every write.
    pub fn with_tuning(mut self, tuning: &WriterTuning) -> Self {
        self.flush_size = tuning.flush_size.max(1);
        self.flush_interval = tuning.flush_interval();
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// The epoch new lines are written under.
    pub fn epoch(&self) -> i64 {
        self.epoch
    }

    /// Path of the currently open file, if any.
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|f| f.path.as_path())
    }

    /// Events written since the last flush.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Bytes accepted but not yet handed to storage.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Switch epochs, closing the open file eagerly so no line lands in the
    /// previous epoch's directory.
    pub fn set_epoch(&mut self, epoch: i64) -> Result<(), StoreError> {
        if epoch == self.epoch {
            return Ok(());
        }
        self.close_current()?;
        self.epoch = epoch;
        Ok(())
    }

    /// Validate and append one event.
    pub fn write(&mut self, event: &Event) -> Result<(), StoreError> {
        event.validate()?;
        if event.epoch != self.epoch {
            self.set_epoch(event.epoch)?;
        }
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        self.append(&line, 1)
    }

    /// Append pre-serialized, newline-terminated lines for `events` events
    /// under the current epoch.
    ///
    /// Once the file is open the lines are kept even if pushing them to
    /// storage fails; the error is returned and a later flush retries them.
    pub fn append(&mut self, lines: &[u8], events: usize) -> Result<(), StoreError> {
        if events == 0 {
            return Ok(());
        }
        self.ensure_file()?;
        self.buf.extend_from_slice(lines);
        self.pending += events;
        if self.buf.len() >= BUFFER_SIZE {
            self.write_buffer("append")?;
        }
        self.maybe_flush()
    }

    /// Push buffered lines to storage.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.write_buffer("flush")?;
        if let Some(file) = self.current.as_mut() {
            if let Some(Err(e)) = file.out.as_mut().map(|out| out.flush()) {
                file.out = None;
                return Err(StoreError::io("flush", &file.path, e));
            }
        }
        self.pending = 0;
        self.last_flush = Instant::now();
        Ok(())
    }

    /// Flush and release the open file. Safe when nothing is open.
    pub fn close(&mut self) -> Result<(), StoreError> {
        self.close_current()
    }

    fn maybe_flush(&mut self) -> Result<(), StoreError> {
        if self.pending >= self.flush_size || self.last_flush.elapsed() >= self.flush_interval {
            self.flush()?;
        }
        Ok(())
    }

    /// Hand the buffer to the open file, keeping whatever it did not accept.
    fn write_buffer(&mut self, op: &'static str) -> Result<(), StoreError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let Some(file) = self.current.as_mut() else {
            return Ok(());
        };
        let handle = match file.out.take() {
            Some(out) => out,
            None => {
                let handle = self
                    .storage
                    .open_append(&file.path)
                    .map_err(|e| StoreError::io("reopen", &file.path, e))?;
                tracing::debug!(track = %self.track_id, path = %file.path.display(), "reopened log file");
                handle
            }
        };
        let out = file.out.insert(handle);

        let mut written = 0;
        let result = loop {
            if written == self.buf.len() {
                break Ok(());
            }
            match out.write(&self.buf[written..]) {
                Ok(0) => break Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => break Err(e),
            }
        };
        self.buf.drain(..written);

        if let Err(e) = result {
            file.out = None;
            tracing::warn!(
                track = %self.track_id,
                path = %file.path.display(),
                retained = self.buf.len(),
                error = %e,
                "log write failed, keeping unwritten lines"
            );
            return Err(StoreError::io(op, &file.path, e));
        }
        Ok(())
    }

    fn ensure_file(&mut self) -> Result<(), StoreError> {
        let hour = hour_key((self.clock)());
        if let Some(file) = &self.current {
            if file.hour == hour && file.epoch == self.epoch {
                return Ok(());
            }
            tracing::info!(
                track = %self.track_id,
                from = %file.path.display(),
                hour = %hour,
                epoch = self.epoch,
                "rotating log file"
            );
            self.close_current()?;
        }

        let path = log_path(&self.base, &self.track_id, self.epoch, &hour);
        if let Some(dir) = path.parent() {
            self.storage
                .create_dir_all(dir)
                .map_err(|e| StoreError::io("create dir", dir, e))?;
        }
        let mut handle = self
            .storage
            .open_append(&path)
            .map_err(|e| StoreError::io("open", &path, e))?;
        self.seal_partial_line(&path, &mut handle)?;
        tracing::debug!(track = %self.track_id, path = %path.display(), "opened log file");

        self.current = Some(OpenFile {
            path,
            hour,
            epoch: self.epoch,
            out: Some(handle),
        });
        Ok(())
    }

    /// Terminate a half-written last line left by an earlier process so the
    /// next line starts on its own.
    fn seal_partial_line(&self, path: &Path, out: &mut Box<dyn Write + Send>) -> Result<(), StoreError> {
        let len = self
            .storage
            .stat(path)
            .map_err(|e| StoreError::io("stat", path, e))?
            .len;
        if len == 0 {
            return Ok(());
        }
        let existing = self
            .storage
            .read_file(path)
            .map_err(|e| StoreError::io("read", path, e))?;
        if existing.last() == Some(&b'\n') {
            return Ok(());
        }
        tracing::warn!(track = %self.track_id, path = %path.display(), "sealing partial line");
        out.write_all(b"\n")
            .and_then(|()| out.flush())
            .map_err(|e| StoreError::io("seal", path, e))
    }

    /// Flush, then forget the file. On error the file and its buffer stay.
    fn close_current(&mut self) -> Result<(), StoreError> {
        self.flush()?;
        self.current = None;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use tracklog_core::fs::MemStorage;
    use tracklog_core::types::Attr;

    use crate::testing::FlakyStorage;

    fn ev(epoch: i64, height: i64) -> Event {
        Event {
            epoch,
            timestamp: 1_700_000_000,
            height,
            tx_index: 0,
            event_type: "PostCreated".into(),
            pkg_path: "gno.land/r/demo/boards".into(),
            attrs: vec![Attr::new("bid", "1")],
        }
    }

    fn fixed_clock(at: DateTime<Utc>) -> (Clock, Arc<Mutex<DateTime<Utc>>>) {
        let now = Arc::new(Mutex::new(at));
        let handle = Arc::clone(&now);
        (Arc::new(move || *handle.lock().unwrap()), now)
    }

    fn tuning(flush_size: usize) -> WriterTuning {
        WriterTuning {
            flush_size,
            flush_interval_seconds: 3600,
            ..Default::default()
        }
    }

    #[test]
    fn flush_size_one_writes_parseable_lines() {
        let fs = MemStorage::new();
        let mut w = JsonlWriter::new(Arc::new(fs.clone()), "/data", "boards").with_tuning(&tuning(1));
        for h in 1..=5 {
            w.write(&ev(1000, h)).unwrap();
        }
        w.flush().unwrap();

        let path = w.current_path().unwrap().to_path_buf();
        assert!(path.starts_with("/data/boards/1000"));
        let text = fs.contents(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        for (i, line) in lines.iter().enumerate() {
            let e: Event = serde_json::from_str(line).unwrap();
            assert_eq!(e.height, i as i64 + 1);
        }
    }

    #[test]
    fn buffers_until_threshold() {
        let fs = MemStorage::new();
        let mut w = JsonlWriter::new(Arc::new(fs.clone()), "/data", "t").with_tuning(&tuning(3));
        w.write(&ev(1, 1)).unwrap();
        w.write(&ev(1, 2)).unwrap();
        let path = w.current_path().unwrap().to_path_buf();
        assert_eq!(fs.contents(&path).unwrap(), "");
        assert_eq!(w.pending(), 2);

        w.write(&ev(1, 3)).unwrap();
        assert_eq!(fs.contents(&path).unwrap().lines().count(), 3);
        assert_eq!(w.pending(), 0);
    }

    #[test]
    fn invalid_event_never_reaches_storage() {
        let fs = MemStorage::new();
        let mut w = JsonlWriter::new(Arc::new(fs.clone()), "/data", "t").with_tuning(&tuning(1));
        let mut bad = ev(1, 1);
        bad.pkg_path.clear();
        assert!(matches!(w.write(&bad), Err(StoreError::InvalidEvent { field: "pkg_path" })));
        assert!(w.current_path().is_none());
        assert!(fs.files_under(Path::new("/data")).is_empty());
    }

    #[test]
    fn rotates_on_hour_change() {
        let fs = MemStorage::new();
        let (clock, now) = fixed_clock(Utc.with_ymd_and_hms(2024, 3, 9, 17, 59, 0).unwrap());
        let mut w = JsonlWriter::new(Arc::new(fs.clone()), "/data", "t")
            .with_tuning(&tuning(100))
            .with_clock(clock);

        w.write(&ev(1, 1)).unwrap();
        *now.lock().unwrap() = Utc.with_ymd_and_hms(2024, 3, 9, 18, 0, 1).unwrap();
        w.write(&ev(1, 2)).unwrap();
        w.close().unwrap();

        let old = fs.contents(Path::new("/data/t/1/2024-03-09-17.jsonl")).unwrap();
        let new = fs.contents(Path::new("/data/t/1/2024-03-09-18.jsonl")).unwrap();
        assert_eq!(old.lines().count(), 1, "buffered line lost on rotation");
        assert_eq!(new.lines().count(), 1);
    }

    #[test]
    fn epoch_change_closes_file_eagerly() {
        let fs = MemStorage::new();
        let (clock, _) = fixed_clock(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let mut w = JsonlWriter::new(Arc::new(fs.clone()), "/data", "t")
            .with_tuning(&tuning(100))
            .with_clock(clock);
        w.write(&ev(1000, 1)).unwrap();

        w.set_epoch(2000).unwrap();
        assert!(w.current_path().is_none());
        assert_eq!(
            fs.contents(Path::new("/data/t/1000/2024-01-01-00.jsonl")).unwrap().lines().count(),
            1
        );

        w.write(&ev(2000, 1)).unwrap();
        assert_eq!(
            w.current_path().unwrap(),
            Path::new("/data/t/2000/2024-01-01-00.jsonl")
        );
    }

    #[test]
    fn close_without_file_is_ok() {
        let mut w = JsonlWriter::new(Arc::new(MemStorage::new()), "/data", "t");
        w.close().unwrap();
        w.close().unwrap();
    }

    #[test]
    fn writes_to_real_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = JsonlWriter::new(Arc::new(tracklog_core::fs::OsStorage), dir.path(), "disk")
            .with_tuning(&tuning(100));
        w.write(&ev(42, 9)).unwrap();
        let path = w.current_path().unwrap().to_path_buf();
        w.close().unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn elapsed_interval_flushes_below_threshold() {
        let fs = MemStorage::new();
        let mut w = JsonlWriter::new(Arc::new(fs.clone()), "/data", "t").with_tuning(&WriterTuning {
            flush_size: 100,
            flush_interval_seconds: 0,
            ..Default::default()
        });
        w.write(&ev(1, 1)).unwrap();
        let path = w.current_path().unwrap().to_path_buf();
        assert_eq!(fs.contents(&path).unwrap().lines().count(), 1);
        assert_eq!(w.pending(), 0);
    }

    fn over_flaky(flaky: &FlakyStorage) -> JsonlWriter {
        let (clock, _) = fixed_clock(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        JsonlWriter::new(Arc::new(flaky.clone()), "/data", "t")
            .with_tuning(&tuning(100))
            .with_clock(clock)
    }

    #[test]
    fn failed_flush_keeps_lines_for_retry() {
        let mem = MemStorage::new();
        let flaky = FlakyStorage::new(mem.clone());
        let mut w = over_flaky(&flaky);
        w.write(&ev(1, 1)).unwrap();
        w.write(&ev(1, 2)).unwrap();
        let path = w.current_path().unwrap().to_path_buf();

        flaky.fail_now();
        assert!(matches!(w.flush(), Err(StoreError::Io { op: "flush", .. })));
        assert_eq!(mem.contents(&path).unwrap(), "");
        assert_eq!(w.pending(), 2);
        assert!(w.buffered() > 0);

        flaky.heal();
        w.flush().unwrap();
        let heights: Vec<i64> = mem
            .contents(&path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str::<Event>(l).unwrap().height)
            .collect();
        assert_eq!(heights, vec![1, 2]);
        assert_eq!(w.buffered(), 0);
    }

    #[test]
    fn short_write_resumes_mid_line() {
        let mem = MemStorage::new();
        let flaky = FlakyStorage::new(mem.clone());
        let mut w = over_flaky(&flaky);
        w.write(&ev(1, 1)).unwrap();
        w.write(&ev(1, 2)).unwrap();
        let path = w.current_path().unwrap().to_path_buf();

        flaky.fail_after(10);
        assert!(w.flush().is_err());
        assert_eq!(mem.contents(&path).unwrap().len(), 10);

        flaky.heal();
        w.write(&ev(1, 3)).unwrap();
        w.close().unwrap();
        let text = mem.contents(&path).unwrap();
        assert!(text.ends_with('\n'));
        for line in text.lines() {
            serde_json::from_str::<Event>(line).unwrap();
        }
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn failed_rotation_keeps_old_file_and_lines() {
        let mem = MemStorage::new();
        let flaky = FlakyStorage::new(mem.clone());
        let (clock, now) = fixed_clock(Utc.with_ymd_and_hms(2024, 3, 9, 17, 30, 0).unwrap());
        let mut w = JsonlWriter::new(Arc::new(flaky.clone()), "/data", "t")
            .with_tuning(&tuning(100))
            .with_clock(clock);
        w.write(&ev(1, 1)).unwrap();

        flaky.fail_now();
        *now.lock().unwrap() = Utc.with_ymd_and_hms(2024, 3, 9, 18, 0, 0).unwrap();
        assert!(w.write(&ev(1, 2)).is_err());
        assert_eq!(w.current_path().unwrap(), Path::new("/data/t/1/2024-03-09-17.jsonl"));

        flaky.heal();
        w.write(&ev(1, 2)).unwrap();
        w.close().unwrap();
        assert_eq!(
            mem.contents(Path::new("/data/t/1/2024-03-09-17.jsonl")).unwrap().lines().count(),
            1
        );
        assert_eq!(
            mem.contents(Path::new("/data/t/1/2024-03-09-18.jsonl")).unwrap().lines().count(),
            1
        );
    }

    #[test]
    fn partial_tail_from_earlier_run_is_sealed() {
        let fs = MemStorage::new();
        let (clock, _) = fixed_clock(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let path = Path::new("/data/t/1/2024-01-01-00.jsonl");
        fs.create_dir_all(path.parent().unwrap()).unwrap();
        fs.write_file(path, b"{\"epoch\":1,\"hei").unwrap();

        let mut w = JsonlWriter::new(Arc::new(fs.clone()), "/data", "t")
            .with_tuning(&tuning(1))
            .with_clock(clock);
        w.write(&ev(1, 7)).unwrap();

        let text = fs.contents(path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let e: Event = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(e.height, 7);
    }
}
