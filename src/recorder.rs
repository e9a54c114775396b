// src/recorder.rs
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDate};
use log::info;

use crate::drivers::LogError;
use crate::types::{Channel, Sample, SampleSet};

const RECORD_EXTENSION: &str = "record";
const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

/// Destination for every acquired sample set, called from the acquisition thread.
pub trait RecordSink: Send {
    fn write(&mut self, set: &SampleSet) -> Result<(), LogError>;
}

fn day_directory(root: &Path, day: NaiveDate) -> PathBuf {
    root.join(day.format("%Y-%m-%d").to_string())
}

fn ensure_dir(dir: &Path) -> Result<(), LogError> {
    fs::create_dir_all(dir).map_err(|e| LogError::io(dir, e))
}

/// Appends sample sets to `<root>/<YYYY-MM-DD>/<N>.record`, starting a new
/// numbered file once the newest one grows past the size limit.
///
/// Nothing is cached between writes: the day directory and the active file
/// are re-resolved every time, so day changes and files removed or added by
/// someone else are picked up on the next write.
pub struct LogRotator {
    root: PathBuf,
    channels: Vec<Channel>,
    max_size_mb: f64,
}

impl LogRotator {
    pub fn new(root: impl Into<PathBuf>, channels: Vec<Channel>, max_size_mb: f64) -> Self {
        Self {
            root: root.into(),
            channels,
            max_size_mb,
        }
    }

    pub fn header(&self) -> String {
        let mut row = String::from("Time");
        for channel in &self.channels {
            row.push_str(", ");
            row.push_str(&channel.column_name());
        }
        row
    }

    fn format_row(&self, set: &SampleSet) -> String {
        let mut row = set.captured_at.format("%H:%M:%S").to_string();
        for sample in &set.samples {
            row.push_str(", ");
            if let Sample::Millivolts(v) = sample {
                row.push_str(&v.to_string());
            }
        }
        row
    }

    /// Appends one row and returns the file it went to.
    pub fn append(&self, set: &SampleSet) -> Result<PathBuf, LogError> {
        let dir = day_directory(&self.root, set.captured_at.date_naive());
        ensure_dir(&dir)?;
        let path = match latest_record(&dir)? {
            Some(latest) if !self.exceeds_limit(&latest)? => latest,
            _ => self.allocate(&dir)?,
        };
        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| LogError::io(&path, e))?;
        let mut w = BufWriter::new(file);
        writeln!(w, "{}", self.format_row(set))
            .and_then(|_| w.flush())
            .map_err(|e| LogError::io(&path, e))?;
        Ok(path)
    }

    fn exceeds_limit(&self, path: &Path) -> Result<bool, LogError> {
        let size = fs::metadata(path).map_err(|e| LogError::io(path, e))?.len();
        Ok(size as f64 / BYTES_PER_MEGABYTE > self.max_size_mb)
    }

    // Smallest free N, created exclusively so a concurrent writer cannot share it.
    fn allocate(&self, dir: &Path) -> Result<PathBuf, LogError> {
        let mut n: u32 = 1;
        loop {
            let path = dir.join(format!("{n}.{RECORD_EXTENSION}"));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    let mut w = BufWriter::new(file);
                    writeln!(w, "{}", self.header())
                        .and_then(|_| w.flush())
                        .map_err(|e| LogError::io(&path, e))?;
                    info!("new record file {}", path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(LogError::io(&path, e)),
            }
        }
    }
}

impl RecordSink for LogRotator {
    fn write(&mut self, set: &SampleSet) -> Result<(), LogError> {
        self.append(set).map(|_| ())
    }
}

fn record_number(path: &Path) -> Option<u32> {
    if path.extension()? != RECORD_EXTENSION {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

// Filesystems without birth time fall back to modification time.
fn created_at(meta: &fs::Metadata) -> io::Result<SystemTime> {
    meta.created().or_else(|_| meta.modified())
}

/// Newest `*.record` file by creation time; ties go to the higher number.
fn latest_record(dir: &Path) -> Result<Option<PathBuf>, LogError> {
    let entries = fs::read_dir(dir).map_err(|e| LogError::io(dir, e))?;
    let mut latest: Option<(SystemTime, u32, PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(|e| LogError::io(dir, e))?;
        let path = entry.path();
        let Some(number) = record_number(&path) else {
            continue;
        };
        let meta = entry.metadata().map_err(|e| LogError::io(&path, e))?;
        if !meta.is_file() {
            continue;
        }
        let created = created_at(&meta).map_err(|e| LogError::io(&path, e))?;
        let newer = match &latest {
            None => true,
            Some((t, n, _)) => (created, number) > (*t, *n),
        };
        if newer {
            latest = Some((created, number, path));
        }
    }
    Ok(latest.map(|(_, _, path)| path))
}

/// Free-text event log: `<root>/<YYYY-MM-DD>/actions.txt`.
pub struct ActionLog {
    root: PathBuf,
}

impl ActionLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn record(&self, message: &str) -> Result<(), LogError> {
        self.record_at(Local::now(), message)
    }

    pub fn record_at(&self, at: DateTime<Local>, message: &str) -> Result<(), LogError> {
        let dir = day_directory(&self.root, at.date_naive());
        ensure_dir(&dir)?;
        let path = dir.join("actions.txt");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LogError::io(&path, e))?;
        writeln!(file, "[{}] - {}", at.format("%H:%M:%S"), message)
            .map_err(|e| LogError::io(&path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn abc() -> Vec<Channel> {
        vec![Channel::A, Channel::B, Channel::C]
    }

    fn at(day: u32, h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, day, h, m, s).unwrap()
    }

    fn set(ts: DateTime<Local>, values: &[f64]) -> SampleSet {
        SampleSet::new(ts, values.iter().map(|v| Sample::Millivolts(*v)).collect())
    }

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn five_sets_share_one_file_with_single_header() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rotator = LogRotator::new(tmp.path(), abc(), 15.0);
        for i in 0..5 {
            rotator
                .write(&set(at(4, 12, 0, i), &[1.5, -2.25, 1000.0]))
                .unwrap();
        }
        let file = tmp.path().join("2024-03-04").join("1.record");
        let rows = lines(&file);
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0], "Time, Channel_A, Channel_B, Channel_C");
        assert_eq!(rows[1], "12:00:00, 1.5, -2.25, 1000");
        assert_eq!(rows[5], "12:00:04, 1.5, -2.25, 1000");
    }

    #[test]
    fn tiny_limit_rotates_every_write() {
        let tmp = tempfile::tempdir().unwrap();
        // ~10 bytes: header plus one row is always over the limit.
        let rotator = LogRotator::new(tmp.path(), abc(), 0.00001);
        let mut written = Vec::new();
        for i in 0..3 {
            written.push(rotator.append(&set(at(4, 9, 30, i), &[1.0, 2.0, 3.0])).unwrap());
        }
        let dir = tmp.path().join("2024-03-04");
        for (i, path) in written.iter().enumerate() {
            assert_eq!(path, &dir.join(format!("{}.record", i + 1)));
            let rows = lines(path);
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0], rotator.header());
        }
    }

    #[test]
    fn full_file_rotates_to_next_number() {
        let tmp = tempfile::tempdir().unwrap();
        let rotator = LogRotator::new(tmp.path(), abc(), 0.0001);
        let first = rotator.append(&set(at(5, 8, 0, 0), &[1.0, 2.0, 3.0])).unwrap();
        let mut path = first.clone();
        let mut writes = 1;
        while path == first {
            path = rotator.append(&set(at(5, 8, 0, 1), &[1.0, 2.0, 3.0])).unwrap();
            writes += 1;
            assert!(writes < 100);
        }
        assert_eq!(path, tmp.path().join("2024-03-05").join("2.record"));
        // The first file went over the limit with its last row, not before.
        let size = fs::metadata(&first).unwrap().len() as f64;
        assert!(size > 0.0001 * BYTES_PER_MEGABYTE);
        assert_eq!(lines(&path)[0], rotator.header());
    }

    #[test]
    fn new_day_restarts_numbering() {
        let tmp = tempfile::tempdir().unwrap();
        let rotator = LogRotator::new(tmp.path(), abc(), 0.00001);
        for i in 0..3 {
            rotator.append(&set(at(6, 23, 59, i), &[0.0, 0.0, 0.0])).unwrap();
        }
        let next_day = rotator.append(&set(at(7, 0, 0, 1), &[0.0, 0.0, 0.0])).unwrap();
        assert_eq!(next_day, tmp.path().join("2024-03-07").join("1.record"));
        assert!(tmp.path().join("2024-03-06").join("3.record").exists());
    }

    #[test]
    fn reopening_existing_file_keeps_single_header() {
        let tmp = tempfile::tempdir().unwrap();
        let first = LogRotator::new(tmp.path(), abc(), 15.0);
        first.append(&set(at(4, 10, 0, 0), &[1.0, 2.0, 3.0])).unwrap();
        drop(first);
        let second = LogRotator::new(tmp.path(), abc(), 15.0);
        let path = second.append(&set(at(4, 10, 0, 1), &[4.0, 5.0, 6.0])).unwrap();
        let rows = lines(&path);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.iter().filter(|r| r.starts_with("Time")).count(), 1);
    }

    #[test]
    fn allocation_fills_smallest_gap() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("2024-03-04");
        fs::create_dir_all(&dir).unwrap();
        // Over-full file 2, no file 1.
        fs::write(dir.join("2.record"), vec![b'x'; 64]).unwrap();
        let rotator = LogRotator::new(tmp.path(), abc(), 0.00001);
        std::thread::sleep(std::time::Duration::from_millis(20));
        let path = rotator.append(&set(at(4, 10, 0, 0), &[1.0, 2.0, 3.0])).unwrap();
        assert_eq!(path, dir.join("1.record"));

        // 1.record is now the most recently created file, so it stays active
        // under a roomy limit even though 2.record has the higher number.
        let roomy = LogRotator::new(tmp.path(), abc(), 15.0);
        let next = roomy.append(&set(at(4, 10, 0, 1), &[4.0, 5.0, 6.0])).unwrap();
        assert_eq!(next, dir.join("1.record"));
        assert_eq!(lines(&next).len(), 3);
        assert_eq!(fs::metadata(dir.join("2.record")).unwrap().len(), 64);
    }

    #[test]
    fn missing_samples_leave_empty_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let rotator = LogRotator::new(tmp.path(), abc(), 15.0);
        let ts = at(4, 10, 0, 0);
        let path = rotator
            .append(&SampleSet::new(
                ts,
                vec![Sample::Millivolts(1.0), Sample::Missing, Sample::Millivolts(3.0)],
            ))
            .unwrap();
        assert_eq!(lines(&path)[1], "10:00:00, 1, , 3");
    }

    #[test]
    fn unwritable_root_is_io_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not_a_dir");
        fs::write(&blocker, b"file").unwrap();
        let rotator = LogRotator::new(&blocker, abc(), 15.0);
        let err = rotator.append(&set(at(4, 10, 0, 0), &[1.0, 2.0, 3.0])).unwrap_err();
        assert!(matches!(err, LogError::IoFailure { .. }));
    }

    #[test]
    fn action_log_lines_are_timestamped() {
        let tmp = tempfile::tempdir().unwrap();
        let actions = ActionLog::new(tmp.path());
        actions.record_at(at(4, 7, 5, 9), "Application started").unwrap();
        actions.record_at(at(4, 7, 5, 10), "Logging is turned off").unwrap();
        let rows = lines(&tmp.path().join("2024-03-04").join("actions.txt"));
        assert_eq!(
            rows,
            vec![
                "[07:05:09] - Application started".to_owned(),
                "[07:05:10] - Logging is turned off".to_owned(),
            ]
        );
    }
}
