//! Append-only daily attendance log.
//!
//! One CSV line per record, no header: `label,YYYY-MM-DD,HH:MM:SS`.
//! At most one record is written per (label, date).

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::collections::HashSet;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("attendance log {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("malformed attendance record: {0:?}")]
pub struct ParseRecordError(String);

/// One line of the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub label: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl fmt::Display for AttendanceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{}",
            self.label,
            self.date.format(DATE_FORMAT),
            self.time.format(TIME_FORMAT)
        )
    }
}

impl FromStr for AttendanceRecord {
    type Err = ParseRecordError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let err = || ParseRecordError(line.to_string());
        // Split from the right: date and time never contain commas.
        let mut fields = line.trim_end().rsplitn(3, ',');
        let time = fields.next().ok_or_else(err)?;
        let date = fields.next().ok_or_else(err)?;
        let label = fields.next().filter(|l| !l.is_empty()).ok_or_else(err)?;

        Ok(Self {
            label: label.to_string(),
            date: NaiveDate::parse_from_str(date, DATE_FORMAT).map_err(|_| err())?,
            time: NaiveTime::parse_from_str(time, TIME_FORMAT).map_err(|_| err())?,
        })
    }
}

/// Result of a [`AttendanceLog::mark`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// A new record was appended with this time of day.
    Recorded(NaiveTime),
    /// A record for this label already exists today; nothing was written.
    AlreadyRecorded,
}

/// The durable attendance ledger.
///
/// `mark` serialises check-then-append behind one lock, so concurrent
/// callers in this process cannot both write the same (label, date).
/// Other processes appending to the same file are not coordinated with.
pub struct AttendanceLog {
    path: PathBuf,
    /// (label, date) pairs known to be on disk already.
    seen: Mutex<HashSet<(String, NaiveDate)>>,
}

impl AttendanceLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> AttendanceError {
        AttendanceError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Record `label` as present now, unless already recorded today.
    pub fn mark(&self, label: &str) -> Result<MarkOutcome, AttendanceError> {
        self.mark_at(label, Local::now().naive_local())
    }

    /// Record `label` as present at `now`, unless already recorded that day.
    pub fn mark_at(&self, label: &str, now: NaiveDateTime) -> Result<MarkOutcome, AttendanceError> {
        let date = now.date();
        let key = (label.to_string(), date);
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);

        if seen.contains(&key) {
            tracing::debug!(label, %date, "attendance already marked");
            return Ok(MarkOutcome::AlreadyRecorded);
        }

        if self.contains(label, date)? {
            tracing::info!(label, %date, "attendance already marked for today");
            seen.insert(key);
            return Ok(MarkOutcome::AlreadyRecorded);
        }

        let record = AttendanceRecord {
            label: label.to_string(),
            date,
            time: now.time().with_nanosecond(0).unwrap_or(now.time()),
        };
        self.append(&record)?;
        seen.insert(key);

        tracing::info!(label, %date, time = %record.time, "attendance marked");
        Ok(MarkOutcome::Recorded(record.time))
    }

    fn append(&self, record: &AttendanceRecord) -> Result<(), AttendanceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;

        // Never glue a record onto an unterminated last line.
        let mut line = String::new();
        if !self.ends_with_newline(&mut file)? {
            line.push('\n');
        }
        line.push_str(&record.to_string());
        line.push('\n');
        file.write_all(line.as_bytes()).map_err(|e| self.io_err(e))
    }

    /// True for an empty file or one whose last byte is `\n`.
    fn ends_with_newline(&self, file: &mut File) -> Result<bool, AttendanceError> {
        let len = file.metadata().map_err(|e| self.io_err(e))?.len();
        if len == 0 {
            return Ok(true);
        }
        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1)).map_err(|e| self.io_err(e))?;
        file.read_exact(&mut last).map_err(|e| self.io_err(e))?;
        Ok(last[0] == b'\n')
    }

    /// Raw log contents; a missing file reads as empty.
    fn read(&self) -> Result<String, AttendanceError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(self.io_err(e)),
        }
    }

    /// Whether the log holds a record with exactly this label and date.
    pub fn contains(&self, label: &str, date: NaiveDate) -> Result<bool, AttendanceError> {
        Ok(self
            .read()?
            .lines()
            .filter_map(|line| line.parse::<AttendanceRecord>().ok())
            .any(|r| r.label == label && r.date == date))
    }

    /// Every record in file order. Malformed lines are skipped.
    pub fn records(&self) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        let text = self.read()?;
        let mut records = Vec::new();
        for (n, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match line.parse() {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(line = n + 1, error = %e, "skipping attendance line"),
            }
        }
        Ok(records)
    }

    /// Records for one calendar day, in file order.
    pub fn records_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|r| r.date == date)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn lines(log: &AttendanceLog) -> Vec<String> {
        std::fs::read_to_string(log.path())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_record_display_and_parse() {
        let record: AttendanceRecord = "Alice,2026-10-19,09:15:02".parse().unwrap();
        assert_eq!(record.label, "Alice");
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2026, 10, 19).unwrap());
        assert_eq!(record.to_string(), "Alice,2026-10-19,09:15:02");
    }

    #[test]
    fn test_record_parse_rejects_malformed() {
        for line in ["", "Alice", "Alice,2026-10-19", ",2026-10-19,09:00:00", "Alice,19/10/2026,09:00:00"] {
            assert!(line.parse::<AttendanceRecord>().is_err(), "{line:?}");
        }
    }

    #[test]
    fn test_mark_creates_file_and_parent_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let log = AttendanceLog::new(tmp.path().join("docs/attendance.csv"));

        let outcome = log.mark_at("Alice", at("2026-10-19", "09:15:02")).unwrap();
        assert_eq!(outcome, MarkOutcome::Recorded(NaiveTime::from_hms_opt(9, 15, 2).unwrap()));
        assert_eq!(lines(&log), vec!["Alice,2026-10-19,09:15:02"]);
    }

    #[test]
    fn test_mark_is_idempotent_within_a_day() {
        let tmp = tempfile::tempdir().unwrap();
        let log = AttendanceLog::new(tmp.path().join("attendance.csv"));

        log.mark_at("Alice", at("2026-10-19", "09:00:00")).unwrap();
        for t in ["09:00:01", "12:30:00", "23:59:59"] {
            let outcome = log.mark_at("Alice", at("2026-10-19", t)).unwrap();
            assert_eq!(outcome, MarkOutcome::AlreadyRecorded);
        }
        assert_eq!(lines(&log).len(), 1);
    }

    #[test]
    fn test_mark_again_on_next_day() {
        let tmp = tempfile::tempdir().unwrap();
        let log = AttendanceLog::new(tmp.path().join("attendance.csv"));

        log.mark_at("Alice", at("2026-10-19", "09:00:00")).unwrap();
        let outcome = log.mark_at("Alice", at("2026-10-20", "08:59:00")).unwrap();
        assert!(matches!(outcome, MarkOutcome::Recorded(_)));
        assert_eq!(lines(&log).len(), 2);
    }

    #[test]
    fn test_existing_file_record_is_respected() {
        // A fresh log instance has an empty cache and must consult the file.
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("attendance.csv");
        std::fs::write(&path, "Alice,2026-10-19,08:00:00\n").unwrap();

        let log = AttendanceLog::new(&path);
        let outcome = log.mark_at("Alice", at("2026-10-19", "10:00:00")).unwrap();
        assert_eq!(outcome, MarkOutcome::AlreadyRecorded);
        assert_eq!(lines(&log).len(), 1);
    }

    #[test]
    fn test_append_after_unterminated_last_line() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("attendance.csv");
        std::fs::write(&path, "Alice,2026-10-19,08:00:00").unwrap();

        let log = AttendanceLog::new(&path);
        let bob = log.mark_at("Bob", at("2026-10-19", "09:00:00")).unwrap();
        assert!(matches!(bob, MarkOutcome::Recorded(_)));

        // Fresh instance: the dedup must come from the file, not the cache.
        let log = AttendanceLog::new(&path);
        let alice = log.mark_at("Alice", at("2026-10-19", "10:00:00")).unwrap();
        assert_eq!(alice, MarkOutcome::AlreadyRecorded);

        assert_eq!(
            lines(&log),
            vec!["Alice,2026-10-19,08:00:00", "Bob,2026-10-19,09:00:00"]
        );
        let labels: Vec<_> = log.records().unwrap().into_iter().map(|r| r.label).collect();
        assert_eq!(labels, vec!["Alice", "Bob"]);
    }

    #[test]
    fn test_label_that_is_a_suffix_of_another_is_distinct() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("attendance.csv");
        std::fs::write(&path, "JimBob,2026-10-19,08:00:00\n").unwrap();

        let log = AttendanceLog::new(&path);
        let outcome = log.mark_at("Bob", at("2026-10-19", "10:00:00")).unwrap();
        assert!(matches!(outcome, MarkOutcome::Recorded(_)));
    }

    #[test]
    fn test_concurrent_marks_write_one_record() {
        let tmp = tempfile::tempdir().unwrap();
        let log = Arc::new(AttendanceLog::new(tmp.path().join("attendance.csv")));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || log.mark_at("Alice", at("2026-10-19", "09:00:00")).unwrap())
            })
            .collect();
        let recorded = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| matches!(o, MarkOutcome::Recorded(_)))
            .count();

        assert_eq!(recorded, 1);
        assert_eq!(lines(&log).len(), 1);
    }

    #[test]
    fn test_records_skip_malformed_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("attendance.csv");
        std::fs::write(
            &path,
            "Alice,2026-10-18,09:00:00\ngarbage\n\nBob,2026-10-19,10:00:00\nAlice,2026-10-19,11:00:00\n",
        )
        .unwrap();

        let log = AttendanceLog::new(&path);
        assert_eq!(log.records().unwrap().len(), 3);

        let today = log.records_on(NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()).unwrap();
        let labels: Vec<_> = today.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["Bob", "Alice"]);
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let log = AttendanceLog::new(tmp.path().join("none.csv"));
        assert!(log.records().unwrap().is_empty());
        assert!(!log.contains("Alice", NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()).unwrap());
    }

    #[test]
    fn test_mark_uses_local_clock() {
        let tmp = tempfile::tempdir().unwrap();
        let log = AttendanceLog::new(tmp.path().join("attendance.csv"));
        assert!(matches!(log.mark("Alice").unwrap(), MarkOutcome::Recorded(_)));
        assert_eq!(log.mark("Alice").unwrap(), MarkOutcome::AlreadyRecorded);
    }
}
