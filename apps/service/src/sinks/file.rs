use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;

use super::ResultSink;
use crate::config::OptionReader;
use crate::error::{ConfigError, DeliveryError, FieldError};
use crate::monitoring::{CheckStatus, MonitorSnapshot};

/// How each line's timestamp is written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateFormat {
    /// Unix seconds
    #[default]
    Timestamp,
    Iso8601,
}

impl DateFormat {
    /// `tz` only changes ISO 8601 output; unix seconds have no zone
    pub fn render(self, time: DateTime<Utc>, tz: Tz) -> String {
        match self {
            DateFormat::Timestamp => time.timestamp().to_string(),
            DateFormat::Iso8601 => time.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S%:z").to_string(),
        }
    }
}

/// Appends one line per result to a plain text file
pub struct LogFileSink {
    path: PathBuf,
    writer: BufWriter<File>,
    dateformat: DateFormat,
    tz: Tz,
    buffered: bool,
    only_failures: bool,
}

impl LogFileSink {
    /// Open `path` for appending and write the start-up line
    pub fn new(
        path: impl Into<PathBuf>,
        dateformat: DateFormat,
        tz: Tz,
        buffered: bool,
        only_failures: bool,
    ) -> Result<Self, DeliveryError> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let writer = BufWriter::new(file);
        let mut sink = Self { path, writer, dateformat, tz, buffered, only_failures };
        sink.write_line(&format!("{} hostwatch starting", sink.render(Utc::now())))?;
        Ok(sink)
    }

    pub fn from_options(options: &mut OptionReader<'_>) -> Result<Self, ConfigError> {
        let filename = options.required_string("filename");
        let dateformat = options.with_default("dateformat", DateFormat::default());
        let tz_name = options.with_default("tz", "UTC".to_string());
        let buffered = options.with_default("buffered", true);
        let only_failures = options.with_default("only_failures", false);

        let tz = tz_name.parse::<Tz>().unwrap_or_else(|_| {
            options.error("tz", format!("unknown time zone `{tz_name}`"));
            Tz::UTC
        });
        options.finish()?;

        Self::new(&filename, dateformat, tz, buffered, only_failures).map_err(|e| {
            FieldError::new(
                options.component(),
                "filename",
                format!("cannot open {filename}: {e}"),
            )
            .into()
        })
    }

    fn render(&self, time: DateTime<Utc>) -> String {
        self.dateformat.render(time, self.tz)
    }

    fn write_line(&mut self, line: &str) -> Result<(), DeliveryError> {
        writeln!(self.writer, "{line}")?;
        if !self.buffered {
            self.writer.flush()?;
        }
        Ok(())
    }

    /// The line written for one result, without the trailing newline
    pub fn format_line(&self, entry: &MonitorSnapshot, now: DateTime<Utc>) -> String {
        let state = &entry.state;
        let seconds = state.last_duration.map(|d| d.as_secs_f64()).unwrap_or_default();
        let at = self.render(state.last_run.unwrap_or(now));

        match state.last_status {
            Some(CheckStatus::Failure) => {
                let since = state.first_failure_time.map(|t| self.render(t)).unwrap_or_default();
                format!(
                    "{at} {}: failed since {since}; VFC={} ({}) ({seconds:.3}s)",
                    entry.name, state.consecutive_failures, state.last_result
                )
            }
            _ => format!("{at} {}: ok ({seconds:.3}s)", entry.name),
        }
    }
}

impl ResultSink for LogFileSink {
    fn type_tag(&self) -> &'static str {
        "logfile"
    }

    fn describe(&self) -> String {
        format!("Writing log file to {}", self.path.display())
    }

    fn save_result(&mut self, entry: &MonitorSnapshot) -> Result<(), DeliveryError> {
        if self.only_failures && entry.state.last_status != Some(CheckStatus::Failure) {
            return Ok(());
        }

        let line = self.format_line(entry, Utc::now());
        self.write_line(&line)
    }
}

impl Drop for LogFileSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::checker::{FailCheck, NullCheck};
    use crate::monitoring::{Check, Monitor, MonitorSettings};
    use chrono::TimeZone;
    use std::time::Instant;
    use tempfile::tempdir;

    async fn snapshot(name: &str, check: Box<dyn Check>) -> MonitorSnapshot {
        let mut monitor = Monitor::new(name, MonitorSettings::default(), check);
        let outcome = monitor.run(Instant::now()).await;
        monitor.record(&outcome);
        monitor.snapshot()
    }

    fn sink_from(raw: &str) -> Result<LogFileSink, ConfigError> {
        let options: toml::Table = toml::from_str(raw).unwrap();
        let mut reader = OptionReader::new("sinks.file", &options);
        LogFileSink::from_options(&mut reader)
    }

    #[tokio::test]
    async fn test_ok_and_failed_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.log");
        let mut sink = LogFileSink::new(&path, DateFormat::Timestamp, Tz::UTC, false, false).unwrap();

        sink.save_result(&snapshot("up", Box::new(NullCheck)).await).unwrap();
        sink.save_result(&snapshot("down", Box::new(FailCheck)).await).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with(" hostwatch starting"));
        assert!(lines[0].split(' ').next().is_some_and(|ts| ts.parse::<i64>().is_ok()));
        assert!(lines[1].ends_with("s)"));
        assert!(lines[1].contains(" up: ok ("));
        assert!(lines[2].contains(" down: failed since "));
        assert!(lines[2].contains("VFC=1 (This monitor always fails.)"));
    }

    #[tokio::test]
    async fn test_only_failures() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("failures.log");
        let mut sink = LogFileSink::new(&path, DateFormat::Iso8601, Tz::UTC, false, true).unwrap();

        sink.save_result(&snapshot("up", Box::new(NullCheck)).await).unwrap();
        sink.save_result(&snapshot("down", Box::new(FailCheck)).await).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("+00:00 hostwatch starting"));
        assert!(lines[1].contains("+00:00 down: failed since"));
    }

    #[test]
    fn test_header_appended_on_every_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("restart.log");

        drop(LogFileSink::new(&path, DateFormat::Timestamp, Tz::UTC, true, false).unwrap());
        drop(LogFileSink::new(&path, DateFormat::Timestamp, Tz::UTC, true, false).unwrap());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().filter(|l| l.ends_with(" hostwatch starting")).count(), 2);
    }

    #[test]
    fn test_timestamp_format() {
        let dir = tempdir().unwrap();
        let sink = LogFileSink::new(dir.path().join("x.log"), DateFormat::Timestamp, Tz::UTC, true, false).unwrap();
        let entry = Monitor::new("idle", MonitorSettings::default(), Box::new(NullCheck)).snapshot();

        let line = sink.format_line(&entry, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(line, "0 idle: ok (0.000s)");
    }

    #[test]
    fn test_iso8601_in_time_zone() {
        let at = Utc.with_ymd_and_hms(2020, 4, 18, 11, 0, 0).unwrap();

        assert_eq!(DateFormat::Iso8601.render(at, Tz::UTC), "2020-04-18 11:00:00+00:00");
        assert_eq!(DateFormat::Iso8601.render(at, chrono_tz::Europe::Warsaw), "2020-04-18 13:00:00+02:00");
        assert_eq!(DateFormat::Timestamp.render(at, chrono_tz::Europe::Warsaw), at.timestamp().to_string());
    }

    #[test]
    fn test_dateformat_and_tz_options() {
        let dir = tempdir().unwrap();
        let sink = sink_from(&format!(
            "filename = {:?}\ndateformat = \"iso8601\"\ntz = \"Europe/Warsaw\"\nbuffered = false",
            dir.path().join("y.log").display().to_string()
        ))
        .unwrap();
        assert_eq!(sink.dateformat, DateFormat::Iso8601);
        assert_eq!(sink.tz, chrono_tz::Europe::Warsaw);
        assert!(!sink.buffered);

        let header = std::fs::read_to_string(dir.path().join("y.log")).unwrap();
        assert!(header.trim_end().ends_with(" hostwatch starting"));
        assert!(header.contains("+01:00 ") || header.contains("+02:00 "));
    }

    #[test]
    fn test_unknown_tz_rejected() {
        let dir = tempdir().unwrap();
        let err = sink_from(&format!(
            "filename = {:?}\ntz = \"Mars/Olympus\"",
            dir.path().join("z.log").display().to_string()
        ))
        .err()
        .unwrap();
        assert_eq!(err.field_errors()[0].field, "tz");
        assert!(!dir.path().join("z.log").exists());
    }
}
