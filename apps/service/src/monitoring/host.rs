//! Checks that look at the local host: disk space, files and commands.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use nix::sys::statvfs::statvfs;
use regex::Regex;

use super::checker::Check;
use super::types::CheckOutcome;
use crate::config::OptionReader;
use crate::error::{CheckError, ConfigError};
use crate::units::bytes_to_size_string;

/// Fails when free space on a partition drops below a limit
pub struct DiskSpaceCheck {
    partition: PathBuf,
    limit: u64,
}

impl DiskSpaceCheck {
    pub fn new(partition: impl Into<PathBuf>, limit: u64) -> Self {
        Self { partition: partition.into(), limit }
    }

    pub fn from_options(options: &mut OptionReader<'_>) -> Result<Self, ConfigError> {
        let partition = options.required_string("partition");
        let limit = options.size("limit");
        options.finish()?;
        Ok(Self::new(partition, limit))
    }

    pub fn params(&self) -> (u64, &std::path::Path) {
        (self.limit, &self.partition)
    }

    // Field widths differ between platforms
    #[allow(clippy::unnecessary_cast)]
    fn free_space(&self) -> nix::Result<u64> {
        let stat = statvfs(self.partition.as_path())?;
        let available = stat.blocks_available() as u64;
        let fragment = stat.fragment_size() as u64;
        Ok(available.saturating_mul(fragment))
    }
}

#[async_trait::async_trait]
impl Check for DiskSpaceCheck {
    fn type_tag(&self) -> &'static str {
        "diskspace"
    }

    fn describe(&self) -> String {
        format!(
            "Checking for at least {} free space on {}",
            bytes_to_size_string(self.limit),
            self.partition.display()
        )
    }

    async fn check(&self) -> Result<CheckOutcome, CheckError> {
        let free = match self.free_space() {
            Ok(free) => free,
            Err(e) => {
                return Ok(CheckOutcome::failure(format!(
                    "Couldn't get free disk space on {}: {e}",
                    self.partition.display()
                )));
            }
        };

        let message = format!("{} free", bytes_to_size_string(free));
        if free < self.limit {
            Ok(CheckOutcome::failure(message))
        } else {
            Ok(CheckOutcome::success(message))
        }
    }
}

/// Fails when a file is missing, too small or too old
pub struct FileStatCheck {
    filename: PathBuf,
    min_size: Option<u64>,
    max_age: Option<Duration>,
}

impl FileStatCheck {
    pub fn new(filename: impl Into<PathBuf>, min_size: Option<u64>, max_age: Option<Duration>) -> Self {
        Self { filename: filename.into(), min_size, max_age }
    }

    pub fn from_options(options: &mut OptionReader<'_>) -> Result<Self, ConfigError> {
        let filename = options.required_string("filename");
        let min_size = options.optional_size("minsize");
        let max_age: Option<u64> = options.optional("maxage");
        options.finish()?;
        Ok(Self::new(filename, min_size, max_age.map(Duration::from_secs)))
    }
}

#[async_trait::async_trait]
impl Check for FileStatCheck {
    fn type_tag(&self) -> &'static str {
        "filestat"
    }

    fn describe(&self) -> String {
        let mut description = format!("Checking {} exists", self.filename.display());
        if let Some(size) = self.min_size {
            description.push_str(&format!(", is at least {}", bytes_to_size_string(size)));
        }
        if let Some(age) = self.max_age {
            description.push_str(&format!(", and is not older than {}s", age.as_secs()));
        }
        description
    }

    async fn check(&self) -> Result<CheckOutcome, CheckError> {
        let metadata = match tokio::fs::metadata(&self.filename).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CheckOutcome::failure(format!(
                    "File {} does not exist",
                    self.filename.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let size = metadata.len();
        if let Some(min_size) = self.min_size {
            if size < min_size {
                return Ok(CheckOutcome::failure(format!(
                    "Size is {}, should be >= {}",
                    bytes_to_size_string(size),
                    bytes_to_size_string(min_size)
                )));
            }
        }

        let age = SystemTime::now()
            .duration_since(metadata.modified()?)
            .unwrap_or_default();
        if let Some(max_age) = self.max_age {
            if age > max_age {
                return Ok(CheckOutcome::failure(format!(
                    "Age is {}s, should be <= {}s",
                    age.as_secs(),
                    max_age.as_secs()
                )));
            }
        }

        Ok(CheckOutcome::success(format!(
            "Size is {}, age is {}s",
            bytes_to_size_string(size),
            age.as_secs()
        )))
    }
}

/// How the output of a command is judged
#[derive(Debug, Clone)]
pub enum CommandExpectation {
    /// Non-zero exit status fails
    ExitStatus,
    /// Stdout must match
    Matches(Regex),
    /// Stdout is a number that must not exceed the limit
    AtMost(i64),
}

/// Runs a command and judges its exit status or output
pub struct CommandCheck {
    argv: Vec<String>,
    expectation: CommandExpectation,
}

impl CommandCheck {
    pub fn new(command: &str, expectation: CommandExpectation) -> Self {
        Self { argv: command.split_whitespace().map(str::to_string).collect(), expectation }
    }

    pub fn from_options(options: &mut OptionReader<'_>) -> Result<Self, ConfigError> {
        let command = options.required_string("command");
        let raw_regexp: Option<String> = options.optional("result_regexp");
        let result_max: Option<i64> = options.optional("result_max");

        // A regexp wins over a numeric limit
        let expectation = match (raw_regexp, result_max) {
            (Some(raw), _) => match Regex::new(&raw) {
                Ok(regex) => CommandExpectation::Matches(regex),
                Err(e) => {
                    options.error("result_regexp", format!("Invalid regular expression: {e}"));
                    CommandExpectation::ExitStatus
                }
            },
            (None, Some(max)) => CommandExpectation::AtMost(max),
            (None, None) => CommandExpectation::ExitStatus,
        };

        options.finish()?;
        Ok(Self::new(&command, expectation))
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn expectation(&self) -> &CommandExpectation {
        &self.expectation
    }
}

#[async_trait::async_trait]
impl Check for CommandCheck {
    fn type_tag(&self) -> &'static str {
        "command"
    }

    fn describe(&self) -> String {
        let command = self.argv.join(" ");
        match &self.expectation {
            CommandExpectation::ExitStatus => format!("Checking command `{command}` exits cleanly"),
            CommandExpectation::Matches(regex) => {
                format!("Checking command `{command}` output matches {regex}")
            }
            CommandExpectation::AtMost(max) => {
                format!("Checking command `{command}` returns a value <= {max}")
            }
        }
    }

    async fn check(&self) -> Result<CheckOutcome, CheckError> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(CheckError::Failed("empty command".to_string()));
        };

        let output = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();

        let outcome = match &self.expectation {
            CommandExpectation::ExitStatus if output.status.success() => {
                CheckOutcome::success(format!("{} exited cleanly", program))
            }
            CommandExpectation::ExitStatus => CheckOutcome::failure(format!(
                "Command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )),
            CommandExpectation::Matches(regex) if regex.is_match(stdout) => {
                CheckOutcome::success(format!("Output matched {regex}"))
            }
            CommandExpectation::Matches(regex) => {
                CheckOutcome::failure(format!("Output `{stdout}` did not match {regex}"))
            }
            CommandExpectation::AtMost(max) => match stdout.parse::<i64>() {
                Ok(value) if value <= *max => CheckOutcome::success(format!("Command returned {value}")),
                Ok(value) => CheckOutcome::failure(format!("Command returned {value}, limit is {max}")),
                Err(_) => CheckOutcome::failure(format!("Command output `{stdout}` is not a number")),
            },
        };

        Ok(outcome)
    }
}
