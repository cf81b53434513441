pub mod options;

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, FieldError};
use crate::monitoring::scheduler::dependency_order;

pub use options::OptionReader;

pub const DEFAULT_GROUP: &str = "default";

/// Top-level daemon configuration as read from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub daemon: DaemonSettings,
    #[serde(default)]
    pub monitors: BTreeMap<String, MonitorEntry>,
    #[serde(default)]
    pub alerters: BTreeMap<String, ParticipantEntry>,
    #[serde(default)]
    pub sinks: BTreeMap<String, ParticipantEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonSettings {
    /// Seconds between polling cycles
    pub interval: u64,
    #[serde(default)]
    pub pidfile: Option<path::PathBuf>,
    /// Touching this file makes the daemon reload its configuration
    #[serde(default)]
    pub hup_file: Option<path::PathBuf>,
    /// Identity used when reporting to other instances
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub remote: Option<RemoteListenerSettings>,
}

/// Accept snapshots from other instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteListenerSettings {
    pub listen: SocketAddr,
    /// Shared secret used to authenticate frames
    pub key: String,
}

/// `[monitors.<name>]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorEntry {
    #[serde(rename = "type")]
    pub kind: String,
    /// Failing runs tolerated before an alert is raised
    #[serde(default)]
    pub tolerance: u32,
    #[serde(default)]
    pub depend: Vec<String>,
    #[serde(default = "default_group")]
    pub group: String,
    /// Minimum seconds between two runs of this monitor
    #[serde(default)]
    pub gap: u64,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(flatten)]
    pub options: toml::Table,
}

/// `[alerters.<name>]` and `[sinks.<name>]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantEntry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub depend: Vec<String>,
    #[serde(default = "default_groups")]
    pub groups: Vec<String>,
    #[serde(flatten)]
    pub options: toml::Table,
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

fn default_groups() -> Vec<String> {
    vec![DEFAULT_GROUP.to_string()]
}

fn default_timeout() -> u64 {
    30
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/hostwatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::PathUnavailable);
    };

    Ok(path.join("hostwatch/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let write_2 = write_indented(2);
        let or_none = |value: Option<String>| value.unwrap_or_else(|| "none".to_string());

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Daemon")?;
        write_1(f, "Interval", &format!("{}s", self.daemon.interval))?;
        write_1(f, "Pid File", &or_none(self.daemon.pidfile.as_ref().map(|p| p.display().to_string())))?;
        write_1(f, "Reload File", &or_none(self.daemon.hup_file.as_ref().map(|p| p.display().to_string())))?;
        write_1(f, "Remote Listener", &or_none(self.daemon.remote.as_ref().map(|r| r.listen.to_string())))?;

        write_title_1(f, "Monitors")?;
        for (name, entry) in &self.monitors {
            write_1(f, name, &entry.kind)?;
            write_2(f, "Group", &entry.group)?;
            write_2(f, "Tolerance", &entry.tolerance)?;
            if !entry.depend.is_empty() {
                write_2(f, "Depends On", &entry.depend.join(", "))?;
            }
        }

        for (title, participants) in [("Alerters", &self.alerters), ("Sinks", &self.sinks)] {
            write_title_1(f, title)?;
            for (name, entry) in participants {
                write_1(f, name, &entry.kind)?;
                write_2(f, "Groups", &entry.groups.join(", "))?;
                if !entry.depend.is_empty() {
                    write_2(f, "Depends On", &entry.depend.join(", "))?;
                }
            }
        }

        Ok(())
    }
}

impl Config {
    /// Read and validate a config file
    ///
    /// Falls back to ~/.config/hostwatch/config.toml when no path is given.
    /// A missing file is an error: there is nothing sensible to monitor by
    /// default.
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let raw_string = fs::read_to_string(&config_path)
            .map_err(|source| ConfigError::Read { path: config_path.clone(), source })?;

        let config: Self = toml::from_str(&raw_string)
            .map_err(|source| ConfigError::Parse { path: config_path, source })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate config text that did not come from a file
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path::PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks that span components: intervals, dependency
    /// references and group names. Type-specific keys are checked when the
    /// registry builds each component.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.daemon.interval == 0 {
            errors.push(FieldError::new("daemon", "interval", "must be greater than zero"));
        }
        if let Some(remote) = &self.daemon.remote {
            if remote.key.is_empty() {
                errors.push(FieldError::new("daemon.remote", "key", "must not be empty"));
            }
        }

        let monitor_names: BTreeSet<&str> = self.monitors.keys().map(String::as_str).collect();

        for (name, entry) in &self.monitors {
            let component = format!("monitors.{name}");
            if entry.group.trim().is_empty() {
                errors.push(FieldError::new(&component, "group", "must not be empty"));
            }
            for dependency in &entry.depend {
                if dependency == name {
                    errors.push(FieldError::new(&component, "depend", "a monitor cannot depend on itself"));
                } else if !monitor_names.contains(dependency.as_str()) {
                    errors.push(FieldError::new(
                        &component,
                        "depend",
                        format!("unknown monitor `{dependency}`"),
                    ));
                }
            }
        }

        for (section, participants) in [("alerters", &self.alerters), ("sinks", &self.sinks)] {
            for (name, entry) in participants {
                let component = format!("{section}.{name}");
                if entry.groups.is_empty() || entry.groups.iter().any(|g| g.trim().is_empty()) {
                    errors.push(FieldError::new(&component, "groups", "group names must not be empty"));
                }
                for dependency in &entry.depend {
                    if !monitor_names.contains(dependency.as_str()) {
                        errors.push(FieldError::new(
                            &component,
                            "depend",
                            format!("unknown monitor `{dependency}`"),
                        ));
                    }
                }
            }
        }

        // Cycles only make sense to look for once every reference resolves
        if errors.is_empty() {
            if let Err(cycle) = dependency_order(&self.monitors) {
                errors.push(FieldError::new(
                    format!("monitors.{}", cycle.first().map(String::as_str).unwrap_or_default()),
                    "depend",
                    format!("dependency cycle: {}", cycle.join(" -> ")),
                ));
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(ConfigError::Invalid(errors)) }
    }
}
