//! Type tag to constructor maps for checks, alert channels and sinks.

use std::collections::HashMap;
use std::time::Duration;

use crate::alerting::AlertChannel;
use crate::alerting::log::LogChannel;
use crate::alerting::slack::SlackChannel;
use crate::config::{Config, MonitorEntry, OptionReader, ParticipantEntry};
use crate::error::{ConfigError, FieldError};
use crate::gate::Gate;
use crate::monitoring::checker::{FailCheck, HttpCheck, NullCheck, TcpCheck};
use crate::monitoring::host::{CommandCheck, DiskSpaceCheck, FileStatCheck};
use crate::monitoring::scheduler::dependency_order;
use crate::monitoring::{Check, Monitor, MonitorSettings};
use crate::sinks::file::LogFileSink;
use crate::sinks::json::JsonSink;
use crate::sinks::network::NetworkSink;
use crate::sinks::{BatchCoordinator, ResultSink, SinkContext};

pub type CheckFactory = fn(&mut OptionReader<'_>) -> Result<Box<dyn Check>, ConfigError>;
pub type ChannelFactory = fn(&mut OptionReader<'_>) -> Result<Box<dyn AlertChannel>, ConfigError>;
pub type SinkFactory =
    fn(&mut OptionReader<'_>, &SinkContext) -> Result<Box<dyn ResultSink>, ConfigError>;

/// An alert channel with its routing
pub struct ChannelSlot {
    pub name: String,
    pub gate: Gate,
    pub channel: Box<dyn AlertChannel>,
}

/// A sink with its routing and batch state
pub struct SinkSlot {
    pub gate: Gate,
    pub coordinator: BatchCoordinator,
}

impl SinkSlot {
    pub fn name(&self) -> &str {
        self.coordinator.name()
    }
}

/// Everything built from one configuration
pub struct Components {
    /// Dependencies first
    pub monitors: Vec<Monitor>,
    pub channels: Vec<ChannelSlot>,
    pub sinks: Vec<SinkSlot>,
}

pub struct Registry {
    checks: HashMap<&'static str, CheckFactory>,
    channels: HashMap<&'static str, ChannelFactory>,
    sinks: HashMap<&'static str, SinkFactory>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Registry {
    pub fn empty() -> Self {
        Self { checks: HashMap::new(), channels: HashMap::new(), sinks: HashMap::new() }
    }

    /// Every check, channel and sink shipped with the daemon
    pub fn builtin() -> Self {
        let mut registry = Self::empty();

        registry.register_check("null", |o| Ok(Box::new(NullCheck::from_options(o)?)));
        registry.register_check("fail", |o| Ok(Box::new(FailCheck::from_options(o)?)));
        registry.register_check("tcp", |o| Ok(Box::new(TcpCheck::from_options(o)?)));
        registry.register_check("http", |o| Ok(Box::new(HttpCheck::from_options(o)?)));
        registry.register_check("diskspace", |o| Ok(Box::new(DiskSpaceCheck::from_options(o)?)));
        registry.register_check("filestat", |o| Ok(Box::new(FileStatCheck::from_options(o)?)));
        registry.register_check("command", |o| Ok(Box::new(CommandCheck::from_options(o)?)));

        registry.register_channel("log", |o| Ok(Box::new(LogChannel::from_options(o)?)));
        registry.register_channel("slack", |o| Ok(Box::new(SlackChannel::from_options(o)?)));

        registry.register_sink("logfile", |o, _| Ok(Box::new(LogFileSink::from_options(o)?)));
        registry.register_sink("json", |o, c| Ok(Box::new(JsonSink::from_options(o, c)?)));
        registry.register_sink("network", |o, c| Ok(Box::new(NetworkSink::from_options(o, c)?)));

        registry
    }

    pub fn register_check(&mut self, tag: &'static str, factory: CheckFactory) {
        self.checks.insert(tag, factory);
    }

    pub fn register_channel(&mut self, tag: &'static str, factory: ChannelFactory) {
        self.channels.insert(tag, factory);
    }

    pub fn register_sink(&mut self, tag: &'static str, factory: SinkFactory) {
        self.sinks.insert(tag, factory);
    }

    /// Build every component, reporting all field errors at once
    pub fn build(&self, config: &Config, context: &SinkContext) -> Result<Components, ConfigError> {
        let mut errors = Vec::new();

        let order = dependency_order(&config.monitors).map_err(|cycle| {
            FieldError::new("monitors", "depend", format!("dependency cycle: {}", cycle.join(" -> ")))
        })?;

        let mut monitors = Vec::with_capacity(order.len());
        for name in order {
            let entry = &config.monitors[&name];
            let component = format!("monitors.{name}");
            let Some(factory) = self.checks.get(entry.kind.as_str()) else {
                errors.push(unknown_type(&component, "monitor", &entry.kind));
                continue;
            };
            let mut options = OptionReader::new(&component, &entry.options);
            match factory(&mut options) {
                Ok(check) => monitors.push(Monitor::new(name, monitor_settings(entry), check)),
                Err(e) => absorb(&mut errors, &component, e),
            }
        }

        let mut channels = Vec::with_capacity(config.alerters.len());
        for (name, entry) in &config.alerters {
            let component = format!("alerters.{name}");
            let Some(factory) = self.channels.get(entry.kind.as_str()) else {
                errors.push(unknown_type(&component, "alerter", &entry.kind));
                continue;
            };
            let mut options = OptionReader::new(&component, &entry.options);
            match factory(&mut options) {
                Ok(channel) => channels.push(ChannelSlot {
                    name: name.clone(),
                    gate: Gate::from_entry(entry),
                    channel,
                }),
                Err(e) => absorb(&mut errors, &component, e),
            }
        }

        let mut sinks = Vec::with_capacity(config.sinks.len());
        for (name, entry) in &config.sinks {
            let component = format!("sinks.{name}");
            let Some(factory) = self.sinks.get(entry.kind.as_str()) else {
                errors.push(unknown_type(&component, "sink", &entry.kind));
                continue;
            };
            let mut options = OptionReader::new(&component, &entry.options);
            match factory(&mut options, context) {
                Ok(sink) => sinks.push(sink_slot(name, entry, sink)),
                Err(e) => absorb(&mut errors, &component, e),
            }
        }

        if errors.is_empty() {
            Ok(Components { monitors, channels, sinks })
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

fn monitor_settings(entry: &MonitorEntry) -> MonitorSettings {
    MonitorSettings {
        tolerance: entry.tolerance,
        dependencies: entry.depend.iter().cloned().collect(),
        group: entry.group.clone(),
        gap: Duration::from_secs(entry.gap),
        timeout: Duration::from_secs(entry.timeout),
    }
}

fn sink_slot(name: &str, entry: &ParticipantEntry, sink: Box<dyn ResultSink>) -> SinkSlot {
    SinkSlot { gate: Gate::from_entry(entry), coordinator: BatchCoordinator::new(name, sink) }
}

fn unknown_type(component: &str, what: &str, kind: &str) -> FieldError {
    FieldError::new(component, "type", format!("unknown {what} type `{kind}`"))
}

fn absorb(errors: &mut Vec<FieldError>, component: &str, error: ConfigError) {
    match error {
        ConfigError::Invalid(fields) => errors.extend(fields),
        other => errors.push(FieldError::new(component, "type", other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteStateStore;
    use std::sync::Arc;

    fn context() -> SinkContext {
        SinkContext {
            hostname: "box1".to_string(),
            epoch: 1,
            sequence: Arc::default(),
            remote: Arc::new(RemoteStateStore::new()),
        }
    }

    #[test]
    fn test_builds_in_dependency_order() {
        let config = Config::from_toml(
            r#"
[daemon]
interval = 30

[monitors.web]
type = "tcp"
host = "localhost"
port = 80
depend = ["gateway"]
tolerance = 2
gap = 120

[monitors.gateway]
type = "null"

[alerters.ops]
type = "log"
groups = ["ops"]
"#,
        )
        .unwrap();

        let components = Registry::builtin().build(&config, &context()).unwrap();
        let names: Vec<&str> = components.monitors.iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["gateway", "web"]);

        let web = &components.monitors[1];
        assert_eq!(web.type_tag(), "tcp");
        assert_eq!(web.settings().tolerance, 2);
        assert_eq!(web.settings().gap, Duration::from_secs(120));
        assert!(web.settings().dependencies.contains("gateway"));

        assert_eq!(components.channels[0].name, "ops");
        assert!(components.channels[0].gate.groups().contains("ops"));
    }

    #[test]
    fn test_reports_every_broken_component() {
        let config = Config::from_toml(
            r#"
[daemon]
interval = 30

[monitors.disk]
type = "diskspace"
partition = "/"
limit = "lots"

[monitors.mystery]
type = "teleport"

[alerters.chat]
type = "slack"

[sinks.out]
type = "logfile"
filename = "/tmp/hostwatch-registry-test.log"
colour = "red"
"#,
        )
        .unwrap();

        let err = Registry::builtin().build(&config, &context()).err().unwrap();
        let fields: Vec<(&str, &str)> = err
            .field_errors()
            .iter()
            .map(|e| (e.component.as_str(), e.field.as_str()))
            .collect();

        assert_eq!(
            fields,
            vec![
                ("monitors.disk", "limit"),
                ("monitors.mystery", "type"),
                ("alerters.chat", "url"),
                ("sinks.out", "colour"),
            ]
        );
    }

    #[test]
    fn test_custom_check_registration() {
        let mut registry = Registry::empty();
        registry.register_check("always-ok", |o| Ok(Box::new(NullCheck::from_options(o)?)));

        let config = Config::from_toml("[daemon]\ninterval = 5\n[monitors.a]\ntype = \"always-ok\"\n").unwrap();
        let components = registry.build(&config, &context()).unwrap();
        assert_eq!(components.monitors.len(), 1);
    }
}
