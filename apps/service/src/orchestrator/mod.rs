/// Orchestrator module - the polling loop that ties everything together
///
/// Each cycle, in order:
/// - Reload the configuration if the reload file was touched or SIGHUP seen
/// - Run every due monitor, dependencies first
/// - Send alert events to the channels that admit them
/// - Deliver results to sinks, one batch per sink
/// - Apply reports received from other instances
///
/// Stop requests are only honoured between cycles.

#[cfg(test)]
mod tests;

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::alerting::AlertEvent;
use crate::alerting::decision::Decision;
use crate::config::Config;
use crate::error::{ConfigError, LifecycleError};
use crate::lifecycle::{PidFile, ReloadTrigger};
use crate::monitoring::scheduler::cycle_interval;
use crate::monitoring::{CycleStatus, Monitor, MonitorSnapshot};
use crate::registry::{ChannelSlot, Components, Registry, SinkSlot};
use crate::remote::{QUEUE_CAPACITY, RemoteListener, RemoteReport, RemoteStateStore};
use crate::sinks::SinkContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Starting,
    Running,
    Reloading,
    Stopping,
}

/// Command-line settings that take precedence over every loaded config
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Where reloads read the configuration from
    pub config_path: Option<PathBuf>,
    pub pidfile: Option<PathBuf>,
    pub hup_file: Option<PathBuf>,
}

impl LaunchOptions {
    pub fn apply(&self, config: &mut Config) {
        if let Some(pidfile) = &self.pidfile {
            config.daemon.pidfile = Some(pidfile.clone());
        }
        if let Some(hup_file) = &self.hup_file {
            config.daemon.hup_file = Some(hup_file.clone());
        }
    }
}

/// What happened during one cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub ran: Vec<String>,
    pub failed: Vec<String>,
    /// Not run because a dependency failed or was skipped
    pub skipped: Vec<String>,
    pub alerts: Vec<AlertEvent>,
    pub remote_updates: usize,
}

impl CycleReport {
    pub fn all_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Orchestrator {
    state: RunState,
    config: Config,
    launch: LaunchOptions,
    registry: Registry,
    context: SinkContext,
    monitors: Vec<Monitor>,
    channels: Vec<ChannelSlot>,
    sinks: Vec<SinkSlot>,
    remote_tx: mpsc::Sender<RemoteReport>,
    remote_rx: mpsc::Receiver<RemoteReport>,
    listener: Option<JoinHandle<()>>,
    reload_trigger: Option<ReloadTrigger>,
    reload_requested: Arc<AtomicBool>,
    pidfile: Option<PidFile>,
}

fn resolve_hostname(configured: Option<&str>) -> String {
    configured
        .map(str::to_string)
        .or_else(|| hostname::get().ok().and_then(|name| name.into_string().ok()))
        .unwrap_or_else(|| "localhost".to_string())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

impl Orchestrator {
    /// Build every component from `config`. Nothing runs until [`start`].
    ///
    /// [`start`]: Orchestrator::start
    pub fn new(config: Config, registry: Registry, launch: LaunchOptions) -> Result<Self, ConfigError> {
        let context = SinkContext {
            hostname: resolve_hostname(config.daemon.hostname.as_deref()),
            epoch: unix_now(),
            sequence: Arc::new(AtomicU64::new(0)),
            remote: Arc::new(RemoteStateStore::new()),
        };
        let Components { monitors, channels, sinks } = registry.build(&config, &context)?;
        let (remote_tx, remote_rx) = mpsc::channel(QUEUE_CAPACITY);
        let reload_trigger = config.daemon.hup_file.as_ref().map(ReloadTrigger::new);

        Ok(Self {
            state: RunState::Starting,
            config,
            launch,
            registry,
            context,
            monitors,
            channels,
            sinks,
            remote_tx,
            remote_rx,
            listener: None,
            reload_trigger,
            reload_requested: Arc::new(AtomicBool::new(false)),
            pidfile: None,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Monitors in the order they run
    pub fn monitors(&self) -> &[Monitor] {
        &self.monitors
    }

    pub fn monitor(&self, name: &str) -> Option<&Monitor> {
        self.monitors.iter().find(|monitor| monitor.name() == name)
    }

    pub fn snapshots(&self) -> Vec<MonitorSnapshot> {
        self.monitors.iter().map(Monitor::snapshot).collect()
    }

    pub fn channels(&self) -> &[ChannelSlot] {
        &self.channels
    }

    pub fn sinks(&self) -> &[SinkSlot] {
        &self.sinks
    }

    pub fn remote(&self) -> &Arc<RemoteStateStore> {
        &self.context.remote
    }

    /// Queue feeding remote reports into the next cycle
    pub fn remote_queue(&self) -> mpsc::Sender<RemoteReport> {
        self.remote_tx.clone()
    }

    /// Setting this flag reloads the configuration at the next cycle
    pub fn reload_handle(&self) -> Arc<AtomicBool> {
        self.reload_requested.clone()
    }

    /// Write the pid file and start the remote listener
    pub async fn start(&mut self) -> Result<(), LifecycleError> {
        if let Some(path) = &self.config.daemon.pidfile {
            self.pidfile = Some(PidFile::create(path)?);
        }

        if let Some(settings) = &self.config.daemon.remote {
            let listener = RemoteListener::bind(settings).await?;
            self.listener = Some(listener.spawn(self.remote_tx.clone()));
        }

        self.warn_if_unalerted();
        self.state = RunState::Running;
        info!(
            target: "hostwatch::lifecycle",
            monitors = self.monitors.len(),
            alerters = self.channels.len(),
            sinks = self.sinks.len(),
            "Started on {}",
            self.context.hostname
        );
        Ok(())
    }

    fn warn_if_unalerted(&self) {
        let reports_remotely = self.sinks.iter().any(|slot| slot.coordinator.sink().type_tag() == "network");
        if self.channels.is_empty() && !reports_remotely {
            warn!(
                target: "hostwatch::lifecycle",
                "No alerters defined and no remote reporting; failures will not be noticed"
            );
        }
    }

    fn reload_due(&mut self) -> bool {
        let signalled = self.reload_requested.swap(false, Ordering::SeqCst);
        let touched = self.reload_trigger.as_mut().is_some_and(ReloadTrigger::check);
        signalled || touched
    }

    /// Swap in a new configuration. Monitors keeping their name and type
    /// keep their run state. On error the running configuration is untouched.
    pub fn reload_with(&mut self, mut config: Config) -> Result<(), ConfigError> {
        let previous = self.state;
        self.state = RunState::Reloading;
        self.launch.apply(&mut config);

        let mut context = self.context.clone();
        context.hostname = resolve_hostname(config.daemon.hostname.as_deref());

        let components = match self.registry.build(&config, &context) {
            Ok(components) => components,
            Err(e) => {
                self.state = previous;
                return Err(e);
            }
        };
        let Components { mut monitors, channels, sinks } = components;

        let mut old: HashMap<String, Monitor> =
            self.monitors.drain(..).map(|monitor| (monitor.name().to_string(), monitor)).collect();
        let mut kept = 0;
        for monitor in &mut monitors {
            if let Some(replaced) = old.remove(monitor.name()) {
                if monitor.same_identity(&replaced) {
                    monitor.inherit_state(replaced);
                    kept += 1;
                }
            }
        }

        if config.daemon.hup_file != self.config.daemon.hup_file {
            self.reload_trigger = config.daemon.hup_file.as_ref().map(ReloadTrigger::new);
        }
        if config.daemon.remote.as_ref().map(|r| r.listen) != self.config.daemon.remote.as_ref().map(|r| r.listen) {
            warn!(target: "hostwatch::lifecycle", "Remote listener changes take effect after a restart");
        }

        info!(
            target: "hostwatch::lifecycle",
            monitors = monitors.len(),
            kept_state = kept,
            "Reloaded configuration"
        );

        self.monitors = monitors;
        self.channels = channels;
        self.sinks = sinks;
        self.context = context;
        self.config = config;
        self.state = previous;
        Ok(())
    }

    fn reload_from_disk(&mut self) {
        let Some(path) = self.launch.config_path.clone() else {
            warn!(target: "hostwatch::lifecycle", "Reload requested but the daemon was not started from a config file");
            return;
        };
        info!(target: "hostwatch::lifecycle", "Reloading configuration from {}", path.display());

        let result = Config::from_config(Some(&path)).and_then(|config| self.reload_with(config));
        if let Err(e) = result {
            error!(target: "hostwatch::lifecycle", "Reload failed, keeping the running configuration: {e}");
        }
    }

    /// One full polling cycle
    pub async fn run_cycle(&mut self) -> CycleReport {
        if self.reload_due() {
            self.reload_from_disk();
        }

        let mut report = CycleReport::default();
        let now = Instant::now();

        // Failing monitors, whether or not they ran this cycle
        let mut failing: BTreeSet<String> = BTreeSet::new();
        // Failing or skipped: dependents of these are skipped
        let mut blocked: BTreeSet<String> = BTreeSet::new();
        let mut evaluated: Vec<(usize, Decision)> = Vec::new();

        for (index, monitor) in self.monitors.iter_mut().enumerate() {
            let name = monitor.name().to_string();

            if let Some(dependency) = monitor.settings().dependencies.iter().find(|d| blocked.contains(*d)) {
                debug!(monitor = %name, "Skipping, dependency {dependency} is down");
                monitor.pass_over(CycleStatus::Skipped);
                blocked.insert(name.clone());
                report.skipped.push(name);
                continue;
            }

            if !monitor.is_due(now) {
                monitor.pass_over(CycleStatus::Deferred);
                if monitor.state().is_failing() {
                    failing.insert(name.clone());
                    blocked.insert(name);
                }
                continue;
            }

            let outcome = monitor.run(now).await;
            let decision = monitor.record(&outcome);
            debug!(monitor = %name, status = %outcome.status, "{}", outcome.message);

            if !outcome.is_success() {
                failing.insert(name.clone());
                blocked.insert(name.clone());
                report.failed.push(name.clone());
            }
            report.ran.push(name);
            evaluated.push((index, decision));
        }

        for slot in &mut self.channels {
            slot.gate.reset_cycle(&failing);
        }
        for slot in &mut self.sinks {
            slot.gate.reset_cycle(&failing);
        }

        self.send_alerts(&evaluated, &mut report).await;

        let ran: Vec<MonitorSnapshot> =
            evaluated.iter().map(|(index, _)| self.monitors[*index].snapshot()).collect();
        let all = self.snapshots();
        self.deliver_to_sinks(&ran, &all);

        report.remote_updates = self.apply_remote_updates();

        debug!(
            ran = report.ran.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            alerts = report.alerts.len(),
            remote_updates = report.remote_updates,
            "Cycle complete"
        );
        report
    }

    async fn send_alerts(&mut self, evaluated: &[(usize, Decision)], report: &mut CycleReport) {
        let now = Utc::now();
        for (index, decision) in evaluated {
            let monitor = &self.monitors[*index];
            let Some(event) = AlertEvent::from_decision(monitor, decision, &self.context.hostname, now) else {
                continue;
            };

            for slot in &mut self.channels {
                if !slot.gate.accepts(&event.group) {
                    continue;
                }
                if let Err(e) = slot.channel.send(&event).await {
                    error!(
                        target: "hostwatch::alert",
                        alerter = %slot.name,
                        "Failed to send {} alert for {}: {e}",
                        event.kind,
                        event.monitor
                    );
                    slot.gate.mark_unavailable();
                }
            }
            report.alerts.push(event);
        }
    }

    /// Batch sinks see every monitor, so a full-replace consumer keeps
    /// skipped and deferred ones. Other sinks only see what ran.
    fn deliver_to_sinks(&mut self, ran: &[MonitorSnapshot], all: &[MonitorSnapshot]) {
        for slot in &mut self.sinks {
            let name = slot.name().to_string();
            if !slot.gate.is_connected() {
                debug!(target: "hostwatch::sink", sink = %name, "Dependency failed, skipping this cycle");
                continue;
            }

            let snapshots = if slot.coordinator.sink().supports_batch() { all } else { ran };

            let mut scope = slot.coordinator.scope();
            for snapshot in snapshots {
                if !slot.gate.accepts(&snapshot.group) {
                    continue;
                }
                if let Err(e) = scope.deliver(snapshot) {
                    error!(target: "hostwatch::sink", sink = %name, "Failed to save result for {}: {e}", snapshot.name);
                    slot.gate.mark_unavailable();
                    break;
                }
            }
            if let Err(e) = scope.finish() {
                error!(target: "hostwatch::sink", sink = %name, "Failed to process batch: {e}");
                slot.gate.mark_unavailable();
            }
        }
    }

    fn apply_remote_updates(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(update) = self.remote_rx.try_recv() {
            let RemoteReport { sender, epoch, sequence, monitors } = update;
            let count = monitors.len();
            if self.context.remote.replace_versioned(&sender, epoch, sequence, monitors) {
                debug!(target: "hostwatch::remote", %sender, monitors = count, "Applied remote snapshot");
                applied += 1;
            } else {
                debug!(target: "hostwatch::remote", %sender, epoch, sequence, "Ignoring stale remote snapshot");
            }
        }
        applied
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.daemon.interval)
    }

    /// Run cycles until `shutdown` resolves, then stop cleanly
    pub async fn run<F>(mut self, shutdown: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()>,
    {
        if self.state == RunState::Starting {
            self.start().await?;
        }

        tokio::pin!(shutdown);
        let mut period = self.interval();
        let mut ticker = cycle_interval(period);

        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            self.run_cycle().await;

            if self.interval() != period {
                period = self.interval();
                ticker = cycle_interval(period);
                ticker.reset();
                info!(target: "hostwatch::lifecycle", "Polling every {}s", period.as_secs());
            }
        }

        self.stop()
    }

    /// Stop the listener and remove the pid file
    pub fn stop(&mut self) -> Result<(), LifecycleError> {
        self.state = RunState::Stopping;
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        if let Some(pidfile) = self.pidfile.take() {
            pidfile.remove()?;
        }
        info!(target: "hostwatch::lifecycle", "Stopped");
        Ok(())
    }
}
