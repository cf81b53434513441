/// Integration tests for the polling loop
///
/// These tests drive whole cycles through the orchestrator and check:
/// - Dependency ordering and skipping
/// - Alert emission and channel failures
/// - Sink gating and batching
/// - Reloads, remote updates and the pid file
use crate::alerting::{AlertChannel, AlertEvent, AlertKind};
use crate::config::Config;
use crate::error::DeliveryError;
use crate::orchestrator::{CycleReport, LaunchOptions, Orchestrator, RunState};
use crate::registry::Registry;
use crate::remote::{RemoteEntry, RemoteReport, RemoteSnapshot};
use anyhow::Result;
use serde_json::Value;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::{Duration, SystemTime};
use tempfile::tempdir;

/// Channel that refuses every event
struct BrokenChannel;

#[async_trait::async_trait]
impl AlertChannel for BrokenChannel {
    fn type_tag(&self) -> &'static str {
        "broken"
    }

    fn describe(&self) -> String {
        "Always fails".to_string()
    }

    async fn send(&self, _event: &AlertEvent) -> Result<(), DeliveryError> {
        Err(DeliveryError::Status(500))
    }
}

fn registry() -> Registry {
    let mut registry = Registry::builtin();
    registry.register_channel("broken", |o| {
        o.finish()?;
        Ok(Box::new(BrokenChannel))
    });
    registry
}

fn orchestrator(raw: &str) -> Result<Orchestrator> {
    let config = Config::from_toml(raw)?;
    Ok(Orchestrator::new(config, registry(), LaunchOptions::default())?)
}

fn read_json(path: &Path) -> Result<Value> {
    Ok(serde_json::from_slice(&std::fs::read(path)?)?)
}

fn touch(path: &Path, seconds: u64) -> Result<()> {
    let file = File::options().create(true).truncate(false).write(true).open(path)?;
    file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(seconds))?;
    Ok(())
}

async fn next_report(receiver: &tokio::net::TcpListener) -> Result<RemoteReport> {
    let (mut stream, _) = receiver.accept().await?;
    crate::remote::protocol::read_frame(&mut stream, b"secret")
        .await?
        .ok_or_else(|| anyhow::anyhow!("connection closed without a report"))
}

fn names(report: &CycleReport) -> (Vec<&str>, Vec<&str>, Vec<&str>) {
    (
        report.ran.iter().map(String::as_str).collect(),
        report.failed.iter().map(String::as_str).collect(),
        report.skipped.iter().map(String::as_str).collect(),
    )
}

#[tokio::test]
async fn test_dependents_of_failed_monitor_are_skipped() -> Result<()> {
    let mut orchestrator = orchestrator(
        r#"
[daemon]
interval = 60

[monitors.gateway]
type = "fail"

[monitors.web]
type = "null"
depend = ["gateway"]

[monitors.api]
type = "null"
depend = ["web"]

[monitors.other]
type = "null"
"#,
    )?;

    let report = orchestrator.run_cycle().await;
    let (ran, failed, skipped) = names(&report);

    assert_eq!(ran, vec!["gateway", "other"]);
    assert_eq!(failed, vec!["gateway"]);
    assert_eq!(skipped, vec!["web", "api"]);
    assert!(orchestrator.monitor("web").is_some_and(|m| m.state().last_run.is_none()));
    Ok(())
}

#[tokio::test]
async fn test_alert_raised_once_then_cleared() -> Result<()> {
    let dir = tempdir()?;
    let flag = dir.path().join("flag");
    let raw = format!(
        r#"
[daemon]
interval = 60

[monitors.flag]
type = "filestat"
filename = {:?}
tolerance = 1

[alerters.log]
type = "log"
"#,
        flag.display().to_string()
    );
    let mut orchestrator = orchestrator(&raw)?;

    assert!(orchestrator.run_cycle().await.alerts.is_empty());

    let report = orchestrator.run_cycle().await;
    assert_eq!(report.alerts.len(), 1);
    assert_eq!(report.alerts[0].kind, AlertKind::Failure);
    assert_eq!(report.alerts[0].virtual_fail_count, 2);

    assert!(orchestrator.run_cycle().await.alerts.is_empty());

    File::create(&flag)?;
    let report = orchestrator.run_cycle().await;
    assert_eq!(report.alerts.len(), 1);
    assert_eq!(report.alerts[0].kind, AlertKind::Success);
    assert!(report.alerts[0].failed_at.is_some());

    let state = orchestrator.monitor("flag").map(|m| m.state().clone()).unwrap_or_default();
    assert_eq!(state.consecutive_failures, 0);
    assert!(state.first_failure_time.is_none());
    Ok(())
}

#[tokio::test]
async fn test_broken_channel_does_not_stop_the_cycle() -> Result<()> {
    let dir = tempdir()?;
    let status = dir.path().join("status.json");
    let raw = format!(
        r#"
[daemon]
interval = 60

[monitors.down]
type = "fail"

[alerters.broken]
type = "broken"

[alerters.log]
type = "log"

[sinks.status]
type = "json"
filename = {:?}
"#,
        status.display().to_string()
    );
    let mut orchestrator = orchestrator(&raw)?;

    let report = orchestrator.run_cycle().await;
    assert_eq!(report.alerts.len(), 1);

    let broken = orchestrator.channels().iter().find(|slot| slot.name == "broken");
    assert!(broken.is_some_and(|slot| !slot.gate.is_available()));
    let log = orchestrator.channels().iter().find(|slot| slot.name == "log");
    assert!(log.is_some_and(|slot| slot.gate.is_available()));

    assert_eq!(read_json(&status)?["monitors"]["down"]["last_status"], "failure");
    Ok(())
}

#[tokio::test]
async fn test_sink_disconnected_while_dependency_fails() -> Result<()> {
    let dir = tempdir()?;
    let flag = dir.path().join("flag");
    let status = dir.path().join("status.json");
    let raw = format!(
        r#"
[daemon]
interval = 60

[monitors.uplink]
type = "filestat"
filename = {:?}

[monitors.local]
type = "null"

[sinks.status]
type = "json"
filename = {:?}
depend = ["uplink"]
"#,
        flag.display().to_string(),
        status.display().to_string()
    );
    let mut orchestrator = orchestrator(&raw)?;

    orchestrator.run_cycle().await;
    assert!(!status.exists());
    assert!(!orchestrator.sinks()[0].gate.is_connected());

    File::create(&flag)?;
    orchestrator.run_cycle().await;
    assert!(orchestrator.sinks()[0].gate.is_connected());

    let written = read_json(&status)?;
    assert_eq!(written["monitors"]["local"]["last_status"], "success");
    assert_eq!(written["monitors"]["uplink"]["last_status"], "success");
    Ok(())
}

#[tokio::test]
async fn test_groups_route_results() -> Result<()> {
    let dir = tempdir()?;
    let ops_log = dir.path().join("ops.log");
    let raw = format!(
        r#"
[daemon]
interval = 60

[monitors.db]
type = "null"
group = "ops"

[monitors.web]
type = "null"

[sinks.ops]
type = "logfile"
filename = {:?}
groups = ["ops"]
buffered = false
"#,
        ops_log.display().to_string()
    );
    let mut orchestrator = orchestrator(&raw)?;
    orchestrator.run_cycle().await;

    let contents = std::fs::read_to_string(&ops_log)?;
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with(" hostwatch starting"));
    assert!(lines[1].contains(" db: ok ("));
    Ok(())
}

#[tokio::test]
async fn test_gap_defers_monitor() -> Result<()> {
    let mut orchestrator = orchestrator(
        r#"
[daemon]
interval = 60

[monitors.slow]
type = "null"
gap = 3600

[monitors.fast]
type = "null"
"#,
    )?;

    assert_eq!(orchestrator.run_cycle().await.ran, vec!["fast", "slow"]);
    assert_eq!(orchestrator.run_cycle().await.ran, vec!["fast"]);
    Ok(())
}

#[tokio::test]
async fn test_batch_sinks_see_every_monitor() -> Result<()> {
    let dir = tempdir()?;
    let status = dir.path().join("status.json");
    let results = dir.path().join("results.log");
    let raw = format!(
        r#"
[daemon]
interval = 60

[monitors.gateway]
type = "fail"
gap = 3600

[monitors.web]
type = "null"
depend = ["gateway"]

[monitors.disk]
type = "null"
gap = 3600

[monitors.load]
type = "null"

[sinks.status]
type = "json"
filename = {:?}

[sinks.results]
type = "logfile"
filename = {:?}
buffered = false
"#,
        status.display().to_string(),
        results.display().to_string()
    );
    let mut orchestrator = orchestrator(&raw)?;
    orchestrator.run_cycle().await;

    let report = orchestrator.run_cycle().await;
    assert_eq!(report.ran, vec!["load"]);
    assert_eq!(report.skipped, vec!["web"]);

    let written = read_json(&status)?;
    let monitors = written["monitors"].as_object().map(|m| m.keys().cloned().collect::<Vec<_>>());
    let expected = ["disk", "gateway", "load", "web"].map(String::from).to_vec();
    assert_eq!(monitors, Some(expected));
    assert_eq!(written["monitors"]["disk"]["cycle_status"], "deferred");
    assert_eq!(written["monitors"]["disk"]["last_status"], "success");
    assert_eq!(written["monitors"]["gateway"]["cycle_status"], "deferred");
    assert_eq!(written["monitors"]["web"]["cycle_status"], "skipped");
    assert_eq!(written["monitors"]["load"]["cycle_status"], "ran");

    // header, three results from the first cycle, one from the second
    let contents = std::fs::read_to_string(&results)?;
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 5);
    assert!(lines[4].contains(" load: ok ("));
    Ok(())
}

#[tokio::test]
async fn test_check_timeout_is_failure() -> Result<()> {
    let mut orchestrator = orchestrator(
        r#"
[daemon]
interval = 60

[monitors.hang]
type = "command"
command = "sleep 10"
timeout = 1
"#,
    )?;

    let report = orchestrator.run_cycle().await;
    assert_eq!(report.failed, vec!["hang"]);
    let result = orchestrator.monitor("hang").map(|m| m.state().last_result.clone()).unwrap_or_default();
    assert!(result.contains("timed out"), "{result}");
    Ok(())
}

#[tokio::test]
async fn test_reload_keeps_state_of_unchanged_monitors() -> Result<()> {
    let base = r#"
[daemon]
interval = 60

[monitors.a]
type = "fail"
tolerance = 5

[monitors.b]
type = "fail"
tolerance = 5
"#;
    let mut orchestrator = orchestrator(base)?;
    orchestrator.run_cycle().await;
    orchestrator.run_cycle().await;

    let reloaded = Config::from_toml(
        r#"
[daemon]
interval = 30

[monitors.a]
type = "fail"
tolerance = 10

[monitors.b]
type = "null"

[monitors.c]
type = "null"
"#,
    )?;
    orchestrator.reload_with(reloaded)?;

    let failures = |name: &str| orchestrator.monitor(name).map(|m| m.state().consecutive_failures);
    assert_eq!(failures("a"), Some(2));
    assert_eq!(failures("b"), Some(0));
    assert_eq!(failures("c"), Some(0));
    assert_eq!(orchestrator.config().daemon.interval, 30);
    assert_eq!(orchestrator.state(), RunState::Starting);
    Ok(())
}

#[tokio::test]
async fn test_reload_file_triggers_reload_and_bad_config_is_kept_out() -> Result<()> {
    let dir = tempdir()?;
    let config_path = dir.path().join("config.toml");
    let hup = dir.path().join("reload");
    let good = format!(
        "[daemon]\ninterval = 60\nhup_file = {:?}\n\n[monitors.a]\ntype = \"null\"\n",
        hup.display().to_string()
    );
    std::fs::write(&config_path, &good)?;
    touch(&hup, 1_000)?;

    let launch = LaunchOptions { config_path: Some(config_path.clone()), ..LaunchOptions::default() };
    let config = Config::from_config(Some(&config_path))?;
    let mut orchestrator = Orchestrator::new(config, registry(), launch)?;

    // baseline
    orchestrator.run_cycle().await;

    std::fs::write(&config_path, "[daemon]\ninterval = 0\n")?;
    touch(&hup, 2_000)?;
    let report = orchestrator.run_cycle().await;
    assert_eq!(report.ran, vec!["a"]);
    assert_eq!(orchestrator.config().daemon.interval, 60);

    std::fs::write(&config_path, format!("{good}\n[monitors.b]\ntype = \"null\"\n"))?;
    touch(&hup, 3_000)?;
    let report = orchestrator.run_cycle().await;
    assert_eq!(report.ran, vec!["a", "b"]);

    // nothing touched since
    assert_eq!(orchestrator.run_cycle().await.ran, vec!["a", "b"]);
    Ok(())
}

#[tokio::test]
async fn test_reload_flag_triggers_reload() -> Result<()> {
    let dir = tempdir()?;
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, "[daemon]\ninterval = 60\n")?;

    let launch = LaunchOptions { config_path: Some(config_path.clone()), ..LaunchOptions::default() };
    let mut orchestrator = Orchestrator::new(Config::from_config(Some(&config_path))?, registry(), launch)?;
    assert!(orchestrator.run_cycle().await.ran.is_empty());

    std::fs::write(&config_path, "[daemon]\ninterval = 60\n[monitors.new]\ntype = \"null\"\n")?;
    orchestrator.reload_handle().store(true, Ordering::SeqCst);
    assert_eq!(orchestrator.run_cycle().await.ran, vec!["new"]);
    Ok(())
}

#[tokio::test]
async fn test_remote_reports_applied_at_cycle_end() -> Result<()> {
    let dir = tempdir()?;
    let status = dir.path().join("status.json");
    let raw = format!(
        "[daemon]\ninterval = 60\n\n[sinks.status]\ntype = \"json\"\nfilename = {:?}\n",
        status.display().to_string()
    );
    let mut orchestrator = orchestrator(&raw)?;

    let snapshot = |names: &[&str]| -> RemoteSnapshot {
        names
            .iter()
            .map(|name| {
                let entry = RemoteEntry { type_tag: "null".to_string(), attributes: Value::Null };
                (name.to_string(), entry)
            })
            .collect()
    };
    let queue = orchestrator.remote_queue();
    queue
        .send(RemoteReport { sender: "box2".into(), epoch: 7, sequence: 1, monitors: snapshot(&["x", "y"]) })
        .await?;

    let report = orchestrator.run_cycle().await;
    assert_eq!(report.remote_updates, 1);
    // the sink ran before the update was applied
    assert_eq!(read_json(&status)?["remote"], serde_json::json!({}));

    queue
        .send(RemoteReport { sender: "box2".into(), epoch: 7, sequence: 2, monitors: snapshot(&["x"]) })
        .await?;
    queue
        .send(RemoteReport { sender: "box2".into(), epoch: 7, sequence: 1, monitors: snapshot(&["old"]) })
        .await?;
    let report = orchestrator.run_cycle().await;
    assert_eq!(report.remote_updates, 1);

    let view = orchestrator.remote().view();
    assert_eq!(view["box2"].keys().collect::<Vec<_>>(), vec!["x"]);

    orchestrator.run_cycle().await;
    assert!(read_json(&status)?["remote"]["box2"]["x"].is_object());
    Ok(())
}

#[tokio::test]
async fn test_reports_stay_fresh_across_reloads() -> Result<()> {
    let receiver = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = receiver.local_addr()?;
    let raw = format!(
        "[daemon]\ninterval = 60\nhostname = \"box1\"\n\n[monitors.a]\ntype = \"null\"\n\n[sinks.upstream]\ntype = \"network\"\nhost = \"127.0.0.1\"\nport = {}\nkey = \"secret\"\n",
        addr.port()
    );
    let mut orchestrator = orchestrator(&raw)?;
    let store = crate::remote::RemoteStateStore::new();

    for _ in 0..3 {
        orchestrator.run_cycle().await;
        let report = next_report(&receiver).await?;
        assert!(store.replace_versioned(&report.sender, report.epoch, report.sequence, report.monitors));
    }

    orchestrator.reload_with(Config::from_toml(&raw)?)?;

    for expected in 4..6 {
        orchestrator.run_cycle().await;
        let report = next_report(&receiver).await?;
        assert_eq!(report.sequence, expected);
        assert!(store.replace_versioned(&report.sender, report.epoch, report.sequence, report.monitors));
    }
    Ok(())
}

#[tokio::test]
async fn test_run_writes_and_removes_pid_file() -> Result<()> {
    let dir = tempdir()?;
    let pidfile = dir.path().join("hostwatch.pid");
    let status = dir.path().join("status.json");
    let raw = format!(
        "[daemon]\ninterval = 3600\npidfile = {:?}\n\n[monitors.a]\ntype = \"null\"\n\n[sinks.status]\ntype = \"json\"\nfilename = {:?}\n",
        pidfile.display().to_string(),
        status.display().to_string()
    );
    let mut orchestrator = orchestrator(&raw)?;
    orchestrator.start().await?;
    assert_eq!(orchestrator.state(), RunState::Running);
    assert_eq!(std::fs::read_to_string(&pidfile)?.trim(), std::process::id().to_string());

    // first tick fires at once, the stop request is seen before the second
    orchestrator.run(tokio::time::sleep(Duration::from_millis(200))).await?;

    assert!(!pidfile.exists());
    assert_eq!(read_json(&status)?["monitors"]["a"]["last_status"], "success");
    Ok(())
}

#[tokio::test]
async fn test_stop_before_first_cycle() -> Result<()> {
    let dir = tempdir()?;
    let pidfile = dir.path().join("hostwatch.pid");
    let raw = format!("[daemon]\ninterval = 60\npidfile = {:?}\n", pidfile.display().to_string());

    orchestrator(&raw)?.run(std::future::ready(())).await?;
    assert!(!pidfile.exists());
    Ok(())
}

#[tokio::test]
async fn test_listener_feeds_remote_store() -> Result<()> {
    let reserved = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = reserved.local_addr()?;
    drop(reserved);

    let raw = format!("[daemon]\ninterval = 60\n\n[daemon.remote]\nlisten = \"{addr}\"\nkey = \"secret\"\n");
    let mut orchestrator = orchestrator(&raw)?;
    orchestrator.start().await?;

    let mut stream = tokio::net::TcpStream::connect(addr).await?;
    let report = RemoteReport { sender: "box9".into(), epoch: 1, sequence: 1, monitors: RemoteSnapshot::new() };
    crate::remote::protocol::write_frame(&mut stream, &report, b"secret").await?;

    let mut applied = 0;
    for _ in 0..50 {
        applied += orchestrator.run_cycle().await.remote_updates;
        if applied > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(applied, 1);
    assert!(orchestrator.remote().view().contains_key("box9"));

    orchestrator.stop()?;
    Ok(())
}
