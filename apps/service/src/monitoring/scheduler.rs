use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior, interval};

use crate::config::MonitorEntry;

/// Order monitor names so that every monitor comes after the monitors it
/// depends on. Ties are broken by name, so the order is stable across runs.
///
/// On a cycle the error holds the names along the cycle, first name
/// repeated at the end.
pub fn dependency_order(monitors: &BTreeMap<String, MonitorEntry>) -> Result<Vec<String>, Vec<String>> {
    let mut pending: BTreeMap<&str, BTreeSet<&str>> = monitors
        .iter()
        .map(|(name, entry)| {
            let known = entry
                .depend
                .iter()
                .map(String::as_str)
                .filter(|dependency| monitors.contains_key(*dependency))
                .collect();
            (name.as_str(), known)
        })
        .collect();

    let mut order = Vec::with_capacity(monitors.len());

    loop {
        let ready: Vec<&str> = pending
            .iter()
            .filter(|(_, dependencies)| dependencies.is_empty())
            .map(|(name, _)| *name)
            .collect();

        if ready.is_empty() {
            break;
        }

        for name in ready {
            pending.remove(name);
            for dependencies in pending.values_mut() {
                dependencies.remove(name);
            }
            order.push(name.to_string());
        }
    }

    if pending.is_empty() { Ok(order) } else { Err(find_cycle(&pending)) }
}

/// Walk dependencies among the leftover nodes until a name repeats
fn find_cycle(pending: &BTreeMap<&str, BTreeSet<&str>>) -> Vec<String> {
    let mut path: Vec<&str> = Vec::new();
    let mut current = pending.keys().next().copied();

    while let Some(name) = current {
        if let Some(start) = path.iter().position(|seen| *seen == name) {
            let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
            cycle.push(name.to_string());
            return cycle;
        }
        path.push(name);
        current = pending.get(name).and_then(|dependencies| dependencies.iter().next().copied());
    }

    path.into_iter().map(str::to_string).collect()
}

/// Ticker for the polling loop. Time spent running a cycle counts towards
/// the next tick, and an overrunning cycle delays the schedule instead of
/// firing a burst of catch-up ticks.
pub fn cycle_interval(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
