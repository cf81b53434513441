//! hostwatch: a host monitoring daemon.
//!
//! Monitors run once per cycle in dependency order. Alert channels hear
//! about failure runs that cross their tolerance and about recoveries.
//! Sinks record every result, and instances can report their monitors to
//! each other over an authenticated TCP link.

pub mod alerting;
pub mod config;
pub mod crypto;
pub mod error;
pub mod gate;
pub mod lifecycle;
pub mod monitoring;
pub mod orchestrator;
pub mod registry;
pub mod remote;
pub mod sinks;
pub mod units;

pub use config::Config;
pub use orchestrator::{LaunchOptions, Orchestrator};
pub use registry::Registry;
