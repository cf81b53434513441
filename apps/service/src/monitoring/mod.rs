/// Monitoring module - configured monitors and the checks they run
///
/// This module is responsible for:
/// - The `Check` trait and the built-in check types
/// - Per-monitor run state and alert decisions
/// - Ordering monitors by their dependencies
pub mod checker;
pub mod host;
pub mod monitor;
pub mod scheduler;
pub mod types;

pub use checker::Check;
pub use monitor::{CycleStatus, Monitor, MonitorSettings, MonitorSnapshot, MonitorState};
pub use types::{CheckOutcome, CheckStatus};
