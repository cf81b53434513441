use tracing::{info, warn};

use super::{AlertChannel, AlertEvent, AlertKind, format_time};
use crate::config::OptionReader;
use crate::error::{ConfigError, DeliveryError};

/// Writes alerts to the daemon's own log
pub struct LogChannel;

impl LogChannel {
    pub fn from_options(options: &mut OptionReader<'_>) -> Result<Self, ConfigError> {
        options.finish()?;
        Ok(Self)
    }
}

#[async_trait::async_trait]
impl AlertChannel for LogChannel {
    fn type_tag(&self) -> &'static str {
        "log"
    }

    fn describe(&self) -> String {
        "Writes alert events to the log".to_string()
    }

    async fn send(&self, event: &AlertEvent) -> Result<(), DeliveryError> {
        match event.kind {
            AlertKind::Failure => warn!(
                target: "hostwatch::alert",
                monitor = %event.monitor,
                failed_at = %format_time(event.failed_at),
                virtual_fail_count = event.virtual_fail_count,
                "Monitor {} failed: {}",
                event.monitor,
                event.last_result
            ),
            AlertKind::Success => info!(
                target: "hostwatch::alert",
                monitor = %event.monitor,
                downtime = %event.downtime(),
                recovery_info = event.recovery_info.as_deref().unwrap_or_default(),
                "Monitor {} succeeded",
                event.monitor
            ),
        }
        Ok(())
    }
}
