//! Slack incoming-webhook channel.

use std::time::Duration;

use serde_json::{Value, json};
use tracing::info;

use super::{AlertChannel, AlertEvent, AlertKind, format_time};
use crate::config::OptionReader;
use crate::error::{ConfigError, DeliveryError, FieldError};

pub struct SlackChannel {
    client: reqwest::Client,
    url: url::Url,
    channel: Option<String>,
    username: Option<String>,
    dry_run: bool,
}

impl SlackChannel {
    pub fn new(
        url: url::Url,
        channel: Option<String>,
        username: Option<String>,
        dry_run: bool,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, url, channel, username, dry_run })
    }

    pub fn from_options(options: &mut OptionReader<'_>) -> Result<Self, ConfigError> {
        let raw_url = options.required_string("url");
        let channel: Option<String> = options.optional("channel");
        let username: Option<String> = options.optional("username");
        let dry_run = options.with_default("dry_run", false);

        let url = match url::Url::parse(&raw_url) {
            Ok(url) => Some(url),
            Err(e) if !raw_url.is_empty() => {
                options.error("url", format!("Invalid URL: {e}"));
                None
            }
            Err(_) => None,
        };

        options.finish()?;

        let Some(url) = url else {
            return Err(FieldError::new(options.component(), "url", "Invalid URL").into());
        };
        Self::new(url, channel, username, dry_run)
            .map_err(|e| FieldError::new(options.component(), "url", e.to_string()).into())
    }

    /// Webhook body for an event
    pub fn payload(&self, event: &AlertEvent) -> Value {
        let mut message = serde_json::Map::new();
        if let Some(channel) = &self.channel {
            message.insert("channel".into(), json!(channel));
        } else if let Some(username) = &self.username {
            message.insert("username".into(), json!(username));
        }

        let mut fields = vec![
            json!({"title": "Failed at", "value": format_time(event.failed_at), "short": true}),
            json!({"title": "Downtime", "value": event.downtime(), "short": true}),
        ];

        let (text, color) = match event.kind {
            AlertKind::Failure => {
                fields.push(json!({
                    "title": "Virtual failure count",
                    "value": event.virtual_fail_count,
                    "short": true
                }));
                fields.push(json!({"title": "Host", "value": event.hostname, "short": true}));
                fields.push(json!({"title": "Additional info", "value": event.last_result}));
                fields.push(json!({"title": "Description", "value": event.description}));

                // A failure that carries a fix suggestion is shown as a warning
                let color = match &event.recovery_info {
                    Some(info) => {
                        fields.push(json!({
                            "title": "Recovery info",
                            "value": format!("Recovery info: {info}")
                        }));
                        "warning"
                    }
                    None => "danger",
                };
                (format!("Monitor {} failed!", event.monitor), color)
            }
            AlertKind::Success => {
                fields.push(json!({"title": "Host", "value": event.hostname, "short": true}));
                fields.push(json!({"title": "Description", "value": event.description}));
                (format!("Monitor {} succeeded.", event.monitor), "good")
            }
        };

        message.insert("text".into(), json!(text));
        message.insert("attachments".into(), json!([{ "color": color, "fields": fields }]));
        Value::Object(message)
    }
}

#[async_trait::async_trait]
impl AlertChannel for SlackChannel {
    fn type_tag(&self) -> &'static str {
        "slack"
    }

    fn describe(&self) -> String {
        match &self.channel {
            Some(channel) => format!("Sending alerts to Slack channel {channel}"),
            None => "Sending alerts to a Slack webhook".to_string(),
        }
    }

    async fn send(&self, event: &AlertEvent) -> Result<(), DeliveryError> {
        let payload = self.payload(event);

        if self.dry_run {
            info!(target: "hostwatch::alert", "dry_run: would send slack: {payload}");
            return Ok(());
        }

        let response = self.client.post(self.url.clone()).json(&payload).send().await?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(DeliveryError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn channel(channel: Option<&str>) -> SlackChannel {
        SlackChannel::new(
            url::Url::parse("https://hooks.slack.invalid/services/x").unwrap(),
            channel.map(str::to_string),
            Some("hostwatch".to_string()),
            true,
        )
        .unwrap()
    }

    fn event(kind: AlertKind, recovery_info: Option<&str>) -> AlertEvent {
        AlertEvent {
            kind,
            monitor: "web".to_string(),
            type_tag: "http".to_string(),
            group: "default".to_string(),
            failed_at: Some(DateTime::<Utc>::UNIX_EPOCH),
            downtime_secs: Some(65),
            virtual_fail_count: 3,
            last_result: "status 502".to_string(),
            description: "Checking web".to_string(),
            recovery_info: recovery_info.map(str::to_string),
            hostname: "box1".to_string(),
        }
    }

    #[test]
    fn test_failure_payload() {
        let payload = channel(Some("#ops")).payload(&event(AlertKind::Failure, None));

        assert_eq!(payload["channel"], "#ops");
        assert!(payload.get("username").is_none());
        assert_eq!(payload["text"], "Monitor web failed!");
        assert_eq!(payload["attachments"][0]["color"], "danger");
        assert_eq!(payload["attachments"][0]["fields"][0]["value"], "1970-01-01 00:00:00");
        assert_eq!(payload["attachments"][0]["fields"][1]["value"], "0:01:05");
        assert_eq!(payload["attachments"][0]["fields"][2]["value"], 3);
    }

    #[test]
    fn test_failure_with_recovery_info_is_warning() {
        let payload = channel(None).payload(&event(AlertKind::Failure, Some("restart it")));

        assert_eq!(payload["username"], "hostwatch");
        assert_eq!(payload["attachments"][0]["color"], "warning");
        let fields = payload["attachments"][0]["fields"].as_array().unwrap();
        assert_eq!(fields.last().unwrap()["value"], "Recovery info: restart it");
    }

    #[test]
    fn test_success_payload() {
        let payload = channel(None).payload(&event(AlertKind::Success, None));
        assert_eq!(payload["text"], "Monitor web succeeded.");
        assert_eq!(payload["attachments"][0]["color"], "good");
    }

    #[tokio::test]
    async fn test_dry_run_sends_nothing() {
        assert!(channel(None).send(&event(AlertKind::Failure, None)).await.is_ok());
    }
}
