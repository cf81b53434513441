use std::time::{Duration, Instant};

use regex::Regex;
use tokio::time::timeout;

use super::types::CheckOutcome;
use crate::config::OptionReader;
use crate::error::{CheckError, ConfigError, FieldError};

/// A health check a monitor runs once per due cycle.
///
/// `Ok` carries both passing and failing outcomes; `Err` means the check
/// could not run at all, which the monitor also records as a failure.
#[async_trait::async_trait]
pub trait Check: Send + Sync {
    /// Registry tag this check was built from
    fn type_tag(&self) -> &'static str;

    /// One line explaining what is being checked
    fn describe(&self) -> String;

    async fn check(&self) -> Result<CheckOutcome, CheckError>;
}

/// Always passes
pub struct NullCheck;

#[async_trait::async_trait]
impl Check for NullCheck {
    fn type_tag(&self) -> &'static str {
        "null"
    }

    fn describe(&self) -> String {
        "Monitor that does nothing".to_string()
    }

    async fn check(&self) -> Result<CheckOutcome, CheckError> {
        Ok(CheckOutcome::success("ok"))
    }
}

impl NullCheck {
    pub fn from_options(options: &mut OptionReader<'_>) -> Result<Self, ConfigError> {
        options.finish()?;
        Ok(Self)
    }
}

/// Always fails, useful for exercising alerters
pub struct FailCheck;

#[async_trait::async_trait]
impl Check for FailCheck {
    fn type_tag(&self) -> &'static str {
        "fail"
    }

    fn describe(&self) -> String {
        "Monitor that always fails".to_string()
    }

    async fn check(&self) -> Result<CheckOutcome, CheckError> {
        Ok(CheckOutcome::failure("This monitor always fails."))
    }
}

impl FailCheck {
    pub fn from_options(options: &mut OptionReader<'_>) -> Result<Self, ConfigError> {
        options.finish()?;
        Ok(Self)
    }
}

/// TCP port checker
pub struct TcpCheck {
    host: String,
    port: u16,
    timeout_duration: Duration,
}

impl TcpCheck {
    pub fn new(host: impl Into<String>, port: u16, timeout_seconds: u64) -> Self {
        Self { host: host.into(), port, timeout_duration: Duration::from_secs(timeout_seconds) }
    }

    pub fn from_options(options: &mut OptionReader<'_>) -> Result<Self, ConfigError> {
        let host = options.required_string("host");
        let port: u16 = options.required("port");
        let connect_timeout = options.with_default("connect_timeout", 10u64);
        if port == 0 {
            options.error("port", "Port 0 is not valid");
        }
        options.finish()?;
        Ok(Self::new(host, port, connect_timeout))
    }
}

#[async_trait::async_trait]
impl Check for TcpCheck {
    fn type_tag(&self) -> &'static str {
        "tcp"
    }

    fn describe(&self) -> String {
        format!("Checking for an open TCP port on {}:{}", self.host, self.port)
    }

    async fn check(&self) -> Result<CheckOutcome, CheckError> {
        let start = Instant::now();
        let target = format!("{}:{}", self.host, self.port);

        let connect = tokio::net::TcpStream::connect(&target);

        match timeout(self.timeout_duration, connect).await {
            Err(_) => Ok(CheckOutcome::failure(format!("TCP connection to {target} timed out"))),
            Ok(Err(e)) => Ok(CheckOutcome::failure(format!("TCP connection to {target} failed: {e}"))),
            Ok(Ok(_stream)) => {
                let latency = start.elapsed().as_millis();
                Ok(CheckOutcome::success(format!("{target} accepted a connection in {latency}ms")))
            }
        }
    }
}

/// HTTP/HTTPS checker
pub struct HttpCheck {
    client: reqwest::Client,
    url: url::Url,
    allowed_codes: Vec<u16>,
    body_regexp: Option<Regex>,
}

impl HttpCheck {
    pub fn new(
        url: url::Url,
        timeout_seconds: u64,
        allowed_codes: Vec<u16>,
        body_regexp: Option<Regex>,
    ) -> Result<Self, CheckError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;

        Ok(Self { client, url, allowed_codes, body_regexp })
    }

    pub fn from_options(options: &mut OptionReader<'_>) -> Result<Self, ConfigError> {
        let raw_url = options.required_string("url");
        let request_timeout = options.with_default("request_timeout", 10u64);
        let allowed_codes: Vec<u16> = options.with_default("allowed_codes", Vec::new());
        let raw_regexp: Option<String> = options.optional("regexp");

        let url = match url::Url::parse(&raw_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url),
            Ok(url) => {
                options.error("url", format!("Invalid scheme for HTTP monitor: {}", url.scheme()));
                None
            }
            Err(e) if !raw_url.is_empty() => {
                options.error("url", format!("Invalid URL: {e}"));
                None
            }
            Err(_) => None,
        };

        let body_regexp = match raw_regexp.as_deref().map(Regex::new) {
            Some(Ok(regex)) => Some(regex),
            Some(Err(e)) => {
                options.error("regexp", format!("Invalid regular expression: {e}"));
                None
            }
            None => None,
        };

        options.finish()?;

        // finish() only passes once the URL parsed
        let url = url.ok_or_else(|| FieldError::new(options.component(), "url", "Invalid URL"))?;

        Self::new(url, request_timeout, allowed_codes, body_regexp)
            .map_err(|e| FieldError::new(options.component(), "url", e.to_string()).into())
    }

    fn status_allowed(&self, status: reqwest::StatusCode) -> bool {
        if self.allowed_codes.is_empty() {
            // Consider 2xx and 3xx as success
            status.is_success() || status.is_redirection()
        } else {
            self.allowed_codes.contains(&status.as_u16())
        }
    }
}

#[async_trait::async_trait]
impl Check for HttpCheck {
    fn type_tag(&self) -> &'static str {
        "http"
    }

    fn describe(&self) -> String {
        match &self.body_regexp {
            Some(regex) => format!("Checking that {} returns a page matching {}", self.url, regex),
            None => format!("Checking that {} returns an acceptable status", self.url),
        }
    }

    async fn check(&self) -> Result<CheckOutcome, CheckError> {
        let start = Instant::now();

        let response = match self.client.get(self.url.clone()).send().await {
            Ok(response) => response,
            Err(e) => return Ok(CheckOutcome::failure(format!("HTTP request failed: {e}"))),
        };

        let latency = start.elapsed().as_millis();
        let status = response.status();

        if !self.status_allowed(status) {
            return Ok(CheckOutcome::failure(format!(
                "HTTP check failed with status code: {}",
                status.as_u16()
            )));
        }

        if let Some(regex) = &self.body_regexp {
            let body = response.text().await?;
            if !regex.is_match(&body) {
                return Ok(CheckOutcome::failure(format!(
                    "Page did not match {regex} (status {})",
                    status.as_u16()
                )));
            }
        }

        Ok(CheckOutcome::success(format!("status {} in {latency}ms", status.as_u16())))
    }
}
