//! Status document rewritten once per cycle.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ResultSink, SinkContext};
use crate::config::OptionReader;
use crate::error::{ConfigError, DeliveryError};
use crate::monitoring::MonitorSnapshot;
use crate::remote::{RemoteSnapshot, RemoteStateStore};

#[derive(Debug, Serialize)]
pub struct StatusDocument<'a> {
    pub generated: DateTime<Utc>,
    pub hostname: &'a str,
    pub monitors: BTreeMap<&'a str, &'a MonitorSnapshot>,
    pub remote: BTreeMap<String, RemoteSnapshot>,
}

pub struct JsonSink {
    path: PathBuf,
    hostname: String,
    remote: Arc<RemoteStateStore>,
}

impl JsonSink {
    pub fn new(path: impl Into<PathBuf>, hostname: impl Into<String>, remote: Arc<RemoteStateStore>) -> Self {
        Self { path: path.into(), hostname: hostname.into(), remote }
    }

    pub fn from_options(options: &mut OptionReader<'_>, context: &SinkContext) -> Result<Self, ConfigError> {
        let filename = options.required_string("filename");
        options.finish()?;
        Ok(Self::new(filename, context.hostname.clone(), context.remote.clone()))
    }

    /// Write to a sibling temp file first so readers never see a partial
    /// document
    fn write_atomically(&self, contents: &[u8]) -> Result<(), DeliveryError> {
        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        fs::write(&staging, contents)?;
        if let Err(e) = fs::rename(&staging, &self.path) {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }
        Ok(())
    }
}

impl ResultSink for JsonSink {
    fn type_tag(&self) -> &'static str {
        "json"
    }

    fn describe(&self) -> String {
        format!("Writing JSON status to {}", self.path.display())
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn process_batch(&mut self, entries: &[MonitorSnapshot]) -> Result<(), DeliveryError> {
        let document = StatusDocument {
            generated: Utc::now(),
            hostname: &self.hostname,
            monitors: entries.iter().map(|entry| (entry.name.as_str(), entry)).collect(),
            remote: self.remote.view(),
        };
        let contents = serde_json::to_vec_pretty(&document)?;
        self.write_atomically(&contents)
    }
}
