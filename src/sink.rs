//! Best-effort export of automation events
//!
//! Events go to an Elasticsearch-compatible `/<index>/_doc` endpoint. The sink
//! never affects a run's outcome: the first delivery failure disables it for
//! the rest of the process.

use crate::error::{Error, Result};
use crate::manifest::SinkConfig;
use chrono::Local;
use serde_json::{Map, Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Destination for automation events
pub trait DiagnosticSink: Send + Sync {
    /// Deliver one event with its payload fields
    fn emit(&self, event: &str, payload: Value) -> Result<()>;
}

/// Emit an event, logging and discarding delivery errors
pub fn notify(sink: &dyn DiagnosticSink, event: &str, payload: Value) {
    if let Err(e) = sink.emit(event, payload) {
        tracing::debug!(event, "event not delivered: {}", e);
    }
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn emit(&self, _event: &str, _payload: Value) -> Result<()> {
        Ok(())
    }
}

/// Sink posting JSON documents to a log store
pub struct ElasticSink {
    agent: ureq::Agent,
    base_url: String,
    index_prefix: String,
    card_id: String,
    disabled: AtomicBool,
}

impl ElasticSink {
    pub fn new(url: &str, config: &SinkConfig, card_id: &str) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout.max(1))))
            .build();

        Self {
            agent: ureq::Agent::new_with_config(agent_config),
            base_url: url.trim_end_matches('/').to_string(),
            index_prefix: config.index_prefix.clone(),
            card_id: card_id.to_string(),
            disabled: AtomicBool::new(false),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}-{}/_doc",
            self.base_url,
            self.index_prefix,
            Local::now().format("%Y.%m.%d")
        )
    }
}

impl DiagnosticSink for ElasticSink {
    fn emit(&self, event: &str, payload: Value) -> Result<()> {
        if self.disabled.load(Ordering::Relaxed) {
            return Ok(());
        }

        let body = document(event, &self.card_id, payload).to_string();
        let result = self
            .agent
            .post(&self.endpoint())
            .header("Content-Type", "application/json")
            .send(body);

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if !self.disabled.swap(true, Ordering::Relaxed) {
                    tracing::warn!("Diagnostic sink unavailable, continuing with local logs only: {}", e);
                }
                Err(Error::SinkUnavailable(e.to_string()))
            }
        }
    }
}

/// Build the stored document: envelope fields plus the payload's fields
pub fn document(event: &str, card_id: &str, payload: Value) -> Value {
    let mut doc = Map::new();
    doc.insert("@timestamp".into(), json!(Local::now().to_rfc3339()));
    doc.insert("event_type".into(), json!(event));
    doc.insert("source".into(), json!("nicfw"));
    doc.insert("card_id".into(), json!(card_id));

    match payload {
        Value::Object(fields) => {
            for (key, value) in fields {
                doc.entry(key).or_insert(value);
            }
        }
        Value::Null => {}
        other => {
            doc.insert("data".into(), other);
        }
    }

    Value::Object(doc)
}

/// Build the sink described by the configuration
pub fn from_config(config: &SinkConfig, card_id: &str) -> Box<dyn DiagnosticSink> {
    match &config.url {
        Some(url) => {
            tracing::info!("Exporting events to {}", url);
            Box::new(ElasticSink::new(url, config, card_id))
        }
        None => Box::new(NullSink),
    }
}

#[cfg(test)]
pub mod fakes {
    use super::*;
    use std::sync::Mutex;

    /// Sink remembering every event it was given
    #[derive(Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<(String, Value)>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn names(&self) -> Vec<String> {
            self.events.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
        }

        pub fn payload(&self, event: &str) -> Option<Value> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .find(|(n, _)| n == event)
                .map(|(_, v)| v.clone())
        }
    }

    impl DiagnosticSink for RecordingSink {
        fn emit(&self, event: &str, payload: Value) -> Result<()> {
            self.events.lock().unwrap().push((event.to_string(), payload));
            Ok(())
        }
    }
}
