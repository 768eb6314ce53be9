//! Audit trail for ACL administration and authorization checks.
//!
//! [`AuditLog::audit`] never blocks and never fails: records go over an
//! unbounded channel to [`run_writer`], which logs them under the `audit`
//! target and optionally appends them to a JSON lines file.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub const EVENT_CONFIG_ACL: &str = "CONFIG_ACL";
pub const EVENT_AUTHZ: &str = "AUTHZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub subject_id: String,
    pub outcome: Outcome,
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    tx: Option<UnboundedSender<AuditEvent>>,
}

impl AuditLog {
    pub fn new() -> (Self, UnboundedReceiver<AuditEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A log that drops every record.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn audit<I, K, V>(&self, event: &str, subject_id: &str, outcome: Outcome, params: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let Some(tx) = &self.tx else {
            return;
        };
        let record = AuditEvent {
            timestamp: Utc::now(),
            event: event.to_string(),
            subject_id: subject_id.to_string(),
            outcome,
            params: params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        };
        if tx.send(record).is_err() {
            tracing::warn!(event, "Audit writer has stopped, dropping record");
        }
    }
}

/// Drains `rx` until every [`AuditLog`] handle is dropped.
pub async fn run_writer(mut rx: UnboundedReceiver<AuditEvent>, path: Option<PathBuf>) {
    let mut file = match &path {
        Some(path) => match OpenOptions::new().create(true).append(true).open(path).await {
            Ok(file) => Some(file),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to open audit file");
                None
            }
        },
        None => None,
    };

    while let Some(event) = rx.recv().await {
        tracing::info!(
            target: "audit",
            event = %event.event,
            subject = %event.subject_id,
            outcome = ?event.outcome,
            params = ?event.params,
            "audit"
        );

        let Some(f) = file.as_mut() else {
            continue;
        };
        let line = match serde_json::to_string(&event) {
            Ok(json) => format!("{json}\n"),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize audit record");
                continue;
            }
        };
        if let Err(e) = f.write_all(line.as_bytes()).await {
            tracing::warn!(error = %e, "Failed to write audit record");
            continue;
        }
        if let Err(e) = f.flush().await {
            tracing::warn!(error = %e, "Failed to flush audit file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_reach_receiver() {
        let (log, mut rx) = AuditLog::new();
        log.audit(
            EVENT_CONFIG_ACL,
            "alice",
            Outcome::Success,
            [("op", "update"), ("resource", "certServer.ca.certificate")],
        );
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event, "CONFIG_ACL");
        assert_eq!(event.subject_id, "alice");
        assert_eq!(event.params["op"], "update");
    }

    #[test]
    fn test_disabled_log_is_silent() {
        AuditLog::disabled().audit(EVENT_AUTHZ, "bob", Outcome::Failure, [("op", "read")]);
    }

    #[tokio::test]
    async fn test_writer_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let (log, rx) = AuditLog::new();
        log.audit(EVENT_AUTHZ, "bob", Outcome::Failure, [("right", "modify")]);
        log.audit(EVENT_CONFIG_ACL, "alice", Outcome::Success, [("op", "delete")]);
        drop(log);

        run_writer(rx, Some(path.clone())).await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["outcome"], "failure");
        assert_eq!(lines[1]["params"]["op"], "delete");
    }
}
