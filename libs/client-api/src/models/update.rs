//! Audit records

use chrono::{DateTime, Utc};
use periphery_api::{ExecutionResult, Log};
use serde::{Deserialize, Serialize};

/// Resource an update refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum UpdateTarget {
    Build(String),
    Deployment(String),
    Server(String),
    System,
}

impl UpdateTarget {
    pub fn id(&self) -> Option<&str> {
        match self {
            UpdateTarget::Build(id) | UpdateTarget::Deployment(id) | UpdateTarget::Server(id) => {
                Some(id)
            }
            UpdateTarget::System => None,
        }
    }
}

/// Immutable audit record of one completed or denied command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    #[serde(default)]
    pub id: String,
    pub target: UpdateTarget,
    pub operation: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub log: Log,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    pub timestamp: DateTime<Utc>,
}

impl Update {
    /// Blank record; id and timestamp are assigned when it is recorded
    pub fn new(target: UpdateTarget, operation: impl Into<String>, operator: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            target,
            operation: operation.into(),
            command: String::new(),
            log: Log::default(),
            operator: operator.into(),
            note: None,
            is_error: false,
            timestamp: Utc::now(),
        }
    }

    pub fn with_result(mut self, result: ExecutionResult) -> Self {
        self.command = result.command;
        self.log = result.log;
        self.is_error = result.is_error;
        self
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note.filter(|n| !n.is_empty());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    /// Marks the record as a refused attempt
    pub fn denied(mut self) -> Self {
        if !self.operation.ends_with(" (DENIED)") {
            self.operation.push_str(" (DENIED)");
        }
        self.is_error = true;
        self
    }
}
