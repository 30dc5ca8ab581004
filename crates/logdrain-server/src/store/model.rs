use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{StorageError, StorageResult};

/// Field holding the log shipper's checkpoint.
pub const CHECKPOINT_FIELD: &str = "checkpointId";
/// Field holding the list of recent run reports.
pub const REPORTS_FIELD: &str = "logs";
/// Number of run reports kept in the document; oldest are dropped first.
pub const MAX_REPORTS: usize = 20;

/// The single extension-wide state document.
///
/// Always a JSON object. Callers read and write it whole; the store decides how a
/// write is combined with what is already persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert an arbitrary JSON value. `null` is the absent document.
    pub fn from_value(value: Value) -> StorageResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            Value::Bool(_) => Err(StorageError::NotAnObject("a boolean")),
            Value::Number(_) => Err(StorageError::NotAnObject("a number")),
            Value::String(_) => Err(StorageError::NotAnObject("a string")),
            Value::Array(_) => Err(StorageError::NotAnObject("an array")),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Shallow merge: every top-level field of `self` replaces the same field of
    /// `base`; fields only present in `base` are kept.
    pub fn merged_over(self, base: Document) -> Document {
        let mut merged = base.0;
        for (field, value) in self.0 {
            merged.insert(field, value);
        }
        Document(merged)
    }

    pub fn checkpoint_id(&self) -> Option<&str> {
        self.get(CHECKPOINT_FIELD).and_then(Value::as_str)
    }

    pub fn set_checkpoint_id(&mut self, checkpoint: Option<String>) {
        match checkpoint {
            Some(c) => {
                self.insert(CHECKPOINT_FIELD, Value::String(c));
            }
            None => {
                self.insert(CHECKPOINT_FIELD, Value::Null);
            }
        }
    }

    /// Run reports, oldest first. Entries that fail to parse are skipped.
    pub fn reports(&self) -> Vec<RunReport> {
        self.get(REPORTS_FIELD)
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| serde_json::from_value(e.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Append a report, keeping at most [`MAX_REPORTS`] entries.
    pub fn push_report(&mut self, report: &RunReport) -> StorageResult<()> {
        let mut entries = match self.remove(REPORTS_FIELD) {
            Some(Value::Array(entries)) => entries,
            _ => Vec::new(),
        };
        entries.push(serde_json::to_value(report)?);
        if entries.len() > MAX_REPORTS {
            let excess = entries.len() - MAX_REPORTS;
            entries.drain(..excess);
        }
        self.insert(REPORTS_FIELD, Value::Array(entries));
        Ok(())
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Outcome of one log shipping run, as stored under [`REPORTS_FIELD`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Unix timestamp (milliseconds) when the run started.
    pub start: i64,
    /// Unix timestamp (milliseconds) when the run finished.
    pub end: i64,
    pub logs_processed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
