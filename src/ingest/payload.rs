use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body of `POST /log`.
///
/// The bare array is the canonical form. The labeled form carries the name of
/// the producing source, which only shows up in JSON tail output; the lines
/// written to disk are the same either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IngestPayload {
    Lines(Vec<String>),
    Labeled { source: String, logs: Vec<String> },
}

#[derive(Debug, Error)]
#[error("invalid log batch, expected a JSON array of strings or an object with \"source\" and \"logs\": {0}")]
pub struct DecodeError(#[from] serde_json::Error);

impl IngestPayload {
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn source(&self) -> Option<&str> {
        match self {
            IngestPayload::Lines(_) => None,
            IngestPayload::Labeled { source, .. } => Some(source),
        }
    }

    pub fn lines(&self) -> &[String] {
        match self {
            IngestPayload::Lines(lines) => lines,
            IngestPayload::Labeled { logs, .. } => logs,
        }
    }

    pub fn into_parts(self) -> (Option<String>, Vec<String>) {
        match self {
            IngestPayload::Lines(lines) => (None, lines),
            IngestPayload::Labeled { source, logs } => (Some(source), logs),
        }
    }
}

/// One line as seen by tail subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailRecord {
    pub source: Option<String>,
    pub line: String,
}

impl TailRecord {
    pub fn new(source: Option<String>, line: &str) -> Self {
        Self {
            source,
            line: line.strip_suffix('\n').unwrap_or(line).to_string(),
        }
    }

    /// Records for a decoded batch, in batch order.
    pub fn from_batch(source: Option<&str>, lines: &[String]) -> Vec<Self> {
        lines
            .iter()
            .map(|line| Self::new(source.map(str::to_string), line))
            .collect()
    }

    /// The line followed by exactly one terminator.
    pub fn to_raw_line(&self) -> String {
        format!("{}\n", self.line)
    }

    /// One JSON object followed by a terminator.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let mut out = serde_json::to_string(self)?;
        out.push('\n');
        Ok(out)
    }
}
