//! Common types used throughout the routing engine
//!
//! This module contains shared type definitions, type aliases,
//! and small enums used across multiple modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Type Aliases
// ============================================================================

/// Sequence number stamped on every change-log row
pub type DataId = i64;

/// Upper bound of the data id space, used for the open-ended tail gap
pub const MAX_DATA_ID: DataId = i64::MAX;

/// Wall-clock timestamp used for row and gap creation times
pub type Timestamp = DateTime<Utc>;

/// JSON value type (re-exported from serde_json)
pub type JsonValue = serde_json::Value;

/// JSON object type
pub type JsonObject = serde_json::Map<String, JsonValue>;

// ============================================================================
// Event Type
// ============================================================================

/// Kind of row-level change captured by a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Insert,
    Update,
    Delete,
}

impl EventType {
    /// Single-letter code stored in the change log
    pub fn code(self) -> &'static str {
        match self {
            EventType::Insert => "I",
            EventType::Update => "U",
            EventType::Delete => "D",
        }
    }

    /// Parse a change-log event code
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "I" => Some(EventType::Insert),
            "U" => Some(EventType::Update),
            "D" => Some(EventType::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ============================================================================
// Order Mode
// ============================================================================

/// How rows of a change-log query are ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderMode {
    /// `order by data_id`
    #[default]
    DataId,
    /// `order by create_time, data_id` for out-of-order id sequences
    CreateTime,
    /// No explicit ordering
    Natural,
}

// ============================================================================
// Batch Algorithm
// ============================================================================

/// How a channel decides where one outgoing batch ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchAlgorithm {
    /// Close once a limit is reached, but only on a transaction boundary
    #[default]
    Default,
    /// Close on every transaction boundary
    Transactional,
    /// Close as soon as a limit is reached
    Nontransactional,
}

impl BatchAlgorithm {
    /// Whether rows of one source transaction should be kept together
    pub fn keeps_transactions(self) -> bool {
        !matches!(self, BatchAlgorithm::Nontransactional)
    }
}
