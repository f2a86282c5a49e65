//! Change row types

use crate::types::{DataId, EventType, JsonObject, JsonValue, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row of the change log, as captured by a trigger
///
/// Payload groups hold JSON objects keyed by column name. A group that was
/// not selected by the query is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRow {
    /// Sequence number
    pub data_id: DataId,
    /// Source table
    pub table_name: String,
    /// Kind of change
    pub event_type: EventType,
    /// Row values after the change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_data: Option<String>,
    /// Primary-key values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pk_data: Option<String>,
    /// Row values before an update or delete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_data: Option<String>,
    /// Source transaction, if the platform exposes one
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// Channel the trigger assigned
    pub channel_id: String,
    /// Node the change originated from (`None` for local changes)
    #[serde(default)]
    pub source_node_id: Option<String>,
    /// Capture time
    pub create_time: Timestamp,
}

impl ChangeRow {
    /// Create a row without payload
    pub fn new(
        data_id: DataId,
        channel_id: impl Into<String>,
        table_name: impl Into<String>,
        event_type: EventType,
        create_time: Timestamp,
    ) -> Self {
        Self {
            data_id,
            table_name: table_name.into(),
            event_type,
            row_data: None,
            pk_data: None,
            old_data: None,
            transaction_id: None,
            channel_id: channel_id.into(),
            source_node_id: None,
            create_time,
        }
    }

    /// Set the row data from a JSON object
    #[must_use]
    pub fn with_row_data(mut self, values: &JsonObject) -> Self {
        self.row_data = Some(JsonValue::Object(values.clone()).to_string());
        self
    }

    /// Set the primary-key data from a JSON object
    #[must_use]
    pub fn with_pk_data(mut self, values: &JsonObject) -> Self {
        self.pk_data = Some(JsonValue::Object(values.clone()).to_string());
        self
    }

    /// Set the old data from a JSON object
    #[must_use]
    pub fn with_old_data(mut self, values: &JsonObject) -> Self {
        self.old_data = Some(JsonValue::Object(values.clone()).to_string());
        self
    }

    /// Set the source transaction
    #[must_use]
    pub fn with_transaction(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    /// Set the originating node
    #[must_use]
    pub fn with_source_node(mut self, node_id: impl Into<String>) -> Self {
        self.source_node_id = Some(node_id.into());
        self
    }

    /// Column values visible to routing predicates
    ///
    /// Keys are upper-cased column names. Current values come from the row
    /// data (falling back to the primary key for deletes), old values are
    /// added with an `OLD_` prefix. JSON `null` maps to `None`.
    pub fn column_values(&self) -> BTreeMap<String, Option<String>> {
        let mut values = BTreeMap::new();
        let current = self.row_data.as_deref().or(self.pk_data.as_deref());
        for (name, value) in parse_object(current) {
            values.insert(name.to_uppercase(), value);
        }
        for (name, value) in parse_object(self.old_data.as_deref()) {
            values.insert(format!("OLD_{}", name.to_uppercase()), value);
        }
        values
    }

    /// Rough payload size, used for batch byte limits
    pub fn approximate_size(&self) -> u64 {
        let payload = [&self.row_data, &self.pk_data, &self.old_data]
            .iter()
            .filter_map(|group| group.as_ref().map(String::len))
            .sum::<usize>();
        (payload + self.table_name.len() + 32) as u64
    }
}

fn parse_object(data: Option<&str>) -> Vec<(String, Option<String>)> {
    let Some(text) = data else {
        return Vec::new();
    };
    match serde_json::from_str::<JsonObject>(text) {
        Ok(object) => object
            .into_iter()
            .map(|(name, value)| {
                let value = match value {
                    JsonValue::Null => None,
                    JsonValue::String(s) => Some(s),
                    other => Some(other.to_string()),
                };
                (name, value)
            })
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Counters kept by a cursor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CursorStats {
    /// Queries executed, retries included
    pub queries_executed: u32,
    /// Rows fetched from the store
    pub rows_fetched: u64,
    /// Rows dropped because they fell outside every gap
    pub rows_filtered: u64,
    /// Rows handed to the caller
    pub rows_emitted: u64,
}
