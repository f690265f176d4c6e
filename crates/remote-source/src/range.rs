// crates/remote-source/src/range.rs
//! Fetched header/value grids and their conversion into rows

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sheetsync_core::{render_value, Row};
use std::collections::BTreeMap;

/// Header row plus data rows exactly as the source returned them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchedRange {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl FetchedRange {
    /// Creates a range from headers and cell rows
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { headers, rows }
    }

    /// Splits a raw value grid whose first row is the header
    pub fn from_values(mut values: Vec<Vec<Value>>) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let headers = values.remove(0).iter().map(render_value).collect();
        Self {
            headers,
            rows: values,
        }
    }

    /// Number of data rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if there are no data rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Converts cell rows into keyed rows
    ///
    /// Headers are normalized and then looked up in `column_map`. Columns
    /// with a blank header are ignored, as are blank cells; rows with no
    /// remaining fields are dropped.
    pub fn into_rows(self, column_map: &BTreeMap<String, String>) -> Vec<Row> {
        let fields: Vec<Option<String>> = self
            .headers
            .iter()
            .map(|header| {
                let normalized = normalize_header(header);
                if normalized.is_empty() {
                    None
                } else {
                    Some(column_map.get(&normalized).cloned().unwrap_or(normalized))
                }
            })
            .collect();

        self.rows
            .into_iter()
            .filter_map(|cells| {
                let row: Row = fields
                    .iter()
                    .zip(cells)
                    .filter_map(|(field, cell)| {
                        let field = field.as_ref()?;
                        normalize_cell(cell).map(|value| (field.clone(), value))
                    })
                    .collect();
                (!row.is_empty()).then_some(row)
            })
            .collect()
    }
}

/// `"Is Member"` → `"is_member"`
pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn normalize_cell(cell: Value) -> Option<Value> {
    match cell {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else if trimmed.len() == s.len() {
                Some(Value::String(s))
            } else {
                Some(Value::String(trimmed.to_string()))
            }
        }
        other => Some(other),
    }
}
