// crates/core/src/row.rs
//! Volunteer activity rows and their identity keys

use crate::checksum;
use crate::error::{CoreError, CoreResult};
use crate::time::parse_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Person who performed the activity
pub const ASSIGNEE: &str = "assignee";
/// Organisational branch
pub const BRANCH: &str = "branch";
/// Project the hours were logged against
pub const PROJECT: &str = "project";
/// Day of the activity
pub const DATE: &str = "date";
/// Hours contributed
pub const HOURS: &str = "hours";
/// Membership flag
pub const IS_MEMBER: &str = "is_member";

/// Fields every activity row is expected to carry
pub const REQUIRED_FIELDS: [&str; 6] = [ASSIGNEE, BRANCH, PROJECT, DATE, HOURS, IS_MEMBER];

const IDENTITY_FIELDS: [&str; 4] = [ASSIGNEE, DATE, PROJECT, BRANCH];

const TIMESTAMP_FIELDS: [&str; 3] = ["timestamp", "updated_at", "last_modified"];

/// Composite key matching the same logical record across snapshots
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Creates a key from its rendered form
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for IdentityKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// One unit of volunteer activity: field name to scalar value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(BTreeMap<String, Value>);

impl Row {
    /// Creates an empty row
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builds a row from a JSON object
    pub fn from_value(value: Value) -> CoreResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map.into_iter().collect())),
            other => Err(CoreError::InvalidRow(format!(
                "expected an object, got {}",
                other
            ))),
        }
    }

    /// Adds a field, returning the row for chaining
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Sets a field, returning the previous value
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    /// Removes a field
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Gets a field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns true if the field is present and not null
    pub fn has(&self, field: &str) -> bool {
        self.0.get(field).is_some_and(|v| !v.is_null())
    }

    /// Iterates fields in sorted name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Iterates field names in sorted order
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the row has no fields
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Composite `assignee|date|project|branch` key
    pub fn identity_key(&self) -> IdentityKey {
        let parts: Vec<String> = IDENTITY_FIELDS
            .iter()
            .map(|field| self.0.get(*field).map(render_value).unwrap_or_default())
            .collect();
        IdentityKey(parts.join("|"))
    }

    /// Order-independent checksum over field names and values
    pub fn checksum(&self) -> String {
        checksum::row_checksum(self)
    }

    /// Text view of a field
    pub fn text(&self, field: &str) -> Option<String> {
        self.0.get(field).filter(|v| !v.is_null()).map(render_value)
    }

    /// Numeric view of a field; numeric strings are accepted
    pub fn number(&self, field: &str) -> Option<f64> {
        match self.0.get(field)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    /// Time this row was last touched
    ///
    /// Uses an explicit timestamp field when one parses, otherwise the
    /// activity date.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        TIMESTAMP_FIELDS
            .iter()
            .chain(std::iter::once(&DATE))
            .filter_map(|field| self.0.get(*field))
            .find_map(parse_timestamp)
    }

    /// Parsed activity date
    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.0.get(DATE).and_then(parse_timestamp)
    }

    /// Converts the row into a JSON object
    pub fn into_value(self) -> Value {
        Value::Object(self.0.into_iter().collect())
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Renders a cell for keys and display: strings raw, null empty
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Wraps a float as a JSON number, keeping whole values integral
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}
