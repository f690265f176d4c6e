// crates/core/src/checksum.rs
//! Row and dataset checksums

use crate::row::{IdentityKey, Row};
use serde_json::Value;
use std::collections::HashMap;

/// md5 over the row's fields in sorted name order
///
/// Names and values are JSON-encoded so `"2"` and `2` hash differently.
pub fn row_checksum(row: &Row) -> String {
    let mut canonical = String::new();
    for (field, value) in row.iter() {
        canonical.push_str(&Value::String(field.clone()).to_string());
        canonical.push(':');
        canonical.push_str(&value.to_string());
        canonical.push(',');
    }
    format!("{:x}", md5::compute(canonical.as_bytes()))
}

/// md5 over the sorted checksums of the rows that win their identity key
///
/// Row order does not contribute, so a reordered but otherwise identical
/// fetch passes the change gate untouched. When a key repeats, only the last
/// occurrence is hashed, so reordering duplicates changes the checksum
/// exactly when it changes which row is in effect.
pub fn dataset_checksum(rows: &[Row]) -> String {
    let mut effective: HashMap<IdentityKey, String> = HashMap::with_capacity(rows.len());
    for row in rows {
        effective.insert(row.identity_key(), row_checksum(row));
    }
    let mut sums: Vec<String> = effective.into_values().collect();
    sums.sort_unstable();

    let canonical = format!("{}\n{}", rows.len(), sums.join("\n"));
    format!("{:x}", md5::compute(canonical.as_bytes()))
}
