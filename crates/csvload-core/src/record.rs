//! Raw records decoded from a delimited file

use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

/// Column names from a file's header row, shared by every record of that file.
pub type Header = Arc<[String]>;

/// One decoded data row, keyed positionally by the header's column names.
///
/// Values stay strings; no type coercion happens anywhere in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    header: Header,
    values: Vec<String>,
    row: u64,
}

impl RawRecord {
    /// `row` is the 1-based data row number (the header row is row 0).
    pub fn new(header: Header, values: Vec<String>, row: u64) -> Self {
        debug_assert_eq!(header.len(), values.len(), "row {row}: header/value mismatch");
        Self {
            header,
            values,
            row,
        }
    }

    pub fn row(&self) -> u64 {
        self.row
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Value of the first column named `column`
    pub fn get(&self, column: &str) -> Option<&str> {
        self.header
            .iter()
            .position(|h| h == column)
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
    }

    /// `(column, value)` pairs in header order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.header
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// JSON object in header order. Duplicate column names keep the last value.
    pub fn to_json_map(&self) -> Map<String, Value> {
        self.iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }
}

impl Serialize for RawRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (k, v) in self.iter() {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[cfg(test)]
pub(crate) fn test_header(cols: &[&str]) -> Header {
    cols.iter().map(|c| c.to_string()).collect()
}
