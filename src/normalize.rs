use std::collections::HashMap;

use serde_json::Value;

use crate::domain::ReadNumber;
use crate::error::SyncError;

pub const LIBRARY_NAME_PROP: &str = "library_name";
pub const RUN_NAME_PROP: &str = "seq_run_name";
pub const PAIRED_END_PROP: &str = "paired_end";
pub const LANE_INDEX_PROP: &str = "seq_lane_index";
pub const READ_PROP: &str = "read";

const POST_FILTER_KEY: &str = "Post-Filter Reads";

/// The facility writes the paired flag as a string literal; only the exact
/// value `"true"` counts as paired evidence.
pub fn paired_end(properties: &HashMap<String, String>) -> bool {
    properties.get(PAIRED_END_PROP).map(String::as_str) == Some("true")
}

/// Lane index is carried through verbatim; the registry stores whatever
/// the facility wrote.
pub fn lane_index(properties: &HashMap<String, String>) -> Option<&str> {
    properties.get(LANE_INDEX_PROP).map(String::as_str)
}

pub fn required_property<'p>(
    properties: &'p HashMap<String, String>,
    key: &str,
) -> Result<&'p str, SyncError> {
    properties
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| SyncError::MalformedUpstream(format!("missing project property '{key}'")))
}

/// Validated read number of a FASTQ file's property bag.
pub fn read_number(properties: &HashMap<String, String>) -> Result<ReadNumber, SyncError> {
    let value = properties
        .get(READ_PROP)
        .ok_or_else(|| SyncError::MalformedUpstream("file has no 'read' property".to_string()))?;
    ReadNumber::from_property(value)
}

/// Pass-filter read count for one read, looked up in the per-barcode
/// statistics blob under `"Read {1|2}"`.
pub fn post_filter_reads(stats: &Value, read: ReadNumber) -> Result<u64, SyncError> {
    stats
        .get(read.stats_key())
        .and_then(|entry| entry.get(POST_FILTER_KEY))
        .and_then(|count| count.as_u64())
        .ok_or_else(|| {
            SyncError::MalformedUpstream(format!(
                "sample statistics missing '{}' for '{}'",
                POST_FILTER_KEY,
                read.stats_key()
            ))
        })
}
