//! Transfer documents exchanged with the compute side.
//!
//! Jobs, results and point lookups cross the process boundary as JSON text.
//! Binary payloads (encoded keys, values) always travel as base64 strings.
//!
//! Conversions are explicit per entity: `*_to_transfer` builds a
//! [`serde_json::Value`], `*_from_transfer` checks every required field and
//! rebuilds the domain value. Domain types carry no serde derives.
//!
//! ```text
//! FileEntry = { "number": u64, "file_size": u64, "smallest": base64, "largest": base64 }
//! ```

pub mod job;
pub mod lookup;

pub use job::{
    decode_job, decode_result, encode_job, encode_result, CompactionJob, CompactionResult,
};
pub use lookup::{LookupOutcome, LookupRequest, LookupResponse};

use crate::error::{Error, Result};
use crate::filename::{require_tier, Tier};
use crate::key::EncodedKey;
use crate::manifest::{LocalFile, RemoteFile};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Envelope wrapping a document as the `data` string of an invocation payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationEnvelope {
    /// The wrapped document text
    pub data: String,
}

/// Reply of the remote compaction function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionResponse {
    /// Result document text
    pub data: String,
    /// Seconds spent fetching inputs
    #[serde(default)]
    pub download_time: f64,
    /// Seconds spent merging
    #[serde(default)]
    pub merge_time: f64,
    /// Seconds spent uploading outputs
    #[serde(default)]
    pub upload_time: f64,
}

/// Encodes binary data as base64 text.
pub fn encode_base64(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Decodes base64 text.
pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    Ok(BASE64.decode(text)?)
}

/// Builds the transfer form of a local file.
pub fn local_file_to_transfer(file: &LocalFile) -> Value {
    file_entry(file.number, file.file_size, &file.smallest, &file.largest)
}

/// Builds the transfer form of a remote file.
pub fn remote_file_to_transfer(file: &RemoteFile) -> Value {
    file_entry(file.number, file.file_size, &file.smallest, &file.largest)
}

/// Rebuilds a local file from its transfer form.
pub fn local_file_from_transfer(value: &Value) -> Result<LocalFile> {
    let (number, file_size, smallest, largest) = parse_file_entry(value)?;
    require_tier(number, Tier::Local)?;
    Ok(LocalFile::new(number, file_size, smallest, largest))
}

/// Rebuilds a remote file from its transfer form.
pub fn remote_file_from_transfer(value: &Value) -> Result<RemoteFile> {
    let (number, file_size, smallest, largest) = parse_file_entry(value)?;
    require_tier(number, Tier::Remote)?;
    Ok(RemoteFile::new(number, file_size, smallest, largest))
}

fn file_entry(number: u64, file_size: u64, smallest: &EncodedKey, largest: &EncodedKey) -> Value {
    json!({
        "number": number,
        "file_size": file_size,
        "smallest": encode_base64(smallest.as_bytes()),
        "largest": encode_base64(largest.as_bytes()),
    })
}

fn parse_file_entry(value: &Value) -> Result<(u64, u64, EncodedKey, EncodedKey)> {
    let entry = as_object(value, "file entry")?;
    let number = required_u64(entry, "number")?;
    let file_size = required_u64(entry, "file_size")?;
    let smallest = EncodedKey::new(decode_base64(required_str(entry, "smallest")?)?);
    let largest = EncodedKey::new(decode_base64(required_str(entry, "largest")?)?);
    Ok((number, file_size, smallest, largest))
}

pub(crate) fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| Error::corruption(format!("{} is not a JSON object", what)))
}

pub(crate) fn required<'a>(object: &'a Map<String, Value>, field: &str) -> Result<&'a Value> {
    object
        .get(field)
        .ok_or_else(|| Error::corruption(format!("missing required field `{}`", field)))
}

pub(crate) fn required_u64(object: &Map<String, Value>, field: &str) -> Result<u64> {
    required(object, field)?
        .as_u64()
        .ok_or_else(|| Error::corruption(format!("field `{}` is not an unsigned integer", field)))
}

pub(crate) fn required_str<'a>(object: &'a Map<String, Value>, field: &str) -> Result<&'a str> {
    required(object, field)?
        .as_str()
        .ok_or_else(|| Error::corruption(format!("field `{}` is not a string", field)))
}

pub(crate) fn required_array<'a>(object: &'a Map<String, Value>, field: &str) -> Result<&'a [Value]> {
    required(object, field)?
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| Error::corruption(format!("field `{}` is not an array", field)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_entry_fields() {
        let file = LocalFile::new(4, 100, EncodedKey::new(vec![1u8]), EncodedKey::new(vec![2u8]));
        let value = local_file_to_transfer(&file);
        assert_eq!(value, json!({"number": 4, "file_size": 100, "smallest": "AQ==", "largest": "Ag=="}));
        assert_eq!(local_file_from_transfer(&value).unwrap(), file);
    }

    #[test]
    fn test_missing_field_rejected() {
        let value = json!({"number": 4, "file_size": 100, "smallest": "AQ=="});
        let err = local_file_from_transfer(&value).unwrap_err();
        assert!(matches!(err, Error::Corruption(ref msg) if msg.contains("largest")));
    }

    #[test]
    fn test_bad_base64_rejected() {
        let value = json!({"number": 4, "file_size": 1, "smallest": "not base64!", "largest": "Ag=="});
        assert!(matches!(local_file_from_transfer(&value), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_tier_checked() {
        let value = json!({"number": 4, "file_size": 1, "smallest": "AQ==", "largest": "Ag=="});
        assert!(matches!(remote_file_from_transfer(&value), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = InvocationEnvelope { data: "{\"a\":1}".to_string() };
        let text = serde_json::to_string(&envelope).unwrap();
        assert_eq!(serde_json::from_str::<InvocationEnvelope>(&text).unwrap(), envelope);

        let response: CompactionResponse = serde_json::from_str(r#"{"data":"[]"}"#).unwrap();
        assert_eq!(response.merge_time, 0.0);
    }
}
