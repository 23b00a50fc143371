//! Point lookup request and response documents.
//!
//! ```text
//! request  = { "user_key": base64, "number": u64 }
//! response = { "status": u8, "value": base64? }
//! ```

use crate::error::{Error, Result};
use crate::filename::{require_tier, Tier};
use crate::transfer::{as_object, decode_base64, encode_base64, required, required_str, required_u64};
use serde_json::{json, Map, Value};

const STATUS_FOUND: u64 = 0;
const STATUS_NOT_FOUND: u64 = 1;
const STATUS_DELETED: u64 = 2;
const STATUS_CORRUPT: u64 = 3;

/// Outcome of probing one table for a user key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// The newest entry for the key holds this value
    Found(Vec<u8>),
    /// The table has no entry for the key
    NotFound,
    /// The newest entry for the key is a tombstone
    Deleted,
}

/// Asks the compute side to search one remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRequest {
    /// User key to look up
    pub user_key: Vec<u8>,
    /// Remote object number to search
    pub number: u64,
}

impl LookupRequest {
    /// Builds the transfer form.
    pub fn to_transfer(&self) -> Value {
        json!({
            "user_key": encode_base64(&self.user_key),
            "number": self.number,
        })
    }

    /// Rebuilds a request from its transfer form.
    pub fn from_transfer(value: &Value) -> Result<Self> {
        let object = as_object(value, "lookup request")?;
        let user_key = decode_base64(required_str(object, "user_key")?)?;
        let number = required_u64(object, "number")?;
        require_tier(number, Tier::Remote)?;
        Ok(Self { user_key, number })
    }

    /// Serializes to document text.
    pub fn encode(&self) -> String {
        self.to_transfer().to_string()
    }

    /// Parses document text.
    pub fn decode(text: &str) -> Result<Self> {
        Self::from_transfer(&serde_json::from_str(text)?)
    }
}

/// Reply to a [`LookupRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupResponse {
    /// Result of the search
    pub outcome: LookupOutcome,
}

impl LookupResponse {
    /// Wraps an outcome.
    pub fn new(outcome: LookupOutcome) -> Self {
        Self { outcome }
    }

    /// Response reporting that the table could not be read.
    pub fn corrupt() -> Value {
        json!({ "status": STATUS_CORRUPT })
    }

    /// Builds the transfer form.
    pub fn to_transfer(&self) -> Value {
        match &self.outcome {
            LookupOutcome::Found(value) => json!({
                "status": STATUS_FOUND,
                "value": encode_base64(value),
            }),
            LookupOutcome::NotFound => json!({ "status": STATUS_NOT_FOUND }),
            LookupOutcome::Deleted => json!({ "status": STATUS_DELETED }),
        }
    }

    /// Rebuilds a response from its transfer form.
    ///
    /// A value attached to anything but a hit is ignored.
    pub fn from_transfer(value: &Value) -> Result<Self> {
        let object = as_object(value, "lookup response")?;
        let outcome = match required_u64(object, "status")? {
            STATUS_FOUND => LookupOutcome::Found(found_value(object)?),
            STATUS_NOT_FOUND => LookupOutcome::NotFound,
            STATUS_DELETED => LookupOutcome::Deleted,
            STATUS_CORRUPT => return Err(Error::corruption("remote table reported corruption")),
            other => return Err(Error::corruption(format!("unknown lookup status {}", other))),
        };
        Ok(Self { outcome })
    }

    /// Serializes to document text.
    pub fn encode(&self) -> String {
        self.to_transfer().to_string()
    }

    /// Parses document text.
    pub fn decode(text: &str) -> Result<Self> {
        Self::from_transfer(&serde_json::from_str(text)?)
    }
}

fn found_value(object: &Map<String, Value>) -> Result<Vec<u8>> {
    let text = required(object, "value")?
        .as_str()
        .ok_or_else(|| Error::corruption("field `value` is not a string"))?;
    decode_base64(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let request = LookupRequest { user_key: b"user42".to_vec(), number: 1_000_007 };
        assert_eq!(LookupRequest::decode(&request.encode()).unwrap(), request);
    }

    #[test]
    fn test_request_rejects_local_number() {
        let text = r#"{"user_key":"AQ==","number":7}"#;
        assert!(matches!(LookupRequest::decode(text), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_response_statuses() {
        let found = LookupResponse::new(LookupOutcome::Found(b"v".to_vec()));
        assert_eq!(found.to_transfer(), json!({"status": 0, "value": "dg=="}));
        assert_eq!(LookupResponse::decode(&found.encode()).unwrap(), found);

        for outcome in [LookupOutcome::NotFound, LookupOutcome::Deleted] {
            let response = LookupResponse::new(outcome);
            assert_eq!(LookupResponse::decode(&response.encode()).unwrap(), response);
        }
    }

    #[test]
    fn test_response_ignores_stray_value() {
        let response = LookupResponse::decode(r#"{"status":1,"value":"dg=="}"#).unwrap();
        assert_eq!(response.outcome, LookupOutcome::NotFound);
    }

    #[test]
    fn test_response_errors() {
        assert!(matches!(LookupResponse::decode(r#"{"status":0}"#), Err(Error::Corruption(_))));
        assert!(matches!(LookupResponse::decode(r#"{"status":3}"#), Err(Error::Corruption(_))));
        assert!(matches!(LookupResponse::decode(r#"{"status":9}"#), Err(Error::Corruption(_))));
        assert!(matches!(
            LookupResponse::from_transfer(&LookupResponse::corrupt()),
            Err(Error::Corruption(_))
        ));
    }
}
