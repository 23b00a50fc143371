//! # Keys and key ordering
//!
//! Files in both tiers are described by their smallest and largest keys. The
//! manifest and the transfer documents carry those keys as opaque
//! [`EncodedKey`] bytes; only the comparator knows how to order them.
//!
//! ## Internal key format
//!
//! ```text
//! InternalKey:
//!   [user_key: bytes] [(sequence << 8) | type: u64 LE]
//! ```
//!
//! Internal keys order by user key ascending, then sequence descending, then
//! type descending, so the newest version of a user key sorts first.

use std::cmp::Ordering;
use std::fmt;

/// Largest sequence number an internal key can carry (56 bits).
pub const MAX_SEQUENCE: u64 = (1 << 56) - 1;

/// Size of the packed sequence/type trailer.
const TRAILER_LEN: usize = 8;

/// The type of an entry in a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueType {
    /// A tombstone indicating the key has been deleted
    Deletion = 0,

    /// A normal value
    Value = 1,
}

impl ValueType {
    /// Converts a u8 to a ValueType.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ValueType::Deletion),
            1 => Some(ValueType::Value),
            _ => None,
        }
    }
}

/// Opaque, comparator-encoded key bytes as stored in the manifest.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct EncodedKey(Vec<u8>);

impl EncodedKey {
    /// Wraps already-encoded key bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the key and returns the raw bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    /// Whether no bytes are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The user key portion, when the bytes parse as an internal key.
    pub fn user_key(&self) -> Option<&[u8]> {
        extract_user_key(&self.0)
    }
}

impl From<Vec<u8>> for EncodedKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&InternalKey> for EncodedKey {
    fn from(key: &InternalKey) -> Self {
        Self(key.encode())
    }
}

impl fmt::Debug for EncodedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match InternalKey::decode(&self.0) {
            Some(key) => write!(f, "{:?}", key),
            None => write!(f, "EncodedKey({:02x?})", self.0),
        }
    }
}

/// A user key tagged with a sequence number and entry type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalKey {
    user_key: Vec<u8>,
    sequence: u64,
    value_type: ValueType,
}

impl InternalKey {
    /// Creates a new InternalKey. The sequence is truncated to 56 bits.
    pub fn new(user_key: impl Into<Vec<u8>>, sequence: u64, value_type: ValueType) -> Self {
        Self { user_key: user_key.into(), sequence: sequence & MAX_SEQUENCE, value_type }
    }

    /// Returns the user key.
    pub fn user_key(&self) -> &[u8] {
        &self.user_key
    }

    /// Returns the sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the value type.
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Encodes the key: user key followed by the packed trailer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.user_key.len() + TRAILER_LEN);
        buf.extend_from_slice(&self.user_key);
        let trailer = (self.sequence << 8) | self.value_type as u64;
        buf.extend_from_slice(&trailer.to_le_bytes());
        buf
    }

    /// Decodes an encoded internal key. Returns None if the trailer is missing
    /// or carries an unknown type.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let (user_key, sequence, value_type) = split_internal_key(data)?;
        Some(Self { user_key: user_key.to_vec(), sequence, value_type })
    }
}

/// Returns the user key portion of an encoded internal key.
pub fn extract_user_key(data: &[u8]) -> Option<&[u8]> {
    split_internal_key(data).map(|(user_key, _, _)| user_key)
}

fn split_internal_key(data: &[u8]) -> Option<(&[u8], u64, ValueType)> {
    if data.len() < TRAILER_LEN {
        return None;
    }
    let (user_key, trailer) = data.split_at(data.len() - TRAILER_LEN);
    let trailer = u64::from_le_bytes(trailer.try_into().ok()?);
    let value_type = ValueType::from_u8((trailer & 0xff) as u8)?;
    Some((user_key, trailer >> 8, value_type))
}

/// Ordering capability over encoded keys.
///
/// The cloud tier never re-implements the engine's comparator; it only uses
/// one to validate file ranges and to test overlap.
pub trait KeyComparator: Send + Sync {
    /// Name recorded in the manifest.
    fn name(&self) -> &str;

    /// Three-way comparison of two encoded keys.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Compares only the user-key portion of two encoded keys, as used for
    /// range overlap. Defaults to [`KeyComparator::compare`].
    fn compare_user_keys(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.compare(a, b)
    }
}

/// Lexicographic byte ordering.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn name(&self) -> &str {
        "leveldb.BytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Orders internal keys; falls back to byte order for keys that do not parse.
#[derive(Debug, Clone, Copy, Default)]
pub struct InternalKeyComparator;

impl KeyComparator for InternalKeyComparator {
    fn name(&self) -> &str {
        "leveldb.InternalKeyComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match (split_internal_key(a), split_internal_key(b)) {
            (Some((ua, sa, ta)), Some((ub, sb, tb))) => {
                ua.cmp(ub).then_with(|| sb.cmp(&sa)).then_with(|| tb.cmp(&ta))
            }
            _ => a.cmp(b),
        }
    }

    fn compare_user_keys(&self, a: &[u8], b: &[u8]) -> Ordering {
        match (extract_user_key(a), extract_user_key(b)) {
            (Some(ua), Some(ub)) => ua.cmp(ub),
            _ => a.cmp(b),
        }
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.user_key
            .cmp(&other.user_key)
            .then_with(|| other.sequence.cmp(&self.sequence))
            .then_with(|| other.value_type.cmp(&self.value_type))
    }
}
