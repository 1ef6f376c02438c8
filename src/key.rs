//! Internal key encoding and ordering.
//!
//! An internal key is the user key followed by a packed 64-bit tail holding
//! the sequence number in the high 56 bits and the value type in the low 8:
//!
//! ```text
//! +----------------+---------------------------------+
//! | user key (var) | (sequence << 8) | type, u64 LE  |
//! +----------------+---------------------------------+
//! ```
//!
//! Internal keys sort by user key ascending, then by the packed tail
//! descending, so that for one user key the newest entry comes first and
//! shadows everything older during a merge.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::corruption;
use crate::error::Result;

/// Sequence number of a write, at most 56 bits wide.
pub type SequenceNumber = u64;

/// Largest representable sequence number.
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1 << 56) - 1;

const TAIL_SIZE: usize = 8;

/// Kind of entry an internal key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Deletion = 0,
    Value = 1,
}

/// Type used when constructing lookup keys. Value sorts before Deletion at
/// the same sequence, so a seek with this type finds every entry for
/// `(user_key, sequence)`.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::Value;

impl ValueType {
    fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(ValueType::Deletion),
            1 => Ok(ValueType::Value),
            n => corruption!("invalid value type: {n}"),
        }
    }
}

/// Packs a sequence number and value type into the 64-bit key tail.
pub fn pack_sequence_and_type(sequence: SequenceNumber, value_type: ValueType) -> u64 {
    assert!(sequence <= MAX_SEQUENCE_NUMBER);
    (sequence << 8) | value_type as u64
}

/// Returns the user key portion of an encoded internal key.
///
/// Panics if `internal_key` is shorter than the tail; keys that short are a
/// programming error, not data corruption.
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    assert!(internal_key.len() >= TAIL_SIZE);
    &internal_key[..internal_key.len() - TAIL_SIZE]
}

/// Splits an encoded internal key into its parts.
pub fn parse_internal_key(internal_key: &[u8]) -> Result<(&[u8], SequenceNumber, ValueType)> {
    if internal_key.len() < TAIL_SIZE {
        return corruption!(
            "internal key too short: {} bytes",
            internal_key.len()
        );
    }
    let split = internal_key.len() - TAIL_SIZE;
    let tail = LittleEndian::read_u64(&internal_key[split..]);
    let value_type = ValueType::from_u8((tail & 0xff) as u8)?;
    Ok((&internal_key[..split], tail >> 8, value_type))
}

/// An owned, encoded internal key.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct InternalKey(Vec<u8>);

impl InternalKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber, value_type: ValueType) -> Self {
        let mut data = Vec::with_capacity(user_key.len() + TAIL_SIZE);
        data.extend_from_slice(user_key);
        let mut tail = [0u8; TAIL_SIZE];
        LittleEndian::write_u64(&mut tail, pack_sequence_and_type(sequence, value_type));
        data.extend_from_slice(&tail);
        InternalKey(data)
    }

    /// Wraps already-encoded bytes, validating the tail.
    pub fn decode_from(data: Vec<u8>) -> Result<Self> {
        parse_internal_key(&data)?;
        Ok(InternalKey(data))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.0)
    }
}

impl fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match parse_internal_key(&self.0) {
            Ok((user_key, sequence, value_type)) => write!(
                f,
                "{:?}@{}:{:?}",
                String::from_utf8_lossy(user_key),
                sequence,
                value_type
            ),
            Err(_) => write!(f, "(bad){:?}", self.0),
        }
    }
}

/// User key ordering. The database's sort order is fixed for its lifetime;
/// the comparator's name is persisted in the MANIFEST as the witness.
pub trait Comparator: Send + Sync {
    fn name(&self) -> &'static str;
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Lexicographic byte ordering.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn name(&self) -> &'static str {
        "emberdb.BytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Orders encoded internal keys: user key ascending via the user comparator,
/// packed tail descending so newer entries sort first.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    pub fn new(user: Arc<dyn Comparator>) -> Self {
        Self { user }
    }

    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.user
    }

    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self
            .user
            .compare(extract_user_key(a), extract_user_key(b))
        {
            Ordering::Equal => {
                let a_tail = LittleEndian::read_u64(&a[a.len() - TAIL_SIZE..]);
                let b_tail = LittleEndian::read_u64(&b[b.len() - TAIL_SIZE..]);
                b_tail.cmp(&a_tail)
            }
            ord => ord,
        }
    }

    pub fn compare_keys(&self, a: &InternalKey, b: &InternalKey) -> Ordering {
        self.compare(a.as_bytes(), b.as_bytes())
    }
}

impl fmt::Debug for InternalKeyComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalKeyComparator")
            .field("user", &self.user.name())
            .finish()
    }
}

/// Key handed to the read path: a user key plus the snapshot sequence it
/// should be read at, encoded in seekable internal form.
pub struct LookupKey {
    data: Vec<u8>,
}

impl LookupKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber) -> Self {
        let key = InternalKey::new(user_key, sequence, VALUE_TYPE_FOR_SEEK);
        LookupKey { data: key.0 }
    }

    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.data)
    }

    pub fn internal_key(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    #[test]
    fn test_internal_key_roundtrip() {
        let key = InternalKey::new(b"apple", 42, ValueType::Value);
        let (user_key, sequence, value_type) = parse_internal_key(key.as_bytes()).unwrap();
        assert_eq!(user_key, b"apple");
        assert_eq!(sequence, 42);
        assert_eq!(value_type, ValueType::Value);
        assert_eq!(key.user_key(), b"apple");
    }

    #[test]
    fn test_parse_rejects_short_key() {
        assert!(parse_internal_key(b"short").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_type() {
        let mut data = InternalKey::new(b"k", 1, ValueType::Value).0;
        let split = data.len() - TAIL_SIZE;
        data[split] = 7;
        assert!(parse_internal_key(&data).is_err());
        assert!(InternalKey::decode_from(data).is_err());
    }

    #[test]
    fn test_user_key_order_dominates() {
        let icmp = icmp();
        let a = InternalKey::new(b"a", 100, ValueType::Value);
        let b = InternalKey::new(b"b", 1, ValueType::Value);
        assert_eq!(icmp.compare_keys(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_newer_sequence_sorts_first() {
        let icmp = icmp();
        let newer = InternalKey::new(b"k", 10, ValueType::Value);
        let older = InternalKey::new(b"k", 9, ValueType::Value);
        assert_eq!(icmp.compare_keys(&newer, &older), Ordering::Less);
    }

    #[test]
    fn test_value_sorts_before_deletion_at_same_sequence() {
        let icmp = icmp();
        let value = InternalKey::new(b"k", 10, ValueType::Value);
        let deletion = InternalKey::new(b"k", 10, ValueType::Deletion);
        assert_eq!(icmp.compare_keys(&value, &deletion), Ordering::Less);
    }

    #[test]
    fn test_lookup_key_sees_equal_sequence() {
        let icmp = icmp();
        let lookup = LookupKey::new(b"k", 10);
        let entry = InternalKey::new(b"k", 10, ValueType::Value);
        assert_eq!(icmp.compare(lookup.internal_key(), entry.as_bytes()), Ordering::Equal);
        let older = InternalKey::new(b"k", 9, ValueType::Value);
        assert_eq!(icmp.compare(lookup.internal_key(), older.as_bytes()), Ordering::Less);
    }

    #[test]
    fn test_pack_sequence_and_type() {
        assert_eq!(pack_sequence_and_type(0, ValueType::Deletion), 0);
        assert_eq!(pack_sequence_and_type(1, ValueType::Value), 0x101);
        assert_eq!(
            pack_sequence_and_type(MAX_SEQUENCE_NUMBER, ValueType::Value),
            u64::MAX - 0xff + 1
        );
    }
}
