//! Multi-version key format.
//!
//! Every entry the engine stores is keyed by an internal key:
//!
//! ```text
//! +----------------+----------------------------------+
//! | user key       | tag = (sequence << 8) | type     |
//! +----------------+----------------------------------+
//! |  variable      |        8 bytes, little-endian    |
//! +----------------+----------------------------------+
//! ```
//!
//! Internal keys order ascending by user key, then descending by tag, so a
//! seek to `(key, seq)` lands on the newest entry for `key` with sequence
//! <= seq. Sequences are 56-bit; the low byte of the tag is the value type.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::util::coding::{decode_fixed64, put_fixed64, put_varint32, varint_length};

pub type SequenceNumber = u64;

/// Sequences occupy 56 bits; the top byte of the tag is the type.
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1 << 56) - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueType {
    Deletion = 0x0,
    Value = 0x1,
}

/// Seeks use the highest type value so that, given the descending tag
/// order, they land before every entry with the same (key, sequence).
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::Value;

impl TryFrom<u8> for ValueType {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0x0 => Ok(ValueType::Deletion),
            0x1 => Ok(ValueType::Value),
            other => Err(Error::Corruption(format!("unknown value type {other:#x}"))),
        }
    }
}

pub fn pack_sequence_and_type(seq: SequenceNumber, t: ValueType) -> u64 {
    debug_assert!(seq <= MAX_SEQUENCE_NUMBER);
    (seq << 8) | t as u64
}

/// A decoded internal key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

/// Splits `user_key ‖ tag` into its parts.
pub fn parse_internal_key(internal_key: &[u8]) -> Result<ParsedInternalKey<'_>> {
    if internal_key.len() < 8 {
        return Err(Error::Corruption("internal key too short".to_string()));
    }
    let split = internal_key.len() - 8;
    let tag = decode_fixed64(&internal_key[split..]);
    let value_type = ValueType::try_from((tag & 0xff) as u8)?;
    Ok(ParsedInternalKey {
        user_key: &internal_key[..split],
        sequence: tag >> 8,
        value_type,
    })
}

pub fn append_internal_key(
    dst: &mut Vec<u8>,
    user_key: &[u8],
    seq: SequenceNumber,
    t: ValueType,
) {
    dst.extend_from_slice(user_key);
    put_fixed64(dst, pack_sequence_and_type(seq, t));
}

/// The user-key prefix of an internal key.
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    debug_assert!(internal_key.len() >= 8);
    &internal_key[..internal_key.len() - 8]
}

/// An owned internal key, used for table boundary metadata.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct InternalKey {
    rep: Vec<u8>,
}

impl InternalKey {
    pub fn new(user_key: &[u8], seq: SequenceNumber, t: ValueType) -> Self {
        let mut rep = Vec::with_capacity(user_key.len() + 8);
        append_internal_key(&mut rep, user_key, seq, t);
        InternalKey { rep }
    }

    pub fn decode_from(encoded: &[u8]) -> Self {
        InternalKey {
            rep: encoded.to_vec(),
        }
    }

    pub fn encoded(&self) -> &[u8] {
        &self.rep
    }

    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.rep)
    }

    pub fn is_empty(&self) -> bool {
        self.rep.is_empty()
    }
}

impl fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match parse_internal_key(&self.rep) {
            Ok(parsed) => write!(
                f,
                "'{}' @ {} : {:?}",
                String::from_utf8_lossy(parsed.user_key),
                parsed.sequence,
                parsed.value_type
            ),
            Err(_) => write!(f, "(bad){:?}", self.rep),
        }
    }
}

/// Orders internal keys: ascending user key, then descending tag.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user_comparator: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    pub fn new(user_comparator: Arc<dyn Comparator>) -> Self {
        InternalKeyComparator { user_comparator }
    }

    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.user_comparator
    }
}

impl Comparator for InternalKeyComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self
            .user_comparator
            .compare(extract_user_key(a), extract_user_key(b))
        {
            Ordering::Equal => {
                let atag = decode_fixed64(&a[a.len() - 8..]);
                let btag = decode_fixed64(&b[b.len() - 8..]);
                // Larger tag (newer) sorts first.
                btag.cmp(&atag)
            }
            other => other,
        }
    }

    fn name(&self) -> &'static str {
        "cinderdb.InternalKeyComparator"
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let user_start = extract_user_key(start);
        let user_limit = extract_user_key(limit);
        let mut tmp = user_start.to_vec();
        self.user_comparator
            .find_shortest_separator(&mut tmp, user_limit);
        if tmp.len() < user_start.len()
            && self.user_comparator.compare(user_start, &tmp) == Ordering::Less
        {
            // User key became shorter but larger; tack on the earliest
            // possible tag so the separator sorts before any real entry
            // with that user key.
            put_fixed64(
                &mut tmp,
                pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK),
            );
            debug_assert!(self.compare(start, &tmp) == Ordering::Less);
            debug_assert!(self.compare(&tmp, limit) == Ordering::Less);
            *start = tmp;
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        let user_key = extract_user_key(key);
        let mut tmp = user_key.to_vec();
        self.user_comparator.find_short_successor(&mut tmp);
        if tmp.len() < user_key.len()
            && self.user_comparator.compare(user_key, &tmp) == Ordering::Less
        {
            put_fixed64(
                &mut tmp,
                pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK),
            );
            debug_assert!(self.compare(key, &tmp) == Ordering::Less);
            *key = tmp;
        }
    }
}

/// Adapts a user-key filter policy to the internal keys the table layer
/// stores: tags are stripped before keys reach the wrapped policy. The
/// name passes through so filters stay readable across reopen.
pub struct InternalFilterPolicy {
    user_policy: Arc<dyn crate::filter::FilterPolicy>,
}

impl InternalFilterPolicy {
    pub fn new(user_policy: Arc<dyn crate::filter::FilterPolicy>) -> Self {
        InternalFilterPolicy { user_policy }
    }
}

impl crate::filter::FilterPolicy for InternalFilterPolicy {
    fn name(&self) -> &'static str {
        self.user_policy.name()
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        let user_keys: Vec<&[u8]> = keys.iter().map(|k| extract_user_key(k)).collect();
        self.user_policy.create_filter(&user_keys, dst);
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        self.user_policy.key_may_match(extract_user_key(key), filter)
    }
}

/// A point-read key, holding both the memtable form and the internal-key
/// form over one buffer:
///
/// ```text
/// varint32(klen + 8) ‖ user_key ‖ tag(seq, kValueTypeForSeek)
/// ^ memtable_key      ^ internal_key starts after the varint
/// ```
pub struct LookupKey {
    rep: Vec<u8>,
    key_start: usize,
}

impl LookupKey {
    pub fn new(user_key: &[u8], seq: SequenceNumber) -> Self {
        let internal_len = user_key.len() + 8;
        let mut rep = Vec::with_capacity(varint_length(internal_len as u64) + internal_len);
        put_varint32(&mut rep, internal_len as u32);
        let key_start = rep.len();
        rep.extend_from_slice(user_key);
        put_fixed64(&mut rep, pack_sequence_and_type(seq, VALUE_TYPE_FOR_SEEK));
        LookupKey { rep, key_start }
    }

    /// Length-prefixed form, matching the memtable entry prefix.
    pub fn memtable_key(&self) -> &[u8] {
        &self.rep
    }

    /// `user_key ‖ tag`.
    pub fn internal_key(&self) -> &[u8] {
        &self.rep[self.key_start..]
    }

    pub fn user_key(&self) -> &[u8] {
        &self.rep[self.key_start..self.rep.len() - 8]
    }
}
