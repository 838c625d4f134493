//! User-visible iteration over the merged internal stream.
//!
//! The merging cursor yields every version of every key in internal-key
//! order. This wrapper collapses that stream to the user's view at a
//! snapshot: entries newer than the snapshot are invisible, only the
//! newest visible version of each user key is reported, and keys whose
//! newest visible entry is a deletion are hidden.
//!
//! Direction matters for the bookkeeping. Moving forward, the inner
//! cursor sits *at* the entry being reported. Moving backward it sits
//! *before* all entries for the reported key, whose bytes are parked in
//! `saved_key`/`saved_value`; that way `prev` can keep scanning without
//! re-reading the region it already consumed.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::dbformat::{
    append_internal_key, extract_user_key, parse_internal_key, SequenceNumber, ValueType,
    VALUE_TYPE_FOR_SEEK,
};
use crate::error::{Error, Result};
use crate::iterator::Cursor;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

pub struct DbCursor {
    ucmp: Arc<dyn Comparator>,
    inner: Box<dyn Cursor>,
    sequence: SequenceNumber,
    direction: Direction,
    valid: bool,
    saved_key: Vec<u8>,
    saved_value: Vec<u8>,
    status: Result<()>,
}

impl DbCursor {
    pub fn new(
        ucmp: Arc<dyn Comparator>,
        inner: Box<dyn Cursor>,
        sequence: SequenceNumber,
    ) -> Self {
        DbCursor {
            ucmp,
            inner,
            sequence,
            direction: Direction::Forward,
            valid: false,
            saved_key: Vec::new(),
            saved_value: Vec::new(),
            status: Ok(()),
        }
    }

    /// Parses the inner cursor's key, recording corruption once.
    fn parse_current(&mut self) -> Option<(Vec<u8>, SequenceNumber, ValueType)> {
        match parse_internal_key(self.inner.key()) {
            Ok(parsed) => Some((
                parsed.user_key.to_vec(),
                parsed.sequence,
                parsed.value_type,
            )),
            Err(_) => {
                if self.status.is_ok() {
                    self.status = Err(Error::Corruption(
                        "corrupted internal key in iterator".to_string(),
                    ));
                }
                None
            }
        }
    }

    /// Advances to the newest visible non-deleted entry, starting at the
    /// inner cursor's current position. With `skipping`, entries for user
    /// keys <= `saved_key` are versions already consumed or deleted.
    fn find_next_user_entry(&mut self, mut skipping: bool) {
        debug_assert!(self.direction == Direction::Forward);
        while self.inner.valid() {
            if let Some((user_key, sequence, value_type)) = self.parse_current() {
                if sequence <= self.sequence {
                    match value_type {
                        ValueType::Deletion => {
                            // Hide every older version of this key.
                            self.saved_key = user_key;
                            skipping = true;
                        }
                        ValueType::Value => {
                            if skipping
                                && self.ucmp.compare(&user_key, &self.saved_key)
                                    != Ordering::Greater
                            {
                                // Older version or deleted key.
                            } else {
                                self.valid = true;
                                self.saved_key.clear();
                                return;
                            }
                        }
                    }
                }
            }
            self.inner.next();
        }
        self.saved_key.clear();
        self.valid = false;
    }

    /// Scans backward to the newest visible entry of the greatest user key
    /// before the current position, parking it in the saved slots.
    fn find_prev_user_entry(&mut self) {
        debug_assert!(self.direction == Direction::Reverse);
        let mut value_type = ValueType::Deletion;
        while self.inner.valid() {
            if let Some((user_key, sequence, entry_type)) = self.parse_current() {
                if sequence <= self.sequence {
                    if value_type != ValueType::Deletion
                        && self.ucmp.compare(&user_key, &self.saved_key) == Ordering::Less
                    {
                        // Crossed into the previous user key: the saved
                        // entry is the answer.
                        break;
                    }
                    value_type = entry_type;
                    if value_type == ValueType::Deletion {
                        self.saved_key.clear();
                        self.saved_value.clear();
                    } else {
                        self.saved_key = user_key;
                        self.saved_value = self.inner.value().to_vec();
                    }
                }
            }
            self.inner.prev();
        }

        if value_type == ValueType::Deletion {
            // Ran off the beginning.
            self.valid = false;
            self.saved_key.clear();
            self.saved_value.clear();
            self.direction = Direction::Forward;
        } else {
            self.valid = true;
        }
    }
}

impl Cursor for DbCursor {
    fn valid(&self) -> bool {
        self.valid
    }

    fn seek_to_first(&mut self) {
        self.direction = Direction::Forward;
        self.saved_value.clear();
        self.inner.seek_to_first();
        if self.inner.valid() {
            self.find_next_user_entry(false);
        } else {
            self.valid = false;
        }
    }

    fn seek_to_last(&mut self) {
        self.direction = Direction::Reverse;
        self.saved_value.clear();
        self.saved_key.clear();
        self.inner.seek_to_last();
        self.find_prev_user_entry();
    }

    fn seek(&mut self, target: &[u8]) {
        self.direction = Direction::Forward;
        self.saved_value.clear();
        self.saved_key.clear();
        let mut internal_target = Vec::with_capacity(target.len() + 8);
        append_internal_key(
            &mut internal_target,
            target,
            self.sequence,
            VALUE_TYPE_FOR_SEEK,
        );
        self.inner.seek(&internal_target);
        if self.inner.valid() {
            self.find_next_user_entry(false);
        } else {
            self.valid = false;
        }
    }

    fn next(&mut self) {
        debug_assert!(self.valid);
        if self.direction == Direction::Reverse {
            self.direction = Direction::Forward;
            // The inner cursor sits before the entries for saved_key;
            // step onto them so the skip loop below consumes them.
            if !self.inner.valid() {
                self.inner.seek_to_first();
            } else {
                self.inner.next();
            }
            if !self.inner.valid() {
                self.valid = false;
                self.saved_key.clear();
                return;
            }
            // saved_key already holds the key to skip past.
        } else {
            self.saved_key = extract_user_key(self.inner.key()).to_vec();
            self.inner.next();
            if !self.inner.valid() {
                self.valid = false;
                self.saved_key.clear();
                return;
            }
        }
        self.find_next_user_entry(true);
    }

    fn prev(&mut self) {
        debug_assert!(self.valid);
        if self.direction == Direction::Forward {
            // The inner cursor is at the reported entry; back it up past
            // every version of the current user key.
            self.saved_key = extract_user_key(self.inner.key()).to_vec();
            loop {
                self.inner.prev();
                if !self.inner.valid() {
                    self.valid = false;
                    self.saved_key.clear();
                    self.saved_value.clear();
                    return;
                }
                if self
                    .ucmp
                    .compare(extract_user_key(self.inner.key()), &self.saved_key)
                    == Ordering::Less
                {
                    break;
                }
            }
            self.direction = Direction::Reverse;
        }
        self.find_prev_user_entry();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid);
        match self.direction {
            Direction::Forward => extract_user_key(self.inner.key()),
            Direction::Reverse => &self.saved_key,
        }
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid);
        match self.direction {
            Direction::Forward => self.inner.value(),
            Direction::Reverse => &self.saved_value,
        }
    }

    fn status(&self) -> Result<()> {
        self.status.clone()?;
        self.inner.status()
    }
}
