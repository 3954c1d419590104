// Stream-level items shared by the binary and text codecs
//
// Both codecs deliver the same stream contents: typed values interleaved
// with application payloads in exactly their wire positions, plus the
// ordering-hint bookkeeping a reader uses to hold writers to their
// sorted-output promise.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, Result};
use crate::value::Value;

/// Lowest control code available to applications; 0-5 belong to the format
pub const MIN_PAYLOAD_CODE: u8 = 6;
/// Highest control code expressible in the 7-bit header
pub const MAX_PAYLOAD_CODE: u8 = 127;

/// One stream element as seen by a consumer
#[derive(Debug, Clone)]
pub enum Item {
    Value(Value),
    /// Application control message, delivered in stream order
    Payload(Payload),
}

/// Opaque application payload with its control code
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub code: u8,
    pub body: Bytes,
}

/// One component of an ordering hint: a top-level field and a direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub ascending: bool,
}

/// A writer's promise that subsequent records are sorted by the listed
/// top-level fields. A new hint replaces the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderingHint {
    pub keys: Vec<SortKey>,
}

impl OrderingHint {
    /// Parse the wire form `[+-]field(,[+-]field)*`
    pub fn parse(text: &str) -> Result<OrderingHint> {
        let mut keys = Vec::new();
        for part in text.split(',') {
            let mut chars = part.chars();
            let ascending = match chars.next() {
                Some('+') => true,
                Some('-') => false,
                _ => {
                    return Err(DecodeError::Malformed(format!(
                        "ordering hint field {:?} must start with + or -",
                        part
                    ))
                    .into())
                }
            };
            let field: String = chars.collect();
            if field.is_empty() {
                return Err(
                    DecodeError::Malformed("ordering hint names an empty field".to_string()).into(),
                );
            }
            keys.push(SortKey { field, ascending });
        }
        Ok(OrderingHint { keys })
    }
}

impl fmt::Display for OrderingHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(
                f,
                "{}{}",
                if key.ascending { '+' } else { '-' },
                key.field
            )?;
        }
        Ok(())
    }
}

/// Enforces the active ordering hint against successive record values
#[derive(Debug, Default)]
pub struct OrderTracker {
    hint: Option<OrderingHint>,
    prev: Option<Vec<Option<Vec<u8>>>>,
}

impl OrderTracker {
    pub fn new() -> Self {
        OrderTracker::default()
    }

    /// Install a new hint, discarding comparison state from the old one
    pub fn set_hint(&mut self, hint: OrderingHint) {
        self.hint = Some(hint);
        self.prev = None;
    }

    pub fn hint(&self) -> Option<&OrderingHint> {
        self.hint.as_ref()
    }

    /// Check one value against the active hint. Non-record values are not
    /// constrained by ordering hints.
    pub fn check(&mut self, value: &Value) -> Result<()> {
        let hint = match &self.hint {
            Some(h) => h,
            None => return Ok(()),
        };
        if value.ty.columns().is_none() || value.is_unset() {
            return Ok(());
        }
        let key = sort_key_bodies(value, hint)?;
        if let Some(prev) = &self.prev {
            for (sort_key, (p, c)) in hint.keys.iter().zip(prev.iter().zip(key.iter())) {
                // Unset sorts before set; bytes compare lexicographically
                let mut ord = p.cmp(c);
                if !sort_key.ascending {
                    ord = ord.reverse();
                }
                match ord {
                    std::cmp::Ordering::Less => break,
                    std::cmp::Ordering::Equal => continue,
                    std::cmp::Ordering::Greater => {
                        return Err(DecodeError::OrderingViolation(format!(
                            "field {} regressed",
                            sort_key.field
                        ))
                        .into())
                    }
                }
            }
        }
        self.prev = Some(key);
        Ok(())
    }
}

// Body bytes of each hint field, in hint order; absent fields read as unset
fn sort_key_bodies(value: &Value, hint: &OrderingHint) -> Result<Vec<Option<Vec<u8>>>> {
    let cols = value.ty.columns().unwrap_or(&[]);
    let mut bodies: Vec<Option<Vec<u8>>> = Vec::with_capacity(cols.len());
    for element in value.iter() {
        bodies.push(element?.body.map(|b| b.to_vec()));
    }
    Ok(hint
        .keys
        .iter()
        .map(|k| {
            cols.iter()
                .position(|c| c.name == k.field)
                .and_then(|i| bodies.get(i).cloned().flatten())
        })
        .collect())
}
