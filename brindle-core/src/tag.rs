// Tag-counted container bodies
//
// A container body is a concatenation of elements, each prefixed by a
// uvarint tag. Tag 0 is an unset primitive, tag 1 an unset container;
// any other tag packs the body length and the container bit into
// `tag - 2`. Element count is implicit: a body is walked, never length-
// prefixed.

use crate::error::{DecodeError, Result};
use crate::varint::{put_uvarint, uvarint};

pub const TAG_UNSET_PRIMITIVE: u64 = 0;
pub const TAG_UNSET_CONTAINER: u64 = 1;

/// Compute the tag for a set element body
pub fn tag_for(len: usize, container: bool) -> u64 {
    ((len as u64) << 1 | u64::from(container)) + 2
}

/// One element of a container body: its body bytes (None when unset) and
/// whether it is itself a container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Element<'a> {
    pub body: Option<&'a [u8]>,
    pub container: bool,
}

/// Walks a container body, yielding elements without interpreting them.
/// Embedded containers are skipped by byte length.
#[derive(Debug, Clone)]
pub struct Iter<'a> {
    rest: &'a [u8],
}

impl<'a> Iter<'a> {
    pub fn new(body: &'a [u8]) -> Self {
        Iter { rest: body }
    }

    /// True once the body is fully consumed
    pub fn done(&self) -> bool {
        self.rest.is_empty()
    }

    fn step(&mut self) -> Result<Element<'a>> {
        let (tag, n) = uvarint(self.rest)?;
        let rest = &self.rest[n..];
        match tag {
            TAG_UNSET_PRIMITIVE => {
                self.rest = rest;
                Ok(Element {
                    body: None,
                    container: false,
                })
            }
            TAG_UNSET_CONTAINER => {
                self.rest = rest;
                Ok(Element {
                    body: None,
                    container: true,
                })
            }
            _ => {
                let t = tag - 2;
                let len = usize::try_from(t >> 1).map_err(|_| {
                    DecodeError::Malformed(format!("element length {} too large", t >> 1))
                })?;
                if rest.len() < len {
                    return Err(DecodeError::Truncated.into());
                }
                self.rest = &rest[len..];
                Ok(Element {
                    body: Some(&rest[..len]),
                    container: t & 1 == 1,
                })
            }
        }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = Result<Element<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        Some(self.step())
    }
}

/// Append one tagged element to `buf`
pub fn append(buf: &mut Vec<u8>, body: Option<&[u8]>, container: bool) {
    match body {
        None => put_uvarint(
            buf,
            if container {
                TAG_UNSET_CONTAINER
            } else {
                TAG_UNSET_PRIMITIVE
            },
        ),
        Some(b) => {
            put_uvarint(buf, tag_for(b.len(), container));
            buf.extend_from_slice(b);
        }
    }
}

/// Return the full tag+body encoding of one element
///
/// Set ordering is defined over this encoding, so both the writer-side
/// sort and the reader-side check materialize it per element.
pub fn encode_element(body: Option<&[u8]>, container: bool) -> Vec<u8> {
    let mut buf = Vec::with_capacity(body.map_or(1, |b| b.len() + 2));
    append(&mut buf, body, container);
    buf
}

/// Accumulates tagged elements into a container body
#[derive(Debug, Default)]
pub struct Builder {
    buf: Vec<u8>,
}

impl Builder {
    pub fn new() -> Self {
        Builder::default()
    }

    pub fn append_primitive(&mut self, body: Option<&[u8]>) -> &mut Self {
        append(&mut self.buf, body, false);
        self
    }

    pub fn append_container(&mut self, body: Option<&[u8]>) -> &mut Self {
        append(&mut self.buf, body, true);
        self
    }

    /// Append an already-encoded element (tag included)
    pub fn append_encoded(&mut self, element: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(element);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_body(self) -> Vec<u8> {
        self.buf
    }
}
