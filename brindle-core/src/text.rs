// Text stream codec
//
// Lines are UTF-8 and carry exactly one message each. Control lines start
// with `#`: a decimal binds a producer-chosen tag to a type, an identifier
// installs an alias, `#!` carries an application payload, and a signed
// field list is an ordering hint. Value lines are `<tag>:` followed by a
// primitive terminal ended by `;` or a bracketed container. Tags are
// per-stream and independent of binary type ids.

use std::collections::{HashMap, HashSet};
use std::io::{BufRead, Write};
use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use crate::error::{DecodeError, Result, TypeError};
use crate::grammar;
use crate::registry::Registry;
use crate::stream::{
    Item, OrderTracker, OrderingHint, Payload, MAX_PAYLOAD_CODE, MIN_PAYLOAD_CODE,
};
use crate::tag::Builder;
use crate::types::{Kind, Primitive, TypeRef};
use crate::value::{self, Value};

/// Reads a line-oriented text stream
pub struct Reader<R> {
    inner: R,
    registry: Arc<Registry>,
    tags: HashMap<u64, TypeRef>,
    order: OrderTracker,
    line_no: u64,
}

impl<R: BufRead> Reader<R> {
    pub fn new(inner: R, registry: Arc<Registry>) -> Self {
        Reader {
            inner,
            registry,
            tags: HashMap::new(),
            order: OrderTracker::new(),
            line_no: 0,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Pull the next value or application payload; `None` at end of stream
    pub fn read(&mut self) -> Result<Option<Item>> {
        loop {
            let line = match self.next_line()? {
                Some(l) => l,
                None => return Ok(None),
            };
            if line.is_empty() {
                continue;
            }
            if let Some(control) = line.strip_prefix('#') {
                if let Some(item) = self.read_control(control)? {
                    return Ok(Some(item));
                }
            } else {
                return Ok(Some(Item::Value(self.read_value(&line)?)));
            }
        }
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        if self.inner.read_until(b'\n', &mut buf)? == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        String::from_utf8(buf)
            .map(Some)
            .map_err(|_| self.malformed("line is not UTF-8"))
    }

    fn malformed(&self, msg: &str) -> crate::error::Error {
        DecodeError::Malformed(format!("line {}: {}", self.line_no, msg)).into()
    }

    fn read_control(&mut self, control: &str) -> Result<Option<Item>> {
        trace!(line = self.line_no, "control line");
        if let Some(payload) = control.strip_prefix('!') {
            let (code, text) = payload
                .split_once(':')
                .ok_or_else(|| self.malformed("payload line missing ':'"))?;
            let code: u8 = code
                .parse()
                .ok()
                .filter(|c| (MIN_PAYLOAD_CODE..=MAX_PAYLOAD_CODE).contains(c))
                .ok_or_else(|| self.malformed("payload code out of range"))?;
            let body = unescape(text.as_bytes())
                .map_err(|_| self.malformed("bad escape in payload"))?;
            return Ok(Some(Item::Payload(Payload {
                code,
                body: Bytes::from(body),
            })));
        }
        if control.starts_with('+') || control.starts_with('-') {
            self.order.set_hint(OrderingHint::parse(control)?);
            return Ok(None);
        }
        let (name, type_str) = control
            .split_once(':')
            .ok_or_else(|| self.malformed("control line missing ':'"))?;
        let tags = &self.tags;
        let resolver = |t: u64| tags.get(&t).cloned();
        if name.chars().all(|c| c.is_ascii_digit()) && !name.is_empty() {
            let tag: u64 = name
                .parse()
                .map_err(|_| self.malformed("tag out of range"))?;
            let ty = grammar::parse_type_with(&self.registry, type_str, &resolver)?;
            self.tags.insert(tag, ty);
            Ok(None)
        } else if grammar::is_identifier(name) {
            let target = grammar::parse_type_with(&self.registry, type_str, &resolver)?;
            self.registry.intern_alias(name, target)?;
            Ok(None)
        } else {
            Err(self.malformed("control line is neither a tag binding nor an alias"))
        }
    }

    fn read_value(&mut self, line: &str) -> Result<Value> {
        let (tag, rest) = line
            .split_once(':')
            .ok_or_else(|| self.malformed("value line missing ':'"))?;
        let tag: u64 = tag
            .parse()
            .map_err(|_| self.malformed("value line must start with a decimal tag"))?;
        let ty = self
            .tags
            .get(&tag)
            .cloned()
            .ok_or_else(|| crate::error::Error::from(TypeError::Unknown(tag)))?;

        let mut parser = ValueParser {
            buf: rest.as_bytes(),
            pos: 0,
        };
        let body = parser.parse_element(&ty)?;
        if parser.pos != parser.buf.len() {
            return Err(self.malformed("trailing characters after value"));
        }
        value::validate(&ty, body.as_deref())?;
        let v = Value::new(ty, body.map(Bytes::from));
        self.order.check(&v)?;
        Ok(v)
    }
}

// Recursive-descent parse of a value against its type. Terminals consume
// their closing ';'; containers are bracketed with no separator.
struct ValueParser<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ValueParser<'a> {
    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn parse_element(&mut self, ty: &TypeRef) -> Result<Option<Vec<u8>>> {
        let resolved = ty.resolved();
        match resolved.kind() {
            Kind::Union(members) => self.parse_union(members),
            Kind::Record(_) | Kind::Array(_) | Kind::Set(_) => {
                if self.peek() == Some(b'[') {
                    self.parse_container(resolved.kind()).map(Some)
                } else {
                    match self.terminal()? {
                        Terminal::Unset => Ok(None),
                        Terminal::Data(_) => Err(DecodeError::Value(format!(
                            "primitive where {} expected",
                            ty.key()
                        ))
                        .into()),
                    }
                }
            }
            Kind::Primitive(p) => {
                if self.peek() == Some(b'[') {
                    return Err(DecodeError::Value(format!(
                        "container where {} expected",
                        ty.key()
                    ))
                    .into());
                }
                match self.terminal()? {
                    Terminal::Unset => Ok(None),
                    Terminal::Data(raw) => {
                        let decoded = unescape(&raw)?;
                        value::parse_primitive(*p, &decoded).map(Some)
                    }
                }
            }
            Kind::Alias { .. } => unreachable!("resolved() chases aliases"),
        }
    }

    fn parse_union(&mut self, members: &[TypeRef]) -> Result<Option<Vec<u8>>> {
        // Unset union is the bare terminal
        if self.peek() == Some(b'-') && self.buf.get(self.pos + 1) == Some(&b';') {
            self.pos += 2;
            return Ok(None);
        }
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        let digits = &self.buf[start..self.pos];
        if digits.is_empty() || self.peek() != Some(b':') {
            return Err(
                DecodeError::Value("union value must start with a member index".to_string())
                    .into(),
            );
        }
        self.pos += 1;
        let index: u64 = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| DecodeError::Value("union index out of range".to_string()))?;
        let member = usize::try_from(index)
            .ok()
            .and_then(|i| members.get(i))
            .ok_or_else(|| {
                DecodeError::Value(format!("union index {} out of range", index))
            })?;
        let inner = self.parse_element(member)?;

        let mut out = Builder::new();
        let mut index_body = Vec::new();
        crate::varint::put_uvarint(&mut index_body, index);
        out.append_primitive(Some(&index_body));
        if member.is_container() {
            out.append_container(inner.as_deref());
        } else {
            out.append_primitive(inner.as_deref());
        }
        Ok(Some(out.into_body()))
    }

    fn parse_container(&mut self, kind: &Kind) -> Result<Vec<u8>> {
        self.pos += 1; // consumes '['
        let mut out = Builder::new();
        match kind {
            Kind::Record(cols) => {
                for col in cols {
                    if self.peek() == Some(b']') || self.peek().is_none() {
                        return Err(DecodeError::Value(format!(
                            "record is missing field {}",
                            col.name
                        ))
                        .into());
                    }
                    let body = self.parse_element(&col.ty)?;
                    append(&mut out, body.as_deref(), col.ty.is_container());
                }
                if self.peek() != Some(b']') {
                    return Err(DecodeError::Value("record has extra fields".to_string()).into());
                }
            }
            Kind::Array(elem) | Kind::Set(elem) => {
                while self.peek() != Some(b']') {
                    if self.peek().is_none() {
                        return Err(DecodeError::Malformed("unterminated container".to_string())
                            .into());
                    }
                    let body = self.parse_element(elem)?;
                    append(&mut out, body.as_deref(), elem.is_container());
                }
            }
            _ => unreachable!("only bracketed kinds reach parse_container"),
        }
        self.pos += 1; // consumes ']'
        Ok(out.into_body())
    }

    // Scan a terminal up to its unescaped ';', consuming the ';'. The raw
    // single byte '-' denotes unset; escaped forms of '-' are data.
    fn terminal(&mut self) -> Result<Terminal> {
        let start = self.pos;
        loop {
            match self.peek() {
                None | Some(b']') => {
                    return Err(
                        DecodeError::Malformed("unterminated value terminal".to_string()).into(),
                    )
                }
                Some(b';') => break,
                Some(b'\\') => {
                    self.pos += 2;
                    if self.pos > self.buf.len() {
                        return Err(
                            DecodeError::Malformed("dangling escape".to_string()).into()
                        );
                    }
                }
                Some(_) => self.pos += 1,
            }
        }
        let raw = &self.buf[start..self.pos];
        self.pos += 1; // consumes ';'
        if raw == b"-" {
            Ok(Terminal::Unset)
        } else {
            Ok(Terminal::Data(raw.to_vec()))
        }
    }
}

enum Terminal {
    Unset,
    Data(Vec<u8>),
}

fn append(out: &mut Builder, body: Option<&[u8]>, container: bool) {
    if container {
        out.append_container(body);
    } else {
        out.append_primitive(body);
    }
}

/// Writes a line-oriented text stream, binding tags on first use
pub struct Writer<W> {
    inner: W,
    tags: HashMap<u64, u64>,
    next_tag: u64,
    aliases: HashSet<u64>,
}

impl<W: Write> Writer<W> {
    pub fn new(inner: W) -> Self {
        Writer {
            inner,
            tags: HashMap::new(),
            next_tag: 0,
            aliases: HashSet::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn write(&mut self, value: &Value) -> Result<()> {
        self.announce_aliases(&value.ty)?;
        let tag = match self.tags.get(&value.ty.id()) {
            Some(&t) => t,
            None => {
                let t = self.next_tag;
                self.next_tag += 1;
                self.inner
                    .write_all(format!("#{}:{}\n", t, value.ty.key()).as_bytes())?;
                self.tags.insert(value.ty.id(), t);
                t
            }
        };
        let body = value::canonicalize(&value.ty, value.body.as_deref())?;
        value::validate(&value.ty, body.as_deref())?;

        let mut line = Vec::new();
        line.extend_from_slice(tag.to_string().as_bytes());
        line.push(b':');
        format_element(&value.ty, body.as_deref(), &mut line)?;
        line.push(b'\n');
        self.inner.write_all(&line)?;
        Ok(())
    }

    pub fn write_payload(&mut self, code: u8, body: &[u8]) -> Result<()> {
        if !(MIN_PAYLOAD_CODE..=MAX_PAYLOAD_CODE).contains(&code) {
            return Err(DecodeError::Malformed(format!(
                "application control code {} out of range",
                code
            ))
            .into());
        }
        let mut line = format!("#!{}:", code).into_bytes();
        escape_into(&mut line, body, true);
        line.push(b'\n');
        self.inner.write_all(&line)?;
        Ok(())
    }

    pub fn write_ordering_hint(&mut self, hint: &OrderingHint) -> Result<()> {
        self.inner
            .write_all(format!("#{}\n", hint).as_bytes())?;
        Ok(())
    }

    // Alias names appear inside printed type strings, so their bindings
    // must print before the first type that mentions them
    fn announce_aliases(&mut self, ty: &TypeRef) -> Result<()> {
        match ty.kind() {
            Kind::Primitive(_) => Ok(()),
            Kind::Record(cols) => {
                for col in cols {
                    self.announce_aliases(&col.ty)?;
                }
                Ok(())
            }
            Kind::Array(elem) | Kind::Set(elem) => self.announce_aliases(elem),
            Kind::Union(members) => {
                for m in members {
                    self.announce_aliases(m)?;
                }
                Ok(())
            }
            Kind::Alias { name, target } => {
                self.announce_aliases(target)?;
                if self.aliases.insert(ty.id()) {
                    self.inner
                        .write_all(format!("#{}:{}\n", name, target.key()).as_bytes())?;
                }
                Ok(())
            }
        }
    }
}

fn format_element(ty: &TypeRef, body: Option<&[u8]>, out: &mut Vec<u8>) -> Result<()> {
    let body = match body {
        Some(b) => b,
        None => {
            out.extend_from_slice(b"-;");
            return Ok(());
        }
    };
    let resolved = ty.resolved();
    match resolved.kind() {
        Kind::Primitive(p) => {
            let text = value::format_primitive(*p, body)?;
            escape_into(out, &text, matches!(p, Primitive::Bstring));
            out.push(b';');
        }
        Kind::Record(cols) => {
            out.push(b'[');
            for (col, element) in cols.iter().zip(crate::tag::Iter::new(body)) {
                let element = element?;
                format_element(&col.ty, element.body, out)?;
            }
            out.push(b']');
        }
        Kind::Array(elem) | Kind::Set(elem) => {
            out.push(b'[');
            for element in crate::tag::Iter::new(body) {
                let element = element?;
                format_element(elem, element.body, out)?;
            }
            out.push(b']');
        }
        Kind::Union(members) => {
            let (index, element) = value::split_union(members, body)?;
            out.extend_from_slice(index.to_string().as_bytes());
            out.push(b':');
            format_element(&members[index], element.body, out)?;
        }
        Kind::Alias { .. } => unreachable!("resolved() chases aliases"),
    }
    Ok(())
}

// Escape discipline: backslash, ';', ']' and newline always (';' and ']'
// terminate a terminal wherever they appear); '[' and a lone '-' when they
// would be misread at the front of a terminal; non-UTF-8 bytes when the
// type permits them (bstring, payloads).
fn escape_into(out: &mut Vec<u8>, data: &[u8], binary_ok: bool) {
    if data == b"-" {
        out.extend_from_slice(b"\\x2d");
        return;
    }
    let mut first = true;
    if binary_ok {
        for chunk in data.utf8_chunks() {
            for c in chunk.valid().chars() {
                escape_char(out, c, first);
                first = false;
            }
            for &b in chunk.invalid() {
                out.extend_from_slice(format!("\\x{:02x}", b).as_bytes());
                first = false;
            }
        }
    } else {
        for c in String::from_utf8_lossy(data).chars() {
            escape_char(out, c, first);
            first = false;
        }
    }
}

fn escape_char(out: &mut Vec<u8>, c: char, first: bool) {
    match c {
        '\\' => out.extend_from_slice(b"\\\\"),
        ';' => out.extend_from_slice(b"\\x3b"),
        ']' => out.extend_from_slice(b"\\x5d"),
        '\n' => out.extend_from_slice(b"\\x0a"),
        '[' if first => out.extend_from_slice(b"\\x5b"),
        _ => {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
    }
}

/// Decode the escape forms: `\\`, `\n`, `\xHH`, `\uXXXX`, `\u{H…}`
fn unescape(raw: &[u8]) -> Result<Vec<u8>> {
    let bad = || DecodeError::Malformed("bad escape sequence".to_string());
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] != b'\\' {
            out.push(raw[i]);
            i += 1;
            continue;
        }
        i += 1;
        match raw.get(i) {
            Some(b'\\') => {
                out.push(b'\\');
                i += 1;
            }
            Some(b'n') => {
                out.push(b'\n');
                i += 1;
            }
            Some(b'x') => {
                let hex = raw.get(i + 1..i + 3).ok_or_else(bad)?;
                let byte = hex::decode(hex).map_err(|_| bad())?;
                out.push(byte[0]);
                i += 3;
            }
            Some(b'u') => {
                let (code, next) = if raw.get(i + 1) == Some(&b'{') {
                    let end = raw[i + 2..]
                        .iter()
                        .position(|&b| b == b'}')
                        .ok_or_else(bad)?;
                    (&raw[i + 2..i + 2 + end], i + 3 + end)
                } else {
                    (raw.get(i + 1..i + 5).ok_or_else(bad)?, i + 5)
                };
                let code = std::str::from_utf8(code)
                    .ok()
                    .and_then(|s| u32::from_str_radix(s, 16).ok())
                    .ok_or_else(bad)?;
                let c = char::from_u32(code).ok_or_else(bad)?;
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                i = next;
            }
            _ => return Err(bad().into()),
        }
    }
    Ok(out)
}
