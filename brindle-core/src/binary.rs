// Binary stream codec
//
// Every message leads with a header byte: bit 7 set selects a control
// message whose low bits are the control code, bit 7 clear makes the byte
// the start of a uvarint7 length for a value message. Typedefs allocate
// stream-scoped ids sequentially from FIRST_COMPOUND_ID in the order they
// appear on the wire; both halves keep a per-stream id table so numbering
// is a property of the stream while the registry keys identity.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use crate::error::{DecodeError, Result, TypeError};
use crate::registry::Registry;
use crate::stream::{
    Item, OrderTracker, OrderingHint, Payload, MAX_PAYLOAD_CODE, MIN_PAYLOAD_CODE,
};
use crate::tag;
use crate::types::{Column, Kind, Primitive, TypeRef, FIRST_COMPOUND_ID};
use crate::value::{self, Value};
use crate::varint::{put_uvarint, put_uvarint7, uvarint, MAX_UVARINT_LEN};

const CONTROL_BIT: u8 = 0x80;

const CONTROL_RECORD: u8 = 0;
const CONTROL_ARRAY: u8 = 1;
const CONTROL_SET: u8 = 2;
const CONTROL_UNION: u8 = 3;
const CONTROL_ALIAS: u8 = 4;
const CONTROL_ORDER: u8 = 5;

/// Reads a binary stream, installing typedefs as they arrive and yielding
/// values and application payloads in stream order.
pub struct Reader<R> {
    inner: R,
    registry: Arc<Registry>,
    types: HashMap<u64, TypeRef>,
    next_id: u64,
    order: OrderTracker,
}

impl<R: Read> Reader<R> {
    pub fn new(inner: R, registry: Arc<Registry>) -> Self {
        Reader {
            inner,
            registry,
            types: HashMap::new(),
            next_id: FIRST_COMPOUND_ID,
            order: OrderTracker::new(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Pull the next value or application payload; `None` at end of stream
    pub fn read(&mut self) -> Result<Option<Item>> {
        loop {
            let header = match read_first_byte(&mut self.inner)? {
                Some(b) => b,
                None => return Ok(None),
            };
            if header & CONTROL_BIT != 0 {
                if let Some(item) = self.read_control(header & !CONTROL_BIT)? {
                    return Ok(Some(item));
                }
            } else {
                return Ok(Some(Item::Value(self.read_value(header)?)));
            }
        }
    }

    // Install a typedef or hint, or surface an application payload
    fn read_control(&mut self, code: u8) -> Result<Option<Item>> {
        trace!(code, "control message");
        match code {
            CONTROL_RECORD => {
                let nfields = read_uvarint(&mut self.inner)?;
                let mut columns = Vec::new();
                for _ in 0..nfields {
                    let name = read_counted_string(&mut self.inner)?;
                    let id = read_uvarint(&mut self.inner)?;
                    columns.push(Column::new(name, self.lookup(id)?));
                }
                let ty = self.registry.intern_record(columns)?;
                self.install(ty);
                Ok(None)
            }
            CONTROL_ARRAY => {
                let id = read_uvarint(&mut self.inner)?;
                let ty = self.registry.intern_array(self.lookup(id)?)?;
                self.install(ty);
                Ok(None)
            }
            CONTROL_SET => {
                let arity = read_uvarint(&mut self.inner)?;
                if arity != 1 {
                    return Err(
                        DecodeError::Malformed(format!("set typedef arity {}", arity)).into(),
                    );
                }
                let id = read_uvarint(&mut self.inner)?;
                let ty = self.registry.intern_set(self.lookup(id)?)?;
                self.install(ty);
                Ok(None)
            }
            CONTROL_UNION => {
                let ntypes = read_uvarint(&mut self.inner)?;
                let mut members = Vec::new();
                for _ in 0..ntypes {
                    let id = read_uvarint(&mut self.inner)?;
                    members.push(self.lookup(id)?);
                }
                let ty = self.registry.intern_union(members)?;
                self.install(ty);
                Ok(None)
            }
            CONTROL_ALIAS => {
                let name = read_counted_string(&mut self.inner)?;
                let id = read_uvarint(&mut self.inner)?;
                let target = self.lookup(id)?;
                let ty = self.registry.intern_alias(&name, target)?;
                self.install(ty);
                Ok(None)
            }
            CONTROL_ORDER => {
                let text = read_counted_string(&mut self.inner)?;
                self.order.set_hint(OrderingHint::parse(&text)?);
                Ok(None)
            }
            code => {
                let body = read_counted_bytes(&mut self.inner)?;
                Ok(Some(Item::Payload(Payload {
                    code,
                    body: Bytes::from(body),
                })))
            }
        }
    }

    fn read_value(&mut self, header: u8) -> Result<Value> {
        let len = read_uvarint7_tail(&mut self.inner, header)?;
        let len = usize::try_from(len)
            .map_err(|_| DecodeError::Malformed(format!("value length {} too large", len)))?;
        let mut frame = vec![0u8; len];
        self.inner.read_exact(&mut frame)?;
        let frame = Bytes::from(frame);

        let (id, id_len) =
            uvarint(&frame).map_err(|e| remap_short_frame(e, "value message missing type id"))?;
        let ty = self.lookup(id)?;

        let mut it = tag::Iter::new(&frame[id_len..]);
        let element = it
            .next()
            .ok_or_else(|| DecodeError::Malformed("value message has no body".to_string()))?
            .map_err(|e| remap_short_frame(e, "value body overruns its frame"))?;
        if !it.done() {
            return Err(
                DecodeError::Malformed("trailing bytes after value body".to_string()).into(),
            );
        }
        if element.container != ty.is_container() {
            return Err(DecodeError::Value(format!(
                "{} framed as a {}",
                ty.key(),
                if element.container { "container" } else { "primitive" }
            ))
            .into());
        }
        value::validate(&ty, element.body)?;

        let v = Value::new(ty, element.body.map(|s| frame.slice_ref(s)));
        self.order.check(&v)?;
        Ok(v)
    }

    // Resolve a wire id: fixed primitives, then this stream's typedefs
    fn lookup(&self, id: u64) -> Result<TypeRef> {
        if let Some(p) = Primitive::from_id(id) {
            return Ok(self.registry.primitive(p));
        }
        self.types
            .get(&id)
            .cloned()
            .ok_or_else(|| TypeError::Unknown(id).into())
    }

    // Each typedef binds the next stream id, whether or not the registry
    // already knew the structure
    fn install(&mut self, ty: TypeRef) {
        self.types.insert(self.next_id, ty);
        self.next_id += 1;
    }
}

/// Writes a binary stream, emitting typedefs ahead of the first value of
/// each compound type.
pub struct Writer<W> {
    inner: W,
    wire_ids: HashMap<u64, u64>,
    next_id: u64,
}

impl<W: Write> Writer<W> {
    pub fn new(inner: W) -> Self {
        Writer {
            inner,
            wire_ids: HashMap::new(),
            next_id: FIRST_COMPOUND_ID,
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Write one value message, preceded by any typedefs it needs. The
    /// body is canonicalized (sets sorted and deduplicated) and validated
    /// before anything is emitted, so a message is written atomically or
    /// not at all.
    pub fn write(&mut self, value: &Value) -> Result<()> {
        self.announce(&value.ty)?;
        let body = value::canonicalize(&value.ty, value.body.as_deref())?;
        value::validate(&value.ty, body.as_deref())?;

        let mut frame = Vec::new();
        put_uvarint(&mut frame, self.wire_id(&value.ty));
        tag::append(&mut frame, body.as_deref(), value.ty.is_container());

        let mut header = Vec::with_capacity(MAX_UVARINT_LEN + 1);
        put_uvarint7(&mut header, frame.len() as u64);
        self.inner.write_all(&header)?;
        self.inner.write_all(&frame)?;
        Ok(())
    }

    /// Emit an application payload (control codes 6-127)
    pub fn write_payload(&mut self, code: u8, body: &[u8]) -> Result<()> {
        if !(MIN_PAYLOAD_CODE..=MAX_PAYLOAD_CODE).contains(&code) {
            return Err(DecodeError::Malformed(format!(
                "application control code {} out of range",
                code
            ))
            .into());
        }
        let mut buf = Vec::with_capacity(body.len() + MAX_UVARINT_LEN);
        put_uvarint(&mut buf, body.len() as u64);
        buf.extend_from_slice(body);
        self.write_control(code, &buf)
    }

    /// Declare that subsequent records are sorted by the listed fields
    pub fn write_ordering_hint(&mut self, hint: &OrderingHint) -> Result<()> {
        let text = hint.to_string();
        let mut buf = Vec::with_capacity(text.len() + MAX_UVARINT_LEN);
        put_uvarint(&mut buf, text.len() as u64);
        buf.extend_from_slice(text.as_bytes());
        self.write_control(CONTROL_ORDER, &buf)
    }

    fn write_control(&mut self, code: u8, body: &[u8]) -> Result<()> {
        self.inner.write_all(&[CONTROL_BIT | code])?;
        self.inner.write_all(body)?;
        Ok(())
    }

    // Emit typedefs for every compound type this one depends on, children
    // first, assigning stream ids in emission order
    fn announce(&mut self, ty: &TypeRef) -> Result<()> {
        if ty.id() < FIRST_COMPOUND_ID || self.wire_ids.contains_key(&ty.id()) {
            return Ok(());
        }
        let mut body = Vec::new();
        let code = match ty.kind() {
            Kind::Record(cols) => {
                for col in cols {
                    self.announce(&col.ty)?;
                }
                put_uvarint(&mut body, cols.len() as u64);
                for col in cols {
                    put_counted_string(&mut body, &col.name);
                    put_uvarint(&mut body, self.wire_id(&col.ty));
                }
                CONTROL_RECORD
            }
            Kind::Array(elem) => {
                self.announce(elem)?;
                put_uvarint(&mut body, self.wire_id(elem));
                CONTROL_ARRAY
            }
            Kind::Set(elem) => {
                self.announce(elem)?;
                put_uvarint(&mut body, 1);
                put_uvarint(&mut body, self.wire_id(elem));
                CONTROL_SET
            }
            Kind::Union(members) => {
                for m in members {
                    self.announce(m)?;
                }
                put_uvarint(&mut body, members.len() as u64);
                for m in members {
                    put_uvarint(&mut body, self.wire_id(m));
                }
                CONTROL_UNION
            }
            Kind::Alias { name, target } => {
                self.announce(target)?;
                put_counted_string(&mut body, name);
                put_uvarint(&mut body, self.wire_id(target));
                CONTROL_ALIAS
            }
            Kind::Primitive(_) => unreachable!("primitives have fixed ids"),
        };
        self.write_control(code, &body)?;
        self.wire_ids.insert(ty.id(), self.next_id);
        self.next_id += 1;
        Ok(())
    }

    fn wire_id(&self, ty: &TypeRef) -> u64 {
        if ty.id() < FIRST_COMPOUND_ID {
            ty.id()
        } else {
            // announce() ran first; every compound has a stream id by now
            self.wire_ids[&ty.id()]
        }
    }
}

// Wire primitives

fn read_first_byte<R: Read>(r: &mut R) -> Result<Option<u8>> {
    let mut buf = [0u8; 1];
    loop {
        match r.read(&mut buf) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(buf[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

fn read_byte<R: Read>(r: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_uvarint<R: Read>(r: &mut R) -> Result<u64> {
    let mut v: u64 = 0;
    let mut shift: u32 = 0;
    for i in 0..MAX_UVARINT_LEN {
        let b = read_byte(r)?;
        if b < 0x80 {
            if i == MAX_UVARINT_LEN - 1 && b > 1 {
                break;
            }
            return Ok(v | (u64::from(b) << shift));
        }
        v |= u64::from(b & 0x7f) << shift;
        shift += 7;
    }
    Err(DecodeError::Malformed("uvarint overflows 64 bits".to_string()).into())
}

fn read_uvarint7_tail<R: Read>(r: &mut R, first: u8) -> Result<u64> {
    if first & 0x40 != 0 {
        return Ok(u64::from(first & 0x3f));
    }
    let rest = read_uvarint(r)?;
    rest.checked_mul(64)
        .and_then(|v| v.checked_add(u64::from(first & 0x3f)))
        .ok_or_else(|| DecodeError::Malformed("uvarint7 overflows 64 bits".to_string()).into())
}

fn read_counted_bytes<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let len = read_uvarint(r)?;
    let len = usize::try_from(len)
        .map_err(|_| DecodeError::Malformed(format!("counted length {} too large", len)))?;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_counted_string<R: Read>(r: &mut R) -> Result<String> {
    let bytes = read_counted_bytes(r)?;
    String::from_utf8(bytes)
        .map_err(|_| DecodeError::Malformed("counted string is not UTF-8".to_string()).into())
}

fn put_counted_string(buf: &mut Vec<u8>, s: &str) {
    put_uvarint(buf, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

// Inside a fully-read frame a short parse is a framing lie, not truncation
fn remap_short_frame(e: crate::error::Error, msg: &str) -> crate::error::Error {
    if e.is_truncated() {
        DecodeError::Malformed(msg.to_string()).into()
    } else {
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::Builder;
    use crate::types::same_type;

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::new())
    }

    fn read_all(bytes: &[u8], registry: Arc<Registry>) -> Result<Vec<Item>> {
        let mut reader = Reader::new(bytes, registry);
        let mut items = Vec::new();
        while let Some(item) = reader.read()? {
            items.push(item);
        }
        Ok(items)
    }

    #[test]
    fn test_string_value_frames_to_fifteen_bytes() {
        let reg = registry();
        let v = Value::new(
            reg.primitive(Primitive::String),
            Some(Bytes::from_static(b"hello, world")),
        );
        let mut writer = Writer::new(Vec::new());
        writer.write(&v).unwrap();
        let bytes = writer.into_inner();
        // 1 length byte + 1 type-id byte + 1 tag byte + 12 body bytes
        assert_eq!(bytes.len(), 15);
        assert_eq!(bytes[0], 0x40 | 14);
        assert_eq!(bytes[1], Primitive::String.id() as u8);
        assert_eq!(&bytes[3..], b"hello, world");

        let items = read_all(&bytes, reg.clone()).unwrap();
        assert_eq!(items.len(), 1);
        match &items[0] {
            Item::Value(out) => {
                assert!(same_type(&out.ty, &reg.primitive(Primitive::String)));
                assert_eq!(out.body.as_deref(), Some(&b"hello, world"[..]));
            }
            other => panic!("expected a value, got {:?}", other),
        }
    }

    #[test]
    fn test_record_roundtrip_with_typedef() {
        let reg = registry();
        let ty = reg
            .intern_record(vec![
                Column::new("msg", reg.primitive(Primitive::String)),
                Column::new("n", reg.primitive(Primitive::Int32)),
            ])
            .unwrap();
        let mut b = Builder::new();
        b.append_primitive(Some(b"hi"))
            .append_primitive(Some(&value::encode_int(42)));
        let v = Value::new(ty.clone(), Some(Bytes::from(b.into_body())));

        let mut writer = Writer::new(Vec::new());
        writer.write(&v).unwrap();
        writer.write(&v).unwrap();
        let bytes = writer.into_inner();

        // Decode against a fresh registry: the typedef travels in-band
        let other = registry();
        let items = read_all(&bytes, other).unwrap();
        assert_eq!(items.len(), 2);
        for item in items {
            match item {
                Item::Value(out) => {
                    assert_eq!(out.ty.key(), ty.key());
                    assert_eq!(out.ty.id(), FIRST_COMPOUND_ID);
                    assert_eq!(out.body, v.body);
                }
                other => panic!("expected a value, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_unset_value_roundtrip() {
        let reg = registry();
        let ty = reg.intern_array(reg.primitive(Primitive::Ip)).unwrap();
        let mut writer = Writer::new(Vec::new());
        writer.write(&Value::unset(ty.clone())).unwrap();
        let bytes = writer.into_inner();

        let items = read_all(&bytes, registry()).unwrap();
        match &items[0] {
            Item::Value(out) => {
                assert!(out.is_unset());
                assert_eq!(out.ty.key(), ty.key());
            }
            other => panic!("expected a value, got {:?}", other),
        }
    }

    #[test]
    fn test_payload_interleaving_preserved() {
        let reg = registry();
        let v = Value::new(reg.primitive(Primitive::Bool), Some(Bytes::from_static(&[1])));
        let mut writer = Writer::new(Vec::new());
        writer.write(&v).unwrap();
        writer.write_payload(42, b"checkpoint").unwrap();
        writer.write(&v).unwrap();
        let bytes = writer.into_inner();

        let items = read_all(&bytes, registry()).unwrap();
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[0], Item::Value(_)));
        match &items[1] {
            Item::Payload(p) => {
                assert_eq!(p.code, 42);
                assert_eq!(&p.body[..], b"checkpoint");
            }
            other => panic!("expected a payload, got {:?}", other),
        }
        assert!(matches!(&items[2], Item::Value(_)));
    }

    #[test]
    fn test_payload_code_range_enforced() {
        let mut writer = Writer::new(Vec::new());
        assert!(writer.write_payload(5, b"x").is_err());
        assert!(writer.write_payload(128, b"x").is_err());
        assert!(writer.write_payload(6, b"x").is_ok());
    }

    #[test]
    fn test_truncated_stream() {
        let reg = registry();
        let v = Value::new(
            reg.primitive(Primitive::String),
            Some(Bytes::from_static(b"hello")),
        );
        let mut writer = Writer::new(Vec::new());
        writer.write(&v).unwrap();
        let bytes = writer.into_inner();

        let err = read_all(&bytes[..bytes.len() - 2], registry()).unwrap_err();
        assert!(err.is_truncated());
    }

    #[test]
    fn test_unknown_type_id() {
        // A value message referencing id 23 with no typedef in sight
        let mut frame = Vec::new();
        put_uvarint(&mut frame, 23);
        tag::append(&mut frame, Some(b"x"), false);
        let mut bytes = Vec::new();
        put_uvarint7(&mut bytes, frame.len() as u64);
        bytes.extend_from_slice(&frame);

        let err = read_all(&bytes, registry()).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Type(TypeError::Unknown(23))
        ));
    }

    #[test]
    fn test_ordering_hint_enforced() {
        let reg = registry();
        let ty = reg
            .intern_record(vec![Column::new("ts", reg.primitive(Primitive::Time))])
            .unwrap();
        let rec = |ns: i64| {
            let mut b = Builder::new();
            b.append_primitive(Some(&value::encode_int(ns)));
            Value::new(ty.clone(), Some(Bytes::from(b.into_body())))
        };

        let mut writer = Writer::new(Vec::new());
        writer
            .write_ordering_hint(&OrderingHint::parse("+ts").unwrap())
            .unwrap();
        writer.write(&rec(10)).unwrap();
        writer.write(&rec(5)).unwrap();
        let bytes = writer.into_inner();

        let err = read_all(&bytes, registry()).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Decode(DecodeError::OrderingViolation(_))
        ));
    }

    #[test]
    fn test_alias_travels_with_own_id() {
        let reg = registry();
        let host = reg.intern_alias("host", reg.primitive(Primitive::Ip)).unwrap();
        let ty = reg
            .intern_record(vec![Column::new("src", host)])
            .unwrap();
        let mut b = Builder::new();
        b.append_primitive(Some(&[10, 0, 0, 1]));
        let v = Value::new(ty, Some(Bytes::from(b.into_body())));

        let mut writer = Writer::new(Vec::new());
        writer.write(&v).unwrap();
        let bytes = writer.into_inner();

        let other = registry();
        let items = read_all(&bytes, other.clone()).unwrap();
        match &items[0] {
            Item::Value(out) => {
                assert_eq!(out.ty.key(), "record[src:host]");
                let col = &out.ty.columns().unwrap()[0];
                assert!(matches!(col.ty.kind(), Kind::Alias { .. }));
            }
            other => panic!("expected a value, got {:?}", other),
        }
        // The alias is installed in the destination registry by name
        assert!(other.lookup_key("host").is_some());
    }
}
