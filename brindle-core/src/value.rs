// Values and primitive body encodings
//
// A value is a type handle plus body bytes; unset carries no bytes at all.
// Nothing here materializes decoded objects: containers stay as tagged
// byte sequences and are walked lazily, so downstream operators can slice
// out what they need without building intermediate structures.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bstr::ByteSlice;
use bytes::Bytes;

use crate::error::{DecodeError, Result, ValueError};
use crate::grammar;
use crate::registry::Registry;
use crate::tag::{self, Builder, Iter};
use crate::time;
use crate::types::{Kind, Primitive, TypeRef};

/// A typed value: a registry handle plus its encoded body
///
/// `body` is `None` for the distinguished unset value, which is
/// representable for any type. Bodies share the reader's message buffer;
/// slicing elements out of a container bumps a refcount rather than
/// copying.
#[derive(Debug, Clone)]
pub struct Value {
    pub ty: TypeRef,
    pub body: Option<Bytes>,
}

impl Value {
    pub fn new(ty: TypeRef, body: Option<Bytes>) -> Self {
        Value { ty, body }
    }

    /// The unset value of a type
    pub fn unset(ty: TypeRef) -> Self {
        Value { ty, body: None }
    }

    pub fn is_unset(&self) -> bool {
        self.body.is_none()
    }

    /// Walk this value's container body; empty for unset values
    pub fn iter(&self) -> Iter<'_> {
        Iter::new(self.body.as_deref().unwrap_or(&[]))
    }

    /// Number of elements of an array or set value
    pub fn container_len(&self) -> Result<usize> {
        if self.ty.inner_type().is_none() {
            return Err(ValueError::NotContainer.into());
        }
        if self.body.is_none() {
            return Err(ValueError::LenUnset.into());
        }
        let mut n = 0;
        for element in self.iter() {
            element?;
            n += 1;
        }
        Ok(n)
    }

    /// The idx'th element of an array or set value
    ///
    /// Unlike path evaluation, which recovers locally, this reports
    /// misuse: indexing a non-array, a negative index, an unset value, or
    /// a position past the end all fail.
    pub fn index(&self, idx: i64) -> Result<Value> {
        let inner = self.ty.inner_type().ok_or(ValueError::NotArray)?.clone();
        let idx = usize::try_from(idx).map_err(|_| ValueError::IndexOutOfBounds)?;
        let body = self.body.as_ref().ok_or(ValueError::IndexOutOfBounds)?;
        for (i, element) in Iter::new(body).enumerate() {
            let element = element?;
            if i == idx {
                return Ok(Value {
                    ty: inner,
                    body: element.body.map(|s| body.slice_ref(s)),
                });
            }
        }
        Err(ValueError::IndexOutOfBounds.into())
    }

    /// Split an array or set value into its element values
    pub fn elements(&self) -> Result<Vec<Value>> {
        let inner = self
            .ty
            .inner_type()
            .ok_or(ValueError::NotContainer)?
            .clone();
        let body = match &self.body {
            Some(b) => b,
            None => return Ok(Vec::new()),
        };
        let mut out = Vec::new();
        for element in Iter::new(body) {
            let element = element?;
            out.push(Value {
                ty: inner.clone(),
                body: element.body.map(|s| body.slice_ref(s)),
            });
        }
        Ok(out)
    }

    /// Build a primitive value from a type string and its text form
    pub fn parse(registry: &Registry, type_str: &str, text: &[u8]) -> Result<Value> {
        let ty = grammar::parse_type(registry, type_str)?;
        let prim = match ty.resolved().kind() {
            Kind::Primitive(p) => *p,
            _ => {
                return Err(DecodeError::Value(format!(
                    "cannot parse a {} from a bare literal",
                    ty.key()
                ))
                .into())
            }
        };
        let body = parse_primitive(prim, text)?;
        Ok(Value::new(ty, Some(Bytes::from(body))))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.ty.key())?;
        let mut out = String::new();
        match render(&self.ty, self.body.as_deref(), &mut out) {
            Ok(()) => f.write_str(&out),
            Err(e) => write!(f, "(err: {})", e),
        }
    }
}

// Diagnostic rendering: primitives parenthesized, containers bracketed,
// no escaping.
fn render(ty: &TypeRef, body: Option<&[u8]>, out: &mut String) -> Result<()> {
    let resolved = ty.resolved();
    if body.is_none() {
        out.push('-');
        return Ok(());
    }
    let body = body.unwrap_or(&[]);
    match resolved.kind() {
        Kind::Primitive(p) => {
            let text = format_primitive(*p, body)?;
            out.push('(');
            out.push_str(&text.as_bstr().to_string());
            out.push(')');
        }
        Kind::Record(cols) => {
            out.push('[');
            for (col, element) in cols.iter().zip(Iter::new(body)) {
                let element = element?;
                render(&col.ty, element.body, out)?;
                out.push(';');
            }
            out.push(']');
        }
        Kind::Array(elem) | Kind::Set(elem) => {
            out.push('[');
            for element in Iter::new(body) {
                let element = element?;
                render(elem, element.body, out)?;
                out.push(';');
            }
            out.push(']');
        }
        Kind::Union(members) => {
            let (index, inner) = split_union(members, body)?;
            out.push_str(&format!("{}:", index));
            render(&members[index], inner.body, out)?;
        }
        Kind::Alias { .. } => unreachable!("resolved() chases aliases"),
    }
    Ok(())
}

/// Decompose a union body into its member index and member element
pub fn split_union<'a>(
    members: &[TypeRef],
    body: &'a [u8],
) -> Result<(usize, tag::Element<'a>)> {
    let mut it = Iter::new(body);
    let index_elem = it
        .next()
        .ok_or_else(|| DecodeError::Value("union body is empty".to_string()))??;
    if index_elem.container {
        return Err(DecodeError::Value("union index must be primitive".to_string()).into());
    }
    let index_body = index_elem
        .body
        .ok_or_else(|| DecodeError::Value("union index is unset".to_string()))?;
    let (index, n) = crate::varint::uvarint(index_body)?;
    if n != index_body.len() {
        return Err(DecodeError::Value("union index has trailing bytes".to_string()).into());
    }
    let index = usize::try_from(index)
        .ok()
        .filter(|&i| i < members.len())
        .ok_or_else(|| DecodeError::Value(format!("union index {} out of range", index)))?;
    let value_elem = it
        .next()
        .ok_or_else(|| DecodeError::Value("union body is missing its value".to_string()))??;
    if !it.done() {
        return Err(DecodeError::Value("union body has extra elements".to_string()).into());
    }
    Ok((index, value_elem))
}

/// Validate a body against its type: container arity and container-ness,
/// primitive lengths and contents, set ordering.
pub fn validate(ty: &TypeRef, body: Option<&[u8]>) -> Result<()> {
    let body = match body {
        Some(b) => b,
        None => return Ok(()),
    };
    match ty.resolved().kind() {
        Kind::Primitive(p) => validate_primitive(*p, body),
        Kind::Record(cols) => {
            let mut it = Iter::new(body);
            for col in cols {
                let element = match it.next() {
                    Some(e) => e?,
                    None => {
                        return Err(DecodeError::Value(format!(
                            "record is missing field {}",
                            col.name
                        ))
                        .into())
                    }
                };
                if element.container != col.ty.is_container() {
                    return Err(mismatch(&col.ty, element.container).into());
                }
                validate(&col.ty, element.body)?;
            }
            if !it.done() {
                return Err(DecodeError::Value("record has extra fields".to_string()).into());
            }
            Ok(())
        }
        Kind::Array(elem) => {
            for element in Iter::new(body) {
                let element = element?;
                if element.container != elem.is_container() {
                    return Err(mismatch(elem, element.container).into());
                }
                validate(elem, element.body)?;
            }
            Ok(())
        }
        Kind::Set(elem) => {
            let mut prev: Option<Vec<u8>> = None;
            for element in Iter::new(body) {
                let element = element?;
                if element.container {
                    return Err(mismatch(elem, true).into());
                }
                validate(elem, element.body)?;
                let encoded = tag::encode_element(element.body, false);
                if let Some(p) = &prev {
                    if *p >= encoded {
                        return Err(DecodeError::SetNotSorted.into());
                    }
                }
                prev = Some(encoded);
            }
            Ok(())
        }
        Kind::Union(members) => {
            let (index, element) = split_union(members, body)?;
            let member = &members[index];
            if element.container != member.is_container() {
                return Err(mismatch(member, element.container).into());
            }
            validate(member, element.body)
        }
        Kind::Alias { .. } => unreachable!("resolved() chases aliases"),
    }
}

fn mismatch(expected: &TypeRef, got_container: bool) -> DecodeError {
    if got_container {
        DecodeError::Value(format!("container where {} expected", expected.key()))
    } else {
        DecodeError::Value(format!("primitive where {} expected", expected.key()))
    }
}

/// Rewrite a body into canonical form: set elements sorted ascending by
/// their full encodings, duplicates dropped. Writers apply this before
/// emitting so readers always observe canonical order.
pub fn canonicalize(ty: &TypeRef, body: Option<&[u8]>) -> Result<Option<Vec<u8>>> {
    let body = match body {
        Some(b) => b,
        None => return Ok(None),
    };
    match ty.resolved().kind() {
        Kind::Primitive(_) => Ok(Some(body.to_vec())),
        Kind::Record(cols) => {
            let mut out = Builder::new();
            let mut it = Iter::new(body);
            for col in cols {
                let element = match it.next() {
                    Some(e) => e?,
                    None => {
                        return Err(DecodeError::Value(format!(
                            "record is missing field {}",
                            col.name
                        ))
                        .into())
                    }
                };
                let canon = if element.container == col.ty.is_container() {
                    canonicalize(&col.ty, element.body)?
                } else {
                    // Mismatched container-ness is left for validation
                    element.body.map(|b| b.to_vec())
                };
                append_element(&mut out, canon.as_deref(), element.container);
            }
            if !it.done() {
                return Err(DecodeError::Value("record has extra fields".to_string()).into());
            }
            Ok(Some(out.into_body()))
        }
        Kind::Array(elem) => {
            let mut out = Builder::new();
            for element in Iter::new(body) {
                let element = element?;
                let canon = if element.container == elem.is_container() {
                    canonicalize(elem, element.body)?
                } else {
                    element.body.map(|b| b.to_vec())
                };
                append_element(&mut out, canon.as_deref(), element.container);
            }
            Ok(Some(out.into_body()))
        }
        Kind::Set(_) => {
            let mut encodings: Vec<Vec<u8>> = Vec::new();
            for element in Iter::new(body) {
                let element = element?;
                // The container flag is preserved so validation still sees
                // a container element smuggled into a set
                encodings.push(tag::encode_element(element.body, element.container));
            }
            encodings.sort();
            encodings.dedup();
            let mut out = Builder::new();
            for enc in &encodings {
                out.append_encoded(enc);
            }
            Ok(Some(out.into_body()))
        }
        Kind::Union(members) => {
            let (index, element) = split_union(members, body)?;
            let member = &members[index];
            let canon = if element.container == member.is_container() {
                canonicalize(member, element.body)?
            } else {
                element.body.map(|b| b.to_vec())
            };
            let mut out = Builder::new();
            let mut index_body = Vec::new();
            crate::varint::put_uvarint(&mut index_body, index as u64);
            out.append_primitive(Some(&index_body));
            append_element(&mut out, canon.as_deref(), element.container);
            Ok(Some(out.into_body()))
        }
        Kind::Alias { .. } => unreachable!("resolved() chases aliases"),
    }
}

fn append_element(out: &mut Builder, body: Option<&[u8]>, container: bool) {
    if container {
        out.append_container(body);
    } else {
        out.append_primitive(body);
    }
}

// Primitive body encodings (see the per-type table in the format docs).
// Integers are little-endian with redundant leading sign/zero bytes
// trimmed; a body longer than the type width does not parse.

/// Encode a signed integer in minimal little-endian form
pub fn encode_int(v: i64) -> Vec<u8> {
    let mut bytes = v.to_le_bytes().to_vec();
    while bytes.len() > 1 {
        let last = bytes[bytes.len() - 1];
        let sign = bytes[bytes.len() - 2] & 0x80 != 0;
        if (last == 0 && !sign) || (last == 0xff && sign) {
            bytes.pop();
        } else {
            break;
        }
    }
    if bytes == [0] {
        bytes.clear();
    }
    bytes
}

/// Encode an unsigned integer in minimal little-endian form
pub fn encode_uint(v: u64) -> Vec<u8> {
    let mut bytes = v.to_le_bytes().to_vec();
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    bytes
}

/// Decode a little-endian signed integer of up to 8 bytes, sign-extending
/// from the most significant encoded byte
pub fn decode_int(b: &[u8]) -> i64 {
    let mut v: i64 = if b.last().is_some_and(|&x| x & 0x80 != 0) {
        -1
    } else {
        0
    };
    for &byte in b.iter().rev() {
        v = v.wrapping_shl(8) | i64::from(byte);
    }
    v
}

/// Decode a little-endian unsigned integer of up to 8 bytes
pub fn decode_uint(b: &[u8]) -> u64 {
    let mut v: u64 = 0;
    for &byte in b.iter().rev() {
        v = v.wrapping_shl(8) | u64::from(byte);
    }
    v
}

fn value_err(msg: impl Into<String>) -> crate::error::Error {
    DecodeError::Value(msg.into()).into()
}

fn validate_primitive(p: Primitive, b: &[u8]) -> Result<()> {
    match p {
        Primitive::Bool => {
            if b.len() != 1 || b[0] > 1 {
                return Err(value_err("bool body must be one byte, 0 or 1"));
            }
        }
        Primitive::Byte => {
            if b.len() != 1 {
                return Err(value_err("byte body must be one byte"));
            }
        }
        Primitive::Int16 | Primitive::Uint16 => check_width(b, 2)?,
        Primitive::Int32 | Primitive::Uint32 => check_width(b, 4)?,
        Primitive::Int64 | Primitive::Uint64 | Primitive::Time | Primitive::Duration => {
            check_width(b, 8)?
        }
        Primitive::Float64 => {
            if b.len() != 8 {
                return Err(value_err(format!("float64 body of {} bytes", b.len())));
            }
        }
        Primitive::String | Primitive::Enum => {
            if std::str::from_utf8(b).is_err() {
                return Err(value_err(format!("{} body is not UTF-8", p.name())));
            }
        }
        Primitive::Bytes | Primitive::Bstring => {}
        Primitive::Ip => {
            if b.len() != 4 && b.len() != 16 {
                return Err(value_err(format!("ip body of {} bytes", b.len())));
            }
        }
        Primitive::Port => {
            if b.len() < 2 {
                return Err(value_err("port body shorter than two bytes"));
            }
            if std::str::from_utf8(&b[2..]).is_err() {
                return Err(value_err("port protocol suffix is not UTF-8"));
            }
        }
        Primitive::Net => {
            if b.len() != 8 && b.len() != 32 {
                return Err(value_err(format!("net body of {} bytes", b.len())));
            }
            let mask = &b[b.len() / 2..];
            if prefix_of_mask(mask).is_none() {
                return Err(value_err("net mask is not contiguous"));
            }
        }
        Primitive::Null => {
            if !b.is_empty() {
                return Err(value_err("null body must be empty"));
            }
        }
    }
    Ok(())
}

fn check_width(b: &[u8], width: usize) -> Result<()> {
    if b.len() > width {
        return Err(value_err(format!(
            "integer body of {} bytes exceeds width {}",
            b.len(),
            width
        )));
    }
    Ok(())
}

/// Parse the canonical text form of a primitive into its binary body.
/// `text` arrives with escapes already decoded.
pub fn parse_primitive(p: Primitive, text: &[u8]) -> Result<Vec<u8>> {
    let utf8 = || {
        std::str::from_utf8(text)
            .map_err(|_| value_err(format!("{} literal is not UTF-8", p.name())))
    };
    match p {
        Primitive::Bool => match text {
            b"T" | b"true" => Ok(vec![1]),
            b"F" | b"false" => Ok(vec![0]),
            _ => Err(value_err("bool literal must be T or F")),
        },
        Primitive::Byte => {
            if text.len() != 2 {
                return Err(value_err("byte literal must be two hex digits"));
            }
            hex::decode(text).map_err(|_| value_err("byte literal must be two hex digits"))
        }
        Primitive::Int16 => parse_signed(utf8()?, i64::from(i16::MIN), i64::from(i16::MAX)),
        Primitive::Int32 => parse_signed(utf8()?, i64::from(i32::MIN), i64::from(i32::MAX)),
        Primitive::Int64 => parse_signed(utf8()?, i64::MIN, i64::MAX),
        Primitive::Uint16 => parse_unsigned(utf8()?, u64::from(u16::MAX)),
        Primitive::Uint32 => parse_unsigned(utf8()?, u64::from(u32::MAX)),
        Primitive::Uint64 => parse_unsigned(utf8()?, u64::MAX),
        Primitive::Float64 => {
            let v: f64 = utf8()?
                .parse()
                .map_err(|_| value_err("invalid float64 literal"))?;
            Ok(v.to_le_bytes().to_vec())
        }
        Primitive::String | Primitive::Enum => {
            utf8()?;
            Ok(text.to_vec())
        }
        Primitive::Bytes => BASE64
            .decode(text)
            .map_err(|_| value_err("bytes literal must be base64")),
        Primitive::Bstring => Ok(text.to_vec()),
        Primitive::Ip => {
            let addr: IpAddr = utf8()?
                .parse()
                .map_err(|_| value_err("invalid ip literal"))?;
            Ok(ip_bytes(addr))
        }
        Primitive::Port => {
            let s = utf8()?;
            let (num, proto) = match s.split_once('/') {
                Some((num, proto)) if !proto.is_empty() => (num, proto),
                Some(_) => return Err(value_err("empty port protocol suffix")),
                None => (s, ""),
            };
            let port: u16 = num.parse().map_err(|_| value_err("invalid port literal"))?;
            let mut body = port.to_le_bytes().to_vec();
            body.extend_from_slice(proto.as_bytes());
            Ok(body)
        }
        Primitive::Net => {
            let s = utf8()?;
            let (addr, prefix) = s
                .split_once('/')
                .ok_or_else(|| value_err("net literal must be CIDR"))?;
            let addr: IpAddr = addr
                .parse()
                .map_err(|_| value_err("invalid net address"))?;
            let prefix: u32 = prefix
                .parse()
                .map_err(|_| value_err("invalid net prefix"))?;
            let mut body = ip_bytes(addr);
            let bits = body.len() as u32 * 8;
            if prefix > bits {
                return Err(value_err("net prefix exceeds address width"));
            }
            body.extend_from_slice(&mask_of_prefix(prefix, body.len()));
            Ok(body)
        }
        Primitive::Time | Primitive::Duration => Ok(encode_int(time::parse_ns(text)?)),
        Primitive::Null => {
            if !text.is_empty() {
                return Err(value_err("null has no literal form"));
            }
            Ok(Vec::new())
        }
    }
}

/// Render a primitive body in its canonical text form, unescaped
pub fn format_primitive(p: Primitive, b: &[u8]) -> Result<Vec<u8>> {
    validate_primitive(p, b)?;
    let out = match p {
        Primitive::Bool => {
            if b[0] == 1 {
                b"T".to_vec()
            } else {
                b"F".to_vec()
            }
        }
        Primitive::Byte => hex::encode(b).into_bytes(),
        Primitive::Int16 | Primitive::Int32 | Primitive::Int64 => {
            decode_int(b).to_string().into_bytes()
        }
        Primitive::Uint16 | Primitive::Uint32 | Primitive::Uint64 => {
            decode_uint(b).to_string().into_bytes()
        }
        Primitive::Float64 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(b);
            f64::from_le_bytes(bytes).to_string().into_bytes()
        }
        Primitive::String | Primitive::Enum | Primitive::Bstring => b.to_vec(),
        Primitive::Bytes => BASE64.encode(b).into_bytes(),
        Primitive::Ip => format_ip(b).into_bytes(),
        Primitive::Port => {
            let port = u16::from_le_bytes([b[0], b[1]]);
            let mut s = port.to_string().into_bytes();
            if b.len() > 2 {
                s.push(b'/');
                s.extend_from_slice(&b[2..]);
            }
            s
        }
        Primitive::Net => {
            let half = b.len() / 2;
            let prefix = prefix_of_mask(&b[half..])
                .ok_or_else(|| value_err("net mask is not contiguous"))?;
            format!("{}/{}", format_ip(&b[..half]), prefix).into_bytes()
        }
        Primitive::Time | Primitive::Duration => {
            time::format_ns(decode_int(b)).into_bytes()
        }
        Primitive::Null => Vec::new(),
    };
    Ok(out)
}

fn parse_signed(s: &str, min: i64, max: i64) -> Result<Vec<u8>> {
    let v: i64 = s
        .parse()
        .map_err(|_| value_err(format!("invalid integer literal {:?}", s)))?;
    if v < min || v > max {
        return Err(value_err(format!("integer literal {} out of range", v)));
    }
    Ok(encode_int(v))
}

fn parse_unsigned(s: &str, max: u64) -> Result<Vec<u8>> {
    let v: u64 = s
        .parse()
        .map_err(|_| value_err(format!("invalid integer literal {:?}", s)))?;
    if v > max {
        return Err(value_err(format!("integer literal {} out of range", v)));
    }
    Ok(encode_uint(v))
}

fn ip_bytes(addr: IpAddr) -> Vec<u8> {
    match addr {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

fn format_ip(b: &[u8]) -> String {
    if b.len() == 4 {
        Ipv4Addr::new(b[0], b[1], b[2], b[3]).to_string()
    } else {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(b);
        Ipv6Addr::from(octets).to_string()
    }
}

fn mask_of_prefix(prefix: u32, len: usize) -> Vec<u8> {
    let mut mask = vec![0u8; len];
    let mut remaining = prefix;
    for byte in mask.iter_mut() {
        let take = remaining.min(8);
        *byte = (0xffu16 << (8 - take)) as u8;
        remaining -= take;
    }
    mask
}

fn prefix_of_mask(mask: &[u8]) -> Option<u32> {
    let mut prefix = 0u32;
    let mut done = false;
    for &byte in mask {
        if done {
            if byte != 0 {
                return None;
            }
            continue;
        }
        let ones = byte.leading_ones();
        prefix += ones;
        if ones < 8 {
            if byte.trailing_zeros() < 8 - ones {
                return None;
            }
            done = true;
        }
    }
    Some(prefix)
}
