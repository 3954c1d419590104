// Parser for the human-readable type syntax
//
//   type := primitive | alias_name
//         | "record" "[" (col ("," col)*)? "]"
//         | "array"  "[" type "]"
//         | "set"    "[" type "]"
//         | "union"  "[" type ("," type)* "]"
//   col  := ident ":" type
//
// The printer half lives on Type::key(); parse(print(t)) resolves back to
// the same registry handle. Text streams may also reference a previously
// bound decimal tag in type position (`record[lat:0]`), which the text
// reader supplies through the tag resolver.

use crate::error::{Result, TypeError};
use crate::registry::Registry;
use crate::types::{Column, TypeRef};

/// Identifiers start with [A-Za-z_$] and continue with the same or digits
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if is_ident_start(c) => {}
        _ => return false,
    }
    chars.all(is_ident_char)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    is_ident_start(c) || c.is_ascii_digit()
}

/// Parse a type string against the registry, interning compounds as they
/// appear.
pub fn parse_type(registry: &Registry, input: &str) -> Result<TypeRef> {
    parse_type_with(registry, input, &|_| None)
}

/// Like [`parse_type`], but decimal tag references resolve through `tags`
pub fn parse_type_with(
    registry: &Registry,
    input: &str,
    tags: &dyn Fn(u64) -> Option<TypeRef>,
) -> Result<TypeRef> {
    let mut p = Parser {
        registry,
        tags,
        input,
        pos: 0,
    };
    let ty = p.parse()?;
    if p.pos != p.input.len() {
        return Err(p.invalid("trailing characters after type"));
    }
    Ok(ty)
}

struct Parser<'a> {
    registry: &'a Registry,
    tags: &'a dyn Fn(u64) -> Option<TypeRef>,
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn invalid(&self, msg: &str) -> crate::error::Error {
        TypeError::Invalid(format!("{} at offset {} in {:?}", msg, self.pos, self.input)).into()
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn eat(&mut self, c: char) -> Result<()> {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(self.invalid(&format!("expected {:?}", c)))
        }
    }

    fn word(&mut self) -> &'a str {
        let start = self.pos;
        for c in self.rest().chars() {
            if !is_ident_char(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.input[start..self.pos]
    }

    fn parse(&mut self) -> Result<TypeRef> {
        if self.peek().is_some_and(|c| c.is_ascii_digit()) {
            return self.tag_reference();
        }
        let word = self.word();
        if word.is_empty() {
            return Err(self.invalid("expected a type"));
        }
        match word {
            "record" if self.peek() == Some('[') => self.record_body(),
            "array" if self.peek() == Some('[') => {
                let elem = self.bracketed()?;
                self.registry.intern_array(elem)
            }
            "set" if self.peek() == Some('[') => {
                let elem = self.bracketed()?;
                self.registry.intern_set(elem)
            }
            "union" if self.peek() == Some('[') => self.union_body(),
            _ => self
                .registry
                .lookup_key(word)
                .ok_or_else(|| TypeError::Invalid(format!("unknown type: {}", word)).into()),
        }
    }

    // A bare decimal in type position refers to a previously bound tag
    fn tag_reference(&mut self) -> Result<TypeRef> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let digits = &self.input[start..self.pos];
        let tag: u64 = digits
            .parse()
            .map_err(|_| self.invalid("tag reference out of range"))?;
        (self.tags)(tag)
            .ok_or_else(|| TypeError::Invalid(format!("undefined tag reference: {}", tag)).into())
    }

    fn bracketed(&mut self) -> Result<TypeRef> {
        self.eat('[')?;
        let ty = self.parse()?;
        self.eat(']')?;
        Ok(ty)
    }

    fn record_body(&mut self) -> Result<TypeRef> {
        self.eat('[')?;
        let mut columns = Vec::new();
        if self.peek() != Some(']') {
            loop {
                let name = self.word();
                if name.is_empty() {
                    return Err(self.invalid("expected a column name"));
                }
                let name = name.to_string();
                self.eat(':')?;
                let ty = self.parse()?;
                columns.push(Column::new(name, ty));
                if self.peek() == Some(',') {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        self.eat(']')?;
        self.registry.intern_record(columns)
    }

    fn union_body(&mut self) -> Result<TypeRef> {
        self.eat('[')?;
        let mut members = vec![self.parse()?];
        while self.peek() == Some(',') {
            self.pos += 1;
            members.push(self.parse()?);
        }
        self.eat(']')?;
        self.registry.intern_union(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{same_type, Primitive};

    #[test]
    fn test_identifiers() {
        assert!(is_identifier("orig_h"));
        assert!(is_identifier("$path"));
        assert!(is_identifier("_x9"));
        assert!(!is_identifier("9x"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a b"));
    }

    #[test]
    fn test_parse_primitives() {
        let reg = Registry::new();
        let t = parse_type(&reg, "int32").unwrap();
        assert!(same_type(&t, &reg.primitive(Primitive::Int32)));
        assert!(parse_type(&reg, "int33").is_err());
    }

    #[test]
    fn test_parse_nested_record() {
        let reg = Registry::new();
        let t = parse_type(&reg, "record[a:int32,b:set[string]]").unwrap();
        assert_eq!(t.key(), "record[a:int32,b:set[string]]");
        let cols = t.columns().unwrap();
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[0].name, "a");
    }

    #[test]
    fn test_print_parse_identity() {
        let reg = Registry::new();
        for s in [
            "record[compass:string,degree:float64]",
            "array[record[x:int64]]",
            "union[int64,string,array[ip]]",
            "set[bstring]",
        ] {
            let t1 = parse_type(&reg, s).unwrap();
            let t2 = parse_type(&reg, &t1.key()).unwrap();
            assert!(same_type(&t1, &t2), "{} did not round-trip", s);
        }
    }

    #[test]
    fn test_parse_alias_name() {
        let reg = Registry::new();
        reg.intern_alias("host", reg.primitive(Primitive::Ip)).unwrap();
        let t = parse_type(&reg, "record[src:host]").unwrap();
        assert_eq!(t.key(), "record[src:host]");
    }

    #[test]
    fn test_tag_reference_resolution() {
        let reg = Registry::new();
        let latlong = parse_type(&reg, "record[compass:string,degree:float64]").unwrap();
        let resolver = |tag: u64| {
            if tag == 0 {
                Some(latlong.clone())
            } else {
                None
            }
        };
        let t = parse_type_with(&reg, "record[city:string,lat:0,long:0]", &resolver).unwrap();
        let cols = t.columns().unwrap();
        assert!(same_type(&cols[1].ty, &latlong));
        assert!(same_type(&cols[2].ty, &latlong));

        assert!(parse_type_with(&reg, "record[x:7]", &resolver).is_err());
    }

    #[test]
    fn test_rejects_malformed() {
        let reg = Registry::new();
        assert!(parse_type(&reg, "record[").is_err());
        assert!(parse_type(&reg, "record[a:int32]x").is_err());
        assert!(parse_type(&reg, "record[]").is_err());
        assert!(parse_type(&reg, "set[record[a:bool]]").is_err());
        assert!(parse_type(&reg, "union[]").is_err());
    }
}
