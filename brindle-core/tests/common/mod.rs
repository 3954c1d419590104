// Test utilities and generators for brindle property-based testing

#![allow(dead_code)]

use brindle_core::registry::Registry;
use brindle_core::tag;
use brindle_core::types::{Column, Primitive, TypeRef, PRIMITIVES};
use brindle_core::value::{encode_int, encode_uint};
use proptest::prelude::*;

/// Registry-independent description of a type shape
#[derive(Debug, Clone)]
pub enum TypeSpec {
    Prim(Primitive),
    Record(Vec<(String, TypeSpec)>),
    Array(Box<TypeSpec>),
    Set(Primitive),
    Union(Vec<Primitive>),
}

pub fn spec_is_container(spec: &TypeSpec) -> bool {
    !matches!(spec, TypeSpec::Prim(_))
}

/// Intern a spec into a registry
pub fn build_type(reg: &Registry, spec: &TypeSpec) -> TypeRef {
    match spec {
        TypeSpec::Prim(p) => reg.primitive(*p),
        TypeSpec::Record(fields) => {
            let columns = fields
                .iter()
                .map(|(name, s)| Column::new(name.clone(), build_type(reg, s)))
                .collect();
            reg.intern_record(columns).expect("generated record is valid")
        }
        TypeSpec::Array(elem) => reg
            .intern_array(build_type(reg, elem))
            .expect("generated array is valid"),
        TypeSpec::Set(p) => reg
            .intern_set(reg.primitive(*p))
            .expect("generated set is valid"),
        TypeSpec::Union(members) => reg
            .intern_union(members.iter().map(|p| reg.primitive(*p)).collect())
            .expect("generated union is valid"),
    }
}

pub fn arb_primitive() -> impl Strategy<Value = Primitive> {
    prop::sample::select(PRIMITIVES.to_vec())
}

/// Distinct member lists for unions
fn arb_union_members() -> impl Strategy<Value = Vec<Primitive>> {
    prop::sample::subsequence(PRIMITIVES.to_vec(), 1..=3)
}

/// Generate type shapes with bounded nesting
pub fn arb_type_spec() -> BoxedStrategy<TypeSpec> {
    let leaf = prop_oneof![
        4 => arb_primitive().prop_map(TypeSpec::Prim),
        1 => arb_primitive().prop_map(TypeSpec::Set),
        1 => arb_union_members().prop_map(TypeSpec::Union),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..4).prop_map(|specs| {
                TypeSpec::Record(
                    specs
                        .into_iter()
                        .enumerate()
                        .map(|(i, s)| (format!("f{}", i), s))
                        .collect(),
                )
            }),
            inner.prop_map(|s| TypeSpec::Array(Box::new(s))),
        ]
    })
    .boxed()
}

/// Canonical body bytes for a primitive kind
pub fn arb_prim_body(p: Primitive) -> BoxedStrategy<Vec<u8>> {
    match p {
        Primitive::Bool => prop_oneof![Just(vec![0u8]), Just(vec![1u8])].boxed(),
        Primitive::Byte => any::<u8>().prop_map(|b| vec![b]).boxed(),
        Primitive::Int16 => any::<i16>().prop_map(|v| encode_int(i64::from(v))).boxed(),
        Primitive::Int32 => any::<i32>().prop_map(|v| encode_int(i64::from(v))).boxed(),
        Primitive::Int64 => any::<i64>().prop_map(encode_int).boxed(),
        Primitive::Uint16 => any::<u16>().prop_map(|v| encode_uint(u64::from(v))).boxed(),
        Primitive::Uint32 => any::<u32>().prop_map(|v| encode_uint(u64::from(v))).boxed(),
        Primitive::Uint64 => any::<u64>().prop_map(encode_uint).boxed(),
        // NaN payloads survive the binary form but not a text rewrite, so
        // the shared generator sticks to comparable floats
        Primitive::Float64 => (prop::num::f64::NORMAL
            | prop::num::f64::SUBNORMAL
            | prop::num::f64::ZERO
            | prop::num::f64::INFINITE)
            .prop_map(|v| v.to_le_bytes().to_vec())
            .boxed(),
        Primitive::String => any::<String>().prop_map(String::into_bytes).boxed(),
        Primitive::Bytes | Primitive::Bstring => {
            prop::collection::vec(any::<u8>(), 0..24).boxed()
        }
        Primitive::Enum => "[a-zA-Z_][a-zA-Z0-9_]{0,8}"
            .prop_map(|s| s.into_bytes())
            .boxed(),
        Primitive::Ip => prop_oneof![
            any::<[u8; 4]>().prop_map(|a| a.to_vec()),
            any::<[u8; 16]>().prop_map(|a| a.to_vec()),
        ]
        .boxed(),
        Primitive::Port => (any::<u16>(), prop_oneof![Just(""), Just("tcp"), Just("udp")])
            .prop_map(|(port, proto)| {
                let mut body = port.to_le_bytes().to_vec();
                body.extend_from_slice(proto.as_bytes());
                body
            })
            .boxed(),
        Primitive::Net => prop_oneof![
            (any::<[u8; 4]>(), 0u32..=32).prop_map(|(addr, prefix)| net_body(&addr, prefix)),
            (any::<[u8; 16]>(), 0u32..=128).prop_map(|(addr, prefix)| net_body(&addr, prefix)),
        ]
        .boxed(),
        Primitive::Time | Primitive::Duration => any::<i64>().prop_map(encode_int).boxed(),
        Primitive::Null => Just(Vec::new()).boxed(),
    }
}

fn net_body(addr: &[u8], prefix: u32) -> Vec<u8> {
    let mut body = addr.to_vec();
    let mut remaining = prefix;
    for _ in 0..addr.len() {
        let take = remaining.min(8);
        body.push((0xffu16 << (8 - take)) as u8);
        remaining -= take;
    }
    body
}

/// Body generator for a spec, biased toward set values with occasional
/// unset
pub fn arb_body(spec: &TypeSpec) -> BoxedStrategy<Option<Vec<u8>>> {
    let present = arb_present(spec);
    prop_oneof![
        1 => Just(None),
        6 => present.prop_map(Some),
    ]
    .boxed()
}

fn arb_present(spec: &TypeSpec) -> BoxedStrategy<Vec<u8>> {
    match spec {
        TypeSpec::Prim(p) => arb_prim_body(*p),
        TypeSpec::Record(fields) => {
            let mut strat: BoxedStrategy<Vec<u8>> = Just(Vec::new()).boxed();
            for (_, field_spec) in fields {
                let container = spec_is_container(field_spec);
                let elem = arb_body(field_spec);
                strat = (strat, elem)
                    .prop_map(move |(mut body, elem_body)| {
                        tag::append(&mut body, elem_body.as_deref(), container);
                        body
                    })
                    .boxed();
            }
            strat
        }
        TypeSpec::Array(elem_spec) => {
            let container = spec_is_container(elem_spec);
            prop::collection::vec(arb_body(elem_spec), 0..4)
                .prop_map(move |elems| {
                    let mut body = Vec::new();
                    for elem_body in elems {
                        tag::append(&mut body, elem_body.as_deref(), container);
                    }
                    body
                })
                .boxed()
        }
        TypeSpec::Set(p) => {
            prop::collection::vec(prop::option::weighted(0.9, arb_prim_body(*p)), 0..5)
                .prop_map(|elems| {
                    // Sets are canonical by construction: encodings sorted
                    // ascending, duplicates dropped
                    let mut encodings: Vec<Vec<u8>> = elems
                        .iter()
                        .map(|e| tag::encode_element(e.as_deref(), false))
                        .collect();
                    encodings.sort();
                    encodings.dedup();
                    encodings.concat()
                })
                .boxed()
        }
        TypeSpec::Union(members) => {
            let members = members.clone();
            (0..members.len())
                .prop_flat_map(move |i| {
                    let member = members[i];
                    prop::option::weighted(0.9, arb_prim_body(member)).prop_map(
                        move |elem_body| {
                            let mut body = Vec::new();
                            let mut index = Vec::new();
                            brindle_core::varint::put_uvarint(&mut index, i as u64);
                            tag::append(&mut body, Some(&index), false);
                            tag::append(&mut body, elem_body.as_deref(), false);
                            body
                        },
                    )
                })
                .boxed()
        }
    }
}

/// A spec together with a matching canonical body
pub fn arb_spec_and_body() -> impl Strategy<Value = (TypeSpec, Option<Vec<u8>>)> {
    arb_type_spec().prop_flat_map(|spec| {
        let body = arb_body(&spec);
        (Just(spec), body)
    })
}
