// Concrete stream scenarios in the canonical text form

use std::sync::Arc;

use brindle_core::types::{same_type, Primitive};
use brindle_core::value::decode_int;
use brindle_core::{binary, text, Item, OrderingHint, Registry, Value};

fn registry() -> Arc<Registry> {
    Arc::new(Registry::new())
}

fn drain(input: &str, reg: Arc<Registry>) -> Vec<Item> {
    let mut reader = text::Reader::new(input.as_bytes(), reg);
    let mut out = Vec::new();
    while let Some(item) = reader.read().expect("stream should decode") {
        out.push(item);
    }
    out
}

fn values(items: Vec<Item>) -> Vec<Value> {
    items
        .into_iter()
        .map(|i| match i {
            Item::Value(v) => v,
            other => panic!("expected a value, got {:?}", other),
        })
        .collect()
}

#[test]
fn test_primitive_passthrough_and_binary_reencode() {
    let reg = registry();
    let vals = values(drain("#0:string\n0:hello, world;\n", reg.clone()));
    assert_eq!(vals.len(), 1);
    assert!(same_type(&vals[0].ty, &reg.primitive(Primitive::String)));
    assert_eq!(vals[0].body.as_deref(), Some(&b"hello, world"[..]));

    // Re-encoding in binary: one length byte, one type-id byte, one tag
    // byte, twelve body bytes
    let mut writer = binary::Writer::new(Vec::new());
    writer.write(&vals[0]).unwrap();
    assert_eq!(writer.into_inner().len(), 15);
}

#[test]
fn test_heterogeneous_stream_preserves_order() {
    let input = "#0:string\n#1:int32\n0:hello;\n1:42;\n0:bye;\n1:3;\n";
    let vals = values(drain(input, registry()));
    assert_eq!(vals.len(), 4);
    assert_eq!(vals[0].ty.key(), "string");
    assert_eq!(vals[0].body.as_deref(), Some(&b"hello"[..]));
    assert_eq!(vals[1].ty.key(), "int32");
    assert_eq!(decode_int(vals[1].body.as_deref().unwrap()), 42);
    assert_eq!(vals[2].body.as_deref(), Some(&b"bye"[..]));
    assert_eq!(decode_int(vals[3].body.as_deref().unwrap()), 3);
}

#[test]
fn test_blank_lines_are_skipped() {
    let vals = values(drain("\n#0:bool\n\n0:T;\n\n", registry()));
    assert_eq!(vals.len(), 1);
    assert_eq!(vals[0].body.as_deref(), Some(&[1u8][..]));
}

#[test]
fn test_text_tags_are_independent_of_type_ids() {
    // The producer picks arbitrary tags; 7 here has nothing to do with
    // any type id numbering
    let vals = values(drain("#7:record[a:string]\n7:[x;]\n", registry()));
    assert_eq!(vals.len(), 1);
    assert_eq!(vals[0].ty.key(), "record[a:string]");
}

#[test]
fn test_tag_rebinding() {
    let input = "#0:string\n0:one;\n#0:int64\n0:2;\n";
    let vals = values(drain(input, registry()));
    assert_eq!(vals[0].ty.key(), "string");
    assert_eq!(vals[1].ty.key(), "int64");
}

#[test]
fn test_payloads_interleave_with_values() {
    let input = "#0:string\n0:a;\n#!9:mark;\n0:b;\n";
    let items = drain(input, registry());
    assert_eq!(items.len(), 3);
    assert!(matches!(&items[0], Item::Value(_)));
    match &items[1] {
        Item::Payload(p) => {
            assert_eq!(p.code, 9);
            assert_eq!(&p.body[..], b"mark;");
        }
        other => panic!("expected payload, got {:?}", other),
    }
    assert!(matches!(&items[2], Item::Value(_)));
}

#[test]
fn test_hint_replacement() {
    // The second hint replaces the first, so the descending run is legal
    let input = "#0:record[n:int64]\n#+n\n0:[1;]\n0:[2;]\n#-n\n0:[9;]\n0:[4;]\n";
    let vals = values(drain(input, registry()));
    assert_eq!(vals.len(), 4);
}

#[test]
fn test_writer_binds_tags_sequentially() {
    let reg = registry();
    let a = Value::parse(&reg, "string", b"x").unwrap();
    let b = Value::parse(&reg, "int64", b"5").unwrap();

    let mut writer = text::Writer::new(Vec::new());
    writer.write(&a).unwrap();
    writer.write(&b).unwrap();
    writer.write(&a).unwrap();
    writer
        .write_ordering_hint(&OrderingHint::parse("+ts,-host").unwrap())
        .unwrap();
    let out = String::from_utf8(writer.into_inner()).unwrap();
    assert_eq!(
        out,
        "#0:string\n0:x;\n#1:int64\n1:5;\n0:x;\n#+ts,-host\n"
    );
}

#[test]
fn test_deep_nesting_roundtrip() {
    let input = "#0:record[compass:string,degree:float64]\n\
                 #1:record[city:string,lat:0,long:0]\n\
                 1:[NYC;[N;40.7128;][W;74.0060;]]\n\
                 1:[NorthPole;[N;90;]-;]\n";
    let reg = registry();
    let vals = values(drain(input, reg));

    // Rewrite through a fresh text writer and read it back
    let mut writer = text::Writer::new(Vec::new());
    for v in &vals {
        writer.write(v).unwrap();
    }
    let rewritten = String::from_utf8(writer.into_inner()).unwrap();
    let again = values(drain(&rewritten, registry()));
    assert_eq!(again.len(), vals.len());
    for (a, b) in vals.iter().zip(again.iter()) {
        assert_eq!(a.ty.key(), b.ty.key());
        assert_eq!(a.body, b.body);
    }
}
