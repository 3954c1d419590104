use std::sync::Arc;

use brindle_core::path::{self, PathExpr};
use brindle_core::tag::Builder;
use brindle_core::types::{Column, Primitive};
use brindle_core::value::encode_int;
use brindle_core::{binary, Registry, Value};
use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn sample_value(reg: &Registry) -> Value {
    let ty = reg
        .intern_record(vec![
            Column::new("ts", reg.primitive(Primitive::Time)),
            Column::new("msg", reg.primitive(Primitive::String)),
            Column::new("status", reg.primitive(Primitive::Int32)),
        ])
        .unwrap();
    let mut b = Builder::new();
    b.append_primitive(Some(&encode_int(1_588_508_983_896_000_000)))
        .append_primitive(Some(b"GET /index.html 200 OK"))
        .append_primitive(Some(&encode_int(200)));
    Value::new(ty, Some(Bytes::from(b.into_body())))
}

fn bench_binary_write(c: &mut Criterion) {
    let reg = Registry::new();
    let v = sample_value(&reg);

    c.bench_function("binary_write_record", |b| {
        b.iter(|| {
            let mut writer = binary::Writer::new(Vec::with_capacity(128));
            writer.write(black_box(&v)).unwrap();
            writer.into_inner()
        })
    });
}

fn bench_binary_read(c: &mut Criterion) {
    let reg = Registry::new();
    let v = sample_value(&reg);
    let mut writer = binary::Writer::new(Vec::new());
    for _ in 0..100 {
        writer.write(&v).unwrap();
    }
    let bytes = writer.into_inner();

    c.bench_function("binary_read_100_records", |b| {
        b.iter(|| {
            let mut reader =
                binary::Reader::new(black_box(bytes.as_slice()), Arc::new(Registry::new()));
            let mut n = 0;
            while reader.read().unwrap().is_some() {
                n += 1;
            }
            n
        })
    });
}

fn bench_path_evaluate(c: &mut Criterion) {
    let reg = Registry::new();
    let v = sample_value(&reg);
    let p = path::compile(&PathExpr::Field {
        name: "status".to_string(),
    })
    .unwrap();

    c.bench_function("path_evaluate_top_field", |b| {
        b.iter(|| p.evaluate(black_box(&v)))
    });
}

criterion_group!(benches, bench_binary_write, bench_binary_read, bench_path_evaluate);
criterion_main!(benches);
