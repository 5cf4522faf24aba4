use criterion::{black_box, criterion_group, criterion_main, Criterion};

use dns_wire::serialise::build_query;
use dns_wire::types::{DomainName, Message, TYPE_A};

fn bench_build_query(c: &mut Criterion) {
    let name = DomainName::new("www.example.com");
    c.bench_function("build_query", |b| {
        b.iter(|| build_query(black_box(&name), black_box(TYPE_A), black_box(true)).unwrap())
    });
}

fn bench_parse_reply(c: &mut Criterion) {
    let name = DomainName::new("www.example.com");
    let query = build_query(&name, TYPE_A, true).unwrap();

    c.bench_function("parse_query", |b| {
        b.iter(|| Message::from_octets(black_box(&query)).unwrap())
    });
}

criterion_group!(benches, bench_build_query, bench_parse_reply);
criterion_main!(benches);
