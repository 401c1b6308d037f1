use criterion::{black_box, criterion_group, criterion_main, Criterion};
use markbind_tree::{FileStub, MarkupFile};

fn project_source(modules: usize) -> String {
    let mut source = String::from("<project xmlns=\"urn:build\" name=\"bench\">\n");
    for i in 0..modules {
        source.push_str(&format!(
            "  <module id=\"m{i}\" enabled=\"true\">\n    <source>src/m{i}</source>\n    <dependency ref=\"m{}\"/>\n  </module>\n",
            i.saturating_sub(1)
        ));
    }
    source.push_str("</project>\n");
    source
}

fn parse_small_file(c: &mut Criterion) {
    let source = project_source(5);

    c.bench_function("parse_small_file", |b| {
        b.iter(|| MarkupFile::parse("/bench.xml", black_box(source.as_str())))
    });
}

fn parse_large_file(c: &mut Criterion) {
    let source = project_source(500);

    c.bench_function("parse_large_file", |b| {
        b.iter(|| MarkupFile::parse("/bench.xml", black_box(source.as_str())))
    });
}

fn stub_roundtrip(c: &mut Criterion) {
    let file = MarkupFile::parse("/bench.xml", project_source(200)).unwrap();
    let bytes = file.stub().unwrap().to_bytes().unwrap();

    c.bench_function("stub_from_bytes", |b| {
        b.iter(|| FileStub::from_bytes(black_box(&bytes)))
    });
}

criterion_group!(benches, parse_small_file, parse_large_file, stub_roundtrip);
criterion_main!(benches);
