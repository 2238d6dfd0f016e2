use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serclient_agent::crc32;
use serclient_agent::packet::{self, Packet, ResponseType};

pub fn crc(c: &mut Criterion) {
    c.bench_function("crc32_1kb", |b| {
        let data = vec![0x5au8; 1024];
        b.iter(|| black_box(crc32(&data)))
    });
}

pub fn codec(c: &mut Criterion) {
    let guid = "a".repeat(32);

    c.bench_function("encode_command_packet", |b| {
        let p = packet::command(guid.clone(), "osinfo --verbose", None);
        b.iter(|| black_box(p.encode()))
    });

    c.bench_function("decode_command_packet", |b| {
        let p = packet::command(guid.clone(), "osinfo --verbose", None);
        let bytes = p.encode();
        b.iter(|| black_box(Packet::decode(&bytes).unwrap()))
    });

    c.bench_function("encode_response_packet", |b| {
        let output = "<osinfo><name>X</name><version>1</version></osinfo>".repeat(4);
        b.iter(|| {
            black_box(packet::response(
                guid.clone(),
                ResponseType::Success,
                "osinfo",
                &output,
                0,
                "",
            ))
        })
    });
}

criterion_group!(benches, crc, codec);
criterion_main!(benches);
