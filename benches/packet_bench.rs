use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::OsRng;
use tinyfeed::crypto;
use tinyfeed::packet::{self, PacketType, PREFIX_CURRENT};

fn bench_packet(c: &mut Criterion) {
    let (skey, fid) = crypto::generate_keypair(&mut OsRng);
    let prev_mid = [0u8; 20];
    let payload = [0x41u8; 48];

    let (wire, _mid) = packet::encode(PREFIX_CURRENT, &fid, 1, &prev_mid, &payload, PacketType::Plain48, &skey).unwrap();

    c.bench_function("packet_encode", |b| {
        b.iter(|| packet::encode(PREFIX_CURRENT, &fid, 1, &prev_mid, black_box(&payload), PacketType::Plain48, &skey))
    });

    c.bench_function("packet_decode_and_verify", |b| {
        b.iter(|| packet::decode_and_verify(PREFIX_CURRENT, &fid, 1, &prev_mid, black_box(&wire)))
    });
}

criterion_group!(benches, bench_packet);
criterion_main!(benches);
