use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use idp_core::cipher::{CipherKey, Keyring, generate_secret};

fn ring_with_keys(count: usize) -> Keyring {
    let keys = (0..count)
        .map(|idx| CipherKey::generate(format!("key-{idx}")).expect("valid key"))
        .collect();
    Keyring::new(keys).expect("valid keyring")
}

fn bench_encrypt(c: &mut Criterion) {
    let ring = ring_with_keys(1);
    let mut group = c.benchmark_group("encrypt");
    for len in [64usize, 256, 1024] {
        let secret = generate_secret(len);
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &secret, |b, secret| {
            b.iter(|| black_box(ring.encrypt(black_box(secret)).expect("encrypt")));
        });
    }
    group.finish();
}

fn bench_decrypt(c: &mut Criterion) {
    let ring = ring_with_keys(1);
    let mut group = c.benchmark_group("decrypt");
    for len in [64usize, 256, 1024] {
        let stored = ring.encrypt(&generate_secret(len)).expect("encrypt");
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &stored, |b, stored| {
            b.iter(|| black_box(ring.decrypt(black_box(stored)).expect("decrypt")));
        });
    }
    group.finish();
}

// Decryption scans the ring for the stamped key id; measure how ring depth
// affects lookups of a value written by the oldest key.
fn bench_decrypt_rotated_ring(c: &mut Criterion) {
    let mut group = c.benchmark_group("decrypt_rotated_ring");
    for ring_size in [1usize, 4, 16] {
        let oldest = CipherKey::generate("oldest").expect("valid key");
        let stored = Keyring::new(vec![oldest.clone()])
            .expect("valid keyring")
            .encrypt(&generate_secret(64))
            .expect("encrypt");

        let mut keys: Vec<CipherKey> = (0..ring_size.saturating_sub(1))
            .map(|idx| CipherKey::generate(format!("rotated-{idx}")).expect("valid key"))
            .collect();
        keys.push(oldest);
        let ring = Keyring::new(keys).expect("valid keyring");

        group.bench_with_input(
            BenchmarkId::from_parameter(ring_size),
            &stored,
            |b, stored| {
                b.iter(|| black_box(ring.decrypt(black_box(stored)).expect("decrypt")));
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_encrypt,
    bench_decrypt,
    bench_decrypt_rotated_ring
);
criterion_main!(benches);
