use criterion::{black_box, criterion_group, criterion_main, Criterion};

use jamotext_core::dictionary::Dictionary;
use jamotext_core::jamo;
use jamotext_core::matrix::Matrix;
use jamotext_core::vector::Vector;

fn bench_hash(c: &mut Criterion) {
    c.bench_function("fnv1a_hash", |b| {
        b.iter(|| Dictionary::hash(black_box("Тестовое предложение")))
    });
}

fn bench_decompose(c: &mut Criterion) {
    c.bench_function("jamo_decompose", |b| {
        b.iter(|| jamo::decompose(black_box("대한민국은 민주공화국이다")))
    });
}

fn bench_dot_row(c: &mut Criterion) {
    let mut matrix = Matrix::new(100, 300);
    matrix.uniform(0.1);
    let vec = Vector::from_vec(vec![0.5; 300]);
    c.bench_function("matrix_dot_row", |b| {
        b.iter(|| matrix.dot_row(black_box(&vec), 50).unwrap())
    });
}

criterion_group!(benches, bench_hash, bench_decompose, bench_dot_row);
criterion_main!(benches);
