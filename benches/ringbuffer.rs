// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use diskstream::ringbuffer::PlaybackRingBuffer;

fn generate_block(len: usize) -> Vec<f32> {
    (0..len).map(|i| (i as f32 * 0.01).sin()).collect()
}

fn benchmark_write_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_read");

    for block in [64usize, 256, 1024, 4096] {
        let ring = PlaybackRingBuffer::<f32>::new(block * 8);
        let src = generate_block(block);
        let mut dst = vec![0.0f32; block];

        group.bench_with_input(BenchmarkId::from_parameter(block), &block, |b, _| {
            b.iter(|| {
                let written = ring.write(black_box(&src));
                let read = ring.read(black_box(&mut dst));
                black_box((written, read))
            })
        });
    }

    group.finish();
}

fn benchmark_seek_in(c: &mut Criterion) {
    let mut group = c.benchmark_group("seek_in");

    let mut ring = PlaybackRingBuffer::<f32>::new(65536);
    ring.set_reservation(4096);
    ring.write(&generate_block(32768));
    let mut dst = vec![0.0f32; 512];
    ring.read(&mut dst);

    group.bench_function("forward_and_back", |b| {
        b.iter(|| {
            let forward = ring.can_seek(black_box(256));
            ring.increment_read_ptr(256);
            let back = ring.can_seek(black_box(-256));
            ring.decrement_read_ptr(256);
            black_box((forward, back))
        })
    });

    group.finish();
}

fn benchmark_refill_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("refill_cycle");

    // One 8k chunk in, sixteen 512 sample periods out.
    let ring = PlaybackRingBuffer::<f32>::new(65536);
    let chunk = generate_block(8192);
    let mut period = vec![0.0f32; 512];

    group.bench_function("chunk_8192_period_512", |b| {
        b.iter(|| {
            ring.write(black_box(&chunk));
            for _ in 0..16 {
                ring.read(black_box(&mut period));
            }
            black_box(ring.read_space())
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_write_read,
    benchmark_seek_in,
    benchmark_refill_cycle
);
criterion_main!(benches);
