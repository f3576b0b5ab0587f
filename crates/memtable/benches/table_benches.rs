// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use memtable::{Datum, IsolationPolicy, LocalOracle, Row, Table, TimestampOracle, Tuple};
use std::hint::black_box;
use std::time::Duration;

#[derive(Clone, Debug)]
struct BenchRow {
    key: u64,
    value: u64,
}

impl Row<u64, u64> for BenchRow {
    fn key(&self) -> u64 {
        self.key
    }

    fn value(&self) -> u64 {
        self.value
    }

    fn indexes(&self) -> Vec<Tuple> {
        vec![Tuple::new(vec![Datum::from("bucket"), Datum::from(self.key % 16)])]
    }
}

type BenchTable = Table<u64, u64, BenchRow>;

const ROWS: u64 = 1_000;

fn populated() -> (LocalOracle, BenchTable) {
    let oracle = LocalOracle::new();
    let table = BenchTable::new();
    let tx = oracle.begin(IsolationPolicy::default());
    for key in 0..ROWS {
        table.insert(&tx, BenchRow { key, value: key }).unwrap();
    }
    oracle.commit(&tx).unwrap();
    (oracle, table)
}

fn write_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_commit");
    group.throughput(Throughput::Elements(ROWS));

    group.bench_function("insert_commit", |b| {
        b.iter_batched(
            || (LocalOracle::new(), BenchTable::new()),
            |(oracle, table)| {
                let tx = oracle.begin(IsolationPolicy::default());
                for key in 0..ROWS {
                    table.insert(&tx, BenchRow { key, value: key }).unwrap();
                }
                oracle.commit(&tx).unwrap();
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("update_commit", |b| {
        let (oracle, table) = populated();
        let mut round = 0;
        b.iter_custom(|iters| {
            let mut cumulative = Duration::ZERO;
            for _ in 0..iters {
                round += 1;
                let tx = oracle.begin(IsolationPolicy::default());
                let start = std::time::Instant::now();
                for key in 0..ROWS {
                    table.update(&tx, BenchRow { key, value: round }).unwrap();
                }
                oracle.commit(&tx).unwrap();
                cumulative += start.elapsed();
            }
            cumulative
        })
    });

    group.finish();
}

fn reads(c: &mut Criterion) {
    let (oracle, table) = populated();
    let tx = oracle.begin(IsolationPolicy::default());

    let mut group = c.benchmark_group("reads");
    group.throughput(Throughput::Elements(ROWS));
    group.bench_function("get", |b| {
        b.iter(|| {
            for key in 0..ROWS {
                black_box(table.get(&tx, &key).unwrap());
            }
        })
    });

    let bucket = Tuple::new(vec![Datum::from("bucket"), Datum::from(3u64)]);
    group.throughput(Throughput::Elements(ROWS / 16));
    group.bench_function("index", |b| {
        b.iter(|| black_box(table.index(&tx, &bucket).unwrap()))
    });
    group.finish();
}

criterion_group!(benches, write_commit, reads);
criterion_main!(benches);
