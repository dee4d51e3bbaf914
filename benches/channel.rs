// benches/channel.rs

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::thread;
use strand::{Channel, OverflowPolicy};

const ITEMS: usize = 10_000;

fn bounded_spsc_throughput(c: &mut Criterion) {
  let mut group = c.benchmark_group("channel/bounded_spsc");
  group.throughput(Throughput::Elements(ITEMS as u64));
  group.bench_function("send_recv", |b| {
    b.iter(|| {
      let ch = Channel::bounded(128, OverflowPolicy::Block);
      let tx = ch.clone();
      thread::scope(|s| {
        s.spawn(move || {
          for i in 0..ITEMS {
            tx.send(i).unwrap();
          }
        });
        for _ in 0..ITEMS {
          ch.recv().unwrap();
        }
      });
    });
  });
  group.finish();
}

fn unbounded_burst(c: &mut Criterion) {
  let mut group = c.benchmark_group("channel/unbounded");
  group.throughput(Throughput::Elements(ITEMS as u64));
  group.bench_function("burst_then_drain", |b| {
    b.iter(|| {
      let ch = Channel::unbounded();
      for i in 0..ITEMS {
        ch.send(i).unwrap();
      }
      for _ in 0..ITEMS {
        ch.recv().unwrap();
      }
    });
  });
  group.finish();
}

fn displace_producer_only(c: &mut Criterion) {
  let mut group = c.benchmark_group("channel/displace");
  group.throughput(Throughput::Elements(ITEMS as u64));
  group.bench_function("lossy_send", |b| {
    b.iter(|| {
      let ch = Channel::bounded(64, OverflowPolicy::Displace);
      for i in 0..ITEMS {
        ch.send(i).unwrap();
      }
    });
  });
  group.finish();
}

criterion_group!(
  benches,
  bounded_spsc_throughput,
  unbounded_burst,
  displace_producer_only
);
criterion_main!(benches);
