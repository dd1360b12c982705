// Inbound scheduling and dispatch benchmarks.
//
// Covers raw scheduler throughput under mixed priorities, and a full
// STARTUP burst through the listener over the in-memory transport.

use std::net::SocketAddr;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};

use cma_protocol::codec::{Frame, FrameSet, FrameSetKind};
use cma_protocol::config::CmaConfig;
use cma_protocol::network::{register_default_handlers, MessageRouter, PacketListener, PacketScheduler};
use cma_protocol::storage::GraphStore;
use cma_protocol::transport::{MemoryTransport, Transport};
use cma_protocol::CmaContext;

const KINDS: [FrameSetKind; 4] = [
    FrameSetKind::JsDiscovery,
    FrameSetKind::HbLate,
    FrameSetKind::Startup,
    FrameSetKind::HbDead,
];

fn addr(i: usize) -> SocketAddr {
    SocketAddr::from(([10, (i >> 16) as u8, (i >> 8) as u8, i as u8], 1984))
}

fn bench_enqueue_dequeue(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler/mixed");
    for sources in [1usize, 16, 256] {
        let messages = 4096;
        group.throughput(Throughput::Elements(messages as u64));
        group.bench_with_input(BenchmarkId::from_parameter(sources), &sources, |b, &sources| {
            b.iter_batched(
                || {
                    (0..messages)
                        .map(|i| (addr(i % sources), FrameSet::new(KINDS[i % KINDS.len()])))
                        .collect::<Vec<_>>()
                },
                |input| {
                    let mut scheduler = PacketScheduler::new();
                    for (source, fs) in input {
                        scheduler.enqueue(source, fs);
                    }
                    while scheduler.dequeue().is_some() {}
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_startup_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("listener/startup_burst");
    for drones in [8usize, 64] {
        group.throughput(Throughput::Elements(drones as u64));
        group.bench_with_input(BenchmarkId::from_parameter(drones), &drones, |b, &drones| {
            b.iter_batched(
                || {
                    let transport = MemoryTransport::new();
                    let ctx = CmaContext::new(
                        CmaConfig::default(),
                        GraphStore::open_temporary().expect("temp store"),
                        transport.identities(),
                    )
                    .expect("context");
                    let mut router = MessageRouter::new();
                    register_default_handlers(&mut router);
                    for i in 0..drones {
                        let fs = FrameSet::new(FrameSetKind::Startup)
                            .with_frame(Frame::Hostname(format!("drone-{i}")));
                        transport.inject(addr(i + 1), vec![fs]);
                    }
                    (PacketListener::new(transport, router, false), ctx)
                },
                |(mut listener, mut ctx)| {
                    listener.handle_readiness(&mut ctx).expect("dispatch");
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_enqueue_dequeue, bench_startup_burst);
criterion_main!(benches);
