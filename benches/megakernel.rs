use criterion::*;
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use gridsim::{
    GridConfig, HostAllocator, NodeData, StateManager, TaskContext, TaskGraph, TaskGraphBuilder,
};

struct Accum {
    sum: AtomicU64,
}

fn accum_kernel(_ctx: &TaskContext<'_>, data: &NodeData, offset: u32) {
    let accum = data.user::<Arc<Accum>>().unwrap();
    accum.sum.fetch_add(offset as u64, Ordering::Relaxed);
}

fn make_graph(num_nodes: u32, invocations: u32, num_blocks: u32) -> (TaskGraph, Arc<Accum>) {
    let alloc = Arc::new(HostAllocator::new());
    let state = Arc::new(StateManager::new(1, Arc::clone(&alloc)));
    let accum = Arc::new(Accum {
        sum: AtomicU64::new(0),
    });

    let mut builder = TaskGraphBuilder::new();
    let func = builder.register_func(accum_kernel);
    let data = builder.add_node_data(NodeData::new(0, Arc::clone(&accum)));
    for _ in 0..num_nodes {
        builder.add_node(func, data, invocations, 1);
    }

    let config = GridConfig {
        num_blocks,
        threads_per_block: 256,
        blocks_per_sm: 1,
        num_worlds: 1,
    };
    let graph = builder.build(state, alloc, config).unwrap();
    (graph, accum)
}

fn launch_benchmark(c: &mut Criterion) {
    let _ = env_logger::try_init();

    let mut group = c.benchmark_group("megakernel");

    group.bench_function("launch_1_node_64k", |b| {
        let (graph, accum) = make_graph(1, 64 * 1024, 4);
        b.iter(|| {
            graph.launch();
            black_box(accum.sum.load(Ordering::Relaxed));
        });
    });

    group.bench_function("launch_16_node_chain_4k", |b| {
        let (graph, accum) = make_graph(16, 4 * 1024, 4);
        b.iter(|| {
            graph.launch();
            black_box(accum.sum.load(Ordering::Relaxed));
        });
    });

    group.finish();
}

criterion_group!(benches, launch_benchmark);
criterion_main!(benches);
