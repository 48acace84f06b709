use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use gridsim::{
    GridConfig, HostAllocator, NodeData, StateManager, TaskContext, TaskGraphBuilder, TraceEvent,
};

/// Per-offset hit counters shared between a node's payload and the test.
struct Hits {
    counts: Vec<AtomicU32>,
}

impl Hits {
    fn new(total: usize) -> Arc<Self> {
        Arc::new(Self {
            counts: (0..total).map(|_| AtomicU32::new(0)).collect(),
        })
    }

    fn total(&self) -> u32 {
        self.counts.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }
}

fn count_kernel(_ctx: &TaskContext<'_>, data: &NodeData, offset: u32) {
    let hits = data.user::<Arc<Hits>>().unwrap();
    hits.counts[offset as usize].fetch_add(1, Ordering::Relaxed);
}

fn make_state() -> (Arc<StateManager>, Arc<HostAllocator>) {
    let _ = env_logger::builder().is_test(true).try_init();

    let alloc = Arc::new(HostAllocator::new());
    let state = Arc::new(StateManager::new(1, Arc::clone(&alloc)));
    (state, alloc)
}

fn config(num_blocks: u32, threads_per_block: u32) -> GridConfig {
    GridConfig {
        num_blocks,
        threads_per_block,
        blocks_per_sm: 1,
        num_worlds: 1,
    }
}

#[test]
fn empty_dag_exits_every_block_immediately() {
    let (state, alloc) = make_state();

    let graph = TaskGraphBuilder::new()
        .build(state, alloc, config(4, 256))
        .unwrap();

    let stats = graph.launch();
    assert_eq!(stats.lanes_run, 0);
    assert_eq!(stats.lanes_partial, 0);

    let trace = graph.tracing().drain();
    assert_eq!(trace[0].event, TraceEvent::Calibration);

    let exits = trace
        .iter()
        .filter(|r| r.event == TraceEvent::BlockExit)
        .count();
    assert_eq!(exits, 4, "one blockExit per block");

    assert!(
        !trace.iter().any(|r| r.event == TraceEvent::NodeStart),
        "no node may start in an empty DAG"
    );
}

#[test]
fn single_fixed_node_runs_every_offset_exactly_once() {
    let (state, alloc) = make_state();

    let hits = Hits::new(1024);
    let mut builder = TaskGraphBuilder::new();
    let func = builder.register_func(count_kernel);
    let data = builder.add_node_data(NodeData::new(0, Arc::clone(&hits)));
    builder.add_node(func, data, 1024, 1);

    let graph = builder.build(state, alloc, config(4, 256)).unwrap();
    let stats = graph.launch();

    assert_eq!(stats.lanes_run, 1024, "exactly 1024 lanes run");
    assert_eq!(stats.lanes_partial, 0, "no lane falls past the end");

    for (offset, count) in hits.counts.iter().enumerate() {
        assert_eq!(
            count.load(Ordering::Relaxed),
            1,
            "offset {offset} must run exactly once"
        );
    }

    let node = graph.node(0);
    assert_eq!(node.num_remaining.load(Ordering::Relaxed), 0);
    assert_eq!(node.total_num_invocations.load(Ordering::Relaxed), 1024);
    assert!(node.cur_offset.load(Ordering::Relaxed) >= 1024);
}

#[test]
fn dynamic_zero_node_is_skipped_without_initialization() {
    let (state, alloc) = make_state();

    let hits_a = Hits::new(8);
    let hits_b = Hits::new(1);
    let hits_c = Hits::new(4);

    let mut builder = TaskGraphBuilder::new();
    let func = builder.register_func(count_kernel);

    let data_a = builder.add_node_data(NodeData::new(0, Arc::clone(&hits_a)));
    let data_b = builder.add_node_data(NodeData::new(0, Arc::clone(&hits_b)));
    let data_c = builder.add_node_data(NodeData::new(0, Arc::clone(&hits_c)));

    builder.add_node(func, data_a, 8, 1);
    builder.add_node(func, data_b, 0, 1); // dynamic, stays empty
    builder.add_node(func, data_c, 4, 1);

    let graph = builder.build(state, alloc, config(2, 64)).unwrap();
    graph.launch();

    assert_eq!(hits_a.total(), 8);
    assert_eq!(hits_b.total(), 0, "empty dynamic node must not run");
    assert_eq!(hits_c.total(), 4);

    // The retirer of A skipped B entirely: its counters were never
    // initialized for the run.
    let skipped = graph.node(1);
    assert_eq!(skipped.total_num_invocations.load(Ordering::Relaxed), 0);
    assert_eq!(skipped.num_remaining.load(Ordering::Relaxed), 0);

    let trace = graph.tracing().drain();
    let started: Vec<u32> = trace
        .iter()
        .filter(|r| r.event == TraceEvent::NodeStart)
        .map(|r| r.node_idx)
        .collect();
    assert_eq!(started, vec![0, 2], "nodeStart for A then C, never B");

    let finished: Vec<u32> = trace
        .iter()
        .filter(|r| r.event == TraceEvent::NodeFinish)
        .map(|r| r.node_idx)
        .collect();
    assert_eq!(finished, vec![0, 2]);
}

#[test]
fn narrow_node_with_partial_warp_accounts_every_invocation() {
    let (state, alloc) = make_state();

    let hits = Hits::new(33);
    let mut builder = TaskGraphBuilder::new();
    let func = builder.register_func(count_kernel);
    let data = builder.add_node_data(NodeData::new(0, Arc::clone(&hits)));
    builder.add_node(func, data, 33, 1);

    // One block of two warps: the first warp covers offsets 0..32, the
    // second claims offsets 32..64 and only lane 0 lands inside the node.
    let graph = builder.build(state, alloc, config(1, 64)).unwrap();
    let stats = graph.launch();

    assert_eq!(stats.lanes_run, 33);
    assert_eq!(stats.lanes_partial, 31, "second warp runs one lane of 32");

    for (offset, count) in hits.counts.iter().enumerate() {
        assert_eq!(count.load(Ordering::Relaxed), 1, "offset {offset}");
    }
    assert_eq!(graph.node(0).num_remaining.load(Ordering::Relaxed), 0);
}

#[test]
fn contended_claims_stay_at_most_once() {
    let (state, alloc) = make_state();

    let total = 10_000u32;
    let hits = Hits::new(total as usize);
    let mut builder = TaskGraphBuilder::new();
    let func = builder.register_func(count_kernel);
    let data = builder.add_node_data(NodeData::new(0, Arc::clone(&hits)));
    builder.add_node(func, data, total, 1);

    let graph = builder.build(state, alloc, config(8, 128)).unwrap();
    let stats = graph.launch();

    assert_eq!(stats.lanes_run as u32, total);
    for (offset, count) in hits.counts.iter().enumerate() {
        assert_eq!(count.load(Ordering::Relaxed), 1, "offset {offset}");
    }
}

#[test]
fn wide_invocations_cooperate_across_lanes() {
    let (state, alloc) = make_state();

    let hits = Hits::new(6);
    let mut builder = TaskGraphBuilder::new();
    let func = builder.register_func(count_kernel);
    let data = builder.add_node_data(NodeData::new(0, Arc::clone(&hits)));
    builder.add_node(func, data, 6, 64);

    let graph = builder.build(state, alloc, config(2, 128)).unwrap();
    let stats = graph.launch();

    // Every invocation is executed cooperatively by 64 lanes.
    assert_eq!(stats.lanes_run, 6 * 64);
    for (offset, count) in hits.counts.iter().enumerate() {
        assert_eq!(count.load(Ordering::Relaxed), 64, "offset {offset}");
    }
    assert_eq!(graph.node(0).num_remaining.load(Ordering::Relaxed), 0);
}

#[test]
fn successor_never_starts_before_predecessor_retires() {
    struct Chain {
        upstream_done: AtomicU32,
        ordering_ok: AtomicBool,
    }

    fn upstream(_ctx: &TaskContext<'_>, data: &NodeData, _offset: u32) {
        let chain = data.user::<Arc<Chain>>().unwrap();
        chain.upstream_done.fetch_add(1, Ordering::Relaxed);
    }

    fn downstream(_ctx: &TaskContext<'_>, data: &NodeData, _offset: u32) {
        let chain = data.user::<Arc<Chain>>().unwrap();
        if chain.upstream_done.load(Ordering::Relaxed) != 64 {
            chain.ordering_ok.store(false, Ordering::Relaxed);
        }
    }

    let (state, alloc) = make_state();
    let chain = Arc::new(Chain {
        upstream_done: AtomicU32::new(0),
        ordering_ok: AtomicBool::new(true),
    });

    let mut builder = TaskGraphBuilder::new();
    let up = builder.register_func(upstream);
    let down = builder.register_func(downstream);
    let data = builder.add_node_data(NodeData::new(0, Arc::clone(&chain)));
    builder.add_node(up, data, 64, 1);
    builder.add_node(down, data, 64, 1);

    let graph = builder.build(state, alloc, config(4, 64)).unwrap();
    graph.launch();

    assert_eq!(chain.upstream_done.load(Ordering::Relaxed), 64);
    assert!(
        chain.ordering_ok.load(Ordering::Relaxed),
        "no downstream invocation may observe an unfinished upstream node"
    );
}

#[test]
fn producer_sizes_dynamic_successor() {
    struct Producer {
        consumer_data: u32,
        produced: u32,
    }

    fn produce(ctx: &TaskContext<'_>, data: &NodeData, _offset: u32) {
        let p = data.user::<Producer>().unwrap();
        ctx.node_data(p.consumer_data).set_dynamic_count(p.produced);
    }

    let (state, alloc) = make_state();

    let hits = Hits::new(5);
    let mut builder = TaskGraphBuilder::new();
    let produce_fn = builder.register_func(produce);
    let consume_fn = builder.register_func(count_kernel);

    let consumer_data = builder.add_node_data(NodeData::new(0, Arc::clone(&hits)));
    let producer_data = builder.add_node_data(NodeData::new(
        0,
        Producer {
            consumer_data,
            produced: 5,
        },
    ));

    builder.add_node(produce_fn, producer_data, 1, 1);
    builder.add_node(consume_fn, consumer_data, 0, 1); // dynamic

    let graph = builder.build(state, alloc, config(2, 64)).unwrap();
    graph.launch();

    assert_eq!(hits.total(), 5, "dynamic count written by the producer");
    assert_eq!(
        graph.node(1).total_num_invocations.load(Ordering::Relaxed),
        5
    );
}

#[test]
fn graph_relaunch_reinitializes_per_run_state() {
    let (state, alloc) = make_state();

    let hits = Hits::new(512);
    let mut builder = TaskGraphBuilder::new();
    let func = builder.register_func(count_kernel);
    let data = builder.add_node_data(NodeData::new(0, Arc::clone(&hits)));
    builder.add_node(func, data, 512, 1);

    let graph = builder.build(state, alloc, config(4, 128)).unwrap();

    graph.launch();
    graph.launch();

    assert_eq!(hits.total(), 2 * 512);
    for count in hits.counts.iter() {
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    // The tracing ring is reset per run: exactly one calibration record.
    let trace = graph.tracing().drain();
    let calibrations = trace
        .iter()
        .filter(|r| r.event == TraceEvent::Calibration)
        .count();
    assert_eq!(calibrations, 1);
}

#[test]
fn kernels_reach_scratch_and_print_channels() {
    fn scratch_kernel(ctx: &TaskContext<'_>, _data: &NodeData, offset: u32) {
        let scratch = ctx.tmp().alloc(128).expect("scratch arena exhausted");
        // Touch the scratch so the commit path is exercised.
        unsafe { scratch.as_ptr().write(offset as u8) };

        if offset == 0 {
            ctx.print().print(format!("block {} saw offset 0", ctx.block_idx()));
        }
    }

    let (state, alloc) = make_state();

    let mut builder = TaskGraphBuilder::new();
    let func = builder.register_func(scratch_kernel);
    let data = builder.add_node_data(NodeData::new(0, ()));
    builder.add_node(func, data, 64, 1);

    let graph = builder.build(state, alloc, config(2, 64)).unwrap();
    graph.launch();

    assert!(graph.tmp().used() > 0);

    let lines = graph.print().drain();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with("saw offset 0"));
}

#[test]
fn kernel_fault_abandons_the_run() {
    fn faulty(_ctx: &TaskContext<'_>, _data: &NodeData, offset: u32) {
        if offset == 7 {
            panic!("kernel fault under test");
        }
    }

    let (state, alloc) = make_state();

    let mut builder = TaskGraphBuilder::new();
    let func = builder.register_func(faulty);
    let data = builder.add_node_data(NodeData::new(0, ()));
    builder.add_node(func, data, 64, 1);

    let graph = builder.build(state, alloc, config(2, 64)).unwrap();

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| graph.launch()));
    assert!(outcome.is_err(), "the fault must propagate to the caller");
}

#[test]
fn builder_rejects_invalid_invocation_widths() {
    let (state, alloc) = make_state();

    let mut builder = TaskGraphBuilder::new();
    let func = builder.register_func(count_kernel);
    let data = builder.add_node_data(NodeData::new(0, ()));
    // 48 neither divides the warp width nor is a multiple of it.
    builder.add_node(func, data, 16, 48);

    let err = builder.build(state, alloc, config(1, 64)).unwrap_err();
    assert!(matches!(
        err,
        gridsim::BuildError::InvocationWidth {
            threads_per_invocation: 48,
            ..
        }
    ));
}
