//! Dispatch benchmark suite.
//!
//! Benchmarks the hot path of an incoming request:
//! - Frame decoding and encoding
//! - Envelope resolution at different address depths
//!
//! Run with: cargo bench --bench dispatch
//! Results saved to: target/criterion/

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::{Value, json};
use tokio::runtime::Runtime;
use websignals::protocol::{Frame, encode};
use websignals::{AuthContext, Call, ConnectionId, DispatchEngine, MessageId, Reply};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const DEPTHS: &[usize] = &[1, 4, 16];

// ============================================================================
// Helpers
// ============================================================================

fn segment(depth: usize) -> String {
    format!("s{depth}")
}

/// Builds an engine with a single terminal `depth` segments deep, each
/// segment declaring one positional argument.
fn engine_with_depth(depth: usize) -> DispatchEngine {
    let engine = DispatchEngine::new();
    engine.define(|root| {
        let mut node = root;
        for level in 0..depth {
            node = node
                .child(&segment(level))
                .define_positional_args([format!("arg{level}")])
                .expect("args");
        }
        node.define_terminal(|args, _, _| Reply::Ready(Value::Object(args)))
            .expect("terminal");
    });
    engine
}

fn body_with_depth(depth: usize) -> String {
    let call = (0..depth).fold(Call::new(), |call, level| {
        call.at(&segment(level)).arg(json!(level))
    });
    serde_json::to_string(&call.to_envelope()).expect("envelope")
}

// ============================================================================
// Benchmark: Frame Codec
// ============================================================================

fn bench_frame(c: &mut Criterion) {
    let id = MessageId::generate();
    let body = body_with_depth(4);
    let frame = encode(Some(&id), &body);

    let mut group = c.benchmark_group("frame");
    group.bench_function("encode", |b| {
        b.iter(|| encode(black_box(Some(&id)), black_box(&body)));
    });
    group.bench_function("decode", |b| {
        b.iter(|| Frame::decode(black_box(&frame)));
    });
    group.bench_function("decode_keep_alive", |b| {
        b.iter(|| Frame::decode(black_box("BEEP")));
    });
    group.finish();
}

// ============================================================================
// Benchmark: Dispatch
// ============================================================================

fn bench_dispatch(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let auth = AuthContext::anonymous(ConnectionId::from("bench"));

    let mut group = c.benchmark_group("dispatch");
    for &depth in DEPTHS {
        let engine = engine_with_depth(depth);
        let body = body_with_depth(depth);

        group.bench_with_input(BenchmarkId::new("respond", depth), &depth, |b, _| {
            b.to_async(&rt)
                .iter(|| async { engine.respond(black_box(&body), &auth).await });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_frame, bench_dispatch);
criterion_main!(benches);
