use async_trait::async_trait;
use batchflow::batch::Channel;
use batchflow::config::ChannelConfig;
use batchflow::engine::{PreparedRequest, RawResponse, Transport, TransportError};
use batchflow::graph::GraphBuilder;
use batchflow::request::RequestSpec;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Transport that answers every request immediately
struct EchoTransport;

#[async_trait]
impl Transport for EchoTransport {
    async fn dispatch(&self, request: &PreparedRequest) -> Result<RawResponse, TransportError> {
        Ok(RawResponse::new(200, format!(r#"{{"id":"{}"}}"#, request.id)))
    }
}

fn get(id: String) -> RequestSpec {
    RequestSpec::new("GET", format!("/{}", id)).with_id(id)
}

fn create_chain(len: usize) -> Vec<RequestSpec> {
    (0..len)
        .map(|i| {
            let spec = get(format!("node_{}", i));
            if i == 0 {
                spec
            } else {
                spec.depends_on(format!("node_{}", i - 1))
            }
        })
        .collect()
}

// One root fanning out to `width` leaves that all join into a sink
fn create_fan(width: usize) -> Vec<RequestSpec> {
    let mut specs = vec![get("root".to_string())];
    let mut sink = get("sink".to_string());
    for i in 0..width {
        let id = format!("leaf_{}", i);
        specs.push(get(id.clone()).depends_on("root"));
        sink = sink.depends_on(id);
    }
    specs.push(sink);
    specs
}

fn benchmark_graph_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_build");

    for size in [10, 100, 500] {
        let chain = create_chain(size);
        group.bench_with_input(BenchmarkId::new("chain", size), &chain, |b, specs| {
            b.iter(|| GraphBuilder::build(black_box(specs.clone())))
        });

        let fan = create_fan(size);
        group.bench_with_input(BenchmarkId::new("fan", size), &fan, |b, specs| {
            b.iter(|| GraphBuilder::build(black_box(specs.clone())))
        });
    }

    group.finish();
}

fn benchmark_readiness(c: &mut Criterion) {
    let graph = GraphBuilder::build(create_fan(100)).unwrap();
    let sink = graph.index_of("sink").unwrap();

    c.bench_function("is_ready_wide_join", |b| {
        b.iter(|| black_box(graph.is_ready(sink)))
    });
}

fn benchmark_batch_execution(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let channel = Channel::new(Arc::new(EchoTransport), ChannelConfig::default());
    let channel = &channel;

    let mut group = c.benchmark_group("batch_execution");
    group.sample_size(20);
    for size in [10, 100, 2_000] {
        let chain = create_chain(size);
        group.bench_with_input(BenchmarkId::new("chain", size), &chain, |b, specs| {
            b.to_async(&rt).iter(move || {
                let specs = specs.clone();
                async move { channel.send_specs(specs).await }
            })
        });

        let fan = create_fan(size);
        group.bench_with_input(BenchmarkId::new("fan", size), &fan, |b, specs| {
            b.to_async(&rt).iter(move || {
                let specs = specs.clone();
                async move { channel.send_specs(specs).await }
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    benchmark_graph_build,
    benchmark_readiness,
    benchmark_batch_execution
);

criterion_main!(benches);
