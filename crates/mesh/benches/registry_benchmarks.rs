//! Mesh bookkeeping benchmarks
//!
//! Benchmarks for:
//! - Filling the registry up to the peer limit
//! - Roster reconciliation churn
//! - Routing an offer through to a committed answer
//!
//! Connections are in-memory, so these measure engine overhead only.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use meeting_mesh::peer::mock::MockConnectionFactory;
use meeting_mesh::peer::SessionDescription;
use meeting_mesh::signaling::{RecordingChannel, SignalingHandle};
use meeting_mesh::{InboundSignal, MeshConfig, PeerRegistry};
use std::sync::Arc;

fn registry(max_peers: usize) -> PeerRegistry {
    let config = MeshConfig::default()
        .with_room("bench")
        .with_local_id("self")
        .with_max_peers(max_peers);
    let signaling = SignalingHandle::new(Arc::new(RecordingChannel::new()), "bench");
    let (registry, _events) = PeerRegistry::new(&config, MockConnectionFactory::new(), signaling);
    registry
}

fn ids(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{}-{:02}", prefix, i)).collect()
}

// ============================================================================
// Registry
// ============================================================================

mod registry_bench {
    use super::*;

    pub fn bench_fill_to_limit(c: &mut Criterion) {
        let mut group = c.benchmark_group("registry_fill");
        let rt = tokio::runtime::Runtime::new().unwrap();

        for peer_count in [2, 6, 12].iter() {
            group.bench_with_input(
                BenchmarkId::new("add_peers", peer_count),
                peer_count,
                |b, &peer_count| {
                    let roster = ids("p", peer_count);
                    b.to_async(&rt).iter(|| async {
                        let registry = registry(peer_count);
                        for id in &roster {
                            black_box(registry.add_peer(id).await);
                        }
                        registry.clear().await;
                    });
                },
            );
        }

        group.finish();
    }

    pub fn bench_reconcile_churn(c: &mut Criterion) {
        let mut group = c.benchmark_group("registry_reconcile");
        let rt = tokio::runtime::Runtime::new().unwrap();

        // half the roster turns over on every reconciliation
        for peer_count in [4, 12].iter() {
            group.bench_with_input(
                BenchmarkId::new("half_turnover", peer_count),
                peer_count,
                |b, &peer_count| {
                    let stay = ids("stay", peer_count / 2);
                    let mut first = stay.clone();
                    first.extend(ids("a", peer_count / 2));
                    let mut second = stay;
                    second.extend(ids("b", peer_count / 2));

                    b.to_async(&rt).iter(|| async {
                        let registry = registry(peer_count);
                        registry.reconcile(&first).await;
                        registry.reconcile(&second).await;
                        black_box(registry.snapshot());
                    });
                },
            );
        }

        group.finish();
    }
}

// ============================================================================
// Negotiation
// ============================================================================

mod negotiation_bench {
    use super::*;

    pub fn bench_offer_to_answer(c: &mut Criterion) {
        let rt = tokio::runtime::Runtime::new().unwrap();

        c.bench_function("route_offer_to_answer", |b| {
            b.to_async(&rt).iter(|| async {
                let registry = registry(1);
                registry
                    .route_signal(InboundSignal::Offer {
                        from: "remote".to_string(),
                        sdp: SessionDescription::offer("v=0"),
                    })
                    .await;
                black_box(registry.len().await);
            });
        });
    }
}

criterion_group!(
    registry_benches,
    registry_bench::bench_fill_to_limit,
    registry_bench::bench_reconcile_churn,
);

criterion_group!(negotiation_benches, negotiation_bench::bench_offer_to_answer);

criterion_main!(registry_benches, negotiation_benches);
