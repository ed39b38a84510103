//! Benchmarks for pair decisions.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use promoflow::core::{
    Digest, DigestRecord, Environment, PromotionPair, PromotionRequest, RequestStatus, Source,
};
use promoflow::machine::{decide, PairSnapshot};

fn digest(n: usize) -> Digest {
    Digest::parse(&format!("sha256:{n:064x}")).unwrap()
}

fn snapshot(history: usize) -> PairSnapshot {
    let pair = PromotionPair::into_target(Environment::Prod).unwrap();
    let requests = (0..history)
        .map(|n| {
            let mut request = PromotionRequest::new(pair, digest(n));
            request.status = if n + 1 == history {
                RequestStatus::Pending
            } else {
                RequestStatus::Superseded
            };
            request
        })
        .collect();

    PairSnapshot {
        pair,
        from: Some(DigestRecord::new(
            Environment::Stage,
            digest(history),
            Source::Promoted(Environment::Dev),
            history as u64,
        )),
        to: Some(DigestRecord::new(
            Environment::Prod,
            digest(0),
            Source::Promoted(Environment::Stage),
            1,
        )),
        requests,
    }
}

fn decision_benchmark(c: &mut Criterion) {
    let fresh = snapshot(1);
    c.bench_function("decide_fresh_candidate", |b| {
        b.iter(|| decide(black_box(&fresh)))
    });

    let long = snapshot(1_000);
    c.bench_function("decide_long_history", |b| {
        b.iter(|| decide(black_box(&long)))
    });
}

criterion_group!(benches, decision_benchmark);
criterion_main!(benches);
