// Datum and redeemer codec benchmarks.
//
// Covers encoding a creation datum, a copy-on-write update with a growing
// vote tally, and decoding the result back from hex.

use std::collections::BTreeMap;

use chrono::Utc;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use verity_governance::plutus::{CreateDatumRequest, DatumCodec, GovAction, Redeemer};
use verity_governance::proposal::{Proposal, ProposalOverrides, ProposalStatus};

fn pkh(i: usize) -> String {
    format!("{:056x}", i + 1)
}

fn proposal_with_votes(n: usize) -> Proposal {
    let now = Utc::now();
    Proposal {
        id: "bench-proposal".into(),
        owner_pkh: pkh(0),
        proposer_pkh: pkh(0),
        title: "Benchmark".into(),
        description: String::new(),
        discussion_url: String::new(),
        status: ProposalStatus::Voting,
        min_voting_tokens: 1_000,
        authorized_pkhs: (0..n + 1).map(|i| (pkh(i), 1)).collect(),
        vote_tally: (0..n).map(|i| (pkh(i), 10)).collect(),
        voting_start: 0,
        voting_end: 1,
        created_at: now,
        updated_at: now,
        transaction_hash: None,
        owner_address: None,
    }
}

fn bench_encode_create(c: &mut Criterion) {
    let codec = DatumCodec::new("https://verity.example/governance/proposal");
    let request = CreateDatumRequest {
        proposal_id: "bench-proposal".into(),
        proposer_pkh: pkh(0),
        owner_pkh: pkh(0),
        voting_start: 1_700_000_000_000,
        voting_end: 1_700_600_000_000,
        min_voting_tokens: 1_000,
        authorized_pkhs: (0..16).map(|i| (pkh(i), 1)).collect::<BTreeMap<_, _>>(),
    };

    c.bench_function("datum/encode_create_16_voters", |b| {
        b.iter(|| codec.encode_create(&request).unwrap().0.to_hex().unwrap());
    });
}

fn bench_encode_update(c: &mut Criterion) {
    let codec = DatumCodec::new("https://verity.example/governance/proposal");
    let mut group = c.benchmark_group("datum/encode_vote");

    for votes in [0usize, 16, 128] {
        let proposal = proposal_with_votes(votes);
        let overrides = ProposalOverrides {
            vote: Some((pkh(votes), 25)),
            ..ProposalOverrides::default()
        };
        group.throughput(Throughput::Elements(votes as u64 + 1));
        group.bench_with_input(BenchmarkId::from_parameter(votes), &votes, |b, _| {
            b.iter(|| codec.encode_update(&proposal, &overrides).unwrap().0.to_hex().unwrap());
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let codec = DatumCodec::new("https://verity.example/governance/proposal");
    let hex = codec
        .encode_update(&proposal_with_votes(128), &ProposalOverrides::default())
        .unwrap()
        .0
        .to_hex()
        .unwrap();

    c.bench_function("datum/decode_128_votes", |b| {
        b.iter(|| codec.decode(&hex).unwrap());
    });
}

fn bench_redeemer(c: &mut Criterion) {
    let action = GovAction::Vote {
        voter_pkh: pkh(3),
        amount: 250,
    };
    c.bench_function("redeemer/vote", |b| {
        b.iter(|| Redeemer::build(&action).unwrap().to_hex().unwrap());
    });
}

criterion_group!(benches, bench_encode_create, bench_encode_update, bench_decode, bench_redeemer);
criterion_main!(benches);
