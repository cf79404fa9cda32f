use chrono::{Duration, Utc};
use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::Rng;
use std::hint::black_box;
use std::sync::Arc;
use vote_intake::{
    EventProcessor, InMemoryStore, VoteRequestedEvent,
    types::{Election, ElectionOption, Voter},
    validators::VoteValidator,
};

async fn seeded_store(voters: i64) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    let now = Utc::now();
    store
        .put_election(Election {
            id: 1,
            name: "Bench".to_string(),
            description: None,
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(1),
            created_at: now,
        })
        .await;
    for (id, label) in [(100, "Yes"), (101, "No")] {
        store
            .put_option(ElectionOption {
                id,
                election_id: 1,
                label: label.to_string(),
            })
            .await;
    }
    for id in 1..=voters {
        store
            .put_voter(Voter {
                id,
                email: format!("voter{id}@example.com"),
                full_name: format!("Voter {id}"),
                blocked: false,
                created_at: now,
            })
            .await;
    }
    store
}

/// Single-event processing paths
fn bench_process_outcomes(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("process_outcomes");

    // Fresh store each time so every event is a first vote
    group.bench_function("accepted", |b| {
        b.iter_batched(
            || {
                let store = rt.block_on(seeded_store(1));
                let processor = EventProcessor::new(store, VoteValidator::new());
                (processor, VoteRequestedEvent::new(1, 1, 100))
            },
            |(processor, event)| rt.block_on(processor.process(black_box(&event))),
            BatchSize::SmallInput,
        );
    });

    let store = rt.block_on(seeded_store(1));
    let processor = EventProcessor::new(store, VoteValidator::new());
    let event = VoteRequestedEvent::new(1, 1, 100);
    rt.block_on(processor.process(&event));

    // Ledger hit, nothing written
    group.bench_function("duplicate_event", |b| {
        b.to_async(&rt)
            .iter(|| async { processor.process(black_box(&event)).await })
    });

    // Ledger miss, vote uniqueness hit
    group.bench_function("duplicate_vote", |b| {
        b.to_async(&rt).iter(|| async {
            let event = VoteRequestedEvent::new(1, 1, 101);
            processor.process(black_box(&event)).await
        })
    });

    group.finish();
}

/// Concurrent processors contending on one store
fn bench_concurrent_processing(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("concurrent_processing");

    for tasks in [1usize, 4, 16] {
        group.bench_with_input(BenchmarkId::new("tasks", tasks), &tasks, |b, &tasks| {
            b.iter_batched(
                || {
                    let store = rt.block_on(seeded_store(256));
                    let mut rng = rand::thread_rng();
                    let choices: Vec<i64> = (0..=256)
                        .map(|_| if rng.gen_bool(0.5) { 100 } else { 101 })
                        .collect();
                    (EventProcessor::new(store, VoteValidator::new()), Arc::new(choices))
                },
                |(processor, choices)| {
                    rt.block_on(async {
                        let mut handles = Vec::with_capacity(tasks);
                        for task in 0..tasks {
                            let processor = processor.clone();
                            let choices = choices.clone();
                            handles.push(tokio::spawn(async move {
                                for voter_id in (task as i64 + 1..=256).step_by(tasks) {
                                    let option_id = choices[voter_id as usize];
                                    let event = VoteRequestedEvent::new(1, voter_id, option_id);
                                    processor.process(&event).await;
                                }
                            }));
                        }
                        for handle in handles {
                            handle.await.unwrap();
                        }
                    })
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_process_outcomes, bench_concurrent_processing);
criterion_main!(benches);
