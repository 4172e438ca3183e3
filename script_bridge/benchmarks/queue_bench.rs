use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use script_bridge::{Generation, LockedQueue, Message, NotifyingQueue};

fn bench_queues(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");

    for count in [16usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::new("locked_send_drain", count), &count, |b, &count| {
            b.iter_batched(
                LockedQueue::<Message>::new,
                |queue| {
                    for index in 0..count {
                        queue.send(Message::ConsoleText {
                            text: index.to_string(),
                        });
                    }
                    while queue.recv().is_some() {}
                },
                BatchSize::SmallInput,
            )
        });

        group.bench_with_input(
            BenchmarkId::new("notifying_send_wait_drain", count),
            &count,
            |b, &count| {
                b.iter_batched(
                    NotifyingQueue::<Message>::new,
                    |queue| {
                        for _ in 0..count {
                            queue.send(Message::Start);
                        }
                        queue.wait(Generation::INITIAL);
                        while queue.recv().is_some() {}
                    },
                    BatchSize::SmallInput,
                )
            },
        );
    }

    group.finish();
}

criterion_group!(queue_benches, bench_queues);
criterion_main!(queue_benches);
