use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use guarded::clock::ManualClock;
use guarded::domain::{GuardKey, OperationBinding};
use guarded::policy::{CircuitBreakerPolicy, RateLimitPolicy};
use guarded::state::{CircuitStatus, StateSummary};
use guarded::telemetry::MemorySink;
use guarded::{ConfigResolver, GuardDefinition, GuardError, GuardTable, Interceptor, PolicySpec};

const THREADS: usize = 16;

fn interceptor(guard: GuardDefinition, clock: &ManualClock, sink: &MemorySink) -> Interceptor {
    let id = guard.id.clone();
    let table = GuardTable::empty()
        .with_guard(guard)
        .with_operation("op", OperationBinding::new([id]));

    Interceptor::builder(Arc::new(ConfigResolver::new(table)))
        .clock(Arc::new(clock.clone()))
        .sink(Arc::new(sink.clone()))
        .build()
}

#[test]
fn concurrent_rate_limit_never_exceeds_limit() {
    let clock = ManualClock::new();
    let sink = MemorySink::new();
    let interceptor = interceptor(
        GuardDefinition::new(
            "rl",
            PolicySpec::RateLimit(RateLimitPolicy::new(25, Duration::from_secs(60))),
        ),
        &clock,
        &sink,
    );

    let admitted = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let interceptor = interceptor.clone();
            let admitted = admitted.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..10 {
                    let result: Result<(), GuardError<()>> = interceptor.guard("op", None, || {
                        admitted.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    });
                    let _ = result;
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(admitted.load(Ordering::SeqCst), 25);
    assert_eq!(sink.len(), THREADS * 10);
}

#[test]
fn concurrent_half_open_admits_one_probe() {
    let clock = ManualClock::new();
    let sink = MemorySink::new();
    let interceptor = interceptor(
        GuardDefinition::new(
            "cb",
            PolicySpec::CircuitBreaker(CircuitBreakerPolicy::new(1, Duration::from_secs(5))),
        ),
        &clock,
        &sink,
    );

    let failed: Result<(), GuardError<()>> = interceptor.guard("op", None, || Err(()));
    assert!(failed.is_err());
    clock.advance(Duration::from_secs(5));

    let probes = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    // Every admitted probe blocks until all threads have tried once
    let release = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let interceptor = interceptor.clone();
            let probes = probes.clone();
            let barrier = barrier.clone();
            let release = release.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut admitted = false;
                let result: Result<(), GuardError<()>> = interceptor.guard("op", None, || {
                    admitted = true;
                    probes.fetch_add(1, Ordering::SeqCst);
                    release.wait();
                    Ok(())
                });
                if !admitted {
                    assert!(result.unwrap_err().is_rejected());
                    release.wait();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(probes.load(Ordering::SeqCst), 1);
    assert_eq!(
        interceptor.store().snapshot(&GuardKey::global("cb")),
        Some(StateSummary::CircuitBreaker {
            status: CircuitStatus::Closed,
            consecutive_failures: 0,
            probe_in_flight: false,
        })
    );
}

#[test]
fn distinct_operations_do_not_interfere() {
    let clock = ManualClock::new();
    let table = GuardTable::empty()
        .with_guard(GuardDefinition::new(
            "a",
            PolicySpec::RateLimit(RateLimitPolicy::new(5, Duration::from_secs(60))),
        ))
        .with_guard(GuardDefinition::new(
            "b",
            PolicySpec::RateLimit(RateLimitPolicy::new(5, Duration::from_secs(60))),
        ))
        .with_operation("op-a", OperationBinding::new(["a"]))
        .with_operation("op-b", OperationBinding::new(["b"]));
    let interceptor = Interceptor::builder(Arc::new(ConfigResolver::new(table)))
        .clock(Arc::new(clock))
        .build();

    let handles: Vec<_> = ["op-a", "op-b"]
        .into_iter()
        .map(|operation| {
            let interceptor = interceptor.clone();
            thread::spawn(move || {
                (0..10)
                    .filter(|_| {
                        let result: Result<(), GuardError<()>> =
                            interceptor.guard(operation, None, || Ok(()));
                        result.is_ok()
                    })
                    .count()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 5);
    }
}
