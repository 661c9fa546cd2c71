use dripgate::bucket::{Bucket, BucketSettings, EventedBucket, LeakyBucket};
use dripgate::clock::ManualClock;
use dripgate::telemetry::{BucketEvent, DispatchMode, ListenerDispatcher, MemoryDispatcher};
use std::sync::{Arc, Mutex};

fn inner(clock: &ManualClock, max: u64) -> LeakyBucket {
    LeakyBucket::new("evented", max, 1.0).with_clock(Arc::new(clock.clone()))
}

#[test]
fn filling_precedes_mutation_and_filled_follows_it() {
    let clock = ManualClock::new(500.0);
    let observed: Arc<Mutex<Vec<(String, u64)>>> = Arc::new(Mutex::new(Vec::new()));

    // Listeners only see the event, so record the event order and the level it reports.
    let log = observed.clone();
    let dispatcher = ListenerDispatcher::new().with_listener(move |event| {
        let level = match event {
            BucketEvent::Filled { drips, .. } => *drips,
            _ => u64::MAX,
        };
        log.lock().unwrap().push((event.name().to_string(), level));
        None
    });

    let mut bucket = EventedBucket::new(inner(&clock, 60), dispatcher);
    bucket.configure(BucketSettings::new().drips(10));
    bucket.fill(5);

    let observed = observed.lock().unwrap().clone();
    assert_eq!(observed, vec![("Filling".to_string(), u64::MAX), ("Filled".to_string(), 15)]);
    assert_eq!(bucket.drips(), 15);
}

#[test]
fn filled_remaining_matches_bucket() {
    let clock = ManualClock::new(500.0);
    let mut bucket = EventedBucket::new(inner(&clock, 60), MemoryDispatcher::new());
    bucket.fill(42);

    let records = bucket.dispatcher().records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], (DispatchMode::Until, BucketEvent::Filling { key: "evented".into(), drips: 42 }));
    match &records[1] {
        (DispatchMode::Dispatch, BucketEvent::Filled { drips, remaining, .. }) => {
            assert_eq!(*drips, bucket.drips());
            assert_eq!(*remaining, bucket.max() - bucket.drips());
        }
        other => panic!("unexpected record {other:?}"),
    }
}

#[test]
fn leak_reports_leaked_amount() {
    let clock = ManualClock::new(500.0);
    let mut bucket = EventedBucket::new(inner(&clock, 60), MemoryDispatcher::new());
    bucket.configure(BucketSettings::new().drips(60).timer(490.0));

    bucket.leak(None);

    assert_eq!(
        bucket.dispatcher().events(),
        vec![
            BucketEvent::Leaking { key: "evented".into(), rate: 1.0 },
            BucketEvent::Leaked { key: "evented".into(), drips: 10, remaining: 10 },
        ]
    );
}

#[test]
fn pre_action_events_dispatch_without_listeners() {
    let clock = ManualClock::new(500.0);
    let dispatcher = ListenerDispatcher::new();
    let mut bucket = EventedBucket::new(inner(&clock, 3), dispatcher);
    bucket.fill(1).leak(None).fill(1);
    assert_eq!(bucket.drips(), 2);
}

#[test]
fn shared_dispatcher_sees_events_from_many_buckets() {
    let clock = ManualClock::new(500.0);
    let dispatcher = Arc::new(MemoryDispatcher::new());

    let mut a = EventedBucket::new(
        LeakyBucket::new("a", 5, 1.0).with_clock(Arc::new(clock.clone())),
        dispatcher.clone(),
    );
    let mut b = EventedBucket::new(
        LeakyBucket::new("b", 5, 1.0).with_clock(Arc::new(clock.clone())),
        dispatcher.clone(),
    );
    a.fill(1);
    b.fill(2);

    let keys: Vec<String> = dispatcher.events().iter().map(|e| e.key().to_string()).collect();
    assert_eq!(keys, vec!["a", "a", "b", "b"]);
}
