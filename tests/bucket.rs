use dripgate::bucket::{Bucket, BucketSettings, LeakyBucket};
use dripgate::clock::{Clock, ManualClock};
use proptest::prelude::*;
use std::sync::Arc;

const NOW: f64 = 1_700_000_000.0;

fn bucket_at(clock: &ManualClock, max: u64, rate: f64) -> LeakyBucket {
    LeakyBucket::new("property", max, rate).with_clock(Arc::new(clock.clone()))
}

proptest! {
    #[test]
    fn leak_never_increases_drips(
        max in 0u64..10_000,
        fill in 0u64..10_000,
        rate in 0.0f64..1_000.0,
        elapsed in 0.0f64..100_000.0,
    ) {
        let clock = ManualClock::new(NOW);
        let mut bucket = bucket_at(&clock, max, rate);
        bucket.configure(BucketSettings::new().drips(fill.min(max)));
        let before = bucket.drips();

        clock.advance(elapsed);
        bucket.leak(None);

        prop_assert!(bucket.drips() <= before);
        prop_assert!(bucket.drips() <= bucket.max());
        prop_assert!(bucket.timer() <= clock.now());
    }

    #[test]
    fn fill_then_zero_rate_leak_keeps_level(max in 0u64..1_000, amount in -100i64..2_000) {
        let clock = ManualClock::new(NOW);
        let mut bucket = bucket_at(&clock, max, 1.0);
        bucket.fill(amount);
        let level = bucket.drips();

        clock.advance(60.0);
        bucket.leak(Some(0.0));

        prop_assert_eq!(bucket.drips(), level);
        prop_assert_eq!(bucket.timer(), clock.now());
    }

    #[test]
    fn reset_always_empties(max in 0u64..1_000, amount in 0i64..2_000) {
        let clock = ManualClock::new(NOW);
        let mut bucket = bucket_at(&clock, max, 2.0);
        bucket.fill(amount);
        bucket.reset();
        prop_assert_eq!(bucket.drips(), 0);
        prop_assert!(bucket.is_empty());
    }
}

#[test]
fn basic_leak_scenario() {
    let clock = ManualClock::new(NOW);
    let mut bucket = bucket_at(&clock, 60, 1.0);
    bucket.configure(BucketSettings::new().drips(60).timer(NOW - 10.0));

    bucket.leak(None);

    assert_eq!(bucket.drips(), 50);
    assert_eq!(bucket.timer(), NOW);
}

#[test]
fn fill_saturates_instead_of_failing() {
    let clock = ManualClock::new(NOW);
    let mut bucket = bucket_at(&clock, 60, 1.0);
    bucket.fill(1000);
    assert_eq!(bucket.drips(), 60);
    assert!(bucket.is_full());
}

#[test]
fn configure_from_state_reconstructs_bucket() {
    let clock = ManualClock::new(NOW);
    let mut original = bucket_at(&clock, 25, 0.25);
    original.fill(9);
    clock.advance(3.0);

    let mut copy = LeakyBucket::new(original.key(), 1, 1.0).with_clock(Arc::new(clock.clone()));
    copy.configure(original.to_state().into());

    assert_eq!(copy.to_state(), original.to_state());
}

#[test]
fn json_form_uses_documented_fields() {
    let clock = ManualClock::new(NOW);
    let mut bucket = bucket_at(&clock, 60, 1.5);
    bucket.fill(2);

    let value: serde_json::Value = serde_json::from_str(&bucket.to_json().unwrap()).unwrap();
    assert_eq!(
        value,
        serde_json::json!({
            "key": "property",
            "max": 60,
            "rate": 1.5,
            "drips": 2,
            "timer": NOW,
        })
    );

    let back = LeakyBucket::from_json(&value.to_string(), Arc::new(clock)).unwrap();
    assert_eq!(back.to_state(), bucket.to_state());
}

#[test]
fn many_small_leaks_recover_like_one_large_leak() {
    let clock = ManualClock::new(NOW);
    let mut stepped = bucket_at(&clock, 100, 1.0);
    stepped.fill(100);
    for _ in 0..40 {
        clock.advance(0.25);
        stepped.leak(None);
    }
    assert_eq!(stepped.drips(), 90);
}

#[test]
fn timer_keeps_unconverted_time_across_fills() {
    let clock = ManualClock::new(NOW);
    let mut bucket = bucket_at(&clock, 10, 2.0);
    bucket.fill(10);

    clock.advance(1.3);
    bucket.leak(None);
    assert_eq!(bucket.drips(), 8);
    assert!((bucket.timer() - (NOW + 1.0)).abs() < 1e-6);

    bucket.fill(1);
    assert!((bucket.timer() - (NOW + 1.0)).abs() < 1e-6);

    clock.advance(0.2);
    bucket.leak(None);
    assert_eq!(bucket.drips(), 8);
}
