// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

fn stamp(v: f64) -> Stamp {
    Stamp(v)
}

#[test]
fn resident_count_never_exceeds_capacity() {
    let mut r: BoundedEventReservoir<u32> = BoundedEventReservoir::new(10);
    let mut rng = StdRng::seed_from_u64(1);
    for i in 0..10_000u32 {
        r.add_sampled(i, &mut rng);
        assert!(r.resident_count() <= 10);
    }
    assert_eq!(r.resident_count(), 10);
    assert_eq!(r.events_seen(), 10_000);
}

#[test]
fn admits_while_under_capacity_in_insertion_order() {
    let mut r: BoundedEventReservoir<&str> = BoundedEventReservoir::new(3);
    r.add(stamp(0.5), "a");
    r.add(stamp(0.1), "b");
    assert_eq!(r.resident_count(), 2);
    let v = r.serialize("run");
    assert_eq!(v[2], serde_json::json!(["a", "b"]));
}

#[test]
fn full_reservoir_evicts_strict_minimum_only() {
    let mut r: BoundedEventReservoir<&str> = BoundedEventReservoir::new(2);
    r.add(stamp(0.2), "low");
    r.add(stamp(0.8), "high");
    assert_eq!(r.resident_count(), 2);

    // Equal to current min: must NOT be admitted (strictly greater required).
    r.add(stamp(0.2), "tie");
    assert_eq!(r.resident_count(), 2);
    let v = r.serialize("run");
    let arr = v[2].as_array().unwrap();
    assert!(arr.iter().any(|p| p == "low"));
    assert!(!arr.iter().any(|p| p == "tie"));

    // Strictly greater than current min (0.2): admitted, "low" evicted.
    r.add(stamp(0.5), "mid");
    let v = r.serialize("run");
    let arr = v[2].as_array().unwrap();
    assert!(!arr.iter().any(|p| p == "low"));
    assert!(arr.iter().any(|p| p == "mid"));
    assert!(arr.iter().any(|p| p == "high"));
}

#[test]
fn serialize_shape_and_empty_case() {
    let empty: BoundedEventReservoir<u32> = BoundedEventReservoir::new(10_000);
    let v = empty.serialize("one");
    assert_eq!(
        v,
        serde_json::json!(["one", { "reservoir_size": 10_000, "events_seen": 0 }, []])
    );

    let mut r: BoundedEventReservoir<serde_json::Value> = BoundedEventReservoir::new(10_000);
    r.add(stamp(0.4), serde_json::json!({"x": 1}));
    let v = r.serialize("one");
    assert_eq!(
        v,
        serde_json::json!([
            "one",
            { "reservoir_size": 10_000, "events_seen": 1 },
            [{"x": 1}],
        ])
    );
}

#[test]
fn merge_sums_seen_without_per_event_increment() {
    let mut a: BoundedEventReservoir<&str> = BoundedEventReservoir::new(5);
    a.add(stamp(0.1), "a1");
    a.add(stamp(0.2), "a2");

    let mut b: BoundedEventReservoir<&str> = BoundedEventReservoir::new(5);
    b.add(stamp(0.3), "b1");

    a.merge(b);
    assert_eq!(a.events_seen(), 3);
    assert_eq!(a.resident_count(), 3);
}

#[test]
fn merge_equivalence_partitioned_stream_matches_single_stream() {
    // Deterministic stamps so the union-vs-merge outcome is checkable exactly.
    let stamps = [0.9, 0.1, 0.5, 0.95, 0.2, 0.05, 0.8, 0.99, 0.01, 0.6];

    let mut combined: BoundedEventReservoir<usize> = BoundedEventReservoir::new(4);
    for (i, &s) in stamps.iter().enumerate() {
        combined.add(stamp(s), i);
    }

    let mut a: BoundedEventReservoir<usize> = BoundedEventReservoir::new(4);
    let mut b: BoundedEventReservoir<usize> = BoundedEventReservoir::new(4);
    for (i, &s) in stamps.iter().enumerate() {
        if i % 2 == 0 {
            a.add(stamp(s), i);
        } else {
            b.add(stamp(s), i);
        }
    }
    a.merge(b);

    assert_eq!(a.events_seen(), combined.events_seen());
    assert_eq!(a.resident_count(), combined.resident_count());

    let mut combined_ids: Vec<usize> =
        combined.serialize("r")[2].as_array().unwrap().iter().map(|v| v.as_u64().unwrap() as usize).collect();
    let mut merged_ids: Vec<usize> =
        a.serialize("r")[2].as_array().unwrap().iter().map(|v| v.as_u64().unwrap() as usize).collect();
    combined_ids.sort_unstable();
    merged_ids.sort_unstable();
    assert_eq!(combined_ids, merged_ids);
}

#[test]
fn retry_cap_discards_poison_pill_and_resets_failed_to_zero() {
    let mut successor: BoundedEventReservoir<&str> =
        BoundedEventReservoir::with_retry_limit(10, 2);

    let mut stale: BoundedEventReservoir<&str> = BoundedEventReservoir::with_retry_limit(10, 2);
    stale.add(stamp(0.5), "stale-event");
    // Force stale's own failed count to the retry limit.
    stale.failed = 2;

    successor.merge_failed(stale);

    assert_eq!(successor.resident_count(), 0);
    assert_eq!(successor.failed_count(), 0);
}

#[test]
fn merge_failed_under_limit_carries_data_and_increments_failed_count() {
    let mut successor: BoundedEventReservoir<&str> =
        BoundedEventReservoir::with_retry_limit(10, 3);

    let mut stale: BoundedEventReservoir<&str> = BoundedEventReservoir::with_retry_limit(10, 3);
    stale.add(stamp(0.5), "retry-me");
    stale.failed = 1;

    successor.merge_failed(stale);

    assert_eq!(successor.resident_count(), 1);
    assert_eq!(successor.failed_count(), 2);
    assert_eq!(successor.events_seen(), 1);
}

#[test]
fn synthetics_priority_events_always_survive_a_full_reservoir() {
    let mut r: BoundedEventReservoir<&str> = BoundedEventReservoir::new(5);
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..5 {
        r.add(Stamp::ordinary(&mut rng), "ordinary");
    }
    assert_eq!(r.resident_count(), 5);

    for _ in 0..2 {
        r.add(Stamp::priority(&mut rng), "synthetic");
    }

    let v = r.serialize("run");
    let arr = v[2].as_array().unwrap();
    let synthetic_count = arr.iter().filter(|p| *p == "synthetic").count();
    assert_eq!(synthetic_count, 2);
}

#[test]
fn sampling_fairness_within_tolerance() {
    // §8 property 2: after n inserts into capacity k, any single insertion's
    // survival probability is k/n. Monte Carlo with a fixed seed and a wide
    // tolerance band (many standard errors) keeps this deterministic in CI.
    let n = 50usize;
    let k = 5usize;
    let trials = 4000u32;
    let mut rng = StdRng::seed_from_u64(42);
    let mut survived = 0u32;

    for _ in 0..trials {
        let mut r: BoundedEventReservoir<u32> = BoundedEventReservoir::new(k);
        let marked_stamp = Stamp::ordinary(&mut rng);
        r.add(marked_stamp, u32::MAX);
        for i in 1..n as u32 {
            r.add(Stamp::ordinary(&mut rng), i);
        }
        let present = match &r.storage {
            Storage::Full(h) => h.iter().any(|Reverse(e)| e.payload == u32::MAX),
            Storage::Unfilled(v) => v.iter().any(|e| e.payload == u32::MAX),
        };
        if present {
            survived += 1;
        }
    }

    let observed = f64::from(survived) / f64::from(trials);
    let expected = k as f64 / n as f64;
    assert!(
        (observed - expected).abs() < 0.05,
        "observed survival {observed} too far from expected {expected}"
    );
}
