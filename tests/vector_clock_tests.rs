//! Vector clock ordering guarantees.

use fractal_mesh::cluster::{ClockSnapshot, VectorClock, WorkStation};

fn a() -> WorkStation {
    WorkStation::new("10.0.0.1", 5000)
}

fn b() -> WorkStation {
    WorkStation::new("10.0.0.2", 5000)
}

fn c() -> WorkStation {
    WorkStation::new("10.0.0.3", 5000)
}

#[test]
fn test_absorb_takes_maximum_and_ignores_unknown_peers() {
    let mut clock = VectorClock::new(a(), [b()]);
    clock.increment();
    clock.increment();
    let received = ClockSnapshot::from_entries([(b(), 1)]);
    clock.absorb(&received);
    assert_eq!(clock.get(&a()), Some(2));
    assert_eq!(clock.get(&b()), Some(1));

    let received = ClockSnapshot::from_entries([(a(), 1), (b(), 5), (c(), 9)]);
    clock.absorb(&received);

    assert_eq!(clock.get(&a()), Some(2), "local counter was already higher");
    assert_eq!(clock.get(&b()), Some(5), "remote counter raised");
    assert_eq!(clock.get(&c()), None, "unknown peer not added");
}

#[test]
fn test_merge_is_followed_by_increment() {
    let mut clock = VectorClock::new(a(), [b()]);
    clock.increment();
    clock.increment();

    clock.merge(&ClockSnapshot::from_entries([(a(), 1), (b(), 5), (c(), 9)]));

    let snapshot = clock.snapshot();
    assert_eq!(snapshot.get(&a()), Some(3));
    assert_eq!(snapshot.get(&b()), Some(5));
    assert_eq!(snapshot.len(), 2);
}

#[test]
fn test_counters_never_decrease() {
    let mut clock = VectorClock::new(a(), [b(), c()]);
    let mut previous = clock.snapshot();

    let inputs = [
        vec![(b(), 3)],
        vec![(b(), 1), (c(), 2)],
        vec![(a(), 10)],
        vec![(c(), 0)],
        vec![],
    ];
    for (round, input) in inputs.into_iter().enumerate() {
        if round % 2 == 0 {
            clock.increment();
        }
        clock.merge(&ClockSnapshot::from_entries(input));
        let current = clock.snapshot();
        for (station, before) in previous.iter() {
            let after = current.get(station).unwrap();
            assert!(after >= before, "{} went from {} to {}", station, before, after);
        }
        previous = current;
    }
}

#[test]
fn test_tracking_peer_keeps_existing_counters() {
    let mut clock = VectorClock::new(a(), []);
    clock.increment();
    clock.track(b());
    clock.track(a());
    assert_eq!(clock.get(&a()), Some(1));
    assert_eq!(clock.get(&b()), Some(0));
}

#[test]
fn test_snapshot_renders_in_stable_order() {
    let mut clock = VectorClock::new(b(), [c(), a()]);
    clock.increment();
    clock.merge(&ClockSnapshot::from_entries([(c(), 7)]));
    assert_eq!(clock.snapshot().to_string(), "0 [2] 7");
}
