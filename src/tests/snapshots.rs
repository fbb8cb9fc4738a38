//! Snapshot isolation, the read-only discipline and concurrent storms.

use std::sync::Arc;

use crossbeam_utils::thread;

use crate::Matcher;

fn sub(id: &str) -> Arc<String> {
    Arc::new(id.to_owned())
}

fn ids(found: Vec<Arc<String>>) -> Vec<String> {
    let mut ids: Vec<String> = found.iter().map(|sub| sub.as_ref().clone()).collect();
    ids.sort();
    ids
}

#[test]
fn snapshot_isolation() {
    let mb: Matcher<String> = Matcher::amqp();
    for i in 0..100 {
        mb.subscribe(&i.to_string(), sub("abc"));
    }
    for i in 0..100 {
        assert_eq!(vec!["abc"], ids(mb.subscribers(&i.to_string())));
    }
    assert!(mb.subscribers("blah").is_empty());

    let snapshot = mb.snapshot();
    for i in 0..100 {
        assert_eq!(vec!["abc"], ids(snapshot.subscribers(&i.to_string())));
    }
    assert!(snapshot.subscribers("blah").is_empty());

    // Modifying the snapshot doesn't affect the original.
    snapshot.unsubscribe("0", &"abc".to_owned());
    assert!(snapshot.subscribers("0").is_empty());
    assert_eq!(vec!["abc"], ids(mb.subscribers("0")));

    // Modifying the original doesn't affect the snapshot.
    mb.subscribe("foo", sub("abc"));
    assert_eq!(vec!["abc"], ids(mb.subscribers("foo")));
    assert!(snapshot.subscribers("foo").is_empty());

    // Snapshots of snapshots work the same.
    let snapshot2 = snapshot.snapshot();
    for i in 1..100 {
        assert_eq!(vec!["abc"], ids(snapshot2.subscribers(&i.to_string())));
    }
    snapshot2.subscribe("0", sub("abc"));
    assert_eq!(vec!["abc"], ids(snapshot2.subscribers("0")));
    assert!(snapshot.subscribers("0").is_empty());
}

#[test]
fn read_only_snapshot_frozen() {
    let mb: Matcher<String> = Matcher::amqp();
    mb.subscribe("a.b", sub("abc"));

    let frozen = mb.read_only_snapshot();
    assert!(frozen.is_read_only());
    assert!(!mb.is_read_only());

    mb.subscribe("a.c", sub("def"));
    mb.unsubscribe("a.b", &"abc".to_owned());

    assert_eq!(vec!["abc"], ids(frozen.subscribers("a.b")));
    assert!(frozen.subscribers("a.c").is_empty());

    // A read-only snapshot of a read-only snapshot is the snapshot itself.
    let again = frozen.read_only_snapshot();
    assert!(again.is_read_only());
    assert_eq!(vec!["abc"], ids(again.subscribers("a.b")));
}

#[test]
#[should_panic(expected = "Cannot modify a read-only snapshot")]
fn read_only_refuses_subscribe() {
    let mb: Matcher<String> = Matcher::amqp();
    mb.subscribe("a", sub("abc"));
    mb.read_only_snapshot().subscribe("b", sub("def"));
}

#[test]
#[should_panic(expected = "Cannot modify a read-only snapshot")]
fn read_only_refuses_unsubscribe() {
    let mb: Matcher<String> = Matcher::amqp();
    mb.subscribe("a", sub("abc"));
    mb.read_only_snapshot().unsubscribe("a", &"abc".to_owned());
}

#[test]
fn concurrent_insert_lookup_remove() {
    let mb: Matcher<String> = Matcher::amqp();

    thread::scope(|s| {
        s.spawn(|_| {
            for i in 0..1000 {
                mb.subscribe(&i.to_string(), sub(&i.to_string()));
            }
        });

        s.spawn(|_| {
            for i in 0..1000 {
                let found = mb.subscribers(&i.to_string());
                // A topic is only ever subscribed by the id spelled the same; anything else
                // would be a torn read.
                for one in found {
                    assert_eq!(i.to_string(), *one);
                }
            }
        });

        for i in 0..1000 {
            mb.unsubscribe(&i.to_string(), &i.to_string());
        }
    })
    .unwrap();
}

/// Writers on disjoint topics do not disturb each other; the final state only depends on the
/// per-topic operation sequence.
#[test]
fn concurrent_disjoint_writers() {
    let mb: Matcher<String> = Matcher::amqp();
    let threads = 4;
    let per_thread = 250;

    thread::scope(|s| {
        for t in 0..threads {
            let mb = mb.clone();
            s.spawn(move |_| {
                for i in 0..per_thread {
                    let topic = format!("{}.{}.{}", t, i % 10, i);
                    mb.subscribe(&topic, sub(&format!("{}-{}", t, i)));
                }
            });
        }
    })
    .unwrap();

    for t in 0..threads {
        for i in 0..per_thread {
            let topic = format!("{}.{}.{}", t, i % 10, i);
            assert_eq!(
                vec![format!("{}-{}", t, i)],
                ids(mb.subscribers(&topic)),
            );
        }
    }

    thread::scope(|s| {
        for t in 0..threads {
            let mb = mb.clone();
            s.spawn(move |_| {
                for i in 0..per_thread {
                    let topic = format!("{}.{}.{}", t, i % 10, i);
                    mb.unsubscribe(&topic, &format!("{}-{}", t, i));
                }
            });
        }
    })
    .unwrap();

    for t in 0..threads {
        for i in 0..per_thread {
            let topic = format!("{}.{}.{}", t, i % 10, i);
            assert!(mb.subscribers(&topic).is_empty());
        }
    }
}

/// Snapshots taken in the middle of a write storm are each internally consistent: once a
/// snapshot contains a key, no later removal on the original may take it away.
#[test]
fn snapshots_under_write_storm() {
    let mb: Matcher<String> = Matcher::amqp();

    thread::scope(|s| {
        let writer = mb.clone();
        s.spawn(move |_| {
            for i in 0..500 {
                writer.subscribe(&format!("storm.{}", i), sub("w"));
            }
        });

        let mut last_seen = 0;
        for _ in 0..50 {
            let snap = mb.read_only_snapshot();
            let seen = snap.subscriptions().len();
            // The snapshot itself is frozen...
            assert_eq!(seen, snap.subscriptions().len());
            // ...and successive snapshots only ever see the writer's progress grow.
            assert!(seen >= last_seen);
            last_seen = seen;
            // Reading them must never panic or loop, whatever the original does.
            let _ = snap.subscribers("storm.100");
        }
    })
    .unwrap();

    for i in 0..500 {
        assert_eq!(vec!["w"], ids(mb.subscribers(&format!("storm.{}", i))));
    }
}
