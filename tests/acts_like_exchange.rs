//! In these tests, we make sure the matcher behaves like a naive, obviously-correct exchange
//! in single threaded context, and sometimes in multithreaded too.
//!
//! To do that we simply generate a series of subscribes, unsubscribes and lookups and try them
//! on both implementations. They need to return the same things.
//!
//! The generated patterns keep the zero-or-more wildcard to the trailing position. In the
//! middle of a pattern its matching is defined by the trie's traversal order, which the naive
//! linear scan does not reproduce in some corners; those spellings are covered by the
//! deterministic scenario tests instead.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use matchtrie::Matcher;
use proptest::collection::vec;
use proptest::prelude::*;
use rayon::prelude::*;

/// The subscriber ids to play with. Small on purpose, to exercise collisions between patterns.
const IDS: &[&str] = &["s0", "s1", "s2", "s3"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Pattern(Vec<String>);

impl Pattern {
    fn joined(&self) -> String {
        self.0.join(".")
    }
}

#[derive(Debug, Clone)]
enum Instruction {
    Subscribe(Pattern, usize),
    Unsubscribe(Pattern, usize),
    Lookup(Vec<String>),
}

/// The reference semantics: does the pattern match the topic?
fn matches(pattern: &[String], topic: &[String]) -> bool {
    match pattern.first() {
        None => topic.is_empty(),
        Some(word) if word == "#" => {
            (0..=topic.len()).any(|eaten| matches(&pattern[1..], &topic[eaten..]))
        }
        Some(word) => match topic.first() {
            Some(first) if word == "*" || word == first => matches(&pattern[1..], &topic[1..]),
            _ => false,
        },
    }
}

/// The naive exchange: a flat set of subscriptions, looked up by linear scan.
#[derive(Default)]
struct Naive {
    subs: HashSet<(Vec<String>, String)>,
}

impl Naive {
    fn subscribe(&mut self, pattern: &Pattern, id: &str) {
        self.subs.insert((pattern.0.clone(), id.to_owned()));
    }

    fn unsubscribe(&mut self, pattern: &Pattern, id: &str) {
        self.subs.remove(&(pattern.0.clone(), id.to_owned()));
    }

    fn lookup(&self, topic: &[String]) -> BTreeSet<String> {
        self.subs
            .iter()
            .filter(|(pattern, _)| matches(pattern, topic))
            .map(|(_, id)| id.clone())
            .collect()
    }
}

fn word() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("a".to_owned()),
        Just("b".to_owned()),
        Just("c".to_owned()),
    ]
}

fn pattern_word() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("a".to_owned()),
        Just("b".to_owned()),
        Just("c".to_owned()),
        Just("*".to_owned()),
    ]
}

fn pattern() -> impl Strategy<Value = Pattern> {
    (vec(pattern_word(), 0..4), any::<bool>())
        .prop_filter("a pattern needs at least one word", |(body, trailing)| {
            !body.is_empty() || *trailing
        })
        .prop_map(|(mut body, trailing)| {
            if trailing {
                body.push("#".to_owned());
            }
            Pattern(body)
        })
}

fn topic() -> impl Strategy<Value = Vec<String>> {
    vec(word(), 1..6)
}

fn instruction() -> impl Strategy<Value = Instruction> {
    prop_oneof![
        (pattern(), any::<usize>()).prop_map(|(p, id)| Instruction::Subscribe(p, id)),
        (pattern(), any::<usize>()).prop_map(|(p, id)| Instruction::Unsubscribe(p, id)),
        topic().prop_map(Instruction::Lookup),
    ]
}

fn run(instructions: Vec<Instruction>) -> Result<(), TestCaseError> {
    let matcher: Matcher<String> = Matcher::amqp();
    let mut naive = Naive::default();
    for ins in instructions {
        match ins {
            Instruction::Subscribe(pattern, id) => {
                let id = IDS[id % IDS.len()];
                matcher.subscribe(&pattern.joined(), Arc::new(id.to_owned()));
                naive.subscribe(&pattern, id);
            }
            Instruction::Unsubscribe(pattern, id) => {
                let id = IDS[id % IDS.len()];
                matcher.unsubscribe(&pattern.joined(), &id.to_owned());
                naive.unsubscribe(&pattern, id);
            }
            Instruction::Lookup(topic) => {
                let expected = naive.lookup(&topic);
                let found: BTreeSet<String> = matcher
                    .subscribers(&topic.join("."))
                    .iter()
                    .map(|sub| sub.as_ref().clone())
                    .collect();
                prop_assert_eq!(expected, found, "lookup of {:?} diverged", topic);
            }
        }
    }

    Ok(())
}

proptest! {
    #[test]
    fn acts_like_naive_exchange(instructions in vec(instruction(), 1..400)) {
        run(instructions)?;
    }

    /// Lookups on a snapshot agree with the naive model frozen at the same point, whatever
    /// happens to the original afterwards.
    #[test]
    fn snapshot_acts_like_frozen_naive(
        before in vec(instruction(), 1..100),
        after in vec(instruction(), 1..100),
        probe in topic(),
    ) {
        let matcher: Matcher<String> = Matcher::amqp();
        let mut naive = Naive::default();
        for ins in before {
            match ins {
                Instruction::Subscribe(pattern, id) => {
                    let id = IDS[id % IDS.len()];
                    matcher.subscribe(&pattern.joined(), Arc::new(id.to_owned()));
                    naive.subscribe(&pattern, id);
                }
                Instruction::Unsubscribe(pattern, id) => {
                    let id = IDS[id % IDS.len()];
                    matcher.unsubscribe(&pattern.joined(), &id.to_owned());
                    naive.unsubscribe(&pattern, id);
                }
                Instruction::Lookup(_) => (),
            }
        }

        let snapshot = matcher.read_only_snapshot();
        // Only the original moves on.
        for ins in after {
            match ins {
                Instruction::Subscribe(pattern, id) => {
                    let id = IDS[id % IDS.len()];
                    matcher.subscribe(&pattern.joined(), Arc::new(id.to_owned()));
                }
                Instruction::Unsubscribe(pattern, id) => {
                    let id = IDS[id % IDS.len()];
                    matcher.unsubscribe(&pattern.joined(), &id.to_owned());
                }
                Instruction::Lookup(_) => (),
            }
        }

        let expected = naive.lookup(&probe);
        let found: BTreeSet<String> = snapshot
            .subscribers(&probe.join("."))
            .iter()
            .map(|sub| sub.as_ref().clone())
            .collect();
        prop_assert_eq!(expected, found, "snapshot lookup of {:?} diverged", probe);
    }

    #[test]
    fn subscribe_all_parallel(topics in vec(vec(word(), 1..4), 1..200)) {
        let set: HashSet<Vec<String>> = topics.iter().cloned().collect();
        let matcher: Matcher<String> = Matcher::amqp();
        topics.into_par_iter().for_each(|topic| {
            matcher.subscribe(&topic.join("."), Arc::new("w".to_owned()));
        });
        for topic in set {
            prop_assert!(!matcher.subscribers(&topic.join(".")).is_empty());
        }
    }
}
