//! The [`Matcher`][crate::Matcher] type and its helpers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::raw::Raw;
use crate::subscriber::Subscriber;

/// A concurrent topic-subscription matcher.
///
/// This is the convenience layer over the lock-free [`Raw`] trie: subscribers register under
/// patterns made of words, literal or wildcard, and a lookup for a literal topic returns every
/// subscriber whose pattern matches it. All operations take `&self` and can be called from any
/// number of threads at once; none of them ever blocks on a lock.
///
/// Cloning the matcher is cheap and yields another handle to the *same* trie. For an
/// independent copy, take a [`snapshot`][Matcher::snapshot]: it is O(1), the two tries share
/// structure and copy lazily as they diverge.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
///
/// use crossbeam_utils::thread;
/// use matchtrie::Matcher;
///
/// let matcher: Matcher<String> = Matcher::amqp();
///
/// thread::scope(|s| {
///     s.spawn(|_| {
///         matcher.subscribe("price.stock.*", Arc::new("stocks".to_owned()));
///     });
///     s.spawn(|_| {
///         matcher.subscribe("price.#", Arc::new("prices".to_owned()));
///     });
/// })
/// .unwrap();
///
/// let found = matcher.subscribers("price.stock.acme");
/// assert_eq!(2, found.len());
/// ```
pub struct Matcher<S> {
    raw: Arc<Raw<S>>,
}

// Manual impl, the derive would ask for S: Clone.
impl<S> Clone for Matcher<S> {
    fn clone(&self) -> Self {
        Matcher {
            raw: Arc::clone(&self.raw),
        }
    }
}

impl<S: Subscriber> Matcher<S> {
    /// Creates an empty matcher with the given configuration.
    pub fn new(config: Config) -> Self {
        Matcher {
            raw: Arc::new(Raw::new(config)),
        }
    }

    /// Creates an empty matcher with the [AMQP configuration][Config::amqp].
    pub fn amqp() -> Self {
        Self::new(Config::amqp())
    }

    /// Subscribes the subscriber to a topic pattern.
    ///
    /// Subscribing an id that is already subscribed at the same pattern is a no-op and keeps
    /// the value registered first.
    ///
    /// # Panics
    ///
    /// On a read-only snapshot, or when the pattern is empty.
    pub fn subscribe(&self, pattern: &str, subscriber: Arc<S>) {
        self.raw.insert(pattern, subscriber);
    }

    /// Unsubscribes the subscriber (by id) from a topic pattern.
    ///
    /// Unsubscribing something that is not subscribed is a no-op.
    ///
    /// # Panics
    ///
    /// On a read-only snapshot, or when the pattern is empty.
    pub fn unsubscribe(&self, pattern: &str, subscriber: &S) {
        self.raw.remove(pattern, subscriber);
    }

    /// Returns the subscribers for a literal topic.
    ///
    /// The result is deduplicated by id and in no particular order; it is empty when nothing
    /// matches. Wildcards in the topic itself are not interpreted.
    ///
    /// # Panics
    ///
    /// When the topic is empty.
    pub fn subscribers(&self, topic: &str) -> Vec<Arc<S>> {
        self.raw.lookup(topic)
    }

    /// Takes a writable point-in-time snapshot of the matcher.
    ///
    /// O(1). Later changes on either handle are invisible to the other.
    ///
    /// # Panics
    ///
    /// On a read-only snapshot.
    pub fn snapshot(&self) -> Self {
        Matcher {
            raw: Arc::new(self.raw.snapshot()),
        }
    }

    /// Takes a read-only point-in-time snapshot of the matcher.
    ///
    /// The result refuses [`subscribe`][Matcher::subscribe] and
    /// [`unsubscribe`][Matcher::unsubscribe] by panicking. A read-only snapshot of a read-only
    /// snapshot is the snapshot itself.
    pub fn read_only_snapshot(&self) -> Self {
        if self.raw.is_read_only() {
            return self.clone();
        }
        Matcher {
            raw: Arc::new(self.raw.read_only_snapshot()),
        }
    }

    /// Returns a map of all patterns with at least one subscriber to their subscribers.
    ///
    /// Taken atomically, through a read-only snapshot.
    pub fn subscriptions(&self) -> HashMap<String, Vec<Arc<S>>> {
        self.read_only_snapshot().raw.subscriptions().into_iter().collect()
    }

    /// Returns all word paths currently present, whether or not subscribers sit on them.
    ///
    /// Taken atomically, through a read-only snapshot.
    pub fn topics(&self) -> Vec<String> {
        self.read_only_snapshot().raw.topics()
    }

    /// Whether this handle refuses mutations.
    pub fn is_read_only(&self) -> bool {
        self.raw.is_read_only()
    }

    /// Access to the configuration the matcher was built with.
    pub fn config(&self) -> &Config {
        self.raw.config()
    }
}

impl<S: Subscriber> Default for Matcher<S> {
    fn default() -> Self {
        Self::amqp()
    }
}
