//! Configuration of the word model: the delimiter and the two wildcards.

use smallvec::SmallVec;
use thiserror::Error;

/// Words of a single topic or pattern, as split out of the input string.
///
/// Topics are short in practice, so the words stay inline unless someone
/// feeds us something unusually deep.
pub(crate) type Words<'t> = SmallVec<[&'t str; 8]>;

const AMQP_DELIMITER: &str = ".";
const AMQP_SINGLE_WILDCARD: &str = "*";
const AMQP_ZERO_OR_MORE_WILDCARD: &str = "#";

/// An invalid combination of configuration tokens.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// One of the three tokens is the empty string.
    #[error("the {role} must not be empty")]
    EmptyToken {
        /// Which token was empty.
        role: &'static str,
    },
    /// Two of the three tokens are the same string.
    #[error("the {first} and the {second} must differ (both are `{token}`)")]
    TokenClash {
        first: &'static str,
        second: &'static str,
        /// The offending string.
        token: String,
    },
}

/// The word-level configuration of a trie.
///
/// The delimiter splits topics and patterns into words. The single wildcard
/// matches exactly one word at its position. The zero-or-more wildcard
/// matches any (possibly empty) run of consecutive words. With the
/// [AMQP tokens][Config::amqp], `foo.*.baz` matches `foo.bar.baz` and
/// `foo.qux.baz` but not `foo.baz`, while `foo.#.baz` matches all three.
///
/// Wildcards have meaning only on the subscription side. A topic passed to a
/// lookup is taken literally, word for word.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    delimiter: String,
    single_wildcard: String,
    zero_or_more_wildcard: String,
}

impl Config {
    /// Validates and creates a configuration.
    ///
    /// The three tokens must be non-empty and pairwise distinct.
    pub fn new<D, S, Z>(delimiter: D, single_wildcard: S, zero_or_more_wildcard: Z) -> Result<Self, ConfigError>
    where
        D: Into<String>,
        S: Into<String>,
        Z: Into<String>,
    {
        let config = Config {
            delimiter: delimiter.into(),
            single_wildcard: single_wildcard.into(),
            zero_or_more_wildcard: zero_or_more_wildcard.into(),
        };
        let named = [
            ("delimiter", &config.delimiter),
            ("single-word wildcard", &config.single_wildcard),
            ("zero-or-more wildcard", &config.zero_or_more_wildcard),
        ];
        for &(role, token) in &named {
            if token.is_empty() {
                return Err(ConfigError::EmptyToken { role });
            }
        }
        for (idx, &(first, token)) in named.iter().enumerate() {
            for &(second, other) in &named[idx + 1..] {
                if token == other {
                    return Err(ConfigError::TokenClash {
                        first,
                        second,
                        token: token.clone(),
                    });
                }
            }
        }
        Ok(config)
    }

    /// The configuration implementing AMQP topic matching.
    ///
    /// Words are delimited by `.`, single-word wildcards denoted by `*` and
    /// zero-or-more-word wildcards by `#`.
    pub fn amqp() -> Self {
        Config::new(AMQP_DELIMITER, AMQP_SINGLE_WILDCARD, AMQP_ZERO_OR_MORE_WILDCARD)
            .expect("The AMQP tokens are valid")
    }

    /// The word separator.
    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// The wildcard matching exactly one word.
    pub fn single_wildcard(&self) -> &str {
        &self.single_wildcard
    }

    /// The wildcard matching a possibly empty run of words.
    pub fn zero_or_more_wildcard(&self) -> &str {
        &self.zero_or_more_wildcard
    }

    /// Splits a topic or pattern into its words.
    ///
    /// The delimiter is a literal separator, so words themselves may come out
    /// empty (`"a..b"` contains the word `""`). An empty input has no word
    /// structure at all and is a caller bug.
    pub(crate) fn split<'t>(&self, topic: &'t str) -> Words<'t> {
        assert!(!topic.is_empty(), "Empty topic");
        topic.split(self.delimiter.as_str()).collect()
    }

    /// Collapses every maximal run of the zero-or-more wildcard into a single
    /// instance, e.g. `a.#.#.b` into `a.#.b`.
    ///
    /// Applied to subscription patterns only, never to lookup topics.
    pub(crate) fn reduce_zero_or_more<'t>(&self, words: Words<'t>) -> Words<'t> {
        let mut reduced = Words::with_capacity(words.len());
        for (idx, word) in words.iter().enumerate() {
            if *word == self.zero_or_more_wildcard
                && words.get(idx + 1).map_or(false, |next| *next == self.zero_or_more_wildcard)
            {
                continue;
            }
            reduced.push(word);
        }
        reduced
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::amqp()
    }
}
