//! A concurrent pattern-matching trie for topic exchanges.
//!
//! Subscribers register under topic patterns ‒ sequences of words with optional single-word
//! (`*`) and zero-or-more-word (`#`) wildcards ‒ and lookups return every subscriber whose
//! pattern matches a literal topic. The backing data structure is a lock-free trie with
//! constant-time, lazily materialized snapshots, aimed at mostly-read workloads where many
//! threads look up concurrently with subscriptions coming and going.
//!
//! The easy entry point is the [`Matcher`] façade; the engine underneath lives in [`raw`] for
//! anyone who wants to build a different interface on top of it. The wildcard tokens and the
//! word delimiter are configurable through [`Config`], with [`Config::amqp`] providing the
//! AMQP-style defaults.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use matchtrie::Matcher;
//!
//! let matcher: Matcher<String> = Matcher::amqp();
//! matcher.subscribe("price.stock.*.acme", Arc::new("tech".to_owned()));
//! matcher.subscribe("price.#", Arc::new("audit".to_owned()));
//!
//! let found = matcher.subscribers("price.stock.nasdaq.acme");
//! assert_eq!(2, found.len());
//!
//! // Snapshots are O(1) and fully isolated from further changes.
//! let frozen = matcher.read_only_snapshot();
//! matcher.unsubscribe("price.#", &"audit".to_owned());
//! assert_eq!(1, matcher.subscribers("price.stock.nasdaq.acme").len());
//! assert_eq!(2, frozen.subscribers("price.stock.nasdaq.acme").len());
//! ```

pub mod config;
pub mod matcher;
pub mod raw;
mod subscriber;

pub use crate::config::{Config, ConfigError};
pub use crate::matcher::Matcher;
pub use crate::subscriber::Subscriber;

#[cfg(test)]
mod tests;
