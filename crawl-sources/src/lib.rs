//! Content sources for crawlavator
//!
//! - Shared HTTP client with retries and streaming downloads
//! - RSS/Atom parsing
//! - Public feed sources and the private feed registry

pub mod error;
pub mod client;
pub mod feed;
pub mod rss;
pub mod private_feeds;
pub mod catalog;

pub use error::{FeedError, Result};
pub use client::{DownloadedFile, HttpClient, HttpOptions};
pub use feed::{parse_feed, Enclosure, FeedEntry, FeedKind, ParsedFeed};
pub use rss::{FeedSourceConfig, RssFeedSource};
pub use private_feeds::{PrivateFeed, PrivateFeedRegistry, PrivateFeedsSource, PRIVATE_SOURCE_ID};
pub use catalog::build_registry;

#[cfg(test)]
mod test_server;
