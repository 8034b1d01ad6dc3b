//! feedreaper: a personal feed-reading service that keeps every subscribed
//! RSS/Atom feed fresh in memory.
//!
//! The [`reaper::Reaper`] is the core: it seeds a cache of sources from
//! [`storage::Database`], refreshes stale ones on a fixed interval with a
//! pool of concurrent workers, and serves per-user views from memory.

pub mod config;
pub mod feed;
pub mod reaper;
pub mod storage;
pub mod util;
