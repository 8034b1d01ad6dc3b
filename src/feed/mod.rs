//! Feed retrieval and parsing.
//!
//! - [`source`] - the [`Source`] and [`Item`] values the rest of the service works with
//! - [`parser`] - raw bytes to [`Source`] via the `feed-rs` crate
//! - [`fetcher`] - the [`Fetcher`] strategy and its `reqwest` implementation
//!
//! Fetching and parsing are kept apart: the refresh engine asks a
//! [`Fetcher`] for bytes and hands them to [`parse_source`], so either side
//! can be replaced in tests.

mod fetcher;
mod parser;
mod source;

pub use fetcher::{FetchError, Fetcher, HttpFetcher};
pub use parser::{parse_source, ParseError};
pub use source::{Item, Source};
