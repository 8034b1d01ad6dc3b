mod feeds;
mod saved_items;
mod schema;
mod types;
mod users;

pub use schema::Database;
pub use types::{DatabaseError, FeedRecord, SavedItem};
