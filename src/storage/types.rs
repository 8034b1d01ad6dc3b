use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("The database is locked by another process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Operation referenced a user that does not exist
    #[error("User '{0}' does not exist")]
    UnknownUser(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

// SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Data Structures
// ============================================================================

/// A persisted feed row.
///
/// The database only tracks which URLs exist and their last fetch error;
/// feed contents live in the in-memory cache.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FeedRecord {
    pub id: i64,
    pub url: String,
    pub fetch_error: Option<String>,
}

/// An item a user bookmarked.
///
/// Copies the item's link and title at save time, so a save outlives the
/// item dropping out of its feed.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SavedItem {
    pub id: i64,
    pub item_url: String,
    pub item_title: String,
    /// Link to an archived copy; nothing fills this in yet.
    pub archive_url: Option<String>,
    /// Unix timestamp (seconds).
    pub created_at: i64,
}
