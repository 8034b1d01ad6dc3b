//! Utility functions shared by the submission path and the CLI.
//!
//! - **URL validation**: keeps users from subscribing to non-HTTP URLs or
//!   to hosts on the service's own network

mod url_validator;

pub use url_validator::{validate_url, UrlValidationError};
