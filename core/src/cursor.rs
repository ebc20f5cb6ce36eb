//! Read-position tokens and read-model identifiers.
//!
//! This module defines strong types for the opaque progress token handed out by
//! an event source (`Cursor`) and for the name a read model is registered under
//! (`ReadModelName`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for `ReadModelName` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid read model name: {0}")]
pub struct ParseReadModelNameError(String);

/// Opaque, totally ordered read position in an event stream.
///
/// A cursor is produced only by [`EventSource::get_next_cursor`]; the engine
/// stores it in the ledger and hands it back on the next load, but never
/// inspects or synthesizes one itself.
///
/// The null cursor ([`Cursor::beginning`]) means "from the start of the stream".
///
/// # Examples
///
/// ```
/// use readmodel_core::cursor::Cursor;
///
/// let start = Cursor::beginning();
/// assert!(start.is_beginning());
///
/// let later = Cursor::new("eyJvZmZzZXQiOjQyfQ==");
/// assert_eq!(later.as_token(), Some("eyJvZmZzZXQiOjQyfQ=="));
/// ```
///
/// [`EventSource::get_next_cursor`]: crate::event_source::EventSource::get_next_cursor
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(Option<String>);

impl Cursor {
    /// Cursor positioned before the first event.
    #[must_use]
    pub const fn beginning() -> Self {
        Self(None)
    }

    /// Wrap a token produced by an event source.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// Whether this cursor points at the start of the stream.
    #[must_use]
    pub const fn is_beginning(&self) -> bool {
        self.0.is_none()
    }

    /// Borrow the raw token, `None` for the beginning.
    #[must_use]
    pub fn as_token(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Consume the cursor and return the raw token.
    #[must_use]
    pub fn into_token(self) -> Option<String> {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(token) => write!(f, "{token}"),
            None => write!(f, "<beginning>"),
        }
    }
}

impl From<Option<String>> for Cursor {
    fn from(token: Option<String>) -> Self {
        Self(token)
    }
}

/// Name a read model (event subscriber) is registered under.
///
/// Every ledger, property scope and store scope is keyed by this name.
///
/// # Validation
///
/// - `FromStr::from_str()`: rejects empty names
/// - `From::from()` and `new()`: no validation (trusted, application-controlled input)
///
/// # Examples
///
/// ```
/// use readmodel_core::cursor::ReadModelName;
///
/// let name: ReadModelName = "notes".parse().unwrap();
/// assert_eq!(name.as_str(), "notes");
/// assert!("".parse::<ReadModelName>().is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadModelName(String);

impl ReadModelName {
    /// Create a new name without validation.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReadModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReadModelName {
    type Err = ParseReadModelNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ParseReadModelNameError(
                "Read model name cannot be empty".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for ReadModelName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ReadModelName {
    fn from(s: String) -> Self {
        Self(s)
    }
}
