//! Zone names and the route grammar.
//!
//! A zone name and a whole route string share one grammar: 1–60 characters
//! drawn from ASCII letters, the accented vowels `á é í ó ú ü` (both cases)
//! and the space character. Routes are split on spaces; every resulting
//! segment is revalidated before it becomes a [`ZoneName`].

use std::borrow::Borrow;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::errors::{BrokerError, Result};

/// Maximum length of a zone name or route string, in characters.
pub const MAX_ROUTE_CHARS: usize = 60;

static ROUTE_GRAMMAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-ZáéíóúÁÉÍÓÚüÜ ]{1,60}$").expect("route grammar regex is valid")
});

/// A validated zone name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ZoneName(String);

impl ZoneName {
    /// Validate `text` and wrap it.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if ROUTE_GRAMMAR.is_match(&text) {
            Ok(Self(text))
        } else {
            Err(BrokerError::InvalidRoute { input: text })
        }
    }

    /// Borrow the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZoneName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ZoneName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ZoneName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Validate a single zone name as received in an `ADD_OPEN`/`ADD_CLOSED`
/// command. Surrounding whitespace is trimmed first.
pub fn validate(text: &str) -> Result<ZoneName> {
    ZoneName::new(text.trim())
}

/// Validate a route string and split it into its zones, in order.
///
/// Runs of spaces produce empty segments, which are skipped. A route made
/// only of spaces is valid and yields an empty route.
pub fn parse_route(text: &str) -> Result<Vec<ZoneName>> {
    if !ROUTE_GRAMMAR.is_match(text) {
        return Err(BrokerError::InvalidRoute { input: text.into() });
    }
    text.split(' ')
        .filter(|segment| !segment.is_empty())
        .map(ZoneName::new)
        .collect()
}
