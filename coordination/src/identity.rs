//! Identifier validation for the shared store namespace.
//!
//! Every coordinator/agent identifier ends up embedded in store keys
//! (`coordination:heartbeat:{id}`, ...), so hostile input could escape its
//! key scope. All identifiers are checked against a restrictive pattern
//! before any store I/O happens.

use std::sync::LazyLock;

use regex::Regex;

/// Maximum accepted identifier length.
pub const MAX_IDENTIFIER_LEN: usize = 64;

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("identifier regex is valid"));

/// Error type for identifier validation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    #[error("identifier {id:?} is invalid: must match [A-Za-z0-9_-] and be 1-64 chars")]
    InvalidIdentifier { id: String },
}

/// Validate an identifier before it is used to build a store key.
///
/// Rejects empty strings, over-long strings, and anything containing
/// characters outside `[A-Za-z0-9_-]` (notably `:` and `*`, which carry
/// meaning in the key namespace and scan patterns).
pub fn validate_identifier(id: &str) -> Result<(), ValidationError> {
    if IDENTIFIER_RE.is_match(id) {
        Ok(())
    } else {
        Err(ValidationError::InvalidIdentifier { id: id.to_string() })
    }
}
