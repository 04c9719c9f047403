//! Best-effort peer tagging for free-text trace lines.
//!
//! Low-level SHIP/SPINE trace output arrives through the engine's logging
//! hook without any peer parameter.  To let observers filter the log by
//! device anyway, each line is scanned for something that looks like a SKI:
//!
//! 1. If any currently registered SKI occurs in the line, that SKI wins.
//!    When several occur, the longest one is chosen.
//! 2. Otherwise every word is checked for a bare hex token of exactly
//!    [`SKI_HEX_LEN`] digits (a SHA-1 key identifier).
//!
//! This is advisory only.  A miss just leaves the line untagged.  A line that
//! happens to contain another peer's SKI inside unrelated data will be
//! tagged with that peer; that limitation is known and accepted.

use super::peer::PeerId;

/// Length of a SKI rendered as hex (20 bytes of SHA-1).
pub const SKI_HEX_LEN: usize = 40;

/// Characters that separate words besides whitespace, e.g. `ski=...` or
/// `"remote":"..."`.
fn is_separator(c: char) -> bool {
    c.is_whitespace()
        || matches!(
            c,
            '=' | ':' | ',' | ';' | '"' | '\'' | '(' | ')' | '[' | ']' | '{' | '}' | '<' | '>'
        )
}

/// Extracts a peer identifier from an unstructured line.
#[derive(Debug, Clone)]
pub struct IdentifierCorrelator {
    token_len: usize,
}

impl IdentifierCorrelator {
    /// Creates a correlator whose fallback scan looks for hex tokens of
    /// exactly `token_len` digits.
    pub fn new(token_len: usize) -> Self {
        Self { token_len }
    }

    /// Returns the best guess for the peer `line` concerns, if any.
    pub fn correlate<'a, I>(&self, line: &str, known: I) -> Option<PeerId>
    where
        I: IntoIterator<Item = &'a PeerId>,
    {
        let exact = known
            .into_iter()
            .filter(|id| !id.as_str().is_empty() && line.contains(id.as_str()))
            .max_by_key(|id| id.as_str().len());
        if let Some(id) = exact {
            return Some(id.clone());
        }
        self.scan_hex_token(line)
    }

    fn scan_hex_token(&self, line: &str) -> Option<PeerId> {
        line.split(is_separator)
            .map(|w| w.trim_matches(|c: char| c == '.' || c == '-'))
            .find(|w| w.len() == self.token_len && w.chars().all(|c| c.is_ascii_hexdigit()))
            .map(|w| PeerId::new(w.to_ascii_lowercase()))
    }
}

impl Default for IdentifierCorrelator {
    fn default() -> Self {
        Self::new(SKI_HEX_LEN)
    }
}
