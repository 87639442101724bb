//! Shared patterns for pulling arguments out of raw request text.
//!
//! Used by the heuristic router, the second-chance extraction after model
//! routing, and the timer skill itself.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// First integer, optionally followed by a minutes unit word.
    pub static ref MINUTES_PATTERN: Regex = Regex::new(
        r"(?i)(\d+)\s*(minutes|minute|mins|min|minuuttia)?"
    ).unwrap();
}

/// Extract the first integer token from `text` as a number of minutes.
pub fn extract_minutes(text: &str) -> Option<u64> {
    MINUTES_PATTERN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
