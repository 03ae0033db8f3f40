//! DNS query filtering module.
//!
//! Refuses queries for domains matching a blacklist of glob patterns,
//! where `*` matches any run of characters and everything else is literal.

mod blacklist;

pub use blacklist::{Blacklist, PatternSource};

use regex::{Regex, RegexBuilder};

/// Compile a glob into an anchored, case-insensitive matcher.
pub fn compile_glob(pattern: &str) -> Result<Regex, regex::Error> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");

    RegexBuilder::new(&format!("^{body}$"))
        .case_insensitive(true)
        .build()
}

/// Iterate the patterns of a blacklist text, one per line.
///
/// Lines are trimmed; blank lines and lines starting with `#` are skipped.
pub fn parse_patterns(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}
