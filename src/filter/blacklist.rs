//! Blacklist of glob patterns.
//!
//! Patterns are loaded from a text source and compiled as a whole. The active
//! set is swapped atomically on reload, so a match in progress keeps reading
//! the set it started with.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use regex::Regex;
use tracing::{info, warn};

use super::{compile_glob, parse_patterns};
use crate::error::Result;
use crate::events::{EventEmitter, ServerEvent};

/// Where blacklist patterns come from.
#[derive(Debug, Clone)]
pub enum PatternSource {
    /// A text file re-read on every load.
    File(PathBuf),
    /// Fixed text, mostly useful for tests.
    Inline(String),
}

impl PatternSource {
    /// Read the source text. `None` when the file does not exist.
    fn read(&self) -> io::Result<Option<String>> {
        match self {
            PatternSource::File(path) => match fs::read_to_string(path) {
                Ok(text) => Ok(Some(text)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e),
            },
            PatternSource::Inline(text) => Ok(Some(text.clone())),
        }
    }

    fn describe(&self) -> String {
        match self {
            PatternSource::File(path) => path.display().to_string(),
            PatternSource::Inline(_) => "<inline>".to_string(),
        }
    }
}

struct CompiledPattern {
    raw: String,
    matcher: Regex,
}

#[derive(Default)]
struct PatternSet {
    patterns: Vec<CompiledPattern>,
}

impl PatternSet {
    fn compile(text: &str) -> Self {
        let patterns = parse_patterns(text)
            .filter_map(|raw| match compile_glob(raw) {
                Ok(matcher) => Some(CompiledPattern {
                    raw: raw.to_string(),
                    matcher,
                }),
                Err(e) => {
                    warn!(pattern = %raw, error = %e, "skipping blacklist pattern");
                    None
                }
            })
            .collect();

        Self { patterns }
    }

    fn raw_patterns(&self) -> Vec<String> {
        self.patterns.iter().map(|p| p.raw.clone()).collect()
    }
}

/// A set of blacklisted domain patterns.
pub struct Blacklist {
    source: PatternSource,
    active: ArcSwap<PatternSet>,
    events: EventEmitter,
}

impl Blacklist {
    /// Create an empty blacklist backed by `source`. Call [`Blacklist::load`]
    /// to read it.
    pub fn new(source: PatternSource, events: EventEmitter) -> Self {
        Self {
            source,
            active: ArcSwap::from_pointee(PatternSet::default()),
            events,
        }
    }

    /// Create a blacklist from inline pattern text, compiled immediately.
    pub fn from_patterns(text: &str) -> Self {
        Self {
            source: PatternSource::Inline(text.to_string()),
            active: ArcSwap::from_pointee(PatternSet::compile(text)),
            events: EventEmitter::new_disabled(),
        }
    }

    /// Re-read the source and replace the active pattern set.
    ///
    /// A missing file leaves the current set untouched. Returns the number of
    /// active patterns.
    pub fn load(&self) -> Result<usize> {
        let Some(text) = self.source.read()? else {
            warn!(source = %self.source.describe(), "blacklist source not found, keeping current patterns");
            return Ok(self.len());
        };

        let set = Arc::new(PatternSet::compile(&text));
        let count = set.patterns.len();
        self.active.store(set.clone());

        info!(source = %self.source.describe(), patterns = count, "blacklist loaded");
        self.events
            .emit_with(|| ServerEvent::BlacklistSnapshot(set.raw_patterns()));

        Ok(count)
    }

    pub fn reload(&self) -> Result<usize> {
        self.load()
    }

    /// Check if a domain matches any pattern (case-insensitive).
    pub fn is_blocked(&self, domain: &str) -> bool {
        self.active
            .load()
            .patterns
            .iter()
            .any(|p| p.matcher.is_match(domain))
    }

    /// The raw patterns of the active set, in source order.
    pub fn patterns(&self) -> Vec<String> {
        self.active.load().raw_patterns()
    }

    /// Returns the number of active patterns.
    pub fn len(&self) -> usize {
        self.active.load().patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Blacklist {
    fn default() -> Self {
        Self::from_patterns("")
    }
}
