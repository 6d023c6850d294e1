//! Memoization of parsed-and-filtered stylesheets.
//!
//! The cache is process-wide and shared across documents. Values are plain
//! data: the parsed part sequence plus the validation errors recorded while
//! parsing, which the caller replays against the current origin node on
//! every hit.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Mutex;

use crate::parse::{ParseOptions, ParsedStylesheet};
use crate::utils::md5_hex;

/// Process-wide key-value store for parse results. Entries are immutable
/// plain data, so concurrent writes of the same key are benign.
pub trait StylesheetCache: Send + Sync {
    fn get(&self, key: &str) -> Option<ParsedStylesheet>;
    fn set(&self, key: &str, value: ParsedStylesheet);
}

/// Cache key over the stylesheet text and every parse option except the
/// tree-shaking flag: shaking runs after lookup, against the current
/// document's class set, so it must not partition the cache.
///
/// The encoding is a canonical sorted-field key-value list, not a language
/// serializer, so keys stay portable across cache backends.
pub fn cache_key(css: &str, options: &ParseOptions) -> String {
    let mut sorted: Vec<&String>;
    let mut canonical = String::new();

    canonical.push_str("allowed_at_rules=");
    sorted = options.allowed_at_rules.iter().collect();
    sorted.sort();
    for name in &sorted {
        canonical.push_str(name);
        canonical.push(',');
    }

    let _ = write!(
        canonical,
        "\nconvert_width_to_max_width={}",
        options.convert_width_to_max_width
    );

    canonical.push_str("\nproperty_blacklist=");
    sorted = options.property_blacklist.iter().collect();
    sorted.sort();
    for name in &sorted {
        canonical.push_str(name);
        canonical.push(',');
    }

    canonical.push_str("\nproperty_whitelist=");
    sorted = options.property_whitelist.iter().collect();
    sorted.sort();
    for name in &sorted {
        canonical.push_str(name);
        canonical.push(',');
    }

    let _ = write!(
        canonical,
        "\nstylesheet_path={}",
        options
            .stylesheet_path
            .as_ref()
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_default()
    );
    let _ = write!(
        canonical,
        "\nstylesheet_url={}",
        options.stylesheet_url.as_deref().unwrap_or_default()
    );
    let _ = write!(
        canonical,
        "\nvalidate_keyframes={}",
        options.validate_keyframes
    );
    canonical.push('\n');
    canonical.push_str(css);

    md5_hex(&canonical)
}

/// In-memory [`StylesheetCache`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, ParsedStylesheet>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StylesheetCache for MemoryCache {
    fn get(&self, key: &str) -> Option<ParsedStylesheet> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: ParsedStylesheet) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value);
        }
    }
}
