//! Sanitize and rewrite the CSS of AMP-constrained HTML documents.
//!
//! [`StyleSanitizer`] collects every stylesheet reachable from a document
//! (inline `<style>` elements, `<link rel=stylesheet>` references, and
//! per-element `style` attributes), filters each against the platform's
//! rules, tree-shakes class selectors the document never uses, rewrites
//! `!important` into specificity-boosted clones, normalizes `@font-face`
//! sources, and emits the surviving CSS as a byte-budgeted
//! `<style amp-custom>` in the head plus, when present, a
//! `<style amp-keyframes>` at the end of the body.

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use itertools::Itertools;
use kuchikiki::traits::TendrilSink;
use kuchikiki::{ElementData, NodeDataRef, NodeRef};
use log::warn;
use markup5ever::local_name;

pub mod cache;
pub mod error;
pub mod fontface;
pub mod parse;
pub mod resolve;
pub mod shake;
pub mod spec;
pub mod telemetry;
mod utils;

pub use error::{ErrorCollector, ValidationError, ValidationRecord, ValidationSink};
pub use parse::{ParseOptions, ParsedPart, ParsedStylesheet};
pub use spec::{CdataSpec, PlatformSpec};

use cache::{MemoryCache, StylesheetCache};
use resolve::{PathMapper, ResolveError, UrlResolver};
use telemetry::{NoopTelemetry, Telemetry};

/// Class prefix for rules synthesized from `style` attributes.
const STYLE_ATTRIBUTE_CLASS_PREFIX: &str = "amp-wp-";

#[derive(Debug, Clone, serde::Serialize)]
pub struct SanitizerOptions {
    /// Prune class-selector rules whose classes never occur in the document.
    pub tree_shaking: bool,
}

impl Default for SanitizerOptions {
    fn default() -> Self {
        SanitizerOptions { tree_shaking: true }
    }
}

/// Result of a [`StyleSanitizer::process`] run.
#[derive(Debug)]
pub struct ProcessResult {
    /// The serialized, sanitized document.
    pub html: String,
    /// Validation errors in encounter order.
    pub errors: Vec<ValidationRecord>,
}

/// Per-document CSS sanitizer. Collaborators (platform rules, parse cache,
/// URL resolver, telemetry) are injected at construction; one instance can
/// process any number of documents.
pub struct StyleSanitizer {
    options: SanitizerOptions,
    spec: PlatformSpec,
    cache: Arc<dyn StylesheetCache>,
    resolver: Box<dyn UrlResolver>,
    telemetry: Box<dyn Telemetry>,
}

impl StyleSanitizer {
    pub fn new(options: SanitizerOptions) -> Self {
        StyleSanitizer {
            options,
            spec: PlatformSpec::amp(),
            cache: Arc::new(MemoryCache::new()),
            resolver: Box::new(PathMapper::default()),
            telemetry: Box::new(NoopTelemetry),
        }
    }

    pub fn with_spec(mut self, spec: PlatformSpec) -> Self {
        self.spec = spec;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn StylesheetCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_resolver(mut self, resolver: Box<dyn UrlResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Box<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Process the given HTML document, returning the sanitized markup and
    /// every validation error encountered.
    pub fn process(&self, html: &str) -> anyhow::Result<ProcessResult> {
        let parser = kuchikiki::parse_html();
        let dom = parser.one(html);

        let collector = ErrorCollector::new();
        self.process_document(&dom, &collector)?;

        let mut result = Vec::new();
        dom.serialize(&mut result)?;
        Ok(ProcessResult {
            html: String::from_utf8(result)?,
            errors: collector.into_records(),
        })
    }

    /// Run the sanitization pass against a caller-owned DOM, reporting
    /// validation errors to `sink`. The pass owns the DOM from start to
    /// emit; no error is fatal.
    pub fn process_document(
        &self,
        dom: &NodeRef,
        sink: &dyn ValidationSink,
    ) -> anyhow::Result<()> {
        let mut pass = Pass {
            sanitizer: self,
            dom,
            sink,
            pending: Vec::new(),
            custom_host: None,
            parse_time: Duration::ZERO,
        };

        pass.collect_elements();
        pass.collect_style_attributes();
        pass.finalize();

        self.telemetry.record(
            "style_sanitizer_parse_css",
            pass.parse_time,
            "cumulative CSS parsing time for one document",
        );
        Ok(())
    }
}

impl Default for StyleSanitizer {
    fn default() -> Self {
        StyleSanitizer::new(SanitizerOptions::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StylesheetKind {
    Custom,
    Keyframes,
}

struct PendingStylesheet {
    parsed: ParsedStylesheet,
    options: ParseOptions,
    node: NodeRef,
    kind: StylesheetKind,
}

/// State for one document sanitization pass.
struct Pass<'a> {
    sanitizer: &'a StyleSanitizer,
    dom: &'a NodeRef,
    sink: &'a dyn ValidationSink,
    pending: Vec<PendingStylesheet>,
    custom_host: Option<NodeRef>,
    parse_time: Duration,
}

impl Pass<'_> {
    fn cdata_for(&self, kind: StylesheetKind) -> &CdataSpec {
        match kind {
            StylesheetKind::Custom => &self.sanitizer.spec.style_custom,
            StylesheetKind::Keyframes => &self.sanitizer.spec.style_keyframes,
        }
    }

    fn parse_options_for(&self, kind: StylesheetKind) -> ParseOptions {
        let cdata = self.cdata_for(kind);
        ParseOptions {
            allowed_at_rules: cdata.allowed_at_rules.clone(),
            property_whitelist: cdata.allowed_declarations.clone(),
            validate_keyframes: cdata.validate_keyframes,
            class_selector_tree_shaking: self.sanitizer.options.tree_shaking,
            ..ParseOptions::default()
        }
    }

    /// Look the stylesheet up in the shared cache, parsing on miss.
    /// Recorded errors replay against the current origin node either way.
    fn parse_cached(
        &mut self,
        css: &str,
        options: &ParseOptions,
        node: &NodeRef,
    ) -> ParsedStylesheet {
        let key = cache::cache_key(css, options);
        let parsed = match self.sanitizer.cache.get(&key) {
            Some(hit) => hit,
            None => {
                let started = Instant::now();
                let parsed = parse::parse_stylesheet(css, options);
                self.parse_time += started.elapsed();
                self.sanitizer.cache.set(&key, parsed.clone());
                parsed
            }
        };
        for error in &parsed.errors {
            self.sink.report(error.clone(), node);
        }
        parsed
    }

    /// Discover `<style>` and `<link rel=stylesheet>` sources in document
    /// order and route each through the pipeline.
    fn collect_elements(&mut self) {
        let sources: Vec<_> = match self.dom.select("style,link") {
            Ok(iter) => iter.collect(),
            Err(()) => return,
        };

        for source in sources {
            if source.name.local == local_name!("style") {
                self.process_style_element(&source);
            } else {
                let attributes = source.attributes.borrow();
                let is_stylesheet = attributes
                    .get("rel")
                    .map(|rel| {
                        rel.split_whitespace()
                            .any(|token| token.eq_ignore_ascii_case("stylesheet"))
                    })
                    .unwrap_or(false);
                drop(attributes);
                if is_stylesheet {
                    self.process_link_element(&source);
                }
            }
        }
    }

    fn process_style_element(&mut self, style: &NodeDataRef<ElementData>) {
        let node = style.as_node().clone();
        let attributes = style.attributes.borrow();

        if attributes.contains("amp-boilerplate") {
            return;
        }
        if let Some(content_type) = attributes.get("type") {
            if !content_type.trim().eq_ignore_ascii_case("text/css") {
                return;
            }
        }

        let is_keyframes = attributes.contains("amp-keyframes");
        let is_custom_host =
            !is_keyframes && attributes.contains("amp-custom") && self.custom_host.is_none();
        drop(attributes);

        let kind = if is_keyframes {
            StylesheetKind::Keyframes
        } else {
            StylesheetKind::Custom
        };
        let options = self.parse_options_for(kind);

        let css = node.text_contents();
        if !css.trim().is_empty() {
            let parsed = self.parse_cached(&css, &options, &node);
            self.pending.push(PendingStylesheet {
                parsed,
                options,
                node: node.clone(),
                kind,
            });
        }

        // The designated custom host stays in place; the emitter fills it.
        if is_custom_host {
            self.custom_host = Some(node);
        } else {
            node.detach();
        }
    }

    fn process_link_element(&mut self, link: &NodeDataRef<ElementData>) {
        let node = link.as_node().clone();
        let attributes = link.attributes.borrow();
        let Some(href) = attributes.get("href").map(str::to_string) else {
            return;
        };
        let media = attributes.get("media").map(str::to_string);
        drop(attributes);

        // Whitelisted font providers keep their link untouched.
        if self.sanitizer.spec.allowed_font_urls.is_match(&href) {
            return;
        }

        let path = match self.sanitizer.resolver.resolve(&href) {
            Ok(path) => path,
            Err(ResolveError::BadExtension) => {
                self.sink
                    .report(ValidationError::AmpCssBadFileExtension { url: href }, &node);
                node.detach();
                return;
            }
            Err(ResolveError::NotFound) => {
                self.sink
                    .report(ValidationError::AmpCssPathNotFound { url: href }, &node);
                node.detach();
                return;
            }
        };

        let css = match fs::read_to_string(&path) {
            Ok(css) => css,
            Err(error) => {
                self.sink.report(
                    ValidationError::StylesheetFileReadError {
                        message: error.to_string(),
                    },
                    &node,
                );
                node.detach();
                return;
            }
        };

        let css = match media.as_deref().map(str::trim) {
            Some(media) if !media.is_empty() && !media.eq_ignore_ascii_case("all") => {
                format!("@media {media}{{{css}}}")
            }
            _ => css,
        };

        let mut options = self.parse_options_for(StylesheetKind::Custom);
        options.stylesheet_url = Some(href);
        options.stylesheet_path = Some(path);

        let parsed = self.parse_cached(&css, &options, &node);
        self.pending.push(PendingStylesheet {
            parsed,
            options,
            node: node.clone(),
            kind: StylesheetKind::Custom,
        });
        node.detach();
    }

    /// Convert each `style` attribute into a class-addressed rule in the
    /// custom stylesheet.
    fn collect_style_attributes(&mut self) {
        let elements: Vec<_> = match self.dom.select("[style]") {
            Ok(iter) => iter.collect(),
            Err(()) => return,
        };

        for element in elements {
            let node = element.as_node().clone();
            let Some(value) = element.attributes.borrow().get("style").map(str::to_string)
            else {
                continue;
            };

            let class = format!(
                "{STYLE_ATTRIBUTE_CLASS_PREFIX}{}",
                &utils::md5_hex(&value)[..7]
            );
            let css = format!(".{class}{{{value}}}");

            let mut options = self.parse_options_for(StylesheetKind::Custom);
            options.allowed_at_rules = HashSet::new();
            options.class_selector_tree_shaking = false;
            options.convert_width_to_max_width = true;

            let parsed = self.parse_cached(&css, &options, &node);
            let empty = shake::render(&parsed, false, &HashSet::new()).is_empty();

            let mut attributes = element.attributes.borrow_mut();
            attributes.remove("style");
            if empty {
                continue;
            }
            let updated = match attributes.get("class").map(str::trim) {
                Some(existing) if !existing.is_empty() => format!("{existing} {class}"),
                _ => class.clone(),
            };
            attributes.insert("class", updated);
            drop(attributes);

            self.pending.push(PendingStylesheet {
                parsed,
                options,
                node,
                kind: StylesheetKind::Custom,
            });
        }
    }

    /// Tree-shake against the document's class set, admit against the byte
    /// budgets, then write the final style elements.
    fn finalize(&mut self) {
        let used = if self.sanitizer.options.tree_shaking {
            shake::used_classes(self.dom)
        } else {
            HashSet::new()
        };

        let mut custom: IndexMap<String, String> = IndexMap::new();
        let mut keyframes: IndexMap<String, String> = IndexMap::new();
        let mut custom_bytes = 0usize;
        let mut keyframes_bytes = 0usize;

        for pending in &self.pending {
            let shaking = pending.options.class_selector_tree_shaking
                && !pending.options.validate_keyframes;
            let text = shake::render(&pending.parsed, shaking, &used);
            if text.is_empty() {
                continue;
            }

            let (store, bytes, max_bytes) = match pending.kind {
                StylesheetKind::Custom => (
                    &mut custom,
                    &mut custom_bytes,
                    self.sanitizer.spec.style_custom.max_bytes,
                ),
                StylesheetKind::Keyframes => (
                    &mut keyframes,
                    &mut keyframes_bytes,
                    self.sanitizer.spec.style_keyframes.max_bytes,
                ),
            };

            // Identical stylesheets are stored and counted once.
            let fingerprint = utils::md5_hex(&text);
            if store.contains_key(&fingerprint) {
                continue;
            }
            if *bytes + text.len() > max_bytes {
                self.sink.report(
                    ValidationError::TooMuchCss {
                        excess_bytes: *bytes + text.len() - max_bytes,
                    },
                    &pending.node,
                );
                continue;
            }
            *bytes += text.len();
            store.insert(fingerprint, text);
        }

        self.emit_custom(&custom);
        self.emit_keyframes(&keyframes);
    }

    fn ensure_head(&self) -> Option<NodeRef> {
        if let Ok(head) = self.dom.select_first("head") {
            return Some(head.as_node().clone());
        }
        if let Ok(html) = self.dom.select_first("html") {
            let head = utils::create_element("head");
            html.as_node().prepend(head.clone());
            return Some(head);
        }
        None
    }

    fn emit_custom(&mut self, stylesheets: &IndexMap<String, String>) {
        let css: String = stylesheets.values().join("");

        let host = match self.custom_host.take() {
            Some(host) => host,
            None => {
                let Some(head) = self.ensure_head() else {
                    warn!(
                        "document has no head or html element; dropping {} bytes of custom CSS",
                        css.len()
                    );
                    return;
                };
                let style = utils::create_style_element("amp-custom");
                head.append(style.clone());
                style
            }
        };

        host.children().for_each(|child| child.detach());
        host.append(NodeRef::new_text(css));
    }

    fn emit_keyframes(&mut self, stylesheets: &IndexMap<String, String>) {
        if stylesheets.is_empty() {
            return;
        }
        let css: String = stylesheets.values().join("");

        match self.dom.select_first("body") {
            Ok(body) => {
                let style = utils::create_style_element("amp-keyframes");
                style.append(NodeRef::new_text(css));
                body.as_node().append(style);
            }
            Err(()) => {
                self.sink
                    .report(ValidationError::MissingBodyElement, self.dom);
            }
        }
    }
}
