//! Parsing a stylesheet into filtered, shakeable parts.
//!
//! A parsed stylesheet is an ordered sequence of opaque text chunks
//! (at-rule frames, `@font-face` and `@keyframes` bodies) and declaration
//! tuples (selector map + serialized block). The split lets the tree
//! shaker drop selectors later without re-parsing, while everything else
//! flows through as text.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use lightningcss::declaration::DeclarationBlock;
use lightningcss::printer::PrinterOptions;
use lightningcss::properties::Property;
use lightningcss::rules::font_face::FontFaceRule;
use lightningcss::rules::style::StyleRule;
use lightningcss::rules::CssRule;
use lightningcss::stylesheet::{ParserOptions, StyleSheet};
use lightningcss::traits::ToCss;

use crate::error::ValidationError;
use crate::fontface::FontUrlNormalizer;
use crate::shake::selector_classes;
use crate::utils::strip_vendor_prefix;

/// Selector prefix that simulates `!important`: an ID that can never match
/// raises specificity by `1,0,0` without changing the match set.
pub const SPECIFICITY_PREFIX: &str = ":root:not(#FK_ID)";

/// How a stylesheet is parsed and filtered. The fields mirror the platform
/// CDATA spec for the style kind being processed, plus per-source context.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// At-rule names (without `@`) that may stay in the output.
    pub allowed_at_rules: HashSet<String>,
    /// When non-empty, only these declaration names are kept.
    pub property_whitelist: HashSet<String>,
    /// When the whitelist is empty, these declaration names are dropped.
    pub property_blacklist: HashSet<String>,
    /// Treat the stylesheet as `@keyframes`-only: declaration blocks
    /// outside `@keyframes` pass through untouched and shaking is off.
    pub validate_keyframes: bool,
    /// Prune class selectors unused by the document after parsing.
    pub class_selector_tree_shaking: bool,
    /// Rename `width` declarations to `max-width`.
    pub convert_width_to_max_width: bool,
    /// URL the stylesheet was loaded from; base for relative font URLs.
    pub stylesheet_url: Option<String>,
    /// Local path of the stylesheet file, when it came from disk.
    pub stylesheet_path: Option<PathBuf>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            allowed_at_rules: HashSet::new(),
            property_whitelist: HashSet::new(),
            property_blacklist: ["behavior", "-moz-binding"]
                .iter()
                .map(|name| name.to_string())
                .collect(),
            validate_keyframes: false,
            class_selector_tree_shaking: true,
            convert_width_to_max_width: false,
            stylesheet_url: None,
            stylesheet_path: None,
        }
    }
}

/// One element of a parsed stylesheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedPart {
    /// Raw CSS emitted as-is.
    Chunk(String),
    /// A style rule, split for tree shaking.
    Declarations(DeclarationPart),
}

/// Selector map plus serialized declaration block (braces included). The
/// map preserves source order and carries, per selector, the class names
/// the selector depends on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeclarationPart {
    pub selectors: IndexMap<String, HashSet<String>>,
    pub block: String,
}

/// Parse result: the part sequence plus the validation errors recorded
/// while filtering. Cached as a unit so errors replay on cache hits.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedStylesheet {
    pub parts: Vec<ParsedPart>,
    pub errors: Vec<ValidationError>,
}

/// Parse and filter a stylesheet. Parse failures yield an empty part
/// sequence and a single `css_parse_error`; per-construct rejections are
/// recorded and the rest of the stylesheet survives.
pub fn parse_stylesheet(css: &str, options: &ParseOptions) -> ParsedStylesheet {
    let mut walker = Walker {
        options,
        parts: Vec::new(),
        errors: Vec::new(),
    };
    if let Err(message) = walker.parse(css) {
        walker.parts.clear();
        walker.errors.push(ValidationError::CssParseError { message });
    }
    ParsedStylesheet {
        parts: walker.parts,
        errors: walker.errors,
    }
}

fn compact<'a>() -> PrinterOptions<'a> {
    PrinterOptions {
        minify: true,
        ..PrinterOptions::default()
    }
}

fn err_string(error: impl std::fmt::Display) -> String {
    error.to_string()
}

// The whitelist is consulted with the vendor-stripped name only; the
// blacklist matches either form so a raw entry like `-moz-binding` works.
fn property_allowed(name: &str, options: &ParseOptions) -> bool {
    let stripped = strip_vendor_prefix(name);
    if !options.property_whitelist.is_empty() {
        options.property_whitelist.contains(stripped)
    } else {
        !options.property_blacklist.contains(name) && !options.property_blacklist.contains(stripped)
    }
}

/// Drop disallowed declarations from a block, recording each removal.
/// Where `!important` cannot be transformed away the qualified
/// declarations are removed outright.
fn filter_block(
    block: &mut DeclarationBlock,
    options: &ParseOptions,
    errors: &mut Vec<ValidationError>,
    important_allowed: bool,
) {
    let mut filter = |list: &mut Vec<Property>| {
        list.retain(|property| {
            let name = property.property_id().name().to_string();
            if property_allowed(&name, options) {
                return true;
            }
            let property_value = property.value_to_css_string(compact()).unwrap_or_default();
            errors.push(ValidationError::IllegalCssProperty {
                property_name: name,
                property_value,
            });
            false
        });
    };
    filter(&mut block.declarations);
    filter(&mut block.important_declarations);

    if !important_allowed {
        for property in block.important_declarations.drain(..) {
            errors.push(ValidationError::IllegalCssImportant {
                property_name: property.property_id().name().to_string(),
            });
        }
    }
}

fn at_rule_name(rendered: &str) -> Option<String> {
    let rest = rendered.strip_prefix('@')?;
    let name: String = rest
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '-')
        .collect();
    if name.is_empty() {
        return None;
    }
    Some(name)
}

struct Walker<'a> {
    options: &'a ParseOptions,
    parts: Vec<ParsedPart>,
    errors: Vec<ValidationError>,
}

impl Walker<'_> {
    fn parse(&mut self, css: &str) -> Result<(), String> {
        let warnings = Arc::new(RwLock::new(Vec::new()));
        let parser_options = ParserOptions {
            error_recovery: true,
            warnings: Some(warnings.clone()),
            ..ParserOptions::default()
        };

        let mut ast = StyleSheet::parse(css, parser_options).map_err(err_string)?;
        self.rules(&mut ast.rules.0)?;

        if let Ok(warnings) = warnings.read() {
            for warning in warnings.iter() {
                self.errors.push(ValidationError::UnrecognizedCss {
                    message: warning.to_string(),
                });
            }
        }
        Ok(())
    }

    fn allowed(&self, name: &str) -> bool {
        self.options.allowed_at_rules.contains(name)
            || self.options.allowed_at_rules.contains(strip_vendor_prefix(name))
    }

    fn rules<'i>(&mut self, rules: &mut Vec<CssRule<'i>>) -> Result<(), String> {
        for rule in rules.iter_mut() {
            match rule {
                CssRule::Style(style) => {
                    if self.options.validate_keyframes {
                        // Keyframes-only stylesheets leave plain rules alone.
                        let text = style.to_css_string(compact()).map_err(err_string)?;
                        self.parts.push(ParsedPart::Chunk(text));
                    } else {
                        self.style_rule(style)?;
                    }
                }
                CssRule::Media(media) => {
                    if self.allowed("media") {
                        let query = media.query.to_css_string(compact()).map_err(err_string)?;
                        self.parts
                            .push(ParsedPart::Chunk(format!("@media {query}{{")));
                        self.rules(&mut media.rules.0)?;
                        self.parts.push(ParsedPart::Chunk("}".to_string()));
                    } else {
                        self.errors.push(ValidationError::IllegalCssAtRule {
                            name: "media".to_string(),
                        });
                    }
                }
                CssRule::Supports(supports) => {
                    if self.allowed("supports") {
                        let condition = supports
                            .condition
                            .to_css_string(compact())
                            .map_err(err_string)?;
                        self.parts
                            .push(ParsedPart::Chunk(format!("@supports {condition}{{")));
                        self.rules(&mut supports.rules.0)?;
                        self.parts.push(ParsedPart::Chunk("}".to_string()));
                    } else {
                        self.errors.push(ValidationError::IllegalCssAtRule {
                            name: "supports".to_string(),
                        });
                    }
                }
                CssRule::Import(_) => {
                    self.errors.push(ValidationError::IllegalCssImportRule);
                }
                CssRule::FontFace(font_face) => {
                    if self.allowed("font-face") {
                        self.font_face(font_face)?;
                    } else {
                        self.errors.push(ValidationError::IllegalCssAtRule {
                            name: "font-face".to_string(),
                        });
                    }
                }
                CssRule::Keyframes(keyframes) => {
                    if self.allowed("keyframes") {
                        for keyframe in keyframes.keyframes.iter_mut() {
                            filter_block(
                                &mut keyframe.declarations,
                                self.options,
                                &mut self.errors,
                                false,
                            );
                        }
                        let text = keyframes.to_css_string(compact()).map_err(err_string)?;
                        self.parts.push(ParsedPart::Chunk(text));
                    } else {
                        self.errors.push(ValidationError::IllegalCssAtRule {
                            name: "keyframes".to_string(),
                        });
                    }
                }
                CssRule::Page(page) => {
                    if self.allowed("page") {
                        filter_block(&mut page.declarations, self.options, &mut self.errors, false);
                        if !page.declarations.declarations.is_empty() {
                            let text = page.to_css_string(compact()).map_err(err_string)?;
                            self.parts.push(ParsedPart::Chunk(text));
                        }
                    } else {
                        self.errors.push(ValidationError::IllegalCssAtRule {
                            name: "page".to_string(),
                        });
                    }
                }
                CssRule::Unknown(unknown) => {
                    let name = unknown.name.to_string();
                    if self.allowed(&name) {
                        let text = unknown.to_css_string(compact()).map_err(err_string)?;
                        self.parts.push(ParsedPart::Chunk(text));
                    } else {
                        self.errors
                            .push(ValidationError::IllegalCssAtRule { name });
                    }
                }
                CssRule::Ignored => {}
                other => {
                    let rendered = other.to_css_string(compact()).unwrap_or_default();
                    if rendered.is_empty() {
                        continue;
                    }
                    match at_rule_name(&rendered) {
                        Some(name) if self.allowed(&name) => {
                            self.parts.push(ParsedPart::Chunk(rendered));
                        }
                        Some(name) => {
                            self.errors.push(ValidationError::IllegalCssAtRule { name });
                        }
                        None => {
                            self.errors.push(ValidationError::UnrecognizedCss {
                                message: rendered,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Filter a style rule's declarations, then split it into parts.
    /// `!important` declarations move to a specificity-boosted clone placed
    /// right after the original.
    fn style_rule<'i>(&mut self, style: &mut StyleRule<'i>) -> Result<(), String> {
        filter_block(&mut style.declarations, self.options, &mut self.errors, true);

        let mut selectors: IndexMap<String, HashSet<String>> = IndexMap::new();
        for selector in style.selectors.0.iter() {
            let text = selector.to_css_string(compact()).map_err(err_string)?;
            let classes = selector_classes(&text);
            selectors.insert(text, classes);
        }

        if !selectors.is_empty() {
            let normal = self.render_declarations(&style.declarations.declarations)?;
            let important =
                self.render_declarations(&style.declarations.important_declarations)?;

            if !normal.is_empty() {
                self.parts.push(ParsedPart::Declarations(DeclarationPart {
                    selectors: selectors.clone(),
                    block: format!("{{{normal}}}"),
                }));
            }
            if !important.is_empty() {
                let boosted = selectors
                    .iter()
                    .map(|(selector, classes)| {
                        (format!("{SPECIFICITY_PREFIX} {selector}"), classes.clone())
                    })
                    .collect();
                self.parts.push(ParsedPart::Declarations(DeclarationPart {
                    selectors: boosted,
                    block: format!("{{{important}}}"),
                }));
            }
        }

        self.rules(&mut style.rules.0)
    }

    fn render_declarations(&self, declarations: &[Property]) -> Result<String, String> {
        let mut rendered = Vec::with_capacity(declarations.len());
        for property in declarations {
            let name = property.property_id().name().to_string();
            if self.options.convert_width_to_max_width && name == "width" {
                let value = property.value_to_css_string(compact()).map_err(err_string)?;
                rendered.push(format!("max-width:{value}"));
            } else {
                rendered.push(property.to_css_string(false, compact()).map_err(err_string)?);
            }
        }
        Ok(rendered.join(";"))
    }

    /// Filter a `@font-face` body and rewrite its `src:` URLs, emitting the
    /// whole rule as one chunk.
    fn font_face(&mut self, font_face: &FontFaceRule) -> Result<(), String> {
        let normalizer = FontUrlNormalizer::new(self.options.stylesheet_url.as_deref());
        let mut declarations = Vec::with_capacity(font_face.properties.len());

        for property in font_face.properties.iter() {
            let rendered = property.to_css_string(compact()).map_err(err_string)?;
            let (name, value) = match rendered.split_once(':') {
                Some((name, value)) => (name.to_string(), value.to_string()),
                None => (rendered.clone(), String::new()),
            };

            if !property_allowed(&name, self.options) {
                self.errors.push(ValidationError::IllegalCssProperty {
                    property_name: name,
                    property_value: value,
                });
                continue;
            }

            // Descriptors cannot be `!important`; custom descriptors that
            // smuggle the marker in lose it here.
            let mut value = value;
            if let Some(stripped) = value
                .trim_end()
                .strip_suffix("!important")
                .map(|prefix| prefix.trim_end().to_string())
            {
                self.errors.push(ValidationError::IllegalCssImportant {
                    property_name: name.clone(),
                });
                value = stripped;
            }

            if name.eq_ignore_ascii_case("src") {
                value = normalizer.normalize_src(&value);
            }
            declarations.push(format!("{name}:{value}"));
        }

        if !declarations.is_empty() {
            self.parts.push(ParsedPart::Chunk(format!(
                "@font-face{{{}}}",
                declarations.join(";")
            )));
        }
        Ok(())
    }
}
