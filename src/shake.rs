//! Dropping class-selector rules the document can never match.
//!
//! Shaking is deliberately shallow: a selector survives iff every class
//! name it mentions occurs somewhere in the document. ID, element, and
//! attribute components are not analyzed.

use std::collections::HashSet;
use std::sync::LazyLock;

use itertools::Itertools;
use kuchikiki::NodeRef;
use regex::Regex;

use crate::parse::{ParsedPart, ParsedStylesheet};

static NEGATION_GROUPS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":not\([^)]*\)").unwrap());
static ATTRIBUTE_GROUPS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[[^\]]*\]").unwrap());
static CLASS_TOKENS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.([A-Za-z0-9_-]+)").unwrap());

/// Class names a selector depends on.
///
/// `:not(...)` groups are stripped first so `.a:not(.b)` does not require
/// `.b` to be present, and attribute selectors are stripped so `[class~=x]`
/// contributes nothing.
pub fn selector_classes(selector: &str) -> HashSet<String> {
    let without_negations = NEGATION_GROUPS.replace_all(selector, "");
    let without_attributes = ATTRIBUTE_GROUPS.replace_all(&without_negations, "");

    CLASS_TOKENS
        .captures_iter(&without_attributes)
        .map(|capture| capture[1].to_string())
        .collect()
}

/// Every class name used in the document, from every `class` attribute,
/// split on whitespace. Computed once per pass.
pub fn used_classes(dom: &NodeRef) -> HashSet<String> {
    let mut classes = HashSet::new();
    if let Ok(elements) = dom.select("[class]") {
        for element in elements {
            let attributes = element.attributes.borrow();
            if let Some(value) = attributes.get("class") {
                classes.extend(value.split_whitespace().map(str::to_string));
            }
        }
    }
    classes
}

/// Render a parsed stylesheet, keeping only selectors whose class
/// dependencies are covered by `used`. With `shaking` off every selector
/// is retained. Selectors with no class dependencies always survive.
pub fn render(sheet: &ParsedStylesheet, shaking: bool, used: &HashSet<String>) -> String {
    let mut out = String::new();

    for part in &sheet.parts {
        match part {
            ParsedPart::Chunk(text) => out.push_str(text),
            ParsedPart::Declarations(block) => {
                let retained = block
                    .selectors
                    .iter()
                    .filter(|(_, classes)| {
                        !shaking || classes.iter().all(|class| used.contains(class))
                    })
                    .map(|(selector, _)| selector.as_str())
                    .join(",");
                if retained.is_empty() {
                    continue;
                }
                out.push_str(&retained);
                out.push_str(&block.block);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::DeclarationPart;
    use indexmap::IndexMap;
    use kuchikiki::traits::TendrilSink;

    fn class_set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn extracts_class_names() {
        assert_eq!(selector_classes(".foo"), class_set(&["foo"]));
        assert_eq!(
            selector_classes("div.foo > .bar-baz"),
            class_set(&["foo", "bar-baz"])
        );
        assert_eq!(selector_classes("#main p"), class_set(&[]));
    }

    #[test]
    fn negations_do_not_count() {
        assert_eq!(selector_classes(".a:not(.b)"), class_set(&["a"]));
    }

    #[test]
    fn attribute_selectors_do_not_count() {
        assert_eq!(selector_classes(".a[class~=\".b\"]"), class_set(&["a"]));
    }

    #[test]
    fn collects_document_classes() {
        let dom = kuchikiki::parse_html().one(
            "<body><div class=\"a b\"><span class=\"c\"></span></div></body>",
        );
        assert_eq!(used_classes(&dom), class_set(&["a", "b", "c"]));
    }

    fn declaration_part(selectors: &[&str], block: &str) -> ParsedPart {
        let mut map = IndexMap::new();
        for selector in selectors {
            map.insert(selector.to_string(), selector_classes(selector));
        }
        ParsedPart::Declarations(DeclarationPart {
            selectors: map,
            block: block.to_string(),
        })
    }

    #[test]
    fn shakes_unused_selectors() {
        let sheet = ParsedStylesheet {
            parts: vec![declaration_part(&[".foo", ".bar"], "{color:red}")],
            errors: vec![],
        };
        assert_eq!(
            render(&sheet, true, &class_set(&["foo"])),
            ".foo{color:red}"
        );
        assert_eq!(render(&sheet, true, &class_set(&[])), "");
        assert_eq!(
            render(&sheet, false, &class_set(&[])),
            ".foo,.bar{color:red}"
        );
    }

    #[test]
    fn classless_selectors_survive() {
        let sheet = ParsedStylesheet {
            parts: vec![declaration_part(&["h1"], "{margin:0}")],
            errors: vec![],
        };
        assert_eq!(render(&sheet, true, &class_set(&[])), "h1{margin:0}");
    }

    #[test]
    fn chunks_pass_through() {
        let sheet = ParsedStylesheet {
            parts: vec![
                ParsedPart::Chunk("@media print{".to_string()),
                declaration_part(&[".gone"], "{display:none}"),
                ParsedPart::Chunk("}".to_string()),
            ],
            errors: vec![],
        };
        assert_eq!(render(&sheet, true, &class_set(&[])), "@media print{}");
    }
}
