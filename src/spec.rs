//! Platform rule tables: what each generated `<style>` kind may contain.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static AMP_FONT_PROVIDERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https://(cloud\.typography\.com|fast\.fonts\.net|fonts\.googleapis\.com|use\.typekit\.net|maxcdn\.bootstrapcdn\.com|use\.fontawesome\.com)/",
    )
    .unwrap()
});

/// Constraints for the CDATA of one generated style element kind.
#[derive(Debug, Clone)]
pub struct CdataSpec {
    /// Byte cap for the concatenated output of this kind.
    pub max_bytes: usize,
    /// At-rule names (without `@`) permitted inside sources of this kind.
    pub allowed_at_rules: HashSet<String>,
    /// Declaration whitelist; empty means blacklist mode.
    pub allowed_declarations: HashSet<String>,
    /// Treat sources as `@keyframes`-only stylesheets.
    pub validate_keyframes: bool,
}

/// The platform's per-tag CSS rules plus the font-provider allowlist.
#[derive(Debug, Clone)]
pub struct PlatformSpec {
    /// Rules for `style[amp-custom]` sources (inline styles, links, style attributes).
    pub style_custom: CdataSpec,
    /// Rules for `style[amp-keyframes]` sources.
    pub style_keyframes: CdataSpec,
    /// `<link>` hrefs matching this are whitelisted font providers and left untouched.
    pub allowed_font_urls: Regex,
}

fn name_set(names: &[&str]) -> HashSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

impl PlatformSpec {
    /// The stock AMP limits.
    pub fn amp() -> Self {
        PlatformSpec {
            style_custom: CdataSpec {
                max_bytes: 75_000,
                allowed_at_rules: name_set(&["media", "page", "supports", "font-face", "keyframes"]),
                allowed_declarations: HashSet::new(),
                validate_keyframes: false,
            },
            style_keyframes: CdataSpec {
                max_bytes: 500_000,
                allowed_at_rules: name_set(&["media", "supports", "keyframes"]),
                allowed_declarations: name_set(&[
                    "animation-timing-function",
                    "offset-distance",
                    "opacity",
                    "transform",
                    "visibility",
                ]),
                validate_keyframes: true,
            },
            allowed_font_urls: AMP_FONT_PROVIDERS.clone(),
        }
    }
}

impl Default for PlatformSpec {
    fn default() -> Self {
        PlatformSpec::amp()
    }
}
