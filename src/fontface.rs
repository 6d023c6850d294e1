//! Rewriting `@font-face` `src:` values.
//!
//! Relative URLs are resolved against the origin stylesheet's directory,
//! and `data:` URLs are swapped for a guessed file URL so themes that ship
//! a font both embedded and as a sibling file end up with the file form.

use std::sync::LazyLock;

use url::Url;

/// The `url(...)` extractor needs a backreference to pair the quotes, so it
/// runs on the fancy-regex engine.
static SRC_URLS: LazyLock<fancy_regex::Regex> =
    LazyLock::new(|| fancy_regex::Regex::new(r#"url\s*\(\s*(['"]?)(.+?)\1\s*\)"#).unwrap());

/// Rewrites the URL components of a rendered `src:` value.
pub struct FontUrlNormalizer {
    base: Option<Url>,
}

impl FontUrlNormalizer {
    /// `stylesheet_url` is the URL the containing stylesheet was loaded
    /// from; relative font URLs resolve against its directory.
    pub fn new(stylesheet_url: Option<&str>) -> Self {
        FontUrlNormalizer {
            base: stylesheet_url.and_then(|url| Url::parse(url).ok()),
        }
    }

    /// Rewrite every `url(...)` component of a `src:` declaration value.
    pub fn normalize_src(&self, value: &str) -> String {
        // Resolve non-data URLs first; data URLs are then guessed from the
        // first resolved file URL in the same declaration.
        let mut resolved: Vec<String> = Vec::new();
        for capture in SRC_URLS.captures_iter(value).flatten() {
            let raw = &capture[2];
            resolved.push(if raw.starts_with("data:") {
                raw.to_string()
            } else {
                self.resolve(raw)
            });
        }

        let first_file = resolved
            .iter()
            .find(|url| !url.starts_with("data:"))
            .cloned();

        let mut index = 0;
        SRC_URLS
            .replace_all(value, |capture: &fancy_regex::Captures| {
                let rewritten = match (resolved.get(index), &first_file) {
                    (Some(url), Some(file)) if url.starts_with("data:") => {
                        guess_file_url(url, file).unwrap_or_else(|| url.clone())
                    }
                    (Some(url), _) => url.clone(),
                    (None, _) => capture[2].to_string(),
                };
                index += 1;
                format!("url({rewritten})")
            })
            .into_owned()
    }

    /// Resolve a relative URL against the stylesheet directory. Absolute
    /// URLs, absolute paths, and protocol-relative URLs pass through.
    fn resolve(&self, raw: &str) -> String {
        if raw.starts_with('/') || Url::parse(raw).is_ok() {
            return raw.to_string();
        }
        match &self.base {
            Some(base) => base
                .join(raw)
                .map(|joined| joined.to_string())
                .unwrap_or_else(|_| raw.to_string()),
            None => raw.to_string(),
        }
    }
}

/// Guess a file URL for a data URL: take a sibling file URL and replace its
/// extension with the data URL's mime subtype.
fn guess_file_url(data_url: &str, sibling: &str) -> Option<String> {
    let extension = data_url_extension(data_url)?;
    Some(replace_extension(sibling, &extension))
}

/// Extension implied by a data URL's mime type: the subtype after the last
/// `/`, with any `...-` token prefix stripped (`application/x-font-woff`
/// implies `woff`).
fn data_url_extension(data_url: &str) -> Option<String> {
    let mime = data_url
        .strip_prefix("data:")?
        .split([';', ','])
        .next()
        .filter(|mime| !mime.is_empty())?;
    let subtype = mime.rsplit('/').next()?;
    let extension = subtype.rsplit('-').next()?;
    if extension.is_empty() {
        return None;
    }
    Some(extension.to_string())
}

fn replace_extension(url: &str, extension: &str) -> String {
    let last_segment = url.rfind('/').map(|index| index + 1).unwrap_or(0);
    match url[last_segment..].rfind('.') {
        Some(dot) => format!("{}.{extension}", &url[..last_segment + dot]),
        None => format!("{url}.{extension}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_urls() {
        let normalizer = FontUrlNormalizer::new(Some("https://h/css/s.css"));
        assert_eq!(
            normalizer.normalize_src("url('./fonts/x.ttf') format('truetype')"),
            "url(https://h/css/fonts/x.ttf) format('truetype')"
        );
        assert_eq!(
            normalizer.normalize_src("url(fonts/x.woff2)"),
            "url(https://h/css/fonts/x.woff2)"
        );
    }

    #[test]
    fn leaves_absolute_urls_alone() {
        let normalizer = FontUrlNormalizer::new(Some("https://h/css/s.css"));
        assert_eq!(
            normalizer.normalize_src("url(https://cdn/x.woff)"),
            "url(https://cdn/x.woff)"
        );
        assert_eq!(normalizer.normalize_src("url(/x.woff)"), "url(/x.woff)");
        assert_eq!(
            normalizer.normalize_src("url(//cdn/x.woff)"),
            "url(//cdn/x.woff)"
        );
    }

    #[test]
    fn rewrites_data_urls_from_sibling_file() {
        let normalizer = FontUrlNormalizer::new(Some("https://h/css/s.css"));
        let out = normalizer.normalize_src(
            "url(data:font/woff2;base64,AAAA) format('woff2'),url('./fonts/x.ttf') format('truetype')",
        );
        assert_eq!(
            out,
            "url(https://h/css/fonts/x.woff2) format('woff2'),url(https://h/css/fonts/x.ttf) format('truetype')"
        );
    }

    #[test]
    fn strips_mime_token_prefix() {
        assert_eq!(
            data_url_extension("data:application/x-font-woff;base64,AA"),
            Some("woff".to_string())
        );
        assert_eq!(
            data_url_extension("data:font/woff2;base64,AA"),
            Some("woff2".to_string())
        );
        assert_eq!(data_url_extension("data:,plain"), None);
    }

    #[test]
    fn data_url_without_sibling_is_untouched() {
        let normalizer = FontUrlNormalizer::new(Some("https://h/css/s.css"));
        assert_eq!(
            normalizer.normalize_src("url(data:font/woff2;base64,AAAA)"),
            "url(data:font/woff2;base64,AAAA)"
        );
    }

    #[test]
    fn no_base_leaves_relative_urls() {
        let normalizer = FontUrlNormalizer::new(None);
        assert_eq!(
            normalizer.normalize_src("url(fonts/x.ttf)"),
            "url(fonts/x.ttf)"
        );
    }
}
