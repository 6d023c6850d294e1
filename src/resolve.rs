//! Mapping stylesheet URLs onto validated local filesystem paths.

use std::path::{Path, PathBuf};

use log::warn;
use path_clean::PathClean;

/// Extensions a `<link rel=stylesheet>` href may carry.
const STYLESHEET_EXTENSIONS: [&str; 4] = ["css", "less", "scss", "sass"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    /// The URL does not end in a stylesheet file extension.
    BadExtension,
    /// No configured root matched, or the path escaped its root.
    NotFound,
}

/// Maps a stylesheet URL to a local file path, or rejects it.
pub trait UrlResolver {
    fn resolve(&self, href: &str) -> Result<PathBuf, ResolveError>;
}

/// One URL prefix served out of one local directory.
#[derive(Debug, Clone)]
pub struct PathRoot {
    pub url_prefix: String,
    pub dir: PathBuf,
}

/// Resolver over a fixed set of URL-prefix → directory roots
/// (content, includes, admin, ...). Rejects path traversal and
/// non-stylesheet extensions.
#[derive(Debug, Clone, Default)]
pub struct PathMapper {
    roots: Vec<PathRoot>,
}

impl PathMapper {
    pub fn new(roots: Vec<PathRoot>) -> Self {
        let roots = roots
            .into_iter()
            .map(|root| PathRoot {
                url_prefix: root.url_prefix,
                dir: root.dir.clean(),
            })
            .collect();
        PathMapper { roots }
    }

    pub fn single(url_prefix: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        PathMapper::new(vec![PathRoot {
            url_prefix: url_prefix.into(),
            dir: dir.into(),
        }])
    }
}

fn has_stylesheet_extension(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| {
            STYLESHEET_EXTENSIONS
                .iter()
                .any(|allowed| extension.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

impl UrlResolver for PathMapper {
    fn resolve(&self, href: &str) -> Result<PathBuf, ResolveError> {
        // The file lives at the path component; query strings are cache busters.
        let path_part = href
            .split_once(['?', '#'])
            .map(|(path, _)| path)
            .unwrap_or(href);

        if !has_stylesheet_extension(path_part) {
            return Err(ResolveError::BadExtension);
        }

        for root in &self.roots {
            let Some(rest) = path_part.strip_prefix(&root.url_prefix) else {
                continue;
            };
            let candidate = root.dir.join(rest.trim_start_matches('/')).clean();
            if !candidate.starts_with(&root.dir) {
                warn!(
                    "stylesheet URL {href} resolves outside its root {}",
                    root.dir.display()
                );
                return Err(ResolveError::NotFound);
            }
            if candidate.is_file() {
                return Ok(candidate);
            }
        }

        Err(ResolveError::NotFound)
    }
}
