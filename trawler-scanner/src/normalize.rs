//! URL canonicalization and domain scoping.
//!
//! A [`NormalizedUrl`] is the dedup key for the whole crawl: two raw links
//! name the same page exactly when their normalized forms are equal.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::{ParseError, Url};

/// Canonical form of a page URL: scheme, authority, path without trailing
/// slashes (except the root path) and query. Never carries a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NormalizedUrl(String);

impl NormalizedUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parsed view of the key. Normalized keys always come from a parsed
    /// absolute URL, so re-parsing only fails if the value was forged.
    pub fn to_url(&self) -> Option<Url> {
        Url::parse(&self.0).ok()
    }

    /// Short page label used in recorded action captions: the path with
    /// slashes replaced by underscores, or `root` for the site root.
    pub fn page_label(&self) -> String {
        page_label(&self.0)
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Resolve `raw` against `base` and canonicalize it.
///
/// Returns `None` for anything that cannot be parsed or resolved; callers
/// treat that as "not a link" and move on.
pub fn normalize(raw: &str, base: &str) -> Option<NormalizedUrl> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let mut url = match Url::parse(raw) {
        Ok(url) => url,
        Err(ParseError::RelativeUrlWithoutBase) => Url::parse(base).ok()?.join(raw).ok()?,
        Err(_) => return None,
    };

    url.set_fragment(None);

    if url.cannot_be_a_base() {
        // mailto:, javascript:, data: ... keep them comparable but untouched
        return Some(NormalizedUrl(url.to_string()));
    }

    let trimmed = url.path().trim_end_matches('/').to_string();
    if trimmed.is_empty() {
        url.set_path("/");
    } else {
        url.set_path(&trimmed);
    }

    Some(NormalizedUrl(url.to_string()))
}

/// True when `candidate` shares scheme and authority with `home`, or is a
/// relative reference (no authority of its own, so same-origin by
/// construction).
pub fn in_domain(candidate: &str, home: &Url) -> bool {
    match Url::parse(candidate) {
        Ok(url) => {
            url.scheme() == home.scheme()
                && url.host_str() == home.host_str()
                && url.port_or_known_default() == home.port_or_known_default()
                && url.username() == home.username()
        }
        Err(ParseError::RelativeUrlWithoutBase) => true,
        Err(_) => false,
    }
}

/// Path-based caption used in action labels.
pub fn page_label(url: &str) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    let label = path.trim_matches('/').replace('/', "_");
    if label.is_empty() {
        "root".to_string()
    } else {
        label
    }
}
