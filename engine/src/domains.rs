//! Domain exclusion matching.
//!
//! Pure functions deciding whether a tab's URL is covered by the configured
//! exclusion patterns. Four pattern forms are recognized:
//!
//! | Pattern          | Matches                                                |
//! |------------------|--------------------------------------------------------|
//! | `example.com`    | the host exactly, or any subdomain (`a.example.com`)   |
//! | `*.example.com`  | exactly one label before the base (`a.example.com`),   |
//! |                  | not the base itself and not `a.b.example.com`          |
//! | `example.*`      | the base followed by a single TLD-like label           |
//! | other `*` forms  | general glob over the hostname                         |
//!
//! An unparseable URL is never excluded: an URL that cannot be parsed also
//! cannot be meaningfully protected, so the matcher fails open toward
//! allowing the close decision to proceed.
//!
//! All dynamic patterns are built from [`regex::escape`]d input so that
//! pattern strings are never interpreted as uncontrolled regex.

use regex::Regex;
use url::Url;

/// Returns `true` if the URL's hostname matches any exclusion pattern.
///
/// Patterns are evaluated in list order; the first match wins (the result is
/// a plain boolean OR, so ordering only affects which pattern short-circuits).
#[must_use]
pub fn is_excluded(url: &str, patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return false;
    }
    let Some(host) = hostname(url) else {
        return false;
    };
    patterns.iter().any(|pattern| matches(&host, pattern))
}

/// Extracts the hostname from a URL, or `None` if it cannot be parsed.
fn hostname(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
}

/// Tests a single hostname against a single pattern.
fn matches(host: &str, pattern: &str) -> bool {
    if pattern.contains('*') {
        let regex_pattern = if let Some(base) = pattern.strip_prefix("*.") {
            // One label before the base, and the base itself is excluded.
            // Multi-level subdomains (a.b.example.com) do not match; see
            // DESIGN.md for why this restriction is kept.
            format!("^[^.]+\\.{}$", regex::escape(base))
        } else if let Some(base) = pattern.strip_suffix(".*") {
            format!("^{}\\.[^.]+$", regex::escape(base))
        } else {
            // General glob: escape everything, then turn the escaped stars
            // back into wildcards. Unanchored, matching anywhere in the host.
            regex::escape(pattern).replace("\\*", ".*")
        };

        return Regex::new(&regex_pattern)
            .map(|re| re.is_match(host))
            .unwrap_or(false);
    }

    // Exact match, or subdomain with a dot boundary.
    host == pattern || host.ends_with(&format!(".{pattern}"))
}
