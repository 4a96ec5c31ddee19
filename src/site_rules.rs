//! Per-site enable/disable rules
//!
//! Rules are checked in order and the first matching rule decides. A pattern
//! matches when it is a literal substring of the URL or host, or when its
//! wildcard form (`*` any run, `?` any single character) is found in the URL.
//! With no matching rule the site is enabled.

use regex::Regex;
use tracing::debug;

use crate::settings::SiteRule;

/// URL and host of the page a runtime is attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    pub url: String,
    pub host: String,
}

impl PageLocation {
    /// Derive the host from `url`; an unparsable URL keeps an empty host
    pub fn parse(url: &str) -> Self {
        let host = match url::Url::parse(url) {
            Ok(parsed) => parsed.host_str().unwrap_or_default().to_string(),
            Err(e) => {
                debug!(url = %url, error = %e, "Could not parse page URL, host left empty");
                String::new()
            }
        };
        Self {
            url: url.to_string(),
            host,
        }
    }
}

/// Translate a wildcard pattern into a regular expression
pub fn wildcard_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut expr = String::with_capacity(pattern.len() * 2);
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    Regex::new(&expr)
}

/// Whether `pattern` matches `url` under wildcard translation
///
/// A pattern that does not compile never matches.
pub fn matches_wildcard(url: &str, pattern: &str) -> bool {
    match wildcard_regex(pattern) {
        Ok(re) => re.is_match(url),
        Err(e) => {
            debug!(pattern = %pattern, error = %e, "Wildcard pattern failed to compile, treating as non-matching");
            false
        }
    }
}

fn rule_matches(rule: &SiteRule, url: &str, host: &str) -> bool {
    url.contains(&rule.pattern) || host.contains(&rule.pattern) || matches_wildcard(url, &rule.pattern)
}

/// Index of the first rule matching the page, if any
pub fn first_match(rules: &[SiteRule], url: &str, host: &str) -> Option<usize> {
    rules.iter().position(|rule| rule_matches(rule, url, host))
}

/// Decide whether blurring applies to the page
pub fn is_site_enabled(rules: &[SiteRule], url: &str, host: &str) -> bool {
    match first_match(rules, url, host) {
        Some(index) => {
            let rule = &rules[index];
            debug!(pattern = %rule.pattern, enabled = rule.enabled, index, "Site rule matched");
            rule.enabled
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str, enabled: bool) -> SiteRule {
        SiteRule::new(pattern, enabled)
    }

    #[test]
    fn test_empty_rules_enable_every_site() {
        assert!(is_site_enabled(&[], "https://example.com/", "example.com"));
        assert!(is_site_enabled(&[], "", ""));
    }

    #[test]
    fn test_no_matching_rule_fails_open() {
        let rules = [rule("other.org", false), rule("*.internal", false)];
        assert!(is_site_enabled(&rules, "https://example.com/page", "example.com"));
    }

    #[test]
    fn test_first_match_wins() {
        let rules = [rule("a.com", false), rule("a.com", true)];
        assert!(!is_site_enabled(&rules, "https://a.com/index", "a.com"));

        let rules = [rule("a.com", true), rule("a.com", false)];
        assert!(is_site_enabled(&rules, "https://a.com/index", "a.com"));
    }

    #[test]
    fn test_host_substring_matches() {
        let rules = [rule("news.site", false)];
        assert!(!is_site_enabled(&rules, "https://news.site/", "news.site"));
        // Host-only match, URL passed without the host
        assert!(!is_site_enabled(&rules, "/relative", "news.site"));
    }

    #[test]
    fn test_wildcard_star() {
        assert!(matches_wildcard("https://docs.example.com/x", "*.example.com"));
        let rules = [rule("*.example.com", false)];
        assert!(!is_site_enabled(&rules, "https://docs.example.com/x", "docs.example.com"));
    }

    #[test]
    fn test_wildcard_question_mark() {
        assert!(matches_wildcard("example.com", "ex?mple.com"));
        assert!(!matches_wildcard("exxxmple.com", "ex?mple.com"));
    }

    #[test]
    fn test_wildcard_dot_is_literal() {
        // '.' must not act as a regex wildcard
        assert!(!matches_wildcard("exampleXcom", "example.com"));
    }

    #[test]
    fn test_regex_metacharacters_do_not_break_matching() {
        assert!(matches_wildcard("https://a.com/(x)", "a.com/(x)"));
        assert!(!matches_wildcard("https://a.com/", "[unclosed"));
        let rules = [rule("[unclosed", false)];
        assert!(is_site_enabled(&rules, "https://a.com/", "a.com"));
    }

    #[test]
    fn test_first_match_index() {
        let rules = [rule("b.com", true), rule("*a.com*", false)];
        assert_eq!(first_match(&rules, "https://a.com/", "a.com"), Some(1));
        assert_eq!(first_match(&rules, "https://c.com/", "c.com"), None);
    }

    #[test]
    fn test_page_location_parse() {
        let location = PageLocation::parse("https://docs.example.com:8080/path?q=1");
        assert_eq!(location.host, "docs.example.com");
        assert_eq!(location.url, "https://docs.example.com:8080/path?q=1");

        let broken = PageLocation::parse("not a url");
        assert_eq!(broken.host, "");
    }
}
