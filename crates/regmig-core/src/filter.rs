//! Glob-style include/exclude matching for file paths and package names.
//!
//! Only two wildcards are understood: `*` matches within one path segment and
//! `**` matches across segments. Patterns using any other glob syntax
//! (`?`, `[`, `{`) are skipped with a warning.

use regex::Regex;
use tracing::warn;

const UNSUPPORTED_WILDCARDS: &[char] = &['?', '[', ']', '{', '}'];

/// Return the first unsupported wildcard character in `pattern`, if any
pub fn unsupported_wildcard(pattern: &str) -> Option<char> {
    pattern.chars().find(|c| UNSUPPORTED_WILDCARDS.contains(c))
}

/// Compile one glob pattern, or `None` if it uses unsupported syntax
pub fn compile_pattern(pattern: &str) -> Option<Regex> {
    if let Some(c) = unsupported_wildcard(pattern) {
        warn!(pattern, wildcard = %c, "Skipping pattern with unsupported wildcard");
        return None;
    }

    let glob = pattern.trim_start_matches('/');
    let mut expr = String::from("^");
    let mut rest = glob;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("**/") {
            expr.push_str("(?:.*/)?");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("**") {
            expr.push_str(".*");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('*') {
            expr.push_str("[^/]*");
            rest = tail;
        } else {
            let next = rest.find('*').unwrap_or(rest.len());
            expr.push_str(&regex::escape(&rest[..next]));
            rest = &rest[next..];
        }
    }
    expr.push('$');

    match Regex::new(&expr) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(pattern, error = %e, "Skipping pattern that failed to compile");
            None
        }
    }
}

/// True when `path` matches at least one of `patterns`
pub fn matches_pattern(path: &str, patterns: &[String]) -> bool {
    let candidate = path.trim_start_matches('/');
    patterns
        .iter()
        .filter_map(|p| compile_pattern(p))
        .any(|re| re.is_match(candidate))
}

/// Pre-compiled include/exclude filter.
///
/// When include patterns are present a path must match one of them; any
/// exclude match then removes it. If include patterns were given but none of
/// them compiled, nothing passes.
#[derive(Debug, Clone, Default)]
pub struct PatternFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    reject_all: bool,
}

impl PatternFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        let compiled: Vec<Regex> = include.iter().filter_map(|p| compile_pattern(p)).collect();
        let reject_all = !include.is_empty() && compiled.is_empty();
        if reject_all {
            warn!(
                patterns = ?include,
                "No usable include pattern; nothing will be migrated for this mapping"
            );
        }
        Self {
            include: compiled,
            exclude: exclude.iter().filter_map(|p| compile_pattern(p)).collect(),
            reject_all,
        }
    }

    pub fn allows(&self, path: &str) -> bool {
        if self.reject_all {
            return false;
        }
        let candidate = path.trim_start_matches('/');
        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(candidate)) {
            return false;
        }
        !self.exclude.iter().any(|re| re.is_match(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pats(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_double_star_crosses_segments() {
        assert!(matches_pattern("lib/a/b.txt", &pats(&["lib/**"])));
        assert!(matches_pattern("/lib/a/b.txt", &pats(&["lib/**"])));
    }

    #[test]
    fn test_single_star_stays_in_segment() {
        assert!(!matches_pattern("lib/a/b.txt", &pats(&["lib/*"])));
        assert!(matches_pattern("lib/a", &pats(&["lib/*"])));
    }

    #[test]
    fn test_leading_double_star_matches_any_depth() {
        let p = pats(&["**/*.pom"]);
        assert!(matches_pattern("a.pom", &p));
        assert!(matches_pattern("com/acme/lib/1.0/lib-1.0.pom", &p));
        assert!(!matches_pattern("com/acme/lib/1.0/lib-1.0.jar", &p));
    }

    #[test]
    fn test_unsupported_wildcards_are_skipped() {
        assert!(!matches_pattern("lib/a.txt", &pats(&["lib/?.txt"])));
        assert!(!matches_pattern("lib/a.txt", &pats(&["lib/[a].txt"])));
        assert!(!matches_pattern("lib/a.txt", &pats(&["lib/{a,b}.txt"])));
        // a valid sibling pattern still applies
        assert!(matches_pattern("lib/a.txt", &pats(&["lib/?.txt", "lib/*.txt"])));
    }

    #[test]
    fn test_literal_characters_are_escaped() {
        assert!(matches_pattern("pkg-1.0.0.tgz", &pats(&["pkg-1.0.0.tgz"])));
        assert!(!matches_pattern("pkg-1x0x0.tgz", &pats(&["pkg-1.0.0.tgz"])));
    }

    #[test]
    fn test_filter_applies_include_then_exclude() {
        let filter = PatternFilter::new(&pats(&["lib/**"]), &pats(&["**/*.tmp"]));
        assert!(filter.allows("/lib/a/b.txt"));
        assert!(!filter.allows("/lib/a/b.tmp"));
        assert!(!filter.allows("/docs/readme.md"));

        let exclude_only = PatternFilter::new(&[], &pats(&["*-1.1.0.tgz"]));
        assert!(exclude_only.allows("/pkg-1.0.0.tgz"));
        assert!(!exclude_only.allows("/pkg-1.1.0.tgz"));
        assert!(PatternFilter::default().allows("/anything"));
    }
    #[test]
    fn test_unusable_include_patterns_match_nothing() {
        let filter = PatternFilter::new(&pats(&["lib/?.jar", "lib/{a,b}.jar"]), &[]);
        assert!(!filter.allows("/lib/a.jar"));
        assert!(!filter.allows("/docs/readme.md"));

        let partly_usable = PatternFilter::new(&pats(&["lib/?.jar", "lib/*.jar"]), &[]);
        assert!(partly_usable.allows("/lib/a.jar"));
        assert!(!partly_usable.allows("/docs/readme.md"));
    }
}
