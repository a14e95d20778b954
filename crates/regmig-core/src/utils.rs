//! Core utilities for regmig

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static ENV_VAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("env var pattern is valid")
});

/// Expand `${VAR}` and `$VAR` references from the process environment.
///
/// Unset variables expand to the empty string.
pub fn expand_env(content: &str) -> String {
    expand_with(content, |name| std::env::var(name).ok())
}

/// Expand variable references using `lookup` instead of the process environment
pub fn expand_with<F>(content: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ENV_VAR
        .replace_all(content, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            lookup(name).unwrap_or_default()
        })
        .into_owned()
}

/// Format a byte count for display
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_both_forms() {
        let lookup = |name: &str| match name {
            "USER" => Some("alice".to_string()),
            "TOKEN" => Some("t0k".to_string()),
            _ => None,
        };
        assert_eq!(
            expand_with("u=${USER} p=$TOKEN x=${MISSING}!", lookup),
            "u=alice p=t0k x=!"
        );
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(12), "12 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
