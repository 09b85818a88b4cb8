//! Wildcard include/exclude filtering for captured records.

use regex::Regex;

use crate::record::Record;
use crate::{CaptureError, Result};

/// Uncompiled filter criteria.
///
/// Host and path patterns support `*` (any run of characters) and `?`
/// (exactly one character); every other character is literal. Method
/// matching is case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    pub include_hosts: Vec<String>,
    pub exclude_hosts: Vec<String>,
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    pub include_methods: Vec<String>,
    pub exclude_methods: Vec<String>,
    pub include_status: Vec<u16>,
    pub exclude_status: Vec<u16>,
    /// Minimum status code to include (default 0).
    pub min_status: u16,
    /// Maximum status code to include (default 999, set by [`FilterConfig::new`]).
    pub max_status: u16,
}

impl FilterConfig {
    /// Creates an empty (allow-all) configuration with the default status
    /// range 0..=999.
    pub fn new() -> Self {
        Self {
            max_status: 999,
            ..Self::default()
        }
    }

    /// Compiles all wildcard patterns into anchored regexes.
    pub fn compile(self) -> Result<Filter> {
        Ok(Filter {
            include_hosts: compile_patterns(&self.include_hosts)?,
            exclude_hosts: compile_patterns(&self.exclude_hosts)?,
            include_paths: compile_patterns(&self.include_paths)?,
            exclude_paths: compile_patterns(&self.exclude_paths)?,
            config: self,
        })
    }
}

/// A compiled filter. The regex objects never leave this module.
#[derive(Debug, Clone)]
pub struct Filter {
    config: FilterConfig,
    include_hosts: Vec<Regex>,
    exclude_hosts: Vec<Regex>,
    include_paths: Vec<Regex>,
    exclude_paths: Vec<Regex>,
}

impl Filter {
    /// An allow-all filter.
    pub fn allow_all() -> Self {
        FilterConfig::new().compile().expect("empty filter compiles")
    }

    /// Checks the request side: host, path, and method must all pass.
    pub fn matches_request(&self, host: &str, path: &str, method: &str) -> bool {
        self.match_lists(host, &self.include_hosts, &self.exclude_hosts)
            && self.match_lists(path, &self.include_paths, &self.exclude_paths)
            && self.match_method(method)
    }

    /// Checks the response side: status within range, in the include set if
    /// one is configured, and not in the exclude set.
    pub fn matches_response(&self, status: u16) -> bool {
        if status < self.config.min_status || status > self.config.max_status {
            return false;
        }
        if !self.config.include_status.is_empty()
            && !self.config.include_status.contains(&status)
        {
            return false;
        }
        !self.config.exclude_status.contains(&status)
    }

    /// Checks a complete record against both sides.
    pub fn matches(&self, rec: &Record) -> bool {
        self.matches_request(&rec.request.host, &rec.request.path, &rec.request.method)
            && self.matches_response(rec.response.status)
    }

    fn match_lists(&self, input: &str, include: &[Regex], exclude: &[Regex]) -> bool {
        // A non-empty include list requires at least one match; an empty
        // list is permissive. Exclusion always rejects.
        if !include.is_empty() && !include.iter().any(|re| re.is_match(input)) {
            return false;
        }
        !exclude.iter().any(|re| re.is_match(input))
    }

    fn match_method(&self, method: &str) -> bool {
        let method = method.to_ascii_uppercase();
        if !self.config.include_methods.is_empty()
            && !self
                .config
                .include_methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(&method))
        {
            return false;
        }
        !self
            .config
            .exclude_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&method))
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns.iter().map(|p| wildcard_to_regex(p)).collect()
}

/// Converts a wildcard pattern into an anchored regex: `*` becomes `.*`,
/// `?` becomes `.`, regex metacharacters are escaped.
fn wildcard_to_regex(pattern: &str) -> Result<Regex> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '.' | '+' | '^' | '$' | '[' | ']' | '(' | ')' | '{' | '}' | '|' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|source| CaptureError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled(config: FilterConfig) -> Filter {
        config.compile().unwrap()
    }

    #[test]
    fn empty_filter_allows_everything() {
        let f = Filter::allow_all();
        assert!(f.matches_request("any.host", "/any/path", "GET"));
        assert!(f.matches_response(200));
        assert!(f.matches_response(0));
        assert!(f.matches_response(999));
    }

    #[test]
    fn wildcard_star_matches_any_run() {
        let f = compiled(FilterConfig {
            include_hosts: vec!["*.example.com".into()],
            ..FilterConfig::new()
        });
        assert!(f.matches_request("api.example.com", "/", "GET"));
        assert!(f.matches_request("a.b.example.com", "/", "GET"));
        assert!(!f.matches_request("example.com", "/", "GET"));
        assert!(!f.matches_request("example.org", "/", "GET"));
    }

    #[test]
    fn wildcard_question_matches_one_char() {
        let f = compiled(FilterConfig {
            include_paths: vec!["/v?/users".into()],
            ..FilterConfig::new()
        });
        assert!(f.matches_request("h", "/v1/users", "GET"));
        assert!(f.matches_request("h", "/v2/users", "GET"));
        assert!(!f.matches_request("h", "/v10/users", "GET"));
        assert!(!f.matches_request("h", "/v/users", "GET"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let f = compiled(FilterConfig {
            include_paths: vec!["/api/v1.0/(items)".into()],
            ..FilterConfig::new()
        });
        assert!(f.matches_request("h", "/api/v1.0/(items)", "GET"));
        assert!(!f.matches_request("h", "/api/v1x0/(items)", "GET"));
    }

    #[test]
    fn exclude_rejects_after_include() {
        let f = compiled(FilterConfig {
            include_paths: vec!["/api/*".into()],
            exclude_paths: vec!["*.js".into()],
            ..FilterConfig::new()
        });
        assert!(f.matches_request("h", "/api/users", "GET"));
        assert!(!f.matches_request("h", "/api/app.js", "GET"));
        assert!(!f.matches_request("h", "/health", "GET"));
    }

    #[test]
    fn method_matching_is_case_insensitive() {
        let f = compiled(FilterConfig {
            include_methods: vec!["get".into(), "Post".into()],
            ..FilterConfig::new()
        });
        assert!(f.matches_request("h", "/", "GET"));
        assert!(f.matches_request("h", "/", "post"));
        assert!(!f.matches_request("h", "/", "DELETE"));

        let f = compiled(FilterConfig {
            exclude_methods: vec!["OPTIONS".into()],
            ..FilterConfig::new()
        });
        assert!(!f.matches_request("h", "/", "options"));
        assert!(f.matches_request("h", "/", "GET"));
    }

    #[test]
    fn status_range_and_sets() {
        let f = compiled(FilterConfig {
            min_status: 200,
            max_status: 499,
            ..FilterConfig::default()
        });
        assert!(f.matches_response(200));
        assert!(f.matches_response(404));
        assert!(!f.matches_response(199));
        assert!(!f.matches_response(500));

        let f = compiled(FilterConfig {
            include_status: vec![200, 201],
            ..FilterConfig::new()
        });
        assert!(f.matches_response(200));
        assert!(!f.matches_response(204));

        let f = compiled(FilterConfig {
            exclude_status: vec![404],
            ..FilterConfig::new()
        });
        assert!(!f.matches_response(404));
        assert!(f.matches_response(200));
    }

    #[test]
    fn invalid_patterns_do_not_exist() {
        // Everything is escaped, so any pattern should compile.
        let f = FilterConfig {
            include_hosts: vec!["weird[{(pattern".into()],
            ..FilterConfig::new()
        }
        .compile();
        assert!(f.is_ok());
    }

    #[test]
    fn record_match_combines_both_sides() {
        use crate::record::{RequestRecord, ResponseRecord};

        let f = compiled(FilterConfig {
            include_hosts: vec!["api.*".into()],
            min_status: 200,
            max_status: 299,
            ..FilterConfig::default()
        });

        let mut rec = Record::started(RequestRecord {
            method: "GET".into(),
            host: "api.test".into(),
            path: "/".into(),
            ..RequestRecord::default()
        });
        rec.response = ResponseRecord {
            status: 200,
            ..ResponseRecord::default()
        };
        assert!(f.matches(&rec));

        rec.response.status = 500;
        assert!(!f.matches(&rec));

        rec.response.status = 200;
        rec.request.host = "web.test".into();
        assert!(!f.matches(&rec));
    }
}
