// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Trace filtering

use super::event::{ApiCategory, TraceEvent};

/// Filter rule for trace events
#[derive(Debug, Clone)]
pub enum FilterRule {
    /// Include all events
    All,
    /// Include only specific function names (exact match)
    Function(Vec<String>),
    /// Include functions matching a pattern (simple wildcard: * and ?)
    Pattern(String),
    /// Include only specific categories
    Category(Vec<ApiCategory>),
}

impl FilterRule {
    fn matches(&self, event: &TraceEvent) -> bool {
        match self {
            FilterRule::All => true,
            FilterRule::Function(names) => names.iter().any(|name| *name == event.function),
            FilterRule::Pattern(pattern) => matches_pattern(&event.function, pattern),
            FilterRule::Category(categories) => categories.contains(&event.category),
        }
    }
}

/// Trace filter; an event is traced when any rule matches
#[derive(Debug, Clone)]
pub struct TraceFilter {
    rules: Vec<FilterRule>,
}

impl Default for TraceFilter {
    fn default() -> Self {
        Self {
            rules: vec![FilterRule::All],
        }
    }
}

impl TraceFilter {
    /// Create a new filter that includes all events
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter rule
    ///
    /// The first rule added replaces the implicit `All`
    #[must_use]
    pub fn add_rule(mut self, rule: FilterRule) -> Self {
        if matches!(self.rules.as_slice(), [FilterRule::All]) {
            self.rules.clear();
        }
        self.rules.push(rule);
        self
    }

    pub fn should_trace(&self, event: &TraceEvent) -> bool {
        self.rules.is_empty() || self.rules.iter().any(|rule| rule.matches(event))
    }
}

/// Wildcard match; `*` is any run of characters, `?` exactly one
fn matches_pattern(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    let (mut t, mut p) = (0, 0);
    // Position of the last `*` seen and the text index it is matched up to
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            // Let the last `*` swallow one more character
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, t));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matching() {
        assert!(matches_pattern("CreateProcess", "Create*"));
        assert!(matches_pattern("TerminateProcess", "*Process"));
        assert!(matches_pattern("GetExitCodeProcess", "Get*Process"));
        assert!(matches_pattern("CloseHandle", "CloseHandle"));
        assert!(matches_pattern("CloseHandle", "*"));
        assert!(!matches_pattern("CloseHandle", "Create*"));
        assert!(!matches_pattern("SearchPath", "*Process"));

        assert!(matches_pattern("SearchPath", "Search????"));
        assert!(!matches_pattern("SearchPath", "Search???"));
        assert!(matches_pattern("aXbXc", "a*b*c"));
        assert!(!matches_pattern("", "?"));
    }

    #[test]
    fn test_filter_all() {
        let filter = TraceFilter::default();
        let event = TraceEvent::call("CreateProcess", ApiCategory::Process);
        assert!(filter.should_trace(&event));
    }

    #[test]
    fn test_filter_function() {
        let filter =
            TraceFilter::new().add_rule(FilterRule::Function(vec!["CreateProcess".to_string()]));

        assert!(filter.should_trace(&TraceEvent::call("CreateProcess", ApiCategory::Process)));
        assert!(!filter.should_trace(&TraceEvent::call("CloseHandle", ApiCategory::Process)));
    }

    #[test]
    fn test_filter_category_or_pattern() {
        let filter = TraceFilter::new()
            .add_rule(FilterRule::Category(vec![ApiCategory::Synchronization]))
            .add_rule(FilterRule::Pattern("Search*".to_string()));

        let wait = TraceEvent::call("WaitForSingleObject", ApiCategory::Synchronization);
        let search = TraceEvent::call("SearchPath", ApiCategory::FileSystem);
        let create = TraceEvent::call("CreateProcess", ApiCategory::Process);

        assert!(filter.should_trace(&wait));
        assert!(filter.should_trace(&search));
        assert!(!filter.should_trace(&create));
    }
}
