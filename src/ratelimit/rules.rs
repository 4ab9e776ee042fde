//! Request classification rules.
//!
//! This module maps an outbound request's method and path to the
//! [`EndpointType`] whose bucket governs it. Rules are checked in order and
//! the first match wins; requests matching no rule are `general`.

use serde::{Deserialize, Serialize};

use super::endpoint::EndpointType;

/// A single classification rule.
///
/// The prefix matches whole path segments, so `/stats` matches `/stats` and
/// `/stats/outbound` but not `/statsd`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRule {
    /// HTTP method to match (if not set, matches any method)
    #[serde(default)]
    pub method: Option<String>,
    /// Path prefix to match, after the API version segment is removed
    pub path_prefix: String,
    /// Category assigned on a match
    pub endpoint: EndpointType,
}

impl ClassificationRule {
    /// Create a rule matching any method.
    pub fn new(path_prefix: impl Into<String>, endpoint: EndpointType) -> Self {
        Self {
            method: None,
            path_prefix: path_prefix.into(),
            endpoint,
        }
    }

    /// Restrict the rule to one method.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Check the rule against an already normalized path.
    fn matches(&self, method: &str, path: &str) -> bool {
        let method_matches = match &self.method {
            Some(m) => m.eq_ignore_ascii_case(method.trim()),
            None => true,
        };

        method_matches && segment_prefix(path, &normalize_path(&self.path_prefix))
    }
}

/// An ordered list of classification rules with a `general` fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Classifier {
    rules: Vec<ClassificationRule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(vec![
            ClassificationRule::new("/stats", EndpointType::Statistics),
            ClassificationRule::new("/email", EndpointType::SendMessage).with_method("POST"),
            ClassificationRule::new("/messages", EndpointType::SendMessage).with_method("POST"),
        ])
    }
}

impl Classifier {
    /// Create a classifier from explicit rules.
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    /// Use `rules` if any are given, the built-in rules otherwise.
    pub fn from_rules_or_default(rules: &[ClassificationRule]) -> Self {
        if rules.is_empty() {
            Self::default()
        } else {
            Self::new(rules.to_vec())
        }
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    /// Resolve the category for a request. Always returns a category.
    pub fn classify(&self, method: &str, path: &str) -> EndpointType {
        let path = normalize_path(path);

        self.rules
            .iter()
            .find(|rule| rule.matches(method, &path))
            .map(|rule| rule.endpoint)
            .unwrap_or(EndpointType::General)
    }
}

impl From<Vec<ClassificationRule>> for Classifier {
    fn from(rules: Vec<ClassificationRule>) -> Self {
        Self::new(rules)
    }
}

/// Lower-case the path, drop query and fragment, drop trailing slashes and
/// a leading API version segment such as `/v3`.
fn normalize_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<String> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.to_ascii_lowercase())
        .collect();

    let skip = match segments.first() {
        Some(first) if is_version_segment(first) => 1,
        _ => 0,
    };

    format!("/{}", segments[skip..].join("/"))
}

fn is_version_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    chars.next() == Some('v') && {
        let rest = chars.as_str();
        !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
    }
}

fn segment_prefix(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_any_method() {
        let classifier = Classifier::default();
        assert_eq!(classifier.classify("GET", "/stats"), EndpointType::Statistics);
        assert_eq!(
            classifier.classify("GET", "/stats/outbound/bounces?fromdate=2024-01-01"),
            EndpointType::Statistics
        );
        assert_eq!(classifier.classify("post", "/v3/stats/"), EndpointType::Statistics);
    }

    #[test]
    fn test_send_requires_post() {
        let classifier = Classifier::default();
        assert_eq!(classifier.classify("POST", "/email"), EndpointType::SendMessage);
        assert_eq!(classifier.classify("post", "/email/batch"), EndpointType::SendMessage);
        assert_eq!(classifier.classify("POST", "/v1/messages"), EndpointType::SendMessage);

        // Reading messages is ordinary traffic.
        assert_eq!(classifier.classify("GET", "/messages/outbound"), EndpointType::General);
    }

    #[test]
    fn test_prefix_matches_whole_segments() {
        let classifier = Classifier::default();
        assert_eq!(classifier.classify("GET", "/statsd"), EndpointType::General);
        assert_eq!(classifier.classify("POST", "/emails"), EndpointType::General);
    }

    #[test]
    fn test_fallback_is_general() {
        let classifier = Classifier::default();
        for (method, path) in [
            ("GET", "/templates"),
            ("DELETE", "/bounces/42"),
            ("", ""),
            ("PATCH", "?x=1"),
            ("GET", "/v2"),
            ("GET", "//"),
        ] {
            assert_eq!(classifier.classify(method, path), EndpointType::General);
        }
    }

    #[test]
    fn test_first_match_wins() {
        let classifier = Classifier::new(vec![
            ClassificationRule::new("/email/batch", EndpointType::General),
            ClassificationRule::new("/email", EndpointType::SendMessage),
        ]);
        assert_eq!(classifier.classify("POST", "/email/batch"), EndpointType::General);
        assert_eq!(classifier.classify("POST", "/email"), EndpointType::SendMessage);
    }

    #[test]
    fn test_empty_rules_fall_back_to_defaults() {
        assert_eq!(Classifier::from_rules_or_default(&[]), Classifier::default());

        let rules = vec![ClassificationRule::new("/", EndpointType::Statistics)];
        let classifier = Classifier::from_rules_or_default(&rules);
        assert_eq!(classifier.classify("GET", "/anything"), EndpointType::Statistics);
    }

    #[test]
    fn test_parse_rules_from_yaml() {
        let yaml = r#"
- path_prefix: /stats
  endpoint: statistics
- method: POST
  path_prefix: /email
  endpoint: send_message
"#;
        let classifier: Classifier = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(classifier.rules().len(), 2);
        assert_eq!(classifier, Classifier::from(Classifier::default().rules()[..2].to_vec()));
    }

    #[test]
    fn test_version_segment_detection() {
        assert!(is_version_segment("v1"));
        assert!(is_version_segment("v10"));
        assert!(!is_version_segment("v"));
        assert!(!is_version_segment("vx"));
        assert!(!is_version_segment("stats"));
    }
}
