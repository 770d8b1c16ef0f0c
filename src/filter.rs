//! Attachment filter: decides which attachments are never uploaded.
//!
//! Patterns are compiled once and never mutated afterwards. Order only
//! affects short-circuiting, not the outcome.

use regex::Regex;

use crate::error::ConfigError;

/// Patterns skipped in every deployment.
///
/// - `^AGB_`: terms and conditions PDFs sent alongside invoices
/// - `\.ics$`: calendar invites
/// - `^Receipt-`: payment-provider receipts that duplicate the invoice
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[r"^AGB_", r"\.ics$", r"^Receipt-"];

/// A single compiled ignore pattern.
#[derive(Debug, Clone)]
pub struct IgnorePattern {
    /// Source text, kept for logging.
    pub pattern: String,
    regex: Regex,
}

impl IgnorePattern {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(pattern).map_err(|e| ConfigError::InvalidValue {
            key: "ignore pattern".into(),
            message: format!("{pattern:?}: {e}"),
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, filename: &str) -> bool {
        self.regex.is_match(filename)
    }
}

/// Immutable set of filename ignore patterns.
#[derive(Debug, Clone)]
pub struct AttachmentFilter {
    patterns: Vec<IgnorePattern>,
}

impl AttachmentFilter {
    /// Filter with the built-in patterns only.
    pub fn default_patterns() -> Self {
        Self::from_patterns(DEFAULT_IGNORE_PATTERNS)
            .expect("built-in ignore patterns are valid regexes")
    }

    /// Filter with the built-in patterns followed by `extra`.
    pub fn with_defaults_and<S: AsRef<str>>(extra: &[S]) -> Result<Self, ConfigError> {
        let mut patterns = Self::default_patterns().patterns;
        for p in extra {
            patterns.push(IgnorePattern::new(p.as_ref())?);
        }
        Ok(Self { patterns })
    }

    /// Filter with exactly the given patterns.
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ConfigError> {
        let patterns = patterns
            .iter()
            .map(|p| IgnorePattern::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Filter that skips nothing.
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// The pattern that matches `filename`, if any.
    pub fn matching_pattern(&self, filename: &str) -> Option<&IgnorePattern> {
        self.patterns.iter().find(|p| p.is_match(filename))
    }

    /// Whether an attachment called `filename` should be skipped.
    pub fn should_skip(&self, filename: &str) -> bool {
        self.matching_pattern(filename).is_some()
    }

    pub fn patterns(&self) -> &[IgnorePattern] {
        &self.patterns
    }
}

impl Default for AttachmentFilter {
    fn default() -> Self {
        Self::default_patterns()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_terms_and_conditions() {
        let filter = AttachmentFilter::default();
        assert!(filter.should_skip("AGB_2024.pdf"));
        assert!(filter.should_skip("AGB_terms.pdf"));
    }

    #[test]
    fn skips_calendar_invites() {
        let filter = AttachmentFilter::default();
        assert!(filter.should_skip("event.ics"));
        assert!(filter.should_skip("Meeting Invite.ics"));
    }

    #[test]
    fn skips_payment_receipts() {
        let filter = AttachmentFilter::default();
        assert!(filter.should_skip("Receipt-2231-0042.pdf"));
    }

    #[test]
    fn keeps_invoices() {
        let filter = AttachmentFilter::default();
        assert!(!filter.should_skip("invoice.pdf"));
        assert!(!filter.should_skip("receipt.pdf"));
        assert!(!filter.should_skip("Rechnung_AGB_2024.pdf"));
    }

    #[test]
    fn ics_must_be_the_extension() {
        let filter = AttachmentFilter::default();
        assert!(!filter.should_skip("event.ics.pdf"));
        assert!(!filter.should_skip("topics.pdf"));
    }

    #[test]
    fn empty_filename_not_skipped_by_defaults() {
        let filter = AttachmentFilter::default();
        assert!(!filter.should_skip(""));
    }

    #[test]
    fn empty_filename_skipped_when_pattern_matches_it() {
        let filter = AttachmentFilter::from_patterns(&["^$"]).unwrap();
        assert!(filter.should_skip(""));
        assert!(!filter.should_skip("invoice.pdf"));
    }

    #[test]
    fn empty_filter_skips_nothing() {
        let filter = AttachmentFilter::empty();
        assert!(!filter.should_skip("AGB_2024.pdf"));
        assert!(!filter.should_skip("event.ics"));
    }

    #[test]
    fn order_does_not_change_outcome() {
        let forward = AttachmentFilter::from_patterns(&["^AGB_", r"\.ics$"]).unwrap();
        let reverse = AttachmentFilter::from_patterns(&[r"\.ics$", "^AGB_"]).unwrap();
        for name in ["AGB_x.ics", "AGB_1.pdf", "a.ics", "invoice.pdf"] {
            assert_eq!(forward.should_skip(name), reverse.should_skip(name), "{name}");
        }
    }

    #[test]
    fn matching_pattern_reports_first_match() {
        let filter = AttachmentFilter::default();
        let hit = filter.matching_pattern("AGB_calendar.ics").unwrap();
        assert_eq!(hit.pattern, "^AGB_");
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let err = AttachmentFilter::from_patterns(&["[a-"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
