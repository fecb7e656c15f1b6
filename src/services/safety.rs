//! Content-safety detector
//!
//! The pipeline hands the detector the whole collected field set in one
//! batched call before any write happens. The default implementation scans
//! against a configured word list; production deployments can substitute a
//! detection service behind the same trait.

use async_trait::async_trait;
use regex::Regex;

/// Collaborator contract: `flagged(strings) → bool` over one batch.
#[async_trait]
pub trait ContentDetector: Send + Sync {
    async fn flagged(&self, texts: &[String]) -> anyhow::Result<bool>;
}

/// Word-list detector with word-boundary, case-insensitive matching.
pub struct WordListDetector {
    matcher: Option<Regex>,
}

impl WordListDetector {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let escaped: Vec<String> = words
            .into_iter()
            .map(|w| regex::escape(w.as_ref()))
            .filter(|w| !w.is_empty())
            .collect();
        let matcher = if escaped.is_empty() {
            None
        } else {
            // The pattern is built from escaped literals, so it always compiles.
            Some(
                Regex::new(&format!(r"(?i)\b(?:{})\b", escaped.join("|")))
                    .expect("word-list pattern"),
            )
        };
        Self { matcher }
    }

    /// A detector that never flags anything.
    pub fn disabled() -> Self {
        Self { matcher: None }
    }
}

#[async_trait]
impl ContentDetector for WordListDetector {
    async fn flagged(&self, texts: &[String]) -> anyhow::Result<bool> {
        let Some(matcher) = &self.matcher else {
            return Ok(false);
        };
        Ok(texts.iter().any(|text| matcher.is_match(text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_word_boundary_matching() {
        let detector = WordListDetector::new(["scum"]);
        assert!(detector.flagged(&["total scum here".into()]).await.unwrap());
        assert!(detector.flagged(&["ok".into(), "SCUM".into()]).await.unwrap());
        // Substrings inside larger words do not match.
        assert!(!detector.flagged(&["scumbled eggs".into()]).await.unwrap());
    }

    #[tokio::test]
    async fn test_disabled_detector_never_flags() {
        let detector = WordListDetector::disabled();
        assert!(!detector.flagged(&["anything".into()]).await.unwrap());
    }
}
