use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// A successful (2xx) reply from the chat endpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    /// The reply text, untrimmed.
    pub reply: String,
    /// Retrieved material supporting the reply.
    pub sources: Vec<Source>,
    /// The raw body text, set only when the body could not be parsed as
    /// a reply. In that case `reply` is empty and `sources` is empty.
    pub fallback: Option<String>,
}

impl ChatReply {
    /// Creates a reply with the given text and no sources.
    #[inline]
    pub fn with_text<S: Into<String>>(reply: S) -> Self {
        Self {
            reply: reply.into(),
            sources: vec![],
            fallback: None,
        }
    }

    /// Creates the reply used for a success body that didn't parse.
    #[inline]
    pub fn malformed<S: Into<String>>(raw: S) -> Self {
        Self {
            reply: String::new(),
            sources: vec![],
            fallback: Some(raw.into()),
        }
    }

    /// Attaches sources to the reply.
    #[inline]
    pub fn with_sources(mut self, sources: impl Into<Vec<Source>>) -> Self {
        self.sources = sources.into();
        self
    }

    /// Returns `true` if the body of this reply didn't parse.
    #[inline]
    pub fn is_malformed(&self) -> bool {
        self.fallback.is_some()
    }
}

/// A citation describing retrieved supporting material.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Identifier of the document.
    pub id: Option<String>,
    /// Human-readable title of the document.
    pub title: Option<String>,
    /// Retrieval score.
    pub score: Option<f64>,
}

impl Source {
    /// Returns the best label for this source: the title, or the id when
    /// the title is missing.
    pub fn label(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.is_empty())
            .or(self.id.as_deref())
            .unwrap_or("")
    }
}

impl Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (score {:.3})",
            self.label(),
            self.score.unwrap_or(0.0)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_label() {
        let source = Source {
            id: Some("doc-1".to_owned()),
            title: None,
            score: Some(0.91234),
        };
        assert_eq!(source.label(), "doc-1");
        assert_eq!(source.to_string(), "doc-1 (score 0.912)");

        let source = Source {
            id: Some("doc-1".to_owned()),
            title: Some("Handbook".to_owned()),
            score: None,
        };
        assert_eq!(source.to_string(), "Handbook (score 0.000)");
    }

    #[test]
    fn test_malformed_reply() {
        let reply = ChatReply::malformed("<html>oops</html>");
        assert!(reply.is_malformed());
        assert!(reply.reply.is_empty());
        assert!(!ChatReply::with_text("Hi").is_malformed());
    }
}
