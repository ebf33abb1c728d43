use crate::error::{ApiError, Result};
use std::fmt;

/// Validated user query. Holds the trimmed text; immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query(String);

impl Query {
    /// Validate raw input: must be non-blank and at most `max_chars`
    /// characters once trimmed.
    pub fn parse(raw: &str, max_chars: usize) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ApiError::InvalidInput("Query cannot be empty".to_string()));
        }

        let length = trimmed.chars().count();
        if length > max_chars {
            return Err(ApiError::InvalidInput(format!(
                "Query is too long ({} characters, maximum is {})",
                length, max_chars
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn preview(&self) -> String {
        const PREVIEW_CHARS: usize = 100;
        if self.0.chars().count() <= PREVIEW_CHARS {
            self.0.clone()
        } else {
            let head: String = self.0.chars().take(PREVIEW_CHARS).collect();
            format!("{}...", head)
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
