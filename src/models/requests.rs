//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies.

use regex::Regex;
use serde::Deserialize;

use crate::cache::InvalidationPattern;

/// Maximum length of a deadline title
pub const MAX_TITLE_LENGTH: usize = 200;

/// Request body for POST /api/deadlines
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDeadlineRequest {
    /// Short description, e.g. "Round 2 application"
    pub title: String,
    /// Due date in ISO 8601 format
    pub due_date: String,
    /// School the deadline belongs to
    #[serde(default)]
    pub school_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CreateDeadlineRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.title.trim().is_empty() {
            return Some("Title cannot be empty".to_string());
        }
        if self.title.len() > MAX_TITLE_LENGTH {
            return Some(format!(
                "Title exceeds maximum length of {} characters",
                MAX_TITLE_LENGTH
            ));
        }
        if chrono::DateTime::parse_from_rfc3339(&self.due_date).is_err()
            && chrono::NaiveDate::parse_from_str(&self.due_date, "%Y-%m-%d").is_err()
        {
            return Some("Due date must be an ISO 8601 date".to_string());
        }
        None
    }
}

/// Request body for POST /cache/invalidate
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateRequest {
    /// Substring, or regular expression when `regex` is set
    pub pattern: String,
    #[serde(default)]
    pub regex: bool,
}

impl InvalidateRequest {
    /// Converts the request into a matcher.
    pub fn to_pattern(&self) -> Result<InvalidationPattern, String> {
        if self.pattern.is_empty() {
            return Err("Pattern cannot be empty".to_string());
        }
        if self.regex {
            Regex::new(&self.pattern)
                .map(InvalidationPattern::Regex)
                .map_err(|e| format!("Invalid regex: {}", e))
        } else {
            Ok(InvalidationPattern::Substring(self.pattern.clone()))
        }
    }
}
