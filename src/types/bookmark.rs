use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::errors::SubmitError;

/// A saved bookmark as persisted by the backing store.
///
/// Records are never edited after creation: the store only adds or removes
/// whole values, so equality on every field is meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: String,
    pub title: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// A bookmark the user submitted but the backing store has not saved yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBookmark {
    pub title: String,
    pub url: String,
}

impl NewBookmark {
    /// Trims and validates raw form input.
    ///
    /// Both fields are required. The url must parse as an absolute URL.
    pub fn parse(title: &str, url: &str) -> Result<Self, SubmitError> {
        let title = title.trim();
        let url = url.trim();

        if title.is_empty() || url.is_empty() {
            return Err(SubmitError::Validation(
                "Title and URL are required.".to_string(),
            ));
        }

        Url::parse(url)
            .map_err(|e| SubmitError::Validation(format!("Invalid URL '{}': {}", url, e)))?;

        Ok(Self {
            title: title.to_string(),
            url: url.to_string(),
        })
    }
}
