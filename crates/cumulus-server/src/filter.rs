//! Project blocklist.
//!
//! A project is blocked if its id appears verbatim in the blocklist file or
//! matches one of the built-in patterns, case-insensitively.

use std::{collections::HashSet, io::ErrorKind, path::Path};

use crate::error::ServerError;

/// Substrings that block a project regardless of the blocklist file.
const BLOCKED_PATTERNS: &[&str] = &["sprunki", "incredibox"];

/// Decides which projects may open a room.
#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    blocked: HashSet<String>,
}

impl ProjectFilter {
    /// Filter with an explicit blocklist.
    pub fn new<I, T>(blocked: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self { blocked: blocked.into_iter().map(Into::into).collect() }
    }

    /// Load a newline-separated blocklist.
    ///
    /// A missing file yields an empty blocklist. Blank lines are skipped.
    ///
    /// # Errors
    ///
    /// `ServerError::Config` if the file exists but cannot be read.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(ServerError::Config(format!(
                    "cannot read blocklist {}: {e}",
                    path.display()
                )));
            },
        };

        let filter = Self::new(contents.lines().map(str::trim).filter(|line| !line.is_empty()));
        tracing::info!(entries = filter.len(), "blocked projects loaded");

        Ok(filter)
    }

    /// Whether a project may not open a room.
    pub fn is_blocked(&self, project_id: &str) -> bool {
        let lower = project_id.to_lowercase();

        BLOCKED_PATTERNS.iter().any(|pattern| lower.contains(pattern))
            || self.blocked.contains(project_id)
    }

    /// Number of blocklist entries (patterns excluded).
    pub fn len(&self) -> usize {
        self.blocked.len()
    }

    /// Whether the blocklist is empty.
    pub fn is_empty(&self) -> bool {
        self.blocked.is_empty()
    }
}
