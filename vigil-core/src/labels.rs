//! Class label table

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// Maps 1-based class indices to class names. Index 0 is never valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    /// Load a UTF-8 label file: line N names class N.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read label file {}: {}", path.display(), e))
        })?;
        let table = Self::parse(&content);
        if table.is_empty() {
            return Err(Error::Config(format!("Label file {} is empty", path.display())));
        }
        Ok(table)
    }

    /// Parse label text. Surrounding whitespace of the whole text is ignored,
    /// interior lines are kept (even blank ones) so numbering stays aligned.
    pub fn parse(content: &str) -> Self {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Self { labels: Vec::new() };
        }
        let labels = trimmed
            .split('\n')
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect();
        Self { labels }
    }

    pub fn get(&self, index: i64) -> Option<&str> {
        if index < 1 {
            return None;
        }
        self.labels.get((index - 1) as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for LabelTable {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            labels: iter.into_iter().map(Into::into).collect(),
        }
    }
}
