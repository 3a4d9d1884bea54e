//! Skip log: the audit record of manifest nodes that produced no item.

use serde::Serialize;

/// Why a manifest node or resource produced no content item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkipEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    pub reason: String,
}

/// Append-only list of skip entries for one conversion run
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct SkipLog {
    entries: Vec<SkipEntry>,
}

impl SkipLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a skipped node
    pub fn record(
        &mut self,
        id: Option<&str>,
        title: impl Into<String>,
        reason: impl Into<String>,
    ) {
        let entry = SkipEntry {
            id: id.map(str::to_string),
            title: title.into(),
            reason: reason.into(),
        };
        tracing::info!(
            id = entry.id.as_deref().unwrap_or("-"),
            title = %entry.title,
            reason = %entry.reason,
            "Skipped manifest node"
        );
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[SkipEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &SkipEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for SkipLog {
    type Item = SkipEntry;
    type IntoIter = std::vec::IntoIter<SkipEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
