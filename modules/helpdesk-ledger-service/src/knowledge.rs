//! Static FAQ knowledge base loaded once at startup.

use crate::config::ConfigError;
use crate::normalize::normalize;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FaqEntry {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Result of looking a query up in the knowledge base
#[derive(Debug, PartialEq)]
pub enum KbMatch<'a> {
    Exact(&'a FaqEntry),
    /// Entries whose question contains the query, in file order
    Candidates(Vec<&'a FaqEntry>),
    NoMatch,
}

#[derive(Debug, Default)]
pub struct KnowledgeBase {
    entries: Vec<(String, FaqEntry)>,
}

impl KnowledgeBase {
    pub fn from_entries(entries: Vec<FaqEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|e| (normalize(&e.question), e))
                .collect(),
        }
    }

    /// A missing file yields an empty knowledge base; an unreadable or
    /// malformed one is a startup error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            log::warn!(
                "[KB] No knowledge base at {}, answering from an empty set",
                path.display()
            );
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::KnowledgeBase(format!("failed to read {}: {}", path.display(), e))
        })?;
        let entries: Vec<FaqEntry> = serde_json::from_str(&raw).map_err(|e| {
            ConfigError::KnowledgeBase(format!("failed to parse {}: {}", path.display(), e))
        })?;
        log::info!("[KB] Loaded {} entries from {}", entries.len(), path.display());
        Ok(Self::from_entries(entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, raw_query: &str) -> KbMatch<'_> {
        let key = normalize(raw_query);
        if let Some((_, entry)) = self.entries.iter().find(|(q, _)| *q == key) {
            return KbMatch::Exact(entry);
        }
        let candidates: Vec<&FaqEntry> = self
            .entries
            .iter()
            .filter(|(q, _)| q.contains(&key))
            .map(|(_, e)| e)
            .collect();
        if candidates.is_empty() {
            KbMatch::NoMatch
        } else {
            KbMatch::Candidates(candidates)
        }
    }
}
