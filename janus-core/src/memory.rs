use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FactLayer {
    Episodic,
    Conceptual,
    Semantic,
    Preference,
}

impl FactLayer {
    pub const ALL: [FactLayer; 4] = [
        FactLayer::Episodic,
        FactLayer::Conceptual,
        FactLayer::Semantic,
        FactLayer::Preference,
    ];

    /// Order in which layers are searched.
    pub const SEARCH_ORDER: [FactLayer; 4] = [
        FactLayer::Preference,
        FactLayer::Semantic,
        FactLayer::Conceptual,
        FactLayer::Episodic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Conceptual => "conceptual",
            Self::Semantic => "semantic",
            Self::Preference => "preference",
        }
    }
}

impl std::fmt::Display for FactLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FactLayer {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "episodic" => Ok(Self::Episodic),
            "conceptual" => Ok(Self::Conceptual),
            "semantic" => Ok(Self::Semantic),
            "preference" => Ok(Self::Preference),
            other => Err(MemoryError::UnknownLayer(other.to_string())),
        }
    }
}

/// Category under which reflex rule definitions are stored.
pub const REFLEX_RULE_CATEGORY: &str = "ReflexRule";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub category: String,
    pub content: String,
    pub source_task: String,
    pub created_at: DateTime<Utc>,
    pub layer: FactLayer,
}

impl Fact {
    pub fn new(
        layer: FactLayer,
        category: impl Into<String>,
        content: impl Into<String>,
        source_task: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            content: content.into(),
            source_task: source_task.into(),
            created_at: Utc::now(),
            layer,
        }
    }

    /// `true` when every whitespace token of `keyword` appears in the
    /// lowercased category and content.
    pub fn matches(&self, keyword: &str) -> bool {
        let haystack = format!("{} {}", self.category, self.content).to_lowercase();
        keyword
            .to_lowercase()
            .split_whitespace()
            .all(|token| haystack.contains(token))
    }
}
