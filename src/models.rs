// Core data structures for feedmix

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// An independent external content origin
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub url: String,
    pub active: bool,
    /// Higher values are fetched first by priority-aware strategies
    pub priority: i32,
    /// Rolling health score in [0, 1]
    pub health_score: f64,
    pub consecutive_failures: u32,
    pub quarantined_until: Option<DateTime<Utc>>,
}

impl Source {
    /// Create an active, fully healthy source
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            active: true,
            priority: 0,
            health_score: 1.0,
            consecutive_failures: 0,
            quarantined_until: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Current lifecycle state at `now`
    pub fn state_at(&self, now: DateTime<Utc>) -> SourceState {
        if !self.active {
            SourceState::Inactive
        } else if self.quarantined_until.is_some_and(|until| until > now) {
            SourceState::Quarantined
        } else {
            SourceState::Eligible
        }
    }
}

/// Lifecycle state of a source. A source is in exactly one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceState {
    Eligible,
    Quarantined,
    Inactive,
}

impl SourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eligible => "eligible",
            Self::Quarantined => "quarantined",
            Self::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for SourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A content item retrieved from a source
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Item {
    /// Identifier scoped to the source
    pub id: String,
    pub title: String,
    pub link: String,
    pub author: Option<String>,
    pub category: Option<String>,
    /// Source-provided guid, used for dedup when the link is unusable
    pub guid: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub source_id: String,
    /// Name of the strategy that produced this item
    pub strategy: Option<String>,
    pub retrieved_at: DateTime<Utc>,
}

impl Item {
    /// Create an item with the retrieval timestamp set to now
    pub fn new(
        source_id: impl Into<String>,
        id: impl Into<String>,
        title: impl Into<String>,
        link: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            link: link.into(),
            source_id: source_id.into(),
            retrieved_at: Utc::now(),
            ..Default::default()
        }
    }

    pub fn published(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }

    /// Timestamp used for recency ordering
    pub fn recency(&self) -> DateTime<Utc> {
        self.published_at.unwrap_or(self.retrieved_at)
    }

    /// Dedup key: SHA256 of the canonical link, falling back to the source guid
    pub fn dedup_key(&self) -> String {
        let basis = canonical_link(&self.link)
            .or_else(|| {
                self.guid
                    .as_deref()
                    .filter(|g| !g.trim().is_empty())
                    .map(|g| format!("guid:{}:{}", self.source_id, g.trim()))
            })
            .unwrap_or_else(|| format!("id:{}:{}", self.source_id, self.id));

        let mut hasher = Sha256::new();
        hasher.update(basis.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Sort items newest first
pub fn sort_by_recency(items: &mut [Item]) {
    items.sort_by(|a, b| b.recency().cmp(&a.recency()));
}

/// Normalize a link for deduplication.
///
/// Lowercases the host, drops the fragment, tracking parameters (`utm_*`)
/// and a trailing slash. Returns `None` for empty or unparsable links.
pub fn canonical_link(link: &str) -> Option<String> {
    let trimmed = link.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut url = Url::parse(trimmed).ok()?;
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let mut canonical = url.to_string();
    if canonical.ends_with('/') && url.path() != "/" {
        canonical.pop();
    }
    Some(canonical)
}
