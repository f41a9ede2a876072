use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request parameters for an endpoint. Ordered so the cache key is stable.
pub type FeedParams = BTreeMap<String, Value>;

/// Opaque pagination token returned by the server with each page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageCursor {
    Offset(u64),
    Token(String),
}

impl PageCursor {
    /// An empty token means the server has nothing after this page.
    pub fn is_empty(&self) -> bool {
        matches!(self, PageCursor::Token(token) if token.is_empty())
    }
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageCursor::Offset(offset) => write!(f, "{offset}"),
            PageCursor::Token(token) => f.write_str(token),
        }
    }
}

impl From<u64> for PageCursor {
    fn from(value: u64) -> Self {
        PageCursor::Offset(value)
    }
}

impl From<&str> for PageCursor {
    fn from(value: &str) -> Self {
        PageCursor::Token(value.to_owned())
    }
}

/// Identifies the cache an entity currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ListId(u64);

impl ListId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ListId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Entity as returned by the server or stored locally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawEntity {
    pub urn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_guid: Option<String>,
    #[serde(default)]
    pub boosted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_created: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl RawEntity {
    pub fn new(urn: impl Into<String>) -> Self {
        Self {
            urn: urn.into(),
            owner_guid: None,
            boosted: false,
            time_created: None,
            payload: Map::new(),
        }
    }

    pub fn with_owner(mut self, owner_guid: impl Into<String>) -> Self {
        self.owner_guid = Some(owner_guid.into());
        self
    }

    pub fn with_time_created(mut self, time_created: DateTime<Utc>) -> Self {
        self.time_created = Some(time_created);
        self
    }

    pub fn as_boosted(mut self) -> Self {
        self.boosted = true;
        self
    }

    pub fn key(&self) -> String {
        entity_key(&self.urn, self.boosted)
    }
}

fn entity_key(urn: &str, boosted: bool) -> String {
    if boosted {
        format!("{urn}:boosted")
    } else {
        urn.to_owned()
    }
}

/// Hydrated entity held by a [`PagedFeedCache`](crate::PagedFeedCache).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedEntity {
    pub urn: String,
    pub owner_guid: Option<String>,
    pub boosted: bool,
    pub time_created: Option<DateTime<Utc>>,
    /// 1-based index in the owning list.
    pub position: usize,
    pub list_id: Option<ListId>,
    pub visible: bool,
    pub payload: Map<String, Value>,
    scheduled: bool,
}

impl FeedEntity {
    /// Scheduled-ness is decided once, here, so counters stay consistent
    /// even after the publish time passes.
    pub fn hydrate(raw: RawEntity, now: DateTime<Utc>) -> Self {
        let scheduled = raw.time_created.map(|at| at > now).unwrap_or(false);
        Self {
            urn: raw.urn,
            owner_guid: raw.owner_guid,
            boosted: raw.boosted,
            time_created: raw.time_created,
            position: 0,
            list_id: None,
            visible: false,
            payload: raw.payload,
            scheduled,
        }
    }

    pub fn key(&self) -> String {
        entity_key(&self.urn, self.boosted)
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    pub fn is_owned_by(&self, owner_guid: &str) -> bool {
        self.owner_guid.as_deref() == Some(owner_guid)
    }
}

impl From<RawEntity> for FeedEntity {
    fn from(raw: RawEntity) -> Self {
        FeedEntity::hydrate(raw, Utc::now())
    }
}
