use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{FeedParams, PageCursor, RawEntity};
use crate::error::FeedError;

/// Everything a transport needs to fetch one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub endpoint: String,
    pub params: FeedParams,
    pub limit: usize,
    /// `None` requests the first page.
    pub offset: Option<PageCursor>,
    pub as_activities: bool,
    pub inject_boost: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RemotePage {
    #[serde(default)]
    pub entities: Vec<RawEntity>,
    #[serde(rename = "load-next", alias = "next_cursor", default)]
    pub next_cursor: Option<PageCursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_at: Option<usize>,
}

/// A page as persisted by a [`LocalPageStore`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalPage {
    pub entities: Vec<RawEntity>,
    #[serde(default)]
    pub next_cursor: Option<PageCursor>,
    pub stored_at: DateTime<Utc>,
}

impl LocalPage {
    pub fn from_remote(page: &RemotePage) -> Self {
        Self {
            entities: page.entities.clone(),
            next_cursor: page.next_cursor.clone(),
            stored_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn get(&self, request: &PageRequest) -> Result<RemotePage, FeedError>;
}

#[async_trait]
pub trait LocalPageStore: Send + Sync {
    /// `Ok(None)` when nothing is cached under `key`.
    async fn get_local(&self, key: &str) -> Result<Option<LocalPage>, FeedError>;

    async fn put_local(&self, key: &str, page: LocalPage) -> Result<(), FeedError>;

    async fn remove_local(&self, key: &str) -> Result<(), FeedError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_page_accepts_both_cursor_spellings() {
        let minds: RemotePage =
            serde_json::from_str(r#"{"entities":[{"urn":"a"}],"load-next":"c1"}"#).unwrap();
        let plain: RemotePage =
            serde_json::from_str(r#"{"entities":[],"next_cursor":12}"#).unwrap();
        assert_eq!(minds.next_cursor, Some(PageCursor::from("c1")));
        assert_eq!(plain.next_cursor, Some(PageCursor::Offset(12)));
        assert!(plain.entities.is_empty());
    }

    #[test]
    fn missing_cursor_is_none() {
        let page: RemotePage = serde_json::from_str(r#"{"entities":[]}"#).unwrap();
        assert_eq!(page.next_cursor, None);
        assert_eq!(page.fallback_at, None);
    }
}
