#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;

use feed_core::{FeedError, FeedTransport, PageCursor, PageRequest, RawEntity, RemotePage};

pub enum Reply {
    Page(RemotePage),
    Status(u16),
    Abort,
    Gated(oneshot::Receiver<Result<RemotePage, FeedError>>),
}

/// Transport answering from per-endpoint queues of scripted replies.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<PageRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, endpoint: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(endpoint.to_owned())
            .or_default()
            .push_back(reply);
    }

    pub fn push_page(&self, endpoint: &str, page: RemotePage) {
        self.push(endpoint, Reply::Page(page));
    }

    /// Queue a reply that resolves only when the returned sender fires.
    pub fn gate(&self, endpoint: &str) -> oneshot::Sender<Result<RemotePage, FeedError>> {
        let (tx, rx) = oneshot::channel();
        self.push(endpoint, Reply::Gated(rx));
        tx
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedTransport for ScriptedTransport {
    async fn get(&self, request: &PageRequest) -> Result<RemotePage, FeedError> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&request.endpoint)
            .and_then(VecDeque::pop_front);
        match reply {
            Some(Reply::Page(page)) => Ok(page),
            Some(Reply::Status(status)) => Err(FeedError::Status {
                status,
                url: request.endpoint.clone(),
            }),
            Some(Reply::Abort) => Err(FeedError::Abort),
            Some(Reply::Gated(rx)) => rx.await.unwrap_or(Err(FeedError::Abort)),
            None => panic!("no scripted reply left for {}", request.endpoint),
        }
    }
}

/// `n` entities named `{prefix}-0..n`.
pub fn page(prefix: &str, n: usize, next: Option<&str>) -> RemotePage {
    RemotePage {
        entities: (0..n).map(|i| RawEntity::new(format!("{prefix}-{i}"))).collect(),
        next_cursor: next.map(PageCursor::from),
        fallback_at: None,
    }
}

pub fn urns(entities: &[feed_core::FeedEntity]) -> Vec<String> {
    entities.iter().map(|e| e.urn.clone()).collect()
}
