pub mod cache;
pub mod config;
pub mod coordinator;
pub mod entity;
pub mod error;
pub mod http;
pub mod storage;
pub mod transport;
pub mod viewed;

pub use cache::{CacheStatus, FetchOutcome, PagedFeedCache};
pub use config::FeedConfig;
pub use coordinator::{CursorSnapshot, FetchCoordinator, FetchIdentity, FetchedPage, PageSource};
pub use entity::{FeedEntity, FeedParams, ListId, PageCursor, RawEntity};
pub use error::FeedError;
pub use http::HttpTransport;
pub use storage::JsonPageStore;
pub use transport::{FeedTransport, LocalPage, LocalPageStore, PageRequest, RemotePage};
pub use viewed::{Viewed, ViewedEvent};
