use chrono::Utc;
use feed_core::{JsonPageStore, LocalPage, LocalPageStore, PageCursor, RawEntity};

fn temp_dir(name: &str) -> std::path::PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "feedcache_{}_{}",
        name,
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    dir
}

fn sample_page() -> LocalPage {
    LocalPage {
        entities: vec![
            RawEntity::new("urn:activity:1").with_owner("100"),
            RawEntity::new("urn:activity:2"),
        ],
        next_cursor: Some(PageCursor::from("c1")),
        stored_at: Utc::now(),
    }
}

#[tokio::test]
async fn pages_survive_reopen() {
    let dir = temp_dir("reopen");
    let path = dir.join("pages.json");

    let store = JsonPageStore::load_from(&path).await;
    store.put_local("feed/1?{}", sample_page()).await.unwrap();

    let reopened = JsonPageStore::load_from(&path).await;
    let page = reopened.get_local("feed/1?{}").await.unwrap().unwrap();
    assert_eq!(page.entities.len(), 2);
    assert_eq!(page.entities[0].owner_guid.as_deref(), Some("100"));
    assert_eq!(page.next_cursor, Some(PageCursor::from("c1")));

    reopened.remove_local("feed/1?{}").await.unwrap();
    let again = JsonPageStore::load_from(&path).await;
    assert!(again.keys().await.is_empty());

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn load_uses_tmp_fallback_on_corrupted_json() {
    let dir = temp_dir("corrupt");
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let path = dir.join("pages.json");

    tokio::fs::write(&path, b"{ this is not json ").await.unwrap();

    // A valid copy left behind by an interrupted write
    let writer = JsonPageStore::load_from(dir.join("other.json")).await;
    writer.put_local("feed/1?{}", sample_page()).await.unwrap();
    tokio::fs::copy(dir.join("other.json"), dir.join("pages.json.tmp"))
        .await
        .unwrap();

    let store = JsonPageStore::load_from(&path).await;
    assert_eq!(store.keys().await, vec!["feed/1?{}".to_owned()]);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn unreadable_store_starts_empty() {
    let dir = temp_dir("empty");
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let path = dir.join("pages.json");
    tokio::fs::write(&path, b"[[[").await.unwrap();

    let store = JsonPageStore::load_from(&path).await;
    assert!(store.get_local("feed/1?{}").await.unwrap().is_none());

    let _ = tokio::fs::remove_dir_all(&dir).await;
}
