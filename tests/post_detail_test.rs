mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    article, comment, seed_user, sqlite_store, BrokenArticleReads, CountingStore, DelayingStore,
};
use dreamscape::db::models::UNKNOWN_USER;
use dreamscape::detail::{fetch_post_detail, DetailLoader, FetchError};
use dreamscape::store::{self, DynDocumentStore, StoreError, TimeoutStore, READ_FAN_OUT};

#[tokio::test]
async fn missing_author_becomes_unknown_user() {
    let (store, _tmp) = sqlite_store();
    store::put(&store, &article("a1", "deleted-user", 0)).await.unwrap();

    let detail = fetch_post_detail(&store, "a1", None).await.unwrap();

    assert_eq!(detail.author.display_name, UNKNOWN_USER);
    assert!(!detail.author.resolved);
    assert_eq!(detail.title, "Dream a1");
}

#[tokio::test]
async fn missing_article_is_not_found() {
    let (store, _tmp) = sqlite_store();
    let result = fetch_post_detail(&store, "ghost", Some("u1")).await;
    assert!(matches!(result, Err(FetchError::NotFound(_))));
}

#[tokio::test]
async fn article_read_error_fails_whole_fetch() {
    let (inner, _tmp) = sqlite_store();
    seed_user(&inner, "author", "Author").await;
    store::put(&inner, &article("a1", "author", 0)).await.unwrap();
    store::put(&inner, &comment("c1", "a1", "author", 5)).await.unwrap();
    let store = BrokenArticleReads::new(inner);

    let result = fetch_post_detail(&store, "a1", Some("author")).await;
    assert!(matches!(
        result,
        Err(FetchError::ReadFailed(StoreError::Task(_)))
    ));
}

#[tokio::test]
async fn commenter_lookups_are_bounded() {
    let (inner, _tmp) = sqlite_store();
    store::put(&inner, &article("a1", "author", 0)).await.unwrap();
    for i in 0..16 {
        let user_id = format!("user{:02}", i);
        seed_user(&inner, &user_id, &format!("Name {}", i)).await;
        store::put(&inner, &comment(&format!("c{:02}", i), "a1", &user_id, 100 - i))
            .await
            .unwrap();
    }
    let store = CountingStore::new(inner);

    let detail = fetch_post_detail(&store, "a1", None).await.unwrap();

    assert_eq!(detail.comments.len(), 16);
    assert_eq!(detail.comments[15].author.display_name, "Name 15");
    // One slot for the article author running alongside the commenters
    assert!(store.peak() <= READ_FAN_OUT + 1);
}

#[tokio::test]
async fn zero_comments_yield_empty_list() {
    let (store, _tmp) = sqlite_store();
    seed_user(&store, "author", "Author").await;
    store::put(&store, &article("a1", "author", 5)).await.unwrap();

    let detail = fetch_post_detail(&store, "a1", None).await.unwrap();
    assert!(detail.comments.is_empty());
    assert_eq!(detail.like_count, 5);
}

#[tokio::test]
async fn comments_keep_creation_order_when_lookups_finish_in_reverse() {
    let (inner, _tmp) = sqlite_store();
    seed_user(&inner, "author", "Author").await;
    seed_user(&inner, "ua", "Ada").await;
    seed_user(&inner, "ub", "Bo").await;
    seed_user(&inner, "uc", "Cy").await;
    store::put(&inner, &article("a1", "author", 0)).await.unwrap();
    store::put(&inner, &comment("c1", "a1", "ua", 30)).await.unwrap();
    store::put(&inner, &comment("c2", "a1", "ub", 20)).await.unwrap();
    store::put(&inner, &comment("c3", "a1", "uc", 10)).await.unwrap();

    // The oldest comment's author answers last
    let store = DelayingStore::new(inner, &[("ua", 120), ("ub", 60), ("uc", 0)]);

    let detail = fetch_post_detail(&store, "a1", None).await.unwrap();

    let ids: Vec<_> = detail.comments.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2", "c3"]);
    let names: Vec<_> = detail
        .comments
        .iter()
        .map(|c| c.author.display_name.as_str())
        .collect();
    assert_eq!(names, vec!["Ada", "Bo", "Cy"]);

    let finished: Vec<_> = store
        .completion_order()
        .into_iter()
        .filter(|id| id.starts_with('u') && id.len() == 2)
        .collect();
    assert_eq!(finished, vec!["uc", "ub", "ua"]);
}

#[tokio::test]
async fn many_comments_all_resolve_before_result() {
    let (inner, _tmp) = sqlite_store();
    store::put(&inner, &article("a1", "author", 0)).await.unwrap();

    let n = 12;
    let mut delays = Vec::new();
    for i in 0..n {
        let user_id = format!("user{:02}", i);
        seed_user(&inner, &user_id, &format!("Name {}", i)).await;
        let c = comment(&format!("c{:02}", i), "a1", &user_id, (n - i) as i64);
        store::put(&inner, &c).await.unwrap();
        delays.push((user_id, ((n - i) * 5) as u64));
    }
    let delays: Vec<(&str, u64)> = delays.iter().map(|(id, ms)| (id.as_str(), *ms)).collect();
    let store = DelayingStore::new(inner, &delays);

    let detail = fetch_post_detail(&store, "a1", None).await.unwrap();

    assert_eq!(detail.comments.len(), n);
    for (i, c) in detail.comments.iter().enumerate() {
        assert_eq!(c.id, format!("c{:02}", i));
        assert_eq!(c.author.display_name, format!("Name {}", i));
    }
}

#[tokio::test]
async fn deleted_commenter_keeps_comment_with_placeholder() {
    let (store, _tmp) = sqlite_store();
    seed_user(&store, "author", "Author").await;
    seed_user(&store, "u1", "One").await;
    seed_user(&store, "u3", "Three").await;
    store::put(&store, &article("a1", "author", 0)).await.unwrap();
    store::put(&store, &comment("c1", "a1", "u1", 30)).await.unwrap();
    store::put(&store, &comment("c2", "a1", "u2-deleted", 20)).await.unwrap();
    store::put(&store, &comment("c3", "a1", "u3", 10)).await.unwrap();

    let detail = fetch_post_detail(&store, "a1", None).await.unwrap();

    assert_eq!(detail.comments.len(), 3);
    let ids: Vec<_> = detail.comments.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2", "c3"]);
    assert_eq!(detail.comments[0].author.display_name, "One");
    assert_eq!(detail.comments[1].author.display_name, UNKNOWN_USER);
    assert!(!detail.comments[1].author.resolved);
    assert_eq!(detail.comments[2].author.display_name, "Three");
}

#[tokio::test]
async fn slow_commenter_lookup_degrades_to_placeholder() {
    let (inner, _tmp) = sqlite_store();
    seed_user(&inner, "author", "Author").await;
    seed_user(&inner, "slow", "Slow").await;
    store::put(&inner, &article("a1", "author", 0)).await.unwrap();
    store::put(&inner, &comment("c1", "a1", "slow", 5)).await.unwrap();

    let store = TimeoutStore::new(
        DelayingStore::new(inner, &[("slow", 500)]),
        Duration::from_millis(100),
    );

    let detail = fetch_post_detail(&store, "a1", None).await.unwrap();
    assert_eq!(detail.comments.len(), 1);
    assert_eq!(detail.comments[0].author.display_name, UNKNOWN_USER);
    assert_eq!(detail.author.display_name, "Author");
}

#[tokio::test]
async fn viewer_flags_follow_membership() {
    let (store, _tmp) = sqlite_store();
    seed_user(&store, "author", "Author").await;
    let mut viewer = dreamscape::db::models::User::new("viewer", "Viewer");
    viewer.saved_article_ids.push("a1".to_string());
    store::put(&store, &viewer).await.unwrap();
    store::put(&store, &article("a1", "author", 3)).await.unwrap();

    let detail = fetch_post_detail(&store, "a1", Some("viewer")).await.unwrap();
    assert!(!detail.viewer_liked);
    assert!(detail.viewer_saved);

    // A session whose user document is gone is treated as "not liked"
    let detail = fetch_post_detail(&store, "a1", Some("vanished")).await.unwrap();
    assert!(!detail.viewer_liked);
}

#[tokio::test]
async fn dismissing_mid_load_publishes_nothing() {
    let (inner, _tmp) = sqlite_store();
    seed_user(&inner, "author", "Author").await;
    store::put(&inner, &article("a1", "author", 0)).await.unwrap();

    let store: DynDocumentStore = Arc::new(DelayingStore::new(inner, &[("author", 2_000)]));
    let loader = DetailLoader::new(store);

    let started = std::time::Instant::now();
    let (result, ()) = tokio::join!(loader.load("a1", None), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        loader.dismiss();
    });

    assert!(result.is_none());
    assert!(started.elapsed() < Duration::from_millis(1_500));
}
