//! Behavior every backend shares, run against each backend that works without a server.

use datalayer::{
    BackendConfig, connect,
    prelude::*,
    capability::UpdateMissing,
};
use futures::StreamExt;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Item {
    id: i64,
    name: String,
    score: i32,
}

impl Document for Item {
    type Key = i64;

    fn id(&self) -> &i64 {
        &self.id
    }

    fn collection_name() -> &'static str {
        "items"
    }
}

fn item(id: i64, score: i32) -> Item {
    Item {
        id,
        name: format!("item {id}"),
        score,
    }
}

struct Fixture {
    db: Database<dyn StoreBackend>,
    _dir: Option<TempDir>,
}

impl Fixture {
    fn items(&self) -> Collection<dyn StoreBackend, Item> {
        self.db.collection::<Item>()
    }

    fn name(&self) -> &str {
        self.db.backend().name()
    }
}

async fn fixtures() -> Vec<Fixture> {
    let dir = tempfile::tempdir().unwrap();
    let configs = vec![
        (BackendConfig::Memory, None),
        (
            BackendConfig::Embedded { path: dir.path().to_path_buf() },
            Some(dir),
        ),
        (BackendConfig::Table { table_prefix: "conformance".into() }, None),
    ];

    let mut fixtures = Vec::new();
    for (config, dir) in configs {
        fixtures.push(Fixture {
            db: connect(&config).await.unwrap(),
            _dir: dir,
        });
    }

    fixtures
}

async fn seed(items: &Collection<dyn StoreBackend, Item>, count: i64) {
    let batch = (1..=count).map(|id| item(id, (id * 37 % 101) as i32)).collect();
    assert_eq!(items.insert_many(batch).await.unwrap(), count as u64);
}

fn ids(items: &[Item]) -> Vec<i64> {
    items.iter().map(|item| item.id).collect()
}

#[tokio::test]
async fn filter_order_skip_take_compose_in_order() {
    for fixture in fixtures().await {
        let items = fixture.items();
        seed(&items, 100).await;

        let page = items
            .query()
            .filter(Filter::gt("id", 50_i64))
            .order_by("id")
            .skip(10)
            .take(5)
            .to_vec(&CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(ids(&page), vec![61, 62, 63, 64, 65], "{}", fixture.name());
    }
}

#[tokio::test]
async fn insert_then_get_round_trips() {
    for fixture in fixtures().await {
        let items = fixture.items();
        let original = item(7, 42);

        items.insert(original.clone()).await.unwrap();

        assert_eq!(items.get(&7).await.unwrap(), Some(original), "{}", fixture.name());
        assert_eq!(items.get(&8).await.unwrap(), None, "{}", fixture.name());
    }
}

#[tokio::test]
async fn duplicate_insert_keeps_the_first_item() {
    for fixture in fixtures().await {
        let items = fixture.items();
        items.insert(item(1, 10)).await.unwrap();

        let mut second = item(1, 99);
        second.name = "second".into();
        let err = items.insert(second).await.unwrap_err();

        assert!(err.is_duplicate_key(), "{}: {err}", fixture.name());
        assert_eq!(items.get(&1).await.unwrap().unwrap().score, 10, "{}", fixture.name());
    }
}

#[tokio::test]
async fn then_by_without_order_by_is_invalid_everywhere() {
    for fixture in fixtures().await {
        let items = fixture.items();
        seed(&items, 3).await;

        let err = items
            .query()
            .then_by("name")
            .to_vec(&CancelSignal::new())
            .await
            .unwrap_err();

        assert!(
            matches!(err, StoreError::InvalidOperation { .. }),
            "{}: {err}",
            fixture.name()
        );
    }
}

#[tokio::test]
async fn then_by_breaks_ties_of_the_primary_ordering() {
    for fixture in fixtures().await {
        let items = fixture.items();
        let batch = vec![item(1, 5), item(2, 3), item(3, 5), item(4, 3)];
        items.insert_many(batch).await.unwrap();

        let ordered = items
            .query()
            .order_by("score")
            .then_by_descending("id")
            .to_vec(&CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(ids(&ordered), vec![4, 2, 3, 1], "{}", fixture.name());
    }
}

#[tokio::test]
async fn repeated_reads_are_identical() {
    for fixture in fixtures().await {
        let items = fixture.items();
        seed(&items, 30).await;

        let query = items.query().filter(Filter::lt("score", 60)).order_by("score").then_by("id");
        let first = query.to_vec(&CancelSignal::new()).await.unwrap();
        let second = query.to_vec(&CancelSignal::new()).await.unwrap();

        assert_eq!(first, second, "{}", fixture.name());
        assert_eq!(
            query.count(&CancelSignal::new()).await.unwrap(),
            first.len() as u64,
            "{}",
            fixture.name()
        );
    }
}

#[tokio::test]
async fn delete_by_query_removes_exactly_the_matches() {
    for fixture in fixtures().await {
        let items = fixture.items();
        seed(&items, 40).await;

        let doomed = items
            .query()
            .filter(Filter::lt("score", 50))
            .count(&CancelSignal::new())
            .await
            .unwrap();
        let removed = items
            .query()
            .filter(Filter::lt("score", 50))
            .delete(&CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(removed, doomed, "{}", fixture.name());
        assert_eq!(items.count().await.unwrap(), 40 - doomed, "{}", fixture.name());
        assert_eq!(
            items
                .query()
                .filter(Filter::lt("score", 50))
                .count(&CancelSignal::new())
                .await
                .unwrap(),
            0,
            "{}",
            fixture.name()
        );
    }
}

#[tokio::test]
async fn update_of_a_missing_item_follows_the_capability() {
    for fixture in fixtures().await {
        let items = fixture.items();
        let result = items.update(item(9, 1)).await;

        match fixture.db.backend().capabilities().update_missing {
            UpdateMissing::Fail => assert!(
                result.unwrap_err().is_not_found(),
                "{}",
                fixture.name()
            ),
            UpdateMissing::Upsert => {
                result.unwrap();
                assert!(items.get(&9).await.unwrap().is_some(), "{}", fixture.name());
            }
        }
    }
}

#[tokio::test]
async fn deletes_report_absence() {
    for fixture in fixtures().await {
        let items = fixture.items();
        items.insert(item(1, 1)).await.unwrap();

        assert!(items.delete(&1).await.unwrap(), "{}", fixture.name());
        assert!(!items.delete(&1).await.unwrap(), "{}", fixture.name());
        assert_eq!(items.delete_many(vec![1, 2]).await.unwrap(), 0, "{}", fixture.name());
    }
}

#[tokio::test]
async fn take_zero_and_first_or_default() {
    for fixture in fixtures().await {
        let items = fixture.items();
        seed(&items, 5).await;

        let none = items.query().take(0).to_vec(&CancelSignal::new()).await.unwrap();
        assert!(none.is_empty(), "{}", fixture.name());

        let lowest = items
            .query()
            .order_by("score")
            .first_or_default(&CancelSignal::new())
            .await
            .unwrap();
        let expected = items
            .query()
            .order_by("score")
            .to_vec(&CancelSignal::new())
            .await
            .unwrap()
            .into_iter()
            .next();
        assert_eq!(lowest, expected, "{}", fixture.name());

        let missing = items
            .query()
            .filter(Filter::gt("id", 1000_i64))
            .first_or_default(&CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(missing, None, "{}", fixture.name());
    }
}

#[tokio::test]
async fn cancelled_terminals_do_not_execute() {
    for fixture in fixtures().await {
        let items = fixture.items();
        seed(&items, 5).await;

        let cancel = CancelSignal::new();
        cancel.cancel();

        assert!(
            matches!(items.query().count(&cancel).await, Err(StoreError::Cancelled)),
            "{}",
            fixture.name()
        );
        assert!(
            matches!(items.query().delete(&cancel).await, Err(StoreError::Cancelled)),
            "{}",
            fixture.name()
        );
        assert_eq!(items.count().await.unwrap(), 5, "{}", fixture.name());
    }
}

#[tokio::test]
async fn streams_end_at_the_item_where_cancel_is_set() {
    for fixture in fixtures().await {
        let items = fixture.items();
        seed(&items, 10).await;

        let cancel = CancelSignal::new();
        let mut stream = items.query().order_by("id").to_stream(&cancel).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        cancel.cancel();

        assert_eq!(first.id, 1, "{}", fixture.name());
        assert!(stream.next().await.is_none(), "{}", fixture.name());
        assert!(
            matches!(
                items.query().to_vec(&cancel).await,
                Err(StoreError::Cancelled)
            ),
            "{}",
            fixture.name()
        );
    }
}

#[tokio::test]
async fn collections_can_be_dropped() {
    for fixture in fixtures().await {
        let items = fixture.items();
        items.insert(item(1, 1)).await.unwrap();

        assert!(
            fixture.db.list_collections().await.unwrap().contains(&"items".to_string()),
            "{}",
            fixture.name()
        );
        assert!(items.delete_collection().await.unwrap(), "{}", fixture.name());
        assert!(!items.delete_collection().await.unwrap(), "{}", fixture.name());
        assert_eq!(items.count().await.unwrap(), 0, "{}", fixture.name());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn order_by_then_take_yields_a_sorted_prefix(
        scores in proptest::collection::vec(0..20_i32, 0..40),
        take in 0..50_i64,
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();

        runtime.block_on(async {
            for fixture in fixtures().await {
                let items = fixture.items();
                let batch = scores
                    .iter()
                    .enumerate()
                    .map(|(index, score)| item(index as i64, *score))
                    .collect::<Vec<_>>();
                items.insert_many(batch).await.unwrap();

                let query = items.query().order_by("score").take(take);
                let first = query.to_vec(&CancelSignal::new()).await.unwrap();
                let second = query.to_vec(&CancelSignal::new()).await.unwrap();

                assert_eq!(first.len(), scores.len().min(take as usize), "{}", fixture.name());
                assert!(
                    first.windows(2).all(|pair| pair[0].score <= pair[1].score),
                    "{}",
                    fixture.name()
                );
                assert_eq!(ids(&first), ids(&second), "{}", fixture.name());
            }
        });
    }
}
