//! End-to-end tests of the parallel dispatcher: deterministic hash
//! routing, per-shard cursors and failure propagation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use rivulet::parallel::{self, HashOption, ParallelOptions};
use rivulet::testing::{
    events_with_foreign_ids, events_with_ids, events_with_kinds, MemCursorStore,
    MockStreamFactory,
};
use rivulet::{consumer, CursorStore, Event, StreamFactory, StreamOptions};

type ShardMap = HashMap<String, Vec<i64>>;

/// Runs a bounded parallel consumption of `events` over `n` shards and
/// returns the store plus, per shard name, the values `record` extracted
/// from the events that shard processed.
async fn run_sharded(
    events: Vec<Event>,
    n: usize,
    options: ParallelOptions,
    record: fn(&Event) -> i64,
) -> (Arc<MemCursorStore>, ShardMap) {
    let store = Arc::new(MemCursorStore::new());
    let factory = Arc::new(MockStreamFactory::new(events));
    let results: Arc<Mutex<ShardMap>> = Arc::new(Mutex::new(HashMap::new()));

    let parent = CancellationToken::new();
    let consumer_of = |index: usize| {
        let results = Arc::clone(&results);
        let shard = format!("parallel_test_{}_of_{}", index + 1, n);
        consumer::new("parallel_test", move |_ctx, event: Event| {
            let results = Arc::clone(&results);
            let shard = shard.clone();
            async move {
                results.lock().entry(shard).or_default().push(record(&event));
                Ok(())
            }
        })
    };

    parallel::run(
        |_index| parent.child_token(),
        consumer_of,
        n,
        Arc::clone(&factory) as Arc<dyn StreamFactory>,
        Arc::clone(&store) as Arc<dyn CursorStore>,
        options.with_stream_options(StreamOptions::new().to_head()),
    )
    .await
    .unwrap();

    let map = results.lock().clone();
    (store, map)
}

fn expected(entries: &[(&str, &[i64])]) -> ShardMap {
    entries
        .iter()
        .map(|(name, values)| ((*name).to_string(), values.to_vec()))
        .collect()
}

#[tokio::test]
async fn routes_by_event_id() {
    let (_, results) = run_sharded(
        events_with_ids(&["0", "1", "2", "3"]),
        4,
        ParallelOptions::new().with_hash(HashOption::EventId),
        |e| e.id_int().unwrap(),
    )
    .await;

    let want = expected(&[
        ("parallel_test_1_of_4", &[3]),
        ("parallel_test_2_of_4", &[2]),
        ("parallel_test_3_of_4", &[1]),
        ("parallel_test_4_of_4", &[0]),
    ]);
    assert_eq!(results, want);
}

#[tokio::test]
async fn routes_by_foreign_id() {
    let (_, results) = run_sharded(
        events_with_foreign_ids(&["124566", "123412455", "123", "2342", "2304", "140054"]),
        4,
        ParallelOptions::new().with_hash(HashOption::EventForeignId),
        |e| e.foreign_id_int().unwrap(),
    )
    .await;

    let want = expected(&[
        ("parallel_test_1_of_4", &[2304]),
        ("parallel_test_2_of_4", &[124566, 140054]),
        ("parallel_test_3_of_4", &[123412455, 2342]),
        ("parallel_test_4_of_4", &[123]),
    ]);
    assert_eq!(results, want);
}

#[tokio::test]
async fn routes_by_event_type_with_independent_cursors() {
    let kinds = [1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 3];
    let (store, results) = run_sharded(
        events_with_kinds(&kinds),
        4,
        ParallelOptions::new().with_hash(HashOption::EventType),
        |e| i64::from(e.kind),
    )
    .await;

    // Shard 4 owns no type and never sees a callback.
    let want = expected(&[
        ("parallel_test_1_of_4", &[3, 3, 3, 3, 3]),
        ("parallel_test_2_of_4", &[2, 2, 2, 2]),
        ("parallel_test_3_of_4", &[1, 1, 1]),
    ]);
    assert_eq!(results, want);

    // Every shard's cursor passed every event, including shards that
    // processed none of them.
    for index in 0..4 {
        let name = format!("parallel_test_{}_of_4", index + 1);
        assert_eq!(store.cursor(&name), "12", "cursor of {name}");
    }
}

#[tokio::test]
async fn custom_hash_fn_overrides_hash_option() {
    let (_, results) = run_sharded(
        events_with_ids(&["0", "1", "2", "3"]),
        4,
        ParallelOptions::new()
            .with_hash(HashOption::EventType)
            .with_hash_fn(|event: &Event| event.id.clone().into_bytes()),
        |e| e.id_int().unwrap(),
    )
    .await;

    // Identical to routing by event id.
    let want = expected(&[
        ("parallel_test_1_of_4", &[3]),
        ("parallel_test_2_of_4", &[2]),
        ("parallel_test_3_of_4", &[1]),
        ("parallel_test_4_of_4", &[0]),
    ]);
    assert_eq!(results, want);
}

#[tokio::test]
async fn routing_is_deterministic_across_runs() {
    let kinds = [1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 3];
    let (_, first) = run_sharded(
        events_with_kinds(&kinds),
        4,
        ParallelOptions::new().with_hash(HashOption::EventType),
        |e| i64::from(e.kind),
    )
    .await;
    let (_, second) = run_sharded(
        events_with_kinds(&kinds),
        4,
        ParallelOptions::new().with_hash(HashOption::EventType),
        |e| i64::from(e.kind),
    )
    .await;

    assert_eq!(first, second);
}

#[tokio::test]
async fn child_failure_aborts_the_dispatcher() {
    let store = Arc::new(MemCursorStore::new());
    // A single kind-3 event, which shard 1 (index 0) owns.
    let factory = Arc::new(MockStreamFactory::new(events_with_kinds(&[3])));

    let parent = CancellationToken::new();
    let err = parallel::run(
        |_index| parent.child_token(),
        |_index| {
            consumer::new("exploder", |_ctx, _event| async {
                Err(rivulet::Error::consumer("exploder", "shard blew up"))
            })
        },
        4,
        factory as Arc<dyn StreamFactory>,
        Arc::clone(&store) as Arc<dyn CursorStore>,
        ParallelOptions::new()
            .with_hash(HashOption::EventType)
            .with_stream_options(StreamOptions::new().to_head()),
    )
    .await
    .unwrap_err();

    assert!(err.to_string().contains("shard blew up"));
}
