// tests/integration/scan_test.rs

//! Integration tests for the cursor-based scan family
//! Tests: option forms, page shapes, termination, cursor updates

use super::fixtures::map;
use super::test_helpers::TestContext;
use spinelpool::core::client::ScanKind;
use spinelpool::Value;

fn page(cursor: i64, items: &[&str]) -> Value {
    Value::Array(vec![
        Value::Int(cursor),
        Value::Array(items.iter().map(|v| Value::from(*v)).collect()),
    ])
}

#[tokio::test]
async fn test_scan_with_options_map() {
    let ctx = TestContext::new();
    ctx.mock.reply("scan", page(17, &["user:1", "user:2"]));
    let mut cursor = 0;

    let result = ctx
        .redis
        .scan(
            &mut cursor,
            vec![map(vec![("match", Value::from("user:*")), ("count", Value::Int(100))])],
        )
        .await
        .unwrap();

    assert_eq!(result, page(17, &["user:1", "user:2"]));
    assert_eq!(cursor, 17);
    assert_eq!(
        ctx.mock.calls_to("scan")[0].args,
        vec![Value::Int(0), Value::from("user:*"), Value::Int(100)]
    );
}

#[tokio::test]
async fn test_scan_with_positional_arguments() {
    let ctx = TestContext::new();
    let mut cursor = 42;

    ctx.redis
        .scan(&mut cursor, vec!["session:*".into(), Value::Int(5)])
        .await
        .unwrap();

    assert_eq!(
        ctx.mock.calls_to("scan")[0].args,
        vec![Value::Int(42), Value::from("session:*"), Value::Int(5)]
    );
}

#[tokio::test]
async fn test_scan_defaults_pattern_and_count() {
    let ctx = TestContext::new();
    let mut cursor = 0;

    ctx.redis.scan(&mut cursor, vec![]).await.unwrap();

    assert_eq!(
        ctx.mock.calls_to("scan")[0].args,
        vec![Value::Int(0), Value::from("*"), Value::Int(10)]
    );
}

#[tokio::test]
async fn test_scan_finished_walk_returns_false() {
    let ctx = TestContext::new();
    ctx.mock.reply("scan", page(0, &[]));
    let mut cursor = 3;

    let result = ctx.redis.scan(&mut cursor, vec![]).await.unwrap();

    assert_eq!(result, Value::Bool(false));
    assert_eq!(cursor, 0);
}

#[tokio::test]
async fn test_scan_native_false_page_returns_false() {
    let ctx = TestContext::new();
    ctx.mock.reply("scan", false);
    let mut cursor = 0;

    let result = ctx.redis.scan(&mut cursor, vec![]).await.unwrap();
    assert_eq!(result, Value::Bool(false));
}

#[tokio::test]
async fn test_scan_empty_page_mid_walk_is_not_the_end() {
    let ctx = TestContext::new();
    ctx.mock.reply("scan", page(9, &[]));
    let mut cursor = 0;

    let result = ctx.redis.scan(&mut cursor, vec![]).await.unwrap();

    assert_eq!(result, page(9, &[]));
    assert_eq!(cursor, 9);
}

#[tokio::test]
async fn test_scan_last_page_with_items_is_returned() {
    let ctx = TestContext::new();
    ctx.mock.reply("scan", page(0, &["tail"]));
    let mut cursor = 12;

    let result = ctx.redis.scan(&mut cursor, vec![]).await.unwrap();

    assert_eq!(result, page(0, &["tail"]));
    assert_eq!(cursor, 0);
}

#[tokio::test]
async fn test_full_walk_collects_every_page() {
    let ctx = TestContext::new();
    ctx.mock
        .reply("scan", page(5, &["a", "b"]))
        .reply("scan", page(11, &[]))
        .reply("scan", page(0, &["c"]));

    let mut cursor = 0;
    let mut keys = Vec::new();
    loop {
        let reply = ctx.redis.scan(&mut cursor, vec![]).await.unwrap();
        if let Value::Array(mut parts) = reply {
            keys.extend(parts.pop().unwrap().into_list());
        } else {
            break;
        }
        if cursor == 0 {
            break;
        }
    }

    assert_eq!(keys, vec![Value::from("a"), Value::from("b"), Value::from("c")]);
    let cursors: Vec<Value> = ctx
        .mock
        .calls_to("scan")
        .into_iter()
        .map(|call| call.args[0].clone())
        .collect();
    assert_eq!(cursors, vec![Value::Int(0), Value::Int(5), Value::Int(11)]);
}

#[tokio::test]
async fn test_scan_walk_crosses_cursors_above_i64_range() {
    let ctx = TestContext::new();
    let high = Value::from("18446744073709551000");
    ctx.mock
        .reply(
            "scan",
            Value::Array(vec![high.clone(), Value::Array(vec![Value::from("a")])]),
        )
        .reply("scan", page(0, &["b"]));
    let mut cursor = 0;

    let first = ctx.redis.scan(&mut cursor, vec![]).await.unwrap();
    assert_eq!(cursor, 18_446_744_073_709_551_000);
    assert_eq!(first, Value::Array(vec![high.clone(), Value::Array(vec![Value::from("a")])]));

    let last = ctx.redis.scan(&mut cursor, vec![]).await.unwrap();
    assert_eq!(last, page(0, &["b"]));
    assert_eq!(ctx.mock.calls_to("scan")[1].args[0], high);
}

#[tokio::test]
async fn test_hscan_returns_field_map() {
    let ctx = TestContext::new();
    let fields = map(vec![("name", "ada"), ("lang", "rust")]);
    ctx.mock
        .reply("hscan", Value::Array(vec![Value::Int(0), fields.clone()]));
    let mut cursor = 0;

    let result = ctx
        .redis
        .hscan("profile", &mut cursor, vec![map(vec![("match", "n*")])])
        .await
        .unwrap();

    assert_eq!(result, Value::Array(vec![Value::Int(0), fields]));
    assert_eq!(
        ctx.mock.calls_to("hscan")[0].args,
        vec![
            Value::from("profile"),
            Value::Int(0),
            Value::from("n*"),
            Value::Int(10),
        ]
    );
}

#[tokio::test]
async fn test_zscan_empty_page_mid_walk_is_an_empty_map() {
    let ctx = TestContext::new();
    ctx.mock
        .reply("zscan", Value::Array(vec![Value::Int(8), Value::Nil]));
    let mut cursor = 0;

    let result = ctx.redis.zscan("board", &mut cursor, vec![]).await.unwrap();

    assert_eq!(
        result,
        Value::Array(vec![Value::Int(8), Value::Map(Default::default())])
    );
}

#[tokio::test]
async fn test_sscan_without_transform_returns_native_page() {
    let ctx = TestContext::new();
    ctx.mock.reply("sscan", page(4, &["m1"]));
    let connection = ctx.pool().get().await.unwrap();
    let mut cursor = 0;

    let result = connection
        .scan_page(ScanKind::Sscan, Some("tags".into()), &mut cursor, vec!["m*".into()])
        .await
        .unwrap();
    connection.release();

    assert_eq!(result, Value::Array(vec![Value::from("m1")]));
    assert_eq!(cursor, 4);
    assert_eq!(
        ctx.mock.calls_to("sscan")[0].args,
        vec![Value::from("tags"), Value::Int(0), Value::from("m*"), Value::Nil]
    );
}

#[tokio::test]
async fn test_scan_event_reports_key_and_cursor() {
    let ctx = TestContext::new();
    let mut events = ctx.events.subscribe();
    let mut cursor = 7;

    ctx.redis
        .sscan("tags", &mut cursor, vec!["m*".into()])
        .await
        .unwrap();

    let event = events.try_recv().unwrap();
    assert_eq!(event.command, "sscan");
    assert_eq!(
        event.parameters,
        vec![Value::from("tags"), Value::Int(7), Value::from("m*")]
    );
}

#[tokio::test]
async fn test_scan_releases_connection() {
    let ctx = TestContext::new();
    let mut cursor = 0;
    ctx.redis.scan(&mut cursor, vec![]).await.unwrap();
    assert_eq!(ctx.pool().in_use(), 0);
}
