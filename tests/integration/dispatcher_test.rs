// tests/integration/dispatcher_test.rs

//! Integration tests for the command dispatcher
//! Tests: connection resolution, pinning, release, events, error propagation

use super::fixtures::{TEST_KEY1, TEST_VALUE1};
use super::test_helpers::TestContext;
use spinelpool::config::PoolConfig;
use spinelpool::core::context;
use spinelpool::{Redis, RedisConnection, RedisError, Value};

const CONTEXT_KEY: &str = "redis.connection.default";

// ===== Release vs Pin =====

#[tokio::test]
async fn test_command_is_proxied_and_released() {
    let ctx = TestContext::new();
    ctx.mock.reply("get", "bar");

    let result = ctx.invoke("get", vec!["foo".into()]).await.unwrap();

    assert_eq!(result, Value::from("bar"));
    assert_eq!(ctx.mock.calls_to("get")[0].args, vec![Value::from("foo")]);
    let pool = ctx.pool();
    assert_eq!(pool.in_use(), 0);
    assert_eq!(pool.idle_count(), 1);
}

#[tokio::test]
async fn test_ordinary_commands_do_not_pin() {
    let ctx = TestContext::new();
    context::scope(async {
        for command in ["get", "set", "incr", "hgetall", "exec"] {
            ctx.invoke(command, vec![TEST_KEY1.into(), TEST_VALUE1.into()])
                .await
                .unwrap();
            assert!(!context::has(CONTEXT_KEY), "{command} must not pin");
            assert_eq!(ctx.pool().in_use(), 0);
        }
    })
    .await;
}

#[tokio::test]
async fn test_same_connection_commands_pin_until_scope_ends() {
    for command in ["multi", "pipeline", "select", "MULTI"] {
        let ctx = TestContext::new();
        context::scope(async {
            ctx.invoke(command, vec![]).await.unwrap();
            assert!(context::has(CONTEXT_KEY), "{command} must pin");
            assert_eq!(ctx.pool().in_use(), 1);
        })
        .await;
        assert_eq!(ctx.pool().in_use(), 0, "{command} pin must be released on teardown");
        assert_eq!(ctx.pool().idle_count(), 1);
    }
}

#[tokio::test]
async fn test_pinned_connection_is_reused_by_later_commands() {
    let ctx = TestContext::new();
    context::scope(async {
        ctx.invoke("multi", vec![]).await.unwrap();
        let pinned = ctx.redis.pinned_connection().unwrap();

        ctx.invoke("set", vec![TEST_KEY1.into(), TEST_VALUE1.into()])
            .await
            .unwrap();
        ctx.invoke("get", vec![TEST_KEY1.into()]).await.unwrap();

        assert_eq!(ctx.mock.connects(), 1);
        assert_eq!(ctx.pool().in_use(), 1);
        assert!(!pinned.is_released());
        assert_eq!(ctx.redis.pinned_connection(), Some(pinned));
    })
    .await;

    let clients: Vec<usize> = ctx.mock.calls().iter().map(|call| call.client).collect();
    assert!(clients.iter().all(|&client| client == 1));
}

#[tokio::test]
async fn test_second_same_connection_command_keeps_original_pin() {
    let ctx = TestContext::new();
    context::scope(async {
        ctx.invoke("multi", vec![]).await.unwrap();
        let first = ctx.redis.pinned_connection().unwrap();
        ctx.invoke("pipeline", vec![]).await.unwrap();
        assert_eq!(ctx.redis.pinned_connection().unwrap(), first);
        assert_eq!(ctx.mock.connects(), 1);
    })
    .await;
    assert_eq!(ctx.pool().in_use(), 0);
}

#[tokio::test]
async fn test_select_records_database_on_pinned_connection() {
    let ctx = TestContext::new();
    context::scope(async {
        ctx.invoke("select", vec![Value::Int(2)]).await.unwrap();
        let pinned = ctx.redis.pinned_connection().unwrap();
        assert_eq!(pinned.database(), 2);
    })
    .await;
}

#[tokio::test]
async fn test_select_with_falsy_database_pins_without_changing_database() {
    let mut config = PoolConfig::default();
    config.db = 3;
    let ctx = TestContext::with_pool_config(config);
    context::scope(async {
        ctx.invoke("select", vec![Value::Int(0)]).await.unwrap();
        let pinned = ctx.redis.pinned_connection().unwrap();
        assert_eq!(pinned.database(), 3);
    })
    .await;
}

#[tokio::test]
async fn test_select_accepts_numeric_string() {
    let ctx = TestContext::new();
    context::scope(async {
        ctx.invoke("select", vec!["5".into()]).await.unwrap();
        assert_eq!(ctx.redis.pinned_connection().unwrap().database(), 5);
    })
    .await;
}

#[tokio::test]
async fn test_select_with_non_numeric_database_records_zero() {
    let mut config = PoolConfig::default();
    config.db = 4;
    let ctx = TestContext::with_pool_config(config);
    context::scope(async {
        ctx.invoke("select", vec!["abc".into()]).await.unwrap();
        assert_eq!(ctx.redis.pinned_connection().unwrap().database(), 0);
    })
    .await;
}

#[tokio::test]
async fn test_independent_scopes_get_independent_connections() {
    let ctx = TestContext::new();
    let redis = ctx.redis.clone();

    let pin = |redis: Redis| async move {
        context::scope(async move {
            redis.invoke("multi", vec![]).await.unwrap();
            let pinned = redis.pinned_connection().unwrap();
            tokio::task::yield_now().await;
            pinned.id()
        })
        .await
    };

    let (a, b) = tokio::join!(pin(redis.clone()), pin(redis));
    assert_ne!(a, b);
    assert_eq!(ctx.mock.connects(), 2);
    assert_eq!(ctx.pool().in_use(), 0);
}

#[tokio::test]
async fn test_spawned_task_does_not_inherit_pin() {
    let ctx = TestContext::new();
    let redis = ctx.redis.clone();
    context::scope(async {
        ctx.invoke("multi", vec![]).await.unwrap();
        let seen = tokio::spawn(async move { redis.pinned_connection().is_some() })
            .await
            .unwrap();
        assert!(!seen);
    })
    .await;
}

// ===== Release On Every Exit Path =====

#[tokio::test]
async fn test_pin_is_released_when_scope_body_fails() {
    let ctx = TestContext::new();
    let result: Result<(), RedisError> = context::scope(async {
        ctx.invoke("multi", vec![]).await?;
        Err(RedisError::Internal("body failed".into()))
    })
    .await;

    assert!(result.is_err());
    assert_eq!(ctx.pool().in_use(), 0);
}

#[tokio::test]
async fn test_pin_is_released_when_scope_panics() {
    let ctx = TestContext::new();
    let redis = ctx.redis.clone();
    let joined = tokio::spawn(context::scope(async move {
        redis.invoke("pipeline", vec![]).await.unwrap();
        panic!("unit of work crashed");
    }))
    .await;

    assert!(joined.is_err());
    assert_eq!(ctx.pool().in_use(), 0);
    assert_eq!(ctx.pool().idle_count(), 1);
}

#[tokio::test]
async fn test_pin_is_released_when_scope_is_cancelled() {
    let ctx = TestContext::new();
    let redis = ctx.redis.clone();
    let scope = context::scope(async move {
        redis.invoke("multi", vec![]).await.unwrap();
        std::future::pending::<()>().await;
    });

    let timed_out = tokio::time::timeout(std::time::Duration::from_millis(20), scope).await;
    assert!(timed_out.is_err());
    assert_eq!(ctx.pool().in_use(), 0);
}

// ===== Errors =====

#[tokio::test]
async fn test_error_is_propagated_and_connection_released() {
    let ctx = TestContext::new();
    ctx.mock.fail("get", RedisError::Server("ERR boom".into()));

    let err = ctx.invoke("get", vec![TEST_KEY1.into()]).await.unwrap_err();

    assert_eq!(err, RedisError::Server("ERR boom".into()));
    assert_eq!(ctx.pool().in_use(), 0);
}

#[tokio::test]
async fn test_error_is_propagated_when_pin_already_exists() {
    let ctx = TestContext::new();
    ctx.mock.fail("get", RedisError::Server("ERR boom".into()));

    context::scope(async {
        ctx.invoke("multi", vec![]).await.unwrap();
        let pinned = ctx.redis.pinned_connection().unwrap();

        let err = ctx.invoke("get", vec![TEST_KEY1.into()]).await.unwrap_err();

        assert_eq!(err, RedisError::Server("ERR boom".into()));
        // The pin and its connection are untouched by the failed command.
        assert_eq!(ctx.redis.pinned_connection(), Some(pinned.clone()));
        assert!(!pinned.is_released());
    })
    .await;
    assert_eq!(ctx.pool().in_use(), 0);
}

#[tokio::test]
async fn test_failed_same_connection_command_is_not_pinned() {
    let ctx = TestContext::new();
    ctx.mock.fail("select", RedisError::Server("ERR DB index is out of range".into()));

    context::scope(async {
        let result = ctx.invoke("select", vec![Value::Int(99)]).await;
        assert!(result.is_err());
        assert!(!context::has(CONTEXT_KEY));
        assert_eq!(ctx.pool().in_use(), 0);
    })
    .await;
}

#[tokio::test]
async fn test_same_connection_command_outside_scope_is_rejected() {
    let ctx = TestContext::new();

    let err = ctx.invoke("multi", vec![]).await.unwrap_err();

    assert_eq!(err, RedisError::NoContext("multi".into()));
    assert_eq!(ctx.mock.connects(), 0);
}

#[tokio::test]
async fn test_foreign_value_in_context_slot_is_invalid_connection() {
    let ctx = TestContext::new();
    context::scope(async {
        context::set(CONTEXT_KEY, 42u32).unwrap();

        let err = ctx.invoke("get", vec![TEST_KEY1.into()]).await.unwrap_err();

        assert!(matches!(err, RedisError::InvalidConnection(_)));
        assert_eq!(ctx.mock.connects(), 0);
    })
    .await;
}

#[tokio::test]
async fn test_released_connection_in_context_slot_is_invalid_connection() {
    let ctx = TestContext::new();
    context::scope(async {
        let connection = ctx.pool().get().await.unwrap();
        connection.release();
        context::set(CONTEXT_KEY, connection).unwrap();

        let err = ctx.invoke("get", vec![TEST_KEY1.into()]).await.unwrap_err();
        assert!(matches!(err, RedisError::InvalidConnection(_)));
        assert!(ctx.mock.calls_to("get").is_empty());
    })
    .await;
}

// ===== Forwarding & Transform Flag =====

#[tokio::test]
async fn test_unknown_commands_are_forwarded_verbatim() {
    let ctx = TestContext::new();
    ctx.mock.reply("OBJECT", "embstr");

    let result = ctx
        .invoke("OBJECT", vec!["ENCODING".into(), TEST_KEY1.into()])
        .await
        .unwrap();

    assert_eq!(result, Value::from("embstr"));
    let call = ctx.mock.last_call().unwrap();
    assert_eq!(call.method, "OBJECT");
    assert_eq!(call.args, vec![Value::from("ENCODING"), Value::from(TEST_KEY1)]);
}

#[tokio::test]
async fn test_dispatcher_turns_transform_on_and_release_turns_it_off() {
    let ctx = TestContext::new();
    ctx.mock.reply("get", false);

    // The dispatcher enables translation, so the native miss becomes Nil.
    let result = ctx.invoke("get", vec![TEST_KEY1.into()]).await.unwrap();
    assert_eq!(result, Value::Nil);

    let reused: RedisConnection = ctx.pool().get().await.unwrap();
    assert!(!reused.is_transforming());
    reused.release();
}

// ===== Events =====

#[tokio::test]
async fn test_command_executed_event_on_success() {
    let ctx = TestContext::new();
    let mut events = ctx.events.subscribe();
    ctx.mock.reply("get", "bar");

    ctx.invoke("get", vec!["foo".into()]).await.unwrap();

    let event = events.try_recv().unwrap();
    assert_eq!(event.command, "get");
    assert_eq!(event.parameters, vec![Value::from("foo")]);
    assert_eq!(event.pool, "default");
    assert_eq!(event.result, Some(Value::from("bar")));
    assert!(event.error.is_none());
    assert!(event.succeeded());
    assert!(event.time >= 0.0);
    assert!(events.try_recv().is_err(), "exactly one event per command");
}

#[tokio::test]
async fn test_command_executed_event_on_failure() {
    let ctx = TestContext::new();
    let mut events = ctx.events.subscribe();
    ctx.mock.fail("get", RedisError::Server("ERR boom".into()));

    let _ = ctx.invoke("get", vec!["foo".into()]).await;

    let event = events.try_recv().unwrap();
    assert_eq!(event.result, None);
    assert_eq!(event.error, Some(RedisError::Server("ERR boom".into())));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_event_carries_the_connection_that_ran_the_command() {
    let ctx = TestContext::new();
    let mut events = ctx.events.subscribe();

    context::scope(async {
        ctx.invoke("multi", vec![]).await.unwrap();
        ctx.invoke("incr", vec![TEST_KEY1.into()]).await.unwrap();
        let pinned = ctx.redis.pinned_connection().unwrap();

        let multi = events.try_recv().unwrap();
        let incr = events.try_recv().unwrap();
        assert_eq!(multi.connection, pinned);
        assert_eq!(incr.connection, pinned);
    })
    .await;
}
