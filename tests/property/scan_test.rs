// tests/property/scan_test.rs

//! Property-based tests for scan walks
//! Tests that a walk visits every page once and ends exactly when the cursor returns to zero

use crate::test_helpers::TestContext;
use proptest::prelude::*;
use spinelpool::Value;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_scan_walk_collects_every_item_and_terminates(
        pages in prop::collection::vec(prop::collection::vec("[a-z]{1,6}", 0..5), 1..12)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ctx = TestContext::new();
            let last = pages.len() - 1;
            for (i, page) in pages.iter().enumerate() {
                let next = if i == last { 0 } else { (i as i64 + 1) * 10 };
                let items = page.iter().map(|item| Value::from(item.as_str())).collect();
                ctx.mock.reply("scan", Value::Array(vec![Value::Int(next), Value::Array(items)]));
            }

            let mut cursor = 0u64;
            let mut seen = Vec::new();
            let mut round_trips = 0;
            loop {
                round_trips += 1;
                match ctx.redis.scan(&mut cursor, vec![]).await.unwrap() {
                    Value::Array(mut reply) => {
                        assert_eq!(reply.len(), 2);
                        seen.extend(reply.pop().unwrap().into_list());
                        assert_eq!(reply[0], Value::cursor(cursor));
                    }
                    Value::Bool(false) => {
                        // Only a finished walk with nothing left says false.
                        assert_eq!(cursor, 0);
                        break;
                    }
                    other => panic!("unexpected scan reply {other:?}"),
                }
                if cursor == 0 {
                    break;
                }
            }

            let expected: Vec<Value> = pages
                .iter()
                .flatten()
                .map(|item| Value::from(item.as_str()))
                .collect();
            assert_eq!(seen, expected);
            assert_eq!(round_trips, pages.len());
            assert_eq!(ctx.pool().in_use(), 0);
        });
    }
}
