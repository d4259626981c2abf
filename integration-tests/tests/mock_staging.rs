//! End-to-end checks for mock staging driven through scoped patches.

use fixture_core::{state_lock, with, Mock, PatchError, StubModules};
use serde_json::json;

#[test]
fn staged_connection_flow() {
    let connect = Mock::named("connect");
    connect
        .returns(json!({"connected": true}))
        .on_nth_call_fail("connection reset", 3);

    // A reconnect loop sees two good calls, the third still succeeds, and
    // everything after that fails persistently.
    assert!(connect.call(vec![json!("amqp://")]).is_ok());
    assert!(connect.call(vec![json!("amqp://")]).is_ok());
    assert!(connect.call(vec![json!("amqp://")]).is_ok());
    assert!(connect.call(vec![json!("amqp://")]).is_err());
    assert!(connect.call(vec![json!("amqp://")]).is_err());

    assert_eq!(connect.call_count(), 5);
    connect.assert_called_with(&[json!("amqp://")]);
}

#[test]
fn error_escalation_switches_after_the_threshold() {
    let fetch = Mock::named("fetch");
    fetch.on_nth_call_fail_then("key missing", "store offline", 2);

    let first = fetch.call(vec![json!("k1")]).unwrap_err();
    let second = fetch.call(vec![json!("k1")]).unwrap_err();
    let third = fetch.call(vec![json!("k1")]).unwrap_err();

    for error in [&first, &second] {
        match error {
            PatchError::Injected(message) => assert_eq!(message, "key missing"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
    match third {
        PatchError::Injected(message) => assert_eq!(message, "store offline"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn mocks_planted_on_stubs_record_calls_for_the_test() -> anyhow::Result<()> {
    let _serial = state_lock();

    with(StubModules::new(["redis.client"]), |_| {
        let client = fixture_core::import("redis.client").unwrap();
        let ping = client.attr("ping").unwrap();
        let ping = ping.as_mock().unwrap();
        ping.returns(json!("PONG"));

        // Code under test resolves the module independently and calls
        // through its own handle.
        let resolved = fixture_core::import("redis.client").unwrap();
        let result = resolved
            .attr("ping")
            .unwrap()
            .as_mock()
            .unwrap()
            .call(vec![])
            .unwrap();

        assert_eq!(result, json!("PONG"));
        ping.assert_called_once();
    })?;

    assert!(fixture_core::import("redis.client").is_err());
    Ok(())
}

#[test]
fn return_value_staging_flips_mid_sequence() {
    let poll = Mock::named("poll");
    poll.returns(json!("pending")).on_nth_call_return(json!("done"), 3);

    let seen: Vec<_> = (0..4).map(|_| poll.call(vec![]).unwrap()).collect();
    assert_eq!(
        seen,
        vec![json!("pending"), json!("pending"), json!("done"), json!("done")]
    );
}
