mod support;

use std::time::{Duration, Instant};

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{json, Value as JsonValue};

use samp_core::{MsgId, Response};
use support::{
    assert_no_event, callable_client, error_code, next_event, start_hub, CallbackEvent,
    WireClient,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn broadcast_respects_subscription_patterns() -> Result<()> {
    let hub = start_hub().await?;
    let client = WireClient::new(hub.std_url());

    // A holds the wildcard, B the exact type.
    let (_a, mut recorder_a) = callable_client(&client, hub.secret(), &["x.*"]).await?;
    let (_b, mut recorder_b) = callable_client(&client, hub.secret(), &["x.y"]).await?;
    let sender = client.register(hub.secret()).await?;

    let recipients: Vec<JsonValue> = client
        .post_ok(
            "notify_all",
            json!({
                "private_key": sender.private_key,
                "message": { "samp.mtype": "x.y", "samp.params": {} },
            }),
        )
        .await?;
    assert_eq!(recipients.len(), 2);
    assert!(matches!(
        next_event(&mut recorder_a.events).await,
        Some(CallbackEvent::Notification { .. })
    ));
    assert!(matches!(
        next_event(&mut recorder_b.events).await,
        Some(CallbackEvent::Notification { .. })
    ));

    let recipients: Vec<JsonValue> = client
        .post_ok(
            "notify_all",
            json!({
                "private_key": sender.private_key,
                "message": { "samp.mtype": "x.z", "samp.params": {} },
            }),
        )
        .await?;
    assert_eq!(recipients.len(), 1);
    assert!(matches!(
        next_event(&mut recorder_a.events).await,
        Some(CallbackEvent::Notification { .. })
    ));
    assert_no_event(&mut recorder_b.events).await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn notify_validates_target_and_never_allocates_msg_ids() -> Result<()> {
    let hub = start_hub().await?;
    let client = WireClient::new(hub.std_url());

    let sender = client.register(hub.secret()).await?;
    let (b, mut recorder_b) = callable_client(&client, hub.secret(), &["x.y"]).await?;

    client
        .post_ok::<JsonValue>(
            "notify",
            json!({
                "private_key": sender.private_key,
                "recipient_id": b.self_id,
                "message": { "samp.mtype": "x.y", "samp.params": { "detail": "direct" } },
            }),
        )
        .await?;
    match next_event(&mut recorder_b.events).await {
        Some(CallbackEvent::Notification { sender_id, message }) => {
            assert_eq!(sender_id, sender.self_id);
            assert_eq!(
                message.params.get("detail").and_then(|v| v.as_str()),
                Some("direct")
            );
        }
        other => panic!("expected notification, got {other:?}"),
    }
    // Notifications never allocate msg-ids.
    assert_eq!(hub.runtime.hub().outstanding_calls().await, 0);

    // Unsubscribed type: rejected synchronously, nothing delivered.
    let rejected = client
        .post_raw(
            "notify",
            json!({
                "private_key": sender.private_key,
                "recipient_id": b.self_id,
                "message": { "samp.mtype": "y.z", "samp.params": {} },
            }),
        )
        .await?;
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(rejected).await?, "not_subscribed");
    assert_no_event(&mut recorder_b.events).await;

    let rejected = client
        .post_raw(
            "notify",
            json!({
                "private_key": sender.private_key,
                "recipient_id": "c999",
                "message": { "samp.mtype": "x.y", "samp.params": {} },
            }),
        )
        .await?;
    assert_eq!(rejected.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(rejected).await?, "unknown_client");

    // Reserved hub namespace is fenced off from clients.
    let rejected = client
        .post_raw(
            "notify",
            json!({
                "private_key": sender.private_key,
                "recipient_id": b.self_id,
                "message": { "samp.mtype": "samp.hub.event.shutdown", "samp.params": {} },
            }),
        )
        .await?;
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(rejected).await?, "invalid_argument");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_call_round_trip_with_tag_correlation() -> Result<()> {
    let hub = start_hub().await?;
    let client = WireClient::new(hub.std_url());

    let (a, mut recorder_a) = callable_client(&client, hub.secret(), &["app.echo"]).await?;
    let (b, mut recorder_b) = callable_client(&client, hub.secret(), &["app.echo"]).await?;

    let msg_id: MsgId = client
        .post_ok(
            "call",
            json!({
                "private_key": a.private_key,
                "recipient_id": b.self_id,
                "msg_tag": "echo-1",
                "message": { "samp.mtype": "app.echo", "samp.params": { "text": "hi" } },
            }),
        )
        .await?;

    let received_id = match next_event(&mut recorder_b.events).await {
        Some(CallbackEvent::Call {
            sender_id,
            msg_id: received,
            message,
        }) => {
            assert_eq!(sender_id, a.self_id);
            assert_eq!(message.params.get("text").and_then(|v| v.as_str()), Some("hi"));
            received
        }
        other => panic!("expected call, got {other:?}"),
    };
    assert_eq!(received_id, msg_id);

    client
        .post_ok::<JsonValue>(
            "reply",
            json!({
                "private_key": b.private_key,
                "msg_id": received_id,
                "response": {
                    "samp.status": "samp.ok",
                    "samp.result": { "text": "hi" },
                },
            }),
        )
        .await?;

    match next_event(&mut recorder_a.events).await {
        Some(CallbackEvent::Response {
            responder_id,
            msg_tag,
            response,
        }) => {
            assert_eq!(responder_id, b.self_id);
            assert_eq!(msg_tag.as_str(), "echo-1");
            assert!(response.is_ok());
        }
        other => panic!("expected response, got {other:?}"),
    }

    // The pending entry is gone: a second reply is a reported no-op.
    let rejected = client
        .post_raw(
            "reply",
            json!({
                "private_key": b.private_key,
                "msg_id": msg_id,
                "response": { "samp.status": "samp.ok", "samp.result": {} },
            }),
        )
        .await?;
    assert_eq!(rejected.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(rejected).await?, "unknown_pending_call");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn call_and_wait_returns_the_recipients_response() -> Result<()> {
    let hub = start_hub().await?;
    let client = WireClient::new(hub.std_url());

    let caller = client.register(hub.secret()).await?;
    let (responder, mut recorder) = callable_client(&client, hub.secret(), &["app.query"]).await?;

    // The responder answers from a background task once the call lands.
    let responder_client = WireClient::new(hub.std_url());
    let responder_key = responder.private_key.clone();
    let replier = tokio::spawn(async move {
        if let Some(CallbackEvent::Call { msg_id, .. }) = next_event(&mut recorder.events).await {
            let _ = responder_client
                .post_ok::<JsonValue>(
                    "reply",
                    json!({
                        "private_key": responder_key,
                        "msg_id": msg_id,
                        "response": {
                            "samp.status": "samp.ok",
                            "samp.result": { "rows": "42" },
                        },
                    }),
                )
                .await;
        }
    });

    let response: Response = client
        .post_ok(
            "call_and_wait",
            json!({
                "private_key": caller.private_key,
                "recipient_id": responder.self_id,
                "message": { "samp.mtype": "app.query", "samp.params": {} },
                "timeout_ms": 5000,
            }),
        )
        .await?;
    assert!(response.is_ok());
    assert_eq!(
        response.result.get("rows").and_then(|v| v.as_str()),
        Some("42")
    );
    replier.await?;
    assert_eq!(hub.runtime.hub().outstanding_calls().await, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn call_and_wait_times_out_with_error_response() -> Result<()> {
    let hub = start_hub().await?;
    let client = WireClient::new(hub.std_url());

    let caller = client.register(hub.secret()).await?;
    // Subscribed and callable, but never replies.
    let (silent, _recorder) = callable_client(&client, hub.secret(), &["app.query"]).await?;

    let started = Instant::now();
    let response: Response = client
        .post_ok(
            "call_and_wait",
            json!({
                "private_key": caller.private_key,
                "recipient_id": silent.self_id,
                "message": { "samp.mtype": "app.query", "samp.params": {} },
                "timeout_ms": 300,
            }),
        )
        .await?;
    let elapsed = started.elapsed();

    assert_eq!(response.status, samp_core::ResponseStatus::Error);
    assert!(response.err_txt().expect("errtxt").contains("no response"));
    assert!(elapsed >= Duration::from_millis(300));
    // The timed-out entry leaves no pending-call state behind.
    assert_eq!(hub.runtime.hub().outstanding_calls().await, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unregistering_recipient_unblocks_waiters() -> Result<()> {
    let hub = start_hub().await?;
    let client = WireClient::new(hub.std_url());

    let caller = client.register(hub.secret()).await?;
    let (doomed, mut recorder) = callable_client(&client, hub.secret(), &["app.query"]).await?;

    // Unregister the recipient as soon as the call reaches it; the
    // waiter holds no timeout, so only the sweep can unblock it.
    let doomed_client = WireClient::new(hub.std_url());
    let doomed_key = doomed.private_key.clone();
    let quitter = tokio::spawn(async move {
        if let Some(CallbackEvent::Call { .. }) = next_event(&mut recorder.events).await {
            let _ = doomed_client
                .post_ok::<JsonValue>("unregister", json!({ "private_key": doomed_key }))
                .await;
        }
    });

    let response: Response = client
        .post_ok(
            "call_and_wait",
            json!({
                "private_key": caller.private_key,
                "recipient_id": doomed.self_id,
                "message": { "samp.mtype": "app.query", "samp.params": {} },
                "timeout_ms": 0,
            }),
        )
        .await?;
    assert_eq!(response.status, samp_core::ResponseStatus::Error);
    assert!(response.err_txt().expect("errtxt").contains("unregistered"));
    quitter.await?;
    assert_eq!(hub.runtime.hub().outstanding_calls().await, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn call_all_allocates_one_msg_id_per_recipient() -> Result<()> {
    let hub = start_hub().await?;
    let client = WireClient::new(hub.std_url());

    let sender = client.register(hub.secret()).await?;
    let (a, mut recorder_a) = callable_client(&client, hub.secret(), &["bulk.*"]).await?;
    let (b, mut recorder_b) = callable_client(&client, hub.secret(), &["bulk.sync"]).await?;

    let ids: std::collections::BTreeMap<String, MsgId> = client
        .post_ok(
            "call_all",
            json!({
                "private_key": sender.private_key,
                "msg_tag": "sweep",
                "message": { "samp.mtype": "bulk.sync", "samp.params": {} },
            }),
        )
        .await?;
    assert_eq!(ids.len(), 2);
    assert!(ids.contains_key(a.self_id.as_str()));
    assert!(ids.contains_key(b.self_id.as_str()));
    let mut unique: Vec<&MsgId> = ids.values().collect();
    unique.dedup();
    assert_eq!(unique.len(), 2);

    assert!(matches!(
        next_event(&mut recorder_a.events).await,
        Some(CallbackEvent::Call { .. })
    ));
    assert!(matches!(
        next_event(&mut recorder_b.events).await,
        Some(CallbackEvent::Call { .. })
    ));
    Ok(())
}
