mod common;

use std::time::Duration;

use chat_core::{QueueStatus, QueuedSendParams};
use chat_delivery::QueueEvent;
use common::{harness, Step};
use tokio::time::timeout;

fn openai() -> QueuedSendParams {
    QueuedSendParams {
        provider: "openai".to_string(),
        model: "gpt-4o".to_string(),
        image: None,
    }
}

#[tokio::test]
async fn permanent_failure_fails_after_max_retries() {
    let h = harness(vec![Step::Status(503), Step::Status(503), Step::Status(503)]);
    let queue = h.service.queue();
    let item = h.service.queue_message("c1", "Hello", openai()).await.unwrap();

    for _ in 0..3 {
        queue.process_pending().await.unwrap();
    }

    let stored = queue.get(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Failed);
    assert_eq!(stored.retry_count, 3);
    assert!(stored.error.as_deref().unwrap_or_default().contains("503"));
    assert!(h.service.conversations().load("c1").await.unwrap().is_none());

    // Failed items are left alone by later passes
    queue.process_pending().await.unwrap();
    assert_eq!(h.provider.call_count(), 3);
    assert_eq!(queue.failed_count().await.unwrap(), 1);
}

#[tokio::test]
async fn retry_failed_resets_and_delivers() {
    let h = harness(vec![Step::Status(500), Step::Status(500), Step::Status(500)]);
    let queue = h.service.queue();
    let item = h.service.queue_message("c1", "Hello", openai()).await.unwrap();
    for _ in 0..3 {
        queue.process_pending().await.unwrap();
    }
    assert_eq!(queue.failed_count().await.unwrap(), 1);

    h.provider.push(Step::Reply("Hi!"));
    assert_eq!(queue.retry_failed().await.unwrap(), 1);
    let reset = queue.get(&item.id).await.unwrap().unwrap();
    assert_eq!(reset.status, QueueStatus::Pending);
    assert_eq!(reset.retry_count, 0);
    assert!(reset.error.is_none());

    let summary = queue.process_pending().await.unwrap();
    assert_eq!(summary.sent, 1);
    let conversation = h.service.conversations().load("c1").await.unwrap().unwrap();
    let texts: Vec<&str> = conversation.messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["Hello", "Hi!"]);
}

#[tokio::test]
async fn offline_pass_skips_without_consuming_retries() {
    let h = harness(vec![Step::Reply("later")]);
    let queue = h.service.queue();
    h.probe.set_online(false);
    let item = h.service.queue_message("c1", "Hello", openai()).await.unwrap();

    for _ in 0..5 {
        let summary = queue.process_pending().await.unwrap();
        assert!(summary.offline);
    }
    let stored = queue.get(&item.id).await.unwrap().unwrap();
    assert_eq!(stored.retry_count, 0);
    assert_eq!(h.provider.call_count(), 0);

    h.probe.set_online(true);
    assert_eq!(queue.process_pending().await.unwrap().sent, 1);
    assert!(queue.items().await.unwrap().is_empty());
}

#[tokio::test]
async fn non_retryable_errors_fail_immediately() {
    let h = harness(vec![Step::Status(400)]);
    let queue = h.service.queue();

    let bad_request = h.service.queue_message("c1", "Hello", openai()).await.unwrap();
    // No Anthropic key is configured
    let no_key = h
        .service
        .queue_message(
            "c2",
            "Hello",
            QueuedSendParams {
                provider: "anthropic".to_string(),
                model: "claude-3-5-sonnet-20241022".to_string(),
                image: None,
            },
        )
        .await
        .unwrap();

    let summary = queue.process_pending().await.unwrap();
    assert_eq!(summary.failed, 2);

    for id in [&bad_request.id, &no_key.id] {
        let stored = queue.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Failed);
        assert_eq!(stored.retry_count, 1);
    }
    let no_key = queue.get(&no_key.id).await.unwrap().unwrap();
    assert!(no_key.error.unwrap().contains("No API key"));
    assert_eq!(h.provider.call_count(), 1);
}

#[tokio::test]
async fn transitions_are_broadcast_in_order() {
    let h = harness(vec![Step::Status(503), Step::Reply("ok")]);
    let queue = h.service.queue();
    let mut events = queue.subscribe();

    let item = h.service.queue_message("c1", "Hello", openai()).await.unwrap();
    queue.process_pending().await.unwrap();
    queue.process_pending().await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(match event {
            QueueEvent::Enqueued { .. } => "enqueued".to_string(),
            QueueEvent::StatusChanged {
                status, retry_count, ..
            } => format!("{:?}/{}", status, retry_count),
            QueueEvent::Sent { .. } => "sent".to_string(),
            QueueEvent::Removed { .. } => "removed".to_string(),
        });
    }
    assert_eq!(
        seen,
        vec!["enqueued", "Sending/0", "Pending/1", "Sending/1", "sent"]
    );
    assert!(queue.get(&item.id).await.unwrap().is_none());
}

#[tokio::test]
async fn background_worker_drains_the_queue() {
    let h = harness(vec![Step::Reply("from the worker")]);
    let mut events = h.service.queue().subscribe();
    let worker = h.service.spawn_worker();

    h.service.queue_message("c1", "Hello", openai()).await.unwrap();

    let sent = timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(QueueEvent::Sent {
                assistant_message_id,
                ..
            }) = events.recv().await
            {
                return assistant_message_id;
            }
        }
    })
    .await
    .expect("worker should deliver the message");

    let conversation = h.service.conversations().load("c1").await.unwrap().unwrap();
    assert_eq!(conversation.messages[1].id, sent);
    assert_eq!(conversation.messages[1].text, "from the worker");
    worker.stop().await;
}

#[tokio::test]
async fn worker_restart_recovers_the_interrupted_item() {
    let h = harness(vec![Step::Panic, Step::Reply("after restart")]);
    let queue = h.service.queue();
    let mut events = queue.subscribe();
    let worker = h.service.spawn_worker();

    let item = h.service.queue_message("c1", "Hello", openai()).await.unwrap();

    timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(QueueEvent::Sent { id, .. }) = events.recv().await {
                if id == item.id {
                    return;
                }
            }
        }
    })
    .await
    .expect("restarted worker should deliver the message");

    assert_eq!(worker.restarts(), 1);
    assert!(worker.is_running());
    assert!(queue.items().await.unwrap().is_empty());
    assert_eq!(h.provider.call_count(), 2);

    let conversation = h.service.conversations().load("c1").await.unwrap().unwrap();
    let texts: Vec<&str> = conversation.messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["Hello", "after restart"]);
    worker.stop().await;
}
