use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use super::{Publish, PublishError, Publisher, SubscribeError, Subscriber};
use crate::broker::memory::{Event, MemoryBroker};
use crate::broker::{open_receiver, open_sender};
use crate::config::{BrokerSettings, ConnectionDescriptor};
use crate::utils::logging;

fn settings() -> BrokerSettings {
    BrokerSettings::new(
        ConnectionDescriptor::new("localhost", "tester", "secret"),
        "orders",
        "worker-a",
    )
}

fn provisioned() -> MemoryBroker {
    let broker = MemoryBroker::new();
    broker.provision(&settings());
    broker
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Notes how many messages were already accepted when each
/// `Received message` line was written.
#[derive(Clone)]
struct AckProbe {
    broker: MemoryBroker,
    seen: Arc<Mutex<Vec<(String, usize)>>>,
}

impl io::Write for AckProbe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let line = String::from_utf8_lossy(buf).into_owned();
        if line.contains("Received message:") {
            let accepted = self.broker.accepted_count();
            self.seen.lock().unwrap().push((line, accepted));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_publish_sends_payload_once() {
    let broker = provisioned();
    let publisher = Publisher::new(open_sender(&broker, &settings()).await.unwrap());
    let (_guard, logs) = logging::capture(Level::INFO);

    publisher.publish("hello").await.unwrap();

    assert_eq!(broker.sent("orders"), vec![Bytes::from_static(b"hello")]);
    assert!(logs.contents().contains("Published message: hello"));
    publisher.close().await;
}

#[tokio::test]
async fn test_publish_is_not_retried_on_send_failure() {
    let broker = provisioned();
    let publisher = Publisher::new(open_sender(&broker, &settings()).await.unwrap());
    broker.update_faults(|f| f.sever_senders = true);

    let err = publisher.publish("hello").await.unwrap_err();
    assert!(matches!(err, PublishError::Send(_)));
    assert!(broker.sent("orders").is_empty());

    broker.update_faults(|f| f.sever_senders = false);
    publisher.publish("again").await.unwrap();
    assert_eq!(broker.sent("orders"), vec![Bytes::from_static(b"again")]);
    publisher.close().await;
}

#[tokio::test]
async fn test_publish_after_close_fails() {
    let broker = provisioned();
    let publisher = Publisher::new(open_sender(&broker, &settings()).await.unwrap());
    publisher.close().await;

    let err = publisher.publish("late").await.unwrap_err();
    assert!(matches!(err, PublishError::Closed));
    assert!(broker.journal().contains(&Event::ConnectionClosed(1)));
}

#[tokio::test]
async fn test_subscriber_logs_before_accepting_in_order() {
    let broker = provisioned();
    for payload in ["first", "second", "third"] {
        broker.enqueue("orders", payload).unwrap();
    }
    let mut subscriber = Subscriber::new(open_receiver(&broker, &settings()).await.unwrap());

    let probe = AckProbe {
        broker: broker.clone(),
        seen: Arc::default(),
    };
    let writer = probe.clone();
    let _guard = tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_max_level(Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish(),
    );

    let token = CancellationToken::new();
    let task = tokio::spawn({
        let token = token.clone();
        async move {
            let result = subscriber.run(token).await;
            (subscriber, result)
        }
    });

    wait_until(|| broker.accepted_count() == 3).await;
    token.cancel();
    let (mut subscriber, result) = task.await.unwrap();
    result.unwrap();
    subscriber.close().await;

    let seen = probe.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);
    for (index, (payload, (line, accepted))) in
        ["first", "second", "third"].iter().zip(&seen).enumerate()
    {
        assert!(line.contains(&format!("Received message: {payload}")));
        assert_eq!(*accepted, index, "{payload} was accepted before it was logged");
    }

    let sequences: Vec<u64> = broker
        .journal()
        .iter()
        .filter_map(|event| match event {
            Event::Accepted { sequence, .. } => Some(*sequence),
            _ => None,
        })
        .collect();
    assert_eq!(sequences, [1, 2, 3]);
}

#[tokio::test]
async fn test_subscriber_returns_ok_when_already_cancelled() {
    let broker = provisioned();
    broker.enqueue("orders", "never read").unwrap();
    let mut subscriber = Subscriber::new(open_receiver(&broker, &settings()).await.unwrap());
    let token = CancellationToken::new();
    token.cancel();

    tokio::time::timeout(Duration::from_millis(100), subscriber.run(token))
        .await
        .expect("run did not return")
        .unwrap();

    assert_eq!(broker.accepted_count(), 0);
    subscriber.close().await;
}

#[tokio::test]
async fn test_subscriber_cancellation_interrupts_pending_receive() {
    let broker = provisioned();
    let mut subscriber = Subscriber::new(open_receiver(&broker, &settings()).await.unwrap());
    let (_guard, logs) = logging::capture(Level::INFO);
    let token = CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    tokio::time::timeout(Duration::from_secs(1), subscriber.run(token))
        .await
        .expect("run did not observe cancellation")
        .unwrap();
    assert!(logs.contents().contains("Subscriber shutting down..."));
    subscriber.close().await;
}

#[tokio::test]
async fn test_receive_failure_ends_the_loop() {
    let broker = provisioned();
    broker.enqueue("orders", "before the fault").unwrap();
    broker
        .inject_receive_fault("orders/subscriptions/worker-a", "link detached")
        .unwrap();
    broker.enqueue("orders", "after the fault").unwrap();
    let mut subscriber = Subscriber::new(open_receiver(&broker, &settings()).await.unwrap());

    let err = subscriber.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, SubscribeError::Receive(_)));
    assert!(err.to_string().contains("link detached"));
    assert_eq!(broker.accepted_count(), 1);
    subscriber.close().await;
}

#[tokio::test]
async fn test_accept_failure_ends_the_loop_after_logging() {
    let broker = provisioned();
    broker.enqueue("orders", "unlucky").unwrap();
    broker.update_faults(|f| f.reject_accept = true);
    let mut subscriber = Subscriber::new(open_receiver(&broker, &settings()).await.unwrap());
    let (_guard, logs) = logging::capture(Level::INFO);

    let err = subscriber.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, SubscribeError::Accept(_)));
    assert!(logs.contents().contains("Received message: unlucky"));
    subscriber.close().await;
}

#[tokio::test]
async fn test_run_after_close_fails() {
    let broker = provisioned();
    let mut subscriber = Subscriber::new(open_receiver(&broker, &settings()).await.unwrap());
    subscriber.close().await;

    let err = subscriber.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, SubscribeError::Closed));
}
