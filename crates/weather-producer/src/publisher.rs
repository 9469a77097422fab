//! Event publishers.
//!
//! `publish` only enqueues; delivery happens in the background until `flush`
//! waits for it. `ZenohPublisher` maps the topic to a key expression and carries
//! the message key as the sample attachment.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use zenoh::bytes::Encoding;
use zenoh::key_expr::KeyExpr;

use crate::snapshot::PublishRequest;

/// Messages that may be waiting for a flush before `publish` starts refusing.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Errors from publishing or flushing.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("publish queue full ({capacity} messages pending)")]
    QueueFull { capacity: usize },

    #[error("publisher is closed")]
    Closed,

    #[error("no async runtime available to deliver messages")]
    NoRuntime,

    #[error("{failed} message(s) failed delivery, first error: {first}")]
    Delivery { failed: usize, first: String },

    #[error("flush timed out with {pending} message(s) undelivered")]
    FlushTimeout { pending: usize },
}

/// A message broker client.
pub trait EventPublisher: Send + Sync {
    /// Enqueue a message for delivery. Never waits on the network.
    fn publish(&self, request: PublishRequest) -> Result<(), PublishError>;

    /// Wait until every message enqueued so far has been delivered or has failed.
    ///
    /// With nothing enqueued since the last flush this returns `Ok(())` at once.
    fn flush(
        &self,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}

type Delivery = JoinHandle<zenoh::Result<()>>;

/// Publishes to a Zenoh session.
pub struct ZenohPublisher {
    session: Arc<zenoh::Session>,
    pending: Mutex<Vec<Delivery>>,
    capacity: usize,
    closed: AtomicBool,
}

impl ZenohPublisher {
    pub fn new(session: Arc<zenoh::Session>) -> Self {
        Self::with_capacity(session, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(session: Arc<zenoh::Session>, capacity: usize) -> Self {
        Self {
            session,
            pending: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of messages enqueued and not yet flushed.
    pub fn pending(&self) -> usize {
        self.lock_pending().len()
    }

    /// Refuse further publishes. Already enqueued messages can still be flushed.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<Delivery>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Put deliveries a flush gave up on back ahead of anything published since.
    fn requeue(&self, unfinished: Vec<Delivery>) {
        let mut pending = self.lock_pending();
        let newer = std::mem::replace(&mut *pending, unfinished);
        pending.extend(newer);
    }
}

impl EventPublisher for ZenohPublisher {
    fn publish(&self, request: PublishRequest) -> Result<(), PublishError> {
        if self.is_closed() {
            return Err(PublishError::Closed);
        }

        let key_expr = KeyExpr::try_from(request.topic.clone()).map_err(|e| {
            PublishError::InvalidTopic {
                topic: request.topic.clone(),
                reason: e.to_string(),
            }
        })?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PublishError::NoRuntime)?;

        let mut pending = self.lock_pending();
        if pending.len() >= self.capacity {
            return Err(PublishError::QueueFull {
                capacity: self.capacity,
            });
        }

        let session = self.session.clone();
        let PublishRequest { key, value, .. } = request;
        pending.push(runtime.spawn(async move {
            session
                .put(key_expr, value)
                .encoding(Encoding::APPLICATION_JSON)
                .attachment(key)
                .await
        }));
        Ok(())
    }

    async fn flush(&self, timeout: Option<Duration>) -> Result<(), PublishError> {
        let deliveries = std::mem::take(&mut *self.lock_pending());
        if deliveries.is_empty() {
            return Ok(());
        }

        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let mut failed = 0;
        let mut first: Option<String> = None;

        let mut deliveries = deliveries.into_iter();
        while let Some(mut delivery) = deliveries.next() {
            let outcome = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, &mut delivery).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        // still in flight; the next flush waits for them
                        let unfinished: Vec<Delivery> =
                            std::iter::once(delivery).chain(deliveries).collect();
                        let pending = unfinished.len();
                        self.requeue(unfinished);
                        return Err(PublishError::FlushTimeout { pending });
                    }
                },
                None => delivery.await,
            };

            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(join_error) => join_error.to_string(),
            };
            log::debug!("Delivery failed: {}", error);
            failed += 1;
            first.get_or_insert(error);
        }

        match first {
            Some(first) => Err(PublishError::Delivery { failed, first }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Peer session that never leaves the process.
    async fn isolated_session() -> Arc<zenoh::Session> {
        let mut config = zenoh::Config::default();
        config.insert_json5("mode", r#""peer""#).unwrap();
        config.insert_json5("listen/endpoints", "[]").unwrap();
        config
            .insert_json5("scouting/multicast/enabled", "false")
            .unwrap();
        config.insert_json5("scouting/gossip/enabled", "false").unwrap();
        Arc::new(zenoh::open(config).await.unwrap())
    }

    fn request(topic: &str) -> PublishRequest {
        PublishRequest {
            topic: topic.to_string(),
            key: "Paris".to_string(),
            value: br#"{"temp_c":18}"#.to_vec(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_publish_then_flush() {
        let publisher = ZenohPublisher::new(isolated_session().await);
        publisher.publish(request("weather-events")).unwrap();
        assert_eq!(publisher.pending(), 1);

        publisher
            .flush(Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(publisher.pending(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_repeated_flush_is_noop() {
        let publisher = ZenohPublisher::new(isolated_session().await);
        publisher.publish(request("weather-events")).unwrap();
        publisher.flush(None).await.unwrap();

        for _ in 0..3 {
            publisher.flush(Some(Duration::ZERO)).await.unwrap();
            assert_eq!(publisher.pending(), 0);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_topic_rejected_synchronously() {
        let publisher = ZenohPublisher::new(isolated_session().await);
        let err = publisher.publish(request("weather//events")).unwrap_err();
        assert!(matches!(err, PublishError::InvalidTopic { .. }));
        assert_eq!(publisher.pending(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_queue_full() {
        let publisher = ZenohPublisher::with_capacity(isolated_session().await, 2);
        publisher.publish(request("weather-events")).unwrap();
        publisher.publish(request("weather-events")).unwrap();

        let err = publisher.publish(request("weather-events")).unwrap_err();
        assert!(matches!(err, PublishError::QueueFull { capacity: 2 }));

        publisher.flush(None).await.unwrap();
        publisher.publish(request("weather-events")).unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_closed_publisher_refuses() {
        let publisher = ZenohPublisher::new(isolated_session().await);
        publisher.publish(request("weather-events")).unwrap();
        publisher.close();

        assert!(matches!(
            publisher.publish(request("weather-events")),
            Err(PublishError::Closed)
        ));
        // already enqueued messages still drain
        publisher.flush(None).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_local_subscriber_receives_key_and_value() {
        let session = isolated_session().await;
        let subscriber = session
            .declare_subscriber("weather-events")
            .await
            .unwrap();

        let publisher = ZenohPublisher::new(session.clone());
        publisher.publish(request("weather-events")).unwrap();
        publisher.flush(None).await.unwrap();

        let sample = tokio::time::timeout(Duration::from_secs(2), subscriber.recv_async())
            .await
            .expect("timeout waiting for sample")
            .unwrap();
        let key = sample
            .attachment()
            .map(|a| String::from_utf8(a.to_bytes().to_vec()).unwrap());
        assert_eq!(key.as_deref(), Some("Paris"));
        assert_eq!(sample.payload().to_bytes().as_ref(), br#"{"temp_c":18}"#);
        assert_eq!(sample.encoding(), &Encoding::APPLICATION_JSON);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_publish_outside_runtime() {
        let publisher = Arc::new(ZenohPublisher::new(isolated_session().await));
        let detached = publisher.clone();
        let result = std::thread::spawn(move || detached.publish(request("weather-events")))
            .join()
            .unwrap();
        assert!(matches!(result, Err(PublishError::NoRuntime)));
        assert_eq!(publisher.pending(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timed_out_flush_keeps_unfinished_deliveries() {
        let publisher = ZenohPublisher::new(isolated_session().await);

        // a delivery that stays in flight until released
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        publisher.lock_pending().push(tokio::spawn(async move {
            let _ = gate.await;
            Ok(())
        }));
        publisher.publish(request("weather-events")).unwrap();
        publisher.publish(request("weather-events")).unwrap();

        let err = publisher.flush(Some(Duration::ZERO)).await.unwrap_err();
        assert!(matches!(err, PublishError::FlushTimeout { pending: 3 }));
        assert_eq!(publisher.pending(), 3);

        // published after the timeout, queued behind the unfinished ones
        publisher.publish(request("weather-events")).unwrap();
        assert_eq!(publisher.pending(), 4);

        release.send(()).unwrap();
        publisher.flush(None).await.unwrap();
        assert_eq!(publisher.pending(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_flush_reports_failed_deliveries() {
        let session = isolated_session().await;
        let publisher = ZenohPublisher::new(session.clone());
        session.close().await.unwrap();

        publisher.publish(request("weather-events")).unwrap();
        publisher.publish(request("weather-events")).unwrap();

        let err = publisher
            .flush(Some(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Delivery { failed: 2, .. }));
        assert_eq!(publisher.pending(), 0);

        // failures are reported once
        publisher.flush(None).await.unwrap();
    }

    async fn dying_put() -> zenoh::Result<()> {
        panic!("put task died")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_panicked_delivery_counts_as_failure() {
        let publisher = ZenohPublisher::new(isolated_session().await);
        publisher.publish(request("weather-events")).unwrap();
        publisher
            .lock_pending()
            .push(tokio::spawn(dying_put()));

        let err = publisher.flush(None).await.unwrap_err();
        match err {
            PublishError::Delivery { failed, first } => {
                assert_eq!(failed, 1);
                assert!(first.contains("panicked"), "first: {}", first);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_error_display() {
        let err = PublishError::Delivery {
            failed: 2,
            first: "session closed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "2 message(s) failed delivery, first error: session closed"
        );
    }
}
