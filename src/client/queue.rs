//! Queued delivery. The watcher hands requests to [QueuedSink] and moves on, while
//! [SinkDispatcher] forwards them to the real sink in order, retrying while the server is
//! unreachable.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Event, EventSink, SinkError};

pub const DEFAULT_QUEUE_CAPACITY: usize = 512;
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum SinkRequest {
    CreateBucket {
        bucket_id: String,
        event_type: String,
    },
    Heartbeat {
        bucket_id: String,
        event: Event,
        pulsetime: Duration,
    },
}

impl SinkRequest {
    fn heartbeat_data(&self) -> Option<(&str, &serde_json::Map<String, serde_json::Value>)> {
        match self {
            SinkRequest::Heartbeat {
                bucket_id, event, ..
            } => Some((bucket_id.as_str(), &event.data)),
            SinkRequest::CreateBucket { .. } => None,
        }
    }
}

/// Bounded FIFO shared by both ends.
struct RequestQueue {
    requests: Mutex<VecDeque<SinkRequest>>,
    capacity: usize,
    available: Notify,
    closed: AtomicBool,
}

impl RequestQueue {
    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<SinkRequest>> {
        // Queue operations can't panic halfway, a poisoned queue is still consistent.
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, request: SinkRequest) -> Result<()> {
        if self.is_closed() {
            return Err(anyhow!("Delivery queue is closed"));
        }
        {
            let mut requests = self.lock();
            if requests.len() >= self.capacity {
                match evict(&mut requests) {
                    Some(evicted) => warn!("Delivery queue is full, dropping {evicted:?}"),
                    None => {
                        warn!("Delivery queue is full, dropping {request:?}");
                        return Ok(());
                    }
                }
            }
            requests.push_back(request);
        }
        self.available.notify_one();
        Ok(())
    }

    fn pop(&self) -> Option<SinkRequest> {
        self.lock().pop_front()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.available.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Makes room in a full queue. A heartbeat followed by another heartbeat with the same data is
/// redundant, the server merges the later one into the same interval anyway. Without such a pair
/// the oldest heartbeat goes. Bucket creation is never dropped.
fn evict(requests: &mut VecDeque<SinkRequest>) -> Option<SinkRequest> {
    let heartbeats = requests
        .iter()
        .enumerate()
        .filter_map(|(index, request)| request.heartbeat_data().map(|data| (index, data)))
        .collect::<Vec<_>>();
    let redundant = heartbeats
        .windows(2)
        .find(|pair| pair[0].1 == pair[1].1)
        .map(|pair| pair[0].0);
    let index = redundant.or_else(|| heartbeats.first().map(|(index, _)| *index))?;
    requests.remove(index)
}

/// Creates a connected queue and dispatcher. Nothing is delivered until [SinkDispatcher::run] is
/// polled.
pub fn queued<S: EventSink>(
    sink: Arc<S>,
    capacity: usize,
    shutdown: CancellationToken,
    retry_interval: Duration,
) -> (QueuedSink, SinkDispatcher<S>) {
    let queue = Arc::new(RequestQueue {
        requests: Mutex::new(VecDeque::with_capacity(capacity)),
        capacity,
        available: Notify::new(),
        closed: AtomicBool::new(false),
    });
    (
        QueuedSink {
            queue: queue.clone(),
        },
        SinkDispatcher {
            queue,
            sink,
            shutdown,
            retry_interval,
        },
    )
}

/// Front of the queue. Never waits for the server. Dropping it lets the dispatcher finish once
/// the queue is drained.
pub struct QueuedSink {
    queue: Arc<RequestQueue>,
}

impl Drop for QueuedSink {
    fn drop(&mut self) {
        self.queue.close();
    }
}

#[async_trait]
impl EventSink for QueuedSink {
    async fn create_bucket(&self, bucket_id: &str, event_type: &str) -> Result<()> {
        self.queue.push(SinkRequest::CreateBucket {
            bucket_id: bucket_id.into(),
            event_type: event_type.into(),
        })
    }

    async fn heartbeat(&self, bucket_id: &str, event: &Event, pulsetime: Duration) -> Result<()> {
        self.queue.push(SinkRequest::Heartbeat {
            bucket_id: bucket_id.into(),
            event: event.clone(),
            pulsetime,
        })
    }
}

/// Back of the queue. Delivers requests one at a time. A request is retried until it succeeds,
/// is rejected by the server, or shutdown is requested.
pub struct SinkDispatcher<S> {
    queue: Arc<RequestQueue>,
    sink: Arc<S>,
    shutdown: CancellationToken,
    retry_interval: Duration,
}

impl<S: EventSink> SinkDispatcher<S> {
    async fn forward(&self, request: &SinkRequest) -> Result<()> {
        match request {
            SinkRequest::CreateBucket {
                bucket_id,
                event_type,
            } => self.sink.create_bucket(bucket_id, event_type).await,
            SinkRequest::Heartbeat {
                bucket_id,
                event,
                pulsetime,
            } => self.sink.heartbeat(bucket_id, event, *pulsetime).await,
        }
    }

    /// Returns false if shutdown interrupted the delivery.
    async fn deliver(&self, request: SinkRequest) -> bool {
        loop {
            match self.forward(&request).await {
                Ok(()) => {
                    debug!("Delivered {request:?}");
                    return true;
                }
                // Sending the same request again would only be rejected again.
                Err(e) if e.downcast_ref::<SinkError>().is_some() => {
                    warn!("Dropping rejected request {request:?}: {e:?}");
                    return true;
                }
                Err(e) => warn!(
                    "Failed to deliver request, retrying in {:?}: {e:?}",
                    self.retry_interval
                ),
            }

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return false,
                _ = tokio::time::sleep(self.retry_interval) => (),
            }
        }
    }

    /// Waits for the next request, `None` once the queue is closed and drained.
    async fn next(&self) -> Option<SinkRequest> {
        loop {
            let available = self.queue.available.notified();
            if let Some(request) = self.queue.pop() {
                return Some(request);
            }
            if self.queue.is_closed() {
                return None;
            }
            available.await;
        }
    }

    pub async fn run(self) -> Result<()> {
        loop {
            let request = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                request = self.next() => request,
            };
            let Some(request) = request else {
                break;
            };
            if !self.deliver(request).await {
                break;
            }
        }

        self.queue.close();
        let pending = self.queue.len();
        if pending > 0 {
            info!("Stopping with {pending} undelivered requests");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{TimeDelta, TimeZone, Utc};
    use mockall::Sequence;
    use serde_json::Map;

    use super::*;
    use crate::{client::MockEventSink, utils::logging::TEST_LOGGING};

    fn event(seconds: i64) -> Event {
        Event {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
                + TimeDelta::seconds(seconds),
            duration: TimeDelta::zero(),
            data: Map::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_requests_in_order() -> Result<()> {
        *TEST_LOGGING;
        let mut sink = MockEventSink::new();
        let mut sequence = Sequence::new();
        sink.expect_create_bucket()
            .withf(|bucket, event_type| bucket == "bucket" && event_type == "afkstatus")
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| Ok(()));
        sink.expect_heartbeat()
            .withf(|_, event, pulsetime| {
                *event == self::event(1) && *pulsetime == Duration::from_secs(65)
            })
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _, _| Ok(()));
        sink.expect_heartbeat()
            .withf(|_, event, _| *event == self::event(2))
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _, _| Ok(()));

        let shutdown = CancellationToken::new();
        let (queue, dispatcher) = queued(
            Arc::new(sink),
            8,
            shutdown.clone(),
            DEFAULT_RETRY_INTERVAL,
        );

        queue.create_bucket("bucket", "afkstatus").await?;
        queue
            .heartbeat("bucket", &event(1), Duration::from_secs(65))
            .await?;
        queue
            .heartbeat("bucket", &event(2), Duration::from_secs(65))
            .await?;
        drop(queue);

        dispatcher.run().await
    }

    #[tokio::test(start_paused = true)]
    async fn retries_failed_requests() -> Result<()> {
        *TEST_LOGGING;
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut sink = MockEventSink::new();
        let counter = attempts.clone();
        sink.expect_heartbeat().times(3).returning(move |_, _, _| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(anyhow!("connection refused"))
            } else {
                Ok(())
            }
        });

        let shutdown = CancellationToken::new();
        let (queue, dispatcher) = queued(
            Arc::new(sink),
            8,
            shutdown.clone(),
            Duration::from_secs(5),
        );
        queue
            .heartbeat("bucket", &event(0), Duration::from_secs(65))
            .await?;
        drop(queue);

        let started = tokio::time::Instant::now();
        dispatcher.run().await?;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_retries() -> Result<()> {
        *TEST_LOGGING;
        let mut sink = MockEventSink::new();
        sink.expect_heartbeat()
            .returning(|_, _, _| Err(anyhow!("connection refused")));

        let shutdown = CancellationToken::new();
        let (queue, dispatcher) = queued(
            Arc::new(sink),
            8,
            shutdown.clone(),
            Duration::from_secs(5),
        );
        queue
            .heartbeat("bucket", &event(0), Duration::from_secs(65))
            .await?;

        let (_, result) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_secs(12)).await;
                shutdown.cancel();
            },
            dispatcher.run(),
        );
        result?;

        assert!(queue
            .heartbeat("bucket", &event(1), Duration::from_secs(65))
            .await
            .is_err());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_requests_are_skipped() -> Result<()> {
        *TEST_LOGGING;
        let mut sink = MockEventSink::new();
        let mut sequence = Sequence::new();
        sink.expect_heartbeat()
            .withf(|_, event, _| *event == self::event(1))
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _, _| {
                Err(SinkError::Rejected {
                    what: "Heartbeat",
                    status: 400,
                    body: "Invalid event".into(),
                }
                .into())
            });
        sink.expect_heartbeat()
            .withf(|_, event, _| *event == self::event(2))
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _, _| Ok(()));

        let (queue, dispatcher) = queued(
            Arc::new(sink),
            8,
            CancellationToken::new(),
            DEFAULT_RETRY_INTERVAL,
        );
        queue
            .heartbeat("bucket", &event(1), Duration::from_secs(65))
            .await?;
        queue
            .heartbeat("bucket", &event(2), Duration::from_secs(65))
            .await?;
        drop(queue);

        let started = tokio::time::Instant::now();
        dispatcher.run().await?;
        assert_eq!(started.elapsed(), Duration::ZERO);
        Ok(())
    }

    fn status_event(seconds: i64, status: &str) -> Event {
        let mut event = event(seconds);
        event.data.insert("status".into(), status.into());
        event
    }

    fn queued_events(dispatcher: &SinkDispatcher<MockEventSink>) -> Vec<Event> {
        dispatcher
            .queue
            .lock()
            .iter()
            .filter_map(|request| match request {
                SinkRequest::Heartbeat { event, .. } => Some(event.clone()),
                SinkRequest::CreateBucket { .. } => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn full_queue_drops_superseded_heartbeats() -> Result<()> {
        *TEST_LOGGING;
        let (queue, dispatcher) = queued(
            Arc::new(MockEventSink::new()),
            4,
            CancellationToken::new(),
            DEFAULT_RETRY_INTERVAL,
        );
        let pulsetime = Duration::from_secs(65);

        queue.create_bucket("bucket", "afkstatus").await?;
        queue
            .heartbeat("bucket", &status_event(0, "not-afk"), pulsetime)
            .await?;
        queue
            .heartbeat("bucket", &status_event(5, "not-afk"), pulsetime)
            .await?;
        queue
            .heartbeat("bucket", &status_event(10, "afk"), pulsetime)
            .await?;
        // Full, the first of the two equal heartbeats makes room.
        queue
            .heartbeat("bucket", &status_event(11, "not-afk"), pulsetime)
            .await?;

        assert_eq!(dispatcher.queue.len(), 4);
        assert!(matches!(
            dispatcher.queue.lock().front(),
            Some(SinkRequest::CreateBucket { .. })
        ));
        assert_eq!(
            queued_events(&dispatcher),
            vec![
                status_event(5, "not-afk"),
                status_event(10, "afk"),
                status_event(11, "not-afk"),
            ]
        );

        // No equal neighbours left, the oldest heartbeat goes.
        queue
            .heartbeat("bucket", &status_event(12, "afk"), pulsetime)
            .await?;
        assert_eq!(
            queued_events(&dispatcher),
            vec![
                status_event(10, "afk"),
                status_event(11, "not-afk"),
                status_event(12, "afk"),
            ]
        );
        Ok(())
    }
}
