//! Latest-value data sources with bounded broadcast fan-out.
//!
//! A [`Source`] remembers the most recently accepted value and pushes every
//! accepted value to all current subscribers through a
//! [`tokio::sync::broadcast`] channel. A subscriber that falls behind loses
//! the oldest undelivered values and resumes with the newest; the producer
//! is never blocked.

use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::Stream;
use log::warn;
use tokio::sync::broadcast;

use crate::types::{InertialSample, PositionFix};

/// Default broadcast slot size.
pub const DEFAULT_CAPACITY: usize = 16;

pub type LocationSource = Source<PositionFix>;
pub type SensorSource = Source<InertialSample>;
/// Written only by the active estimator.
pub type FusedLocationSource = Source<PositionFix>;

#[derive(Debug)]
pub struct Source<T> {
    latest: Mutex<Option<T>>,
    sender: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> Source<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            latest: Mutex::new(None),
            sender,
        }
    }

    /// Accept `value` as the newest and broadcast it. Never blocks.
    pub fn set(&self, value: T) {
        let mut latest = self.lock();
        *latest = Some(value.clone());
        // Sending while holding the slot keeps `get()` and the stream order
        // consistent across concurrent writers. No receivers is not an error.
        let _ = self.sender.send(value);
    }

    /// Most recently accepted value, `None` before the first `set`.
    pub fn get(&self) -> Option<T> {
        self.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Every value accepted after this call, in order, skipping values a
    /// slow consumer lagged behind on. Ends when the source is dropped.
    pub fn stream(&self, label: &'static str) -> impl Stream<Item = T> + Send + 'static {
        futures::stream::unfold(self.subscribe(), move |mut rx| async move {
            let value = recv_latest(&mut rx, label).await?;
            Some((value, rx))
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone + Send + 'static> Default for Source<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receive the next value, riding over `Lagged` gaps.
///
/// Returns `None` once the channel is closed.
pub async fn recv_latest<T: Clone>(rx: &mut broadcast::Receiver<T>, label: &str) -> Option<T> {
    loop {
        match rx.recv().await {
            Ok(value) => return Some(value),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("[{label}] subscriber lagged, dropped {skipped} oldest values");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn fix(t: f64) -> PositionFix {
        PositionFix::new(t, 59.7, 17.8, 0.0, 0.0, 5.0)
    }

    #[test]
    fn test_get_before_set_is_none() {
        let source = LocationSource::new(4);
        assert!(source.get().is_none());
    }

    #[test]
    fn test_get_returns_latest() {
        let source = LocationSource::new(4);
        source.set(fix(1.0));
        source.set(fix(2.0));
        assert_eq!(source.get().unwrap().timestamp, 2.0);
    }

    #[tokio::test]
    async fn test_subscribers_see_values_in_order() {
        let source = LocationSource::new(4);
        let mut a = source.subscribe();
        let mut b = source.subscribe();
        source.set(fix(1.0));
        source.set(fix(2.0));

        for rx in [&mut a, &mut b] {
            assert_eq!(recv_latest(rx, "test").await.unwrap().timestamp, 1.0);
            assert_eq!(recv_latest(rx, "test").await.unwrap().timestamp, 2.0);
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_keeps_newest() {
        let source = LocationSource::new(2);
        let mut rx = source.subscribe();
        for t in 0..10 {
            source.set(fix(t as f64));
        }
        // Capacity 2: only the last two survive
        assert_eq!(recv_latest(&mut rx, "test").await.unwrap().timestamp, 8.0);
        assert_eq!(recv_latest(&mut rx, "test").await.unwrap().timestamp, 9.0);
    }

    #[tokio::test]
    async fn test_stream_ends_when_source_dropped() {
        let source = LocationSource::new(4);
        let stream = source.stream("test");
        source.set(fix(1.0));
        drop(source);

        let values: Vec<_> = stream.collect().await;
        assert_eq!(values.len(), 1);
    }
}
