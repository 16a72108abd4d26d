//! Sample-and-hold rate limiting.
//!
//! Emits the most recent value seen during each fixed period and nothing for
//! periods with no new value. Intermediate values are discarded.

use std::time::Duration;

use futures::Stream;
use log::debug;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

struct SampleAndHold<T> {
    rx: broadcast::Receiver<T>,
    period: Duration,
    // Created on first poll so the stream can be built outside a runtime
    ticker: Option<Interval>,
    pending: Option<T>,
}

impl<T: Clone> SampleAndHold<T> {
    async fn next(&mut self) -> Option<T> {
        let period = self.period;
        let ticker = self.ticker.get_or_insert_with(|| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        loop {
            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Ok(value) => self.pending = Some(value),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("[throttle] skipped {skipped} values between ticks");
                    }
                    Err(RecvError::Closed) => return None,
                },
                _ = ticker.tick() => {
                    if let Some(value) = self.pending.take() {
                        return Some(value);
                    }
                }
            }
        }
    }
}

/// Rate-limit a broadcast subscription to at most one value per `period`.
pub fn sample_and_hold<T>(
    rx: broadcast::Receiver<T>,
    period: Duration,
) -> impl Stream<Item = T> + Send + 'static
where
    T: Clone + Send + 'static,
{
    let state = SampleAndHold {
        rx,
        period,
        ticker: None,
        pending: None,
    };
    futures::stream::unfold(state, |mut state| async move {
        let value = state.next().await?;
        Some((value, state))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test(start_paused = true)]
    async fn test_emits_latest_per_period() {
        let (tx, rx) = broadcast::channel(16);
        let mut stream = Box::pin(sample_and_hold(rx, Duration::from_millis(100)));

        for i in 0..5 {
            tx.send(i).unwrap();
        }
        assert_eq!(stream.next().await, Some(4));

        tx.send(5).unwrap();
        tx.send(6).unwrap();
        assert_eq!(stream.next().await, Some(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_periods_emit_nothing() {
        let (tx, rx) = broadcast::channel::<u32>(16);
        let mut stream = Box::pin(sample_and_hold(rx, Duration::from_millis(100)));

        let start = Instant::now();
        let sender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(450)).await;
            tx.send(7).unwrap();
            tx
        });
        assert_eq!(stream.next().await, Some(7));
        // First tick at or after the value arrived
        assert!(Instant::now() - start >= Duration::from_millis(450));
        drop(sender);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ends_when_sender_dropped() {
        let (tx, rx) = broadcast::channel::<u32>(4);
        let mut stream = Box::pin(sample_and_hold(rx, Duration::from_millis(100)));
        drop(tx);
        assert_eq!(stream.next().await, None);
    }
}
