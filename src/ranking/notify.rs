use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::instrument;

use crate::constants::{LEADERBOARD_CHANGED, NOTIFY_CAPACITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderboardEvent {
    /// Rankings may be stale; carries no payload, subscribers re-query
    Changed,
}

impl LeaderboardEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            LeaderboardEvent::Changed => LEADERBOARD_CHANGED,
        }
    }
}

/// Fire-and-forget fan-out of ranking change signals.
///
/// Sending never blocks: with no subscribers the signal is dropped, and a subscriber that falls
/// more than the channel capacity behind simply loses the surplus.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<LeaderboardEvent>,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(NOTIFY_CAPACITY)
    }
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns the number of subscribers the signal reached.
    #[instrument(skip(self))]
    pub fn notify(&self) -> usize {
        match self.tx.send(LeaderboardEvent::Changed) {
            Ok(receivers) => {
                tracing::debug!(receivers, "leaderboard change signalled");
                receivers
            }
            Err(_) => {
                tracing::trace!("leaderboard change signalled with no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> ChangeSubscription {
        ChangeSubscription {
            rx: self.tx.subscribe(),
        }
    }
}

#[derive(Debug)]
pub struct ChangeSubscription {
    rx: broadcast::Receiver<LeaderboardEvent>,
}

impl ChangeSubscription {
    /// Waits for the next change signal.
    ///
    /// Signals that piled up while the subscriber was busy (including any it lagged past) are
    /// folded into the one returned here. Returns `None` once every notifier is gone.
    pub async fn changed(&mut self) -> Option<LeaderboardEvent> {
        let event = match self.rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "subscriber lagged behind change signals");
                LeaderboardEvent::Changed
            }
            Err(RecvError::Closed) => return None,
        };

        loop {
            match self.rx.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        Some(event)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_notify_without_subscribers() {
        let notifier = ChangeNotifier::default();
        assert_eq!(notifier.notify(), 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let notifier = ChangeNotifier::default();
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        assert_eq!(notifier.notify(), 2);
        assert_eq!(first.changed().await, Some(LeaderboardEvent::Changed));
        assert_eq!(second.changed().await, Some(LeaderboardEvent::Changed));
    }

    #[tokio::test]
    async fn test_lagging_subscriber_coalesces() {
        let notifier = ChangeNotifier::new(2);
        let mut sub = notifier.subscribe();

        for _ in 0..5 {
            notifier.notify();
        }

        assert_eq!(sub.changed().await, Some(LeaderboardEvent::Changed));

        let pending = tokio::time::timeout(Duration::from_millis(50), sub.changed()).await;
        assert!(pending.is_err(), "backlog should have been folded into one signal");
    }

    #[tokio::test]
    async fn test_closed_when_notifier_dropped() {
        let notifier = ChangeNotifier::default();
        let mut sub = notifier.subscribe();
        drop(notifier);

        assert_eq!(sub.changed().await, None);
    }

    #[test]
    fn test_event_name() {
        assert_eq!(LeaderboardEvent::Changed.name(), "leaderboard:changed");
    }
}
