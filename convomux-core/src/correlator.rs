//! Turn correlator
//!
//! Serializes conversation turns and tags intercepted calls with the active
//! turn id. There is exactly one mutual-exclusion domain system-wide: turns
//! across *all* conversations serialize relative to each other, not just
//! within one conversation. High-concurrency multi-conversation workloads
//! will queue behind this section; that is the contract, not an accident.
//!
//! `begin` is the only operation that may suspend waiting on contention.
//! The component cannot fail, only block.

use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex as AsyncMutex;

/// Global single-slot turn correlator.
///
/// Cheap to clone; clones share the same critical section and active-turn
/// slot.
#[derive(Clone, Default)]
pub struct Correlator {
    section: Arc<AsyncMutex<()>>,
    active: Arc<StdMutex<Option<String>>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the exclusive section and record `turn_id` as active.
    ///
    /// The returned guard clears the active-turn slot and releases the
    /// section when dropped, so every exit path of the wrapped work --
    /// including early returns and panics -- closes the turn window.
    pub async fn begin(&self, turn_id: impl Into<String>) -> TurnGuard {
        let permit = self.section.clone().lock_owned().await;
        *self.active.lock().unwrap() = Some(turn_id.into());
        TurnGuard {
            active: Arc::clone(&self.active),
            _permit: permit,
        }
    }

    /// The turn id currently holding the section, if any.
    ///
    /// Calls recorded while this returns `Some` correlate to that turn;
    /// calls recorded while it returns `None` stay uncorrelated.
    pub fn current_turn(&self) -> Option<String> {
        self.active.lock().unwrap().clone()
    }
}

/// Scope of one active turn. Dropping it ends the turn.
pub struct TurnGuard {
    active: Arc<StdMutex<Option<String>>>,
    _permit: tokio::sync::OwnedMutexGuard<()>,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        *self.active.lock().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_active_turn_scoped_to_guard() {
        let correlator = Correlator::new();
        assert_eq!(correlator.current_turn(), None);

        {
            let _guard = correlator.begin("turn-1").await;
            assert_eq!(correlator.current_turn().as_deref(), Some("turn-1"));
        }

        assert_eq!(correlator.current_turn(), None);
    }

    #[tokio::test]
    async fn test_cleared_on_failure_path() {
        let correlator = Correlator::new();

        async fn failing_turn(correlator: &Correlator) -> Result<(), &'static str> {
            let _guard = correlator.begin("turn-1").await;
            Err("adapter blew up")
        }

        assert!(failing_turn(&correlator).await.is_err());
        assert_eq!(correlator.current_turn(), None);
    }

    /// Two turns opened concurrently from distinct conversations never
    /// overlap in time: strict serialization via interleaved timestamps.
    #[tokio::test]
    async fn test_concurrent_turns_serialize() {
        let correlator = Correlator::new();
        let spans: Arc<StdMutex<Vec<(Instant, Instant, &'static str)>>> =
            Arc::new(StdMutex::new(Vec::new()));

        let run = |turn: &'static str| {
            let correlator = correlator.clone();
            let spans = Arc::clone(&spans);
            tokio::spawn(async move {
                let _guard = correlator.begin(turn).await;
                let start = Instant::now();
                tokio::time::sleep(Duration::from_millis(20)).await;
                let end = Instant::now();
                spans.lock().unwrap().push((start, end, turn));
            })
        };

        // Distinct conversations still contend on the single global section
        let a = run("conv-a/turn");
        let b = run("conv-b/turn");
        a.await.unwrap();
        b.await.unwrap();

        let spans = spans.lock().unwrap();
        assert_eq!(spans.len(), 2);
        let (first, second) = if spans[0].0 <= spans[1].0 {
            (&spans[0], &spans[1])
        } else {
            (&spans[1], &spans[0])
        };
        assert!(
            first.1 <= second.0,
            "turn {} overlapped turn {}",
            first.2,
            second.2
        );
    }
}
