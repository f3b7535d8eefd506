//! Debounced autosave: persist local edits without user action.
//!
//! Two independent debounce policies subscribe to the same "local edit
//! occurred" signal: the autosave timer (slow, feeds the durable commit
//! path) and the broadcast timer (fast, feeds the advisory channel
//! send). They share the [`DebounceTimer`] mechanism but never a timer
//! instance, so save latency stays decoupled from broadcast latency.
//!
//! Timers are owned by the session that armed them — no process-wide
//! timer state — and only ever enqueue a tick into the session's command
//! queue, so every state transition still happens on the single driver
//! task.

use std::time::Duration;

use tokio::task::JoinHandle;

/// Default delay between the last edit and the autosave commit.
pub const AUTOSAVE_DELAY: Duration = Duration::from_secs(2);

/// Default delay between the last edit and the advisory broadcast.
pub const BROADCAST_DELAY: Duration = Duration::from_millis(600);

/// A restartable one-shot timer. Arming cancels any pending shot.
#[derive(Default)]
pub struct DebounceTimer {
    handle: Option<JoinHandle<()>>,
}

impl DebounceTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the timer. After `delay` with no further call,
    /// `fire` runs once on a spawned task. Must be called from within a
    /// tokio runtime.
    pub fn arm<F>(&mut self, delay: Duration, fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire();
        }));
    }

    /// Cancel the pending shot, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Whether and when autosave fires. Disabling cancels the armed timer
/// immediately and suspends arming until re-enabled; a failed save does
/// not disable anything — the next edit re-arms normally.
#[derive(Debug, Clone)]
pub struct AutosavePolicy {
    enabled: bool,
    delay: Duration,
}

impl Default for AutosavePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: AUTOSAVE_DELAY,
        }
    }
}

impl AutosavePolicy {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            enabled: true,
            delay,
        }
    }

    /// Called on every local edit: `Some(delay)` when a timer should be
    /// (re)armed, `None` when autosave is disabled.
    pub fn on_edit(&self) -> Option<Duration> {
        self.enabled.then_some(self.delay)
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_timer_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = DebounceTimer::new();

        timer.arm(Duration::from_millis(10), move || {
            let _ = tx.send(());
        });
        assert!(timer.is_armed());

        tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("timer did not fire")
            .unwrap();
    }

    #[tokio::test]
    async fn test_rearm_collapses_to_single_fire() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = DebounceTimer::new();

        for _ in 0..5 {
            let fired = fired.clone();
            timer.arm(Duration::from_millis(20), move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_prevents_fire() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = DebounceTimer::new();

        let counter = fired.clone();
        timer.arm(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();
        assert!(!timer.is_armed());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_drop_aborts_pending_shot() {
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let mut timer = DebounceTimer::new();
            let counter = fired.clone();
            timer.arm(Duration::from_millis(10), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_policy_disabled_suspends_arming() {
        let mut policy = AutosavePolicy::default();
        assert_eq!(policy.on_edit(), Some(AUTOSAVE_DELAY));

        policy.set_enabled(false);
        assert_eq!(policy.on_edit(), None);

        policy.set_enabled(true);
        assert_eq!(policy.on_edit(), Some(AUTOSAVE_DELAY));
    }

    #[test]
    fn test_policy_custom_delay() {
        let policy = AutosavePolicy::with_delay(Duration::from_millis(50));
        assert_eq!(policy.on_edit(), Some(Duration::from_millis(50)));
    }
}
