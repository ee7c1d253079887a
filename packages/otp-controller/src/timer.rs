//! Cancellable countdown driven by the tokio clock.
//!
//! One `Countdown` serves one purpose (resend cooldown or absolute expiry).
//! Restarting replaces the running countdown atomically: every `start` bumps
//! an epoch and a sleeping task only fires if its epoch is still current, so
//! two countdowns for the same purpose never overlap.
//!
//! Runs on `tokio::time`, which lets tests drive it with a paused clock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Longest countdown ever scheduled. Server-supplied windows above it are
/// clamped so the deadline stays representable.
pub const MAX_COUNTDOWN: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Default)]
struct Slot {
    deadline: Option<Instant>,
    epoch: u64,
    fired: bool,
    task: Option<JoinHandle<()>>,
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Countdown {
    label: &'static str,
    slot: Arc<Mutex<Slot>>,
    fires: Arc<watch::Sender<u64>>,
}

impl Countdown {
    pub fn new(label: &'static str) -> Self {
        let (fires, _) = watch::channel(0);
        Self {
            label,
            slot: Arc::new(Mutex::new(Slot::default())),
            fires: Arc::new(fires),
        }
    }

    /// Start (or restart) the countdown.
    ///
    /// `on_elapsed` runs exactly once when `duration` passes, unless the
    /// countdown is cancelled, restarted or dropped first. Must be called
    /// from within a tokio runtime. Durations above [`MAX_COUNTDOWN`] are
    /// clamped.
    pub fn start<F>(&self, duration: Duration, on_elapsed: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = Instant::now() + duration.min(MAX_COUNTDOWN);
        let mut slot = lock(&self.slot);

        if let Some(task) = slot.task.take() {
            task.abort();
        }
        slot.epoch += 1;
        slot.deadline = Some(deadline);
        slot.fired = false;

        let epoch = slot.epoch;
        let shared = Arc::downgrade(&self.slot);
        let fires = Arc::clone(&self.fires);
        let label = self.label;

        slot.task = Some(tokio::spawn(async move {
            sleep_until(deadline).await;

            let Some(shared) = shared.upgrade() else {
                return;
            };
            {
                let mut slot = lock(&shared);
                if slot.epoch != epoch {
                    return;
                }
                slot.fired = true;
                slot.task = None;
            }

            debug!(timer = label, "countdown elapsed");
            on_elapsed();
            fires.send_modify(|count| *count += 1);
        }));
    }

    /// Stop the countdown without firing.
    pub fn cancel(&self) {
        let mut slot = lock(&self.slot);
        if let Some(task) = slot.task.take() {
            task.abort();
        }
        slot.epoch += 1;
        slot.deadline = None;
        slot.fired = false;
    }

    /// Time left before firing; zero when idle, cancelled or elapsed.
    pub fn remaining(&self) -> Duration {
        lock(&self.slot)
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }

    /// True once the deadline has passed, even if the firing task has not
    /// been polled yet.
    pub fn has_elapsed(&self) -> bool {
        let slot = lock(&self.slot);
        slot.fired || slot.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn is_running(&self) -> bool {
        let slot = lock(&self.slot);
        !slot.fired && slot.deadline.is_some_and(|d| Instant::now() < d)
    }

    /// Receiver that observes the total number of times this countdown fired.
    pub fn elapsed(&self) -> watch::Receiver<u64> {
        self.fires.subscribe()
    }

    pub fn fire_count(&self) -> u64 {
        *self.fires.borrow()
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.slot).task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Countdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Countdown")
            .field("label", &self.label)
            .field("remaining", &self.remaining())
            .field("fired", &self.fire_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let hook = {
            let count = Arc::clone(&count);
            move || {
                count.fetch_add(1, Ordering::SeqCst);
            }
        };
        (count, hook)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_duration() {
        let timer = Countdown::new("test");
        let (count, hook) = counter();

        timer.start(Duration::from_secs(5), hook);
        assert!(timer.is_running());

        sleep(Duration::from_secs(4)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(timer.fire_count(), 1);
        assert!(timer.has_elapsed());
        assert!(!timer.is_running());
        assert_eq!(timer.remaining(), Duration::ZERO);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_running_countdown() {
        let timer = Countdown::new("test");
        let (first, first_hook) = counter();
        let (second, second_hook) = counter();

        timer.start(Duration::from_secs(5), first_hook);
        sleep(Duration::from_secs(3)).await;
        timer.start(Duration::from_secs(5), second_hook);

        sleep(Duration::from_secs(3)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(3)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(timer.fire_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let timer = Countdown::new("test");
        let (count, hook) = counter();

        timer.start(Duration::from_secs(5), hook);
        timer.cancel();
        sleep(Duration::from_secs(10)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!timer.has_elapsed());
        assert_eq!(timer.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_counts_down() {
        let timer = Countdown::new("test");
        timer.start(Duration::from_secs(60), || {});

        let before = timer.remaining();
        sleep(Duration::from_secs(15)).await;
        let after = timer.remaining();

        assert_eq!(before, Duration::from_secs(60));
        assert_eq!(after, Duration::from_secs(45));
        assert!(after <= before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_pending_countdown() {
        let (count, hook) = counter();
        {
            let timer = Countdown::new("test");
            timer.start(Duration::from_secs(1), hook);
        }
        sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_duration_is_clamped() {
        let timer = Countdown::new("test");

        timer.start(Duration::from_secs(u64::MAX), || {});

        assert!(timer.is_running());
        assert_eq!(timer.remaining(), MAX_COUNTDOWN);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_receiver_observes_fire() {
        let timer = Countdown::new("test");
        let mut fired = timer.elapsed();

        timer.start(Duration::from_secs(2), || {});
        fired.changed().await.unwrap();

        assert_eq!(*fired.borrow(), 1);
    }
}
