use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A cancellable one-shot or periodic timer running on the tokio runtime.
///
/// Starting a timer that is already armed replaces it. Dropping the timer
/// cancels it.
#[derive(Debug, Default)]
pub(crate) struct Timer(Option<JoinHandle<()>>);

impl Timer {
    pub(crate) const fn new() -> Self {
        Self(None)
    }

    /// Runs `callback` once after `after`.
    pub(crate) fn start<F>(&mut self, after: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        self.0 = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            callback();
        }));
    }

    /// Runs `callback` once after `after`, if `owner` is still alive then.
    pub(crate) fn start_weak<T>(&mut self, after: Duration, owner: &Arc<T>, callback: fn(Arc<T>))
    where
        T: Send + Sync + 'static,
    {
        let owner = Arc::downgrade(owner);
        self.start(after, move || {
            if let Some(owner) = owner.upgrade() {
                callback(owner);
            }
        });
    }

    /// Runs `callback` every `every` until cancelled.
    pub(crate) fn interval<F>(&mut self, every: Duration, callback: F)
    where
        F: Fn() + Send + 'static,
    {
        self.cancel();
        self.0 = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                callback();
            }
        }));
    }

    pub(crate) fn cancel(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.0.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_start_fires_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let mut timer = Timer::new();
        timer.start(Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(timer.is_active());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_interval() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let mut timer = Timer::new();
        timer.interval(Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);

        timer.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert!(!timer.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_weak_skips_dropped_owner() {
        let owner = Arc::new(AtomicUsize::new(0));
        let mut timer = Timer::new();
        timer.start_weak(Duration::from_secs(1), &owner, |owner| {
            owner.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(owner.load(Ordering::SeqCst), 1);

        let dropped = Arc::new(AtomicUsize::new(0));
        timer.start_weak(Duration::from_secs(1), &dropped, |owner| {
            owner.fetch_add(1, Ordering::SeqCst);
        });
        drop(dropped);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!timer.is_active());
    }
}
