use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crossbeam::channel::{bounded, Receiver, Sender};

/// Allows cancelling active tasks
///
/// Dropping any canceller also cancels the task.
#[derive(Clone)]
pub struct TaskCanceller {
    cancel: Arc<AtomicBool>,
}

impl Drop for TaskCanceller {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed)
    }
}

impl TaskCanceller {
    pub fn new() -> (Self, TaskCancelCheck) {
        let cancelled = Arc::new(AtomicBool::new(false));
        (
            Self {
                cancel: Arc::clone(&cancelled),
            },
            TaskCancelCheck { cancelled },
        )
    }

    /// Cancel the task. Invoking this more than once has no further effect.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

#[derive(Clone)]
pub struct TaskCancelCheck {
    cancelled: Arc<AtomicBool>,
}

impl TaskCancelCheck {
    /// A check that is never cancelled
    pub fn none() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once the task was cancelled
    pub fn check(&self) -> crate::Result<()> {
        if self.was_cancelled() {
            Err(crate::Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

pub trait EventMonitor<T>: Send + Sync {
    fn on_event(&self, evt: T);
}

impl<U> EventMonitor<U> for Box<dyn EventMonitor<U>> {
    fn on_event(&self, evt: U) {
        self.as_ref().on_event(evt)
    }
}

/// An [EventMonitor] that drops everything
pub struct NoopMonitor;

impl<T> EventMonitor<T> for NoopMonitor {
    fn on_event(&self, _evt: T) {}
}

/// An [EventMonitor] that forwards the events onto a channel.
pub struct ChannelEventMonitor<T>
where
    T: Send,
{
    chan: Sender<T>,
}

impl<T: Send> ChannelEventMonitor<T> {
    pub fn create_with_bound(bound: usize) -> (Self, Receiver<T>) {
        let (tx, rx) = bounded(bound);
        (Self::new(tx), rx)
    }

    pub fn new(chan: Sender<T>) -> Self {
        Self { chan }
    }
}

impl<T: Send> EventMonitor<T> for ChannelEventMonitor<T> {
    fn on_event(&self, evt: T) {
        let _ = self.chan.send(evt);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cancel() {
        let (canceller, check) = TaskCanceller::new();
        let other = check.clone();
        assert!(check.check().is_ok());
        canceller.cancel();
        assert!(check.was_cancelled());
        assert!(other.was_cancelled());
        assert!(matches!(other.check(), Err(crate::Error::Cancelled)));
    }

    #[test]
    fn test_drop_cancels() {
        let (canceller, check) = TaskCanceller::new();
        assert!(!check.was_cancelled());
        drop(canceller);
        assert!(check.was_cancelled());
    }

    #[test]
    fn test_channel_monitor() {
        let (mon, rx) = ChannelEventMonitor::create_with_bound(4);
        mon.on_event(1);
        mon.on_event(2);
        assert_eq!(rx.try_iter().collect::<Vec<i32>>(), vec![1, 2]);
        assert!(!TaskCancelCheck::none().was_cancelled());
    }
}
