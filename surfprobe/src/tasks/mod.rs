pub mod analyze;
pub mod permissions;

pub mod task;
pub use task::{ChannelEventMonitor, EventMonitor, NoopMonitor, TaskCancelCheck, TaskCanceller};

pub use analyze::analyze;
pub use permissions::import_permissions;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use std::time::Duration;

use crate::{Error, Result};

/// Used to receive something from a channel and check the TaskCancelCheck.
///
/// Returns Ok(None) if the channel was disconnected
pub fn cancelable_recv<T>(cancel: &TaskCancelCheck, rx: &Receiver<T>) -> Result<Option<T>> {
    while !cancel.was_cancelled() {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Ok(None),
            Ok(v) => return Ok(Some(v)),
        };
    }
    Err(Error::Cancelled)
}
