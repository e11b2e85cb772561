use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context as AnyhowContext;
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::iterator::{Handle, Signals};

use surfprobe::tasks::{TaskCancelCheck, TaskCanceller};
use surfprobe::{Context, ProbeStore};

pub struct HookedSignals {
    sig_handle: Handle,
    _join_handle: JoinHandle<()>,
}

impl Drop for HookedSignals {
    fn drop(&mut self) {
        if !self.sig_handle.is_closed() {
            self.sig_handle.close();
        }
    }
}

/// Cancel on the first termination signal, the second one gets the default
/// behavior
pub fn hook_to_signals(cancel: TaskCanceller) -> anyhow::Result<HookedSignals> {
    let mut sigs = Signals::new(TERM_SIGNALS)?;
    let sig_handle = sigs.handle();
    let _join_handle = std::thread::spawn(move || {
        let mut seen_exit = false;
        for sig in sigs.forever() {
            if seen_exit {
                _ = signal_hook::low_level::emulate_default_handler(sig);
            } else {
                log::warn!("received signal {}, cancelling", sig);
                cancel.cancel();
                seen_exit = true;
            }
        }
    });

    Ok(HookedSignals {
        sig_handle,
        _join_handle,
    })
}

pub fn task_canceller() -> anyhow::Result<(HookedSignals, TaskCancelCheck)> {
    let (cancel, check) = TaskCanceller::new();
    Ok((hook_to_signals(cancel)?, check))
}

/// Open the store at `path`, or wherever the config says
pub fn open_store(ctx: &dyn Context, path: Option<&Path>) -> anyhow::Result<ProbeStore> {
    let path: PathBuf = match path {
        Some(v) => v.into(),
        None => ctx.get_config()?.database.clone(),
    };
    ProbeStore::open(&path).with_context(|| format!("opening database {}", path.display()))
}

/// Parse a non-negative number of seconds, fractions allowed
pub fn parse_secs(s: &str) -> Result<Duration, String> {
    let secs: f64 = s
        .trim()
        .parse()
        .map_err(|_| format!("`{}` isn't a number of seconds", s))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("`{}` must be zero or more seconds", s));
    }
    Ok(Duration::from_secs_f64(secs))
}
