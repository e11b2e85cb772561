//! Runs probe commands against the device
//!
//! Submission happens on the calling thread and is paced by a [PacingGate];
//! execution happens on a [WorkerPool] of `concurrency` threads. Results come
//! back in completion order.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, unbounded, RecvTimeoutError, SendTimeoutError, Sender};
use serde::Serialize;

use crate::command::{run_cmd_streamed, split};
use crate::config::{DEFAULT_CONCURRENCY, DEFAULT_INTERVAL};
use crate::intent::ProbeCommand;
use crate::tasks::{EventMonitor, NoopMonitor, TaskCancelCheck};

/// Detail recorded for a command that ran past the timeout
pub const TIMEOUT_DETAIL: &str = "timeout";
/// Detail recorded for a command that never ran because of cancellation
pub const CANCELLED_DETAIL: &str = "cancelled";

const FAILURE_MARKERS: [&str; 2] = ["Exception", "Error"];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecOutput {
    pub success: bool,
    /// stdout and stderr together
    pub output: String,
}

/// Runs the text of a probe command
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, command_text: &str) -> crate::Result<ExecOutput>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    /// Launched fine, whether the payload did anything is for a human to
    /// decide
    Pending,
    Failed,
}

impl Display for Outcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "Pending",
            Self::Failed => "Failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub command: ProbeCommand,
    pub outcome: Outcome,
    pub detail: Option<String>,
}

impl ProbeResult {
    /// `Pending`, or `Failed: <detail>`
    pub fn result_text(&self) -> String {
        match self.outcome {
            Outcome::Pending => self.outcome.to_string(),
            Outcome::Failed => format!(
                "{}: {}",
                self.outcome,
                self.detail.as_deref().unwrap_or_default()
            ),
        }
    }
}

/// Decide the outcome of a finished execution
///
/// Tools like `am` often print their errors with a zero exit status, so the
/// output is checked too.
pub fn classify_execution(exec: crate::Result<ExecOutput>) -> (Outcome, Option<String>) {
    match exec {
        Err(e) => (Outcome::Failed, Some(e.to_string())),
        Ok(out) => {
            let failed = !out.success || FAILURE_MARKERS.iter().any(|m| out.output.contains(m));
            let outcome = if failed {
                Outcome::Failed
            } else {
                Outcome::Pending
            };
            let detail = if out.output.is_empty() {
                None
            } else {
                Some(out.output)
            };
            (outcome, detail)
        }
    }
}

/// Enforces a minimum time between consecutive submissions
pub struct PacingGate {
    interval: Duration,
    last: Option<Instant>,
}

impl PacingGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Block until `interval` has passed since the last recorded submission
    ///
    /// Returns false if `cancel` fires while waiting.
    pub fn wait(&self, cancel: &TaskCancelCheck) -> bool {
        if let Some(last) = self.last {
            let ready_at = last + self.interval;
            loop {
                if cancel.was_cancelled() {
                    return false;
                }
                let now = Instant::now();
                if now >= ready_at {
                    break;
                }
                thread::sleep((ready_at - now).min(Duration::from_millis(100)));
            }
        }
        !cancel.was_cancelled()
    }

    /// Record that a submission was handed to a worker just now
    pub fn mark_submitted(&mut self) {
        self.last = Some(Instant::now());
    }
}

/// A fixed number of scoped worker threads fed through a rendezvous channel
pub struct WorkerPool {
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    /// Run `work` for every job `submit` puts on the queue
    ///
    /// `submit` runs on the calling thread. Each send blocks until a worker is
    /// free to take the job, and the call returns once `submit` is done and
    /// every job has finished. Results are in completion order. A panicking job loses its
    /// result but the rest of the pool keeps going.
    pub fn run<J, R, W, S>(&self, work: W, submit: S) -> Vec<R>
    where
        J: Send,
        R: Send,
        W: Fn(J) -> R + Sync,
        S: FnOnce(&Sender<J>),
    {
        let (job_tx, job_rx) = bounded::<J>(0);
        let (res_tx, res_rx) = unbounded::<R>();
        let work = &work;

        let scoped = crossbeam::thread::scope(|s| {
            for i in 0..self.size {
                let job_rx = job_rx.clone();
                let res_tx = res_tx.clone();
                s.builder()
                    .name(format!("probe-worker-{}", i))
                    .spawn(move |_| {
                        for job in job_rx.iter() {
                            let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(
                                || work(job),
                            ));
                            match res {
                                Ok(r) => {
                                    let _ = res_tx.send(r);
                                }
                                Err(_) => log::error!("worker job panicked"),
                            }
                        }
                    })
                    .map(|_| ())
                    .unwrap_or_else(|e| log::error!("failed to spawn worker: {}", e));
            }
            drop(res_tx);

            submit(&job_tx);
            drop(job_tx);
        });

        if scoped.is_err() {
            log::error!("worker pool thread panicked");
        }

        res_rx.try_iter().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    Submitted {
        index: usize,
        command_text: String,
    },
    Completed {
        index: usize,
        outcome: Outcome,
    },
}

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub concurrency: usize,
    pub interval: Duration,
    pub timeout: Option<Duration>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            interval: DEFAULT_INTERVAL,
            timeout: None,
        }
    }
}

enum Execution {
    Done(crate::Result<ExecOutput>),
    TimedOut,
}

/// Run the executor on a helper thread so a hung command can be abandoned
fn execute_with_timeout(
    executor: &Arc<dyn CommandExecutor>,
    text: &str,
    timeout: Duration,
) -> Execution {
    let (tx, rx) = bounded(1);
    let exec = Arc::clone(executor);
    let owned = text.to_string();
    let spawned = thread::Builder::new()
        .name("probe-exec".into())
        .spawn(move || {
            let _ = tx.send(exec.execute(&owned));
        });

    if let Err(e) = spawned {
        return Execution::Done(Err(e.into()));
    }

    match rx.recv_timeout(timeout) {
        Ok(res) => Execution::Done(res),
        Err(RecvTimeoutError::Timeout) => Execution::TimedOut,
        Err(RecvTimeoutError::Disconnected) => {
            Execution::Done(Err(crate::Error::new_generic("executor panicked")))
        }
    }
}

fn run_one(
    command: &ProbeCommand,
    executor: &Arc<dyn CommandExecutor>,
    timeout: Option<Duration>,
    cancel: &TaskCancelCheck,
) -> (Outcome, Option<String>) {
    if cancel.was_cancelled() {
        return (Outcome::Failed, Some(CANCELLED_DETAIL.into()));
    }

    let exec = match timeout {
        None => Execution::Done(executor.execute(&command.command_text)),
        Some(t) => execute_with_timeout(executor, &command.command_text, t),
    };

    match exec {
        Execution::Done(res) => classify_execution(res),
        Execution::TimedOut => {
            log::warn!("timed out: {}", command.command_text);
            (Outcome::Failed, Some(TIMEOUT_DETAIL.into()))
        }
    }
}

/// Wait for a free worker to take `job`
///
/// Returns false if the workers are gone, or if `cancel` fired while every
/// worker was busy.
fn hand_off<J>(queue: &Sender<J>, mut job: J, cancel: &TaskCancelCheck) -> bool {
    loop {
        match queue.send_timeout(job, Duration::from_millis(100)) {
            Ok(()) => return true,
            Err(SendTimeoutError::Disconnected(_)) => return false,
            Err(SendTimeoutError::Timeout(it)) => {
                if cancel.was_cancelled() {
                    return false;
                }
                job = it;
            }
        }
    }
}

/// Dispatch with the given concurrency and pacing, no timeout and no way to
/// cancel
pub fn dispatch(
    commands: Vec<ProbeCommand>,
    concurrency: usize,
    interval: Duration,
    executor: Arc<dyn CommandExecutor>,
) -> Vec<ProbeResult> {
    let opts = DispatchOptions {
        concurrency,
        interval,
        timeout: None,
    };
    dispatch_with(
        commands,
        &opts,
        executor,
        &TaskCancelCheck::none(),
        &NoopMonitor,
    )
}

/// Dispatch every command, returning exactly one result per command
///
/// Commands not submitted before `cancel` fired are reported as failed with a
/// `cancelled` detail after the completed ones.
pub fn dispatch_with(
    commands: Vec<ProbeCommand>,
    opts: &DispatchOptions,
    executor: Arc<dyn CommandExecutor>,
    cancel: &TaskCancelCheck,
    monitor: &dyn EventMonitor<DispatchEvent>,
) -> Vec<ProbeResult> {
    let total = commands.len();
    log::info!(
        "dispatching {} commands (concurrency {}, interval {:?}, timeout {:?})",
        total,
        opts.concurrency,
        opts.interval,
        opts.timeout
    );

    let pool = WorkerPool::new(opts.concurrency);
    let mut gate = PacingGate::new(opts.interval);
    let commands_ref = &commands;

    let completed: Vec<(usize, Outcome, Option<String>)> = pool.run(
        |index: usize| {
            let (outcome, detail) = run_one(&commands_ref[index], &executor, opts.timeout, cancel);
            monitor.on_event(DispatchEvent::Completed { index, outcome });
            (index, outcome, detail)
        },
        |queue| {
            for (index, cmd) in commands_ref.iter().enumerate() {
                if !gate.wait(cancel) {
                    log::warn!("cancelled with {} commands left", total - index);
                    break;
                }
                monitor.on_event(DispatchEvent::Submitted {
                    index,
                    command_text: cmd.command_text.clone(),
                });
                if !hand_off(queue, index, cancel) {
                    break;
                }
                gate.mark_submitted();
            }
        },
    );

    let mut results = Vec::with_capacity(total);
    let mut slots: Vec<Option<ProbeCommand>> = commands.into_iter().map(Some).collect();

    for (index, outcome, detail) in completed {
        if let Some(command) = slots[index].take() {
            results.push(ProbeResult {
                command,
                outcome,
                detail,
            });
        }
    }

    for (index, slot) in slots.into_iter().enumerate() {
        if let Some(command) = slot {
            log::debug!("no result for command {}", index);
            let detail = if cancel.was_cancelled() {
                CANCELLED_DETAIL
            } else {
                "no result from worker"
            };
            results.push(ProbeResult {
                command,
                outcome: Outcome::Failed,
                detail: Some(detail.into()),
            });
        }
    }

    results
}

/// Runs command text locally, splitting it the way `sh` would
///
/// With a timeout the child is killed once it runs too long.
#[derive(Default)]
pub struct ShellExecutor {
    timeout: Option<Duration>,
}

impl ShellExecutor {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl CommandExecutor for ShellExecutor {
    fn execute(&self, command_text: &str) -> crate::Result<ExecOutput> {
        let argv = split(command_text).ok_or_else(|| {
            crate::Error::new_generic(&format!("can't split command: {}", command_text))
        })?;
        let (prog, args) = argv
            .split_first()
            .ok_or_else(|| crate::Error::new_generic("empty command"))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        // The watchdog kills the child unless told it finished in time
        let watchdog = self.timeout.map(|timeout| {
            let (kill_tx, kill_rx) = bounded::<()>(1);
            let (done_tx, done_rx) = bounded::<()>(1);
            thread::spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(timeout) {
                    let _ = kill_tx.send(());
                }
            });
            (kill_rx, done_tx)
        });
        let (kill_rx, done_tx) = match watchdog {
            Some((k, d)) => (Some(k), Some(d)),
            None => (None, None),
        };

        let status = run_cmd_streamed(
            prog,
            args,
            &mut |d| {
                stdout.extend_from_slice(d);
                Ok(())
            },
            &mut |d| {
                stderr.extend_from_slice(d);
                Ok(())
            },
            kill_rx,
        );
        if let Some(done) = done_tx {
            let _ = done.send(());
        }
        let status = status?;

        let mut output = String::from_utf8_lossy(&stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&stderr));
        Ok(ExecOutput {
            success: status.success(),
            output,
        })
    }
}

/// Logs commands instead of running them
pub struct DryRunExecutor;

impl CommandExecutor for DryRunExecutor {
    fn execute(&self, command_text: &str) -> crate::Result<ExecOutput> {
        log::info!("dry run: {}", command_text);
        Ok(ExecOutput {
            success: true,
            output: String::new(),
        })
    }
}
