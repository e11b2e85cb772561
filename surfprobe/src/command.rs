use crossbeam::channel::Receiver;
use std::borrow::Cow;
use std::ffi::OsStr;
use std::io;
use std::process::{Command, ExitStatus, Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::Level::Debug;
use log::{debug, log_enabled};

pub struct CmdOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl From<Output> for CmdOutput {
    fn from(output: Output) -> Self {
        Self {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

impl CmdOutput {
    /// Converts to a `Result` object that is `Ok` only if the [ExitStatus] is
    /// success.
    pub fn err_on_status(self) -> crate::Result<Self> {
        if self.status.success() {
            return Ok(self);
        }

        // No code means the child was killed by a signal
        let code = self.status.code().unwrap_or(-1);

        Err(crate::Error::CommandError(
            code,
            self.stderr_utf8_lossy().to_string(),
        ))
    }

    #[inline]
    pub fn ok(&self) -> bool {
        self.status.success()
    }

    #[inline]
    pub fn stdout_utf8_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    #[inline]
    pub fn stderr_utf8_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

/// Splits a string into arguments following `sh` quoting rules
///
/// Single quotes keep everything literal, double quotes and bare words allow
/// backslash escapes, and adjacent quoted or bare pieces join into one word.
/// Returns `None` for an unterminated quote or a trailing backslash.
pub fn split(s: &str) -> Option<Vec<String>> {
    #[derive(PartialEq)]
    enum State {
        Bare,
        Single,
        Double,
    }

    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut state = State::Bare;
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        match state {
            State::Single => match c {
                '\'' => state = State::Bare,
                _ => word.push(c),
            },
            State::Double => match c {
                '"' => state = State::Bare,
                '\\' => {
                    let next = chars.next()?;
                    if !matches!(next, '"' | '\\' | '$' | '`') {
                        word.push('\\');
                    }
                    word.push(next);
                }
                _ => word.push(c),
            },
            State::Bare => match c {
                '\'' => {
                    state = State::Single;
                    in_word = true;
                }
                '"' => {
                    state = State::Double;
                    in_word = true;
                }
                '\\' => {
                    word.push(chars.next()?);
                    in_word = true;
                }
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut word));
                        in_word = false;
                    }
                }
                _ => {
                    word.push(c);
                    in_word = true;
                }
            },
        }
    }

    if state != State::Bare {
        return None;
    }

    if in_word {
        words.push(word);
    }

    Some(words)
}

/// Quotes a string with single quotes if it contains anything the shell would
/// treat specially
pub fn quote(s: &str) -> Cow<'_, str> {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if safe {
        return Cow::Borrowed(s);
    }

    Cow::Owned(single_quote(s))
}

/// Always wraps in single quotes, closing and reopening around any `'`
pub fn single_quote(s: &str) -> String {
    let mut new = String::with_capacity(s.len() + 2);
    new.push('\'');
    for c in s.chars() {
        if c == '\'' {
            new.push_str("'\\''");
        } else {
            new.push(c);
        }
    }
    new.push('\'');
    new
}

/// Always wraps in double quotes, escaping the characters `sh` still
/// interprets inside them
pub fn double_quote(s: &str) -> String {
    let mut new = String::with_capacity(s.len() + 2);
    new.push('"');
    for c in s.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            new.push('\\');
        }
        new.push(c);
    }
    new.push('"');
    new
}

pub type OutputCallback<'a> = dyn FnMut(&[u8]) -> anyhow::Result<()> + 'a;

/// Run a command passing the stdout and stderr to the given closures.
///
/// A message on (or disconnect of a sender for) `kill_child` kills the child,
/// otherwise this function runs until the child finishes. Callback errors are
/// logged and stop further delivery but don't stop the child.
pub fn run_cmd_streamed<C, S>(
    cmd: C,
    args: &[S],
    on_stdout: &mut OutputCallback,
    on_stderr: &mut OutputCallback,
    kill_child: Option<Receiver<()>>,
) -> io::Result<ExitStatus>
where
    C: AsRef<OsStr>,
    S: AsRef<OsStr>,
{
    if log_enabled!(Debug) {
        log_cmd(&cmd, args);
    }
    let mut child = Command::new(cmd)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .spawn()?;

    let (out, err) = match (child.stdout.take(), child.stderr.take()) {
        (Some(out), Some(err)) => (out, err),
        _ => return Err(io::Error::new(io::ErrorKind::Other, "child pipes missing")),
    };

    let child = Arc::new(Mutex::new(child));
    let finished = Arc::new(AtomicBool::new(false));

    if let Some(chan) = kill_child {
        let finished = Arc::clone(&finished);
        let child = Arc::clone(&child);
        std::thread::spawn(move || {
            // Both a message and a dropped sender mean stop
            let _ = chan.recv();
            if finished.load(Ordering::Relaxed) {
                return;
            }
            match child.lock() {
                Ok(mut c) => {
                    if let Err(e) = c.kill() {
                        log::error!("failed to kill child: {}", e);
                    }
                }
                Err(_) => log::error!("child lock poisoned"),
            }
        });
    }

    let mut failed = false;
    read2(out, err, &mut |is_out, data| {
        if failed {
            return;
        }
        let res = if is_out { on_stdout(data) } else { on_stderr(data) };
        if let Err(e) = res {
            log::error!("output callback failed: {}", e);
            failed = true;
        }
    })?;

    // Poll instead of holding the lock in wait() so a late kill can still land
    let res = loop {
        let polled = match child.lock() {
            Ok(mut c) => c.try_wait(),
            Err(_) => Err(io::Error::new(io::ErrorKind::Other, "child lock poisoned")),
        };
        match polled {
            Ok(Some(status)) => break Ok(status),
            Ok(None) => std::thread::sleep(Duration::from_millis(10)),
            Err(e) => break Err(e),
        }
    };
    finished.store(true, Ordering::Relaxed);
    res
}

pub fn run_cmd<C, S>(cmd: C, args: &[S]) -> io::Result<CmdOutput>
where
    C: AsRef<OsStr>,
    S: AsRef<OsStr>,
{
    if log_enabled!(Debug) {
        log_cmd(&cmd, args);
    }
    Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map(|output| output.into())
}

pub fn log_cmd<C, S>(cmd: &C, args: &[S])
where
    C: AsRef<OsStr>,
    S: AsRef<OsStr>,
{
    let mut line = cmd.as_ref().to_string_lossy().into_owned();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.as_ref().to_string_lossy());
    }
    debug!("Running command: `{}`", line);
}

use self::imp::read2;

#[cfg(unix)]
mod imp {
    use std::io::{self, Read};
    use std::os::unix::prelude::*;
    use std::process::{ChildStderr, ChildStdout};

    struct Pipe<'a> {
        reader: &'a mut dyn Read,
        fd: RawFd,
        is_out: bool,
        open: bool,
    }

    /// Read both pipes of a child until they close, handing every chunk to
    /// `data` as it arrives
    pub fn read2(
        mut out_pipe: ChildStdout,
        mut err_pipe: ChildStderr,
        data: &mut dyn FnMut(bool, &[u8]),
    ) -> io::Result<()> {
        let out_fd = out_pipe.as_raw_fd();
        let err_fd = err_pipe.as_raw_fd();
        let mut pipes = [
            Pipe {
                reader: &mut out_pipe,
                fd: out_fd,
                is_out: true,
                open: true,
            },
            Pipe {
                reader: &mut err_pipe,
                fd: err_fd,
                is_out: false,
                open: true,
            },
        ];

        for p in pipes.iter() {
            unsafe {
                libc::fcntl(p.fd, libc::F_SETFL, libc::O_NONBLOCK);
            }
        }

        let mut buf = [0u8; 8192];

        while pipes.iter().any(|p| p.open) {
            let mut fds: Vec<libc::pollfd> = pipes
                .iter()
                .filter(|p| p.open)
                .map(|p| libc::pollfd {
                    fd: p.fd,
                    events: libc::POLLIN,
                    revents: 0,
                })
                .collect();

            let r = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
            if r == -1 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }

            for pfd in fds.iter().filter(|it| it.revents != 0) {
                let pipe = match pipes.iter_mut().find(|p| p.fd == pfd.fd) {
                    Some(v) => v,
                    None => continue,
                };
                loop {
                    match pipe.reader.read(&mut buf) {
                        Ok(0) => {
                            pipe.open = false;
                            break;
                        }
                        Ok(n) => data(pipe.is_out, &buf[..n]),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Ok(())
    }
}
