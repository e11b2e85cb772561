use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Receiver};

use crate::printer::{color, StatusPrinter, FAIL_MARKER, SUCCESS_MARKER};
use surfprobe::dispatch::DispatchEvent;
use surfprobe::tasks::analyze::Event;
use surfprobe::tasks::{cancelable_recv, ChannelEventMonitor, TaskCancelCheck};
use surfprobe::Outcome;

/// Prints analysis progress with a running probe count on the status line
pub struct PrintMonitor {
    printer: StatusPrinter,
    package: String,
    total: usize,
    done: usize,
    failed: usize,
}

impl PrintMonitor {
    /// Start printing on a new thread
    ///
    /// The thread ends once the returned monitor is dropped and every event
    /// has been printed.
    pub fn start(cancel: TaskCancelCheck) -> (ChannelEventMonitor<Event>, JoinHandle<()>) {
        let (tx, rx) = unbounded();
        let handle = std::thread::spawn(move || {
            let mut pm = Self::new();
            pm.drain(&cancel, &rx);
        });
        (ChannelEventMonitor::new(tx), handle)
    }

    fn new() -> Self {
        let printer = StatusPrinter::new();
        printer.advance_line();
        Self {
            printer,
            package: String::new(),
            total: 0,
            done: 0,
            failed: 0,
        }
    }

    fn drain(&mut self, cancel: &TaskCancelCheck, rx: &Receiver<Event>) {
        loop {
            match cancelable_recv(cancel, rx) {
                Ok(Some(evt)) => self.on_event(evt),
                Ok(None) => return,
                Err(_) => break,
            }
        }
        self.printer.println_colored(
            "Cancelled, waiting for running probes to finish",
            color::INTERESTING,
        );
        for evt in rx.iter() {
            self.on_event(evt);
        }
    }

    fn update_status_line(&self) {
        self.printer.update_status_line_colored(
            format!(
                "{} | {}/{} probes | {} failed",
                self.package, self.done, self.total, self.failed
            ),
            color::CYAN,
        );
    }

    fn on_event(&mut self, evt: Event) {
        match evt {
            Event::Normalized {
                package,
                activities,
            } => {
                self.printer
                    .println(format!("Found {} activities in {}", activities, package));
                self.package = package;
            }
            Event::Classified { surfaces } => {
                let c = if surfaces > 0 {
                    color::INTERESTING
                } else {
                    color::GREY
                };
                self.printer
                    .println_colored(format!("{} attack surface activities", surfaces), c);
            }
            Event::ProbesBuilt { commands } => {
                self.total = commands;
                if commands > 0 {
                    self.printer
                        .println(format!("Sending {} probe intents", commands));
                    self.update_status_line();
                }
            }
            Event::Dispatch(DispatchEvent::Submitted { index, command_text }) => {
                log::debug!("probe {} submitted: {}", index, command_text);
            }
            Event::Dispatch(DispatchEvent::Completed { index, outcome }) => {
                self.done += 1;
                let (marker, c) = match outcome {
                    Outcome::Pending => (SUCCESS_MARKER, color::OK),
                    Outcome::Failed => {
                        self.failed += 1;
                        (FAIL_MARKER, color::ERROR)
                    }
                };
                self.printer
                    .println_colored(format!("{} probe {}: {}", marker, index + 1, outcome), c);
                self.update_status_line();
            }
            Event::ReportSaved { path } => {
                self.printer.println_colored(
                    format!("Report written to {}", path.display()),
                    color::OK,
                );
            }
        }
    }
}
