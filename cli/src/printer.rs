use crossterm::cursor::{self, Hide, MoveTo, MoveToNextLine, Show};
use crossterm::style::{ContentStyle, Print, PrintStyledContent, StyledContent, Stylize};
use crossterm::terminal::{self, Clear, ClearType, ScrollUp};
use crossterm::tty::IsTty;
use crossterm::{queue, style::Color};
use std::cell::RefCell;
use std::env::{self, VarError};
use std::fmt::Display;
use std::io::{stdout, Stdout, Write};

type StatusLine = PrintStyledContent<String>;

pub(crate) fn no_color_set() -> bool {
    !matches!(env::var("NO_COLOR"), Err(VarError::NotPresent))
}

#[cfg(feature = "unicode")]
mod constants {
    pub static SUCCESS_MARKER: &str = "✔";
    pub static FAIL_MARKER: &str = "✘";
}

#[cfg(not(feature = "unicode"))]
mod constants {
    pub static SUCCESS_MARKER: &str = "+";
    pub static FAIL_MARKER: &str = "!";
}

pub use constants::*;

pub mod color {
    use crossterm::style::Color;

    // Colorscheme credit to Paul Tol https://personal.sron.nl/~pault/#sec:qualitative

    pub const YELLOW: Color = Color::Rgb {
        r: 0xCC,
        g: 0xBB,
        b: 0x44,
    };
    pub const CYAN: Color = Color::Rgb {
        r: 0x66,
        g: 0xCC,
        b: 0xEE,
    };
    pub const RED: Color = Color::Rgb {
        r: 0xEE,
        g: 0x66,
        b: 0x77,
    };
    pub const GREEN: Color = Color::Rgb {
        r: 0x22,
        g: 0x88,
        b: 0x33,
    };
    pub const GREY: Color = Color::Rgb {
        r: 0xBB,
        g: 0xBB,
        b: 0xBB,
    };

    pub const INTERESTING: Color = YELLOW;
    pub const ERROR: Color = RED;
    pub const OK: Color = GREEN;
}

/// Prints styled lines while keeping a status line pinned to the bottom of
/// the terminal
///
/// Nothing is styled and no status line is drawn unless stdout is a tty and
/// `NO_COLOR` is unset. The printer doesn't lock stdout.
pub struct StatusPrinter {
    is_tty: bool,
    style_enabled: bool,
    status_line: RefCell<Option<StatusLine>>,
    num_status_lines: RefCell<u16>,
}

impl Drop for StatusPrinter {
    fn drop(&mut self) {
        if self.should_style() {
            with_stdout(|s| {
                _ = queue!(s, Clear(ClearType::FromCursorDown), Show);
            });
        }
        self.flush();
    }
}

impl StatusPrinter {
    pub fn new() -> Self {
        let is_tty = stdout().is_tty();
        let style_enabled = !no_color_set();

        if is_tty && style_enabled {
            with_stdout(|s| {
                _ = queue!(s, Hide, Clear(ClearType::FromCursorDown));
            });
        }

        Self {
            is_tty,
            style_enabled,
            status_line: RefCell::new(None),
            num_status_lines: RefCell::new(0),
        }
    }

    pub fn advance_line(&self) {
        with_stdout(|s| {
            _ = queue!(s, MoveToNextLine(1));
            _ = s.flush();
        });
    }

    pub fn println(&self, content: impl Display) {
        self.println_styled(content, ContentStyle::default())
    }

    pub fn println_colored(&self, content: impl Display, color: Color) {
        self.println_styled(content, ContentStyle::default().with(color))
    }

    pub fn println_styled(&self, content: impl Display, style: ContentStyle) {
        let should_style = self.should_style();
        if should_style {
            self.ensure_status_line();
        }
        with_stdout(|s| {
            if should_style {
                _ = queue!(s, PrintStyledContent(StyledContent::new(style, content)));
            } else {
                _ = queue!(s, Print(content));
            }
            _ = queue!(s, Print("\n"));
        });
    }

    fn should_style(&self) -> bool {
        self.is_tty && self.style_enabled
    }

    fn get_num_lines(&self, s: &str) -> Option<u16> {
        let (cols, _) = terminal::size().ok()?;
        let cols = usize::from(cols.max(1));
        u16::try_from(s.chars().count().max(1).div_ceil(cols)).ok()
    }

    fn can_fit_line(&self, num_lines: u16) -> Option<bool> {
        let (_, last) = terminal::size().ok()?;
        let (cur_col, mut cur_row) = cursor::position().ok()?;
        if cur_col != 0 {
            cur_row += 1;
        }
        Some(
            last.checked_sub(cur_row)
                .map(|it| it >= num_lines)
                .unwrap_or(false),
        )
    }

    fn scroll_and_print_status_line(&self, num_lines: u16) {
        let status_line = self.status_line.borrow();
        let status_line = match status_line.as_ref() {
            None => return,
            Some(v) => v,
        };

        // terminal::size counts from 1, cursor positions from 0
        let last_row = match terminal::size() {
            Ok((_, rows)) => rows.saturating_sub(1),
            Err(_) => return,
        };

        let (cur_col, mut cur_row) = match cursor::position() {
            Ok(v) => v,
            Err(_) => return,
        };

        let remaining_lines = last_row.saturating_sub(cur_row);
        let write_at = (last_row + 1).saturating_sub(num_lines);

        with_stdout(|s| {
            if remaining_lines < num_lines {
                _ = queue!(s, ScrollUp(num_lines));
                cur_row = cur_row.saturating_sub(num_lines);
            }

            _ = queue!(
                s,
                MoveTo(0, write_at),
                status_line,
                MoveTo(cur_col, cur_row)
            );
            _ = s.flush();
        });
    }

    fn ensure_status_line(&self) {
        let num_lines = *self.num_status_lines.borrow();

        if num_lines == 0 || self.can_fit_line(num_lines).unwrap_or(true) {
            return;
        }
        with_stdout(|s| {
            _ = queue!(s, Clear(ClearType::FromCursorDown));
        });
        self.scroll_and_print_status_line(num_lines);
    }

    pub fn update_status_line_colored(&self, content: impl Display, color: Color) {
        if !self.should_style() {
            return;
        }

        with_stdout(|s| {
            _ = queue!(s, Clear(ClearType::FromCursorDown));
        });

        let as_string = content.to_string();
        let nls = self.get_num_lines(&as_string).unwrap_or(0);
        *self.num_status_lines.borrow_mut() = nls;
        let psc = PrintStyledContent(StyledContent::new(
            ContentStyle::default().with(color),
            as_string,
        ));
        _ = self.status_line.borrow_mut().insert(psc);

        self.scroll_and_print_status_line(nls);
    }

    pub fn flush(&self) {
        with_stdout(|s| {
            _ = s.flush();
        })
    }
}

/// A Printer allows for printing styled content to stdout
///
/// Note that the printer doesn't use a mutex on stdout!
pub struct Printer {
    is_tty: bool,
    style_enabled: bool,
}

impl Drop for Printer {
    fn drop(&mut self) {
        self.flush()
    }
}

impl Printer {
    pub fn new() -> Self {
        Self {
            is_tty: stdout().is_tty(),
            style_enabled: !no_color_set(),
        }
    }

    pub fn println(&self, content: impl Display) {
        self.println_styled(content, ContentStyle::default())
    }

    pub fn print_colored(&self, content: impl Display, color: Color) {
        self.do_styled_print(content, ContentStyle::default().with(color), false)
    }

    pub fn println_colored(&self, content: impl Display, color: Color) {
        self.println_styled(content, ContentStyle::default().with(color))
    }

    pub fn println_styled(&self, content: impl Display, style: ContentStyle) {
        self.do_styled_print(content, style, true)
    }

    fn should_style(&self) -> bool {
        self.is_tty && self.style_enabled
    }

    fn do_styled_print(&self, content: impl Display, style: ContentStyle, with_nl: bool) {
        let should_style = self.should_style();
        with_stdout(|s| {
            if should_style {
                _ = queue!(s, PrintStyledContent(StyledContent::new(style, content)));
            } else {
                _ = queue!(s, Print(content));
            }
            if with_nl {
                _ = queue!(s, Print("\n"));
            }
        });
    }

    pub fn flush(&self) {
        with_stdout(|s| {
            _ = s.flush();
        })
    }
}

#[inline]
fn with_stdout<F: FnOnce(&mut Stdout)>(func: F) {
    let mut stdout = stdout();
    func(&mut stdout);
}
