/// Terminal front end for LDraw models
use crossterm::{
    queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use std::io::{self, stdout, Stdout, Write};

pub mod logger;
pub mod outline;
pub mod settings;

pub use outline::OutlinePrinter;
pub use settings::Settings;

/// Colored line output on top of any writer
pub struct Console<W: Write> {
    out: W,
    color: bool,
}

impl Console<Stdout> {
    pub fn stdout(color: bool) -> Self {
        Self::new(stdout(), color)
    }
}

impl<W: Write> Console<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color }
    }

    pub fn colored(&mut self, color: Color, text: &str) -> io::Result<()> {
        if self.color {
            queue!(self.out, SetForegroundColor(color), Print(text), ResetColor)
        } else {
            queue!(self.out, Print(text))
        }
    }

    pub fn plain(&mut self, text: &str) -> io::Result<()> {
        queue!(self.out, Print(text))
    }

    pub fn newline(&mut self) -> io::Result<()> {
        queue!(self.out, Print("\n"))
    }

    pub fn heading(&mut self, text: &str) -> io::Result<()> {
        self.colored(Color::Yellow, text)?;
        self.newline()
    }

    /// `label: value` with the label dimmed.
    pub fn field(&mut self, label: &str, value: &str) -> io::Result<()> {
        self.colored(Color::DarkGrey, &format!("{label}: "))?;
        self.plain(value)?;
        self.newline()
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_console_has_no_escapes() {
        let mut console = Console::new(Vec::new(), false);
        console.heading("Report").unwrap();
        console.field("pieces", "3").unwrap();
        let text = String::from_utf8(console.into_inner()).unwrap();
        assert_eq!(text, "Report\npieces: 3\n");
    }

    #[test]
    fn test_colored_console_wraps_text() {
        let mut console = Console::new(Vec::new(), true);
        console.colored(Color::Red, "missing").unwrap();
        let text = String::from_utf8(console.into_inner()).unwrap();
        assert!(text.contains("missing"));
        assert!(text.starts_with('\u{1b}'));
    }
}
