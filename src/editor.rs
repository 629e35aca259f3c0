use std::io::{self, BufRead, Write};

use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{self, ClearType},
    tty::IsTty,
};

/// Holds the terminal in raw mode until dropped, panics included.
struct RawModeGuard;

impl RawModeGuard {
    fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(RawModeGuard)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

enum KeyAction {
    Continue,
    Submit(String),
    Eof,
}

/// Prompt line editor with Emacs keybindings and history browsing.
///
/// The history itself belongs to the shell context; the editor only reads it.
#[derive(Debug, Default)]
pub struct LineEditor {
    buffer: Vec<char>,
    cursor: usize,
    /// Position in the history while browsing with Up and Down.
    browsing: Option<usize>,
    /// The line being typed before browsing started.
    draft: String,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read one line after showing `prompt`.
    ///
    /// `Ok(None)` means end of input: Ctrl-D on an empty line, or stdin closed.
    /// When stdin is not a terminal the line is read without any editing.
    pub fn read_line(&mut self, prompt: &str, history: &[String]) -> io::Result<Option<String>> {
        if !io::stdin().is_tty() {
            return read_plain_line(prompt);
        }

        self.reset();
        let _raw = RawModeGuard::enter()?;
        print!("{prompt}");
        io::stdout().flush()?;

        loop {
            let key = match event::read() {
                Ok(Event::Key(key)) => key,
                Ok(_) => continue,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            if !matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) {
                continue;
            }
            match self.handle_key(key, prompt, history)? {
                KeyAction::Continue => {}
                KeyAction::Submit(line) => return Ok(Some(line)),
                KeyAction::Eof => return Ok(None),
            }
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.browsing = None;
        self.draft.clear();
    }

    fn line(&self) -> String {
        self.buffer.iter().collect()
    }

    fn set_line(&mut self, line: &str) {
        self.buffer = line.chars().collect();
        self.cursor = self.buffer.len();
    }

    fn handle_key(&mut self, key: KeyEvent, prompt: &str, history: &[String]) -> io::Result<KeyAction> {
        let ctrl = key.modifiers == KeyModifiers::CONTROL;
        match key.code {
            KeyCode::Enter => {
                // Raw mode swallows the newline.
                print!("\r\n");
                io::stdout().flush()?;
                return Ok(KeyAction::Submit(self.line()));
            }
            KeyCode::Char('d') if ctrl => {
                if self.buffer.is_empty() {
                    print!("\r\n");
                    io::stdout().flush()?;
                    return Ok(KeyAction::Eof);
                }
                self.delete_at_cursor();
                self.redraw(prompt)?;
            }
            KeyCode::Char('c') if ctrl => {
                self.reset();
                print!("^C\r\n{prompt}");
                io::stdout().flush()?;
            }
            KeyCode::Char('l') if ctrl => {
                execute!(io::stdout(), terminal::Clear(ClearType::All), cursor::MoveTo(0, 0))?;
                self.redraw(prompt)?;
            }
            KeyCode::Char('a') if ctrl => self.move_to(0, prompt)?,
            KeyCode::Home => self.move_to(0, prompt)?,
            KeyCode::Char('e') if ctrl => self.move_to(self.buffer.len(), prompt)?,
            KeyCode::End => self.move_to(self.buffer.len(), prompt)?,
            KeyCode::Char('k') if ctrl => {
                self.buffer.truncate(self.cursor);
                self.redraw(prompt)?;
            }
            KeyCode::Char('u') if ctrl => {
                self.buffer.drain(..self.cursor);
                self.cursor = 0;
                self.redraw(prompt)?;
            }
            KeyCode::Char('w') if ctrl => {
                self.delete_word_before_cursor();
                self.redraw(prompt)?;
            }
            KeyCode::Left if self.cursor > 0 => self.move_to(self.cursor - 1, prompt)?,
            KeyCode::Right if self.cursor < self.buffer.len() => {
                self.move_to(self.cursor + 1, prompt)?
            }
            KeyCode::Up => {
                self.history_prev(history);
                self.redraw(prompt)?;
            }
            KeyCode::Down => {
                self.history_next(history);
                self.redraw(prompt)?;
            }
            KeyCode::Backspace if self.cursor > 0 => {
                self.cursor -= 1;
                self.buffer.remove(self.cursor);
                self.redraw(prompt)?;
            }
            KeyCode::Delete => {
                self.delete_at_cursor();
                self.redraw(prompt)?;
            }
            KeyCode::Char(ch) if matches!(key.modifiers, KeyModifiers::NONE | KeyModifiers::SHIFT) => {
                self.buffer.insert(self.cursor, ch);
                self.cursor += 1;
                self.redraw(prompt)?;
            }
            _ => {}
        }
        Ok(KeyAction::Continue)
    }

    fn redraw(&self, prompt: &str) -> io::Result<()> {
        execute!(io::stdout(), cursor::MoveToColumn(0), terminal::Clear(ClearType::CurrentLine))?;
        print!("{prompt}{}", self.line());
        io::stdout().flush()?;
        self.sync_cursor(prompt)
    }

    fn move_to(&mut self, position: usize, prompt: &str) -> io::Result<()> {
        self.cursor = position;
        self.sync_cursor(prompt)
    }

    fn sync_cursor(&self, prompt: &str) -> io::Result<()> {
        let column = prompt.chars().count() + self.cursor;
        execute!(io::stdout(), cursor::MoveToColumn(column as u16))
    }

    fn delete_at_cursor(&mut self) {
        if self.cursor < self.buffer.len() {
            self.buffer.remove(self.cursor);
        }
    }

    fn delete_word_before_cursor(&mut self) {
        let mut start = self.cursor;
        while start > 0 && self.buffer[start - 1] == ' ' {
            start -= 1;
        }
        while start > 0 && self.buffer[start - 1] != ' ' {
            start -= 1;
        }
        self.buffer.drain(start..self.cursor);
        self.cursor = start;
    }

    fn history_prev(&mut self, history: &[String]) {
        let index = match self.browsing {
            Some(0) => return,
            Some(index) => index - 1,
            None if history.is_empty() => return,
            None => {
                self.draft = self.line();
                history.len() - 1
            }
        };
        self.browsing = Some(index);
        self.set_line(&history[index]);
    }

    fn history_next(&mut self, history: &[String]) {
        let Some(index) = self.browsing else {
            return;
        };
        if index + 1 < history.len() {
            self.browsing = Some(index + 1);
            self.set_line(&history[index + 1]);
        } else {
            self.browsing = None;
            let draft = std::mem::take(&mut self.draft);
            self.set_line(&draft);
        }
    }
}

/// Non-terminal input: no echo handling, no editing.
fn read_plain_line(prompt: &str) -> io::Result<Option<String>> {
    if !prompt.is_empty() {
        print!("{prompt}");
        io::stdout().flush()?;
    }
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches(['\n', '\r']).len();
    line.truncate(trimmed);
    Ok(Some(line))
}
