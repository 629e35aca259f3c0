use std::iter::Peekable;
use std::os::fd::RawFd;
use std::str::Chars;

use crate::error::{JobError, Result};
use crate::redirect::OpenMode;

/// A segment of a word, tagged with its quote context.
/// The expander uses this to decide what expansions to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum WordSegment {
    /// Unquoted text: tilde, variable and wildcard expansion apply
    Unquoted(String),
    /// Double-quoted text: variable expansion only
    DoubleQuoted(String),
    /// Single-quoted or backslash-escaped text: literal
    SingleQuoted(String),
}

/// A single word (argument) made up of one or more segments.
/// Mixed quoting like `he"llo"'world'` produces multiple segments in one word.
pub type Word = Vec<WordSegment>;

/// A redirection operator, with the descriptor it applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectOp {
    /// `<`, `>`, `>>`, `2>`, `2>>`: the next word names a file.
    File { fd: RawFd, mode: OpenMode },
    /// `>&N`, `2>&N`: point `fd` at an already open descriptor.
    Duplicate { fd: RawFd, to: RawFd },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Word(Word),
    Pipe,
    Background,
    Redirect(RedirectOp),
    /// `&&` and `||`, recognised only to be rejected.
    Unsupported(&'static str),
}

/// One redirection from the command line, before expansion.
#[derive(Debug, Clone, PartialEq)]
pub enum Redirection {
    File { fd: RawFd, mode: OpenMode, word: Word },
    Descriptor { fd: RawFd, to: RawFd },
}

/// A syntactically valid pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    /// The line as typed, trimmed; used as the job's display text.
    pub text: String,
    /// Words of each stage, in pipeline order. Never empty, no empty stage.
    pub stages: Vec<Vec<Word>>,
    /// In command-line order; a later redirection of a stream wins.
    pub redirections: Vec<Redirection>,
    pub background: bool,
}

/// States for the tokenizer state machine.
#[derive(Clone, Copy)]
enum State {
    /// Between tokens: whitespace is skipped
    Normal,
    /// Building an unquoted word: whitespace or an operator ends it
    InWord,
    /// Inside double quotes: whitespace is preserved
    InDoubleQuote,
    /// Inside single quotes: everything is literal
    InSingleQuote,
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    tokens: Vec<Token>,
    word: Word,
    segment: String,
    state: State,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Lexer {
            chars: input.chars().peekable(),
            tokens: Vec::new(),
            word: Vec::new(),
            segment: String::new(),
            state: State::Normal,
        }
    }

    fn flush_segment(&mut self) {
        if !self.segment.is_empty() {
            self.word
                .push(WordSegment::Unquoted(std::mem::take(&mut self.segment)));
        }
    }

    fn finish_word(&mut self) {
        self.flush_segment();
        if !self.word.is_empty() {
            self.tokens.push(Token::Word(std::mem::take(&mut self.word)));
        }
        self.state = State::Normal;
    }

    fn push_escaped(&mut self) {
        let escaped = self.chars.next().unwrap_or('\\');
        self.word.push(WordSegment::SingleQuoted(escaped.to_string()));
    }

    /// The unquoted word typed so far is exactly `2`, as in `2>`.
    fn pending_stderr_prefix(&self) -> bool {
        self.word.is_empty() && self.segment == "2"
    }

    fn run(mut self) -> Result<Vec<Token>> {
        while let Some(ch) = self.chars.next() {
            match (self.state, ch) {
                (State::Normal | State::InWord, ' ' | '\t' | '\n') => self.finish_word(),
                (State::Normal | State::InWord, '|' | '&' | '<' | '>') => {
                    let fd = if ch == '>' && self.pending_stderr_prefix() {
                        self.segment.clear();
                        libc::STDERR_FILENO
                    } else {
                        libc::STDOUT_FILENO
                    };
                    self.finish_word();
                    let token = self.operator(ch, fd)?;
                    self.tokens.push(token);
                }
                (State::Normal | State::InWord, '"') => {
                    self.flush_segment();
                    self.state = State::InDoubleQuote;
                }
                (State::Normal | State::InWord, '\'') => {
                    self.flush_segment();
                    self.state = State::InSingleQuote;
                }
                (State::Normal | State::InWord, '\\') => {
                    self.flush_segment();
                    self.push_escaped();
                    self.state = State::InWord;
                }
                (State::Normal | State::InWord, c) => {
                    self.segment.push(c);
                    self.state = State::InWord;
                }

                (State::InDoubleQuote, '"') => {
                    // "" is a valid empty argument
                    self.word
                        .push(WordSegment::DoubleQuoted(std::mem::take(&mut self.segment)));
                    self.state = State::InWord;
                }
                (State::InDoubleQuote, '\\') => match self.chars.peek() {
                    Some(&next) if matches!(next, '"' | '\\' | '$' | '`') => {
                        self.chars.next();
                        self.segment.push(next);
                    }
                    _ => self.segment.push('\\'),
                },
                (State::InDoubleQuote, c) => self.segment.push(c),

                (State::InSingleQuote, '\'') => {
                    self.word
                        .push(WordSegment::SingleQuoted(std::mem::take(&mut self.segment)));
                    self.state = State::InWord;
                }
                (State::InSingleQuote, c) => self.segment.push(c),
            }
        }

        // Unclosed quotes keep their quote context.
        match self.state {
            State::InDoubleQuote if !self.segment.is_empty() => {
                let text = std::mem::take(&mut self.segment);
                self.word.push(WordSegment::DoubleQuoted(text));
            }
            State::InSingleQuote if !self.segment.is_empty() => {
                let text = std::mem::take(&mut self.segment);
                self.word.push(WordSegment::SingleQuoted(text));
            }
            _ => {}
        }
        self.finish_word();
        Ok(self.tokens)
    }

    fn operator(&mut self, first: char, fd: RawFd) -> Result<Token> {
        let token = match first {
            '|' if self.chars.next_if_eq(&'|').is_some() => Token::Unsupported("||"),
            '|' => Token::Pipe,
            '&' if self.chars.next_if_eq(&'&').is_some() => Token::Unsupported("&&"),
            '&' => Token::Background,
            '<' => Token::Redirect(RedirectOp::File {
                fd: libc::STDIN_FILENO,
                mode: OpenMode::Input,
            }),
            _ if self.chars.next_if_eq(&'>').is_some() => Token::Redirect(RedirectOp::File {
                fd,
                mode: OpenMode::Append,
            }),
            _ if self.chars.next_if_eq(&'&').is_some() => {
                let mut digits = String::new();
                while let Some(digit) = self.chars.next_if(char::is_ascii_digit) {
                    digits.push(digit);
                }
                let to = match digits.parse::<RawFd>() {
                    Ok(to) if (0..=2).contains(&to) => to,
                    _ => {
                        let op = if fd == libc::STDERR_FILENO { "2>&" } else { ">&" };
                        return Err(JobError::user(format!("{op}{digits}: bad file descriptor")));
                    }
                };
                Token::Redirect(RedirectOp::Duplicate { fd, to })
            }
            _ => Token::Redirect(RedirectOp::File {
                fd,
                mode: OpenMode::Overwrite,
            }),
        };
        Ok(token)
    }
}

/// Tokenize input into words and operators, preserving quote context.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    Lexer::new(input).run()
}

/// Tokenize text that may only contain words, such as an alias value.
pub fn tokenize_words(input: &str) -> Result<Vec<Word>> {
    tokenize(input)?
        .into_iter()
        .map(|token| match token {
            Token::Word(word) => Ok(word),
            other => Err(JobError::user(format!(
                "syntax error near unexpected token `{}'",
                describe(&other)
            ))),
        })
        .collect()
}

fn describe(token: &Token) -> String {
    match token {
        Token::Word(word) => flatten(word),
        Token::Pipe => "|".to_string(),
        Token::Background => "&".to_string(),
        Token::Unsupported(op) => op.to_string(),
        Token::Redirect(RedirectOp::File { fd, mode }) => {
            let op = match mode {
                OpenMode::Input => "<",
                OpenMode::Overwrite => ">",
                OpenMode::Append => ">>",
            };
            if *fd == libc::STDERR_FILENO {
                format!("2{op}")
            } else {
                op.to_string()
            }
        }
        Token::Redirect(RedirectOp::Duplicate { fd, to }) => {
            if *fd == libc::STDERR_FILENO {
                format!("2>&{to}")
            } else {
                format!(">&{to}")
            }
        }
    }
}

fn syntax_error(near: &str) -> JobError {
    JobError::user(format!("syntax error near unexpected token `{near}'"))
}

/// Parse one input line into a pipeline.
///
/// Returns `Ok(None)` for a blank line.
pub fn parse_line(input: &str) -> Result<Option<ParsedLine>> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Ok(None);
    }

    let mut stages: Vec<Vec<Word>> = Vec::new();
    let mut current: Vec<Word> = Vec::new();
    let mut redirections = Vec::new();
    let mut background = false;
    let mut tokens = tokens.into_iter();

    while let Some(token) = tokens.next() {
        if background {
            return Err(syntax_error(&describe(&token)));
        }
        match token {
            Token::Word(word) => current.push(word),
            Token::Pipe => {
                if current.is_empty() {
                    return Err(syntax_error("|"));
                }
                stages.push(std::mem::take(&mut current));
            }
            Token::Background => {
                if current.is_empty() {
                    return Err(syntax_error("&"));
                }
                background = true;
            }
            Token::Unsupported(op) => {
                return Err(JobError::user(format!("`{op}' is not supported")));
            }
            Token::Redirect(RedirectOp::Duplicate { fd, to }) => {
                redirections.push(Redirection::Descriptor { fd, to });
            }
            Token::Redirect(RedirectOp::File { fd, mode }) => match tokens.next() {
                Some(Token::Word(word)) => redirections.push(Redirection::File { fd, mode, word }),
                Some(other) => return Err(syntax_error(&describe(&other))),
                None => return Err(syntax_error("newline")),
            },
        }
    }

    if current.is_empty() {
        // Only redirections, or a trailing `|`.
        return Err(syntax_error(if stages.is_empty() { "newline" } else { "|" }));
    }
    stages.push(current);

    Ok(Some(ParsedLine {
        text: input.trim().to_string(),
        stages,
        redirections,
        background,
    }))
}

/// Join a word's segments, discarding quote context.
pub fn flatten(word: &Word) -> String {
    word.iter()
        .map(|seg| match seg {
            WordSegment::Unquoted(s) | WordSegment::DoubleQuoted(s) | WordSegment::SingleQuoted(s) => {
                s.as_str()
            }
        })
        .collect()
}
