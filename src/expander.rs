use crate::context::ShellContext;
use crate::parser::{Word, WordSegment};

/// One fully expanded argument, before wildcard matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arg {
    pub text: String,
    /// The word had wildcard characters outside of quotes.
    pub glob: bool,
}

impl Arg {
    pub fn literal(text: impl Into<String>) -> Self {
        Arg {
            text: text.into(),
            glob: false,
        }
    }
}

/// Expand a list of parsed words into arguments.
/// Applies tilde and variable expansion according to quote context and marks
/// words that need wildcard matching.
pub fn expand_words(words: &[Word], ctx: &ShellContext) -> Vec<Arg> {
    words.iter().map(|word| expand_word(word, ctx)).collect()
}

/// Expand a single word (which may have mixed quoting).
pub fn expand_word(segments: &[WordSegment], ctx: &ShellContext) -> Arg {
    let mut combined = String::new();
    let mut glob = false;

    for (index, segment) in segments.iter().enumerate() {
        match segment {
            WordSegment::SingleQuoted(text) => combined.push_str(text),
            WordSegment::DoubleQuoted(text) => {
                combined.push_str(&expand_variables(text, ctx));
            }
            WordSegment::Unquoted(text) => {
                let expanded = if index == 0 {
                    expand_tilde(text, ctx)
                } else {
                    text.clone()
                };
                let expanded = expand_variables(&expanded, ctx);
                glob |= has_wildcards(&expanded);
                combined.push_str(&expanded);
            }
        }
    }

    Arg {
        text: combined,
        glob,
    }
}

// ── Tilde Expansion ──

fn expand_tilde(token: &str, ctx: &ShellContext) -> String {
    if !token.starts_with('~') {
        return token.to_string();
    }
    let Some(home) = ctx.var("HOME") else {
        return token.to_string();
    };

    if token == "~" {
        return home.to_string();
    }
    if let Some(rest) = token.strip_prefix("~/") {
        return format!("{home}/{rest}");
    }

    // ~user is left alone
    token.to_string()
}

// ── Variable Expansion ──

fn expand_variables(input: &str, ctx: &ShellContext) -> String {
    let mut result = String::new();
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }

        match chars.peek() {
            None => result.push('$'),
            Some(&'?') => {
                chars.next();
                result.push_str(&ctx.last_status.to_string());
            }
            Some(&'$') => {
                chars.next();
                result.push_str(&std::process::id().to_string());
            }
            Some(&'0') => {
                chars.next();
                result.push_str("jobsh");
            }
            Some(&'{') => {
                chars.next();
                let name: String = chars.by_ref().take_while(|c| *c != '}').collect();
                if name.is_empty() {
                    result.push_str("${}");
                } else {
                    result.push_str(ctx.var(&name).unwrap_or_default());
                }
            }
            Some(&c) if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if !(c.is_ascii_alphanumeric() || c == '_') {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                result.push_str(ctx.var(&name).unwrap_or_default());
            }
            Some(_) => result.push('$'),
        }
    }

    result
}

// ── Wildcard Expansion ──

pub fn has_wildcards(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Match a wildcard pattern against the filesystem.
///
/// Matches come back sorted. A pattern that matches nothing, or is not a
/// valid pattern, is returned unchanged as the only element.
pub fn expand_wildcards(pattern: &str) -> Vec<String> {
    if !has_wildcards(pattern) {
        return vec![pattern.to_string()];
    }

    let Ok(paths) = glob::glob(pattern) else {
        return vec![pattern.to_string()];
    };
    let mut matches: Vec<String> = paths
        .filter_map(|entry| entry.ok())
        .map(|path| path.to_string_lossy().into_owned())
        .collect();

    if matches.is_empty() {
        return vec![pattern.to_string()];
    }
    matches.sort();
    matches
}
