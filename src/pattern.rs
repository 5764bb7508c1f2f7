//! Translation of document-store regular expressions into MySQL `REGEXP`
//! patterns.
//!
//! Patterns may quote literal spans Java-style with `\Q...\E`. MySQL's ICU
//! engine has no such syntax, so the span is expanded into individually
//! escaped characters. The `x` option is applied here by stripping
//! whitespace and comments, `m` and `s` become inline flags, and anything
//! needing a collation change (`i`) is refused.

use crate::error::{AdapterError, Result};

/// Translate `pattern` under the given `$options` string.
pub fn translate(pattern: &str, options: Option<&str>) -> Result<String> {
    let mut extended = false;
    let mut flags = String::new();

    for option in options.unwrap_or_default().chars() {
        match option {
            'x' => extended = true,
            'm' | 's' => {
                if !flags.contains(option) {
                    flags.push(option);
                }
            }
            'i' => {
                return Err(AdapterError::OperationForbidden(
                    "case insensitive regex is not supported, use a lower case column".to_string(),
                ))
            }
            other => {
                return Err(AdapterError::OperationForbidden(format!(
                    "regex option '{}' is not supported",
                    other
                )))
            }
        }
    }

    let source = if extended {
        strip_extended(pattern)
    } else {
        pattern.to_string()
    };
    let body = literalize(&source);

    if flags.is_empty() {
        Ok(body)
    } else {
        Ok(format!("(?{}){}", flags, body))
    }
}

/// Expand `\Q...\E` spans and rewrite `\w` to an ASCII class.
fn literalize(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut chars = pattern.chars().peekable();
    let mut literal = false;

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek().copied() {
                Some('Q') if !literal => {
                    chars.next();
                    literal = true;
                    continue;
                }
                Some('E') => {
                    chars.next();
                    literal = false;
                    continue;
                }
                _ => {}
            }
        }

        if literal {
            escape_literal(c, &mut out);
            continue;
        }

        if c == '\\' {
            match chars.next() {
                Some('w') => out.push_str("[0-9a-zA-Z]"),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }

    out
}

fn escape_literal(c: char, out: &mut String) {
    if c.is_ascii_alphanumeric() {
        out.push(c);
    } else {
        out.push('\\');
        out.push(c);
    }
}

/// Remove unescaped whitespace and `#` comments.
fn strip_extended(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push(c);
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '#' => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        break;
                    }
                }
            }
            c if c.is_whitespace() => {}
            c => out.push(c),
        }
    }

    out
}
