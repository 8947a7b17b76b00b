//! Statement normalization.
//!
//! Two statements that differ only in keyword case, whitespace, comments or
//! spacing inside zero-argument date function calls normalize to the same
//! text. Quoted literals and quoted identifiers are copied verbatim: `'Bob'`
//! and `'bob'` select different rows and must not share a fingerprint.

use once_cell::sync::Lazy;
use regex::Regex;
use std::iter::Peekable;
use std::str::Chars;

/// Replacement for `INTERVAL` magnitudes in statistics grouping.
pub const INTERVAL_PLACEHOLDER: &str = "__N__";

static ZERO_ARG_DATE_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(current_date|current_timestamp|current_time|now|curdate|getdate|sysdate)\s*\(\s*\)",
    )
    .expect("valid date call regex")
});

static INTERVAL_MAGNITUDE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\binterval\s+(['"]?)\d+"#).expect("valid interval regex")
});

/// Canonical form of a statement for fingerprinting.
///
/// Lowercases everything outside quotes, strips `--` and `/* */` comments,
/// collapses whitespace runs to a single space, trims, and rewrites
/// `NOW ( )`-style calls to `now()`.
pub fn normalize(sql: &str) -> String {
    let canonical = Canonicalizer::new(sql).run();
    ZERO_ARG_DATE_CALL
        .replace_all(&canonical, "${1}()")
        .into_owned()
}

/// [`normalize`] plus `INTERVAL <n>` magnitudes replaced by a placeholder.
///
/// Used only to group statistics across statements that differ in a
/// look-back window. Never used for cache keys.
pub fn normalize_for_stats(sql: &str) -> String {
    let normalized = normalize(sql);
    INTERVAL_MAGNITUDE
        .replace_all(&normalized, format!("interval ${{1}}{}", INTERVAL_PLACEHOLDER))
        .into_owned()
}

// ============================================================================
// SCANNER
// ============================================================================

struct Canonicalizer<'a> {
    chars: Peekable<Chars<'a>>,
    out: String,
    pending_space: bool,
}

impl<'a> Canonicalizer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            out: String::with_capacity(source.len()),
            pending_space: false,
        }
    }

    fn run(mut self) -> String {
        while let Some(c) = self.chars.next() {
            match c {
                '-' if self.chars.peek() == Some(&'-') => {
                    self.skip_line_comment();
                    self.pending_space = true;
                }
                '/' if self.chars.peek() == Some(&'*') => {
                    self.chars.next();
                    self.skip_block_comment();
                    self.pending_space = true;
                }
                '\'' | '"' => {
                    self.flush_space();
                    self.copy_quoted(c);
                }
                c if c.is_whitespace() => self.pending_space = true,
                c => {
                    self.flush_space();
                    self.out.extend(c.to_lowercase());
                }
            }
        }
        self.out
    }

    fn flush_space(&mut self) {
        if self.pending_space && !self.out.is_empty() {
            self.out.push(' ');
        }
        self.pending_space = false;
    }

    fn skip_line_comment(&mut self) {
        for c in self.chars.by_ref() {
            if c == '\n' {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self) {
        while let Some(c) = self.chars.next() {
            if c == '*' && self.chars.peek() == Some(&'/') {
                self.chars.next();
                break;
            }
        }
    }

    /// Copy a quoted run verbatim. A doubled quote is an escape.
    fn copy_quoted(&mut self, quote: char) {
        self.out.push(quote);
        while let Some(c) = self.chars.next() {
            self.out.push(c);
            if c == quote {
                if self.chars.peek() == Some(&quote) {
                    self.chars.next();
                    self.out.push(quote);
                    continue;
                }
                break;
            }
        }
    }
}
