//! Dependency scanner
//!
//! Lexically extracts the dataset names a UDF reads through `lib.getData`.
//! Nothing is executed or parsed: the scanner walks each line, skips comments
//! and string literals, and takes the first quoted literal after every marker.
//! Names are returned in order of appearance with duplicates preserved.

pub mod preprocess;

pub use preprocess::{preprocess, scan_preprocessed};

/// Call that marks a dataset dependency in UDF source
pub const DATA_MARKER: &str = "lib.getData";

/// Comment forms recognized while scanning.
#[derive(Debug, Clone, Copy)]
pub struct CommentSyntax {
    /// Line comment marker; the rest of the line is ignored
    pub line: Option<&'static str>,
    /// Block comment `(open, close)` pairs
    pub blocks: &'static [(&'static str, &'static str)],
    /// A `'` right after an alphanumeric is a C++14 digit separator, not a quote
    pub digit_separators: bool,
}

impl CommentSyntax {
    pub const LUA: CommentSyntax = CommentSyntax {
        line: Some("--"),
        blocks: &[
            ("--[=====[", "]=====]"),
            ("--[====[", "]====]"),
            ("--[===[", "]===]"),
            ("--[==[", "]==]"),
            ("--[=[", "]=]"),
            ("--[[", "]]"),
        ],
        digit_separators: false,
    };

    pub const PYTHON: CommentSyntax = CommentSyntax {
        line: Some("#"),
        blocks: &[("\"\"\"", "\"\"\""), ("'''", "'''")],
        digit_separators: false,
    };

    /// Already comment-free text, e.g. C++ preprocessor output
    pub const NONE: CommentSyntax = CommentSyntax {
        line: None,
        blocks: &[],
        digit_separators: true,
    };

    /// Whether the quote at byte `pos` of `line` opens a literal
    fn opens_literal(&self, line: &str, pos: usize, quote: char) -> bool {
        !(quote == '\'' && self.digit_separators)
            || !line[..pos]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_ascii_alphanumeric())
    }
}

/// Scan `source` for dataset references.
pub fn scan_source(source: &str, syntax: &CommentSyntax) -> Vec<String> {
    let mut names = Vec::new();
    let mut open_block: Option<&'static str> = None;

    for line in source.lines() {
        let mut i = 0;
        while i < line.len() {
            if let Some(close) = open_block {
                match line[i..].find(close) {
                    Some(pos) => {
                        i += pos + close.len();
                        open_block = None;
                        continue;
                    }
                    None => break,
                }
            }

            let tail = &line[i..];

            if tail.starts_with(DATA_MARKER) {
                i += DATA_MARKER.len();
                if let Some((name, consumed)) = quoted_after_marker(&line[i..], syntax) {
                    names.push(name);
                    i += consumed;
                }
                continue;
            }

            if let Some(&(open, close)) = syntax.blocks.iter().find(|(open, _)| tail.starts_with(open)) {
                open_block = Some(close);
                i += open.len();
                continue;
            }

            if syntax.line.is_some_and(|marker| tail.starts_with(marker)) {
                break;
            }

            if let Some(quote @ ('"' | '\'')) = tail.chars().next() {
                if syntax.opens_literal(line, i, quote) {
                    if let Some(len) = string_end(&tail[1..], quote) {
                        i += 1 + len + 1;
                        continue;
                    }
                }
            }

            i += tail.chars().next().map_or(1, char::len_utf8);
        }
    }

    names
}

/// First quoted literal in `text`, unless a line comment starts before it.
/// Returns the literal and the number of bytes consumed through its closing quote.
fn quoted_after_marker(text: &str, syntax: &CommentSyntax) -> Option<(String, usize)> {
    for (pos, c) in text.char_indices() {
        if syntax.line.is_some_and(|marker| text[pos..].starts_with(marker)) {
            return None;
        }
        if (c == '"' || c == '\'') && syntax.opens_literal(text, pos, c) {
            let body = &text[pos + 1..];
            let len = string_end(body, c)?;
            return Some((body[..len].to_string(), pos + 1 + len + 1));
        }
    }
    None
}

/// Byte length of a string body up to (not including) the closing `quote`.
fn string_end(body: &str, quote: char) -> Option<usize> {
    let mut escaped = false;
    for (pos, c) in body.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return Some(pos);
        }
    }
    None
}
