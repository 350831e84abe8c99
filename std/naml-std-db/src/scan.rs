///
/// Quote-aware scanning of raw SQL text.
///
/// Shared by prepared-statement placeholder counting (`?`) and
/// multi-statement splitting (`;`). The rules:
/// - a backslash escapes the next character, inside or outside quotes
/// - a single quote toggles string-literal mode
/// - the needle only counts outside string literals
///
/// Double quotes and comments are not special. All delimiters are ASCII,
/// so scanning bytes is safe for UTF-8 input: continuation bytes never
/// compare equal to them.
///

use memchr::{memchr2, memchr3};

/// Iterator over the byte offsets of `needle` that sit outside
/// single-quoted literals and are not backslash-escaped.
pub struct UnquotedPositions<'a> {
    bytes: &'a [u8],
    needle: u8,
    pos: usize,
    in_quotes: bool,
}

impl<'a> UnquotedPositions<'a> {
    pub fn new(sql: &'a str, needle: u8) -> Self {
        Self {
            bytes: sql.as_bytes(),
            needle,
            pos: 0,
            in_quotes: false,
        }
    }
}

impl Iterator for UnquotedPositions<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            let rest = self.bytes.get(self.pos..)?;
            let hit = if self.in_quotes {
                memchr2(b'\\', b'\'', rest)
            } else {
                memchr3(b'\\', b'\'', self.needle, rest)
            };

            let Some(off) = hit else {
                self.pos = self.bytes.len();
                return None;
            };

            let at = self.pos + off;
            match self.bytes[at] {
                b'\\' => {
                    self.pos = (at + 2).min(self.bytes.len());
                }
                b'\'' => {
                    self.in_quotes = !self.in_quotes;
                    self.pos = at + 1;
                }
                _ => {
                    self.pos = at + 1;
                    return Some(at);
                }
            }
        }
    }
}

/// Number of positional `?` placeholders in `sql`.
pub fn count_placeholders(sql: &str) -> usize {
    UnquotedPositions::new(sql, b'?').count()
}

/// Splits a multi-statement string on unquoted, unescaped `;`.
///
/// Each statement is trimmed; empty fragments at the end (a trailing `;`
/// or trailing whitespace) are dropped. Escapes are kept verbatim in the
/// output since the statement text is forwarded to the backend.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut start = 0;

    for at in UnquotedPositions::new(sql, b';') {
        statements.push(sql[start..at].trim().to_string());
        start = at + 1;
    }
    statements.push(sql[start..].trim().to_string());

    while statements.last().is_some_and(|s| s.is_empty()) {
        statements.pop();
    }

    statements
}
