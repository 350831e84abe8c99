///
/// Leading-keyword SQL tokenizer.
///
/// Connections sniff the first token (and occasionally the next one or two)
/// of every query to decide on side effects: metadata cache invalidation on
/// DROP/ALTER, catalog tracking on `DROP DATABASE` and `USE`, pool exclusion
/// on CREATE. There is no grammar here. A token is a maximal run of
/// non-whitespace characters, and tokens are borrowed slices of the
/// original query.
///
/// ```rust,ignore
/// let tok = next_token(sql, None)?;
/// if tok.matches("DROP") {
///     let tok = next_token(sql, Some(&tok))?;
/// }
/// ```
///

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlToken<'a> {
    sql: &'a str,
    start: usize,
    end: usize,
    first: char,
}

impl<'a> SqlToken<'a> {
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn first_char(&self) -> char {
        self.first
    }

    pub fn as_str(&self) -> &'a str {
        &self.sql[self.start..self.end]
    }

    /// Case-insensitive comparison against the whole token.
    pub fn matches(&self, keyword: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(keyword)
    }

    /// The token with one pair of surrounding backticks removed
    /// (`DROP DATABASE `name``).
    pub fn unquoted(&self) -> &'a str {
        let tok = self.as_str();
        if tok.len() >= 2 && tok.starts_with('`') && tok.ends_with('`') {
            &tok[1..tok.len() - 1]
        } else {
            tok
        }
    }
}

/// Returns the token following `prev`, or the first token when `prev` is
/// `None`. `None` when only whitespace remains.
pub fn next_token<'a>(sql: &'a str, prev: Option<&SqlToken<'a>>) -> Option<SqlToken<'a>> {
    let from = prev.map_or(0, |t| t.end);
    let rest = sql.get(from..)?;

    let skipped = rest.len() - rest.trim_start().len();
    let start = from + skipped;
    let first = sql[start..].chars().next()?;

    let end = sql[start..]
        .find(char::is_whitespace)
        .map_or(sql.len(), |off| start + off);

    Some(SqlToken {
        sql,
        start,
        end,
        first,
    })
}

/// Convenience for the common "is the n-th token this keyword" check.
pub fn leading_keywords<'a>(sql: &'a str, count: usize) -> Vec<SqlToken<'a>> {
    let mut tokens = Vec::with_capacity(count);
    let mut prev = None;
    while tokens.len() < count {
        match next_token(sql, prev.as_ref()) {
            Some(tok) => {
                tokens.push(tok);
                prev = Some(tok);
            }
            None => break,
        }
    }
    tokens
}
