use std::borrow::Cow;

/// Target placeholder style for translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// PostgreSQL-style placeholders like `$1`.
    Postgres,
    /// SQLite-style placeholders like `?1`.
    Sqlite,
}

/// Translate placeholders between Postgres-style `$N` and SQLite-style `?N`.
///
/// Statements in this crate are authored once with `$N` placeholders and translated for
/// `SQLite` right before execution. Quoted strings, comments and dollar-quoted blocks are
/// skipped.
///
/// Returns a borrowed `Cow` when no changes are needed.
#[must_use]
pub fn translate_placeholders(sql: &str, target: PlaceholderStyle) -> Cow<'_, str> {
    let mut out: Option<String> = None;
    let mut state = State::Normal;
    let mut idx = 0;
    // Start of the not-yet-copied tail of `sql`.
    let mut copied = 0;
    let bytes = sql.as_bytes();

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                _ if is_line_comment_start(bytes, idx) => state = State::LineComment,
                _ if is_block_comment_start(bytes, idx) => {
                    state = State::BlockComment(1);
                    idx += 1;
                }
                b'$' => {
                    if let Some((tag, advance)) = try_start_dollar_quote(bytes, idx) {
                        state = State::DollarQuoted(tag);
                        idx = advance;
                    } else if target == PlaceholderStyle::Sqlite
                        && let Some((digits_end, digits)) = scan_digits(bytes, idx + 1)
                    {
                        let buf = out.get_or_insert_with(|| String::with_capacity(sql.len()));
                        buf.push_str(&sql[copied..idx]);
                        buf.push('?');
                        buf.push_str(digits);
                        copied = digits_end;
                        idx = digits_end;
                        continue;
                    }
                }
                b'?' if target == PlaceholderStyle::Postgres => {
                    if let Some((digits_end, digits)) = scan_digits(bytes, idx + 1) {
                        let buf = out.get_or_insert_with(|| String::with_capacity(sql.len()));
                        buf.push_str(&sql[copied..idx]);
                        buf.push('$');
                        buf.push_str(digits);
                        copied = digits_end;
                        idx = digits_end;
                        continue;
                    }
                }
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    if bytes.get(idx + 1) == Some(&b'"') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if is_block_comment_start(bytes, idx) {
                    state = State::BlockComment(depth + 1);
                    idx += 1;
                } else if is_block_comment_end(bytes, idx) {
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                    idx += 1;
                }
            }
            State::DollarQuoted(ref tag) => {
                if b == b'$' && matches_tag(bytes, idx, tag) {
                    idx += tag.len() + 1;
                    state = State::Normal;
                }
            }
        }
        idx += 1;
    }

    match out {
        Some(mut buf) => {
            buf.push_str(&sql[copied..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(sql),
    }
}

enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment(u32),
    DollarQuoted(String),
}

fn is_line_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes[idx..].starts_with(b"--")
}

fn is_block_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes[idx..].starts_with(b"/*")
}

fn is_block_comment_end(bytes: &[u8], idx: usize) -> bool {
    bytes[idx..].starts_with(b"*/")
}

/// Digits following a placeholder sigil: `(end, digits)`.
fn scan_digits(bytes: &[u8], start: usize) -> Option<(usize, &str)> {
    let len = bytes
        .get(start..)?
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if len == 0 {
        return None;
    }
    let end = start + len;
    std::str::from_utf8(&bytes[start..end])
        .ok()
        .map(|digits| (end, digits))
}

/// Opening `$tag$` of a dollar-quoted block: `(tag, index of the closing '$')`.
fn try_start_dollar_quote(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    let rest = bytes.get(start + 1..)?;
    let tag_len = rest
        .iter()
        .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
        .count();
    if rest.get(tag_len) != Some(&b'$') {
        return None;
    }
    let tag = std::str::from_utf8(&rest[..tag_len]).ok()?;
    // `$1$` is a placeholder followed by a sigil, not a tag.
    if tag.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    Some((tag.to_string(), start + 1 + tag_len))
}

fn matches_tag(bytes: &[u8], idx: usize, tag: &str) -> bool {
    let Some(rest) = bytes.get(idx + 1..) else {
        return false;
    };
    rest.starts_with(tag.as_bytes()) && rest.get(tag.len()) == Some(&b'$')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_sqlite_to_postgres() {
        let sql = "select * from t where a = ?1 and b = ?2";
        let res = translate_placeholders(sql, PlaceholderStyle::Postgres);
        assert_eq!(res, "select * from t where a = $1 and b = $2");
    }

    #[test]
    fn translates_postgres_to_sqlite() {
        let sql = "INSERT INTO \"b\" (id, data) VALUES ($1, $2)";
        let res = translate_placeholders(sql, PlaceholderStyle::Sqlite);
        assert_eq!(res, "INSERT INTO \"b\" (id, data) VALUES (?1, ?2)");
    }

    #[test]
    fn reused_placeholders_keep_their_index() {
        let sql = "INSERT INTO kv VALUES ($1, $2, $3) ON CONFLICT (a, b) DO UPDATE SET value = $3";
        let res = translate_placeholders(sql, PlaceholderStyle::Sqlite);
        assert_eq!(
            res,
            "INSERT INTO kv VALUES (?1, ?2, ?3) ON CONFLICT (a, b) DO UPDATE SET value = ?3"
        );
    }

    #[test]
    fn skips_inside_literals_and_comments() {
        let sql = "select '?1', $1 -- $2\n/* ?3 */ from t where a = $1";
        let res = translate_placeholders(sql, PlaceholderStyle::Sqlite);
        assert_eq!(res, "select '?1', ?1 -- $2\n/* ?3 */ from t where a = ?1");
    }

    #[test]
    fn escape_clause_does_not_confuse_the_scanner() {
        let sql = "SELECT data FROM \"b\" WHERE CAST(id AS TEXT) LIKE $1 ESCAPE '\\' ORDER BY $2";
        let res = translate_placeholders(sql, PlaceholderStyle::Sqlite);
        assert_eq!(
            res,
            "SELECT data FROM \"b\" WHERE CAST(id AS TEXT) LIKE ?1 ESCAPE '\\' ORDER BY ?2"
        );
    }

    #[test]
    fn skips_dollar_quoted_blocks() {
        let sql = "$foo$ select $1 from t $foo$ where a = $1";
        let res = translate_placeholders(sql, PlaceholderStyle::Sqlite);
        assert_eq!(res, "$foo$ select $1 from t $foo$ where a = ?1");
    }

    #[test]
    fn keeps_multibyte_text_intact() {
        let sql = "select 'héllo', $1 from t";
        let res = translate_placeholders(sql, PlaceholderStyle::Sqlite);
        assert_eq!(res, "select 'héllo', ?1 from t");
    }

    #[test]
    fn borrows_when_nothing_changes() {
        let sql = "select * from t";
        assert!(matches!(
            translate_placeholders(sql, PlaceholderStyle::Sqlite),
            Cow::Borrowed(_)
        ));
    }
}
