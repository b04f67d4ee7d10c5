//! Named-parameter to positional-placeholder translation.
//!
//! SQL is written once with `:name` placeholders. Before dispatch it is
//! rewritten into the marker syntax of the active dialect, and the
//! [`Params`] mapping is flattened into the positional argument list the
//! driver binds.
//!
//! | Dialect | Marker | Recurring name |
//! |---|---|---|
//! | embedded file (`SQLite`) | `?1`, `?2`, ... | reuses its slot |
//! | dollar (`PostgreSQL`) | `$1`, `$2`, ... | reuses its slot |
//! | call-level interface (ODBC) | `?` | one `?` and one argument per occurrence |
//!
//! Slots are numbered by first occurrence. `::` casts, quoted literals,
//! quoted identifiers (`"x"` and `[x]`), dollar-quoted bodies and comments
//! are never scanned for names. A `[` right after a name, `]` or `)` is an
//! array subscript and is scanned.

use std::collections::HashMap;

use sqlgate_types::{DialectKind, Params, Value};

/// Errors produced while translating named-parameter SQL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslationError {
    /// The statement references a name the mapping does not bind.
    #[error("parameter :{name} is referenced but not bound")]
    MissingParameter {
        /// The unbound name.
        name: String,
    },

    /// The statement references names but no mapping was supplied.
    #[error("statement references :{first} but no parameters were supplied")]
    NoParameters {
        /// The first referenced name.
        first: String,
    },
}

/// A statement rewritten for one dialect.
#[derive(Debug, Clone, PartialEq)]
pub struct Translated {
    /// SQL with positional markers.
    pub sql: String,
    /// Arguments in binding order.
    pub args: Vec<Value>,
    /// Distinct parameter names in first-occurrence order.
    pub names: Vec<String>,
}

/// A piece of scanned SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    /// Verbatim text.
    Text(&'a str),
    /// A `:name` token, without the colon.
    Name(&'a str),
}

/// Rewrite `sql` for `dialect`, binding names from `params`.
///
/// An empty mapping is treated the same as no mapping. Bound names the
/// statement never references are ignored.
pub fn translate(
    dialect: DialectKind,
    sql: &str,
    params: Option<&Params>,
) -> Result<Translated, TranslationError> {
    let segments = scan(sql);
    let names = distinct_names(&segments);

    let Some(first) = names.first() else {
        return Ok(Translated {
            sql: sql.to_owned(),
            args: Vec::new(),
            names: Vec::new(),
        });
    };

    let params = match params {
        Some(p) if !p.is_empty() => p,
        _ => {
            return Err(TranslationError::NoParameters {
                first: (*first).to_owned(),
            });
        }
    };

    let mut values = Vec::with_capacity(names.len());
    for name in &names {
        let value = params
            .get(name)
            .ok_or_else(|| TranslationError::MissingParameter {
                name: (*name).to_owned(),
            })?;
        values.push(value);
    }

    let slots: HashMap<&str, usize> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (*name, i))
        .collect();

    let mut out = String::with_capacity(sql.len());
    let mut args = Vec::with_capacity(values.len());
    for segment in &segments {
        match *segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Name(name) => {
                let Some(&slot) = slots.get(name) else {
                    continue;
                };
                let number = slot.saturating_add(1).to_string();
                match dialect {
                    DialectKind::EmbeddedFile => {
                        out.push('?');
                        out.push_str(&number);
                    }
                    DialectKind::ClientServerDollar => {
                        out.push('$');
                        out.push_str(&number);
                    }
                    DialectKind::ClientServerCli | DialectKind::Disabled => {
                        out.push('?');
                        if let Some(value) = values.get(slot) {
                            args.push((*value).clone());
                        }
                    }
                }
            }
        }
    }

    if matches!(
        dialect,
        DialectKind::EmbeddedFile | DialectKind::ClientServerDollar
    ) {
        args.extend(values.into_iter().cloned());
    }

    Ok(Translated {
        sql: out,
        args,
        names: names.into_iter().map(str::to_owned).collect(),
    })
}

/// Distinct `:name` tokens of `sql` in first-occurrence order.
pub fn parameter_names(sql: &str) -> Vec<String> {
    distinct_names(&scan(sql))
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn distinct_names<'a>(segments: &[Segment<'a>]) -> Vec<&'a str> {
    let mut names: Vec<&str> = Vec::new();
    for segment in segments {
        if let Segment::Name(name) = *segment {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

const fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

const fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn char_before(sql: &str, pos: usize) -> Option<char> {
    sql.get(..pos).and_then(|before| before.chars().next_back())
}

fn follows_name(sql: &str, pos: usize) -> bool {
    char_before(sql, pos).is_some_and(is_ident_char)
}

/// Whether the character before `pos` ends an expression, making a `[`
/// there a subscript rather than a bracketed name.
fn follows_operand(sql: &str, pos: usize) -> bool {
    char_before(sql, pos).is_some_and(|c| is_ident_char(c) || c == ']' || c == ')')
}

/// Byte offset just past a `$tag$` or `$$` opener at `pos`, if one starts
/// there. `$1` and friends are positional markers, not openers.
fn dollar_tag_end(sql: &str, pos: usize) -> Option<usize> {
    let rest = sql.get(pos.saturating_add(1)..)?;
    if rest.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let tag_len = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
    rest.get(tag_len..)?
        .starts_with('$')
        .then(|| pos.saturating_add(tag_len).saturating_add(2))
}

/// Split `sql` into verbatim text and `:name` tokens.
fn scan(sql: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut chars = sql.char_indices().peekable();
    let mut text_start = 0;

    while let Some((pos, ch)) = chars.next() {
        match ch {
            '\'' | '"' => {
                // Quoted literal or identifier. A doubled quote closes and
                // immediately reopens, which needs no special casing.
                for (_, c) in chars.by_ref() {
                    if c == ch {
                        break;
                    }
                }
            }
            '-' if matches!(chars.peek(), Some((_, '-'))) => {
                for (_, c) in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '[' if !follows_operand(sql, pos) => {
                // `]]` is an escaped bracket inside the name.
                while let Some((_, c)) = chars.next() {
                    if c == ']' {
                        if matches!(chars.peek(), Some((_, ']'))) {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
            }
            '$' if !follows_name(sql, pos) => {
                if let Some(body_start) = dollar_tag_end(sql, pos) {
                    let tag = sql.get(pos..body_start).unwrap_or_default();
                    let close = sql
                        .get(body_start..)
                        .and_then(|body| body.find(tag))
                        .map_or(sql.len(), |at| {
                            body_start.saturating_add(at).saturating_add(tag.len())
                        });
                    while chars.peek().is_some_and(|&(i, _)| i < close) {
                        chars.next();
                    }
                }
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                chars.next();
                let mut prev = '\0';
                for (_, c) in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            ':' => match chars.peek().copied() {
                Some((_, ':')) => {
                    chars.next();
                }
                Some((start, c)) if is_ident_start(c) => {
                    let mut end = sql.len();
                    while let Some(&(i, c)) = chars.peek() {
                        if is_ident_char(c) {
                            chars.next();
                        } else {
                            end = i;
                            break;
                        }
                    }
                    if pos > text_start {
                        segments.push(Segment::Text(sql.get(text_start..pos).unwrap_or_default()));
                    }
                    segments.push(Segment::Name(sql.get(start..end).unwrap_or_default()));
                    text_start = end;
                }
                _ => {}
            },
            _ => {}
        }
    }

    if text_start < sql.len() {
        segments.push(Segment::Text(sql.get(text_start..).unwrap_or_default()));
    }
    segments
}

#[cfg(test)]
mod tests {
    use sqlgate_types::params;

    use super::*;

    #[allow(clippy::panic)]
    fn ok(dialect: DialectKind, sql: &str, params: &Params) -> Translated {
        match translate(dialect, sql, Some(params)) {
            Ok(t) => t,
            Err(e) => panic!("translation failed: {e}"),
        }
    }

    #[test]
    fn dollar_numbers_distinct_names_by_first_occurrence() {
        let p = params! { "a" => 1, "b" => 2 };
        let t = ok(
            DialectKind::ClientServerDollar,
            "SELECT * FROM t WHERE b = :b AND a = :a OR b > :b",
            &p,
        );
        assert_eq!(t.sql, "SELECT * FROM t WHERE b = $1 AND a = $2 OR b > $1");
        assert_eq!(t.args, vec![Value::Int(2), Value::Int(1)]);
        assert_eq!(t.names, ["b", "a"]);
    }

    #[test]
    fn sqlite_reuses_numbered_slots() {
        let p = params! { "x" => "v", "y" => 9 };
        let t = ok(
            DialectKind::EmbeddedFile,
            "UPDATE t SET a = :x, b = :y WHERE c = :x",
            &p,
        );
        assert_eq!(t.sql, "UPDATE t SET a = ?1, b = ?2 WHERE c = ?1");
        assert_eq!(t.args.len(), 2);
    }

    #[test]
    fn odbc_repeats_values_per_occurrence() {
        let p = params! { "x" => "v", "y" => 9 };
        let t = ok(
            DialectKind::ClientServerCli,
            "UPDATE t SET a = :x, b = :y WHERE c = :x",
            &p,
        );
        assert_eq!(t.sql, "UPDATE t SET a = ?, b = ? WHERE c = ?");
        assert_eq!(
            t.args,
            vec![
                Value::Text("v".to_owned()),
                Value::Int(9),
                Value::Text("v".to_owned())
            ]
        );
        assert_eq!(t.names, ["x", "y"]);
    }

    #[test]
    fn marker_and_argument_counts_match_distinct_names() {
        let p = params! { "a" => 1, "b" => 2, "c" => 3 };
        let sql = "INSERT INTO t (a, b, c) VALUES (:a, :b, :c)";
        for dialect in [
            DialectKind::EmbeddedFile,
            DialectKind::ClientServerDollar,
            DialectKind::ClientServerCli,
        ] {
            let t = ok(dialect, sql, &p);
            let markers = t.sql.matches(['?', '$']).count();
            assert_eq!(markers, 3, "{dialect}");
            assert_eq!(t.args, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        }
    }

    #[test]
    fn missing_name_is_rejected() {
        let p = params! { "a" => 1 };
        let err = translate(DialectKind::EmbeddedFile, "SELECT :a, :b", Some(&p));
        assert_eq!(
            err,
            Err(TranslationError::MissingParameter {
                name: "b".to_owned()
            })
        );
    }

    #[test]
    fn tokens_without_mapping_are_rejected() {
        let err = translate(DialectKind::ClientServerDollar, "SELECT :a", None);
        assert_eq!(
            err,
            Err(TranslationError::NoParameters {
                first: "a".to_owned()
            })
        );
        let empty = Params::new();
        assert!(translate(DialectKind::ClientServerDollar, "SELECT :a", Some(&empty)).is_err());
    }

    #[test]
    fn sql_without_tokens_passes_through() {
        let t = translate(DialectKind::ClientServerDollar, "SELECT 1", None);
        assert_eq!(
            t,
            Ok(Translated {
                sql: "SELECT 1".to_owned(),
                args: Vec::new(),
                names: Vec::new(),
            })
        );
    }

    #[test]
    fn casts_literals_and_comments_are_not_tokens() {
        let p = params! { "t" => "users" };
        let sql = "SELECT column_name::text, ':nope', \"odd:col\" -- :also_not\n\
                   FROM c /* :neither */ WHERE table_name = :t";
        let t = ok(DialectKind::ClientServerDollar, sql, &p);
        assert_eq!(t.names, ["t"]);
        assert!(t.sql.ends_with("WHERE table_name = $1"));
        assert!(t.sql.contains("::text"));
        assert!(t.sql.contains("':nope'"));
    }

    #[test]
    fn bracketed_names_are_not_tokens() {
        let p = params! { "x" => 1 };
        let t = ok(
            DialectKind::ClientServerCli,
            "SELECT [a:b], [odd]]:c] FROM [dbo].[t:y] WHERE x = :x",
            &p,
        );
        assert_eq!(t.sql, "SELECT [a:b], [odd]]:c] FROM [dbo].[t:y] WHERE x = ?");
        assert_eq!(t.args, vec![Value::Int(1)]);
    }

    #[test]
    fn array_subscripts_are_scanned() {
        let p = params! { "i" => 1, "j" => 2 };
        let t = ok(
            DialectKind::ClientServerDollar,
            "SELECT tags[:i], (tags)[:j], ARRAY[:i] FROM t",
            &p,
        );
        assert_eq!(t.sql, "SELECT tags[$1], (tags)[$2], ARRAY[$1] FROM t");
    }

    #[test]
    fn dollar_quoted_bodies_are_not_tokens() {
        let p = params! { "x" => 1 };
        let t = ok(
            DialectKind::ClientServerDollar,
            "DO $$ BEGIN PERFORM :y; END $$; SELECT $fn$ :z $fn$, :x",
            &p,
        );
        assert_eq!(t.sql, "DO $$ BEGIN PERFORM :y; END $$; SELECT $fn$ :z $fn$, $1");
        assert_eq!(t.names, vec!["x".to_owned()]);
    }

    #[test]
    fn positional_dollar_markers_are_not_quotes() {
        assert_eq!(parameter_names("SELECT $1, :a, $2"), vec!["a".to_owned()]);
        assert_eq!(parameter_names("SELECT a$b$ + :c"), vec!["c".to_owned()]);
    }

    #[test]
    fn unused_bindings_are_ignored() {
        let p = params! { "a" => 1, "extra" => 2 };
        let t = ok(DialectKind::EmbeddedFile, "SELECT :a", &p);
        assert_eq!(t.args, vec![Value::Int(1)]);
    }

    #[test]
    fn parameter_names_lists_distinct_names() {
        assert_eq!(
            parameter_names("SELECT :b, :a, :b, :_limit"),
            ["b", "a", "_limit"]
        );
    }
}
