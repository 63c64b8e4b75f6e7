//! Named-placeholder handling.
//!
//! Statements use `:name` placeholders regardless of backend. MySQL, SQLite
//! and Oracle bind named parameters natively; PostgreSQL and SQL Server take
//! positional placeholders, so the statement is rewritten to `$n` / `@Pn`
//! with the bind order recorded. The scanner skips quoted literals and the
//! PostgreSQL `::` cast operator.

use crate::error::{Error, Result};
use crate::model::{Params, SqlValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// PostgreSQL `$1`, `$2`, ...
    Dollar,
    /// SQL Server `@P1`, `@P2`, ...
    AtP,
    /// MySQL `?`; every occurrence binds its own value, so names repeat.
    Question,
    /// Backend binds `:name` itself; the statement is left untouched.
    Named,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    /// Placeholder names in bind order, deduplicated.
    pub names: Vec<String>,
}

/// Scans `sql` for `:name` placeholders and rewrites them for `style`.
pub fn bind(sql: &str, style: PlaceholderStyle) -> BoundStatement {
    let mut out = String::with_capacity(sql.len());
    let mut names: Vec<String> = Vec::new();
    let mut chars = sql.char_indices().peekable();
    let mut in_single = false;
    let mut in_double = false;

    while let Some((_, ch)) = chars.next() {
        match ch {
            '\'' if !in_double => {
                in_single = !in_single;
                out.push(ch);
            }
            '"' if !in_single => {
                in_double = !in_double;
                out.push(ch);
            }
            ':' if !in_single && !in_double => {
                // `::` is a cast, not a placeholder
                if matches!(chars.peek(), Some((_, ':'))) {
                    out.push(':');
                    out.push(':');
                    chars.next();
                    continue;
                }
                let mut name = String::new();
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
                    out.push(':');
                    out.push_str(&name);
                    continue;
                }
                match style {
                    PlaceholderStyle::Question => {
                        names.push(name);
                        out.push('?');
                    }
                    PlaceholderStyle::Dollar | PlaceholderStyle::AtP => {
                        let index = match names.iter().position(|n| n == &name) {
                            Some(i) => i,
                            None => {
                                names.push(name.clone());
                                names.len() - 1
                            }
                        };
                        if style == PlaceholderStyle::Dollar {
                            out.push_str(&format!("${}", index + 1));
                        } else {
                            out.push_str(&format!("@P{}", index + 1));
                        }
                    }
                    PlaceholderStyle::Named => {
                        if !names.contains(&name) {
                            names.push(name.clone());
                        }
                        out.push(':');
                        out.push_str(&name);
                    }
                }
            }
            _ => out.push(ch),
        }
    }

    BoundStatement { sql: out, names }
}

/// Resolves the scanned placeholder names against the caller's parameters,
/// in bind order. A placeholder with no matching parameter is a hard failure.
pub fn ordered_values(names: &[String], params: &Params) -> Result<Vec<SqlValue>> {
    names
        .iter()
        .map(|name| {
            params
                .get(name)
                .cloned()
                .ok_or_else(|| Error::Query(format!("missing value for parameter `{name}`")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_to_dollar_placeholders() {
        let bound = bind(
            "SELECT * FROM users WHERE age > :age AND name = :name",
            PlaceholderStyle::Dollar,
        );
        assert_eq!(
            bound.sql,
            "SELECT * FROM users WHERE age > $1 AND name = $2"
        );
        assert_eq!(bound.names, vec!["age", "name"]);
    }

    #[test]
    fn rewrites_to_at_p_placeholders() {
        let bound = bind("UPDATE t SET a = :a WHERE id = :id", PlaceholderStyle::AtP);
        assert_eq!(bound.sql, "UPDATE t SET a = @P1 WHERE id = @P2");
    }

    #[test]
    fn question_style_repeats_values_per_occurrence() {
        let bound = bind(
            "SELECT :v AS a, :v AS b WHERE x = :w",
            PlaceholderStyle::Question,
        );
        assert_eq!(bound.sql, "SELECT ? AS a, ? AS b WHERE x = ?");
        assert_eq!(bound.names, vec!["v", "v", "w"]);
    }

    #[test]
    fn named_style_leaves_sql_untouched() {
        let sql = "SELECT * FROM t WHERE id = :id";
        let bound = bind(sql, PlaceholderStyle::Named);
        assert_eq!(bound.sql, sql);
        assert_eq!(bound.names, vec!["id"]);
    }

    #[test]
    fn repeated_name_binds_once() {
        let bound = bind(
            "SELECT :v AS a, :v AS b, :w AS c",
            PlaceholderStyle::Dollar,
        );
        assert_eq!(bound.sql, "SELECT $1 AS a, $1 AS b, $2 AS c");
        assert_eq!(bound.names, vec!["v", "w"]);
    }

    #[test]
    fn skips_quoted_literals() {
        let bound = bind(
            "SELECT ':nope' AS lit, \":also_nope\" AS q, :real AS r",
            PlaceholderStyle::Dollar,
        );
        assert_eq!(
            bound.sql,
            "SELECT ':nope' AS lit, \":also_nope\" AS q, $1 AS r"
        );
        assert_eq!(bound.names, vec!["real"]);
    }

    #[test]
    fn skips_postgres_casts() {
        let bound = bind("SELECT id::text FROM t WHERE id = :id", PlaceholderStyle::Dollar);
        assert_eq!(bound.sql, "SELECT id::text FROM t WHERE id = $1");
        assert_eq!(bound.names, vec!["id"]);
    }

    #[test]
    fn bare_colon_is_literal() {
        let bound = bind("SELECT 'a' || : || 'b'", PlaceholderStyle::Dollar);
        assert_eq!(bound.sql, "SELECT 'a' || : || 'b'");
        assert!(bound.names.is_empty());
    }

    #[test]
    fn ordered_values_resolves_in_bind_order() {
        let bound = bind("WHERE a = :a AND b = :b", PlaceholderStyle::Dollar);
        let params: Params = [
            ("b".to_string(), SqlValue::Int(2)),
            ("a".to_string(), SqlValue::Int(1)),
        ]
        .into_iter()
        .collect();
        let values = ordered_values(&bound.names, &params).unwrap();
        assert_eq!(values, vec![SqlValue::Int(1), SqlValue::Int(2)]);
    }

    #[test]
    fn missing_parameter_is_a_query_error() {
        let bound = bind("WHERE a = :a", PlaceholderStyle::Dollar);
        let err = ordered_values(&bound.names, &Params::new()).unwrap_err();
        assert!(matches!(err, Error::Query(_)));
        assert!(err.to_string().contains("`a`"));
    }
}
