//! Statement intermediate representation and dialect rendering.
//!
//! Compilers never splice user data into SQL text. They write fragments
//! containing `$N` placeholders and push one typed [`SqlParam`] per
//! placeholder; a [`Dialect`] resolves the placeholders into a final SQL
//! string, quoting identifiers and encoding literals.

use crate::error::{AdapterError, Result};
use serde_json::Value;

/// A positional parameter of a [`Statement`].
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// Quoted as an identifier (table, column, constraint name).
    Ident(String),
    /// Encoded as a literal. Arrays and objects become JSON text.
    Value(Value),
    /// Always encoded as JSON text, strings included.
    Json(Value),
    /// Substituted unquoted. Only for trusted, compiler-built fragments.
    Raw(String),
}

impl SqlParam {
    pub fn ident(name: impl Into<String>) -> Self {
        SqlParam::Ident(name.into())
    }

    pub fn text(value: impl Into<String>) -> Self {
        SqlParam::Value(Value::String(value.into()))
    }

    pub fn raw(fragment: impl Into<String>) -> Self {
        SqlParam::Raw(fragment.into())
    }
}

/// Parameter list under construction, numbered from a starting index.
#[derive(Debug, Clone)]
pub struct Params {
    start: usize,
    items: Vec<SqlParam>,
}

impl Params {
    pub fn starting_at(start: usize) -> Self {
        Self {
            start: start.max(1),
            items: Vec::new(),
        }
    }

    /// Push a parameter and return its placeholder.
    pub fn push(&mut self, param: SqlParam) -> String {
        let index = self.next_index();
        self.items.push(param);
        format!("${}", index)
    }

    /// Append parameters compiled separately with `start == self.next_index()`.
    pub fn extend(&mut self, params: Vec<SqlParam>) {
        self.items.extend(params);
    }

    pub fn next_index(&self) -> usize {
        self.start + self.items.len()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<SqlParam> {
        self.items
    }

    /// Finish a statement whose placeholders start at `$1`.
    pub fn finish(self, text: impl Into<String>) -> Statement {
        debug_assert_eq!(self.start, 1, "statements are numbered from $1");
        Statement {
            text: text.into(),
            params: self.items,
        }
    }
}

/// SQL text with `$N` placeholders; `$1` is `params[0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub text: String,
    pub params: Vec<SqlParam>,
}

impl Statement {
    pub fn new(text: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            text: text.into(),
            params,
        }
    }

    /// A statement without placeholders.
    pub fn plain(text: impl Into<String>) -> Self {
        Self::new(text, Vec::new())
    }

    /// Join statements into a `;`-separated batch, renumbering placeholders.
    pub fn batch(statements: Vec<Statement>) -> Statement {
        let mut text = String::new();
        let mut params = Vec::new();

        for statement in statements {
            let offset = params.len();
            let shifted = shift_placeholders(&statement.text, offset);
            text.push_str(&shifted);
            text.push(';');
            params.extend(statement.params);
        }

        Statement { text, params }
    }
}

fn shift_placeholders(text: &str, offset: usize) -> String {
    if offset == 0 {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = placeholder_digits(after);
        if digits == 0 {
            out.push('$');
            rest = after;
            continue;
        }
        // digits are ASCII so the slice is a valid usize literal
        let index: usize = after[..digits].parse().unwrap_or(0);
        out.push_str(&format!("${}", index + offset));
        rest = &after[digits..];
    }
    out.push_str(rest);
    out
}

/// Length of a `[1-9][0-9]*` run at the start of `s`.
fn placeholder_digits(s: &str) -> usize {
    let bytes = s.as_bytes();
    if bytes.is_empty() || !(b'1'..=b'9').contains(&bytes[0]) {
        return 0;
    }
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}

/// Engine-specific quoting rules.
pub trait Dialect: Send + Sync {
    fn quote_identifier(&self, name: &str) -> String;

    fn quote_string(&self, value: &str) -> String;

    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string().to_uppercase(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => self.quote_string(s),
            Value::Array(_) | Value::Object(_) => self.quote_string(&value.to_string()),
        }
    }

    fn param(&self, param: &SqlParam) -> String {
        match param {
            SqlParam::Ident(name) => self.quote_identifier(name),
            SqlParam::Value(value) => self.literal(value),
            SqlParam::Json(value) => self.quote_string(&value.to_string()),
            SqlParam::Raw(fragment) => fragment.clone(),
        }
    }

    /// Resolve every `$N` placeholder of `statement`.
    fn render(&self, statement: &Statement) -> Result<String> {
        let text = &statement.text;
        let mut out = String::with_capacity(text.len() + statement.params.len() * 8);
        let mut rest = text.as_str();

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            let digits = placeholder_digits(after);
            if digits == 0 {
                out.push('$');
                rest = after;
                continue;
            }
            let index: usize = after[..digits]
                .parse()
                .map_err(|_| AdapterError::InternalError(format!("bad placeholder in {}", text)))?;
            let param = statement.params.get(index - 1).ok_or_else(|| {
                AdapterError::InternalError(format!(
                    "Index ${} exceeds values length: {}",
                    index,
                    statement.params.len()
                ))
            })?;
            out.push_str(&self.param(param));
            rest = &after[digits..];
        }
        out.push_str(rest);

        Ok(out)
    }
}

/// MySQL 8 quoting: backquoted identifiers, backslash-escaped literals.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn quote_string(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len() + 2);
        out.push('\'');
        for c in value.chars() {
            match c {
                '\'' => out.push_str("''"),
                '\\' => out.push_str("\\\\"),
                '\0' => out.push_str("\\0"),
                _ => out.push(c),
            }
        }
        out.push('\'');
        out
    }
}

/// Build a MySQL JSON path with every member name double-quoted.
pub fn json_path<S: AsRef<str>>(segments: &[S]) -> String {
    let mut path = String::from("$");
    for segment in segments {
        path.push_str(".\"");
        for c in segment.as_ref().chars() {
            if c == '"' || c == '\\' {
                path.push('\\');
            }
            path.push(c);
        }
        path.push('"');
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_identifiers_and_literals() {
        let mut params = Params::starting_at(1);
        let table = params.push(SqlParam::ident("Player"));
        let column = params.push(SqlParam::ident("name"));
        let value = params.push(SqlParam::text("O'Reilly"));
        let statement = params.finish(format!("SELECT * FROM {} WHERE {} = {}", table, column, value));

        let sql = MySqlDialect.render(&statement).unwrap();
        assert_eq!(sql, "SELECT * FROM `Player` WHERE `name` = 'O''Reilly'");
    }

    #[test]
    fn test_render_json_and_raw() {
        let statement = Statement::new(
            "$1 = CAST($2 AS JSON), $3",
            vec![
                SqlParam::ident("tags"),
                SqlParam::Json(json!("a")),
                SqlParam::raw("TIMESTAMP(6)"),
            ],
        );
        let sql = MySqlDialect.render(&statement).unwrap();
        assert_eq!(sql, "`tags` = CAST('\"a\"' AS JSON), TIMESTAMP(6)");
    }

    #[test]
    fn test_render_leaves_json_paths_alone() {
        let statement = Statement::new(
            "JSON_ARRAY_APPEND($1, '$', $2)",
            vec![SqlParam::ident("a"), SqlParam::Value(json!(1))],
        );
        assert_eq!(
            MySqlDialect.render(&statement).unwrap(),
            "JSON_ARRAY_APPEND(`a`, '$', 1)"
        );
    }

    #[test]
    fn test_render_missing_param() {
        let statement = Statement::new("$1 = $2", vec![SqlParam::ident("a")]);
        let err = MySqlDialect.render(&statement).unwrap_err();
        assert!(err.to_string().contains("exceeds values length"));
    }

    #[test]
    fn test_backslash_and_backquote_escaping() {
        assert_eq!(MySqlDialect.quote_string("a\\.b"), "'a\\\\.b'");
        assert_eq!(MySqlDialect.quote_identifier("we`ird"), "`we``ird`");
        assert_eq!(MySqlDialect.literal(&json!(true)), "TRUE");
        assert_eq!(MySqlDialect.literal(&json!(null)), "NULL");
        assert_eq!(MySqlDialect.literal(&json!([1, 2])), "'[1,2]'");
    }

    #[test]
    fn test_batch_renumbers_placeholders() {
        let batch = Statement::batch(vec![
            Statement::new("DROP TABLE IF EXISTS $1", vec![SqlParam::ident("A")]),
            Statement::new("DROP TABLE IF EXISTS $1", vec![SqlParam::ident("B")]),
        ]);
        assert_eq!(batch.text, "DROP TABLE IF EXISTS $1;DROP TABLE IF EXISTS $2;");
        assert_eq!(
            MySqlDialect.render(&batch).unwrap(),
            "DROP TABLE IF EXISTS `A`;DROP TABLE IF EXISTS `B`;"
        );
    }

    #[test]
    fn test_params_numbering_from_offset() {
        let mut params = Params::starting_at(4);
        assert_eq!(params.push(SqlParam::ident("a")), "$4");
        assert_eq!(params.push(SqlParam::ident("b")), "$5");
        assert_eq!(params.next_index(), 6);
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_json_path_quotes_members() {
        assert_eq!(json_path(&["fields", "name"]), "$.\"fields\".\"name\"");
        assert_eq!(json_path::<&str>(&[]), "$");
    }
}
