//! An in-memory SQL catalogue implementing [`QueryExecutor`].
//!
//! It understands just the statements the relational table manager issues
//! plus the reads tests need:
//!
//! ```text
//! CREATE SCHEMA [IF NOT EXISTS] s
//! CREATE TABLE [IF NOT EXISTS] [s.]t (col type, ...)
//! DROP TABLE [IF EXISTS] [s.]t
//! INSERT INTO [s.]t VALUES (v, ...), ...
//! SELECT COUNT(*) FROM [s.]t
//! SELECT * FROM [s.]t
//! ```
//!
//! Every statement sent to a connection is logged on the server, and
//! statements can be made to fail by substring for error-path tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use testbed_core::table::DataValue;
use tracing::trace;

use crate::query::{QueryError, QueryExecutor, QueryResult};

// ── Lexing ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Int(i64),
    Str(String),
    Sym(char),
}

fn tokenize(sql: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_alphabetic() || c == '_' {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                    word.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Word(word));
        } else if c.is_ascii_digit() || c == '-' {
            let mut digits = String::new();
            digits.push(c);
            chars.next();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_digit() {
                    digits.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = digits
                .parse::<i64>()
                .map_err(|e| format!("bad number '{digits}': {e}"))?;
            tokens.push(Token::Int(value));
        } else if c == '\'' {
            chars.next();
            let mut text = String::new();
            loop {
                match chars.next() {
                    Some('\'') if chars.peek() == Some(&'\'') => {
                        chars.next();
                        text.push('\'');
                    }
                    Some('\'') => break,
                    Some(c) => text.push(c),
                    None => return Err("unterminated string literal".to_string()),
                }
            }
            tokens.push(Token::Str(text));
        } else if "(),*;".contains(c) {
            tokens.push(Token::Sym(c));
            chars.next();
        } else {
            return Err(format!("unexpected character '{c}'"));
        }
    }
    Ok(tokens)
}

// ── Parsing ──────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum Statement {
    CreateSchema { name: String, if_not_exists: bool },
    CreateTable { name: String, if_not_exists: bool, columns: Vec<String> },
    DropTable { name: String, if_exists: bool },
    Insert { table: String, rows: Vec<Vec<DataValue>> },
    SelectCount { table: String },
    SelectAll { table: String },
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn keyword(&mut self, kw: &str) -> bool {
        match self.peek() {
            Some(Token::Word(w)) if w.eq_ignore_ascii_case(kw) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn keywords(&mut self, kws: &[&str]) -> bool {
        let start = self.pos;
        if kws.iter().all(|kw| self.keyword(kw)) {
            return true;
        }
        self.pos = start;
        false
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), String> {
        if self.keyword(kw) {
            Ok(())
        } else {
            Err(format!("expected {kw}, found {:?}", self.peek()))
        }
    }

    fn symbol(&mut self, sym: char) -> bool {
        if self.peek() == Some(&Token::Sym(sym)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, sym: char) -> Result<(), String> {
        if self.symbol(sym) {
            Ok(())
        } else {
            Err(format!("expected '{sym}', found {:?}", self.peek()))
        }
    }

    fn identifier(&mut self) -> Result<String, String> {
        match self.next() {
            Some(Token::Word(w)) => Ok(w),
            other => Err(format!("expected identifier, found {other:?}")),
        }
    }

    fn finish(&mut self) -> Result<(), String> {
        self.symbol(';');
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(format!("unexpected trailing {t:?}")),
        }
    }

    fn statement(&mut self) -> Result<Statement, String> {
        let statement = if self.keyword("CREATE") {
            if self.keyword("SCHEMA") {
                let if_not_exists = self.keywords(&["IF", "NOT", "EXISTS"]);
                Statement::CreateSchema {
                    name: self.identifier()?,
                    if_not_exists,
                }
            } else {
                self.expect_keyword("TABLE")?;
                let if_not_exists = self.keywords(&["IF", "NOT", "EXISTS"]);
                let name = self.identifier()?;
                let columns = self.column_list()?;
                Statement::CreateTable {
                    name,
                    if_not_exists,
                    columns,
                }
            }
        } else if self.keyword("DROP") {
            self.expect_keyword("TABLE")?;
            let if_exists = self.keywords(&["IF", "EXISTS"]);
            Statement::DropTable {
                name: self.identifier()?,
                if_exists,
            }
        } else if self.keyword("INSERT") {
            self.expect_keyword("INTO")?;
            let table = self.identifier()?;
            self.expect_keyword("VALUES")?;
            let mut rows = vec![self.tuple()?];
            while self.symbol(',') {
                rows.push(self.tuple()?);
            }
            Statement::Insert { table, rows }
        } else if self.keyword("SELECT") {
            if self.symbol('*') {
                self.expect_keyword("FROM")?;
                Statement::SelectAll {
                    table: self.identifier()?,
                }
            } else {
                self.expect_keyword("COUNT")?;
                self.expect_symbol('(')?;
                self.expect_symbol('*')?;
                self.expect_symbol(')')?;
                self.expect_keyword("FROM")?;
                Statement::SelectCount {
                    table: self.identifier()?,
                }
            }
        } else {
            return Err(format!("unsupported statement starting with {:?}", self.peek()));
        };
        self.finish()?;
        Ok(statement)
    }

    /// `(name type..., name type...)`; only the names are kept.
    fn column_list(&mut self) -> Result<Vec<String>, String> {
        self.expect_symbol('(')?;
        let mut columns = vec![self.identifier()?];
        let mut depth = 0usize;
        loop {
            match self.next() {
                Some(Token::Sym('(')) => depth += 1,
                Some(Token::Sym(')')) if depth == 0 => break,
                Some(Token::Sym(')')) => depth -= 1,
                Some(Token::Sym(',')) if depth == 0 => columns.push(self.identifier()?),
                Some(_) => {}
                None => return Err("unterminated column list".to_string()),
            }
        }
        Ok(columns)
    }

    fn tuple(&mut self) -> Result<Vec<DataValue>, String> {
        self.expect_symbol('(')?;
        let mut values = Vec::new();
        loop {
            let value = match self.next() {
                Some(Token::Int(i)) => DataValue::Int(i),
                Some(Token::Str(s)) => DataValue::Text(s),
                Some(Token::Word(w)) if w.eq_ignore_ascii_case("null") => DataValue::Null,
                Some(Token::Word(w)) if w.eq_ignore_ascii_case("true") => DataValue::Bool(true),
                Some(Token::Word(w)) if w.eq_ignore_ascii_case("false") => DataValue::Bool(false),
                other => return Err(format!("expected a value, found {other:?}")),
            };
            values.push(value);
            if self.symbol(')') {
                return Ok(values);
            }
            self.expect_symbol(',')?;
        }
    }
}

fn parse(sql: &str) -> Result<Statement, QueryError> {
    let syntax = |reason: String| QueryError::Syntax {
        sql: sql.to_string(),
        reason,
    };
    let tokens = tokenize(sql).map_err(syntax)?;
    Parser { tokens, pos: 0 }.statement().map_err(syntax)
}

// ── Catalogue ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Table {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<DataValue>>,
}

#[derive(Debug, Default)]
struct Database {
    schemas: BTreeSet<String>,
    /// Keyed by lower-cased, schema-qualified name.
    tables: BTreeMap<String, Table>,
}

impl Database {
    fn table(&self, name: &str) -> Result<&Table, QueryError> {
        self.tables
            .get(&name.to_lowercase())
            .ok_or_else(|| QueryError::TableNotFound {
                table: name.to_string(),
            })
    }

    fn check_schema(&self, name: &str) -> Result<(), QueryError> {
        match name.rsplit_once('.') {
            Some((schema, _)) if !self.schemas.contains(&schema.to_lowercase()) => {
                Err(QueryError::SchemaNotFound {
                    schema: schema.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn apply(&mut self, statement: Statement) -> Result<QueryResult, QueryError> {
        match statement {
            Statement::CreateSchema { name, if_not_exists } => {
                if !self.schemas.insert(name.to_lowercase()) && !if_not_exists {
                    return Err(QueryError::Rejected(format!("schema '{name}' already exists")));
                }
                Ok(QueryResult::updated(0))
            }
            Statement::CreateTable {
                name,
                if_not_exists,
                columns,
            } => {
                self.check_schema(&name)?;
                let key = name.to_lowercase();
                if self.tables.contains_key(&key) {
                    if if_not_exists {
                        return Ok(QueryResult::updated(0));
                    }
                    return Err(QueryError::TableExists { table: name });
                }
                self.tables.insert(
                    key,
                    Table {
                        name,
                        columns,
                        rows: Vec::new(),
                    },
                );
                Ok(QueryResult::updated(0))
            }
            Statement::DropTable { name, if_exists } => {
                if self.tables.remove(&name.to_lowercase()).is_none() && !if_exists {
                    return Err(QueryError::TableNotFound { table: name });
                }
                Ok(QueryResult::updated(0))
            }
            Statement::Insert { table, rows } => {
                let target = self
                    .tables
                    .get_mut(&table.to_lowercase())
                    .ok_or_else(|| QueryError::TableNotFound {
                        table: table.clone(),
                    })?;
                for (row, values) in rows.iter().enumerate() {
                    if values.len() != target.columns.len() {
                        return Err(QueryError::ColumnCount {
                            table,
                            row,
                            expected: target.columns.len(),
                            actual: values.len(),
                        });
                    }
                }
                let count = rows.len() as u64;
                target.rows.extend(rows);
                Ok(QueryResult::updated(count))
            }
            Statement::SelectCount { table } => {
                let count = self.table(&table)?.rows.len() as i64;
                Ok(QueryResult::rows(
                    vec!["count".to_string()],
                    vec![vec![DataValue::Int(count)]],
                ))
            }
            Statement::SelectAll { table } => {
                let table = self.table(&table)?;
                Ok(QueryResult::rows(table.columns.clone(), table.rows.clone()))
            }
        }
    }
}

// ── Server and connections ───────────────────────────────────────────

/// A statement as received by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedStatement {
    pub database: String,
    pub sql: String,
}

#[derive(Debug, Default)]
struct ServerState {
    databases: BTreeMap<String, Database>,
    log: Vec<LoggedStatement>,
    rejected_fragments: Vec<String>,
}

/// A set of named in-memory databases shared by all connections.
///
/// Cloning yields another handle to the same server.
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a connection, creating the database on first use.
    pub fn connect(&self, database: &str) -> MemoryConnection {
        self.state()
            .databases
            .entry(database.to_string())
            .or_default();
        MemoryConnection {
            server: self.clone(),
            database: database.to_string(),
            closed: false,
        }
    }

    /// Make every statement containing `fragment` (case-insensitive) fail.
    pub fn reject_statements_containing(&self, fragment: &str) {
        self.state().rejected_fragments.push(fragment.to_lowercase());
    }

    /// Statements received for `database`, in order.
    pub fn statements(&self, database: &str) -> Vec<String> {
        self.state()
            .log
            .iter()
            .filter(|s| s.database == database)
            .map(|s| s.sql.clone())
            .collect()
    }

    pub fn table_names(&self, database: &str) -> Vec<String> {
        self.state()
            .databases
            .get(database)
            .map(|db| db.tables.values().map(|t| t.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn row_count(&self, database: &str, table: &str) -> Option<usize> {
        self.state()
            .databases
            .get(database)
            .and_then(|db| db.table(table).ok())
            .map(|t| t.rows.len())
    }

    pub fn has_schema(&self, database: &str, schema: &str) -> bool {
        self.state()
            .databases
            .get(database)
            .is_some_and(|db| db.schemas.contains(&schema.to_lowercase()))
    }

    fn execute(&self, database: &str, sql: &str) -> Result<QueryResult, QueryError> {
        let mut state = self.state();
        state.log.push(LoggedStatement {
            database: database.to_string(),
            sql: sql.to_string(),
        });
        let lowered = sql.to_lowercase();
        if state
            .rejected_fragments
            .iter()
            .any(|f| lowered.contains(f.as_str()))
        {
            return Err(QueryError::Rejected(sql.to_string()));
        }
        let statement = parse(sql)?;
        state
            .databases
            .entry(database.to_string())
            .or_default()
            .apply(statement)
    }
}

/// A connection to one database of a [`MemoryServer`].
#[derive(Debug)]
pub struct MemoryConnection {
    server: MemoryServer,
    database: String,
    closed: bool,
}

impl MemoryConnection {
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl QueryExecutor for MemoryConnection {
    fn execute_query(&mut self, sql: &str) -> Result<QueryResult, QueryError> {
        if self.closed {
            return Err(QueryError::Closed);
        }
        trace!(database = %self.database, sql, "execute");
        self.server.execute(&self.database, sql)
    }

    fn table_names(&mut self) -> Result<Vec<String>, QueryError> {
        if self.closed {
            return Err(QueryError::Closed);
        }
        Ok(self.server.table_names(&self.database))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> (MemoryServer, MemoryConnection) {
        let server = MemoryServer::new();
        let conn = server.connect("db");
        (server, conn)
    }

    #[test]
    fn tokenizer_handles_literals() {
        let tokens = tokenize("INSERT INTO s.t VALUES (-1, 'it''s', null)").unwrap();
        assert_eq!(tokens[2], Token::Word("s.t".into()));
        assert!(tokens.contains(&Token::Int(-1)));
        assert!(tokens.contains(&Token::Str("it's".into())));
        assert!(tokenize("SELECT 'open").is_err());
    }

    #[test]
    fn create_insert_count_and_drop() {
        let (server, mut conn) = connection();
        conn.execute_query("CREATE TABLE nation (n_nationkey BIGINT, n_name VARCHAR(25), n_comment DECIMAL(12, 2))")
            .unwrap();
        let inserted = conn
            .execute_query("INSERT INTO nation VALUES (1, 'ALGERIA', null), (2, 'ARGENTINA', null)")
            .unwrap();
        assert_eq!(inserted.updated, Some(2));

        let count = conn.execute_query("SELECT COUNT(*) FROM NATION").unwrap();
        assert_eq!(count.scalar(), Some(&DataValue::Int(2)));
        let all = conn.execute_query("select * from nation;").unwrap();
        assert_eq!(all.columns, vec!["n_nationkey", "n_name", "n_comment"]);
        assert_eq!(all.rows[1][1], DataValue::Text("ARGENTINA".into()));

        conn.execute_query("DROP TABLE nation").unwrap();
        assert!(matches!(
            conn.execute_query("DROP TABLE nation"),
            Err(QueryError::TableNotFound { .. })
        ));
        conn.execute_query("DROP TABLE IF EXISTS nation").unwrap();
        assert_eq!(server.statements("db").len(), 7);
    }

    #[test]
    fn schemas_must_exist_before_tables() {
        let (server, mut conn) = connection();
        assert!(matches!(
            conn.execute_query("CREATE TABLE s.t (a INT)"),
            Err(QueryError::SchemaNotFound { .. })
        ));
        conn.execute_query("CREATE SCHEMA IF NOT EXISTS s").unwrap();
        conn.execute_query("CREATE SCHEMA IF NOT EXISTS s").unwrap();
        conn.execute_query("CREATE TABLE s.t (a INT)").unwrap();
        assert!(server.has_schema("db", "S"));
        assert_eq!(conn.table_names().unwrap(), vec!["s.t"]);
        assert!(matches!(
            conn.execute_query("CREATE TABLE s.t (a INT)"),
            Err(QueryError::TableExists { .. })
        ));
    }

    #[test]
    fn column_count_is_checked() {
        let (_server, mut conn) = connection();
        conn.execute_query("CREATE TABLE t (a INT, b INT)").unwrap();
        let err = conn.execute_query("INSERT INTO t VALUES (1, 2), (3)").unwrap_err();
        assert!(matches!(err, QueryError::ColumnCount { row: 1, expected: 2, actual: 1, .. }));
    }

    #[test]
    fn rejected_and_closed_connections_fail() {
        let (server, mut conn) = connection();
        server.reject_statements_containing("drop table");
        conn.execute_query("CREATE TABLE t (a INT)").unwrap();
        assert!(matches!(
            conn.execute_query("DROP TABLE t"),
            Err(QueryError::Rejected(_))
        ));
        assert_eq!(server.table_names("db"), vec!["t"]);

        conn.close();
        assert!(matches!(conn.execute_query("SELECT * FROM t"), Err(QueryError::Closed)));
    }

    #[test]
    fn unsupported_statements_are_syntax_errors() {
        let (_server, mut conn) = connection();
        assert!(matches!(
            conn.execute_query("UPDATE t SET a = 1"),
            Err(QueryError::Syntax { .. })
        ));
    }
}
