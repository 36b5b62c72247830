//! Migration units: one versioned, ordered schema or data change.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use sha2::{Digest, Sha256};
use sqlx::Database;

/// A compiled migration body. Receives the connection of the transaction the
/// unit runs in; everything it does commits or rolls back with the unit.
pub type Procedure<DB> = for<'c> fn(
    &'c mut <DB as Database>::Connection,
) -> Pin<Box<dyn Future<Output = sqlx::Result<()>> + Send + 'c>>;

/// What a migration does in one direction.
pub enum Action<DB: Database> {
    /// One or more `;`-separated SQL statements.
    Sql(&'static str),
    /// Rust code run against the open transaction.
    Procedure(Procedure<DB>),
}

impl<DB: Database> Action<DB> {
    /// The individual statements of a SQL action. Empty for procedures.
    pub fn statements(&self) -> Vec<String> {
        match self {
            Self::Sql(sql) => split_sql_statements(sql),
            Self::Procedure(_) => Vec::new(),
        }
    }
}

impl<DB: Database> Clone for Action<DB> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<DB: Database> Copy for Action<DB> {}

impl<DB: Database> fmt::Debug for Action<DB> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sql(sql) => f.debug_tuple("Sql").field(sql).finish(),
            Self::Procedure(_) => f.write_str("Procedure(..)"),
        }
    }
}

/// Referential-integrity handling while a unit runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Integrity {
    /// Foreign keys are enforced as usual.
    #[default]
    Enforced,
    /// Enforcement is switched off for the unit's duration and restored
    /// afterwards on every exit path. Needed for units that drop or rebuild
    /// tables in an order the foreign keys would reject.
    Suspended,
}

impl Integrity {
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended)
    }
}

/// Migration direction for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Run the forward action and add the ledger entry.
    Up,
    /// Run the reverse action and remove the ledger entry.
    Down,
}

/// A single migration for one database engine.
///
/// Once a unit has been applied anywhere its forward action must not change;
/// the recorded checksum is compared on every later run.
pub struct Migration<DB: Database> {
    sequence: u32,
    slug: &'static str,
    forward: Action<DB>,
    reverse: Option<Action<DB>>,
    integrity: Integrity,
}

impl<DB: Database> Migration<DB> {
    pub fn new(sequence: u32, slug: &'static str, forward: Action<DB>) -> Self {
        Self {
            sequence,
            slug,
            forward,
            reverse: None,
            integrity: Integrity::Enforced,
        }
    }

    /// A unit whose forward action is plain SQL.
    pub fn sql(sequence: u32, slug: &'static str, sql: &'static str) -> Self {
        Self::new(sequence, slug, Action::Sql(sql))
    }

    /// A unit whose forward action is a compiled procedure.
    pub fn procedure(sequence: u32, slug: &'static str, procedure: Procedure<DB>) -> Self {
        Self::new(sequence, slug, Action::Procedure(procedure))
    }

    pub fn with_reverse(mut self, reverse: Action<DB>) -> Self {
        self.reverse = Some(reverse);
        self
    }

    pub fn reverse_sql(self, sql: &'static str) -> Self {
        self.with_reverse(Action::Sql(sql))
    }

    /// Run this unit with foreign key enforcement switched off.
    pub fn suspend_integrity(mut self) -> Self {
        self.integrity = Integrity::Suspended;
        self
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn slug(&self) -> &'static str {
        self.slug
    }

    /// Ledger key: zero-padded sequence number and slug, e.g. `0003_create_tags`.
    pub fn identifier(&self) -> String {
        format!("{:04}_{}", self.sequence, self.slug)
    }

    pub fn forward(&self) -> &Action<DB> {
        &self.forward
    }

    pub fn reverse(&self) -> Option<&Action<DB>> {
        self.reverse.as_ref()
    }

    pub fn is_reversible(&self) -> bool {
        self.reverse.is_some()
    }

    pub fn integrity(&self) -> Integrity {
        self.integrity
    }

    /// SHA-256 of the forward SQL. Procedures have no checksum.
    pub fn checksum(&self) -> Option<String> {
        match self.forward {
            Action::Sql(sql) => Some(calculate_checksum(sql)),
            Action::Procedure(_) => None,
        }
    }

    /// Action to run for the given direction.
    pub fn action(&self, direction: Direction) -> Option<Action<DB>> {
        match direction {
            Direction::Up => Some(self.forward),
            Direction::Down => self.reverse,
        }
    }
}

impl<DB: Database> Clone for Migration<DB> {
    fn clone(&self) -> Self {
        Self {
            sequence: self.sequence,
            slug: self.slug,
            forward: self.forward,
            reverse: self.reverse,
            integrity: self.integrity,
        }
    }
}

impl<DB: Database> fmt::Debug for Migration<DB> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("identifier", &self.identifier())
            .field("forward", &self.forward)
            .field("reverse", &self.reverse)
            .field("integrity", &self.integrity)
            .finish()
    }
}

/// Whether `slug` is a valid migration slug (`[a-z0-9_]+`).
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

/// Split a ledger identifier into its sequence number and slug.
pub fn parse_identifier(identifier: &str) -> Option<(u32, &str)> {
    let (sequence, slug) = identifier.split_once('_')?;
    if sequence.is_empty() || !sequence.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !is_valid_slug(slug) {
        return None;
    }
    let sequence = sequence.parse().ok()?;
    Some((sequence, slug))
}

/// SHA-256 of a migration body, hex encoded.
pub(crate) fn calculate_checksum(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Split SQL into individual statements.
///
/// Semicolons inside quoted strings, quoted identifiers, comments and
/// dollar-quoted bodies (PL/pgSQL functions) do not end a statement.
/// Segments holding nothing but comments are dropped.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_code = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        let end = match c {
            '\'' => {
                has_code = true;
                scan_quoted(&chars, i, c, is_escape_string(&chars, i))
            }
            '"' => {
                has_code = true;
                scan_quoted(&chars, i, c, false)
            }
            '-' if next == Some('-') => chars[i..]
                .iter()
                .position(|&ch| ch == '\n')
                .map_or(chars.len(), |p| i + p),
            '/' if next == Some('*') => {
                find_sequence(&chars, i + 2, &['*', '/']).map_or(chars.len(), |p| p + 2)
            }
            '$' => {
                has_code = true;
                match dollar_tag_len(&chars, i) {
                    Some(tag_len) => {
                        let tag = &chars[i..i + tag_len];
                        find_sequence(&chars, i + tag_len, tag)
                            .map_or(chars.len(), |p| p + tag_len)
                    }
                    None => i + 1,
                }
            }
            ';' => {
                push_statement(&mut statements, &mut current, has_code);
                has_code = false;
                i += 1;
                continue;
            }
            _ => {
                if !c.is_whitespace() {
                    has_code = true;
                }
                i + 1
            }
        };

        current.extend(&chars[i..end]);
        i = end;
    }

    // The last statement might not end with ;
    push_statement(&mut statements, &mut current, has_code);

    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String, has_code: bool) {
    let stmt = current.trim();
    if has_code && !stmt.is_empty() {
        statements.push(stmt.to_string());
    }
    current.clear();
}

/// End index (exclusive) of a quoted run starting at `start`. A doubled quote
/// character is an escaped quote; so is a backslashed one in escape strings.
fn scan_quoted(chars: &[char], start: usize, quote: char, backslash_escapes: bool) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if backslash_escapes && chars[i] == '\\' {
            i += 2;
            continue;
        }
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

/// Whether the quote at `quote` opens a PostgreSQL escape string (`E'...'`).
fn is_escape_string(chars: &[char], quote: usize) -> bool {
    let Some(prefix) = quote.checked_sub(1).map(|p| chars[p]) else {
        return false;
    };
    if !matches!(prefix, 'E' | 'e') {
        return false;
    }
    // `namE'...'` is an identifier followed by a literal, not a prefix
    quote
        .checked_sub(2)
        .map_or(true, |p| !(chars[p].is_alphanumeric() || chars[p] == '_'))
}

/// Length of a dollar-quote delimiter (`$$` or `$tag$`) starting at `start`.
fn dollar_tag_len(chars: &[char], start: usize) -> Option<usize> {
    let mut i = start + 1;
    // $1, $2 ... are positional parameters, not delimiters
    if chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }
    while let Some(&c) = chars.get(i) {
        if c == '$' {
            return Some(i - start + 1);
        }
        if !(c.is_alphanumeric() || c == '_') {
            return None;
        }
        i += 1;
    }
    None
}

fn find_sequence(chars: &[char], from: usize, needle: &[char]) -> Option<usize> {
    if from > chars.len() {
        return None;
    }
    chars[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|p| from + p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Sqlite;

    #[test]
    fn test_identifier_is_zero_padded() {
        let m: Migration<Sqlite> = Migration::sql(3, "create_tags", "CREATE TABLE tags (id INTEGER)");
        assert_eq!(m.identifier(), "0003_create_tags");
        assert_eq!(m.sequence(), 3);
        assert_eq!(m.slug(), "create_tags");
        assert!(!m.is_reversible());
        assert_eq!(m.integrity(), Integrity::Enforced);
    }

    #[test]
    fn test_reverse_and_integrity_builders() {
        let m: Migration<Sqlite> = Migration::sql(9, "drop_legacy", "DROP TABLE legacy")
            .reverse_sql("CREATE TABLE legacy (id INTEGER)")
            .suspend_integrity();
        assert!(m.is_reversible());
        assert!(m.integrity().is_suspended());
        assert!(matches!(m.action(Direction::Down), Some(Action::Sql(_))));
    }

    #[test]
    fn test_checksum_tracks_forward_sql() {
        let a: Migration<Sqlite> = Migration::sql(1, "users", "CREATE TABLE users (id INTEGER);");
        let b: Migration<Sqlite> = Migration::sql(1, "users", "CREATE TABLE users (id INTEGER);");
        let c: Migration<Sqlite> = Migration::sql(1, "users", "CREATE TABLE users (id TEXT);");

        let checksum = a.checksum().unwrap();
        assert_eq!(checksum.len(), 64);
        assert_eq!(a.checksum(), b.checksum());
        assert_ne!(a.checksum(), c.checksum());
    }

    #[test]
    fn test_procedure_has_no_checksum() {
        fn noop(
            _conn: &mut sqlx::SqliteConnection,
        ) -> Pin<Box<dyn Future<Output = sqlx::Result<()>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        let m: Migration<Sqlite> = Migration::procedure(2, "backfill", noop);
        assert!(m.checksum().is_none());
        assert!(m.forward().statements().is_empty());
    }

    #[test]
    fn test_parse_identifier() {
        assert_eq!(parse_identifier("0001_create_projects"), Some((1, "create_projects")));
        assert_eq!(parse_identifier("12_add_index"), Some((12, "add_index")));
        assert_eq!(parse_identifier("create_projects"), None);
        assert_eq!(parse_identifier("0001_"), None);
        assert_eq!(parse_identifier("0001_Bad-Slug"), None);
        assert_eq!(parse_identifier("_0001"), None);
    }

    #[test]
    fn test_slug_validation() {
        assert!(is_valid_slug("create_projects_v2"));
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("Create"));
        assert!(!is_valid_slug("drop table"));
    }

    #[test]
    fn test_split_simple_statements() {
        let sql = "SELECT 1; SELECT 2; SELECT 3;";
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2", "SELECT 3"]);
    }

    #[test]
    fn test_split_without_trailing_semicolon() {
        let stmts = split_sql_statements("CREATE TABLE a (id INTEGER);\nCREATE TABLE b (id INTEGER)");
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[1], "CREATE TABLE b (id INTEGER)");
    }

    #[test]
    fn test_split_with_dollar_quoted_function() {
        let sql = r#"
CREATE FUNCTION touch_updated_at() RETURNS trigger AS $$
BEGIN
    NEW.updated_at := NOW();
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

SELECT 3;
"#;
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("CREATE FUNCTION"));
        assert!(stmts[0].contains("$$ LANGUAGE plpgsql"));
        assert!(stmts[0].contains("NEW.updated_at := NOW();"));
        assert!(stmts[1].contains("SELECT 3"));
    }

    #[test]
    fn test_split_with_tagged_dollar_quote() {
        let sql = "DO $body$ BEGIN PERFORM 1; END $body$; SELECT 2";
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0], "DO $body$ BEGIN PERFORM 1; END $body$");
    }

    #[test]
    fn test_split_ignores_semicolons_in_literals() {
        let sql = "INSERT INTO notes (body) VALUES ('a; b'); INSERT INTO notes (body) VALUES ('it''s; fine');";
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0], "INSERT INTO notes (body) VALUES ('a; b')");
        assert_eq!(stmts[1], "INSERT INTO notes (body) VALUES ('it''s; fine')");
    }

    #[test]
    fn test_split_respects_backslash_escapes_in_e_strings() {
        let sql = "INSERT INTO notes (body) VALUES (E'it\\'s; fine'); SELECT 'a\\'; SELECT 2";
        let stmts = split_sql_statements(sql);
        assert_eq!(
            stmts,
            vec![
                "INSERT INTO notes (body) VALUES (E'it\\'s; fine')",
                "SELECT 'a\\'",
                "SELECT 2",
            ]
        );
    }

    #[test]
    fn test_split_ignores_semicolons_in_comments() {
        let sql = "-- drop the old table; it is unused\nDROP TABLE old; /* done; */";
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].ends_with("DROP TABLE old"));
    }

    #[test]
    fn test_split_drops_comment_only_segments() {
        let sql = "CREATE TABLE a (id INTEGER);\n-- trailing note\n;";
        let stmts = split_sql_statements(sql);
        assert_eq!(stmts, vec!["CREATE TABLE a (id INTEGER)"]);
    }

    #[test]
    fn test_split_keeps_positional_parameters() {
        let stmts = split_sql_statements("UPDATE notes SET title = $1 WHERE id = $2; SELECT 1");
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0], "UPDATE notes SET title = $1 WHERE id = $2");
    }
}
