//! Parser for the statement shapes the fuzzer emits.
//!
//! The shadow store re-executes the *embedded* flavor of every generated
//! statement, and replay re-executes whole log files. Both only ever see
//! statements this fuzzer produced, so the grammar is closed: `CREATE TABLE`,
//! `INSERT INTO`, `REPLACE INTO`, `UPDATE ... SET ... WHERE`, and
//! `DELETE FROM ... WHERE` with literal values and `AND`-joined equality
//! filters. Anything else is a parse error, which during replay means the log
//! was not written by this fuzzer.

use std::fmt;

use crate::error::{FuzzerError, Result};
use crate::types::TypeInstance;

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

/// A literal token, untyped until a column type interprets it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Literal {
    Null,
    /// Numeric text, sign and decimal point included.
    Number(String),
    /// Unquoted string contents.
    String(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Number(s) => f.write_str(s),
            Self::String(s) => write!(f, "'{s}'"),
        }
    }
}

/// A parsed statement.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlStatement {
    Insert {
        table: String,
        values: Vec<Literal>,
        /// `REPLACE INTO` rather than `INSERT INTO`.
        replace: bool,
    },
    Update {
        table: String,
        assignments: Vec<(String, Literal)>,
        filter: Vec<(String, Literal)>,
    },
    Delete {
        table: String,
        filter: Vec<(String, Literal)>,
    },
    CreateTable(CreateTableStatement),
}

/// Schema information recovered from a `CREATE TABLE`.
#[derive(Clone, Debug, PartialEq)]
pub struct CreateTableStatement {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Primary key column names, in key order.
    pub primary_key: Vec<String>,
}

/// One column definition.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub type_instance: TypeInstance,
    pub not_null: bool,
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
enum Token {
    /// Keyword or bare identifier, uppercased for keyword matching.
    Word(String),
    /// Backquoted identifier, verbatim.
    Ident(String),
    /// Quoted string contents, unescaped.
    Str(String),
    Number(String),
    LParen,
    RParen,
    Comma,
    Eq,
}

fn tokenize(sql: &str) -> Result<Vec<Token>> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' | b'\r' | b'\n' | b';' => i += 1,
            b'(' => {
                out.push(Token::LParen);
                i += 1;
            }
            b')' => {
                out.push(Token::RParen);
                i += 1;
            }
            b',' => {
                out.push(Token::Comma);
                i += 1;
            }
            b'=' => {
                out.push(Token::Eq);
                i += 1;
            }
            b'`' => {
                let start = i + 1;
                let mut j = start;
                while j < bytes.len() && bytes[j] != b'`' {
                    j += 1;
                }
                if j == bytes.len() {
                    return Err(FuzzerError::new("unterminated quoted identifier"));
                }
                out.push(Token::Ident(sql[start..j].to_owned()));
                i = j + 1;
            }
            b'\'' => {
                let mut s = String::new();
                let mut j = i + 1;
                loop {
                    if j >= bytes.len() {
                        return Err(FuzzerError::new("unterminated string literal"));
                    }
                    match bytes[j] {
                        b'\'' if j + 1 < bytes.len() && bytes[j + 1] == b'\'' => {
                            s.push('\'');
                            j += 2;
                        }
                        b'\'' => {
                            j += 1;
                            break;
                        }
                        b'\\' if j + 1 < bytes.len() => {
                            s.push(char::from(bytes[j + 1]));
                            j += 2;
                        }
                        b => {
                            s.push(char::from(b));
                            j += 1;
                        }
                    }
                }
                out.push(Token::Str(s));
                i = j;
            }
            b'-' | b'0'..=b'9' => {
                let start = i;
                let mut j = i + 1;
                while j < bytes.len()
                    && (bytes[j].is_ascii_digit()
                        || bytes[j] == b'.'
                        || bytes[j] == b'e'
                        || bytes[j] == b'E'
                        || ((bytes[j] == b'-' || bytes[j] == b'+')
                            && matches!(bytes[j - 1], b'e' | b'E')))
                {
                    j += 1;
                }
                out.push(Token::Number(sql[start..j].to_owned()));
                i = j;
            }
            b'A'..=b'Z' | b'a'..=b'z' | b'_' => {
                let start = i;
                let mut j = i + 1;
                while j < bytes.len()
                    && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_')
                {
                    j += 1;
                }
                out.push(Token::Word(sql[start..j].to_ascii_uppercase()));
                i = j;
            }
            other => {
                return Err(FuzzerError::new(format!(
                    "unexpected character {:?} in statement",
                    char::from(other)
                )));
            }
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse one statement.
pub fn parse_statement(sql: &str) -> Result<SqlStatement> {
    let tokens = tokenize(sql)?;
    let mut p = Parser { tokens, pos: 0 };
    let stmt = p.statement()?;
    if p.pos != p.tokens.len() {
        return Err(FuzzerError::new(format!(
            "trailing tokens after statement: {sql:?}"
        )));
    }
    Ok(stmt)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn statement(&mut self) -> Result<SqlStatement> {
        match self.peek_word() {
            Some("INSERT") => self.insert(false),
            Some("REPLACE") => self.insert(true),
            Some("UPDATE") => self.update(),
            Some("DELETE") => self.delete(),
            Some("CREATE") => self.create_table(),
            _ => Err(FuzzerError::new("unrecognized statement")),
        }
    }

    fn insert(&mut self, replace: bool) -> Result<SqlStatement> {
        self.bump();
        self.expect_word("INTO")?;
        let table = self.identifier()?;
        self.expect_word("VALUES")?;
        self.expect(&Token::LParen)?;
        let mut values = Vec::new();
        loop {
            values.push(self.literal()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen)?;
            break;
        }
        Ok(SqlStatement::Insert {
            table,
            values,
            replace,
        })
    }

    fn update(&mut self) -> Result<SqlStatement> {
        self.bump();
        let table = self.identifier()?;
        self.expect_word("SET")?;
        let mut assignments = Vec::new();
        loop {
            let col = self.identifier()?;
            self.expect(&Token::Eq)?;
            assignments.push((col, self.literal()?));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect_word("WHERE")?;
        let filter = self.equality_filter()?;
        Ok(SqlStatement::Update {
            table,
            assignments,
            filter,
        })
    }

    fn delete(&mut self) -> Result<SqlStatement> {
        self.bump();
        self.expect_word("FROM")?;
        let table = self.identifier()?;
        self.expect_word("WHERE")?;
        let filter = self.equality_filter()?;
        Ok(SqlStatement::Delete { table, filter })
    }

    fn equality_filter(&mut self) -> Result<Vec<(String, Literal)>> {
        let mut filter = Vec::new();
        loop {
            let col = self.identifier()?;
            self.expect(&Token::Eq)?;
            filter.push((col, self.literal()?));
            if self.peek_word() == Some("AND") {
                self.bump();
                continue;
            }
            break;
        }
        Ok(filter)
    }

    fn create_table(&mut self) -> Result<SqlStatement> {
        self.bump();
        self.expect_word("TABLE")?;
        let name = self.identifier()?;
        self.expect(&Token::LParen)?;
        let mut columns = Vec::new();
        let mut primary_key = Vec::new();
        loop {
            match self.peek_word() {
                Some("PRIMARY") => {
                    self.bump();
                    self.expect_word("KEY")?;
                    self.expect(&Token::LParen)?;
                    loop {
                        primary_key.push(self.identifier()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(&Token::RParen)?;
                }
                Some("INDEX") | Some("KEY") => {
                    // Structural only; the shadow store does not index.
                    self.bump();
                    self.skip_optional_identifier();
                    self.skip_paren_group()?;
                }
                Some("CONSTRAINT") => {
                    // CONSTRAINT `x` FOREIGN KEY (...) REFERENCES `t` (...)
                    self.bump();
                    self.skip_optional_identifier();
                    self.expect_word("FOREIGN")?;
                    self.expect_word("KEY")?;
                    self.skip_paren_group()?;
                    self.expect_word("REFERENCES")?;
                    let _ = self.identifier()?;
                    self.skip_paren_group()?;
                }
                _ => {
                    columns.push(self.column_def()?);
                }
            }
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen)?;
            break;
        }
        Ok(SqlStatement::CreateTable(CreateTableStatement {
            name,
            columns,
            primary_key,
        }))
    }

    fn column_def(&mut self) -> Result<ColumnDef> {
        let name = self.identifier()?;
        let type_instance = self.type_instance()?;
        let mut not_null = false;
        if self.peek_word() == Some("NOT") {
            self.bump();
            self.expect_word("NULL")?;
            not_null = true;
        }
        Ok(ColumnDef {
            name,
            type_instance,
            not_null,
        })
    }

    fn type_instance(&mut self) -> Result<TypeInstance> {
        let base = self.word()?;
        let ty = match base.as_str() {
            "BIT" => {
                let (w,) = self.one_arg()?;
                TypeInstance::Bit { width: w as u8 }
            }
            "TINYINT" => TypeInstance::TinyInt,
            "SMALLINT" => TypeInstance::SmallInt,
            "MEDIUMINT" => TypeInstance::MediumInt,
            "INT" => TypeInstance::Int,
            "BIGINT" => {
                if self.peek_word() == Some("UNSIGNED") {
                    self.bump();
                    TypeInstance::BigIntUnsigned
                } else {
                    TypeInstance::BigInt
                }
            }
            "FLOAT" => TypeInstance::Float,
            "DOUBLE" => TypeInstance::Double,
            "DECIMAL" => {
                let (p, s) = self.two_args()?;
                TypeInstance::Decimal {
                    precision: p as u8,
                    scale: s as u8,
                }
            }
            "CHAR" => {
                let (len,) = self.one_arg()?;
                let collation = self.optional_collation()?;
                TypeInstance::Char {
                    length: len as u16,
                    collation,
                }
            }
            "VARCHAR" => {
                let (len,) = self.one_arg()?;
                let collation = self.optional_collation()?;
                TypeInstance::Varchar {
                    length: len as u16,
                    collation,
                }
            }
            "DATETIME" => TypeInstance::Datetime,
            other => {
                return Err(FuzzerError::new(format!("unsupported column type {other}")));
            }
        };
        Ok(ty)
    }

    fn optional_collation(&mut self) -> Result<String> {
        if self.peek_word() == Some("COLLATE") {
            self.bump();
            let word = match self.bump() {
                Some(Token::Word(w)) => w.to_ascii_lowercase(),
                Some(Token::Ident(w)) => w.clone(),
                _ => return Err(FuzzerError::new("expected collation name")),
            };
            Ok(word)
        } else {
            Ok("utf8mb4_0900_bin".to_owned())
        }
    }

    fn one_arg(&mut self) -> Result<(u64,)> {
        self.expect(&Token::LParen)?;
        let v = self.number_arg()?;
        self.expect(&Token::RParen)?;
        Ok((v,))
    }

    fn two_args(&mut self) -> Result<(u64, u64)> {
        self.expect(&Token::LParen)?;
        let a = self.number_arg()?;
        self.expect(&Token::Comma)?;
        let b = self.number_arg()?;
        self.expect(&Token::RParen)?;
        Ok((a, b))
    }

    fn number_arg(&mut self) -> Result<u64> {
        match self.bump() {
            Some(Token::Number(n)) => n
                .parse()
                .map_err(|_| FuzzerError::new(format!("invalid type argument {n:?}"))),
            _ => Err(FuzzerError::new("expected numeric type argument")),
        }
    }

    fn literal(&mut self) -> Result<Literal> {
        match self.bump() {
            Some(Token::Word(w)) if w == "NULL" => Ok(Literal::Null),
            Some(Token::Number(n)) => Ok(Literal::Number(n.clone())),
            Some(Token::Str(s)) => Ok(Literal::String(s.clone())),
            other => Err(FuzzerError::new(format!("expected literal, got {other:?}"))),
        }
    }

    fn identifier(&mut self) -> Result<String> {
        match self.bump() {
            Some(Token::Ident(name)) => Ok(name.clone()),
            Some(Token::Word(w)) => Ok(w.to_ascii_lowercase()),
            other => Err(FuzzerError::new(format!(
                "expected identifier, got {other:?}"
            ))),
        }
    }

    fn skip_optional_identifier(&mut self) {
        if matches!(self.peek(), Some(Token::Ident(_))) {
            self.pos += 1;
        }
    }

    fn skip_paren_group(&mut self) -> Result<()> {
        self.expect(&Token::LParen)?;
        let mut depth = 1;
        while depth > 0 {
            match self.bump() {
                Some(Token::LParen) => depth += 1,
                Some(Token::RParen) => depth -= 1,
                Some(_) => {}
                None => return Err(FuzzerError::new("unbalanced parentheses")),
            }
        }
        Ok(())
    }

    fn word(&mut self) -> Result<String> {
        match self.bump() {
            Some(Token::Word(w)) => Ok(w.clone()),
            other => Err(FuzzerError::new(format!("expected keyword, got {other:?}"))),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_word(&self) -> Option<&str> {
        match self.peek() {
            Some(Token::Word(w)) => Some(w.as_str()),
            _ => None,
        }
    }

    fn bump(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(FuzzerError::new(format!(
                "expected {token:?}, got {:?}",
                self.peek()
            )))
        }
    }

    fn expect_word(&mut self, word: &str) -> Result<()> {
        if self.peek_word() == Some(word) {
            self.pos += 1;
            Ok(())
        } else {
            Err(FuzzerError::new(format!(
                "expected {word}, got {:?}",
                self.peek()
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
