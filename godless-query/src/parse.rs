//! Lexer and recursive-descent parser for query source text.
//!
//! Compilation is a pure function of the source: no I/O, no configuration.
//! Errors carry the line and column of the offending token.

use std::collections::BTreeMap;

use crate::error::ParseError;
use crate::{
    JoinSpec, Predicate, PredicateArg, PredicateOp, Query, QueryOp, RowJoin, SelectSpec, Where,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    /// Bare word: keyword, name or integer.
    Word(String),
    /// Quoted string, already unescaped.
    Literal(String),
    /// `@key`
    RowKeyMark,
    LParen,
    RParen,
    Comma,
    Eq,
}

impl TokenKind {
    fn describe(&self) -> String {
        match self {
            TokenKind::Word(w) => format!("'{w}'"),
            TokenKind::Literal(_) => "string literal".to_string(),
            TokenKind::RowKeyMark => "'@key'".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Eq => "'='".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    line: u32,
    column: u32,
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Lexer {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        if byte == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(byte)
    }

    fn error(&self, line: u32, column: u32, message: impl Into<String>) -> ParseError {
        ParseError::new(line, column, message)
    }

    fn is_word_byte(byte: u8) -> bool {
        byte.is_ascii_alphanumeric() || byte == b'_'
    }

    fn lex(mut self) -> Result<(Vec<Token>, (u32, u32)), ParseError> {
        let mut tokens = Vec::new();
        while let Some(byte) = self.peek() {
            let (line, column) = (self.line, self.column);
            match byte {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.bump();
                }
                b'(' => self.punct(&mut tokens, TokenKind::LParen),
                b')' => self.punct(&mut tokens, TokenKind::RParen),
                b',' => self.punct(&mut tokens, TokenKind::Comma),
                b'=' => self.punct(&mut tokens, TokenKind::Eq),
                b'"' => {
                    let literal = self.string(line, column)?;
                    tokens.push(Token {
                        kind: TokenKind::Literal(literal),
                        line,
                        column,
                    });
                }
                b'@' => {
                    self.bump();
                    let word = self.word();
                    if word != "key" {
                        return Err(self.error(line, column, "expected '@key'"));
                    }
                    tokens.push(Token {
                        kind: TokenKind::RowKeyMark,
                        line,
                        column,
                    });
                }
                b if Self::is_word_byte(b) => {
                    let word = self.word();
                    tokens.push(Token {
                        kind: TokenKind::Word(word),
                        line,
                        column,
                    });
                }
                other => {
                    return Err(self.error(
                        line,
                        column,
                        format!("unexpected character {:?}", other as char),
                    ));
                }
            }
        }
        Ok((tokens, (self.line, self.column)))
    }

    fn punct(&mut self, tokens: &mut Vec<Token>, kind: TokenKind) {
        let (line, column) = (self.line, self.column);
        self.bump();
        tokens.push(Token { kind, line, column });
    }

    fn word(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(Self::is_word_byte) {
            self.bump();
        }
        // Word bytes are ASCII, so this slice is valid UTF-8.
        String::from_utf8_lossy(&self.src[start..self.pos]).into_owned()
    }

    fn string(&mut self, line: u32, column: u32) -> Result<String, ParseError> {
        self.bump(); // opening quote
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error(line, column, "unterminated string literal")),
                Some(b'"') => return Ok(out),
                Some(b'\\') => {
                    let (esc_line, esc_column) = (self.line, self.column);
                    match self.bump() {
                        Some(b'"') => out.push('"'),
                        Some(b'\\') => out.push('\\'),
                        Some(b'n') => out.push('\n'),
                        Some(b't') => out.push('\t'),
                        Some(other) => {
                            return Err(self.error(
                                esc_line,
                                esc_column,
                                format!("unknown escape '\\{}'", other as char),
                            ));
                        }
                        None => {
                            return Err(self.error(line, column, "unterminated string literal"));
                        }
                    }
                }
                Some(byte) if byte < 0x80 => out.push(byte as char),
                Some(byte) => {
                    // Reassemble a multi-byte UTF-8 sequence.
                    let mut raw = vec![byte];
                    while self.peek().is_some_and(|b| (0x80..0xc0).contains(&b)) {
                        raw.push(self.bump().expect("peeked"));
                    }
                    match std::str::from_utf8(&raw) {
                        Ok(s) => out.push_str(s),
                        Err(_) => {
                            return Err(self.error(line, column, "invalid utf-8 in literal"));
                        }
                    }
                }
            }
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: (u32, u32),
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error_at(&self, token: Option<&Token>, message: impl Into<String>) -> ParseError {
        match token {
            Some(token) => ParseError::new(token.line, token.column, message),
            None => ParseError::new(self.end.0, self.end.1, message),
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, ParseError> {
        match self.next() {
            Some(token) if token.kind == kind => Ok(token),
            Some(token) => Err(self.error_at(
                Some(&token),
                format!("expected {what}, found {}", token.kind.describe()),
            )),
            None => Err(self.error_at(None, format!("expected {what}, found end of input"))),
        }
    }

    fn expect_word(&mut self, what: &str) -> Result<(String, Token), ParseError> {
        match self.next() {
            Some(token) => match &token.kind {
                TokenKind::Word(word) => Ok((word.clone(), token)),
                kind => Err(self.error_at(
                    Some(&token),
                    format!("expected {what}, found {}", kind.describe()),
                )),
            },
            None => Err(self.error_at(None, format!("expected {what}, found end of input"))),
        }
    }

    /// A point value: bare word or quoted literal.
    fn value(&mut self, what: &str) -> Result<String, ParseError> {
        match self.next() {
            Some(token) => match &token.kind {
                TokenKind::Word(word) => Ok(word.clone()),
                TokenKind::Literal(text) => Ok(text.clone()),
                kind => Err(self.error_at(
                    Some(&token),
                    format!("expected {what}, found {}", kind.describe()),
                )),
            },
            None => Err(self.error_at(None, format!("expected {what}, found end of input"))),
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().map(|t| &t.kind) == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn peek_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token { kind: TokenKind::Word(w), .. }) if w == word)
    }

    fn query(&mut self) -> Result<Query, ParseError> {
        let (word, token) = self.expect_word("'join' or 'select'")?;
        match word.as_str() {
            "join" => self.join_query(),
            "select" => self.select_query(),
            other => Err(self.error_at(
                Some(&token),
                format!("expected 'join' or 'select', found '{other}'"),
            )),
        }
    }

    fn join_query(&mut self) -> Result<Query, ParseError> {
        let (table, _) = self.expect_word("a table name")?;
        let (word, token) = self.expect_word("'rows'")?;
        if word != "rows" {
            return Err(self.error_at(Some(&token), format!("expected 'rows', found '{word}'")));
        }

        let mut rows = vec![self.row()?];
        while self.eat(&TokenKind::Comma) {
            rows.push(self.row()?);
        }

        Ok(Query {
            table: table.into(),
            op: QueryOp::Join(JoinSpec { rows }),
        })
    }

    fn row(&mut self) -> Result<RowJoin, ParseError> {
        self.expect(TokenKind::LParen, "'('")?;
        self.expect(TokenKind::RowKeyMark, "'@key'")?;
        self.expect(TokenKind::Eq, "'='")?;
        let key = self.value("a row key")?;

        let mut entries = BTreeMap::new();
        while self.eat(&TokenKind::Comma) {
            let (entry, _) = self.expect_word("an entry name")?;
            self.expect(TokenKind::Eq, "'='")?;
            let point = self.value("a point")?;
            entries.insert(entry.into(), point.into());
        }
        self.expect(TokenKind::RParen, "')'")?;

        Ok(RowJoin {
            key: key.into(),
            entries,
        })
    }

    fn select_query(&mut self) -> Result<Query, ParseError> {
        let (table, _) = self.expect_word("a table name")?;

        let filter = if self.peek_word("where") {
            self.pos += 1;
            Some(self.where_expr()?)
        } else {
            None
        };

        let limit = if self.peek_word("limit") {
            self.pos += 1;
            let (word, token) = self.expect_word("an integer after 'limit'")?;
            word.parse::<u64>().map_err(|_| {
                self.error_at(Some(&token), format!("expected an integer, found '{word}'"))
            })?
        } else {
            0
        };

        Ok(Query {
            table: table.into(),
            op: QueryOp::Select(SelectSpec { filter, limit }),
        })
    }

    fn where_expr(&mut self) -> Result<Where, ParseError> {
        let (word, token) = self.expect_word("a predicate or connective")?;
        match word.as_str() {
            "and" => Ok(Where::And(self.clauses()?)),
            "or" => Ok(Where::Or(self.clauses()?)),
            "str_eq" => Ok(Where::Predicate(self.predicate(PredicateOp::StrEq)?)),
            "str_neq" => Ok(Where::Predicate(self.predicate(PredicateOp::StrNeq)?)),
            other => Err(self.error_at(
                Some(&token),
                format!("expected 'and', 'or', 'str_eq' or 'str_neq', found '{other}'"),
            )),
        }
    }

    fn clauses(&mut self) -> Result<Vec<Where>, ParseError> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut clauses = vec![self.where_expr()?];
        while self.eat(&TokenKind::Comma) {
            clauses.push(self.where_expr()?);
        }
        self.expect(TokenKind::RParen, "')'")?;
        Ok(clauses)
    }

    fn predicate(&mut self, op: PredicateOp) -> Result<Predicate, ParseError> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut args = vec![self.predicate_arg()?];
        while self.eat(&TokenKind::Comma) {
            args.push(self.predicate_arg()?);
        }
        self.expect(TokenKind::RParen, "')'")?;
        Ok(Predicate { op, args })
    }

    fn predicate_arg(&mut self) -> Result<PredicateArg, ParseError> {
        match self.next() {
            Some(token) => match &token.kind {
                TokenKind::Literal(text) => Ok(PredicateArg::Literal(text.as_str().into())),
                TokenKind::Word(word) => Ok(PredicateArg::Entry(word.as_str().into())),
                TokenKind::RowKeyMark => Ok(PredicateArg::RowKey),
                kind => Err(self.error_at(
                    Some(&token),
                    format!("expected a predicate argument, found {}", kind.describe()),
                )),
            },
            None => Err(self.error_at(None, "expected a predicate argument, found end of input")),
        }
    }
}

impl Query {
    /// Compile query source text. Pure: no I/O, no environment.
    pub fn parse(src: &str) -> Result<Query, ParseError> {
        let (tokens, end) = Lexer::new(src).lex()?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            end,
        };
        let query = parser.query()?;
        if let Some(extra) = parser.peek() {
            return Err(parser.error_at(
                Some(extra),
                format!("unexpected {} after query", extra.kind.describe()),
            ));
        }
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_join() {
        let query = Query::parse(r#"join factory rows (@key=factory1, foreman="Foreman 1")"#)
            .expect("parse");

        assert_eq!(query.table, "factory".into());
        let QueryOp::Join(join) = &query.op else {
            panic!("expected a join")
        };
        assert_eq!(join.rows.len(), 1);
        assert_eq!(join.rows[0].key, "factory1".into());
        assert_eq!(
            join.rows[0].entries.get(&"foreman".into()),
            Some(&"Foreman 1".into())
        );
    }

    #[test]
    fn parses_multiple_rows() {
        let query =
            Query::parse("join t rows (@key=a, x=1), (@key=b), (@key=c, y=2, z=3)").expect("parse");
        let QueryOp::Join(join) = &query.op else {
            panic!("expected a join")
        };
        assert_eq!(join.rows.len(), 3);
        assert!(join.rows[1].entries.is_empty());
        assert_eq!(join.rows[2].entries.len(), 2);
    }

    #[test]
    fn parses_a_select_with_filter_and_limit() {
        let query = Query::parse(
            r#"select factory where and(str_eq(foreman, "Foreman 1"), or(str_neq(@key, "f2"), str_eq(shift, day))) limit 10"#,
        )
        .expect("parse");

        assert_eq!(query.table, "factory".into());
        let QueryOp::Select(select) = &query.op else {
            panic!("expected a select")
        };
        assert_eq!(select.limit, 10);
        let Some(Where::And(clauses)) = &select.filter else {
            panic!("expected an and")
        };
        assert_eq!(clauses.len(), 2);
        assert!(matches!(&clauses[1], Where::Or(inner) if inner.len() == 2));
    }

    #[test]
    fn bare_select_has_no_filter() {
        let query = Query::parse("select factory").expect("parse");
        let QueryOp::Select(select) = &query.op else {
            panic!("expected a select")
        };
        assert_eq!(select.filter, None);
        assert_eq!(select.limit, 0);
    }

    #[test]
    fn string_escapes_unescape() {
        let query = Query::parse(r#"join t rows (@key=k, e="a\"b\\c\nd")"#).expect("parse");
        let QueryOp::Join(join) = &query.op else {
            panic!("expected a join")
        };
        assert_eq!(
            join.rows[0].entries.get(&"e".into()),
            Some(&"a\"b\\c\nd".into())
        );
    }

    #[test]
    fn errors_carry_line_and_column() {
        let err = Query::parse("select factory where\n  str_gt(x, y)").unwrap_err();
        assert_eq!((err.line, err.column), (2, 3));
        assert!(err.message.contains("str_gt"), "{}", err.message);

        let err = Query::parse("join t").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("end of input"), "{}", err.message);
    }

    #[test]
    fn unterminated_literal_is_an_error() {
        let err = Query::parse(r#"select t where str_eq(x, "oops"#).unwrap_err();
        assert!(err.message.contains("unterminated"), "{}", err.message);
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        let err = Query::parse("select t limit 1 limit 2").unwrap_err();
        assert!(err.message.contains("unexpected"), "{}", err.message);
    }

    #[test]
    fn rows_must_start_with_key() {
        let err = Query::parse("join t rows (x=1)").unwrap_err();
        assert!(err.message.contains("@key"), "{}", err.message);
    }
}
