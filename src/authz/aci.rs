//! ACI parser and formatter.
//!
//! An ACI is a single line:
//!
//! ```text
//! read,modify allow group="Administrators" || user="admin"
//! ```
//!
//! Supported syntax after the rights list and permission keyword:
//! - Comparisons: `attribute op "literal"` with `=`, `==`, `!=`, `<`, `>`, `<=`, `>=`
//! - Boolean operators: `&&`, `||`, `!`
//! - Parentheses for grouping
//! - `\"` and `\\` escapes inside literals

use std::fmt;

use crate::authz::errors::AuthzError;
use crate::authz::types::{is_token_char, AclEntry, Operator, Permission, Rights};

// ─── AST ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// `attribute op "literal"`; the attribute names the evaluator type.
    Compare {
        attribute: String,
        operator: Operator,
        literal: String,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn compare(attribute: &str, operator: Operator, literal: &str) -> Self {
        Expr::Compare {
            attribute: attribute.to_string(),
            operator,
            literal: literal.to_string(),
        }
    }

    /// Every `(attribute, operator)` pair in the tree, left to right.
    pub fn comparisons(&self) -> Vec<(&str, Operator)> {
        let mut out = Vec::new();
        self.collect_comparisons(&mut out);
        out
    }

    fn collect_comparisons<'a>(&'a self, out: &mut Vec<(&'a str, Operator)>) {
        match self {
            Expr::Compare {
                attribute,
                operator,
                ..
            } => out.push((attribute.as_str(), *operator)),
            Expr::And(l, r) | Expr::Or(l, r) => {
                l.collect_comparisons(out);
                r.collect_comparisons(out);
            }
            Expr::Not(inner) => inner.collect_comparisons(out),
        }
    }
}

// ─── Formatter ──────────────────────────────────────────────────────────

fn write_literal(f: &mut fmt::Formatter<'_>, literal: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in literal.chars() {
        if c == '"' || c == '\\' {
            f.write_str("\\")?;
        }
        write!(f, "{c}")?;
    }
    f.write_str("\"")
}

fn write_grouped(f: &mut fmt::Formatter<'_>, expr: &Expr, parens: bool) -> fmt::Result {
    if parens {
        write!(f, "({expr})")
    } else {
        write!(f, "{expr}")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Compare {
                attribute,
                operator,
                literal,
            } => {
                write!(f, "{attribute}{operator}")?;
                write_literal(f, literal)
            }
            // `&&` binds tighter than `||`; both associate to the left.
            Expr::And(l, r) => {
                write_grouped(f, l, matches!(**l, Expr::Or(..)))?;
                f.write_str(" && ")?;
                write_grouped(f, r, matches!(**r, Expr::Or(..) | Expr::And(..)))
            }
            Expr::Or(l, r) => {
                write_grouped(f, l, false)?;
                f.write_str(" || ")?;
                write_grouped(f, r, matches!(**r, Expr::Or(..)))
            }
            Expr::Not(inner) => {
                f.write_str("!")?;
                write_grouped(f, inner, !matches!(**inner, Expr::Compare { .. }))
            }
        }
    }
}

/// Joins entries into the semicolon separated form used by updates and the
/// configuration store.
pub fn join_aci_list(entries: &[AclEntry]) -> String {
    entries
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(";")
}

/// Splits a semicolon separated ACI list. Semicolons inside quoted literals
/// do not split; blank items are dropped.
pub fn split_aci_list(list: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in list.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            ';' if !in_string => {
                items.push(&list[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&list[start..]);

    items
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

// ─── Tokenizer ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Comma,
    LParen,
    RParen,
    Op(Operator),
    And, // &&
    Or,  // ||
    Not, // !
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, AuthzError> {
    let mut tokens = Vec::new();
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let next_is = |i: usize, want: char| chars.get(i + 1).map(|(_, c)| *c) == Some(want);
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            ',' => {
                tokens.push((Token::Comma, pos));
                i += 1;
            }
            '(' => {
                tokens.push((Token::LParen, pos));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, pos));
                i += 1;
            }
            '=' if next_is(i, '=') => {
                tokens.push((Token::Op(Operator::Eq), pos));
                i += 2;
            }
            '=' => {
                tokens.push((Token::Op(Operator::Eq), pos));
                i += 1;
            }
            '!' if next_is(i, '=') => {
                tokens.push((Token::Op(Operator::Ne), pos));
                i += 2;
            }
            '!' => {
                tokens.push((Token::Not, pos));
                i += 1;
            }
            '<' if next_is(i, '=') => {
                tokens.push((Token::Op(Operator::Le), pos));
                i += 2;
            }
            '<' => {
                tokens.push((Token::Op(Operator::Lt), pos));
                i += 1;
            }
            '>' if next_is(i, '=') => {
                tokens.push((Token::Op(Operator::Ge), pos));
                i += 2;
            }
            '>' => {
                tokens.push((Token::Op(Operator::Gt), pos));
                i += 1;
            }
            '&' if next_is(i, '&') => {
                tokens.push((Token::And, pos));
                i += 2;
            }
            '|' if next_is(i, '|') => {
                tokens.push((Token::Or, pos));
                i += 2;
            }
            '"' => {
                i += 1;
                let mut literal = String::new();
                let mut closed = false;
                while i < chars.len() {
                    match chars[i].1 {
                        '\\' if i + 1 < chars.len() => {
                            literal.push(chars[i + 1].1);
                            i += 2;
                        }
                        '"' => {
                            closed = true;
                            i += 1;
                            break;
                        }
                        other => {
                            literal.push(other);
                            i += 1;
                        }
                    }
                }
                if !closed {
                    return Err(invalid(input, pos, "unterminated string literal"));
                }
                tokens.push((Token::Str(literal), pos));
            }
            c if is_token_char(c) => {
                let mut word = String::new();
                while i < chars.len() && is_token_char(chars[i].1) {
                    word.push(chars[i].1);
                    i += 1;
                }
                tokens.push((Token::Ident(word), pos));
            }
            c => {
                return Err(invalid(input, pos, &format!("unexpected character `{c}`")));
            }
        }
    }
    Ok(tokens)
}

fn invalid(input: &str, position: usize, message: &str) -> AuthzError {
    AuthzError::InvalidAci {
        input: input.to_string(),
        position,
        message: message.to_string(),
    }
}

// ─── Parser ─────────────────────────────────────────────────────────────

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, tokens: Vec<(Token, usize)>) -> Self {
        Self {
            input,
            tokens,
            pos: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    /// Byte offset of the current token, or end of input.
    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, p)| *p)
            .unwrap_or(self.input.len())
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        tok
    }

    fn error(&self, message: &str) -> AuthzError {
        invalid(self.input, self.offset(), message)
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, AuthzError> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(&format!("expected {what}"))),
        }
    }

    /// rights = IDENT ("," IDENT)*
    fn parse_rights(&mut self) -> Result<Rights, AuthzError> {
        let start = self.offset();
        let mut names = vec![self.expect_ident("right")?];
        while self.peek() == Some(&Token::Comma) {
            self.advance();
            names.push(self.expect_ident("right after `,`")?);
        }
        Rights::from_tokens(&names).map_err(|_| invalid(self.input, start, "invalid rights list"))
    }

    /// permission = "allow" | "deny"
    fn parse_permission(&mut self) -> Result<Permission, AuthzError> {
        let permission = match self.peek() {
            Some(Token::Ident(word)) if word == "allow" => Permission::Allow,
            Some(Token::Ident(word)) if word == "deny" => Permission::Deny,
            _ => return Err(self.error("expected `allow` or `deny`")),
        };
        self.advance();
        Ok(permission)
    }

    /// expr = and ("||" and)*
    fn parse_or(&mut self) -> Result<Expr, AuthzError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    /// and = unary ("&&" unary)*
    fn parse_and(&mut self) -> Result<Expr, AuthzError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    /// unary = "!" unary | primary
    fn parse_unary(&mut self) -> Result<Expr, AuthzError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    /// primary = "(" expr ")" | IDENT op STRING
    fn parse_primary(&mut self) -> Result<Expr, AuthzError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.advance();
                let expr = self.parse_or()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(self.error("expected closing parenthesis `)`"));
                }
                self.advance();
                Ok(expr)
            }
            Some(Token::Ident(_)) => {
                let attribute = self.expect_ident("attribute")?;
                let operator = match self.peek() {
                    Some(Token::Op(op)) => *op,
                    _ => {
                        return Err(
                            self.error(&format!("expected operator after `{attribute}`"))
                        )
                    }
                };
                self.advance();
                let literal = match self.peek().cloned() {
                    Some(Token::Str(s)) => {
                        self.advance();
                        s
                    }
                    _ => return Err(self.error("expected quoted literal")),
                };
                Ok(Expr::Compare {
                    attribute,
                    operator,
                    literal,
                })
            }
            None => Err(self.error("unexpected end of input")),
            Some(other) => Err(self.error(&format!("unexpected token {other:?}"))),
        }
    }
}

/// Parse one ACI string into an entry.
pub fn parse_aci(input: &str) -> Result<AclEntry, AuthzError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(invalid(input, 0, "empty ACI"));
    }
    let mut parser = Parser::new(input, tokens);
    let rights = parser.parse_rights()?;
    let permission = parser.parse_permission()?;
    let expression = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(AclEntry {
        permission,
        rights,
        expression,
    })
}

/// Parse a semicolon separated ACI list. The first bad item fails the batch.
pub fn parse_aci_list(list: &str) -> Result<Vec<AclEntry>, AuthzError> {
    split_aci_list(list).into_iter().map(parse_aci).collect()
}
