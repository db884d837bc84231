//! Expression parser for derived-metric formulas.
//!
//! Grammar (standard precedence, left associative):
//!
//! ```text
//! expr    := term (("+" | "-") term)*
//! term    := factor (("*" | "/") factor)*
//! factor  := "-" factor | primary
//! primary := number | ident | ident "(" expr ("," expr)* ")" | "(" expr ")"
//! ```
//!
//! Identifiers name base metric codes or other derived metrics. The only
//! builtin function is `growth(x)` / `growth(x, n)`: percent change of `x`
//! against its value `n` periods earlier within the same symbol.

use std::collections::BTreeSet;

/// Binary arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division (compiled with the non-positive-denominator guard)
    Div,
}

/// Parsed formula expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Ast {
    /// Numeric literal
    Number(f64),
    /// Reference to a base metric code or derived metric
    Ident(String),
    /// Unary negation
    Neg(Box<Ast>),
    /// Binary operation
    Binary {
        /// Operator
        op: BinOp,
        /// Left operand
        lhs: Box<Ast>,
        /// Right operand
        rhs: Box<Ast>,
    },
    /// Builtin function call
    Call {
        /// Function name (`growth`)
        name: String,
        /// Arguments
        args: Vec<Ast>,
    },
}

impl Ast {
    /// Collect every identifier referenced by this expression.
    pub fn references(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Number(_) => {}
            Self::Ident(name) => {
                out.insert(name.clone());
            }
            Self::Neg(inner) => inner.references(out),
            Self::Binary { lhs, rhs, .. } => {
                lhs.references(out);
                rhs.references(out);
            }
            Self::Call { args, .. } => {
                for arg in args {
                    arg.references(out);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '0'..='9' | '.' => {
                let mut buf = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        buf.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value: f64 = buf
                    .parse()
                    .map_err(|_| format!("invalid number literal '{buf}'"))?;
                tokens.push(Token::Number(value));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut buf = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        buf.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(buf));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: &Token, context: &str) -> Result<(), String> {
        match self.advance() {
            Some(ref found) if found == token => Ok(()),
            Some(found) => Err(format!("expected {token:?} {context}, found {found:?}")),
            None => Err(format!("expected {token:?} {context}, found end of input")),
        }
    }

    fn expr(&mut self) -> Result<Ast, String> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.term()?;
            lhs = Ast::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Ast, String> {
        let mut lhs = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.factor()?;
            lhs = Ast::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Ast, String> {
        if self.peek() == Some(&Token::Minus) {
            self.advance();
            return Ok(Ast::Neg(Box::new(self.factor()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Ast, String> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(Ast::Number(value)),
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.advance();
                    let mut args = vec![self.expr()?];
                    while self.peek() == Some(&Token::Comma) {
                        self.advance();
                        args.push(self.expr()?);
                    }
                    self.expect(&Token::RParen, "to close argument list")?;
                    Ok(Ast::Call { name, args })
                } else {
                    Ok(Ast::Ident(name))
                }
            }
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(&Token::RParen, "to close group")?;
                Ok(inner)
            }
            Some(other) => Err(format!("unexpected token {other:?}")),
            None => Err("unexpected end of input".to_string()),
        }
    }
}

/// Parse a formula expression into an [`Ast`].
pub fn parse(input: &str) -> Result<Ast, String> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(format!(
            "trailing input after expression: {:?}",
            parser.tokens[parser.pos]
        ));
    }
    Ok(ast)
}
