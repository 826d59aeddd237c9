//! Tokenizer for the modeling language.

use super::{ScriptError, ScriptResult};
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    Dot,
    Ellipsis,
    Question,
    QuestionQuestion,
    Arrow,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    StarStarAssign,
    EqEq,
    EqEqEq,
    NotEq,
    NotEqEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
    /// A line break separates this token from the previous one.
    pub newline_before: bool,
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: u32,
    column: u32,
    saw_newline: bool,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            line: 1,
            column: 1,
            saw_newline: false,
        }
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            message: message.into(),
            line: self.line,
            column: self.column,
        }
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
            self.saw_newline = true;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek() == Some(&expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) -> ScriptResult<()> {
        loop {
            match self.chars.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') => {
                    let mut ahead = self.chars.clone();
                    ahead.next();
                    match ahead.peek() {
                        Some('/') => {
                            while let Some(&c) = self.chars.peek() {
                                if c == '\n' {
                                    break;
                                }
                                self.advance();
                            }
                        }
                        Some('*') => {
                            self.advance();
                            self.advance();
                            let mut closed = false;
                            while let Some(c) = self.advance() {
                                if c == '*' && self.eat('/') {
                                    closed = true;
                                    break;
                                }
                            }
                            if !closed {
                                return Err(self.error("unterminated block comment"));
                            }
                        }
                        _ => return Ok(()),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> ScriptResult<Token> {
        self.saw_newline = false;
        self.skip_trivia()?;
        let (line, column, newline_before) = (self.line, self.column, self.saw_newline);
        let kind = self.next_kind()?;
        Ok(Token {
            kind,
            line,
            column,
            newline_before,
        })
    }

    fn next_kind(&mut self) -> ScriptResult<TokenKind> {
        use TokenKind::*;

        let c = match self.chars.peek() {
            None => return Ok(Eof),
            Some(&c) => c,
        };
        if c.is_ascii_digit() {
            return self.read_number();
        }
        if c == '.' {
            let mut ahead = self.chars.clone();
            ahead.next();
            if ahead.peek().is_some_and(|d| d.is_ascii_digit()) {
                return self.read_number();
            }
        }
        if c.is_alphabetic() || c == '_' || c == '$' {
            return Ok(Ident(self.read_identifier()));
        }
        if c == '"' || c == '\'' {
            return self.read_string(c);
        }
        if c == '`' {
            return Err(self.error("template literals are not supported"));
        }

        self.advance();
        let kind = match c {
            '(' => LParen,
            ')' => RParen,
            '{' => LBrace,
            '}' => RBrace,
            '[' => LBracket,
            ']' => RBracket,
            ',' => Comma,
            ';' => Semicolon,
            ':' => Colon,
            '.' => {
                if self.eat('.') {
                    if self.eat('.') {
                        Ellipsis
                    } else {
                        return Err(self.error("unexpected '..'"));
                    }
                } else {
                    Dot
                }
            }
            '?' => {
                if self.eat('?') {
                    QuestionQuestion
                } else {
                    Question
                }
            }
            '+' => {
                if self.eat('+') {
                    PlusPlus
                } else if self.eat('=') {
                    PlusAssign
                } else {
                    Plus
                }
            }
            '-' => {
                if self.eat('-') {
                    MinusMinus
                } else if self.eat('=') {
                    MinusAssign
                } else {
                    Minus
                }
            }
            '*' => {
                if self.eat('*') {
                    if self.eat('=') {
                        StarStarAssign
                    } else {
                        StarStar
                    }
                } else if self.eat('=') {
                    StarAssign
                } else {
                    Star
                }
            }
            '/' => {
                if self.eat('=') {
                    SlashAssign
                } else {
                    Slash
                }
            }
            '%' => {
                if self.eat('=') {
                    PercentAssign
                } else {
                    Percent
                }
            }
            '=' => {
                if self.eat('=') {
                    if self.eat('=') {
                        EqEqEq
                    } else {
                        EqEq
                    }
                } else if self.eat('>') {
                    Arrow
                } else {
                    Assign
                }
            }
            '!' => {
                if self.eat('=') {
                    if self.eat('=') {
                        NotEqEq
                    } else {
                        NotEq
                    }
                } else {
                    Bang
                }
            }
            '<' => {
                if self.eat('=') {
                    Le
                } else {
                    Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    Ge
                } else {
                    Gt
                }
            }
            '&' if self.eat('&') => AndAnd,
            '|' if self.eat('|') => OrOr,
            other => return Err(self.error(format!("unexpected character '{}'", other))),
        };
        Ok(kind)
    }

    fn read_identifier(&mut self) -> String {
        let mut name = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                name.push(c);
                self.advance();
            } else {
                break;
            }
        }
        name
    }

    fn read_number(&mut self) -> ScriptResult<TokenKind> {
        let mut text = String::new();

        if self.chars.peek() == Some(&'0') {
            let mut ahead = self.chars.clone();
            ahead.next();
            if matches!(ahead.peek(), Some('x') | Some('X')) {
                self.advance();
                self.advance();
                while let Some(&c) = self.chars.peek() {
                    if c.is_ascii_hexdigit() {
                        text.push(c);
                        self.advance();
                    } else {
                        break;
                    }
                }
                return u64::from_str_radix(&text, 16)
                    .map(|n| TokenKind::Number(n as f64))
                    .map_err(|_| self.error(format!("invalid hex literal '0x{}'", text)));
            }
        }

        let mut has_dot = false;
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else if c == '.' && !has_dot {
                has_dot = true;
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }

        // Scientific notation (1e10, 1.5e-3)
        if let Some(&c) = self.chars.peek() {
            if c == 'e' || c == 'E' {
                text.push(c);
                self.advance();
                if let Some(&sign) = self.chars.peek() {
                    if sign == '+' || sign == '-' {
                        text.push(sign);
                        self.advance();
                    }
                }
                while let Some(&c) = self.chars.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }

        if self
            .chars
            .peek()
            .is_some_and(|c| c.is_alphabetic() || *c == '_')
        {
            return Err(self.error(format!("identifier starts immediately after number '{}'", text)));
        }

        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| self.error(format!("invalid number '{}'", text)))
    }

    fn read_string(&mut self, quote: char) -> ScriptResult<TokenKind> {
        self.advance();
        let mut value = String::new();
        loop {
            let c = match self.advance() {
                None | Some('\n') => return Err(self.error("unterminated string literal")),
                Some(c) => c,
            };
            if c == quote {
                return Ok(TokenKind::Str(value));
            }
            if c != '\\' {
                value.push(c);
                continue;
            }
            let escaped = self
                .advance()
                .ok_or_else(|| self.error("unterminated string literal"))?;
            match escaped {
                'n' => value.push('\n'),
                't' => value.push('\t'),
                'r' => value.push('\r'),
                '0' => value.push('\0'),
                'u' => {
                    let mut hex = String::new();
                    for _ in 0..4 {
                        match self.advance() {
                            Some(h) if h.is_ascii_hexdigit() => hex.push(h),
                            _ => return Err(self.error("invalid unicode escape")),
                        }
                    }
                    let code = u32::from_str_radix(&hex, 16)
                        .map_err(|_| self.error("invalid unicode escape"))?;
                    value.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
                }
                '\n' => {}
                other => value.push(other),
            }
        }
    }
}

/// Splits source text into tokens, ending with [`TokenKind::Eof`].
pub fn tokenize(input: &str) -> ScriptResult<Vec<Token>> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}
