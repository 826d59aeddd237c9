//! Recursive-descent parser for the modeling language.
//!
//! Supports declarations with destructuring, function declarations and
//! arrow functions, `if`/`for`/`for…of`/`while`, and the usual JavaScript
//! expression precedence ladder. Nesting depth is bounded so hostile input
//! cannot exhaust the parser's stack.

use super::ast::*;
use super::lexer::{tokenize, Token, TokenKind};
use super::{ScriptError, ScriptResult};
use std::rc::Rc;

/// Deepest statement/expression nesting accepted.
pub const MAX_NESTING: usize = 128;

const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "new", "class", "switch", "case", "default", "try", "catch", "finally", "do", "import",
    "export", "async", "await", "yield", "delete", "instanceof", "in", "this", "with",
];

const RESERVED: &[&str] = &[
    "const", "let", "var", "function", "return", "if", "else", "for", "while", "break",
    "continue", "throw", "typeof", "true", "false", "null", "undefined",
];

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn current(&self) -> &Token {
        // tokenize always ends with Eof, and the parser never moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn peek_kind(&self, offset: usize) -> &TokenKind {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn error_at(&self, token: &Token, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            message: message.into(),
            line: token.line,
            column: token.column,
        }
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        self.error_at(self.current(), message)
    }

    fn unexpected(&self) -> ScriptError {
        match self.kind() {
            TokenKind::Eof => self.error("unexpected end of input"),
            other => self.error(format!("unexpected token {}", describe(other))),
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> ScriptResult<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error(format!(
                "expected {} but found {}",
                describe(kind),
                describe(self.kind())
            )))
        }
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.kind(), TokenKind::Ident(name) if name == word)
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.is_keyword(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn enter(&mut self) -> ScriptResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error(format!("nesting deeper than {} levels", MAX_NESTING)));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Statement terminator with automatic semicolon insertion at line
    /// breaks, before `}` and at end of input.
    fn consume_semicolon(&mut self) -> ScriptResult<()> {
        if self.eat(&TokenKind::Semicolon) {
            return Ok(());
        }
        let token = self.current();
        if token.newline_before || matches!(token.kind, TokenKind::RBrace | TokenKind::Eof) {
            return Ok(());
        }
        Err(self.error(format!("expected ';' but found {}", describe(&token.kind))))
    }

    fn binding_name(&mut self) -> ScriptResult<Rc<str>> {
        match self.kind().clone() {
            TokenKind::Ident(name) => {
                if RESERVED.contains(&name.as_str()) || UNSUPPORTED_KEYWORDS.contains(&name.as_str()) {
                    return Err(self.error(format!("'{}' cannot be used as a name", name)));
                }
                self.advance();
                Ok(Rc::from(name.as_str()))
            }
            _ => Err(self.error(format!("expected a name but found {}", describe(self.kind())))),
        }
    }

    /// Property names may be any identifier, including keywords.
    fn property_name(&mut self) -> ScriptResult<Rc<str>> {
        match self.kind().clone() {
            TokenKind::Ident(name) | TokenKind::Str(name) => {
                self.advance();
                Ok(Rc::from(name.as_str()))
            }
            TokenKind::Number(n) => {
                self.advance();
                Ok(Rc::from(super::value::format_number(n).as_str()))
            }
            _ => Err(self.error(format!(
                "expected a property name but found {}",
                describe(self.kind())
            ))),
        }
    }

    // === Statements ===

    fn parse_program(&mut self) -> ScriptResult<Program> {
        let mut body = Vec::new();
        while !self.check(&TokenKind::Eof) {
            body.push(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    fn parse_statement(&mut self) -> ScriptResult<Stmt> {
        self.enter()?;
        let line = self.current().line;
        let kind = self.parse_statement_kind()?;
        self.leave();
        Ok(Stmt { kind, line })
    }

    fn parse_statement_kind(&mut self) -> ScriptResult<StmtKind> {
        if self.check(&TokenKind::LBrace) {
            return Ok(StmtKind::Block(self.parse_block()?));
        }
        if self.eat(&TokenKind::Semicolon) {
            return Ok(StmtKind::Empty);
        }

        let word = match self.kind() {
            TokenKind::Ident(word) => word.clone(),
            _ => return self.parse_expression_statement(),
        };
        match word.as_str() {
            "const" | "let" | "var" => {
                let kind = self.parse_decl_kind()?;
                let declarators = self.parse_declarators(kind)?;
                self.consume_semicolon()?;
                Ok(StmtKind::Decl(kind, declarators))
            }
            "function" => {
                self.advance();
                let def = self.parse_function_rest(true)?;
                Ok(StmtKind::Function(def))
            }
            "return" => {
                self.advance();
                let token = self.current();
                let bare = token.newline_before
                    || matches!(
                        token.kind,
                        TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
                    );
                let value = if bare { None } else { Some(self.parse_expression()?) };
                self.consume_semicolon()?;
                Ok(StmtKind::Return(value))
            }
            "if" => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let test = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                let consequent = Box::new(self.parse_statement()?);
                let alternate = if self.eat_keyword("else") {
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                Ok(StmtKind::If {
                    test,
                    consequent,
                    alternate,
                })
            }
            "for" => self.parse_for(),
            "while" => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let test = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                let body = Box::new(self.parse_statement()?);
                Ok(StmtKind::While { test, body })
            }
            "break" => {
                self.advance();
                self.consume_semicolon()?;
                Ok(StmtKind::Break)
            }
            "continue" => {
                self.advance();
                self.consume_semicolon()?;
                Ok(StmtKind::Continue)
            }
            "throw" => {
                self.advance();
                let value = self.parse_expression()?;
                self.consume_semicolon()?;
                Ok(StmtKind::Throw(value))
            }
            w if UNSUPPORTED_KEYWORDS.contains(&w) => {
                Err(self.error(format!("'{}' is not supported", w)))
            }
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_expression_statement(&mut self) -> ScriptResult<StmtKind> {
        let expr = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(StmtKind::Expr(expr))
    }

    fn parse_block(&mut self) -> ScriptResult<Vec<Stmt>> {
        self.expect(&TokenKind::LBrace)?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::Eof) {
                return Err(self.error("expected '}' before end of input"));
            }
            body.push(self.parse_statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn parse_decl_kind(&mut self) -> ScriptResult<DeclKind> {
        let kind = match self.kind() {
            TokenKind::Ident(w) if w == "const" => DeclKind::Const,
            TokenKind::Ident(w) if w == "let" => DeclKind::Let,
            TokenKind::Ident(w) if w == "var" => DeclKind::Var,
            _ => return Err(self.unexpected()),
        };
        self.advance();
        Ok(kind)
    }

    fn parse_declarators(&mut self, kind: DeclKind) -> ScriptResult<Vec<Declarator>> {
        let mut declarators = Vec::new();
        loop {
            let start = self.current().clone();
            let pattern = self.parse_pattern()?;
            let init = if self.eat(&TokenKind::Assign) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            if kind == DeclKind::Const && init.is_none() {
                return Err(self.error_at(&start, "missing initializer in const declaration"));
            }
            if init.is_none() && !matches!(pattern, Pattern::Ident(_)) {
                return Err(self.error_at(&start, "destructuring declaration needs an initializer"));
            }
            declarators.push(Declarator { pattern, init });
            if !self.eat(&TokenKind::Comma) {
                return Ok(declarators);
            }
        }
    }

    fn parse_for(&mut self) -> ScriptResult<StmtKind> {
        self.advance();
        self.expect(&TokenKind::LParen)?;

        let mut init = None;
        if self.is_keyword("const") || self.is_keyword("let") || self.is_keyword("var") {
            let kind = self.parse_decl_kind()?;
            let pattern = self.parse_pattern()?;
            if self.eat_keyword("of") {
                let iterable = self.parse_assignment()?;
                self.expect(&TokenKind::RParen)?;
                let body = Box::new(self.parse_statement()?);
                return Ok(StmtKind::ForOf {
                    kind,
                    pattern,
                    iterable,
                    body,
                });
            }
            let first_init = if self.eat(&TokenKind::Assign) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            let mut declarators = vec![Declarator {
                pattern,
                init: first_init,
            }];
            if self.eat(&TokenKind::Comma) {
                declarators.extend(self.parse_declarators(kind)?);
            }
            init = Some(ForInit::Decl(kind, declarators));
        } else if !self.check(&TokenKind::Semicolon) {
            init = Some(ForInit::Expr(self.parse_expression()?));
        }
        self.expect(&TokenKind::Semicolon)?;

        let test = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&TokenKind::Semicolon)?;

        let update = if self.check(&TokenKind::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&TokenKind::RParen)?;

        let body = Box::new(self.parse_statement()?);
        Ok(StmtKind::For {
            init,
            test,
            update,
            body,
        })
    }

    // === Patterns ===

    fn parse_pattern(&mut self) -> ScriptResult<Pattern> {
        self.enter()?;
        let pattern = match self.kind() {
            TokenKind::LBrace => self.parse_object_pattern(),
            TokenKind::LBracket => self.parse_array_pattern(),
            _ => self.binding_name().map(Pattern::Ident),
        };
        self.leave();
        pattern
    }

    fn parse_object_pattern(&mut self) -> ScriptResult<Pattern> {
        self.expect(&TokenKind::LBrace)?;
        let mut properties = Vec::new();
        let mut rest = None;
        while !self.check(&TokenKind::RBrace) {
            if self.eat(&TokenKind::Ellipsis) {
                rest = Some(self.binding_name()?);
                break;
            }
            let key_token = self.current().clone();
            let key = self.property_name()?;
            let value = if self.eat(&TokenKind::Colon) {
                self.parse_pattern()?
            } else {
                if RESERVED.contains(&&*key) {
                    return Err(self.error_at(&key_token, format!("'{}' cannot be used as a name", key)));
                }
                Pattern::Ident(key.clone())
            };
            let default = if self.eat(&TokenKind::Assign) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            properties.push(PatternProperty {
                key,
                value,
                default,
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(Pattern::Object { properties, rest })
    }

    fn parse_array_pattern(&mut self) -> ScriptResult<Pattern> {
        self.expect(&TokenKind::LBracket)?;
        let mut elements = Vec::new();
        let mut rest = None;
        while !self.check(&TokenKind::RBracket) {
            if self.eat(&TokenKind::Comma) {
                elements.push(None);
                continue;
            }
            if self.eat(&TokenKind::Ellipsis) {
                rest = Some(Box::new(self.parse_pattern()?));
                break;
            }
            let pattern = self.parse_pattern()?;
            let default = if self.eat(&TokenKind::Assign) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            elements.push(Some(PatternElement { pattern, default }));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBracket)?;
        Ok(Pattern::Array { elements, rest })
    }

    // === Functions ===

    /// Parameter list after the opening parenthesis, through `)`.
    fn parse_params(&mut self) -> ScriptResult<(Vec<Param>, Option<Pattern>)> {
        let mut params = Vec::new();
        let mut rest = None;
        while !self.check(&TokenKind::RParen) {
            if self.eat(&TokenKind::Ellipsis) {
                rest = Some(self.parse_pattern()?);
                break;
            }
            let pattern = self.parse_pattern()?;
            let default = if self.eat(&TokenKind::Assign) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            params.push(Param { pattern, default });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok((params, rest))
    }

    /// After the `function` keyword.
    fn parse_function_rest(&mut self, require_name: bool) -> ScriptResult<Rc<FunctionDef>> {
        let line = self.current().line;
        let name = if matches!(self.kind(), TokenKind::Ident(_)) {
            Some(self.binding_name()?)
        } else if require_name {
            return Err(self.error("function declaration needs a name"));
        } else {
            None
        };
        self.expect(&TokenKind::LParen)?;
        let (params, rest) = self.parse_params()?;
        self.enter()?;
        let body = FunctionBody::Block(self.parse_block()?);
        self.leave();
        Ok(Rc::new(FunctionDef {
            name,
            params,
            rest,
            body,
            line,
        }))
    }

    fn arrow_ahead(&self) -> bool {
        match self.kind() {
            TokenKind::Ident(_) => self.peek_kind(1) == &TokenKind::Arrow,
            TokenKind::LParen => {
                let mut depth = 0usize;
                let mut idx = self.pos;
                while idx < self.tokens.len() {
                    match self.tokens[idx].kind {
                        TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => depth += 1,
                        TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                            depth = depth.saturating_sub(1);
                            if depth == 0 {
                                return self
                                    .tokens
                                    .get(idx + 1)
                                    .is_some_and(|t| t.kind == TokenKind::Arrow);
                            }
                        }
                        TokenKind::Eof => return false,
                        _ => {}
                    }
                    idx += 1;
                }
                false
            }
            _ => false,
        }
    }

    fn parse_arrow(&mut self) -> ScriptResult<Expr> {
        let line = self.current().line;
        let (params, rest) = if self.eat(&TokenKind::LParen) {
            self.parse_params()?
        } else {
            let name = self.binding_name()?;
            (
                vec![Param {
                    pattern: Pattern::Ident(name),
                    default: None,
                }],
                None,
            )
        };
        self.expect(&TokenKind::Arrow)?;
        self.enter()?;
        let body = if self.check(&TokenKind::LBrace) {
            FunctionBody::Block(self.parse_block()?)
        } else {
            FunctionBody::Expr(self.parse_assignment()?)
        };
        self.leave();
        Ok(Expr::Function(Rc::new(FunctionDef {
            name: None,
            params,
            rest,
            body,
            line,
        })))
    }

    // === Expressions ===

    fn parse_expression(&mut self) -> ScriptResult<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> ScriptResult<Expr> {
        self.enter()?;
        let result = self.parse_assignment_inner();
        self.leave();
        result
    }

    fn parse_assignment_inner(&mut self) -> ScriptResult<Expr> {
        if self.arrow_ahead() {
            return self.parse_arrow();
        }
        let start = self.current().clone();
        let target = self.parse_conditional()?;
        let op = match self.kind() {
            TokenKind::Assign => None,
            TokenKind::PlusAssign => Some(BinaryOperator::Add),
            TokenKind::MinusAssign => Some(BinaryOperator::Sub),
            TokenKind::StarAssign => Some(BinaryOperator::Mul),
            TokenKind::SlashAssign => Some(BinaryOperator::Div),
            TokenKind::PercentAssign => Some(BinaryOperator::Rem),
            TokenKind::StarStarAssign => Some(BinaryOperator::Pow),
            _ => return Ok(target),
        };
        if !is_assignable(&target) {
            return Err(self.error_at(&start, "invalid assignment target"));
        }
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expr::Assign {
            target: Box::new(target),
            op,
            value: Box::new(value),
        })
    }

    fn parse_conditional(&mut self) -> ScriptResult<Expr> {
        let test = self.parse_or()?;
        if !self.eat(&TokenKind::Question) {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.expect(&TokenKind::Colon)?;
        let alternate = self.parse_assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    // Or: and (('||' | '??') and)*
    fn parse_or(&mut self) -> ScriptResult<Expr> {
        let mut left = self.parse_and()?;
        loop {
            let op = match self.kind() {
                TokenKind::OrOr => LogicalOperator::Or,
                TokenKind::QuestionQuestion => LogicalOperator::Nullish,
                _ => break,
            };
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Logical {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ScriptResult<Expr> {
        let mut left = self.parse_equality()?;
        while self.eat(&TokenKind::AndAnd) {
            let right = self.parse_equality()?;
            left = Expr::Logical {
                op: LogicalOperator::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_binary_level(
        &mut self,
        next: fn(&mut Self) -> ScriptResult<Expr>,
        ops: fn(&TokenKind) -> Option<BinaryOperator>,
    ) -> ScriptResult<Expr> {
        let mut left = next(self)?;
        while let Some(op) = ops(self.kind()) {
            self.advance();
            let right = next(self)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> ScriptResult<Expr> {
        self.parse_binary_level(Self::parse_relational, |k| match k {
            TokenKind::EqEq => Some(BinaryOperator::LooseEq),
            TokenKind::NotEq => Some(BinaryOperator::LooseNe),
            TokenKind::EqEqEq => Some(BinaryOperator::StrictEq),
            TokenKind::NotEqEq => Some(BinaryOperator::StrictNe),
            _ => None,
        })
    }

    fn parse_relational(&mut self) -> ScriptResult<Expr> {
        self.parse_binary_level(Self::parse_additive, |k| match k {
            TokenKind::Lt => Some(BinaryOperator::Lt),
            TokenKind::Le => Some(BinaryOperator::Le),
            TokenKind::Gt => Some(BinaryOperator::Gt),
            TokenKind::Ge => Some(BinaryOperator::Ge),
            _ => None,
        })
    }

    fn parse_additive(&mut self) -> ScriptResult<Expr> {
        self.parse_binary_level(Self::parse_multiplicative, |k| match k {
            TokenKind::Plus => Some(BinaryOperator::Add),
            TokenKind::Minus => Some(BinaryOperator::Sub),
            _ => None,
        })
    }

    fn parse_multiplicative(&mut self) -> ScriptResult<Expr> {
        self.parse_binary_level(Self::parse_power, |k| match k {
            TokenKind::Star => Some(BinaryOperator::Mul),
            TokenKind::Slash => Some(BinaryOperator::Div),
            TokenKind::Percent => Some(BinaryOperator::Rem),
            _ => None,
        })
    }

    // Power: unary ('**' power)?  (right associative)
    fn parse_power(&mut self) -> ScriptResult<Expr> {
        let base = self.parse_unary()?;
        if self.eat(&TokenKind::StarStar) {
            self.enter()?;
            let exponent = self.parse_power()?;
            self.leave();
            return Ok(Expr::Binary {
                op: BinaryOperator::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> ScriptResult<Expr> {
        let op = match self.kind() {
            TokenKind::Bang => Some(UnaryOperator::Not),
            TokenKind::Minus => Some(UnaryOperator::Neg),
            TokenKind::Plus => Some(UnaryOperator::Plus),
            TokenKind::Ident(w) if w == "typeof" => Some(UnaryOperator::TypeOf),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            self.enter()?;
            let operand = self.parse_unary()?;
            self.leave();
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }

        let update = match self.kind() {
            TokenKind::PlusPlus => Some(UpdateOperator::Increment),
            TokenKind::MinusMinus => Some(UpdateOperator::Decrement),
            _ => None,
        };
        if let Some(op) = update {
            let start = self.advance();
            let target = self.parse_unary()?;
            if !is_assignable(&target) {
                return Err(self.error_at(&start, "invalid increment/decrement target"));
            }
            return Ok(Expr::Update {
                op,
                prefix: true,
                target: Box::new(target),
            });
        }

        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> ScriptResult<Expr> {
        let start = self.current().clone();
        let expr = self.parse_call_member()?;
        let op = match self.kind() {
            TokenKind::PlusPlus => UpdateOperator::Increment,
            TokenKind::MinusMinus => UpdateOperator::Decrement,
            _ => return Ok(expr),
        };
        if self.current().newline_before {
            return Ok(expr);
        }
        if !is_assignable(&expr) {
            return Err(self.error_at(&start, "invalid increment/decrement target"));
        }
        self.advance();
        Ok(Expr::Update {
            op,
            prefix: false,
            target: Box::new(expr),
        })
    }

    fn parse_call_member(&mut self) -> ScriptResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.kind() {
                TokenKind::Dot => {
                    self.advance();
                    let property = match self.kind().clone() {
                        TokenKind::Ident(name) => {
                            self.advance();
                            Rc::from(name.as_str())
                        }
                        _ => return Err(self.error("expected property name after '.'")),
                    };
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(&TokenKind::RBracket)?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                TokenKind::LParen => {
                    self.advance();
                    let args = self.parse_elements(&TokenKind::RParen)?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Comma-separated elements with optional spread, through `close`.
    fn parse_elements(&mut self, close: &TokenKind) -> ScriptResult<Vec<Element>> {
        let mut elements = Vec::new();
        while !self.check(close) {
            if self.eat(&TokenKind::Ellipsis) {
                elements.push(Element::Spread(self.parse_assignment()?));
            } else {
                elements.push(Element::Expr(self.parse_assignment()?));
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(close)?;
        Ok(elements)
    }

    fn parse_object_literal(&mut self) -> ScriptResult<Expr> {
        self.expect(&TokenKind::LBrace)?;
        let mut entries = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.eat(&TokenKind::Ellipsis) {
                entries.push(ObjectEntry::Spread(self.parse_assignment()?));
            } else if self.eat(&TokenKind::LBracket) {
                let key = self.parse_assignment()?;
                self.expect(&TokenKind::RBracket)?;
                self.expect(&TokenKind::Colon)?;
                let value = self.parse_assignment()?;
                entries.push(ObjectEntry::Property {
                    key: PropertyKey::Computed(key),
                    value,
                });
            } else {
                let key_token = self.current().clone();
                let key = self.property_name()?;
                let value = if self.eat(&TokenKind::Colon) {
                    self.parse_assignment()?
                } else if self.check(&TokenKind::LParen) {
                    // Method shorthand.
                    self.advance();
                    let (params, rest) = self.parse_params()?;
                    self.enter()?;
                    let body = FunctionBody::Block(self.parse_block()?);
                    self.leave();
                    Expr::Function(Rc::new(FunctionDef {
                        name: Some(key.clone()),
                        params,
                        rest,
                        body,
                        line: key_token.line,
                    }))
                } else {
                    if !matches!(key_token.kind, TokenKind::Ident(_)) || RESERVED.contains(&&*key) {
                        return Err(self.error_at(&key_token, "expected ':' after property name"));
                    }
                    Expr::Ident(key.clone())
                };
                entries.push(ObjectEntry::Property {
                    key: PropertyKey::Named(key),
                    value,
                });
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(Expr::Object(entries))
    }

    fn parse_primary(&mut self) -> ScriptResult<Expr> {
        match self.kind().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(Rc::from(s.as_str())))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                self.enter()?;
                let elements = self.parse_elements(&TokenKind::RBracket)?;
                self.leave();
                Ok(Expr::Array(elements))
            }
            TokenKind::LBrace => {
                self.enter()?;
                let object = self.parse_object_literal()?;
                self.leave();
                Ok(object)
            }
            TokenKind::Ident(word) => match word.as_str() {
                "true" => {
                    self.advance();
                    Ok(Expr::Bool(true))
                }
                "false" => {
                    self.advance();
                    Ok(Expr::Bool(false))
                }
                "null" => {
                    self.advance();
                    Ok(Expr::Null)
                }
                "undefined" => {
                    self.advance();
                    Ok(Expr::Undefined)
                }
                "function" => {
                    self.advance();
                    Ok(Expr::Function(self.parse_function_rest(false)?))
                }
                w if UNSUPPORTED_KEYWORDS.contains(&w) => {
                    Err(self.error(format!("'{}' is not supported", w)))
                }
                w if RESERVED.contains(&w) => Err(self.unexpected()),
                _ => {
                    self.advance();
                    Ok(Expr::Ident(Rc::from(word.as_str())))
                }
            },
            _ => Err(self.unexpected()),
        }
    }
}

fn is_assignable(expr: &Expr) -> bool {
    matches!(expr, Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. })
}

fn describe(kind: &TokenKind) -> String {
    use TokenKind::*;
    match kind {
        Number(n) => format!("number {}", n),
        Str(_) => "string".to_string(),
        Ident(name) => format!("'{}'", name),
        Eof => "end of input".to_string(),
        other => {
            let text = match other {
                LParen => "(",
                RParen => ")",
                LBrace => "{",
                RBrace => "}",
                LBracket => "[",
                RBracket => "]",
                Comma => ",",
                Semicolon => ";",
                Colon => ":",
                Dot => ".",
                Ellipsis => "...",
                Question => "?",
                QuestionQuestion => "??",
                Arrow => "=>",
                Plus => "+",
                Minus => "-",
                Star => "*",
                StarStar => "**",
                Slash => "/",
                Percent => "%",
                PlusPlus => "++",
                MinusMinus => "--",
                Assign => "=",
                PlusAssign => "+=",
                MinusAssign => "-=",
                StarAssign => "*=",
                SlashAssign => "/=",
                PercentAssign => "%=",
                StarStarAssign => "**=",
                EqEq => "==",
                EqEqEq => "===",
                NotEq => "!=",
                NotEqEq => "!==",
                Lt => "<",
                Le => "<=",
                Gt => ">",
                Ge => ">=",
                AndAnd => "&&",
                OrOr => "||",
                Bang => "!",
                Number(_) | Str(_) | Ident(_) | Eof => "",
            };
            format!("'{}'", text)
        }
    }
}

/// Parse a whole program.
pub fn parse_program(source: &str) -> ScriptResult<Program> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Program {
        parse_program(src).unwrap_or_else(|e| panic!("{}: {}", src, e))
    }

    #[test]
    fn test_function_declaration_and_return() {
        let program = parse("function main() { return 1 + 2 * 3; }");
        assert_eq!(program.body.len(), 1);
        let StmtKind::Function(def) = &program.body[0].kind else {
            panic!("expected function");
        };
        assert_eq!(def.name.as_deref(), Some("main"));
        let FunctionBody::Block(body) = &def.body else {
            panic!("expected block body");
        };
        assert_eq!(
            body[0].kind,
            StmtKind::Return(Some(Expr::Binary {
                op: BinaryOperator::Add,
                left: Box::new(Expr::Number(1.0)),
                right: Box::new(Expr::Binary {
                    op: BinaryOperator::Mul,
                    left: Box::new(Expr::Number(2.0)),
                    right: Box::new(Expr::Number(3.0)),
                }),
            }))
        );
    }

    #[test]
    fn test_power_is_right_associative() {
        let program = parse("x = 2 ** 3 ** 2;");
        let StmtKind::Expr(Expr::Assign { value, .. }) = &program.body[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(
            value.as_ref(),
            Expr::Binary { op: BinaryOperator::Pow, right, .. }
                if matches!(right.as_ref(), Expr::Binary { op: BinaryOperator::Pow, .. })
        ));
    }

    #[test]
    fn test_arrow_functions() {
        parse("const f = x => x * 2;");
        parse("const g = (a, b = 2, ...rest) => { return a + b; };");
        parse("const h = ({ size, center = [0, 0, 0] }) => ({ size, center });");
        parse("const k = () => [1, 2];");
    }

    #[test]
    fn test_destructuring_declarations() {
        parse("const { cuboid, sphere: ball } = primitives;");
        parse("const [a, , b = 3, ...others] = list;");
        parse("let { translate, rotate } = require('@jscad/modeling').transforms;");
    }

    #[test]
    fn test_loops() {
        parse("for (let i = 0, j = 10; i < j; i++) { total += i; }");
        parse("for (const [x, y] of points) add(x, y);");
        parse("while (n > 0) { n--; if (n == 3) break; else continue; }");
    }

    #[test]
    fn test_semicolons_are_optional_at_line_breaks() {
        let program = parse("const a = 1\nconst b = a + 1\nfunction main() { return b }");
        assert_eq!(program.body.len(), 3);
    }

    #[test]
    fn test_missing_semicolon_on_same_line_is_an_error() {
        assert!(parse_program("const a = 1 const b = 2").is_err());
    }

    #[test]
    fn test_syntax_error_position() {
        let err = parse_program("function main() {\n  return cube(;\n}").unwrap_err();
        assert_eq!(
            err,
            ScriptError::Syntax {
                message: "unexpected token ';'".into(),
                line: 2,
                column: 15,
            }
        );
    }

    #[test]
    fn test_unsupported_keywords_rejected() {
        let err = parse_program("const x = new Thing();").unwrap_err();
        assert!(err.to_string().contains("'new' is not supported"));
        assert!(parse_program("class A {}").is_err());
    }

    #[test]
    fn test_nesting_is_bounded() {
        let deep = format!("x = {}1{};", "(".repeat(MAX_NESTING * 2), ")".repeat(MAX_NESTING * 2));
        let err = parse_program(&deep).unwrap_err();
        assert!(err.to_string().contains("nesting deeper"));

        let arrays = format!("x = {}{};", "[".repeat(1000), "]".repeat(1000));
        assert!(parse_program(&arrays).is_err());
    }

    #[test]
    fn test_invalid_assignment_target() {
        assert!(parse_program("1 = 2;").is_err());
        assert!(parse_program("f()++;").is_err());
    }
}
