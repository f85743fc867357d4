//! Recursive descent parser for strategy scripts.
//!
//! Produces a [`Program`] from tokens, with errors carrying the byte offset
//! of the offending token.

use super::ast::{BinaryOp, DeclKind, Expr, ExprKind, LogicalOp, Program, Stmt, UnaryOp};
use super::lexer::{Keyword, Punct, Token, TokenKind};
use crate::domain::error::ParseError;

const MAX_DEPTH: usize = 64;

/// Words scripts might reach for that the language deliberately lacks.
const UNSUPPORTED: &[&str] = &[
    "for", "while", "do", "function", "return", "new", "class", "try", "catch", "throw", "switch",
    "async", "await", "yield", "delete", "typeof", "instanceof", "in", "of", "with", "break",
    "continue", "export", "debugger",
];

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    depth: usize,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> &'t Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek_kind(&self) -> &'t TokenKind {
        &self.peek().kind
    }

    fn peek_nth_kind(&self, n: usize) -> Option<&'t TokenKind> {
        self.tokens.get(self.pos + n).map(|t| &t.kind)
    }

    fn advance(&mut self) -> &'t Token {
        let token = self.peek();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, punct: Punct) -> bool {
        *self.peek_kind() == TokenKind::Punct(punct)
    }

    fn eat(&mut self, punct: Punct) -> bool {
        if self.check(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if *self.peek_kind() == TokenKind::Keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.peek();
        ParseError {
            message: format!("expected {expected}, found {}", token.kind.describe()),
            position: token.position,
        }
    }

    fn expect(&mut self, punct: Punct) -> Result<(), ParseError> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", punct.as_str())))
        }
    }

    fn expect_ident(&mut self) -> Result<(String, usize), ParseError> {
        let token = self.peek();
        match &token.kind {
            TokenKind::Ident(name) => {
                self.advance();
                Ok((name.clone(), token.position))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ParseError {
                message: "script is nested too deeply".to_string(),
                position: self.peek().position,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn reject_unsupported(&self) -> Result<(), ParseError> {
        if let TokenKind::Ident(name) = self.peek_kind() {
            if UNSUPPORTED.contains(&name.as_str()) {
                return Err(ParseError {
                    message: format!("'{name}' is not supported in strategy scripts"),
                    position: self.peek().position,
                });
            }
        }
        Ok(())
    }

    fn end_statement(&mut self) -> Result<(), ParseError> {
        if self.eat(Punct::Semicolon) || self.check(Punct::RBrace) {
            return Ok(());
        }
        if *self.peek_kind() == TokenKind::Eof {
            return Ok(());
        }
        Err(self.unexpected("';'"))
    }

    fn program(&mut self) -> Result<Program, ParseError> {
        let mut statements = Vec::new();
        while *self.peek_kind() != TokenKind::Eof {
            statements.extend(self.statement()?);
        }
        Ok(statements)
    }

    /// One source statement; `let a = 1, b = 2` yields several.
    fn statement(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.reject_unsupported()?;
        self.enter()?;
        let result = self.statement_inner();
        self.leave();
        result
    }

    fn statement_inner(&mut self) -> Result<Vec<Stmt>, ParseError> {
        match self.peek_kind() {
            TokenKind::Keyword(Keyword::Let) => {
                self.advance();
                self.declaration(DeclKind::Let)
            }
            TokenKind::Keyword(Keyword::Const) => {
                self.advance();
                self.declaration(DeclKind::Const)
            }
            TokenKind::Keyword(Keyword::Var) => {
                self.advance();
                self.declaration(DeclKind::Var)
            }
            TokenKind::Keyword(Keyword::If) => {
                self.advance();
                Ok(vec![self.if_statement()?])
            }
            TokenKind::Punct(Punct::LBrace) => {
                self.advance();
                Ok(vec![Stmt::Block(self.block_body()?)])
            }
            TokenKind::Punct(Punct::Semicolon) => {
                self.advance();
                Ok(vec![Stmt::Empty])
            }
            TokenKind::Ident(name)
                if self.peek_nth_kind(1) == Some(&TokenKind::Punct(Punct::Assign)) =>
            {
                let position = self.peek().position;
                let name = name.clone();
                self.advance();
                self.advance();
                let value = self.expression()?;
                self.end_statement()?;
                Ok(vec![Stmt::Assign {
                    name,
                    value,
                    position,
                }])
            }
            _ => {
                let expr = self.expression()?;
                self.end_statement()?;
                Ok(vec![Stmt::Expr(expr)])
            }
        }
    }

    fn declaration(&mut self, kind: DeclKind) -> Result<Vec<Stmt>, ParseError> {
        let mut declarations = Vec::new();
        loop {
            let (name, position) = self.expect_ident()?;
            let init = if self.eat(Punct::Assign) {
                Some(self.expression()?)
            } else {
                None
            };
            if kind == DeclKind::Const && init.is_none() {
                return Err(ParseError {
                    message: format!("const '{name}' must be initialized"),
                    position,
                });
            }
            declarations.push(Stmt::Declare {
                kind,
                name,
                init,
                position,
            });
            if !self.eat(Punct::Comma) {
                break;
            }
        }
        self.end_statement()?;
        Ok(declarations)
    }

    fn if_statement(&mut self) -> Result<Stmt, ParseError> {
        self.expect(Punct::LParen)?;
        let condition = self.expression()?;
        self.expect(Punct::RParen)?;
        let then_branch = Box::new(self.branch()?);
        let else_branch = if self.eat_keyword(Keyword::Else) {
            Some(Box::new(self.branch()?))
        } else {
            None
        };
        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn branch(&mut self) -> Result<Stmt, ParseError> {
        let mut statements = self.statement()?;
        if statements.len() == 1 {
            Ok(statements.remove(0))
        } else {
            Ok(Stmt::Block(statements))
        }
    }

    fn block_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut statements = Vec::new();
        while !self.check(Punct::RBrace) {
            if *self.peek_kind() == TokenKind::Eof {
                return Err(self.unexpected("'}'"));
            }
            statements.extend(self.statement()?);
        }
        self.advance();
        Ok(statements)
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let result = self.conditional();
        self.leave();
        result
    }

    fn conditional(&mut self) -> Result<Expr, ParseError> {
        let condition = self.logical_or()?;
        if self.check(Punct::Question) {
            let position = self.advance().position;
            let then_value = self.expression()?;
            self.expect(Punct::Colon)?;
            let else_value = self.expression()?;
            return Ok(Expr {
                kind: ExprKind::Conditional {
                    condition: Box::new(condition),
                    then_value: Box::new(then_value),
                    else_value: Box::new(else_value),
                },
                position,
            });
        }
        Ok(condition)
    }

    /// Run a left-associative chain parser. Each node it folds in counts
    /// one level of depth until the chain is finished.
    fn chained(
        &mut self,
        chain: impl FnOnce(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        let base = self.depth;
        let result = chain(self);
        self.depth = base;
        result
    }

    fn logical_or(&mut self) -> Result<Expr, ParseError> {
        self.chained(|p| {
            let mut left = p.logical_and()?;
            while p.check(Punct::OrOr) {
                p.enter()?;
                let position = p.advance().position;
                let right = p.logical_and()?;
                left = logical(LogicalOp::Or, left, right, position);
            }
            Ok(left)
        })
    }

    fn logical_and(&mut self) -> Result<Expr, ParseError> {
        self.chained(|p| {
            let mut left = p.equality()?;
            while p.check(Punct::AndAnd) {
                p.enter()?;
                let position = p.advance().position;
                let right = p.equality()?;
                left = logical(LogicalOp::And, left, right, position);
            }
            Ok(left)
        })
    }

    fn binary_level(
        &mut self,
        ops: &[(Punct, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        self.chained(|p| {
            let mut left = next(p)?;
            'outer: loop {
                for &(punct, op) in ops {
                    if p.check(punct) {
                        p.enter()?;
                        let position = p.advance().position;
                        let right = next(p)?;
                        left = Expr {
                            kind: ExprKind::Binary {
                                op,
                                left: Box::new(left),
                                right: Box::new(right),
                            },
                            position,
                        };
                        continue 'outer;
                    }
                }
                return Ok(left);
            }
        })
    }

    fn equality(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[(Punct::EqEq, BinaryOp::Eq), (Punct::NotEq, BinaryOp::NotEq)],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                (Punct::Lt, BinaryOp::Lt),
                (Punct::Le, BinaryOp::Le),
                (Punct::Gt, BinaryOp::Gt),
                (Punct::Ge, BinaryOp::Ge),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[(Punct::Plus, BinaryOp::Add), (Punct::Minus, BinaryOp::Sub)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                (Punct::Star, BinaryOp::Mul),
                (Punct::Slash, BinaryOp::Div),
                (Punct::Percent, BinaryOp::Rem),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_kind() {
            TokenKind::Punct(Punct::Bang) => UnaryOp::Not,
            TokenKind::Punct(Punct::Minus) => UnaryOp::Neg,
            TokenKind::Punct(Punct::Plus) => UnaryOp::Plus,
            _ => return self.postfix(),
        };
        let position = self.advance().position;
        self.enter()?;
        let operand = self.unary();
        self.leave();
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand?),
            },
            position,
        })
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        self.chained(|p| {
            let mut expr = p.primary()?;
            loop {
                if p.check(Punct::LBracket) {
                    p.enter()?;
                    let position = p.advance().position;
                    let index = p.expression()?;
                    p.expect(Punct::RBracket)?;
                    expr = Expr {
                        kind: ExprKind::Index {
                            target: Box::new(expr),
                            index: Box::new(index),
                        },
                        position,
                    };
                } else if p.check(Punct::Dot) {
                    p.enter()?;
                    let position = p.advance().position;
                    let (field, _) = p.expect_ident()?;
                    expr = Expr {
                        kind: ExprKind::Member {
                            target: Box::new(expr),
                            field,
                        },
                        position,
                    };
                } else if p.check(Punct::LParen) {
                    return Err(ParseError {
                        message: "only built-in functions can be called".to_string(),
                        position: p.peek().position,
                    });
                } else {
                    return Ok(expr);
                }
            }
        })
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        self.reject_unsupported()?;
        let token = self.peek();
        let position = token.position;
        let kind = match &token.kind {
            TokenKind::Number(n) => {
                self.advance();
                ExprKind::Number(*n)
            }
            TokenKind::Str(s) => {
                self.advance();
                ExprKind::Str(s.clone())
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                ExprKind::Null
            }
            TokenKind::Ident(name) => {
                self.advance();
                if self.eat(Punct::LParen) {
                    ExprKind::Call {
                        callee: name.clone(),
                        args: self.arguments()?,
                    }
                } else {
                    ExprKind::Ident(name.clone())
                }
            }
            TokenKind::Punct(Punct::LParen) => {
                self.advance();
                let inner = self.expression()?;
                self.expect(Punct::RParen)?;
                return Ok(inner);
            }
            TokenKind::Punct(Punct::LBrace) => {
                self.advance();
                ExprKind::Object(self.object_body()?)
            }
            _ => return Err(self.unexpected("expression")),
        };
        Ok(Expr { kind, position })
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.eat(Punct::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(Punct::RParen) {
                return Ok(args);
            }
            self.expect(Punct::Comma)?;
            if self.eat(Punct::RParen) {
                return Ok(args);
            }
        }
    }

    fn object_body(&mut self) -> Result<Vec<(String, Expr)>, ParseError> {
        let mut fields = Vec::new();
        loop {
            if self.eat(Punct::RBrace) {
                return Ok(fields);
            }
            let key = match &self.peek().kind {
                TokenKind::Ident(name) => name.clone(),
                TokenKind::Str(s) => s.clone(),
                _ => return Err(self.unexpected("property name")),
            };
            self.advance();
            self.expect(Punct::Colon)?;
            fields.push((key, self.expression()?));
            if !self.eat(Punct::Comma) {
                self.expect(Punct::RBrace)?;
                return Ok(fields);
            }
        }
    }
}

fn logical(op: LogicalOp, left: Expr, right: Expr, position: usize) -> Expr {
    Expr {
        kind: ExprKind::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        position,
    }
}

pub fn parse(tokens: &[Token]) -> Result<Program, ParseError> {
    if tokens.is_empty() {
        return Ok(Vec::new());
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    parser.program()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::script::lexer::tokenize;

    fn parse_str(src: &str) -> Result<Program, ParseError> {
        parse(&tokenize(src).unwrap())
    }

    fn only_expr(src: &str) -> ExprKind {
        match parse_str(src).unwrap().remove(0) {
            Stmt::Expr(e) => e.kind,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn precedence_mul_over_add() {
        match only_expr("1 + 2 * 3") {
            ExprKind::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Mul, .. })),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn and_binds_tighter_than_or() {
        match only_expr("a || b && c") {
            ExprKind::Logical {
                op: LogicalOp::Or,
                right,
                ..
            } => assert!(matches!(
                right.kind,
                ExprKind::Logical {
                    op: LogicalOp::And,
                    ..
                }
            )),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn comparison_chain_left_assoc() {
        match only_expr("1 - 2 - 3") {
            ExprKind::Binary {
                op: BinaryOp::Sub,
                left,
                ..
            } => assert!(matches!(left.kind, ExprKind::Binary { op: BinaryOp::Sub, .. })),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn multi_declaration() {
        let program = parse_str("let a = 1, b;").unwrap();
        assert_eq!(program.len(), 2);
        assert!(matches!(&program[1], Stmt::Declare { name, init: None, .. } if name == "b"));
    }

    #[test]
    fn const_requires_initializer() {
        let err = parse_str("const a;").unwrap_err();
        assert!(err.message.contains("must be initialized"));
    }

    #[test]
    fn if_else_chain() {
        let program = parse_str(
            "if (rsi(14)[-1] < 30) { buy(); } else if (close > 10) sell(); else log('hold')",
        )
        .unwrap();
        match &program[0] {
            Stmt::If {
                else_branch: Some(else_branch),
                ..
            } => assert!(matches!(**else_branch, Stmt::If { .. })),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn object_literal_and_members() {
        let program = parse_str("setConfig({ stopLoss: 1.5, 'takeProfit': 3, });").unwrap();
        match &program[0] {
            Stmt::Expr(Expr {
                kind: ExprKind::Call { callee, args },
                ..
            }) => {
                assert_eq!(callee, "setConfig");
                assert!(matches!(&args[0].kind, ExprKind::Object(fields) if fields.len() == 2));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            only_expr("macd().histogram[-1]"),
            ExprKind::Index { .. }
        ));
    }

    #[test]
    fn assignment_statement() {
        let program = parse_str("let x = 1; x = x + 1;").unwrap();
        assert!(matches!(&program[1], Stmt::Assign { name, .. } if name == "x"));
    }

    #[test]
    fn missing_semicolon_between_statements() {
        let err = parse_str("let a = 1 let b = 2").unwrap_err();
        assert!(err.message.contains("';'"));
    }

    #[test]
    fn loops_are_unsupported() {
        let err = parse_str("for (;;) {}").unwrap_err();
        assert!(err.message.contains("'for' is not supported"));
        assert_eq!(err.position, 0);
    }

    #[test]
    fn computed_calls_are_rejected() {
        let err = parse_str("opens.length(1)").unwrap_err();
        assert!(err.message.contains("only built-in functions"));
    }

    #[test]
    fn nesting_is_bounded() {
        let src = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        let err = parse_str(&src).unwrap_err();
        assert!(err.message.contains("nested too deeply"));
    }

    #[test]
    fn long_operator_chains_are_bounded() {
        for op in ["+", "*", "&&", "||", "<"] {
            let src = vec!["1"; 500].join(op);
            let err = parse_str(&src).unwrap_err();
            assert!(err.message.contains("nested too deeply"), "{op}: {err:?}");
        }
        let members = format!("closes{}", ".length".repeat(200));
        assert!(parse_str(&members).is_err());
        let indexes = format!("closes{}", "[0]".repeat(200));
        assert!(parse_str(&indexes).is_err());

        // ordinary chains still parse, and the budget is released after each
        let sum = vec!["close"; 20].join(" + ");
        let src = format!("let a = {sum}; let b = {sum}; let c = highs[0] + lows[-1];");
        assert_eq!(parse_str(&src).unwrap().len(), 3);
    }

    #[test]
    fn unclosed_block() {
        let err = parse_str("if (true) { buy();").unwrap_err();
        assert!(err.message.contains("'}'"));
    }

    #[test]
    fn error_position_points_at_token() {
        let err = parse_str("let a = ;").unwrap_err();
        assert_eq!(err.position, 8);
    }
}
