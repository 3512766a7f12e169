//! Parser for kernel source
//!
//! Parses modules like:
//! - `kernel add(a, b, output) { for y, x in output.indices() { output[y, x] = a[y, x] + b[y, x]; } }`
//! - `fn relu(v) { return fmax(v, 0.0); }`

use crate::ast::{BinOp, Expr, HelperDef, KernelDef, Module, Statement};
use crate::error::{SpecializeError, SpecializeResult};
use crate::lexer::{Lexer, Token};

/// Parser for kernel modules
pub struct Parser<'source> {
    lexer: Lexer<'source>,
    current: Option<Token>,
    started: bool,
}

impl<'source> Parser<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            lexer: Lexer::new(source),
            current: None,
            started: false,
        }
    }

    /// Advance to the next token
    fn advance(&mut self) -> SpecializeResult<Option<Token>> {
        let prev = self.current.take();
        self.current = self.lexer.next_token()?;
        Ok(prev)
    }

    /// Check if current token matches expected
    fn check(&self, expected: &Token) -> bool {
        match &self.current {
            Some(tok) => std::mem::discriminant(tok) == std::mem::discriminant(expected),
            None => false,
        }
    }

    /// Consume token if it matches, otherwise error
    fn expect(&mut self, expected: Token) -> SpecializeResult<()> {
        if self.check(&expected) {
            self.advance()?;
            Ok(())
        } else {
            Err(self.unexpected(&format!("`{}`", expected)))
        }
    }

    fn expect_ident(&mut self) -> SpecializeResult<String> {
        match self.current.take() {
            Some(Token::Ident(name)) => {
                self.current = self.lexer.next_token()?;
                Ok(name)
            }
            other => {
                self.current = other;
                Err(self.unexpected("identifier"))
            }
        }
    }

    fn unexpected(&self, wanted: &str) -> SpecializeError {
        match &self.current {
            Some(tok) => SpecializeError::parse_error(format!(
                "expected {}, got `{}` at position {}",
                wanted,
                tok,
                self.lexer.span().start
            )),
            None => SpecializeError::parse_error(format!(
                "expected {}, got end of input",
                wanted
            )),
        }
    }

    /// Parse a complete module (kernels and helpers)
    pub fn parse_module(&mut self) -> SpecializeResult<Module> {
        if !self.started {
            self.started = true;
            self.advance()?;
        }

        let mut module = Module::default();

        while self.current.is_some() {
            if self.check(&Token::Kernel) {
                module.kernels.push(self.parse_kernel()?);
            } else if self.check(&Token::Fn) {
                module.helpers.push(self.parse_helper()?);
            } else {
                return Err(self.unexpected("`kernel` or `fn`"));
            }
        }

        Ok(module)
    }

    fn parse_kernel(&mut self) -> SpecializeResult<KernelDef> {
        self.expect(Token::Kernel)?;
        let name = self.expect_ident()?;
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        Ok(KernelDef { name, params, body })
    }

    fn parse_helper(&mut self) -> SpecializeResult<HelperDef> {
        self.expect(Token::Fn)?;
        let name = self.expect_ident()?;
        let params = self.parse_params()?;
        self.expect(Token::LBrace)?;
        self.expect(Token::Return)?;
        let body = self.parse_expr()?;
        self.expect(Token::Semicolon)?;
        self.expect(Token::RBrace)?;
        Ok(HelperDef { name, params, body })
    }

    /// Parse a parameter list: (a, b, output)
    fn parse_params(&mut self) -> SpecializeResult<Vec<String>> {
        self.expect(Token::LParen)?;

        let mut params = Vec::new();
        while !self.check(&Token::RParen) {
            params.push(self.expect_ident()?);
            if self.check(&Token::Comma) {
                self.advance()?;
            } else {
                break;
            }
        }

        self.expect(Token::RParen)?;
        Ok(params)
    }

    fn parse_block(&mut self) -> SpecializeResult<Vec<Statement>> {
        self.expect(Token::LBrace)?;

        let mut statements = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.current.is_none() {
                return Err(self.unexpected("`}`"));
            }
            statements.push(self.parse_statement()?);
        }

        self.expect(Token::RBrace)?;
        Ok(statements)
    }

    /// Parse a single statement
    fn parse_statement(&mut self) -> SpecializeResult<Statement> {
        if self.check(&Token::For) {
            self.advance()?;

            let mut targets = vec![self.expect_ident()?];
            while self.check(&Token::Comma) {
                self.advance()?;
                targets.push(self.expect_ident()?);
            }

            self.expect(Token::In)?;
            let iter = self.parse_expr()?;
            let body = self.parse_block()?;
            return Ok(Statement::For { targets, iter, body });
        }

        if self.check(&Token::Let) {
            self.advance()?;
            let name = self.expect_ident()?;
            self.expect(Token::Equals)?;
            let value = self.parse_expr()?;
            self.expect(Token::Semicolon)?;
            return Ok(Statement::Let { name, value });
        }

        let target = self.parse_expr()?;
        self.expect(Token::Equals)?;
        let value = self.parse_expr()?;
        self.expect(Token::Semicolon)?;
        Ok(Statement::Assign { target, value })
    }

    /// Parse an expression (handles operator precedence)
    pub fn parse_expr(&mut self) -> SpecializeResult<Expr> {
        self.parse_additive()
    }

    /// Parse additive expressions: a + b, a - b
    fn parse_additive(&mut self) -> SpecializeResult<Expr> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = if self.check(&Token::Plus) {
                BinOp::Add
            } else if self.check(&Token::Minus) {
                BinOp::Sub
            } else {
                break;
            };
            self.advance()?;
            let right = self.parse_multiplicative()?;
            left = Expr::binary(op, left, right);
        }

        Ok(left)
    }

    /// Parse multiplicative expressions: a * b, a / b, a % b, a @ b
    fn parse_multiplicative(&mut self) -> SpecializeResult<Expr> {
        let mut left = self.parse_unary()?;

        loop {
            let op = if self.check(&Token::Star) {
                BinOp::Mul
            } else if self.check(&Token::Slash) {
                BinOp::Div
            } else if self.check(&Token::Percent) {
                BinOp::Rem
            } else if self.check(&Token::At) {
                BinOp::MatMul
            } else {
                break;
            };
            self.advance()?;
            let right = self.parse_unary()?;
            left = Expr::binary(op, left, right);
        }

        Ok(left)
    }

    /// Parse unary expressions: -a
    fn parse_unary(&mut self) -> SpecializeResult<Expr> {
        if self.check(&Token::Minus) {
            self.advance()?;
            let operand = self.parse_unary()?;
            Ok(Expr::Neg(Box::new(operand)))
        } else {
            self.parse_postfix()
        }
    }

    /// Parse postfix expressions: a[y, x], a.shape, a.indices()
    fn parse_postfix(&mut self) -> SpecializeResult<Expr> {
        let mut expr = self.parse_primary()?;

        loop {
            if self.check(&Token::LBracket) {
                self.advance()?;
                let mut indices = vec![self.parse_expr()?];
                while self.check(&Token::Comma) {
                    self.advance()?;
                    indices.push(self.parse_expr()?);
                }
                self.expect(Token::RBracket)?;
                expr = Expr::Index {
                    base: Box::new(expr),
                    indices,
                };
            } else if self.check(&Token::Dot) {
                self.advance()?;
                let name = self.expect_ident()?;
                if self.check(&Token::LParen) {
                    let args = self.parse_args()?;
                    expr = Expr::MethodCall {
                        receiver: Box::new(expr),
                        method: name,
                        args,
                    };
                } else {
                    expr = Expr::Attribute {
                        base: Box::new(expr),
                        name,
                    };
                }
            } else {
                break;
            }
        }

        Ok(expr)
    }

    /// Parse primary expressions: literals, names, calls, parenthesized
    fn parse_primary(&mut self) -> SpecializeResult<Expr> {
        match &self.current {
            Some(Token::Int(n)) => {
                let n = *n;
                self.advance()?;
                Ok(Expr::Int(n))
            }

            Some(Token::Float(n)) => {
                let n = *n;
                self.advance()?;
                Ok(Expr::Float(n))
            }

            Some(Token::Ident(_)) => {
                let name = self.expect_ident()?;
                if self.check(&Token::LParen) {
                    let args = self.parse_args()?;
                    return Ok(Expr::Call { func: name, args });
                }
                Ok(Expr::Variable(name))
            }

            Some(Token::LParen) => {
                self.advance()?;
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }

            _ => Err(self.unexpected("expression")),
        }
    }

    /// Parse call arguments: (arg1, arg2, ...)
    fn parse_args(&mut self) -> SpecializeResult<Vec<Expr>> {
        self.expect(Token::LParen)?;

        let mut args = Vec::new();
        if !self.check(&Token::RParen) {
            args.push(self.parse_expr()?);

            while self.check(&Token::Comma) {
                self.advance()?;
                if self.check(&Token::RParen) {
                    break; // Trailing comma
                }
                args.push(self.parse_expr()?);
            }
        }

        self.expect(Token::RParen)?;
        Ok(args)
    }
}

/// Parse a complete source module
pub fn parse_module(source: &str) -> SpecializeResult<Module> {
    Parser::new(source).parse_module()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ADD: &str = "
        kernel array_array_add(a, b, output) {
            for y, x in output.indices() {
                output[y, x] = a[y, x] + b[y, x];
            }
        }
    ";

    fn idx(name: &str, vars: &[&str]) -> Expr {
        Expr::Index {
            base: Box::new(Expr::var(name)),
            indices: vars.iter().map(|v| Expr::var(*v)).collect(),
        }
    }

    #[test]
    fn test_parse_kernel() {
        let module = parse_module(ADD).unwrap();
        assert_eq!(module.kernels.len(), 1);
        assert!(module.helpers.is_empty());

        let kernel = &module.kernels[0];
        assert_eq!(kernel.name, "array_array_add");
        assert_eq!(kernel.params, vec!["a", "b", "output"]);

        let expected = Statement::For {
            targets: vec!["y".to_string(), "x".to_string()],
            iter: Expr::MethodCall {
                receiver: Box::new(Expr::var("output")),
                method: "indices".to_string(),
                args: vec![],
            },
            body: vec![Statement::Assign {
                target: idx("output", &["y", "x"]),
                value: Expr::binary(BinOp::Add, idx("a", &["y", "x"]), idx("b", &["y", "x"])),
            }],
        };
        assert_eq!(kernel.body, vec![expected]);
    }

    #[test]
    fn test_parse_helper() {
        let module = parse_module("fn relu(v) { return fmax(v, 0.0); }").unwrap();
        assert_eq!(module.helpers.len(), 1);

        let helper = &module.helpers[0];
        assert_eq!(helper.name, "relu");
        assert_eq!(helper.params, vec!["v"]);
        assert_eq!(
            helper.body,
            Expr::Call {
                func: "fmax".to_string(),
                args: vec![Expr::var("v"), Expr::Float(0.0)],
            }
        );
    }

    #[test]
    fn test_precedence() {
        let mut parser = Parser::new("a + b * -c");
        parser.started = true;
        parser.advance().unwrap();
        let expr = parser.parse_expr().unwrap();
        assert_eq!(
            expr,
            Expr::binary(
                BinOp::Add,
                Expr::var("a"),
                Expr::binary(BinOp::Mul, Expr::var("b"), Expr::Neg(Box::new(Expr::var("c")))),
            )
        );
    }

    #[test]
    fn test_parse_shape_attribute() {
        let module = parse_module(
            "kernel scale(a, output) {
                for i in output.indices() {
                    let n = a.shape[0];
                    output[i] = a[i] / n;
                }
            }",
        )
        .unwrap();

        if let Statement::For { body, .. } = &module.kernels[0].body[0] {
            assert_eq!(
                body[0],
                Statement::Let {
                    name: "n".to_string(),
                    value: Expr::Index {
                        base: Box::new(Expr::Attribute {
                            base: Box::new(Expr::var("a")),
                            name: "shape".to_string(),
                        }),
                        indices: vec![Expr::Int(0)],
                    },
                }
            );
        } else {
            panic!("Expected For statement");
        }
    }

    #[test]
    fn test_missing_semicolon() {
        let result = parse_module(
            "kernel k(a, out) { for i in out.indices() { out[i] = a[i] } }",
        );
        assert!(matches!(result, Err(SpecializeError::ParseError { .. })));
    }

    #[test]
    fn test_unterminated_block() {
        let result = parse_module("kernel k(a, out) { for i in out.indices() {");
        assert!(matches!(result, Err(SpecializeError::ParseError { .. })));
    }

    #[test]
    fn test_lexer_error_propagates() {
        let result = parse_module("kernel k(a) { $ }");
        assert!(matches!(result, Err(SpecializeError::LexerError { .. })));
    }
}
