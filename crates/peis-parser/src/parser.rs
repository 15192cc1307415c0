//! Parser for the Peis language
//!
//! Recursive descent over the token stream. A failed declaration is reported,
//! skipped up to the next declaration keyword, and parsing continues.

use crate::ast::*;
use peis_error::{Diagnostic, Diagnostics, ErrorCode, Span, Spanned};
use peis_lexer::{Token, TokenKind};

type PResult<T> = Result<T, ()>;

/// Parser for the Peis language
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    diagnostics: Diagnostics,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().map(|t| &t.kind) != Some(&TokenKind::Eof) {
            let span = tokens.last().map(|t| t.span).unwrap_or_default();
            tokens.push(Token::new(TokenKind::Eof, span));
        }
        Self {
            tokens,
            pos: 0,
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Consumes and returns the diagnostics
    pub fn take_diagnostics(&mut self) -> Diagnostics {
        std::mem::take(&mut self.diagnostics)
    }

    // =========================================
    // Helpers
    // =========================================

    fn peek(&self) -> &Token {
        // `new` guarantees a trailing Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.pos += 1;
        }
        self.previous()
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.pos.saturating_sub(1)]
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, message: &str) -> PResult<Span> {
        if self.check(kind) {
            Ok(self.advance().span)
        } else {
            self.error_at_current(message, ErrorCode::UNEXPECTED_TOKEN);
            Err(())
        }
    }

    fn expect_ident(&mut self, message: &str) -> PResult<(String, Span)> {
        if let TokenKind::Ident(name) = self.peek_kind() {
            let name = name.clone();
            let span = self.advance().span;
            Ok((name, span))
        } else {
            self.error_at_current(message, ErrorCode::UNEXPECTED_TOKEN);
            Err(())
        }
    }

    fn error_at_current(&mut self, message: &str, code: ErrorCode) {
        let token = self.peek();
        let diagnostic = Diagnostic::error(message)
            .with_code(code)
            .with_label(token.span, format!("found `{}`", token.kind));
        self.diagnostics.push(diagnostic);
    }

    /// Skips to the next token that can start a declaration
    fn synchronize(&mut self) {
        self.advance();
        while !self.is_at_end() {
            let kind = self.peek_kind();
            if matches!(kind, TokenKind::Public | TokenKind::Const) {
                return;
            }
            // `<type> <ident> (` only ever opens a function declaration
            if kind.is_type()
                && matches!(self.tokens.get(self.pos + 1).map(|t| &t.kind), Some(TokenKind::Ident(_)))
                && matches!(self.tokens.get(self.pos + 2).map(|t| &t.kind), Some(TokenKind::LParen))
            {
                return;
            }
            self.advance();
        }
    }

    // =========================================
    // Declarations
    // =========================================

    /// Parses a complete module
    pub fn parse(&mut self) -> Module {
        let start = self.peek().span;
        let mut module = Module {
            name: "main".to_string(),
            imports: Vec::new(),
            constants: Vec::new(),
            functions: Vec::new(),
            span: start,
        };

        if self.match_token(&TokenKind::Module) {
            match self.parse_qualified_name("expected module name after `module`") {
                Ok((name, _)) => module.name = name,
                Err(()) => self.synchronize(),
            }
            self.match_token(&TokenKind::Semicolon);
        }

        while self.check(&TokenKind::Import) {
            let import_start = self.advance().span;
            match self.parse_qualified_name("expected module name after `import`") {
                Ok((name, span)) => module.imports.push(Import {
                    module: name,
                    span: import_start.to(span),
                }),
                Err(()) => self.synchronize(),
            }
            self.match_token(&TokenKind::Semicolon);
        }

        while !self.is_at_end() {
            if self.match_token(&TokenKind::Semicolon) {
                continue;
            }
            match self.parse_declaration(&mut module) {
                Ok(()) => {}
                Err(()) => self.synchronize(),
            }
        }

        module.span = start.to(self.peek().span);
        module
    }

    fn parse_declaration(&mut self, module: &mut Module) -> PResult<()> {
        let start = self.peek().span;
        let visibility = if self.match_token(&TokenKind::Public) {
            Visibility::Public
        } else {
            Visibility::Private
        };

        if self.match_token(&TokenKind::Const) {
            let ty = self.parse_type()?;
            let (name, _) = self.expect_ident("expected constant name")?;
            self.expect(&TokenKind::Eq, "expected `=` after constant name")?;
            let value = self.parse_const_literal()?;
            module.constants.push(ConstDecl {
                name,
                visibility,
                ty,
                value,
                span: start.to(self.previous().span),
            });
            return Ok(());
        }

        let return_type = self.parse_type()?;
        let (name, _) = self.expect_ident("expected function name")?;
        self.expect(&TokenKind::LParen, "expected `(` after function name")?;

        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let param_start = self.peek().span;
                let ty = self.parse_type()?;
                let (param_name, name_span) = self.expect_ident("expected parameter name")?;
                params.push(Param {
                    name: param_name,
                    ty,
                    span: param_start.to(name_span),
                });
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "expected `)` after parameters")?;

        let body = self.parse_block()?;
        module.functions.push(FnDecl {
            name,
            visibility,
            return_type,
            params,
            span: start.to(body.span),
            body,
        });
        Ok(())
    }

    fn parse_type(&mut self) -> PResult<Type> {
        let ty = match self.peek_kind() {
            TokenKind::VoidType => Type::Void,
            TokenKind::BoolType => Type::Bool,
            TokenKind::IntType => Type::Int,
            TokenKind::RealType => Type::Real,
            _ => {
                self.error_at_current("expected a type (`void`, `bool`, `int` or `real`)", ErrorCode::EXPECTED_TYPE);
                return Err(());
            }
        };
        self.advance();
        Ok(ty)
    }

    /// Constant initializers are literals, optionally negated
    fn parse_const_literal(&mut self) -> PResult<Literal> {
        let negate = self.match_token(&TokenKind::Minus);
        let literal = match self.peek_kind().clone() {
            TokenKind::IntLit(v) if negate => Literal::Int(v.wrapping_neg()),
            TokenKind::IntLit(v) => Literal::Int(v),
            TokenKind::RealLit(v) if negate => Literal::Real(-v),
            TokenKind::RealLit(v) => Literal::Real(v),
            TokenKind::True if !negate => Literal::Bool(true),
            TokenKind::False if !negate => Literal::Bool(false),
            _ => {
                self.error_at_current("expected a literal value", ErrorCode::EXPECTED_EXPRESSION);
                return Err(());
            }
        };
        self.advance();
        Ok(literal)
    }

    /// `ident (. ident)*`
    fn parse_qualified_name(&mut self, message: &str) -> PResult<(String, Span)> {
        let (mut name, mut span) = self.expect_ident(message)?;
        while self.check(&TokenKind::Dot) {
            self.advance();
            let (part, part_span) = self.expect_ident("expected name after `.`")?;
            name.push('.');
            name.push_str(&part);
            span = span.to(part_span);
        }
        Ok((name, span))
    }

    // =========================================
    // Statements
    // =========================================

    fn parse_block(&mut self) -> PResult<Block> {
        let start = self.expect(&TokenKind::Begin, "expected `begin`")?;
        let mut statements = Vec::new();

        while !self.check(&TokenKind::End) {
            if self.is_at_end() {
                self.error_at_current("expected `end` to close block", ErrorCode::UNEXPECTED_TOKEN);
                return Err(());
            }
            if self.match_token(&TokenKind::Semicolon) {
                continue;
            }
            statements.push(self.parse_statement()?);
        }
        let end = self.advance().span;

        Ok(Block {
            statements,
            span: start.to(end),
        })
    }

    fn parse_statement(&mut self) -> PResult<Stmt> {
        let start = self.peek().span;
        match self.peek_kind() {
            TokenKind::Begin => Ok(Stmt::Block(self.parse_block()?)),
            TokenKind::If => {
                self.advance();
                let condition = self.parse_expression()?;
                let then_branch = Box::new(self.parse_statement()?);
                let else_branch = if self.match_token(&TokenKind::Else) {
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                let end = else_branch.as_ref().map(|s| s.span()).unwrap_or_else(|| then_branch.span());
                Ok(Stmt::If {
                    condition,
                    then_branch,
                    else_branch,
                    span: start.to(end),
                })
            }
            TokenKind::While => {
                self.advance();
                let condition = self.parse_expression()?;
                let body = Box::new(self.parse_statement()?);
                let span = start.to(body.span());
                Ok(Stmt::While { condition, body, span })
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.starts_expression() {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                let span = value.as_ref().map(|v| start.to(v.span())).unwrap_or(start);
                Ok(Stmt::Return { value, span })
            }
            TokenKind::Ident(_) => {
                let checkpoint = self.pos;
                let (target, _) = self.parse_qualified_name("expected name")?;
                if self.match_token(&TokenKind::Assign) {
                    let value = self.parse_expression()?;
                    let span = start.to(value.span());
                    return Ok(Stmt::Assign { target, value, span });
                }
                self.pos = checkpoint;
                Ok(Stmt::Expr(self.parse_expression()?))
            }
            _ if self.starts_expression() => Ok(Stmt::Expr(self.parse_expression()?)),
            _ => {
                self.error_at_current("expected a statement", ErrorCode::UNEXPECTED_TOKEN);
                Err(())
            }
        }
    }

    fn starts_expression(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::IntLit(_)
                | TokenKind::RealLit(_)
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Ident(_)
                | TokenKind::LParen
                | TokenKind::Minus
                | TokenKind::Not
        )
    }

    // =========================================
    // Expressions (precedence climbing)
    // =========================================

    pub fn parse_expression(&mut self) -> PResult<Expr> {
        self.parse_or()
    }

    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        let span = left.span().to(right.span());
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            span,
        }
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut left = self.parse_and()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Or => BinaryOp::Or,
                TokenKind::Xor => BinaryOp::Xor,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_and()?;
            left = Self::binary(op, left, right);
        }
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut left = self.parse_comparison()?;
        while self.match_token(&TokenKind::And) {
            let right = self.parse_comparison()?;
            left = Self::binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::Ne,
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::LtEq => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::GtEq => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Self::binary(op, left, right);
        }
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Self::binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::SlashSlash => BinaryOp::IntDiv,
                TokenKind::Percent => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Self::binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Not => UnaryOp::Not,
            _ => return self.parse_primary(),
        };
        let start = self.advance().span;
        let operand = self.parse_unary()?;
        let span = start.to(operand.span());
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
            span,
        })
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let span = self.peek().span;
        let literal = match self.peek_kind() {
            TokenKind::IntLit(v) => Some(Literal::Int(*v)),
            TokenKind::RealLit(v) => Some(Literal::Real(*v)),
            TokenKind::True => Some(Literal::Bool(true)),
            TokenKind::False => Some(Literal::Bool(false)),
            _ => None,
        };
        if let Some(value) = literal {
            self.advance();
            return Ok(Expr::Literal { value, span });
        }

        match self.peek_kind() {
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(&TokenKind::RParen, "expected `)`")?;
                Ok(inner)
            }
            TokenKind::Ident(_) => {
                let (name, name_span) = self.parse_qualified_name("expected name")?;
                if !self.match_token(&TokenKind::LParen) {
                    return Ok(Expr::Name { name, span: name_span });
                }

                let mut args = Vec::new();
                if !self.check(&TokenKind::RParen) {
                    loop {
                        args.push(self.parse_expression()?);
                        if !self.match_token(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                let end = self.expect(&TokenKind::RParen, "expected `)` after arguments")?;
                Ok(Expr::Call {
                    callee: name,
                    args,
                    span: name_span.to(end),
                })
            }
            _ => {
                self.error_at_current("expected an expression", ErrorCode::EXPECTED_EXPRESSION);
                Err(())
            }
        }
    }
}

/// Parses a token stream into a module
pub fn parse(tokens: Vec<Token>) -> (Module, Diagnostics) {
    let mut parser = Parser::new(tokens);
    let module = parser.parse();
    (module, parser.take_diagnostics())
}

#[cfg(test)]
mod tests {
    use super::*;
    use peis_lexer::tokenize;

    fn parse_source(source: &str) -> Module {
        let (tokens, lex_diags) = tokenize(source, 0);
        assert!(!lex_diags.has_errors());
        let (module, diags) = parse(tokens);
        assert!(!diags.has_errors(), "unexpected parse errors: {:?}", diags);
        module
    }

    fn parse_errors(source: &str) -> Diagnostics {
        let (tokens, _) = tokenize(source, 0);
        parse(tokens).1
    }

    #[test]
    fn test_module_header_and_imports() {
        let module = parse_source("module geometry\nimport util\nimport math2");
        assert_eq!(module.name, "geometry");
        let imports: Vec<_> = module.imports.iter().map(|i| i.module.as_str()).collect();
        assert_eq!(imports, vec!["util", "math2"]);
    }

    #[test]
    fn test_default_module_name() {
        let module = parse_source("int main() begin return 100 end");
        assert_eq!(module.name, "main");
        assert_eq!(module.functions.len(), 1);
        assert_eq!(module.functions[0].return_type, Type::Int);
    }

    #[test]
    fn test_constants() {
        let module = parse_source("public const real pi = 3.5\nconst int limit = -10");
        assert_eq!(module.constants.len(), 2);
        assert_eq!(module.constants[0].visibility, Visibility::Public);
        assert_eq!(module.constants[0].value, Literal::Real(3.5));
        assert_eq!(module.constants[1].visibility, Visibility::Private);
        assert_eq!(module.constants[1].value, Literal::Int(-10));
    }

    #[test]
    fn test_function_params() {
        let module = parse_source("public real area(real w, int h) begin return w end");
        let f = &module.functions[0];
        assert_eq!(f.visibility, Visibility::Public);
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.params[1].name, "h");
        assert_eq!(f.params[1].ty, Type::Int);
    }

    #[test]
    fn test_precedence() {
        let module = parse_source("int main() begin return 1 + 2 * 3 end");
        let Stmt::Return { value: Some(expr), .. } = &module.functions[0].body.statements[0] else {
            panic!("expected return");
        };
        let Expr::Binary { op, right, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(**right, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_statements() {
        let module = parse_source(
            r#"
void main()
begin
    local := 2; print(local)
    while local > 0 begin local := local - 1 end
    if local == 0 return else failfast()
end
"#,
        );
        let stmts = &module.functions[0].body.statements;
        assert_eq!(stmts.len(), 4);
        assert!(matches!(stmts[0], Stmt::Assign { .. }));
        assert!(matches!(stmts[1], Stmt::Expr(Expr::Call { .. })));
        assert!(matches!(stmts[2], Stmt::While { .. }));
        let Stmt::If { then_branch, else_branch, .. } = &stmts[3] else {
            panic!("expected if");
        };
        assert!(matches!(**then_branch, Stmt::Return { value: None, .. }));
        assert!(else_branch.is_some());
    }

    #[test]
    fn test_qualified_call() {
        let module = parse_source("real main() begin return math.pow(1 + 2, 3 + 4) end");
        let Stmt::Return { value: Some(Expr::Call { callee, args, .. }), .. } =
            &module.functions[0].body.statements[0]
        else {
            panic!("expected call");
        };
        assert_eq!(callee, "math.pow");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_missing_end_is_error() {
        let diags = parse_errors("int main() begin return 1");
        assert!(diags.has_errors());
    }

    #[test]
    fn test_recovers_at_next_declaration() {
        let (tokens, _) = tokenize("int broken( begin end\nint main() begin return 1 end", 0);
        let (module, diags) = parse(tokens);
        assert!(diags.has_errors());
        assert_eq!(module.functions.len(), 1);
        assert_eq!(module.functions[0].name, "main");
    }
}
