//! Recursive-descent parser: `tokens -> AST`, with support for
//! user-declared syntactic macros expanded inline during parsing.

mod macros;

pub use macros::{MacroBinding, MacroDef, MacroRegistry, PatternTok, Place};

use dragon_ast::{
    BinOpKind, ClassMember, Expr, LiteralKind, NodeIdGen, Overload, Params, Program, Stmt, TopLevel, TypeExpr, UnaryOpKind,
};
use dragon_diagnostics::Span;
use dragon_lexer::{scan, LexError, Token, TokenKind};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ParseError {
    #[error("lexer error: {0}")]
    Lexer(#[from] LexError),
    #[error("unexpected token {found:?}, expected {expected}")]
    Unexpected { found: TokenKind, expected: String, span: Span },
    #[error("unexpected end of file, expected {expected}")]
    UnexpectedEof { expected: String, span: Span },
    #[error("invalid assignment target")]
    BadAssignTarget { span: Span },
    #[error("macro '{head}' not declared for this position")]
    UnknownMacroPlaceholder { head: String, span: Span },
    #[error("duplicate parameter name '{name}'")]
    DuplicateParam { name: String, span: Span },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::Lexer(e) => e.span(),
            ParseError::Unexpected { span, .. }
            | ParseError::UnexpectedEof { span, .. }
            | ParseError::BadAssignTarget { span }
            | ParseError::UnknownMacroPlaceholder { span, .. }
            | ParseError::DuplicateParam { span, .. } => *span,
        }
    }
}

impl dragon_diagnostics::IntoDiagnostic for ParseError {
    fn into_diagnostic(self) -> dragon_diagnostics::Diagnostic {
        let span = self.span();
        dragon_diagnostics::Diagnostic::new(span, self.to_string())
    }
}

type PResult<T> = Result<T, ParseError>;

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    ids: NodeIdGen,
    macros: MacroRegistry,
    bindings: Vec<HashMap<String, MacroBinding>>,
}

impl Parser {
    pub fn new(source: &str) -> PResult<Self> {
        let tokens = scan(source)?;
        Ok(Parser { tokens, current: 0, ids: NodeIdGen, macros: MacroRegistry::default(), bindings: Vec::new() })
    }

    pub fn parse_program(&mut self) -> PResult<Program> {
        let mut top_level: Vec<TopLevel> = Vec::new();
        while !self.is_at_end() {
            if self.check(TokenKind::Macro) {
                self.parse_macro_def()?;
                continue;
            }
            top_level.push(self.parse_top_level_item()?);
        }
        Ok(Program { top_level: Self::group_overloads(top_level) })
    }

    /// Multiple `def`s sharing a name become one `OverloadedFunction`.
    fn group_overloads(items: Vec<TopLevel>) -> Vec<TopLevel> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<TopLevel>> = HashMap::new();
        let mut others: Vec<TopLevel> = Vec::new();
        for item in items {
            if let TopLevel::Function { name, .. } = &item {
                if !groups.contains_key(name) {
                    order.push(name.clone());
                }
                groups.entry(name.clone()).or_default().push(item);
            } else {
                others.push(item);
            }
        }
        let mut result = Vec::new();
        for name in order {
            let mut funcs = groups.remove(&name).unwrap_or_default();
            if funcs.len() == 1 {
                result.push(funcs.remove(0));
                continue;
            }
            let span = funcs[0].span_of();
            let id = funcs[0].id();
            let overloads = funcs
                .into_iter()
                .map(|f| match f {
                    TopLevel::Function { id, span, params, ret, body, .. } => Overload { id, span, params, ret, body },
                    _ => unreachable!(),
                })
                .collect();
            result.push(TopLevel::OverloadedFunction { id, span, name, overloads });
        }
        result.extend(others);
        result
    }

    fn parse_top_level_item(&mut self) -> PResult<TopLevel> {
        if self.check(TokenKind::Import) {
            return self.parse_import();
        }
        if self.check(TokenKind::Class) {
            return self.parse_class();
        }
        if self.check(TokenKind::Def) {
            return self.parse_function();
        }
        Err(self.error("'import', 'class', or 'def'"))
    }

    fn parse_import(&mut self) -> PResult<TopLevel> {
        let start = self.advance()?.span; // 'import'
        let file_tok = self.consume(TokenKind::Str, "a string literal")?;
        let file = unquote(&file_tok.text);
        Ok(TopLevel::Import { id: self.ids.fresh(), span: start, file })
    }

    fn parse_class(&mut self) -> PResult<TopLevel> {
        let start = self.advance()?.span; // 'class'
        let name_tok = self.consume(TokenKind::Ident, "a class name")?;
        let name = name_tok.text.clone();

        let type_vars = if self.check(TokenKind::Lt) {
            self.advance()?;
            let mut vars = Vec::new();
            if !self.check(TokenKind::Gt) {
                loop {
                    vars.push(self.consume(TokenKind::Ident, "a type parameter")?.text.clone());
                    if !self.match_token(TokenKind::Comma)? {
                        break;
                    }
                }
            }
            self.consume(TokenKind::Gt, "'>'")?;
            Some(vars)
        } else {
            None
        };

        let bases = if self.match_token(TokenKind::LParen)? {
            let list = self.parse_type_list(TokenKind::RParen)?;
            self.consume(TokenKind::RParen, "')'")?;
            list
        } else {
            Vec::new()
        };

        self.consume(TokenKind::LBrace, "'{'")?;
        let mut body = Vec::new();
        while !self.check(TokenKind::RBrace) {
            body.push(self.parse_class_member()?);
        }
        self.consume(TokenKind::RBrace, "'}'")?;

        let id = self.ids.fresh();
        match type_vars {
            Some(type_vars) => Ok(TopLevel::GenericClass { id, span: start, name, bases, body, type_vars, implements: Vec::new() }),
            None => Ok(TopLevel::Class { id, span: start, name, bases, body }),
        }
    }

    fn parse_class_member(&mut self) -> PResult<ClassMember> {
        if self.check(TokenKind::Attr) {
            let start = self.advance()?.span;
            let name = self.consume(TokenKind::Ident, "an attribute name")?.text.clone();
            self.consume(TokenKind::Colon, "':'")?;
            let ty = self.parse_type()?;
            self.consume(TokenKind::Semicolon, "';'")?;
            return Ok(ClassMember::Attr { id: self.ids.fresh(), span: start, name, ty });
        }
        if self.check(TokenKind::Method) {
            let start = self.advance()?.span;
            let name = self.consume(TokenKind::Ident, "a method name")?.text.clone();
            self.consume(TokenKind::LParen, "'('")?;
            let params = self.parse_params()?;
            self.consume(TokenKind::RParen, "')'")?;
            let ret = if self.match_token(TokenKind::Arrow)? { Some(self.parse_type()?) } else { None };
            self.consume(TokenKind::LBrace, "'{'")?;
            let body = self.parse_stmts_until(TokenKind::RBrace)?;
            self.consume(TokenKind::RBrace, "'}'")?;
            return Ok(ClassMember::Method { id: self.ids.fresh(), span: start, name, params, ret, body });
        }
        if self.check(TokenKind::New) {
            let start = self.advance()?.span;
            self.consume(TokenKind::LParen, "'('")?;
            let params = self.parse_params()?;
            self.consume(TokenKind::RParen, "')'")?;
            self.consume(TokenKind::LBrace, "'{'")?;
            let body = self.parse_stmts_until(TokenKind::RBrace)?;
            self.consume(TokenKind::RBrace, "'}'")?;
            return Ok(ClassMember::Constructor { id: self.ids.fresh(), span: start, params, body });
        }
        Err(self.error("'attr', 'method', or 'new'"))
    }

    fn parse_function(&mut self) -> PResult<TopLevel> {
        let start = self.advance()?.span; // 'def'
        let name = self.consume(TokenKind::Ident, "a function name")?.text.clone();
        self.consume(TokenKind::LParen, "'('")?;
        let params = self.parse_params()?;
        self.consume(TokenKind::RParen, "')'")?;
        let ret = if self.match_token(TokenKind::Arrow)? { Some(self.parse_type()?) } else { None };
        self.consume(TokenKind::LBrace, "'{'")?;
        let body = self.parse_stmts_until(TokenKind::RBrace)?;
        self.consume(TokenKind::RBrace, "'}'")?;
        Ok(TopLevel::Function { id: self.ids.fresh(), span: start, name, params, ret, body })
    }

    fn parse_params(&mut self) -> PResult<Params> {
        let mut params = Vec::new();
        if self.check(TokenKind::RParen) {
            return Ok(params);
        }
        loop {
            let name_tok = self.consume(TokenKind::Ident, "a parameter name")?.clone();
            let name = name_tok.text.clone();
            if params.iter().any(|(n, _): &(String, TypeExpr)| n == &name) {
                return Err(ParseError::DuplicateParam { name, span: name_tok.span });
            }
            self.consume(TokenKind::Colon, "':'")?;
            let ty = self.parse_type()?;
            params.push((name, ty));
            if !self.match_token(TokenKind::Comma)? {
                break;
            }
        }
        Ok(params)
    }

    fn parse_type_list(&mut self, end: TokenKind) -> PResult<Vec<TypeExpr>> {
        let mut list = Vec::new();
        if self.check(end) {
            return Ok(list);
        }
        loop {
            list.push(self.parse_type()?);
            if !self.match_token(TokenKind::Comma)? {
                break;
            }
        }
        Ok(list)
    }

    fn parse_type(&mut self) -> PResult<TypeExpr> {
        let start_tok = self.consume(TokenKind::Ident, "a type name")?.clone();
        let mut ty = TypeExpr::Name { id: self.ids.fresh(), span: start_tok.span, name: start_tok.text.clone() };
        while self.match_token(TokenKind::Dot)? {
            let name = self.consume(TokenKind::Ident, "a name after '.'")?.text.clone();
            ty = TypeExpr::GetName { id: self.ids.fresh(), span: start_tok.span, base: Box::new(ty), name };
        }
        while self.check(TokenKind::Lt) {
            self.advance()?;
            let args = self.parse_type_list(TokenKind::Gt)?;
            self.consume(TokenKind::Gt, "'>'")?;
            ty = TypeExpr::Generic { id: self.ids.fresh(), span: start_tok.span, base: Box::new(ty), args };
        }
        Ok(ty)
    }

    // ---- statements ----

    fn parse_stmts_until(&mut self, end: TokenKind) -> PResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !self.check(end) {
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        if let Some(binding) = self.try_consume_stmt_placeholder()? {
            return Ok(binding);
        }
        if let Some(def) = self.macro_for(Place::Stmt) {
            return self.apply_macro_stmt(def);
        }
        if self.check(TokenKind::Var) {
            return self.parse_var_stmt();
        }
        if self.check(TokenKind::Return) {
            return self.parse_return_stmt();
        }
        if self.check(TokenKind::If) {
            return self.parse_if_stmt();
        }
        if self.check(TokenKind::While) {
            return self.parse_while_stmt();
        }
        if self.check(TokenKind::Del) {
            return self.parse_delete_stmt();
        }
        if self.check(TokenKind::LBrace) {
            return self.parse_block();
        }
        let expr = self.parse_expr()?;
        let span = expr.span();
        self.consume(TokenKind::Semicolon, "';'")?;
        Ok(Stmt::ExprStmt { id: self.ids.fresh(), span, expr })
    }

    fn parse_block(&mut self) -> PResult<Stmt> {
        let start = self.consume(TokenKind::LBrace, "'{'")?.span;
        let stmts = self.parse_stmts_until(TokenKind::RBrace)?;
        self.consume(TokenKind::RBrace, "'}'")?;
        Ok(Stmt::Block { id: self.ids.fresh(), span: start, stmts })
    }

    fn parse_var_stmt(&mut self) -> PResult<Stmt> {
        let start = self.advance()?.span; // 'var'
        let name = self.consume(TokenKind::Ident, "a variable name")?.text.clone();
        let ty = if self.match_token(TokenKind::Colon)? { Some(self.parse_type()?) } else { None };
        self.consume(TokenKind::Eq, "'='")?;
        let value = self.parse_expr()?;
        self.consume(TokenKind::Semicolon, "';'")?;
        Ok(Stmt::Var { id: self.ids.fresh(), span: start, name, ty, value })
    }

    fn parse_return_stmt(&mut self) -> PResult<Stmt> {
        let start = self.advance()?.span; // 'return'
        let value = if self.check(TokenKind::Semicolon) { None } else { Some(self.parse_expr()?) };
        self.consume(TokenKind::Semicolon, "';'")?;
        Ok(Stmt::Return { id: self.ids.fresh(), span: start, value })
    }

    fn parse_if_stmt(&mut self) -> PResult<Stmt> {
        let start = self.advance()?.span; // 'if'
        self.consume(TokenKind::LParen, "'('")?;
        let cond = self.parse_expr()?;
        self.consume(TokenKind::RParen, "')'")?;
        let then_branch = Box::new(self.parse_stmt()?);
        let else_branch = if self.match_token(TokenKind::Else)? { Some(Box::new(self.parse_stmt()?)) } else { None };
        Ok(Stmt::If { id: self.ids.fresh(), span: start, cond, then_branch, else_branch })
    }

    fn parse_while_stmt(&mut self) -> PResult<Stmt> {
        let start = self.advance()?.span; // 'while'
        self.consume(TokenKind::LParen, "'('")?;
        let cond = self.parse_expr()?;
        self.consume(TokenKind::RParen, "')'")?;
        let body = Box::new(self.parse_stmt()?);
        Ok(Stmt::While { id: self.ids.fresh(), span: start, cond, body })
    }

    fn parse_delete_stmt(&mut self) -> PResult<Stmt> {
        let start = self.advance()?.span; // 'del'
        let obj = self.parse_expr()?;
        self.consume(TokenKind::Semicolon, "';'")?;
        Ok(Stmt::Delete { id: self.ids.fresh(), span: start, obj })
    }

    // ---- expressions ----

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> PResult<Expr> {
        let target = self.parse_equality()?;
        if self.match_token(TokenKind::Eq)? {
            let value = Box::new(self.parse_assignment()?);
            let span = target.span();
            return match target {
                Expr::GetVar { name, .. } => Ok(Expr::SetVar { id: self.ids.fresh(), span, name, value }),
                Expr::GetAttr { obj, attr, .. } => Ok(Expr::SetAttr { id: self.ids.fresh(), span, obj, attr, value }),
                _ => Err(ParseError::BadAssignTarget { span }),
            };
        }
        Ok(target)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = if self.check(TokenKind::EqEq) {
                BinOpKind::Eq
            } else if self.check(TokenKind::BangEq) {
                BinOpKind::Ne
            } else {
                break;
            };
            self.advance()?;
            let right = self.parse_comparison()?;
            left = Expr::BinOp { id: self.ids.fresh(), span: left.span(), left: Box::new(left), op, right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let mut left = self.parse_addition()?;
        loop {
            let op = if self.check(TokenKind::Lt) {
                BinOpKind::Lt
            } else if self.check(TokenKind::Gt) {
                BinOpKind::Gt
            } else if self.check(TokenKind::LtEq) {
                BinOpKind::Le
            } else if self.check(TokenKind::GtEq) {
                BinOpKind::Ge
            } else {
                break;
            };
            self.advance()?;
            let right = self.parse_addition()?;
            left = Expr::BinOp { id: self.ids.fresh(), span: left.span(), left: Box::new(left), op, right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_addition(&mut self) -> PResult<Expr> {
        let mut left = self.parse_multiplication()?;
        loop {
            let op = if self.check(TokenKind::Plus) {
                BinOpKind::Add
            } else if self.check(TokenKind::Minus) {
                BinOpKind::Sub
            } else {
                break;
            };
            self.advance()?;
            let right = self.parse_multiplication()?;
            left = Expr::BinOp { id: self.ids.fresh(), span: left.span(), left: Box::new(left), op, right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_multiplication(&mut self) -> PResult<Expr> {
        let mut left = self.parse_cast()?;
        loop {
            let op = if self.check(TokenKind::Star) {
                BinOpKind::Mul
            } else if self.check(TokenKind::Slash) {
                BinOpKind::Div
            } else if self.check(TokenKind::SlashSlash) {
                BinOpKind::FloorDiv
            } else if self.check(TokenKind::Percent) {
                BinOpKind::Mod
            } else {
                break;
            };
            self.advance()?;
            let right = self.parse_cast()?;
            left = Expr::BinOp { id: self.ids.fresh(), span: left.span(), left: Box::new(left), op, right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_cast(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_unary()?;
        while self.match_token(TokenKind::As)? {
            let ty = self.parse_type()?;
            expr = Expr::Cast { id: self.ids.fresh(), span: expr.span(), obj: Box::new(expr), ty };
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        if self.check(TokenKind::Bang) || self.check(TokenKind::Minus) {
            let tok = self.advance()?.clone();
            let op = if tok.kind == TokenKind::Bang { UnaryOpKind::Not } else { UnaryOpKind::Neg };
            let right = Box::new(self.parse_unary()?);
            return Ok(Expr::Unary { id: self.ids.fresh(), span: tok.span, op, right });
        }
        self.parse_call()
    }

    fn parse_call(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.match_token(TokenKind::LParen)? {
                let args = self.parse_arg_list()?;
                self.consume(TokenKind::RParen, "')'")?;
                expr = Expr::Call { id: self.ids.fresh(), span: expr.span(), callee: Box::new(expr), args };
            } else if self.match_token(TokenKind::Dot)? {
                let attr = self.consume(TokenKind::Ident, "an attribute or method name")?.text.clone();
                expr = Expr::GetAttr { id: self.ids.fresh(), span: expr.span(), obj: Box::new(expr), attr };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_arg_list(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        if self.check(TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if !self.match_token(TokenKind::Comma)? {
                break;
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        if let Some(binding) = self.try_consume_expr_placeholder()? {
            return Ok(binding);
        }
        if self.check(TokenKind::New) {
            let start = self.advance()?.span;
            let class = self.parse_type()?;
            self.consume(TokenKind::LParen, "'('")?;
            let args = self.parse_arg_list()?;
            self.consume(TokenKind::RParen, "')'")?;
            return Ok(Expr::New { id: self.ids.fresh(), span: start, class, args });
        }
        if self.check(TokenKind::LParen) {
            let start = self.advance()?.span;
            let inner = self.parse_expr()?;
            self.consume(TokenKind::RParen, "')'")?;
            return Ok(Expr::Grouping { id: self.ids.fresh(), span: start, inner: Box::new(inner) });
        }
        if self.check(TokenKind::Num) || self.check(TokenKind::Hex) || self.check(TokenKind::Str) {
            let tok = self.advance()?.clone();
            let kind = match tok.kind {
                TokenKind::Num => LiteralKind::Num(tok.text.clone()),
                TokenKind::Hex => LiteralKind::Hex(tok.text.clone()),
                _ => LiteralKind::Str(unquote(&tok.text)),
            };
            return Ok(Expr::Literal { id: self.ids.fresh(), span: tok.span, kind });
        }
        if let Some(def) = self.macro_for(Place::Expr) {
            return self.apply_macro_expr(def);
        }
        if self.check(TokenKind::Ident) {
            let tok = self.advance()?.clone();
            return Ok(Expr::GetVar { id: self.ids.fresh(), span: tok.span, name: tok.text });
        }
        Err(self.error("an expression"))
    }

    // ---- macros ----

    fn parse_macro_def(&mut self) -> PResult<()> {
        self.consume(TokenKind::Macro, "'#macro'")?;
        self.consume(TokenKind::DollarLParen, "'$('")?;
        let head = self.consume(TokenKind::Ident, "a macro name")?.text.clone();

        let mut pattern = Vec::new();
        while !self.check(TokenKind::RParenDollar) {
            if self.check(TokenKind::DollarIdent) {
                let name = self.advance()?.text.clone();
                self.consume(TokenKind::Colon, "':'")?;
                let kind_tok = self.consume(TokenKind::Ident, "'stmt' or 'expr'")?.text.clone();
                let kind = parse_place(&kind_tok)?;
                pattern.push(PatternTok::Placeholder { name, kind });
            } else {
                pattern.push(PatternTok::Literal(self.advance()?.clone()));
            }
        }
        self.consume(TokenKind::RParenDollar, "')$'")?;
        self.consume(TokenKind::FatArrow, "'=>'")?;
        let place_tok = self.consume(TokenKind::Ident, "'stmt' or 'expr'")?.text.clone();
        let place = parse_place(&place_tok)?;
        self.consume(TokenKind::Colon, "':'")?;
        self.consume(TokenKind::DollarLParen, "'$('")?;

        let mut replacement = Vec::new();
        while !self.check(TokenKind::RParenDollar) {
            replacement.push(self.advance()?.clone());
        }
        self.consume(TokenKind::RParenDollar, "')$'")?;
        self.consume(TokenKind::Endmacro, "'#endmacro'")?;

        self.macros.register(MacroDef { head, place, pattern, replacement });
        Ok(())
    }

    fn macro_for(&self, place: Place) -> Option<MacroDef> {
        if !self.check(TokenKind::Ident) {
            return None;
        }
        let head = self.peek().ok()?.text.clone();
        self.macros.lookup(place, &head).cloned()
    }

    fn apply_macro_stmt(&mut self, def: MacroDef) -> PResult<Stmt> {
        match self.apply_macro(def)? {
            MacroBinding::Stmt(s) => Ok(s),
            MacroBinding::Expr(_) => Err(self.error("a statement-producing macro")),
        }
    }

    fn apply_macro_expr(&mut self, def: MacroDef) -> PResult<Expr> {
        match self.apply_macro(def)? {
            MacroBinding::Expr(e) => Ok(e),
            MacroBinding::Stmt(_) => Err(self.error("an expression-producing macro")),
        }
    }

    fn apply_macro(&mut self, def: MacroDef) -> PResult<MacroBinding> {
        self.advance()?; // head identifier
        let mut bound = HashMap::new();
        for tok in &def.pattern {
            match tok {
                PatternTok::Literal(lit) => {
                    self.expect_literal(lit)?;
                }
                PatternTok::Placeholder { name, kind } => {
                    let binding = match kind {
                        Place::Stmt => MacroBinding::Stmt(self.parse_stmt()?),
                        Place::Expr => MacroBinding::Expr(self.parse_expr()?),
                    };
                    bound.insert(name.clone(), binding);
                }
            }
        }

        self.bindings.push(bound);
        let saved_tokens = std::mem::replace(&mut self.tokens, def.replacement.clone());
        let saved_current = std::mem::replace(&mut self.current, 0);

        let result = match def.place {
            Place::Stmt => self.parse_stmt().map(MacroBinding::Stmt),
            Place::Expr => self.parse_expr().map(MacroBinding::Expr),
        };

        self.tokens = saved_tokens;
        self.current = saved_current;
        self.bindings.pop();
        result
    }

    fn try_consume_stmt_placeholder(&mut self) -> PResult<Option<Stmt>> {
        if !self.check(TokenKind::DollarIdent) {
            return Ok(None);
        }
        let name = self.peek()?.text.clone();
        if let Some(MacroBinding::Stmt(s)) = self.bindings.last().and_then(|m| m.get(&name)).cloned() {
            self.advance()?;
            return Ok(Some(s));
        }
        Ok(None)
    }

    fn try_consume_expr_placeholder(&mut self) -> PResult<Option<Expr>> {
        if !self.check(TokenKind::DollarIdent) {
            return Ok(None);
        }
        let name = self.peek()?.text.clone();
        if let Some(MacroBinding::Expr(e)) = self.bindings.last().and_then(|m| m.get(&name)).cloned() {
            self.advance()?;
            return Ok(Some(e));
        }
        Ok(None)
    }

    fn expect_literal(&mut self, lit: &Token) -> PResult<()> {
        let cur = self.peek()?.clone();
        if cur.kind == lit.kind && cur.text == lit.text {
            self.advance()?;
            Ok(())
        } else {
            Err(ParseError::Unexpected { found: cur.kind, expected: format!("'{}'", lit.text), span: cur.span })
        }
    }

    // ---- token-stream helpers ----

    fn is_at_end(&self) -> bool {
        matches!(self.tokens.get(self.current), None | Some(Token { kind: TokenKind::Eof, .. }))
    }

    fn peek(&self) -> PResult<&Token> {
        self.tokens.get(self.current).ok_or_else(|| ParseError::UnexpectedEof {
            expected: "a token".into(),
            span: Span::point(0, 0),
        })
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.tokens.get(self.current).map(|t| t.kind == kind).unwrap_or(false)
    }

    fn advance(&mut self) -> PResult<&Token> {
        let idx = self.current;
        if idx >= self.tokens.len() {
            return Err(ParseError::UnexpectedEof { expected: "a token".into(), span: Span::point(0, 0) });
        }
        if !matches!(self.tokens[idx].kind, TokenKind::Eof) {
            self.current += 1;
        }
        Ok(&self.tokens[idx])
    }

    fn match_token(&mut self, kind: TokenKind) -> PResult<bool> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn consume(&mut self, kind: TokenKind, expected: &str) -> PResult<&Token> {
        if self.check(kind) {
            self.advance()
        } else {
            let cur = self.peek()?.clone();
            Err(ParseError::Unexpected { found: cur.kind, expected: expected.to_string(), span: cur.span })
        }
    }

    fn error(&self, expected: &str) -> ParseError {
        match self.peek() {
            Ok(tok) => ParseError::Unexpected { found: tok.kind, expected: expected.to_string(), span: tok.span },
            Err(e) => e.clone(),
        }
    }
}

fn parse_place(text: &str) -> PResult<Place> {
    match text {
        "stmt" => Ok(Place::Stmt),
        "expr" => Ok(Place::Expr),
        _ => Err(ParseError::Unexpected { found: TokenKind::Ident, expected: "'stmt' or 'expr'".into(), span: Span::point(0, 0) }),
    }
}

fn unquote(text: &str) -> String {
    let inner = text.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(text);
    let mut out = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

trait TopLevelSpan {
    fn span_of(&self) -> Span;
}

impl TopLevelSpan for TopLevel {
    fn span_of(&self) -> Span {
        match self {
            TopLevel::Function { span, .. }
            | TopLevel::Class { span, .. }
            | TopLevel::GenericClass { span, .. }
            | TopLevel::OverloadedFunction { span, .. }
            | TopLevel::Import { span, .. } => *span,
        }
    }
}

pub fn parse(source: &str) -> PResult<Program> {
    Parser::new(source)?.parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hello_world_function() {
        let prog = parse("def main() -> int { print(\"hi\"); return 0; }").expect("parse ok");
        assert_eq!(prog.top_level.len(), 1);
        assert!(matches!(prog.top_level[0], TopLevel::Function { .. }));
    }

    #[test]
    fn parses_single_inheritance_class() {
        let prog = parse("class A { method f() -> int { return 1; } } class B(A) { method f() -> int { return 2; } }")
            .expect("parse ok");
        assert_eq!(prog.top_level.len(), 2);
        if let TopLevel::Class { bases, .. } = &prog.top_level[1] {
            assert_eq!(bases.len(), 1);
        } else {
            panic!("expected class B");
        }
    }

    #[test]
    fn parses_generic_class() {
        let prog = parse("class Box<T> { attr v: T; method get() -> T { return self.v; } }").expect("parse ok");
        assert!(matches!(prog.top_level[0], TopLevel::GenericClass { .. }));
    }

    #[test]
    fn groups_overloaded_functions() {
        let prog = parse(
            "def add(a: int, b: int) -> int { return a; } def add(a: String, b: String) -> String { return a; }",
        )
        .expect("parse ok");
        assert_eq!(prog.top_level.len(), 1);
        if let TopLevel::OverloadedFunction { overloads, .. } = &prog.top_level[0] {
            assert_eq!(overloads.len(), 2);
        } else {
            panic!("expected overload group");
        }
    }

    #[test]
    fn expands_statement_macro() {
        let src = "#macro $( unless $c:expr then $b:stmt )$ => stmt : $( if (!($c)) $b )$ #endmacro \
                   def main() -> int { unless x == 0 then return 1; return 0; }";
        let prog = parse(src).expect("parse ok");
        let TopLevel::Function { body, .. } = &prog.top_level[0] else { panic!("expected function") };
        assert!(matches!(body[0], Stmt::If { .. }));
    }

    #[test]
    fn reports_error_on_unexpected_token() {
        assert!(parse("class { }").is_err());
    }

    #[test]
    fn parses_assignment_and_attr_access() {
        let prog = parse("def main() -> int { var x: int = 1; x = x + 1; return x; }").expect("parse ok");
        let TopLevel::Function { body, .. } = &prog.top_level[0] else { panic!("expected function") };
        assert!(matches!(body[1], Stmt::ExprStmt { .. }));
    }

    #[test]
    fn duplicate_parameter_name_is_an_error() {
        let err = parse("def f(a: int, a: String) -> int { return a; }").expect_err("duplicate param name");
        assert!(matches!(err, ParseError::DuplicateParam { name, .. } if name == "a"));
    }
}
