//! User-declared syntactic macros: `#macro $( HEAD pattern )$ => place : $( replacement )$ #endmacro`.

use dragon_ast::{Expr, Stmt};
use dragon_lexer::Token;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Place {
    Stmt,
    Expr,
}

#[derive(Debug, Clone)]
pub enum PatternTok {
    Literal(Token),
    Placeholder { name: String, kind: Place },
}

#[derive(Debug, Clone)]
pub struct MacroDef {
    pub head: String,
    pub place: Place,
    pub pattern: Vec<PatternTok>,
    pub replacement: Vec<Token>,
}

/// Bound AST fragment captured from a placeholder during macro application.
#[derive(Debug, Clone)]
pub enum MacroBinding {
    Stmt(Stmt),
    Expr(Expr),
}

/// Macros indexed by the grammar position they expand into and by their
/// leading identifier, matching the reference parser's `(place, head)`
/// registry key.
#[derive(Debug, Default)]
pub struct MacroRegistry {
    macros: HashMap<(Place, String), MacroDef>,
}

impl MacroRegistry {
    pub fn register(&mut self, def: MacroDef) {
        self.macros.insert((def.place, def.head.clone()), def);
    }

    pub fn lookup(&self, place: Place, head: &str) -> Option<&MacroDef> {
        self.macros.get(&(place, head.to_string()))
    }
}
