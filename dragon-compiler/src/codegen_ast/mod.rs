//! C intermediate representation: the target of code generation. Each
//! node knows how to render itself to C source text; the generator
//! (`crate::codegen`) builds a tree of these and then asks for its text.

#[derive(Debug, Clone)]
pub enum CExpr {
    Ident(String),
    IntLit(i64),
    StrLit(String),
    Null,
    SizeOf(String),
    Call { callee: Box<CExpr>, args: Vec<CExpr> },
    BinOp { op: &'static str, left: Box<CExpr>, right: Box<CExpr> },
    Unary { op: &'static str, operand: Box<CExpr> },
    Ref(Box<CExpr>),
    Deref(Box<CExpr>),
    Cast { to: String, expr: Box<CExpr> },
    GetAttr { obj: Box<CExpr>, field: String },
    GetArrow { obj: Box<CExpr>, field: String },
    Raw(String),
}

impl CExpr {
    pub fn emit(&self) -> String {
        match self {
            CExpr::Ident(s) => s.clone(),
            CExpr::IntLit(n) => n.to_string(),
            CExpr::StrLit(s) => format!("\"{}\"", escape_c_string(s)),
            CExpr::Null => "NULL".into(),
            CExpr::SizeOf(ty) => format!("sizeof({ty})"),
            CExpr::Call { callee, args } => {
                let args = args.iter().map(CExpr::emit).collect::<Vec<_>>().join(", ");
                format!("{}({args})", callee.emit())
            }
            CExpr::BinOp { op, left, right } => format!("({} {} {})", left.emit(), op, right.emit()),
            CExpr::Unary { op, operand } => format!("({}{})", op, operand.emit()),
            CExpr::Ref(e) => format!("(&{})", e.emit()),
            CExpr::Deref(e) => format!("(*{})", e.emit()),
            CExpr::Cast { to, expr } => format!("(({to}){})", expr.emit()),
            CExpr::GetAttr { obj, field } => format!("{}.{}", obj.emit(), field),
            CExpr::GetArrow { obj, field } => format!("{}->{}", obj.emit(), field),
            CExpr::Raw(s) => s.clone(),
        }
    }
}

fn escape_c_string(s: &str) -> String {
    s.chars().flat_map(|c| match c {
        '"' => "\\\"".chars().collect::<Vec<_>>(),
        '\\' => "\\\\".chars().collect(),
        '\n' => "\\n".chars().collect(),
        other => vec![other],
    }).collect()
}

#[derive(Debug, Clone)]
pub enum CStmt {
    Declare { ty: String, name: String, init: Option<CExpr> },
    ExprStmt(CExpr),
    Return(Option<CExpr>),
    If { cond: CExpr, then_block: Vec<CStmt>, else_block: Option<Vec<CStmt>> },
    While { cond: CExpr, body: Vec<CStmt> },
    Block(Vec<CStmt>),
    /// a bare `{ ... }` block with no extra scoping semantics attached, used for teardown sequences
    UnscopedBlock(Vec<CStmt>),
    Raw(String),
}

impl CStmt {
    pub fn emit(&self, indent: usize) -> String {
        let pad = "    ".repeat(indent);
        match self {
            CStmt::Declare { ty, name, init } => match init {
                Some(e) => format!("{pad}{ty} {name} = {};\n", e.emit()),
                None => format!("{pad}{ty} {name};\n"),
            },
            CStmt::ExprStmt(e) => format!("{pad}{};\n", e.emit()),
            CStmt::Return(Some(e)) => format!("{pad}return {};\n", e.emit()),
            CStmt::Return(None) => format!("{pad}return;\n"),
            CStmt::If { cond, then_block, else_block } => {
                let mut out = format!("{pad}if ({}) {{\n", cond.emit());
                for s in then_block {
                    out.push_str(&s.emit(indent + 1));
                }
                out.push_str(&format!("{pad}}}"));
                if let Some(eb) = else_block {
                    out.push_str(" else {\n");
                    for s in eb {
                        out.push_str(&s.emit(indent + 1));
                    }
                    out.push_str(&format!("{pad}}}"));
                }
                out.push('\n');
                out
            }
            CStmt::While { cond, body } => {
                let mut out = format!("{pad}while ({}) {{\n", cond.emit());
                for s in body {
                    out.push_str(&s.emit(indent + 1));
                }
                out.push_str(&format!("{pad}}}\n"));
                out
            }
            CStmt::Block(stmts) | CStmt::UnscopedBlock(stmts) => {
                let mut out = format!("{pad}{{\n");
                for s in stmts {
                    out.push_str(&s.emit(indent + 1));
                }
                out.push_str(&format!("{pad}}}\n"));
                out
            }
            CStmt::Raw(s) => format!("{pad}{s}\n"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CParam {
    pub ty: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct CFunction {
    pub ret: String,
    pub name: String,
    pub params: Vec<CParam>,
    pub body: Vec<CStmt>,
}

impl CFunction {
    pub fn prototype(&self) -> String {
        let params = if self.params.is_empty() {
            "void".to_string()
        } else {
            self.params.iter().map(|p| format!("{} {}", p.ty, p.name)).collect::<Vec<_>>().join(", ")
        };
        format!("{} {}({})", self.ret, self.name, params)
    }

    pub fn emit_definition(&self) -> String {
        let mut out = format!("{} {{\n", self.prototype());
        for s in &self.body {
            out.push_str(&s.emit(1));
        }
        out.push_str("}\n");
        out
    }
}

#[derive(Debug, Clone)]
pub struct CStructField {
    pub ty: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct CStruct {
    pub tag: String,
    pub fields: Vec<CStructField>,
}

impl CStruct {
    pub fn emit_typedef(&self) -> String {
        let mut out = format!("struct {} {{\n", self.tag);
        for f in &self.fields {
            out.push_str(&format!("    {} {};\n", f.ty, f.name));
        }
        out.push_str("};\n");
        out
    }

    pub fn forward_decl(&self) -> String {
        format!("struct {};\n", self.tag)
    }
}

/// One source unit's worth of generated code: a `.h`/`.c` pair.
#[derive(Debug, Clone, Default)]
pub struct CUnit {
    pub includes: Vec<String>,
    pub structs: Vec<CStruct>,
    pub functions: Vec<CFunction>,
    pub main: Option<CFunction>,
}

impl CUnit {
    pub fn emit_header(&self, guard: &str) -> String {
        let mut out = format!("#ifndef {guard}\n#define {guard}\n\n");
        for inc in &self.includes {
            out.push_str(&format!("#include \"{inc}\"\n"));
        }
        out.push('\n');
        for s in &self.structs {
            out.push_str(&s.forward_decl());
        }
        out.push('\n');
        for s in &self.structs {
            out.push_str(&s.emit_typedef());
            out.push('\n');
        }
        for f in &self.functions {
            out.push_str(&format!("{};\n", f.prototype()));
        }
        out.push_str(&format!("\n#endif /* {guard} */\n"));
        out
    }

    pub fn emit_source(&self, header_name: &str) -> String {
        let mut out = format!("#include \"{header_name}\"\n\n");
        for f in &self.functions {
            out.push_str(&f.emit_definition());
            out.push('\n');
        }
        if let Some(m) = &self.main {
            out.push_str(&m.emit_definition());
        }
        out
    }
}
